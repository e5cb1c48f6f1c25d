use std::sync::atomic::{AtomicU64, Ordering};

use relay_llm::TokenUsage;
use serde::Serialize;

use crate::thread::{ReplySource, ThreadReply};

/// Point-in-time usage counters of an assistant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub total_asks: u64,
    pub successful_asks: u64,
    pub failed_asks: u64,
    /// Asks answered by a middleware without calling the thread
    pub middleware_responses: u64,
    pub fallback_responses: u64,
    pub fallback_backend_replies: u64,
    pub function_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub handoffs: u64,
    pub releases: u64,
    pub evictions: u64,
    pub active_threads: u64,
    pub human_mode_chats: u64,
}

#[derive(Default)]
pub(crate) struct StatsCounters {
    pub total_asks: AtomicU64,
    pub successful_asks: AtomicU64,
    pub failed_asks: AtomicU64,
    pub middleware_responses: AtomicU64,
    pub fallback_responses: AtomicU64,
    pub fallback_backend_replies: AtomicU64,
    pub function_calls: AtomicU64,
    pub input_tokens: AtomicU64,
    pub output_tokens: AtomicU64,
    pub handoffs: AtomicU64,
    pub releases: AtomicU64,
    pub evictions: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StatsCounters {
    pub fn record_reply(&self, reply: &ThreadReply) {
        match reply.source {
            ReplySource::Backend => {}
            ReplySource::FallbackResponse => bump(&self.fallback_responses),
            ReplySource::FallbackBackend => bump(&self.fallback_backend_replies),
        }
        self.function_calls
            .fetch_add(reply.function_calls as u64, Ordering::Relaxed);
        self.record_usage(reply.usage);
    }

    fn record_usage(&self, usage: TokenUsage) {
        self.input_tokens
            .fetch_add(u64::from(usage.input_tokens), Ordering::Relaxed);
        self.output_tokens
            .fetch_add(u64::from(usage.output_tokens), Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_threads: usize, human_mode_chats: usize) -> UsageStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        UsageStats {
            total_asks: load(&self.total_asks),
            successful_asks: load(&self.successful_asks),
            failed_asks: load(&self.failed_asks),
            middleware_responses: load(&self.middleware_responses),
            fallback_responses: load(&self.fallback_responses),
            fallback_backend_replies: load(&self.fallback_backend_replies),
            function_calls: load(&self.function_calls),
            input_tokens: load(&self.input_tokens),
            output_tokens: load(&self.output_tokens),
            handoffs: load(&self.handoffs),
            releases: load(&self.releases),
            evictions: load(&self.evictions),
            active_threads: active_threads as u64,
            human_mode_chats: human_mode_chats as u64,
        }
    }
}
