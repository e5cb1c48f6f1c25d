use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_llm::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Persisted state of one chat's conversation thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub chat_id: String,
    /// Sorted map so the serialized form is stable
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

impl ThreadSnapshot {
    pub fn new(chat_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_id: chat_id.into(),
            context: BTreeMap::new(),
            history: Vec::new(),
            created_at: now,
            last_used: now,
        }
    }
}

/// Paging for `ThreadStore::list_all`; results come newest `last_used` first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Apply skip/limit to an already sorted listing
    pub fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Time-to-live measured from a snapshot's `last_used`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ttl(Option<Duration>);

impl Ttl {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Some(Duration::from_secs(secs)))
    }

    pub fn from_duration(duration: Option<Duration>) -> Self {
        Self(duration)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn is_expired(&self, snapshot: &ThreadSnapshot, now: DateTime<Utc>) -> bool {
        let Some(ttl) = self.0 else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(snapshot.last_used) > ttl,
            // TTL too large to represent never expires
            Err(_) => false,
        }
    }
}
