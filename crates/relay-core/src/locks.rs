//! Per-chat mutual exclusion.
//!
//! Every read-modify-persist cycle on a chat (ask, handoff, release,
//! context writes, eviction) holds that chat's permit, so two of them
//! never interleave on the same thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as ChatMutex, OwnedMutexGuard};

/// Held for the duration of one chat operation; released on drop
pub type ChatPermit = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct ChatLocks {
    locks: Mutex<HashMap<String, Arc<ChatMutex<()>>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, chat_id: &str) -> Arc<ChatMutex<()>> {
        self.locks
            .lock()
            .entry(chat_id.to_owned())
            .or_insert_with(|| Arc::new(ChatMutex::new(())))
            .clone()
    }

    /// Wait until the chat is free
    pub async fn acquire(&self, chat_id: &str) -> ChatPermit {
        self.entry(chat_id).lock_owned().await
    }

    /// Take the permit only if nobody holds it
    pub fn try_acquire(&self, chat_id: &str) -> Option<ChatPermit> {
        self.entry(chat_id).try_lock_owned().ok()
    }

    pub fn is_locked(&self, chat_id: &str) -> bool {
        self.locks
            .lock()
            .get(chat_id)
            .is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Number of tracked chats
    pub fn chat_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop one chat's entry if nobody holds or waits on it
    pub fn forget(&self, chat_id: &str) -> bool {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(chat_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(chat_id);
        }
        idle
    }

    /// Forget chats nobody holds or waits on
    pub fn prune_idle(&self) {
        // Permits and waiters each keep a clone of the Arc
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}
