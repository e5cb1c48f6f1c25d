use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{ListQuery, ThreadSnapshot, Ttl};
use crate::store::ThreadStore;

/// In-process store; contents are lost when the process exits
#[derive(Default)]
pub struct MemoryStore {
    snapshots: RwLock<HashMap<String, ThreadSnapshot>>,
    ttl: Ttl,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Ttl) -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl ThreadStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, chat_id: &str) -> Result<Option<ThreadSnapshot>> {
        let snapshot = self.snapshots.read().await.get(chat_id).cloned();

        match snapshot {
            Some(snapshot) if self.ttl.is_expired(&snapshot, Utc::now()) => {
                let mut snapshots = self.snapshots.write().await;
                // Re-check under the write lock: a save may have refreshed it
                if snapshots
                    .get(chat_id)
                    .is_some_and(|s| self.ttl.is_expired(s, Utc::now()))
                {
                    snapshots.remove(chat_id);
                    tracing::debug!(chat_id, "expired thread removed from memory store");
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn save(&self, snapshot: &ThreadSnapshot) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.chat_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        Ok(self.snapshots.write().await.remove(chat_id).is_some())
    }

    async fn list_all(&self, query: ListQuery) -> Result<Vec<ThreadSnapshot>> {
        let now = Utc::now();
        let mut snapshots = self.snapshots.write().await;

        snapshots.retain(|_, s| !self.ttl.is_expired(s, now));

        let mut live: Vec<ThreadSnapshot> = snapshots.values().cloned().collect();
        live.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        Ok(query.page(live))
    }
}
