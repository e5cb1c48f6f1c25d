use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ListQuery, ThreadSnapshot};

/// Trait for thread snapshot persistence
///
/// Implementations own their connection lifecycle and enforce their own TTL:
/// an expired snapshot reads as absent and is deleted as part of that read.
/// `save` is an upsert keyed by `chat_id`; concurrent saves of the same chat
/// are last-write-wins.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Adapter name as registered (`memory`, `sqlite`, `mongodb`, ...)
    fn name(&self) -> &str;

    /// Load a snapshot, `None` if missing or expired
    async fn get(&self, chat_id: &str) -> Result<Option<ThreadSnapshot>>;

    /// Insert or replace the snapshot for `snapshot.chat_id`
    async fn save(&self, snapshot: &ThreadSnapshot) -> Result<()>;

    /// Delete a snapshot, returns whether one existed
    async fn delete(&self, chat_id: &str) -> Result<bool>;

    /// List live snapshots, newest `last_used` first
    async fn list_all(&self, query: ListQuery) -> Result<Vec<ThreadSnapshot>>;

    /// Release connections; the default adapter has nothing to release
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
