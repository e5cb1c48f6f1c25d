use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use relay_llm::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ThreadSnapshot;

/// MongoDB-specific thread document (chat id doubles as `_id`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoThread {
    #[serde(rename = "_id")]
    pub chat_id: String,
    pub context: BTreeMap<String, Value>,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Millisecond copy of `last_used` for sorting and TTL filters
    pub last_used_ms: i64,
}

// Conversions between database-agnostic and MongoDB-specific models

impl From<&ThreadSnapshot> for MongoThread {
    fn from(snapshot: &ThreadSnapshot) -> Self {
        Self {
            chat_id: snapshot.chat_id.clone(),
            context: snapshot.context.clone(),
            history: snapshot.history.clone(),
            created_at: snapshot.created_at,
            last_used: snapshot.last_used,
            last_used_ms: snapshot.last_used.timestamp_millis(),
        }
    }
}

impl From<MongoThread> for ThreadSnapshot {
    fn from(thread: MongoThread) -> Self {
        Self {
            chat_id: thread.chat_id,
            context: thread.context,
            history: thread.history,
            created_at: thread.created_at,
            last_used: thread.last_used,
        }
    }
}
