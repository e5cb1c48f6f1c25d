use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection};

use crate::dbs::mongo::models::MongoThread;
use crate::error::{PersistError, Result};
use crate::models::{ListQuery, ThreadSnapshot, Ttl};
use crate::store::ThreadStore;

pub struct MongoThreadStore {
    client: Client,
    collection: Collection<MongoThread>,
    ttl: Ttl,
}

impl MongoThreadStore {
    /// Connect to MongoDB and bind the `threads` collection
    pub async fn connect(mongodb_uri: &str, database: &str, ttl: Ttl) -> Result<Self> {
        let client = Client::with_uri_str(mongodb_uri)
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;

        let collection = client.database(database).collection("threads");

        Ok(Self {
            client,
            collection,
            ttl,
        })
    }
}

#[async_trait]
impl ThreadStore for MongoThreadStore {
    fn name(&self) -> &str {
        "mongodb"
    }

    async fn get(&self, chat_id: &str) -> Result<Option<ThreadSnapshot>> {
        let Some(thread) = self.collection.find_one(doc! { "_id": chat_id }).await? else {
            return Ok(None);
        };
        let snapshot: ThreadSnapshot = thread.into();

        if self.ttl.is_expired(&snapshot, Utc::now()) {
            let filter = doc! {
                "_id": chat_id,
                "last_used_ms": snapshot.last_used.timestamp_millis(),
            };
            self.collection.delete_one(filter).await?;
            tracing::debug!(chat_id, "expired thread removed from mongodb store");
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ThreadSnapshot) -> Result<()> {
        let document = MongoThread::from(snapshot);
        self.collection
            .replace_one(doc! { "_id": &snapshot.chat_id }, &document)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": chat_id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn list_all(&self, query: ListQuery) -> Result<Vec<ThreadSnapshot>> {
        if let Some(ttl) = self.ttl.duration().and_then(|d| chrono::Duration::from_std(d).ok()) {
            let cutoff = (Utc::now() - ttl).timestamp_millis();
            self.collection
                .delete_many(doc! { "last_used_ms": { "$lt": cutoff } })
                .await?;
        }

        let mut find = self
            .collection
            .find(doc! {})
            .sort(doc! { "last_used_ms": -1 });

        if let Some(skip) = query.skip {
            find = find.skip(skip as u64);
        }
        if let Some(limit) = query.limit {
            find = find.limit(limit as i64);
        }

        let threads: Vec<MongoThread> = find.await?.try_collect().await?;
        Ok(threads.into_iter().map(Into::into).collect())
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}
