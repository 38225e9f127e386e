use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::BookingQueueError;

/// Approximate remaining capacity per slot, for availability reads only.
#[async_trait]
pub trait CapacityCache: Send + Sync {
    async fn get_remaining(&self, slot_id: Uuid) -> Result<Option<u32>, BookingQueueError>;

    async fn set_remaining(&self, slot_id: Uuid, remaining: u32) -> Result<(), BookingQueueError>;

    async fn invalidate(&self, slot_id: Uuid) -> Result<(), BookingQueueError>;
}

#[derive(Default)]
pub struct MemoryCapacityCache {
    entries: RwLock<HashMap<Uuid, u32>>,
}

impl MemoryCapacityCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapacityCache for MemoryCapacityCache {
    async fn get_remaining(&self, slot_id: Uuid) -> Result<Option<u32>, BookingQueueError> {
        Ok(self.entries.read().await.get(&slot_id).copied())
    }

    async fn set_remaining(&self, slot_id: Uuid, remaining: u32) -> Result<(), BookingQueueError> {
        self.entries.write().await.insert(slot_id, remaining);
        Ok(())
    }

    async fn invalidate(&self, slot_id: Uuid) -> Result<(), BookingQueueError> {
        self.entries.write().await.remove(&slot_id);
        Ok(())
    }
}

/// Redis-backed cache: one `{prefix}:slot_remaining:{slot_id}` string per slot.
pub struct RedisCapacityCache {
    pool: Pool,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisCapacityCache {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self, BookingQueueError> {
        let pool = Config::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BookingQueueError::QueueError(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self::from_pool(pool, prefix))
    }

    pub fn from_pool(pool: Pool, prefix: &str) -> Self {
        Self {
            pool,
            prefix: prefix.to_string(),
            // Slots are date-bound; a day is enough.
            ttl_seconds: 86_400,
        }
    }

    fn key(&self, slot_id: Uuid) -> String {
        format!("{}:slot_remaining:{}", self.prefix, slot_id)
    }

    async fn get_connection(&self) -> Result<Connection, BookingQueueError> {
        self.pool.get().await.map_err(|e| {
            BookingQueueError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                e.to_string(),
            )))
        })
    }
}

#[async_trait]
impl CapacityCache for RedisCapacityCache {
    async fn get_remaining(&self, slot_id: Uuid) -> Result<Option<u32>, BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let value: Option<u32> = conn.get(self.key(slot_id)).await?;
        Ok(value)
    }

    async fn set_remaining(&self, slot_id: Uuid, remaining: u32) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let _: () = redis::cmd("SET")
            .arg(self.key(slot_id))
            .arg(remaining)
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;
        debug!("Cached remaining capacity {} for slot {}", remaining, slot_id);
        Ok(())
    }

    async fn invalidate(&self, slot_id: Uuid) -> Result<(), BookingQueueError> {
        let mut conn = self.get_connection().await?;
        let _: () = conn.del(self.key(slot_id)).await?;
        Ok(())
    }
}
