//! Redis-backed checkpoint store (plain `GET` / `SET` on the checkpoint key).

use std::sync::Arc;

use redis::Commands;

use super::{CheckpointError, CheckpointStore};

#[derive(Debug, Clone)]
pub struct RedisCheckpointStore {
    client: Arc<redis::Client>,
}

impl RedisCheckpointStore {
    /// `redis_url` e.g. "redis://localhost:6379".
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CheckpointError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CheckpointError::Storage(format!("redis connection error: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn connection(&self) -> Result<redis::Connection, CheckpointError> {
        self.client
            .get_connection()
            .map_err(|e| CheckpointError::Storage(format!("redis connection error: {e}")))
    }
}

impl CheckpointStore for RedisCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        let mut conn = self.connection()?;
        conn.get(key)
            .map_err(|e| CheckpointError::Storage(format!("redis command error: {e}")))
    }

    fn set(&self, key: &str, value: i64) -> Result<(), CheckpointError> {
        let mut conn = self.connection()?;
        conn.set(key, value)
            .map_err(|e| CheckpointError::Storage(format!("redis command error: {e}")))
    }
}
