//! Shared checkpoint persistence.
//!
//! The checkpoint is the furthest event id processed by any projector in the
//! deployment. It is an advisory watermark, not a lock: values are signed so
//! the store can carry [`RESET_SENTINEL`], which forces a full rescan.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

pub use postgres::PostgresCheckpointStore;
#[cfg(feature = "redis")]
pub use redis::RedisCheckpointStore;

/// Stored checkpoint value that requests a rescan from the start of the log.
pub const RESET_SENTINEL: i64 = -1;

/// Key of the shared checkpoint for a deployment environment.
pub fn checkpoint_key(environment: &str) -> String {
    format!("__HANDLER_LAST_ID_{environment}__")
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint storage error: {0}")]
    Storage(String),
}

/// Key/value store for checkpoints that survives process restarts.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError>;
    fn set(&self, key: &str, value: i64) -> Result<(), CheckpointError>;
}

impl<S> CheckpointStore for Arc<S>
where
    S: CheckpointStore + ?Sized,
{
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: i64) -> Result<(), CheckpointError> {
        (**self).set(key, value)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    values: RwLock<HashMap<String, i64>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        let values = self
            .values
            .read()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        Ok(values.get(key).copied())
    }

    fn set(&self, key: &str, value: i64) -> Result<(), CheckpointError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CheckpointError::Storage("lock poisoned".to_string()))?;
        values.insert(key.to_string(), value);
        Ok(())
    }
}
