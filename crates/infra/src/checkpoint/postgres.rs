//! Postgres-backed checkpoint store (`checkpoints` table).

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use super::{CheckpointError, CheckpointStore};
use crate::pg;

#[derive(Debug, Clone)]
pub struct PostgresCheckpointStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    #[instrument(skip(self), err)]
    pub async fn read(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        let row = sqlx::query("SELECT value FROM checkpoints WHERE key = $1")
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.map(|r| r.try_get::<i64, _>("value"))
            .transpose()
            .map_err(map_sqlx_error)
    }

    #[instrument(skip(self), err)]
    pub async fn write(&self, key: &str, value: i64) -> Result<(), CheckpointError> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

fn map_sqlx_error(err: sqlx::Error) -> CheckpointError {
    CheckpointError::Storage(err.to_string())
}

impl CheckpointStore for PostgresCheckpointStore {
    fn get(&self, key: &str) -> Result<Option<i64>, CheckpointError> {
        pg::block_on(&self.runtime, self.read(key))
    }

    fn set(&self, key: &str, value: i64) -> Result<(), CheckpointError> {
        pg::block_on(&self.runtime, self.write(key, value))
    }
}
