//! Postgres-backed aggregate store.
//!
//! Aggregates are stored as JSONB documents in the `aggregates` table, one
//! row per `(aggregate_type, key)`. The matching `event_applications` row is
//! inserted in the same transaction. Hosts with bespoke per-type tables
//! implement [`AggregateRepository`] themselves.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use chronicle_core::{Aggregate, AggregateKey, EventId, RecordId};

use super::{AggregateRepository, AggregateStoreError, ProjectorWrite, SaveError};
use crate::pg::{self, to_i64, to_u64};

#[derive(Debug)]
pub struct PostgresAggregateStore<A> {
    pool: Arc<PgPool>,
    runtime: Handle,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for PostgresAggregateStore<A> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            runtime: self.runtime.clone(),
            _aggregate: PhantomData,
        }
    }
}

impl<A> PostgresAggregateStore<A>
where
    A: Aggregate + Serialize + DeserializeOwned,
{
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
            _aggregate: PhantomData,
        }
    }

    #[instrument(skip(self), fields(aggregate_type = A::TYPE_NAME), err)]
    pub async fn load(&self, key: &AggregateKey) -> Result<Option<A>, AggregateStoreError> {
        let row = sqlx::query(
            "SELECT record_id, state FROM aggregates WHERE aggregate_type = $1 AND key = $2",
        )
        .bind(A::TYPE_NAME)
        .bind(key.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| AggregateStoreError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record_id: i64 = row
            .try_get("record_id")
            .map_err(|e| AggregateStoreError::Decode(e.to_string()))?;
        let state: serde_json::Value = row
            .try_get("state")
            .map_err(|e| AggregateStoreError::Decode(e.to_string()))?;

        let mut aggregate: A = serde_json::from_value(state)
            .map_err(|e| AggregateStoreError::Decode(e.to_string()))?;
        if let Some(id) = to_u64(record_id) {
            aggregate.state_mut().mark_persisted(RecordId::new(id));
        }
        Ok(Some(aggregate))
    }

    #[instrument(skip(self, aggregate), fields(aggregate_type = A::TYPE_NAME, key = %aggregate.key()), err)]
    pub async fn store(&self, aggregate: &mut A, applied: EventId) -> Result<RecordId, SaveError> {
        aggregate.validate().map_err(SaveError::Rejected)?;

        let state = serde_json::to_value(&*aggregate)
            .map_err(|e| AggregateStoreError::Storage(format!("serialize aggregate: {e}")))?;
        let storage = |e: sqlx::Error| AggregateStoreError::Storage(e.to_string());

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let row = sqlx::query(
            r#"
            INSERT INTO aggregates (aggregate_type, key, state, last_event_id, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (aggregate_type, key)
            DO UPDATE SET state = EXCLUDED.state,
                          last_event_id = EXCLUDED.last_event_id,
                          updated_at = NOW()
            RETURNING record_id
            "#,
        )
        .bind(A::TYPE_NAME)
        .bind(aggregate.key().as_str())
        .bind(&state)
        .bind(to_i64(aggregate.state().last_event_id().get()))
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

        let raw_record_id: i64 = row.try_get("record_id").map_err(storage)?;
        let record_id = to_u64(raw_record_id)
            .map(RecordId::new)
            .ok_or_else(|| AggregateStoreError::Decode(format!("negative record id {raw_record_id}")))?;

        sqlx::query(
            r#"
            INSERT INTO event_applications (event_id, aggregate_type, aggregate_id, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(to_i64(applied.get()))
        .bind(A::TYPE_NAME)
        .bind(raw_record_id)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        aggregate.state_mut().mark_persisted(record_id);
        Ok(record_id)
    }

    pub async fn count_rows(&self) -> Result<usize, AggregateStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM aggregates WHERE aggregate_type = $1")
            .bind(A::TYPE_NAME)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| AggregateStoreError::Storage(e.to_string()))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| AggregateStoreError::Decode(e.to_string()))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

impl<A> AggregateRepository<A> for PostgresAggregateStore<A>
where
    A: Aggregate + Serialize + DeserializeOwned,
{
    fn find_by_key(&self, key: &AggregateKey) -> Result<Option<A>, AggregateStoreError> {
        pg::block_on(&self.runtime, self.load(key))
    }

    fn save(&self, aggregate: &mut A, write: &ProjectorWrite) -> Result<RecordId, SaveError> {
        pg::block_on(&self.runtime, self.store(aggregate, write.event_id()))
    }

    fn count(&self) -> Result<usize, AggregateStoreError> {
        pg::block_on(&self.runtime, self.count_rows())
    }
}
