//! Postgres-backed audit trail (`event_applications`, `event_application_errors`).

use std::sync::Arc;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use chronicle_core::{EventId, RecordId};

use super::{AuditError, AuditSink};
use crate::pg::{self, to_i64, to_u64};

#[derive(Debug, Clone)]
pub struct PostgresAuditTrail {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresAuditTrail {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    #[instrument(skip(self), err)]
    pub async fn insert_applied(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO event_applications (event_id, aggregate_type, aggregate_id, created_at)
            VALUES ($1, $2, $3, NOW())
            "#,
        )
        .bind(to_i64(event_id.get()))
        .bind(aggregate_type)
        .bind(to_i64(record_id.get()))
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    #[instrument(skip(self, error), err)]
    pub async fn insert_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO event_application_errors (event_id, aggregate_type, aggregate_id, error, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(to_i64(event_id.get()))
        .bind(aggregate_type)
        .bind(record_id.map(|id| to_i64(id.get())))
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    pub async fn load_max_applied(&self) -> Result<Option<EventId>, AuditError> {
        let row = sqlx::query("SELECT MAX(event_id) AS max_id FROM event_applications")
            .fetch_one(&*self.pool)
            .await
            .map_err(map_sqlx_error)?;
        let max: Option<i64> = row.try_get("max_id").map_err(map_sqlx_error)?;
        Ok(max.and_then(to_u64).map(EventId::new))
    }

    pub async fn load_applied_events(
        &self,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<Vec<EventId>, AuditError> {
        let rows = sqlx::query(
            r#"
            SELECT event_id FROM event_applications
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY event_id ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(to_i64(record_id.get()))
        .fetch_all(&*self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("event_id").map_err(map_sqlx_error)?;
            if let Some(id) = to_u64(id) {
                ids.push(EventId::new(id));
            }
        }
        Ok(ids)
    }
}

fn map_sqlx_error(err: sqlx::Error) -> AuditError {
    AuditError::Storage(err.to_string())
}

impl AuditSink for PostgresAuditTrail {
    fn record_applied(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<(), AuditError> {
        pg::block_on(&self.runtime, self.insert_applied(event_id, aggregate_type, record_id))
    }

    fn record_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError> {
        pg::block_on(
            &self.runtime,
            self.insert_failed(event_id, aggregate_type, record_id, error),
        )
    }

    fn max_applied_event_id(&self) -> Result<Option<EventId>, AuditError> {
        pg::block_on(&self.runtime, self.load_max_applied())
    }

    fn applied_events(
        &self,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<Vec<EventId>, AuditError> {
        pg::block_on(&self.runtime, self.load_applied_events(aggregate_type, record_id))
    }
}
