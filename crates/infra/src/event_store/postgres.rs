//! Postgres-backed event log.
//!
//! Schema: `migrations/0001_event_log.sql` (`events` table, `BIGSERIAL` id).
//!
//! ## Error Mapping
//!
//! | SQLx Error | EventStoreError |
//! |------------|-----------------|
//! | Database (any code) | `Storage` with the database message |
//! | PoolClosed | `Storage` |
//! | Row decode | `Storage` |
//!
//! ## Runtime
//!
//! The async methods can be awaited directly. The synchronous [`EventStore`]
//! impl drives them on the runtime handle passed at construction, which must
//! belong to a multi-threaded runtime when called from inside it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;

use chronicle_core::{AggregateKey, EventId};
use chronicle_events::{Event, PendingEvent};

use super::r#trait::{EventStore, EventStoreError};
use crate::pg::{self, to_i64, to_u64};

const COLUMNS: &str = "id, domain, event_type, uuid, payload, checksum, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    #[instrument(skip(self, event), fields(domain = %event.domain, event_type = %event.event_type), err)]
    pub async fn insert_event(&self, event: PendingEvent) -> Result<Event, EventStoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO events (domain, event_type, uuid, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id
            "#,
        )
        .bind(&event.domain)
        .bind(&event.event_type)
        .bind(event.uuid.as_str())
        .bind(&event.payload)
        .bind(event.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert", e))?;
        let id = to_u64(id)
            .map(EventId::new)
            .ok_or_else(|| EventStoreError::Storage(format!("negative event id {id}")))?;
        Ok(event.into_event(id))
    }

    #[instrument(skip(self, checksum), err)]
    pub async fn write_checksum(&self, id: EventId, checksum: &str) -> Result<(), EventStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE events
            SET checksum = $2, updated_at = NOW()
            WHERE id = $1 AND (checksum IS NULL OR checksum = '')
            "#,
        )
        .bind(to_i64(id.get()))
        .bind(checksum)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("set_checksum", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.load(id).await? {
            Some(_) => Err(EventStoreError::ChecksumAlreadySet(id)),
            None => Err(EventStoreError::NotFound(id)),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn load(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(to_i64(id.get()))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(event_from_row).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn load_previous(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE id < $1 ORDER BY id DESC LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(to_i64(id.get()))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("previous", e))?;
        row.as_ref().map(event_from_row).transpose()
    }

    pub async fn has_key(&self, key: &AggregateKey) -> Result<bool, EventStoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM events WHERE uuid = $1) AS taken")
            .bind(key.as_str())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("key_exists", e))?;
        row.try_get("taken")
            .map_err(|e| map_sqlx_error("key_exists", e))
    }

    #[instrument(skip(self, domains), err)]
    pub async fn load_after(
        &self,
        after: EventId,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match domains {
            Some(domains) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM events WHERE id > $1 AND domain = ANY($2) ORDER BY id ASC LIMIT $3"
                );
                sqlx::query(&sql)
                    .bind(to_i64(after.get()))
                    .bind(domains)
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
            None => {
                let sql = format!("SELECT {COLUMNS} FROM events WHERE id > $1 ORDER BY id ASC LIMIT $2");
                sqlx::query(&sql)
                    .bind(to_i64(after.get()))
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("fetch_after", e))?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn load_max_id(&self) -> Result<Option<EventId>, EventStoreError> {
        let row = sqlx::query("SELECT MAX(id) AS max_id FROM events")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("max_id", e))?;
        let max: Option<i64> = row
            .try_get("max_id")
            .map_err(|e| map_sqlx_error("max_id", e))?;
        Ok(max.and_then(to_u64).map(EventId::new))
    }

    pub async fn load_recent(&self, n: usize) -> Result<Vec<Event>, EventStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM events ORDER BY id DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(n).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("recent", e))?;
        rows.iter().map(event_from_row).collect()
    }

    pub async fn load_for_key(&self, key: &AggregateKey) -> Result<Vec<Event>, EventStoreError> {
        let sql = format!("SELECT {COLUMNS} FROM events WHERE uuid = $1 ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(key.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("events_for_key", e))?;
        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &PgRow) -> Result<Event, EventStoreError> {
    let decode = |e: sqlx::Error| EventStoreError::Storage(format!("failed to decode event row: {e}"));

    let id: i64 = row.try_get("id").map_err(decode)?;
    let uuid: String = row.try_get("uuid").map_err(decode)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(decode)?;

    Ok(Event {
        id: EventId::new(
            to_u64(id).ok_or_else(|| EventStoreError::Storage(format!("negative event id {id}")))?,
        ),
        domain: row.try_get("domain").map_err(decode)?,
        event_type: row.try_get("event_type").map_err(decode)?,
        uuid: AggregateKey::new(uuid).map_err(|e| EventStoreError::Storage(e.to_string()))?,
        payload: row.try_get("payload").map_err(decode)?,
        checksum: row.try_get("checksum").map_err(decode)?,
        created_at,
        updated_at,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => EventStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            EventStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => EventStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

impl EventStore for PostgresEventStore {
    fn insert(&self, event: PendingEvent) -> Result<Event, EventStoreError> {
        pg::block_on(&self.runtime, self.insert_event(event))
    }

    fn set_checksum(&self, id: EventId, checksum: &str) -> Result<(), EventStoreError> {
        pg::block_on(&self.runtime, self.write_checksum(id, checksum))
    }

    fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        pg::block_on(&self.runtime, self.load(id))
    }

    fn previous(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        pg::block_on(&self.runtime, self.load_previous(id))
    }

    fn key_exists(&self, key: &AggregateKey) -> Result<bool, EventStoreError> {
        pg::block_on(&self.runtime, self.has_key(key))
    }

    fn fetch_after(
        &self,
        after: EventId,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        pg::block_on(&self.runtime, self.load_after(after, domains, limit))
    }

    fn max_id(&self) -> Result<Option<EventId>, EventStoreError> {
        pg::block_on(&self.runtime, self.load_max_id())
    }

    fn recent(&self, n: usize) -> Result<Vec<Event>, EventStoreError> {
        pg::block_on(&self.runtime, self.load_recent(n))
    }

    fn events_for_key(&self, key: &AggregateKey) -> Result<Vec<Event>, EventStoreError> {
        pg::block_on(&self.runtime, self.load_for_key(key))
    }
}
