//! Append-only audit trail of handling attempts.
//!
//! One record is written per (event, aggregate) pair that reaches the save
//! step: "applied" on success, "failed" with the error text otherwise.
//! "Applied" records are appended by the aggregate repository inside the
//! save's commit; "failed" records by the projector. Records are never
//! updated or deleted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use chronicle_core::{EventId, RecordId};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAuditTrail;
pub use postgres::PostgresAuditTrail;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRecord {
    pub event_id: EventId,
    pub aggregate_type: String,
    pub record_id: RecordId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub event_id: EventId,
    pub aggregate_type: String,
    /// `None` when the aggregate was never persisted.
    pub record_id: Option<RecordId>,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit storage error: {0}")]
    Storage(String),
}

pub trait AuditSink: Send + Sync {
    fn record_applied(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<(), AuditError>;

    fn record_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError>;

    /// Highest event id with an "applied" record (cold-start checkpoint).
    fn max_applied_event_id(&self) -> Result<Option<EventId>, AuditError>;

    /// Event ids applied to one stored aggregate, ascending.
    fn applied_events(
        &self,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<Vec<EventId>, AuditError>;
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record_applied(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<(), AuditError> {
        (**self).record_applied(event_id, aggregate_type, record_id)
    }

    fn record_failed(
        &self,
        event_id: EventId,
        aggregate_type: &str,
        record_id: Option<RecordId>,
        error: &str,
    ) -> Result<(), AuditError> {
        (**self).record_failed(event_id, aggregate_type, record_id, error)
    }

    fn max_applied_event_id(&self) -> Result<Option<EventId>, AuditError> {
        (**self).max_applied_event_id()
    }

    fn applied_events(
        &self,
        aggregate_type: &str,
        record_id: RecordId,
    ) -> Result<Vec<EventId>, AuditError> {
        (**self).applied_events(aggregate_type, record_id)
    }
}
