//! Keyed persistence for aggregates.
//!
//! Only the projector saves aggregates: [`AggregateRepository::save`] takes a
//! [`ProjectorWrite`] token, which cannot be built outside this crate.
//!
//! ```compile_fail
//! let token = chronicle_infra::aggregate_store::ProjectorWrite {
//!     event_id: chronicle_core::EventId::new(1),
//! };
//! ```
//!
//! The token names the event being applied. A repository commits the
//! aggregate and the "applied" audit record for that event together, so a
//! stored aggregate whose checkpoint covers an event always has its audit
//! row.

use std::sync::Arc;

use thiserror::Error;

use chronicle_core::{Aggregate, AggregateKey, EventId, RecordId, ValidationErrors};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryAggregateStore;
pub use postgres::PostgresAggregateStore;

/// Capability to save aggregates, minted by the projector for one event.
#[derive(Debug)]
pub struct ProjectorWrite {
    event_id: EventId,
}

impl ProjectorWrite {
    pub(crate) fn new(event_id: EventId) -> Self {
        Self { event_id }
    }

    /// The event whose application this save records.
    pub fn event_id(&self) -> EventId {
        self.event_id
    }
}

#[derive(Debug, Error)]
pub enum AggregateStoreError {
    #[error("aggregate storage error: {0}")]
    Storage(String),

    #[error("stored aggregate could not be decoded: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum SaveError {
    /// Business-rule rejection; carries every failing field.
    #[error("validation failed: {0}")]
    Rejected(ValidationErrors),

    #[error(transparent)]
    Store(#[from] AggregateStoreError),
}

impl SaveError {
    /// Text written to the audit trail for a failed save.
    pub fn audit_text(&self) -> String {
        match self {
            SaveError::Rejected(errors) => errors.to_json(),
            SaveError::Store(e) => e.to_string(),
        }
    }
}

/// Transactional keyed store for one aggregate type.
pub trait AggregateRepository<A: Aggregate>: Send + Sync {
    fn find_by_key(&self, key: &AggregateKey) -> Result<Option<A>, AggregateStoreError>;

    /// Validate and persist `aggregate`, together with an "applied" audit
    /// record for `write.event_id()`, in one commit.
    ///
    /// On success the aggregate is marked persisted with its record id. On
    /// any error neither the aggregate nor the audit record is stored.
    fn save(&self, aggregate: &mut A, write: &ProjectorWrite) -> Result<RecordId, SaveError>;

    fn count(&self) -> Result<usize, AggregateStoreError>;
}

impl<A, S> AggregateRepository<A> for Arc<S>
where
    A: Aggregate,
    S: AggregateRepository<A> + ?Sized,
{
    fn find_by_key(&self, key: &AggregateKey) -> Result<Option<A>, AggregateStoreError> {
        (**self).find_by_key(key)
    }

    fn save(&self, aggregate: &mut A, write: &ProjectorWrite) -> Result<RecordId, SaveError> {
        (**self).save(aggregate, write)
    }

    fn count(&self) -> Result<usize, AggregateStoreError> {
        (**self).count()
    }
}
