//! Aggregate trait for event-applied domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;
use crate::id::{AggregateKey, EventId, RecordId};

/// Bookkeeping every aggregate carries next to its business attributes.
///
/// Business attributes live on the aggregate type itself and are only
/// mutated by its event handlers; this struct tracks identity, persistence
/// and how far the instance has been brought forward in the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateState {
    key: AggregateKey,
    record_id: Option<RecordId>,
    last_event_id: EventId,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl AggregateState {
    /// State for a new, unpersisted aggregate keyed by `key`.
    pub fn seeded(key: AggregateKey) -> Self {
        Self {
            key,
            record_id: None,
            last_event_id: EventId::ZERO,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn key(&self) -> &AggregateKey {
        &self.key
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn is_persisted(&self) -> bool {
        self.record_id.is_some()
    }

    /// Called by aggregate stores once the instance has a durable row.
    pub fn mark_persisted(&mut self, record_id: RecordId) {
        self.record_id = Some(record_id);
    }

    pub fn last_event_id(&self) -> EventId {
        self.last_event_id
    }

    /// Move the per-instance checkpoint forward.
    ///
    /// Returns `false` (and leaves the checkpoint untouched) when `id` is not
    /// ahead of the current value: the checkpoint never decreases.
    pub fn advance_to(&mut self, id: EventId) -> bool {
        if id > self.last_event_id {
            self.last_event_id = id;
            true
        } else {
            false
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Stamp timestamps from an applied event: `created_at` is set once,
    /// `updated_at` follows the latest event.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if self.created_at.is_none() {
            self.created_at = Some(at);
        }
        self.updated_at = Some(at);
    }
}

/// An aggregate type whose instances are materialized by replaying events.
///
/// Implementations declare a fixed set of event domains they listen to. The
/// first domain is the type's *home* domain: it decides which business key
/// an event resolves to when it is routed to this type.
///
/// Aggregates must not perform IO. Persistence is driven by the projector.
pub trait Aggregate: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable type name (used in registry listings and audit records).
    const TYPE_NAME: &'static str;

    /// Domains this type listens to; the first one is the home domain.
    const LISTEN_DOMAINS: &'static [&'static str];

    /// A fresh, unpersisted instance keyed by `key`.
    fn seeded(key: AggregateKey) -> Self;

    fn state(&self) -> &AggregateState;

    fn state_mut(&mut self) -> &mut AggregateState;

    /// Business rules checked by the aggregate store before saving.
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }

    fn home_domain() -> Option<&'static str> {
        Self::LISTEN_DOMAINS.first().copied()
    }

    fn listens_to(domain: &str) -> bool {
        Self::LISTEN_DOMAINS.contains(&domain)
    }

    fn key(&self) -> &AggregateKey {
        self.state().key()
    }
}
