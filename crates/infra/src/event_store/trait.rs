use std::sync::Arc;

use thiserror::Error;

use chronicle_core::{AggregateKey, EventId};
use chronicle_events::{Event, PendingEvent};

/// Event store operation error.
///
/// These are infrastructure errors (storage, integrity of the log) as opposed
/// to domain errors raised by aggregates.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event #{0} not found")]
    NotFound(EventId),

    /// Checksums are a one-time backfill and are never overwritten.
    #[error("checksum of event #{0} is already set")]
    ChecksumAlreadySet(EventId),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Ordered, append-only log of events.
///
/// Ids are assigned by the store on insert and are strictly increasing. Apart
/// from the checksum backfill, stored events are never modified or deleted.
pub trait EventStore: Send + Sync {
    /// Append `event` and return it with its assigned id.
    fn insert(&self, event: PendingEvent) -> Result<Event, EventStoreError>;

    /// Persist the checksum of a stored event. Fails if one is already set.
    fn set_checksum(&self, id: EventId, checksum: &str) -> Result<(), EventStoreError>;

    fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError>;

    /// Event with the next-lower id than `id` (its predecessor in the chain).
    fn previous(&self, id: EventId) -> Result<Option<Event>, EventStoreError>;

    /// Whether any event carries `key` as its uuid.
    fn key_exists(&self, key: &AggregateKey) -> Result<bool, EventStoreError>;

    /// Up to `limit` events with id greater than `after`, ascending.
    ///
    /// `domains` restricts the page to the listed domains; `None` means all.
    fn fetch_after(
        &self,
        after: EventId,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError>;

    fn max_id(&self) -> Result<Option<EventId>, EventStoreError>;

    /// The `n` newest events, newest first.
    fn recent(&self, n: usize) -> Result<Vec<Event>, EventStoreError>;

    /// Events directly carrying `key` as their uuid, ascending.
    fn events_for_key(&self, key: &AggregateKey) -> Result<Vec<Event>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn insert(&self, event: PendingEvent) -> Result<Event, EventStoreError> {
        (**self).insert(event)
    }

    fn set_checksum(&self, id: EventId, checksum: &str) -> Result<(), EventStoreError> {
        (**self).set_checksum(id, checksum)
    }

    fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        (**self).get(id)
    }

    fn previous(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        (**self).previous(id)
    }

    fn key_exists(&self, key: &AggregateKey) -> Result<bool, EventStoreError> {
        (**self).key_exists(key)
    }

    fn fetch_after(
        &self,
        after: EventId,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        (**self).fetch_after(after, domains, limit)
    }

    fn max_id(&self) -> Result<Option<EventId>, EventStoreError> {
        (**self).max_id()
    }

    fn recent(&self, n: usize) -> Result<Vec<Event>, EventStoreError> {
        (**self).recent(n)
    }

    fn events_for_key(&self, key: &AggregateKey) -> Result<Vec<Event>, EventStoreError> {
        (**self).events_for_key(key)
    }
}
