use std::sync::RwLock;

use chrono::Utc;

use chronicle_core::{AggregateKey, EventId};
use chronicle_events::{Event, PendingEvent};

use super::r#trait::{EventStore, EventStoreError};

/// In-memory append-only event log.
///
/// Intended for tests/dev. Events are kept in id order, so range reads are a
/// binary search away.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::Storage("lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: PendingEvent) -> Result<Event, EventStoreError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        let next = events.last().map(|e| e.id.get()).unwrap_or(0) + 1;
        let stored = event.into_event(EventId::new(next));
        events.push(stored.clone());
        Ok(stored)
    }

    fn set_checksum(&self, id: EventId, checksum: &str) -> Result<(), EventStoreError> {
        let mut events = self.events.write().map_err(|_| Self::poisoned())?;
        let idx = events
            .binary_search_by_key(&id, |e| e.id)
            .map_err(|_| EventStoreError::NotFound(id))?;
        let event = &mut events[idx];
        if event.checksum.as_deref().is_some_and(|c| !c.is_empty()) {
            return Err(EventStoreError::ChecksumAlreadySet(id));
        }
        event.checksum = Some(checksum.to_string());
        event.updated_at = Utc::now();
        Ok(())
    }

    fn get(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|idx| events[idx].clone()))
    }

    fn previous(&self, id: EventId) -> Result<Option<Event>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        let idx = events.partition_point(|e| e.id < id);
        Ok(idx.checked_sub(1).map(|i| events[i].clone()))
    }

    fn key_exists(&self, key: &AggregateKey) -> Result<bool, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events.iter().any(|e| &e.uuid == key))
    }

    fn fetch_after(
        &self,
        after: EventId,
        domains: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        let start = events.partition_point(|e| e.id <= after);
        Ok(events[start..]
            .iter()
            .filter(|e| domains.is_none_or(|allowed| allowed.iter().any(|d| d == &e.domain)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn max_id(&self) -> Result<Option<EventId>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events.last().map(|e| e.id))
    }

    fn recent(&self, n: usize) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events.iter().rev().take(n).cloned().collect())
    }

    fn events_for_key(&self, key: &AggregateKey) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.read().map_err(|_| Self::poisoned())?;
        Ok(events.iter().filter(|e| &e.uuid == key).cloned().collect())
    }
}
