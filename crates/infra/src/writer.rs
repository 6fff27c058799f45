//! Event write path: defaults, unique keys and checksum chaining.

use std::sync::Mutex;

use chrono::{SubsecRound, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use chronicle_core::AggregateKey;
use chronicle_events::{checksum, DomainEvent, Event, EventError, NewEvent, PendingEvent, DEFAULT_DOMAIN};

use crate::config::WriterConfig;
use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("event type must not be empty")]
    MissingType,

    #[error("no unused key found after {attempts} attempts")]
    KeyExhausted { attempts: usize },

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

type KeyGenerator = Box<dyn Fn() -> AggregateKey + Send + Sync>;

/// Appends events to the log and extends the checksum chain.
///
/// Writes through one writer are serialized, so each checksum is computed
/// against a predecessor whose checksum is already final. Several writers on
/// one log must be serialized by the store.
pub struct EventWriter<S> {
    store: S,
    config: WriterConfig,
    generate_key: KeyGenerator,
    serial: Mutex<()>,
}

impl<S: EventStore> EventWriter<S> {
    pub fn new(store: S, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            generate_key: Box::new(AggregateKey::generate),
            serial: Mutex::new(()),
        }
    }

    /// Replace the key generator used for events written without a uuid.
    pub fn with_key_generator(mut self, generate: impl Fn() -> AggregateKey + Send + Sync + 'static) -> Self {
        self.generate_key = Box::new(generate);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write a typed event, keyed by `uuid` or a generated key.
    pub fn write_typed<E: DomainEvent>(&self, event: &E, uuid: Option<AggregateKey>) -> Result<Event, WriteError> {
        let mut new = NewEvent::typed(event)?;
        new.uuid = uuid;
        self.write(new)
    }

    /// Insert `new` and persist its checksum.
    pub fn write(&self, new: NewEvent) -> Result<Event, WriteError> {
        if new.event_type.trim().is_empty() {
            return Err(WriteError::MissingType);
        }
        let _serial = self
            .serial
            .lock()
            .map_err(|_| EventStoreError::Storage("writer lock poisoned".to_string()))?;

        let domain = new
            .domain
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let uuid = match new.uuid {
            Some(uuid) => uuid,
            None => self.unique_key()?,
        };

        let mut event = self.store.insert(PendingEvent {
            domain,
            event_type: new.event_type,
            uuid,
            payload: new.payload,
            created_at: Utc::now().trunc_subsecs(6),
        })?;

        let previous = self.store.previous(event.id)?;
        let previous_checksum = match &previous {
            Some(p) if p.checksum.is_none() => {
                warn!(event_id = %event.id, previous = %p.id, "predecessor has no checksum; chaining to empty");
                None
            }
            Some(p) => p.checksum.as_deref(),
            None => None,
        };
        let sum = checksum::compute(&event, previous_checksum);
        self.store.set_checksum(event.id, &sum)?;
        event.checksum = Some(sum);

        debug!(
            event_id = %event.id,
            domain = %event.domain,
            event_type = %event.event_type,
            uuid = %event.uuid,
            "event written"
        );
        Ok(event)
    }

    fn unique_key(&self) -> Result<AggregateKey, WriteError> {
        for _ in 0..self.config.max_key_attempts {
            let key = (self.generate_key)();
            if !self.store.key_exists(&key)? {
                return Ok(key);
            }
            debug!(key = %key, "generated key already in use; retrying");
        }
        Err(WriteError::KeyExhausted {
            attempts: self.config.max_key_attempts,
        })
    }
}
