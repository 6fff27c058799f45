use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use chronicle_core::{AggregateKey, EventId};

/// Domain used for events written without one and without a declaring type.
pub const DEFAULT_DOMAIN: &str = "unknown";

/// A typed event payload.
///
/// The type tag identifies the payload shape and drives handler naming
/// (`"Sale.Created"` is handled by `handle_Sale_Created`). The declared
/// domain is used when an event is written without an explicit domain.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;
    const DOMAIN: &'static str;

    /// Business key of the aggregate this event updates in `domain`.
    ///
    /// `None` means "use the event's own uuid". Override when an event in one
    /// domain updates aggregates keyed by a different field, e.g. a payment
    /// in `tx` updating the sale it settles.
    fn aggregate_key(&self, _domain: &str) -> Option<AggregateKey> {
        None
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("payload of {event_type} #{event_id} could not be decoded: {message}")]
    Payload {
        event_id: EventId,
        event_type: String,
        message: String,
    },

    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

/// A committed event in the global log.
///
/// Immutable once stored, apart from the one-time checksum backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub domain: String,
    pub event_type: String,
    pub uuid: AggregateKey,
    pub payload: JsonValue,
    pub checksum: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Decode the payload into its typed shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| EventError::Payload {
            event_id: self.id,
            event_type: self.event_type.clone(),
            message: e.to_string(),
        })
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.event_type == E::EVENT_TYPE
    }
}

/// Input of the event write API.
///
/// `domain` and `uuid` are optional: the writer fills in the declared domain
/// (or [`DEFAULT_DOMAIN`]) and generates a unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub domain: Option<String>,
    pub event_type: String,
    pub uuid: Option<AggregateKey>,
    pub payload: JsonValue,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            domain: None,
            event_type: event_type.into(),
            uuid: None,
            payload,
        }
    }

    /// Build from a typed payload, taking type tag and domain from the type.
    pub fn typed<E: DomainEvent>(event: &E) -> Result<Self, EventError> {
        let payload =
            serde_json::to_value(event).map_err(|e| EventError::Serialize(e.to_string()))?;
        Ok(Self {
            domain: Some(E::DOMAIN.to_string()),
            event_type: E::EVENT_TYPE.to_string(),
            uuid: None,
            payload,
        })
    }

    pub fn with_uuid(mut self, uuid: AggregateKey) -> Self {
        self.uuid = Some(uuid);
        self
    }

    pub fn in_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// An event ready for insertion: defaults resolved, no id or checksum yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub domain: String,
    pub event_type: String,
    pub uuid: AggregateKey,
    pub payload: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl PendingEvent {
    /// The committed form, once the store has assigned `id`.
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            domain: self.domain,
            event_type: self.event_type,
            uuid: self.uuid,
            payload: self.payload,
            checksum: None,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Opened {
        owner: String,
    }

    impl DomainEvent for Opened {
        const EVENT_TYPE: &'static str = "Account.Opened";
        const DOMAIN: &'static str = "accounts";
    }

    #[test]
    fn typed_event_carries_declared_domain_and_type() {
        let new = NewEvent::typed(&Opened {
            owner: "ada".into(),
        })
        .unwrap();
        assert_eq!(new.domain.as_deref(), Some("accounts"));
        assert_eq!(new.event_type, "Account.Opened");
        assert_eq!(new.payload, json!({"owner": "ada"}));
        assert!(new.uuid.is_none());
    }

    #[test]
    fn payload_decode_errors_name_the_event() {
        let pending = PendingEvent {
            domain: "accounts".into(),
            event_type: "Account.Opened".into(),
            uuid: AggregateKey::new("a-1").unwrap(),
            payload: json!({"owner": 42}),
            created_at: Utc::now(),
        };
        let event = pending.into_event(EventId::new(3));

        let err = event.payload_as::<Opened>().unwrap_err();
        assert!(err.to_string().contains("Account.Opened #3"));
        assert!(event.is::<Opened>());
        assert_eq!(event.checksum, None);
    }
}
