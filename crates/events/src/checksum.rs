//! Hash chain over the global event log.
//!
//! Every event's checksum covers its own canonical form plus the checksum of
//! the event with the next-lower id, so any retroactive edit, insertion or
//! reordering breaks every later link:
//!
//! ```text
//! checksum(e1) = sha256(canonical(e1) ++ "")
//! checksum(ek) = sha256(canonical(ek) ++ checksum(e(k-1)))
//! ```
//!
//! The chain is extended at write time; [`verify_chain`] recomputes it for
//! auditing tools layered above the log.

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

use chronicle_core::EventId;

use crate::Event;

/// Fields covered by the checksum, in hashing order. `id`, `checksum` and
/// `updated_at` are excluded.
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    created_at: String,
    domain: &'a str,
    event_type: &'a str,
    payload: JsonValue,
    uuid: &'a str,
}

/// Canonical text of an event.
///
/// Compact JSON, fixed field order, payload object keys sorted recursively,
/// `created_at` in RFC 3339 with microsecond precision.
pub fn canonical(event: &Event) -> String {
    let canonical = CanonicalEvent {
        created_at: event
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        domain: &event.domain,
        event_type: &event.event_type,
        payload: sorted(&event.payload),
        uuid: event.uuid.as_str(),
    };
    // A struct of strings and JSON values always serializes.
    serde_json::to_string(&canonical).unwrap_or_default()
}

/// Checksum of `event` linked to its predecessor's checksum (`None` for the
/// first event in the log).
pub fn compute(event: &Event, previous: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(event).as_bytes());
    hasher.update(previous.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// First link that does not match its recomputed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainBreak {
    #[error("event #{event_id} has no checksum")]
    Missing { event_id: EventId },

    #[error("event #{event_id} checksum mismatch (expected {expected}, found {found})")]
    Mismatch {
        event_id: EventId,
        expected: String,
        found: String,
    },

    #[error("event #{event_id} is out of order (previous #{previous})")]
    OutOfOrder { event_id: EventId, previous: EventId },
}

impl ChainBreak {
    pub fn event_id(&self) -> EventId {
        match self {
            ChainBreak::Missing { event_id }
            | ChainBreak::Mismatch { event_id, .. }
            | ChainBreak::OutOfOrder { event_id, .. } => *event_id,
        }
    }
}

/// Verify a contiguous run of the log starting at the genesis event.
///
/// Returns the number of verified events.
pub fn verify_chain<'a>(events: impl IntoIterator<Item = &'a Event>) -> Result<usize, ChainBreak> {
    verify_chain_from(None, events)
}

/// Verify a contiguous run of the log whose predecessor carries `previous`.
///
/// Used to verify the log page by page.
pub fn verify_chain_from<'a>(
    previous: Option<&str>,
    events: impl IntoIterator<Item = &'a Event>,
) -> Result<usize, ChainBreak> {
    let mut previous = previous.map(str::to_string);
    let mut last_id: Option<EventId> = None;
    let mut verified = 0;

    for event in events {
        if let Some(last) = last_id {
            if event.id <= last {
                return Err(ChainBreak::OutOfOrder {
                    event_id: event.id,
                    previous: last,
                });
            }
        }

        let found = event
            .checksum
            .as_deref()
            .ok_or(ChainBreak::Missing { event_id: event.id })?;
        let expected = compute(event, previous.as_deref());
        if expected != found {
            return Err(ChainBreak::Mismatch {
                event_id: event.id,
                expected,
                found: found.to_string(),
            });
        }

        previous = Some(expected);
        last_id = Some(event.id);
        verified += 1;
    }

    Ok(verified)
}

fn sorted(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for k in keys {
                out.insert(k.clone(), sorted(&map[k]));
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
