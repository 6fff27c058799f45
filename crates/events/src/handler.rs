//! Per-aggregate-type handler tables.
//!
//! An aggregate type's ability to handle an event type is structural: the
//! handler name is derived from the event's type tag, and a type handles the
//! event iff its table has an entry under that name. Event types without an
//! entry are skipped; this is normal routing, not an error.

use std::collections::BTreeMap;

use thiserror::Error;

use chronicle_core::{Aggregate, DomainError};

use crate::{Event, EventError};

/// Prefix of every event handler name.
pub const HANDLER_PREFIX: &str = "handle";

/// Deterministic handler name for a type tag.
///
/// Namespace separators (`::` and `.`) are normalized to `_`:
/// `handler_name("handle", "Sale.Created") == "handle_Sale_Created"`.
pub fn handler_name(prefix: &str, event_type: &str) -> String {
    let normalized = event_type.replace("::", "_").replace('.', "_");
    format!("{prefix}_{normalized}")
}

/// Failure raised by a handler body.
///
/// These are not business-rule rejections (those are reported by
/// `Aggregate::validate` at save time) but unexpected conditions such as an
/// undecodable payload.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Handler function: mutates the aggregate's business attributes.
pub type HandlerFn<A> = fn(&mut A, &Event) -> Result<(), HandlerError>;

/// Explicit mapping from handler name to handler function for one aggregate type.
#[derive(Debug)]
pub struct HandlerTable<A> {
    handlers: BTreeMap<String, HandlerFn<A>>,
}

impl<A> Default for HandlerTable<A> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<A> Clone for HandlerTable<A> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<A> HandlerTable<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`. A later registration for the
    /// same type tag replaces the earlier one.
    pub fn on(mut self, event_type: &str, handler: HandlerFn<A>) -> Self {
        let name = handler_name(HANDLER_PREFIX, event_type);
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(handler = %name, "handler registered twice; keeping the last one");
        }
        self
    }

    /// Handler for `event_type`, if the type defines one.
    pub fn lookup(&self, event_type: &str) -> Option<HandlerFn<A>> {
        self.handlers
            .get(&handler_name(HANDLER_PREFIX, event_type))
            .copied()
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.lookup(event_type).is_some()
    }

    /// Handler names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Aggregate types that can be driven by the projector.
pub trait EventHandlers: Aggregate {
    fn handlers() -> HandlerTable<Self>;
}
