//! Event to business-key routing.
//!
//! By default an event updates the aggregate keyed by its own `uuid`. Typed
//! events can override [`DomainEvent::aggregate_key`] to map themselves onto
//! aggregates keyed by a different field; registering the type here makes the
//! override visible to the resolver, which only sees stored JSON events.

use std::collections::HashMap;

use chronicle_core::AggregateKey;

use crate::{DomainEvent, Event, EventError};

type RouteFn = Box<dyn Fn(&Event, &str) -> Result<Option<AggregateKey>, EventError> + Send + Sync>;

#[derive(Default)]
pub struct KeyRoutes {
    routes: HashMap<&'static str, RouteFn>,
}

impl std::fmt::Debug for KeyRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.routes.keys().collect();
        types.sort();
        f.debug_struct("KeyRoutes").field("types", &types).finish()
    }
}

impl KeyRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route events tagged `E::EVENT_TYPE` through `E::aggregate_key`.
    pub fn register<E: DomainEvent>(mut self) -> Self {
        self.routes.insert(
            E::EVENT_TYPE,
            Box::new(|event, domain| {
                let typed: E = event.payload_as()?;
                Ok(typed.aggregate_key(domain))
            }),
        );
        self
    }

    /// Take over every route of `other`; routes of `other` win on conflict.
    pub fn merge(mut self, other: KeyRoutes) -> Self {
        self.routes.extend(other.routes);
        self
    }

    pub fn has_route(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Business key `event` maps to when viewed from `domain`.
    pub fn key_for(&self, event: &Event, domain: &str) -> Result<AggregateKey, EventError> {
        let routed = match self.routes.get(event.event_type.as_str()) {
            Some(route) => route(event, domain)?,
            None => None,
        };
        Ok(routed.unwrap_or_else(|| event.uuid.clone()))
    }
}
