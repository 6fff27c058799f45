//! Load-or-create of aggregate instances.

use thiserror::Error;

use chronicle_core::{Aggregate, AggregateKey};
use chronicle_events::{AggregateType, Event, EventError, HandlerRegistry, KeyRoutes, RegistryError};

use crate::aggregate_store::{AggregateRepository, AggregateStoreError};

/// Where the business key of the aggregate to resolve comes from.
#[derive(Debug, Clone, Copy)]
pub enum KeySource<'a> {
    Key(&'a AggregateKey),
    /// Ask the event for the key it maps to in the type's home domain.
    Event(&'a Event),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Store(#[from] AggregateStoreError),
}

#[derive(Debug)]
pub struct AggregateResolver<'r, T: ?Sized + AggregateType> {
    registry: &'r HandlerRegistry<T>,
    routes: &'r KeyRoutes,
}

impl<'r, T: ?Sized + AggregateType> AggregateResolver<'r, T> {
    pub fn new(registry: &'r HandlerRegistry<T>, routes: &'r KeyRoutes) -> Self {
        Self { registry, routes }
    }

    /// Business key of the `A` instance `source` refers to.
    pub fn key_for<A: Aggregate>(&self, source: KeySource<'_>) -> Result<AggregateKey, ResolveError> {
        match source {
            KeySource::Key(key) => Ok(key.clone()),
            KeySource::Event(event) => match A::home_domain() {
                Some(home) => Ok(self.routes.key_for(event, home)?),
                None => Ok(event.uuid.clone()),
            },
        }
    }

    /// The stored `A` for `source`; when absent, a fresh unpersisted instance
    /// if `allow_create`, else `None`.
    ///
    /// Fails with [`RegistryError::Unregistered`] before touching the
    /// repository if `A` was never registered.
    pub fn resolve<A, R>(
        &self,
        source: KeySource<'_>,
        repository: &R,
        allow_create: bool,
    ) -> Result<Option<A>, ResolveError>
    where
        A: Aggregate,
        R: AggregateRepository<A> + ?Sized,
    {
        self.registry.ensure_registered(A::TYPE_NAME)?;
        let key = self.key_for::<A>(source)?;

        match repository.find_by_key(&key)? {
            Some(found) => Ok(Some(found)),
            None if allow_create => {
                tracing::debug!(aggregate_type = A::TYPE_NAME, key = %key, "seeding new aggregate");
                Ok(Some(A::seeded(key)))
            }
            None => Ok(None),
        }
    }

    /// [`AggregateResolver::resolve`] with creation allowed.
    pub fn resolve_or_create<A, R>(&self, source: KeySource<'_>, repository: &R) -> Result<A, ResolveError>
    where
        A: Aggregate,
        R: AggregateRepository<A> + ?Sized,
    {
        match self.resolve(source, repository, true)? {
            Some(aggregate) => Ok(aggregate),
            None => Ok(A::seeded(self.key_for::<A>(source)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use chronicle_core::{AggregateState, EventId};
    use chronicle_events::{DomainEvent, PendingEvent};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use crate::aggregate_store::{InMemoryAggregateStore, ProjectorWrite};

    #[derive(Debug, Clone)]
    struct Ledger {
        state: AggregateState,
    }

    impl Aggregate for Ledger {
        const TYPE_NAME: &'static str = "Ledger";
        const LISTEN_DOMAINS: &'static [&'static str] = &["ledger", "tx"];

        fn seeded(key: AggregateKey) -> Self {
            Self {
                state: AggregateState::seeded(key),
            }
        }

        fn state(&self) -> &AggregateState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut AggregateState {
            &mut self.state
        }
    }

    struct LedgerType;

    impl AggregateType for LedgerType {
        fn type_name(&self) -> &'static str {
            Ledger::TYPE_NAME
        }

        fn listen_domains(&self) -> &'static [&'static str] {
            Ledger::LISTEN_DOMAINS
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Posted {
        ledger: String,
    }

    impl DomainEvent for Posted {
        const EVENT_TYPE: &'static str = "Tx.Posted";
        const DOMAIN: &'static str = "tx";

        fn aggregate_key(&self, domain: &str) -> Option<AggregateKey> {
            (domain == "ledger")
                .then(|| AggregateKey::new(self.ledger.clone()).ok())
                .flatten()
        }
    }

    fn registry() -> HandlerRegistry<LedgerType> {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(LedgerType)).unwrap();
        registry
    }

    fn posted(ledger: &str) -> Event {
        PendingEvent {
            domain: "tx".into(),
            event_type: "Tx.Posted".into(),
            uuid: AggregateKey::new("tx-1").unwrap(),
            payload: json!({ "ledger": ledger }),
            created_at: Utc::now(),
        }
        .into_event(EventId::new(1))
    }

    #[test]
    fn events_resolve_through_their_home_domain_route() {
        let registry = registry();
        let routes = KeyRoutes::new().register::<Posted>();
        let resolver = AggregateResolver::new(&registry, &routes);

        let key = resolver.key_for::<Ledger>(KeySource::Event(&posted("L-7"))).unwrap();
        assert_eq!(key.as_str(), "L-7");
    }

    #[test]
    fn missing_aggregates_are_seeded_only_when_allowed() {
        let registry = registry();
        let routes = KeyRoutes::new();
        let resolver = AggregateResolver::new(&registry, &routes);
        let repo = InMemoryAggregateStore::<Ledger>::new();
        let key = AggregateKey::new("L-1").unwrap();

        let none = resolver.resolve::<Ledger, _>(KeySource::Key(&key), &repo, false).unwrap();
        assert!(none.is_none());

        let seeded = resolver
            .resolve::<Ledger, _>(KeySource::Key(&key), &repo, true)
            .unwrap()
            .unwrap();
        assert_eq!(seeded.key(), &key);
        assert!(!seeded.state().is_persisted());
    }

    #[test]
    fn stored_aggregates_are_loaded() {
        let registry = registry();
        let routes = KeyRoutes::new();
        let resolver = AggregateResolver::new(&registry, &routes);
        let repo = InMemoryAggregateStore::<Ledger>::new();
        let key = AggregateKey::new("L-1").unwrap();

        let mut ledger = Ledger::seeded(key.clone());
        ledger.state_mut().advance_to(EventId::new(4));
        repo.save(&mut ledger, &ProjectorWrite::new(EventId::new(4))).unwrap();

        let loaded = resolver.resolve_or_create::<Ledger, _>(KeySource::Key(&key), &repo).unwrap();
        assert!(loaded.state().is_persisted());
        assert_eq!(loaded.state().last_event_id(), EventId::new(4));
    }

    #[test]
    fn unregistered_types_are_rejected() {
        let registry = HandlerRegistry::<LedgerType>::new();
        let routes = KeyRoutes::new();
        let resolver = AggregateResolver::new(&registry, &routes);
        let repo = InMemoryAggregateStore::<Ledger>::new();
        let key = AggregateKey::new("L-1").unwrap();

        let err = resolver
            .resolve::<Ledger, _>(KeySource::Key(&key), &repo, true)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Registry(RegistryError::Unregistered(_))));

        let err = resolver
            .resolve_or_create::<Ledger, _>(KeySource::Key(&key), &repo)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Registry(RegistryError::Unregistered(_))));
    }

    #[test]
    fn resolve_or_create_seeds_from_the_routed_key() {
        let registry = registry();
        let routes = KeyRoutes::new().register::<Posted>();
        let resolver = AggregateResolver::new(&registry, &routes);
        let repo = InMemoryAggregateStore::<Ledger>::new();

        let ledger = resolver
            .resolve_or_create::<Ledger, _>(KeySource::Event(&posted("L-9")), &repo)
            .unwrap();
        assert_eq!(ledger.key().as_str(), "L-9");
        assert!(!ledger.state().is_persisted());
    }
}
