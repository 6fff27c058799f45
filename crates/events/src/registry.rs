//! Domain to aggregate-type routing.
//!
//! The registry is built once at start-up and then read by the projector.
//! It also owns the per-type "last processed event id" that every instance
//! of a type shares.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use thiserror::Error;

use chronicle_core::EventId;

/// Static description of an aggregate type as seen by the registry.
pub trait AggregateType: Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Listen domains; the first one is the home domain.
    fn listen_domains(&self) -> &'static [&'static str];
}

impl<T> AggregateType for Arc<T>
where
    T: AggregateType + ?Sized,
{
    fn type_name(&self) -> &'static str {
        (**self).type_name()
    }

    fn listen_domains(&self) -> &'static [&'static str] {
        (**self).listen_domains()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No aggregate type listens to the domain: a configuration error.
    #[error("no handlers registered for domain '{0}'")]
    NoHandlers(String),

    #[error("aggregate type '{0}' is not registered")]
    Unregistered(String),

    #[error("aggregate type '{0}' declares no listen domains")]
    NoDomains(String),
}

/// Domain name to the ordered, de-duplicated list of types listening to it.
pub struct HandlerRegistry<T: ?Sized + AggregateType = dyn AggregateType> {
    domains: BTreeMap<String, Vec<Arc<T>>>,
    types: Vec<Arc<T>>,
    progress: RwLock<HashMap<&'static str, EventId>>,
}

impl<T: ?Sized + AggregateType> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            domains: BTreeMap::new(),
            types: Vec::new(),
            progress: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized + AggregateType> std::fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("domains", &self.summary())
            .finish()
    }
}

impl<T: ?Sized + AggregateType> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `ty` to the list of each of its listen domains.
    ///
    /// Registering the same type name twice is a no-op.
    pub fn register(&mut self, ty: Arc<T>) -> Result<(), RegistryError> {
        let name = ty.type_name();
        if ty.listen_domains().is_empty() {
            return Err(RegistryError::NoDomains(name.to_string()));
        }
        if self.is_registered(name) {
            return Ok(());
        }

        for domain in ty.listen_domains() {
            let listeners = self.domains.entry((*domain).to_string()).or_default();
            if !listeners.iter().any(|t| t.type_name() == name) {
                listeners.push(Arc::clone(&ty));
            }
        }
        tracing::debug!(aggregate_type = name, domains = ?ty.listen_domains(), "registered aggregate type");
        self.types.push(ty);
        Ok(())
    }

    /// Types listening to `domain`, in registration order.
    pub fn handlers_for(&self, domain: &str) -> Result<&[Arc<T>], RegistryError> {
        match self.domains.get(domain) {
            Some(list) if !list.is_empty() => Ok(list.as_slice()),
            _ => Err(RegistryError::NoHandlers(domain.to_string())),
        }
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| t.type_name() == type_name)
    }

    pub fn ensure_registered(&self, type_name: &str) -> Result<(), RegistryError> {
        if self.is_registered(type_name) {
            Ok(())
        } else {
            Err(RegistryError::Unregistered(type_name.to_string()))
        }
    }

    /// Registered types in registration order.
    pub fn types(&self) -> &[Arc<T>] {
        &self.types
    }

    /// Every registered domain name, sorted.
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    /// `domain => [type, ...]` listing.
    pub fn summary(&self) -> BTreeMap<String, Vec<&'static str>> {
        self.domains
            .iter()
            .map(|(domain, list)| (domain.clone(), list.iter().map(|t| t.type_name()).collect()))
            .collect()
    }

    /// Advance the last processed id shared by all instances of a type.
    pub fn record_progress(&self, type_name: &'static str, id: EventId) {
        if let Ok(mut progress) = self.progress.write() {
            let current = progress.entry(type_name).or_default();
            if id > *current {
                *current = id;
            }
        }
    }

    pub fn last_processed(&self, type_name: &str) -> Option<EventId> {
        self.progress
            .read()
            .ok()
            .and_then(|p| p.get(type_name).copied())
    }
}
