//! Events, the checksum chain over the event log, and handler routing.

pub mod checksum;
pub mod event;
pub mod handler;
pub mod registry;
pub mod routing;

pub use checksum::{verify_chain, verify_chain_from, ChainBreak};
pub use event::{DomainEvent, Event, EventError, NewEvent, PendingEvent, DEFAULT_DOMAIN};
pub use handler::{handler_name, EventHandlers, HandlerError, HandlerFn, HandlerTable, HANDLER_PREFIX};
pub use registry::{AggregateType, HandlerRegistry, RegistryError};
pub use routing::KeyRoutes;
