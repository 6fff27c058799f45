//! Infrastructure layer: stores, the apply loop and the write path.
//!
//! Every store is a synchronous trait with an in-memory adapter for tests
//! and a Postgres adapter (sqlx) for deployments. The checkpoint store also
//! has a Redis adapter behind the `redis` feature.

pub mod aggregate_store;
pub mod audit;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod event_store;
pub mod lock;
pub mod projector;
pub mod resolver;
pub mod writer;

mod pg;

#[cfg(test)]
mod integration_tests;

pub use config::{HandlerFailurePolicy, ProjectorConfig, WriterConfig};
pub use engine::{EngineError, EventEngine};
pub use projector::{ApplyOutcome, ApplyReport, Projector, ProjectorBuilder, ProjectorError, TypeInfo};
pub use resolver::{AggregateResolver, KeySource, ResolveError};
pub use writer::{EventWriter, WriteError};
