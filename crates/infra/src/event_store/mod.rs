//! Append-only event log boundary.
//!
//! The engine reads the log in id order and writes to it only through
//! [`crate::writer::EventWriter`], which owns id-ordered checksum chaining.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError};
