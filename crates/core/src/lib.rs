//! `chronicle-core`: identifiers, errors and the aggregate contract.
//!
//! No infrastructure concerns live here.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateState};
pub use error::{DomainError, FieldError, ValidationErrors};
pub use id::{AggregateKey, EventId, RecordId};
