//! Domain error model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-level error.
///
/// Deterministic domain failures only; storage and transport errors belong
/// to the infra layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}

/// One failed business rule on an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Structured list of business-rule violations found when saving an aggregate.
///
/// Serialized as `{"field": ["message", ...], ...}` when written to the
/// failure audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Builder-style variant of [`ValidationErrors::add`].
    pub fn with(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.add(field, message);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// `Ok(())` when no rule failed, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    /// JSON text grouped by field (fields sorted).
    pub fn to_json(&self) -> String {
        let mut grouped = serde_json::Map::new();
        for e in &self.errors {
            let entry = grouped
                .entry(e.field.clone())
                .or_insert_with(|| serde_json::Value::Array(Vec::new()));
            if let serde_json::Value::Array(messages) = entry {
                messages.push(serde_json::Value::String(e.message.clone()));
            }
        }
        serde_json::Value::Object(grouped).to_string()
    }
}

impl core::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let summary = self
            .errors
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join(", ");
        f.write_str(&summary)
    }
}

impl std::error::Error for ValidationErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_errors_convert_to_ok() {
        assert!(ValidationErrors::new().into_result().is_ok());
    }

    #[test]
    fn json_groups_messages_by_field() {
        let errors = ValidationErrors::new()
            .with("balance", "must not be negative")
            .with("owner", "can't be blank")
            .with("balance", "exceeds limit");

        let json: serde_json::Value = serde_json::from_str(&errors.to_json()).unwrap();
        assert_eq!(
            json["balance"],
            serde_json::json!(["must not be negative", "exceeds limit"])
        );
        assert_eq!(json["owner"], serde_json::json!(["can't be blank"]));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn display_joins_field_and_message() {
        let errors = ValidationErrors::new().with("owner", "can't be blank");
        assert_eq!(errors.to_string(), "owner can't be blank");
    }
}
