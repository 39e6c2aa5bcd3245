//! Runtime message validation seam
//!
//! The engine validates messages at the agent boundary but does not define a
//! schema language of its own; richer validators plug in behind the
//! [`Schema`] trait. [`AnySchema`] accepts everything and [`KindSchema`]
//! checks the JSON type kind, which is enough for the built-in agents and
//! the tests.

use std::sync::Arc;

use crate::error::FlowError;
use crate::message::Message;

/// A validator for one declared message type
pub trait Schema: Send + Sync {
    /// Name shown in schema violations and renderings
    fn name(&self) -> &str;

    /// Check one payload; the port name is supplied by the caller for context
    fn validate(&self, port: &str, message: &Message) -> Result<(), FlowError>;
}

/// Shared handle to a schema
pub type SchemaRef = Arc<dyn Schema>;

/// Accepts every payload
#[derive(Debug, Default, Clone, Copy)]
pub struct AnySchema;

impl Schema for AnySchema {
    fn name(&self) -> &str {
        "any"
    }

    fn validate(&self, _port: &str, _message: &Message) -> Result<(), FlowError> {
        Ok(())
    }
}

/// Convenience constructor for the accept-all schema
pub fn any_schema() -> SchemaRef {
    Arc::new(AnySchema)
}

/// Validates the JSON type kind of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindSchema {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl KindSchema {
    fn matches(&self, message: &Message) -> bool {
        match self {
            Self::Null => message.is_null(),
            Self::Bool => message.is_boolean(),
            Self::Number => message.is_number(),
            Self::String => message.is_string(),
            Self::Array => message.is_array(),
            Self::Object => message.is_object(),
        }
    }
}

impl Schema for KindSchema {
    fn name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn validate(&self, port: &str, message: &Message) -> Result<(), FlowError> {
        if self.matches(message) {
            Ok(())
        } else {
            Err(FlowError::schema(
                port,
                format!("expected {} payload", self.name()),
            ))
        }
    }
}

/// Shared handle to a [`KindSchema`]
pub fn kind_schema(kind: KindSchema) -> SchemaRef {
    Arc::new(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn any_accepts_everything() {
        let s = AnySchema;
        assert!(s.validate("in", &json!(null)).is_ok());
        assert!(s.validate("in", &json!([1, 2])).is_ok());
    }

    #[test]
    fn kind_checks_type() {
        let s = KindSchema::Number;
        assert!(s.validate("in", &json!(3)).is_ok());
        let err = s.validate("in", &json!("three")).unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert!(format!("{err}").contains("expected number"));
    }
}
