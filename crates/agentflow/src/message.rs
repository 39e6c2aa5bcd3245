//! Message envelope carried through ports
//!
//! Payloads are open-shaped JSON values; the engine never interprets them
//! beyond schema validation at the agent boundary. The envelope pairs a
//! payload with its provenance tags.

use serde::{Deserialize, Serialize};

use crate::parent::Parents;

/// An opaque structured payload
pub type Message = serde_json::Value;

/// A payload plus the provenance accumulated on its way here
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// One tag per port traversal, oldest first
    pub parents: Parents,
    /// The payload itself
    pub message: Message,
}

impl Envelope {
    pub fn new(parents: Parents, message: Message) -> Self {
        Self { parents, message }
    }

    /// An envelope with no provenance, as produced by `feed`
    pub fn seed(message: Message) -> Self {
        Self {
            parents: Vec::new(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parent::ParentId;
    use serde_json::json;

    #[test]
    fn envelope_roundtrip() {
        let env = Envelope::new(vec![ParentId::mint(0, 2).unwrap()], json!({"k": 1}));
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn seed_has_no_parents() {
        assert!(Envelope::seed(json!(1)).parents.is_empty());
    }
}
