//! Error types for the pipeline engine
//!
//! Every failure mode the engine can surface is a variant of [`FlowError`].
//! Errors raised inside an agent's `run`/`process` are wrapped by the
//! scheduler into the `Step` variant together with the agent id and the
//! step counter at which the failure occurred.

use thiserror::Error;

use crate::agent::AgentId;

/// Errors that can occur while wiring, stepping, or persisting a pipeline
#[derive(Debug, Error)]
pub enum FlowError {
    /// A message failed validation against a port's declared schema
    #[error("schema violation on port '{port}': {reason}")]
    Schema { port: String, reason: String },

    /// An agent's `run`/`process` hook failed
    #[error("agent failure: {message}")]
    Agent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A connection or port lookup was refused at wiring time
    #[error("wiring error: {0}")]
    Wiring(String),

    /// A snapshot could not be written or read back
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// A provenance tag did not match the `uuid:index:total` wire form
    #[error("malformed parent id: {0}")]
    ParentId(String),

    /// Scheduler wrapper: `source` raised while stepping `agent`
    #[error("agent '{agent}' failed at step {step}")]
    Step {
        agent: AgentId,
        step: u64,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Create a schema violation error
    pub fn schema(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Create an agent failure with a message
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
            source: None,
        }
    }

    /// Create an agent failure wrapping an underlying error
    pub fn agent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Agent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a wiring error
    pub fn wiring(message: impl Into<String>) -> Self {
        Self::Wiring(message.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint(message.into())
    }

    /// Create a malformed parent id error
    pub fn parent_id(message: impl Into<String>) -> Self {
        Self::ParentId(message.into())
    }

    /// Short tag identifying the error class, used in error snapshots
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schema { .. } => "schema",
            Self::Agent { .. } => "agent",
            Self::Wiring(_) => "wiring",
            Self::Checkpoint(_) => "checkpoint",
            Self::ParentId(_) => "parent-id",
            Self::Step { .. } => "step",
        }
    }

    /// True for failures that abort the run even under a collecting policy
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Checkpoint(_) | Self::ParentId(_))
    }
}

impl From<serde_json::Error> for FlowError {
    fn from(e: serde_json::Error) -> Self {
        FlowError::agent_with_source("payload (de)serialization failed", e)
    }
}
