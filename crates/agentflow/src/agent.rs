//! Agent identity, ports harness, and the execution contract
//!
//! An agent is a stateful node with one or more input ports and exactly one
//! output port. The scheduler drives it through [`Agent::step`]: consume at
//! most one envelope from the default input, validate it, dispatch to
//! [`Agent::process`] (which defaults to [`Agent::run`]), validate and route
//! the outputs. Agents with several input ports or source agents override
//! `step` and keep the same at-most-one-consumed observable behavior.

use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlowError;
use crate::message::{Envelope, Message};
use crate::parent::ParentId;
use crate::port::{Condition, InputPort, OutputPort, PortSnapshot, Transformer};
use crate::schema::SchemaRef;

/// Name of the input port created when none is named explicitly
pub const DEFAULT_INPUT: &str = "in";

/// Name of the single output port
pub const OUTPUT: &str = "out";

/// Stable identifier of an agent, unique within one scheduler
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What one step accomplished, as observed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Nothing to do; counts toward quiescence
    Idle,
    /// A message was consumed (and possibly outputs produced)
    Productive,
}

impl Activity {
    pub fn is_productive(&self) -> bool {
        matches!(self, Activity::Productive)
    }
}

/// What an agent hands back from `run`/`process`
pub enum AgentOutput {
    /// No downstream effect
    None,
    /// One message, sent with a `U:0:1` tag per connection
    One(Message),
    /// Independent messages: one send each, every one tagged `U:0:1`
    Many(Vec<Message>),
    /// Siblings of one split: a single send, shared `U`, indices `0..L`
    Split(Vec<Message>),
}

/// Identity, ports, and bookkeeping shared by every agent implementation
///
/// Concrete agents embed a harness and hand out `&AgentHarness` through
/// [`Agent::harness`]; the provided trait methods do the rest.
pub struct AgentHarness {
    id: AgentId,
    kind: String,
    inputs: Vec<InputPort>,
    output: OutputPort,
    last_input: Mutex<Option<Envelope>>,
}

impl AgentHarness {
    /// Harness with a single default input port
    pub fn new(
        id: impl Into<AgentId>,
        kind: impl Into<String>,
        input_schema: SchemaRef,
        output_schema: SchemaRef,
    ) -> Self {
        let id = id.into();
        let kind = kind.into();
        let inputs = vec![InputPort::new(
            DEFAULT_INPUT,
            true,
            id.clone(),
            kind.clone(),
            input_schema,
        )];
        Self::assemble(id, kind, inputs, output_schema)
    }

    /// Harness with named input ports; the first named port is the default
    pub fn multi(
        id: impl Into<AgentId>,
        kind: impl Into<String>,
        inputs: Vec<(String, SchemaRef)>,
        output_schema: SchemaRef,
    ) -> Result<Self, FlowError> {
        let id = id.into();
        let kind = kind.into();
        if inputs.is_empty() {
            return Err(FlowError::wiring(format!(
                "agent '{id}' declares no input ports"
            )));
        }
        let mut ports = Vec::with_capacity(inputs.len());
        for (i, (name, schema)) in inputs.into_iter().enumerate() {
            if name == OUTPUT || ports.iter().any(|p: &InputPort| p.name() == name) {
                return Err(FlowError::wiring(format!(
                    "agent '{id}' has a duplicate or reserved port name '{name}'"
                )));
            }
            ports.push(InputPort::new(name, i == 0, id.clone(), kind.clone(), schema));
        }
        Ok(Self::assemble(id, kind, ports, output_schema))
    }

    /// Harness without input ports, for agents that originate messages
    pub fn source(
        id: impl Into<AgentId>,
        kind: impl Into<String>,
        output_schema: SchemaRef,
    ) -> Self {
        let id = id.into();
        let kind = kind.into();
        Self::assemble(id, kind, Vec::new(), output_schema)
    }

    fn assemble(
        id: AgentId,
        kind: String,
        inputs: Vec<InputPort>,
        output_schema: SchemaRef,
    ) -> Self {
        let output = OutputPort::new(OUTPUT, id.clone(), kind.clone(), output_schema);
        Self {
            id,
            kind,
            inputs,
            output,
            last_input: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// Type label used by the pipeline printer, e.g. `IdentityAgent`
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn inputs(&self) -> &[InputPort] {
        &self.inputs
    }

    pub fn output(&self) -> &OutputPort {
        &self.output
    }

    /// The port `step` drains when no port is named; `None` for sources
    pub fn default_input(&self) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.is_default())
    }

    /// Resolve a named input port
    pub fn input(&self, name: &str) -> Result<&InputPort, FlowError> {
        self.inputs
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| {
                FlowError::wiring(format!(
                    "agent '{}' has no input port named '{name}'",
                    self.id
                ))
            })
    }

    /// Enqueue a seed message with empty provenance on the default input
    pub fn feed(&self, message: Message) -> Result<(), FlowError> {
        let port = self.default_input().ok_or_else(|| {
            FlowError::wiring(format!("agent '{}' takes no input", self.id))
        })?;
        port.receive(message, Vec::new());
        Ok(())
    }

    /// Validate and route an agent's outputs through the output port
    pub fn emit(&self, output: AgentOutput, parents: &[ParentId]) -> Result<(), FlowError> {
        match output {
            AgentOutput::None => Ok(()),
            AgentOutput::One(message) => {
                self.validate_output(&message)?;
                self.output.send(message, parents)
            }
            AgentOutput::Many(messages) => {
                for message in &messages {
                    self.validate_output(message)?;
                }
                for message in messages {
                    self.output.send(message, parents)?;
                }
                Ok(())
            }
            AgentOutput::Split(messages) => {
                for message in &messages {
                    self.validate_output(message)?;
                }
                self.output.send_split(messages, parents)
            }
        }
    }

    fn validate_output(&self, message: &Message) -> Result<(), FlowError> {
        self.output.schema().validate(self.output.name(), message)
    }

    /// Remember the envelope currently being processed
    ///
    /// The scheduler attaches it to the failure report if the step errors.
    pub fn note_input(&self, envelope: &Envelope) {
        *self.last_input.lock().expect("last input mutex poisoned") = Some(envelope.clone());
    }

    pub(crate) fn take_last_input(&self) -> Option<Envelope> {
        self.last_input
            .lock()
            .expect("last input mutex poisoned")
            .take()
    }

    /// Snapshot of every owned port, keyed by port name
    pub(crate) fn port_snapshots(&self) -> Vec<(String, PortSnapshot)> {
        let mut snaps: Vec<(String, PortSnapshot)> = self
            .inputs
            .iter()
            .map(|p| (p.name().to_string(), p.snapshot()))
            .collect();
        snaps.push((self.output.name().to_string(), self.output.snapshot()));
        snaps
    }

    pub(crate) fn restore_port(&self, name: &str, snapshot: PortSnapshot) -> Result<(), FlowError> {
        if name == self.output.name() {
            self.output.restore(snapshot);
            return Ok(());
        }
        match self.inputs.iter().find(|p| p.name() == name) {
            Some(port) => {
                port.restore(snapshot);
                Ok(())
            }
            None => Err(FlowError::checkpoint(format!(
                "agent '{}' has no port named '{name}'",
                self.id
            ))),
        }
    }
}

/// A stateful pipeline node
///
/// Implementations embed an [`AgentHarness`] and override the hooks they
/// need: `run` for pure message-in/message-out agents, `process` when the
/// provenance matters, `step` for sources and multi-port agents. State
/// that must survive a checkpoint goes through `state_value` /
/// `restore_state`.
#[async_trait]
pub trait Agent: Send {
    /// The embedded harness
    fn harness(&self) -> &AgentHarness;

    /// Transform one message; the default passes it through unchanged
    async fn run(&mut self, message: Message) -> Result<AgentOutput, FlowError> {
        Ok(AgentOutput::One(message))
    }

    /// Like `run`, but sees the provenance tags; defaults to `run`
    async fn process(
        &mut self,
        message: Message,
        parents: &[ParentId],
    ) -> Result<AgentOutput, FlowError> {
        let _ = parents;
        self.run(message).await
    }

    /// Consume at most one input message and route the outputs
    async fn step(&mut self) -> Result<Activity, FlowError> {
        let Some(port) = self.harness().default_input().cloned() else {
            return Ok(Activity::Idle);
        };
        let Some(envelope) = port.pop() else {
            return Ok(Activity::Idle);
        };
        self.harness().note_input(&envelope);
        port.schema().validate(port.name(), &envelope.message)?;
        let Envelope { parents, message } = envelope;
        let output = self.process(message, &parents).await?;
        self.harness().emit(output, &parents)?;
        Ok(Activity::Productive)
    }

    /// Serializable private state; `Null` when the agent is stateless
    fn state_value(&self) -> Result<Message, FlowError> {
        Ok(Message::Null)
    }

    /// Rebuild private state from a checkpointed `state_value`
    fn restore_state(&mut self, state: Message) -> Result<(), FlowError> {
        let _ = state;
        Ok(())
    }

    /// Version tag written next to the state in checkpoints
    fn state_version(&self) -> u32 {
        1
    }

    /// Shorthand for [`AgentHarness::id`]
    fn id(&self) -> &AgentId {
        self.harness().id()
    }

    /// Shorthand for [`AgentHarness::feed`]
    fn feed(&self, message: Message) -> Result<(), FlowError> {
        self.harness().feed(message)
    }

    /// Resolve a named input port, cloned for wiring
    fn input(&self, name: &str) -> Result<InputPort, FlowError> {
        self.harness().input(name).map(InputPort::clone)
    }

    /// Connect this agent's output to the target's default input
    fn connect_to(
        &self,
        target: &dyn Agent,
        transformer: Option<Transformer>,
        condition: Option<Condition>,
    ) -> Result<(), FlowError> {
        let input = target.harness().default_input().ok_or_else(|| {
            FlowError::wiring(format!(
                "agent '{}' takes no input and cannot be a connection target",
                target.harness().id()
            ))
        })?;
        self.harness().output().connect(input, transformer, condition);
        Ok(())
    }

    /// Undelivered outputs accumulated on an unconnected output port
    fn final_outputs(&self) -> Vec<Envelope> {
        self.harness().output().unconnected_outputs()
    }

    /// Remove and return one undelivered output, oldest first
    fn pop_one_output(&self) -> Option<Envelope> {
        self.harness().output().pop_unconnected()
    }

    /// Drop any undelivered outputs, e.g. before re-running a pipeline
    fn clear_final_outputs(&self) {
        self.harness().output().clear_unconnected()
    }
}
