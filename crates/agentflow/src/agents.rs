//! Small general-purpose agents
//!
//! Enough to assemble and exercise pipelines without writing a custom
//! `Agent` implementation: an identity forwarder, a counting source, a
//! collecting sink, and a closure wrapper.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::agent::{Activity, Agent, AgentHarness, AgentId, AgentOutput};
use crate::error::FlowError;
use crate::message::{Envelope, Message};
use crate::parent::ParentId;
use crate::schema::{any_schema, SchemaRef};

/// Forwards every message unchanged
pub struct IdentityAgent {
    harness: AgentHarness,
}

impl IdentityAgent {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self::with_schema(id, any_schema())
    }

    pub fn with_schema(id: impl Into<AgentId>, schema: SchemaRef) -> Self {
        Self {
            harness: AgentHarness::new(id, "IdentityAgent", schema.clone(), schema),
        }
    }
}

#[async_trait]
impl Agent for IdentityAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CounterState {
    next: u64,
    limit: u64,
}

/// Source agent emitting `1..=limit`, one number per step
///
/// Takes no input; once the limit is reached it reports idle so the
/// pipeline can quiesce.
pub struct CounterAgent {
    harness: AgentHarness,
    next: u64,
    limit: u64,
}

impl CounterAgent {
    pub fn new(id: impl Into<AgentId>, limit: u64) -> Self {
        Self {
            harness: AgentHarness::source(id, "CounterAgent", any_schema()),
            next: 1,
            limit,
        }
    }
}

#[async_trait]
impl Agent for CounterAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }

    async fn step(&mut self) -> Result<Activity, FlowError> {
        if self.next > self.limit {
            return Ok(Activity::Idle);
        }
        let value = json!(self.next);
        self.next += 1;
        self.harness.emit(AgentOutput::One(value), &[])?;
        Ok(Activity::Productive)
    }

    fn state_value(&self) -> Result<Message, FlowError> {
        Ok(serde_json::to_value(CounterState {
            next: self.next,
            limit: self.limit,
        })?)
    }

    fn restore_state(&mut self, state: Message) -> Result<(), FlowError> {
        let state: CounterState = serde_json::from_value(state)?;
        self.next = state.next;
        self.limit = state.limit;
        Ok(())
    }
}

/// Cloneable view into a [`ListSinkAgent`]'s collected messages
///
/// Grab the handle before the agent moves into the scheduler.
#[derive(Clone, Default)]
pub struct SinkBuffer {
    inner: Arc<Mutex<Vec<Envelope>>>,
}

impl SinkBuffer {
    /// Everything received so far, in arrival order
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.lock().clone()
    }

    /// Payloads only, in arrival order
    pub fn messages(&self) -> Vec<Message> {
        self.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Envelope>> {
        self.inner.lock().expect("sink buffer mutex poisoned")
    }
}

/// Terminal agent collecting every received envelope
pub struct ListSinkAgent {
    harness: AgentHarness,
    received: SinkBuffer,
}

impl ListSinkAgent {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self::with_schema(id, any_schema())
    }

    pub fn with_schema(id: impl Into<AgentId>, schema: SchemaRef) -> Self {
        Self {
            harness: AgentHarness::new(id, "ListSinkAgent", schema, any_schema()),
            received: SinkBuffer::default(),
        }
    }

    /// Handle for inspecting the collection after the agent is boxed
    pub fn buffer(&self) -> SinkBuffer {
        self.received.clone()
    }
}

#[async_trait]
impl Agent for ListSinkAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }

    async fn process(
        &mut self,
        message: Message,
        parents: &[ParentId],
    ) -> Result<AgentOutput, FlowError> {
        self.received
            .lock()
            .push(Envelope::new(parents.to_vec(), message));
        Ok(AgentOutput::None)
    }

    fn state_value(&self) -> Result<Message, FlowError> {
        Ok(serde_json::to_value(self.received.envelopes())?)
    }

    fn restore_state(&mut self, state: Message) -> Result<(), FlowError> {
        let envelopes: Vec<Envelope> = serde_json::from_value(state)?;
        *self.received.lock() = envelopes;
        Ok(())
    }
}

/// Callback closure run on an agent output
pub type RunFn = Box<dyn FnMut(Message) -> Result<AgentOutput, FlowError> + Send>;

/// Wraps a closure as an agent
pub struct FnAgent {
    harness: AgentHarness,
    callback: RunFn,
}

impl FnAgent {
    pub fn new(
        id: impl Into<AgentId>,
        callback: impl FnMut(Message) -> Result<AgentOutput, FlowError> + Send + 'static,
    ) -> Self {
        Self {
            harness: AgentHarness::new(id, "FnAgent", any_schema(), any_schema()),
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }

    async fn run(&mut self, message: Message) -> Result<AgentOutput, FlowError> {
        (self.callback)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counter_emits_then_idles() {
        let mut counter = CounterAgent::new("c", 3);
        for _ in 0..3 {
            assert!(counter.step().await.unwrap().is_productive());
        }
        assert_eq!(counter.step().await.unwrap(), Activity::Idle);

        let outputs: Vec<Message> = counter
            .final_outputs()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(outputs, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn counter_state_roundtrip() {
        let mut counter = CounterAgent::new("c", 5);
        counter.step().await.unwrap();
        counter.step().await.unwrap();

        let state = counter.state_value().unwrap();
        let mut restored = CounterAgent::new("c", 5);
        restored.restore_state(state).unwrap();
        assert_eq!(restored.next, 3);
        assert_eq!(restored.limit, 5);
    }

    #[tokio::test]
    async fn sink_collects_with_provenance() {
        let source = IdentityAgent::new("src");
        let sink = ListSinkAgent::new("sink");
        let buffer = sink.buffer();
        source.connect_to(&sink, None, None).unwrap();

        source.feed(json!("hello")).unwrap();
        let mut source = source;
        let mut sink = sink;
        source.step().await.unwrap();
        sink.step().await.unwrap();

        let received = buffer.envelopes();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, json!("hello"));
        assert_eq!(received[0].parents.len(), 1);
    }

    #[tokio::test]
    async fn sink_state_roundtrip() {
        let mut sink = ListSinkAgent::new("sink");
        sink.feed(json!(1)).unwrap();
        sink.step().await.unwrap();

        let state = sink.state_value().unwrap();
        let restored = ListSinkAgent::new("sink");
        let buffer = restored.buffer();
        let mut restored = restored;
        restored.restore_state(state).unwrap();
        assert_eq!(buffer.messages(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn fn_agent_runs_closure() {
        let mut doubler = FnAgent::new("dbl", |m| {
            let n = m.as_i64().unwrap_or(0);
            Ok(AgentOutput::One(json!(n * 2)))
        });
        doubler.feed(json!(21)).unwrap();
        doubler.step().await.unwrap();
        assert_eq!(doubler.final_outputs()[0].message, json!(42));
    }
}
