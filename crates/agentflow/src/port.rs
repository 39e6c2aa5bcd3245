//! Typed ports and the connections between them
//!
//! An [`InputPort`] owns a FIFO of envelopes; an [`OutputPort`] owns an
//! ordered list of [`Connection`]s. Sending routes a message through every
//! connection in declaration order, applying the connection's transformer
//! and condition and appending one fresh provenance tag per delivered
//! sub-message. Delivery only enqueues — it never steps the receiving
//! agent, so cyclic wirings stay step-bounded.
//!
//! Port handles are cheap clones of a shared inner; the agent that created
//! a port remains its logical owner, connections merely hold a delivery
//! handle to the target.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::AgentId;
use crate::error::FlowError;
use crate::message::{Envelope, Message};
use crate::parent::{ParentId, Parents};
use crate::schema::SchemaRef;

/// Per-connection message rewrite; returning an empty vec drops the message
pub type Transformer = Arc<dyn Fn(Message) -> Vec<Message> + Send + Sync>;

/// Per-connection filter, evaluated after the transformer on each sub-message
pub type Condition = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Wrap a one-to-one rewrite as a [`Transformer`]
pub fn map_transformer(f: impl Fn(Message) -> Message + Send + Sync + 'static) -> Transformer {
    Arc::new(move |m| vec![f(m)])
}

/// Wrap a one-to-many rewrite as a [`Transformer`]
pub fn split_transformer(
    f: impl Fn(Message) -> Vec<Message> + Send + Sync + 'static,
) -> Transformer {
    Arc::new(f)
}

/// Wrap a predicate as a [`Condition`]
pub fn condition(f: impl Fn(&Message) -> bool + Send + Sync + 'static) -> Condition {
    Arc::new(f)
}

/// Persisted form of one port: pending inputs and undelivered outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSnapshot {
    pub queue: Vec<Envelope>,
    pub unconnected: Vec<Envelope>,
}

/// A directed link from an output port to an input port
#[derive(Clone)]
pub struct Connection {
    target: InputPort,
    transformer: Option<Transformer>,
    condition: Option<Condition>,
}

impl Connection {
    /// Delivery handle of the receiving port
    pub fn target(&self) -> &InputPort {
        &self.target
    }

    pub fn has_transformer(&self) -> bool {
        self.transformer.is_some()
    }

    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }
}

struct InputInner {
    name: String,
    default: bool,
    owner: AgentId,
    owner_kind: String,
    schema: SchemaRef,
    queue: Mutex<VecDeque<Envelope>>,
}

/// A named FIFO endpoint owned by one agent
#[derive(Clone)]
pub struct InputPort {
    inner: Arc<InputInner>,
}

impl InputPort {
    pub(crate) fn new(
        name: impl Into<String>,
        default: bool,
        owner: AgentId,
        owner_kind: impl Into<String>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            inner: Arc::new(InputInner {
                name: name.into(),
                default,
                owner,
                owner_kind: owner_kind.into(),
                schema,
                queue: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True for the port `step` drains when no port is named explicitly
    pub fn is_default(&self) -> bool {
        self.inner.default
    }

    pub fn owner(&self) -> &AgentId {
        &self.inner.owner
    }

    pub fn owner_kind(&self) -> &str {
        &self.inner.owner_kind
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.inner.schema
    }

    /// Append an envelope to the queue
    pub fn receive(&self, message: Message, parents: Parents) {
        self.lock().push_back(Envelope::new(parents, message));
    }

    /// Remove and return the oldest envelope
    pub fn pop(&self) -> Option<Envelope> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clone of the current queue contents, oldest first
    pub fn queued(&self) -> Vec<Envelope> {
        self.lock().iter().cloned().collect()
    }

    /// Remove the envelope at `index`, counted from the oldest
    pub(crate) fn remove_at(&self, index: usize) -> Option<Envelope> {
        self.lock().remove(index)
    }

    pub(crate) fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            queue: self.queued(),
            unconnected: Vec::new(),
        }
    }

    pub(crate) fn restore(&self, snapshot: PortSnapshot) {
        let mut queue = self.lock();
        queue.clear();
        queue.extend(snapshot.queue);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Envelope>> {
        self.inner.queue.lock().expect("input queue mutex poisoned")
    }

    /// Identity comparison: two handles to the same underlying port
    pub fn same_port(&self, other: &InputPort) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct OutputInner {
    name: String,
    owner: AgentId,
    owner_kind: String,
    schema: SchemaRef,
    connections: Mutex<Vec<Connection>>,
    unconnected: Mutex<VecDeque<Envelope>>,
}

/// The single outbound endpoint of an agent
#[derive(Clone)]
pub struct OutputPort {
    inner: Arc<OutputInner>,
}

impl OutputPort {
    pub(crate) fn new(
        name: impl Into<String>,
        owner: AgentId,
        owner_kind: impl Into<String>,
        schema: SchemaRef,
    ) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                name: name.into(),
                owner,
                owner_kind: owner_kind.into(),
                schema,
                connections: Mutex::new(Vec::new()),
                unconnected: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> &AgentId {
        &self.inner.owner
    }

    pub fn owner_kind(&self) -> &str {
        &self.inner.owner_kind
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.inner.schema
    }

    /// Append a connection; declaration order is delivery order
    pub fn connect(
        &self,
        target: &InputPort,
        transformer: Option<Transformer>,
        condition: Option<Condition>,
    ) {
        self.inner
            .connections
            .lock()
            .expect("connection list mutex poisoned")
            .push(Connection {
                target: target.clone(),
                transformer,
                condition,
            });
    }

    /// Snapshot of the outbound connections in declaration order
    pub fn connections(&self) -> Vec<Connection> {
        self.inner
            .connections
            .lock()
            .expect("connection list mutex poisoned")
            .clone()
    }

    pub fn connection_count(&self) -> usize {
        self.inner
            .connections
            .lock()
            .expect("connection list mutex poisoned")
            .len()
    }

    /// Send one message through every connection
    ///
    /// Without a transformer the connection delivers the message with a
    /// fresh `U:0:1` tag. A transformer may split it into siblings, which
    /// then share one fresh `U` per connection with indices `0..L`.
    pub fn send(&self, message: Message, parents: &[ParentId]) -> Result<(), FlowError> {
        self.fan_out(std::slice::from_ref(&message), parents)
    }

    /// Send a batch whose elements are siblings of one split
    ///
    /// The privileged overload for agents that split a message and intend
    /// downstream reassembly: per connection the surviving elements share
    /// one fresh `U` with indices `0..L`.
    pub fn send_split(&self, messages: Vec<Message>, parents: &[ParentId]) -> Result<(), FlowError> {
        self.fan_out(&messages, parents)
    }

    fn fan_out(&self, batch: &[Message], parents: &[ParentId]) -> Result<(), FlowError> {
        let connections = self.connections();
        if connections.is_empty() {
            let mut pending = self.lock_unconnected();
            for message in batch {
                let mut tagged = parents.to_vec();
                tagged.push(ParentId::mint(0, 1)?);
                pending.push_back(Envelope::new(tagged, message.clone()));
            }
            return Ok(());
        }

        for conn in &connections {
            let candidates: Vec<Message> = match &conn.transformer {
                Some(t) => batch.iter().flat_map(|m| t(m.clone())).collect(),
                None => batch.to_vec(),
            };
            let kept: Vec<Message> = match &conn.condition {
                Some(c) => candidates.into_iter().filter(|m| c(m)).collect(),
                None => candidates,
            };
            let total = kept.len() as u32;
            if total == 0 {
                continue;
            }
            // One send UUID per connection: siblings never span connections.
            let send_uuid = Uuid::new_v4();
            for (index, message) in kept.into_iter().enumerate() {
                let mut tagged = parents.to_vec();
                tagged.push(ParentId::sibling(send_uuid, index as u32, total)?);
                conn.target.receive(message, tagged);
            }
        }
        Ok(())
    }

    /// Number of envelopes held because no connection exists
    pub fn unconnected_len(&self) -> usize {
        self.lock_unconnected().len()
    }

    /// Clone of the undelivered outputs, oldest first
    pub fn unconnected_outputs(&self) -> Vec<Envelope> {
        self.lock_unconnected().iter().cloned().collect()
    }

    /// Remove and return the oldest undelivered output
    pub fn pop_unconnected(&self) -> Option<Envelope> {
        self.lock_unconnected().pop_front()
    }

    /// Drop all undelivered outputs
    pub fn clear_unconnected(&self) {
        self.lock_unconnected().clear();
    }

    pub(crate) fn snapshot(&self) -> PortSnapshot {
        PortSnapshot {
            queue: Vec::new(),
            unconnected: self.unconnected_outputs(),
        }
    }

    pub(crate) fn restore(&self, snapshot: PortSnapshot) {
        let mut pending = self.lock_unconnected();
        pending.clear();
        pending.extend(snapshot.unconnected);
    }

    fn lock_unconnected(&self) -> std::sync::MutexGuard<'_, VecDeque<Envelope>> {
        self.inner
            .unconnected
            .lock()
            .expect("unconnected buffer mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::any_schema;
    use serde_json::json;

    fn input(name: &str) -> InputPort {
        InputPort::new(name, true, AgentId::from("sink"), "SinkAgent", any_schema())
    }

    fn output() -> OutputPort {
        OutputPort::new("out", AgentId::from("src"), "SourceAgent", any_schema())
    }

    #[test]
    fn receive_preserves_fifo() {
        let port = input("in");
        port.receive(json!(1), vec![]);
        port.receive(json!(2), vec![]);
        assert_eq!(port.pop().unwrap().message, json!(1));
        assert_eq!(port.pop().unwrap().message, json!(2));
        assert!(port.pop().is_none());
    }

    #[test]
    fn send_appends_one_tag() {
        let out = output();
        let target = input("in");
        out.connect(&target, None, None);
        out.send(json!("x"), &[]).unwrap();

        let env = target.pop().unwrap();
        assert_eq!(env.message, json!("x"));
        assert_eq!(env.parents.len(), 1);
        assert_eq!(env.parents[0].index(), 0);
        assert_eq!(env.parents[0].total(), 1);
    }

    #[test]
    fn fan_out_mints_distinct_uuids() {
        let out = output();
        let (a, b) = (input("in"), input("in"));
        out.connect(&a, None, None);
        out.connect(&b, None, None);
        out.send(json!("x"), &[]).unwrap();

        let ea = a.pop().unwrap();
        let eb = b.pop().unwrap();
        assert_ne!(ea.parents[0].uuid(), eb.parents[0].uuid());
        assert_eq!(ea.message, eb.message);
    }

    #[test]
    fn transformer_splits_into_siblings() {
        let out = output();
        let target = input("in");
        out.connect(
            &target,
            Some(split_transformer(|m| {
                m.as_array().cloned().unwrap_or_default()
            })),
            None,
        );
        out.send(json!(["a", "b", "c"]), &[]).unwrap();

        let envs = target.queued();
        assert_eq!(envs.len(), 3);
        let uuid = envs[0].parents[0].uuid();
        for (i, env) in envs.iter().enumerate() {
            assert_eq!(env.parents[0].uuid(), uuid);
            assert_eq!(env.parents[0].index(), i as u32);
            assert_eq!(env.parents[0].total(), 3);
        }
    }

    #[test]
    fn empty_transform_is_a_noop() {
        let out = output();
        let target = input("in");
        out.connect(&target, Some(split_transformer(|_| Vec::new())), None);
        out.send(json!("x"), &[]).unwrap();
        assert!(target.is_empty());
        assert_eq!(out.unconnected_len(), 0);
    }

    #[test]
    fn condition_runs_after_transformer_and_renumbers() {
        let out = output();
        let target = input("in");
        out.connect(
            &target,
            Some(split_transformer(|m| {
                m.as_array().cloned().unwrap_or_default()
            })),
            Some(condition(|m| m.as_i64().map_or(false, |n| n % 2 == 0))),
        );
        out.send(json!([1, 2, 3, 4]), &[]).unwrap();

        let envs = target.queued();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].message, json!(2));
        assert_eq!(envs[1].message, json!(4));
        // Surviving siblings are renumbered over the filtered length.
        assert_eq!(envs[0].parents[0].index(), 0);
        assert_eq!(envs[0].parents[0].total(), 2);
        assert_eq!(envs[1].parents[0].index(), 1);
        assert_eq!(envs[1].parents[0].total(), 2);
    }

    #[test]
    fn rejecting_condition_equals_no_connection_for_delivery() {
        let out = output();
        let target = input("in");
        out.connect(&target, None, Some(condition(|_| false)));
        out.send(json!("x"), &[]).unwrap();
        assert!(target.is_empty());
        // The connection exists, so nothing lands in the unconnected buffer
        // either.
        assert_eq!(out.unconnected_len(), 0);
    }

    #[test]
    fn unconnected_send_buffers_with_fresh_tag() {
        let out = output();
        out.send(json!("x"), &[]).unwrap();
        assert_eq!(out.unconnected_len(), 1);
        let env = out.pop_unconnected().unwrap();
        assert_eq!(env.parents.len(), 1);
        assert!(env.parents[0].is_singleton());
    }

    #[test]
    fn send_split_shares_one_uuid() {
        let out = output();
        let target = input("in");
        out.connect(&target, None, None);
        out.send_split(vec![json!("a"), json!("b")], &[]).unwrap();

        let envs = target.queued();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0].parents[0].uuid(), envs[1].parents[0].uuid());
        assert_eq!(envs[0].parents[0].total(), 2);
        assert_eq!(envs[1].parents[0].index(), 1);
    }

    #[test]
    fn parents_grow_per_traversal() {
        let out = output();
        let target = input("in");
        out.connect(&target, None, None);

        let upstream = vec![ParentId::mint(0, 1).unwrap()];
        out.send(json!("x"), &upstream).unwrap();

        let env = target.pop().unwrap();
        assert_eq!(env.parents.len(), 2);
        assert_eq!(env.parents[0], upstream[0]);
    }

    #[test]
    fn snapshot_restore_roundtrip() {
        let port = input("in");
        port.receive(json!(1), vec![ParentId::mint(0, 1).unwrap()]);
        port.receive(json!(2), vec![]);

        let snap = port.snapshot();
        let fresh = input("in");
        fresh.restore(snap.clone());
        assert_eq!(fresh.snapshot(), snap);
        assert_eq!(fresh.len(), 2);
    }
}
