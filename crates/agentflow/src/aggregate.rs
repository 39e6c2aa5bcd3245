//! Aggregation agents driven by provenance structure
//!
//! Both agents here buffer partial inputs and emit once a provenance-defined
//! group is complete: [`ListCollectAgent`] reassembles the siblings of one
//! split, [`JoinAgent`] pairs up messages arriving on different named ports
//! under a common ancestor.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::{Activity, Agent, AgentHarness, AgentId, AgentOutput};
use crate::error::FlowError;
use crate::message::{Envelope, Message};
use crate::parent::{longest_common_prefix, ParentId, Parents};
use crate::schema::{any_schema, SchemaRef};

/// Combines the ordered pieces of a completed group into one payload
pub type Compose = Arc<dyn Fn(Vec<Message>) -> Message + Send + Sync>;

/// Default composition: concatenate array pieces, collect anything else
///
/// When every piece is an array the result is their concatenation, so a
/// split array reassembles to the original. Mixed or scalar pieces are
/// collected into an array in index order.
pub fn default_compose() -> Compose {
    Arc::new(|pieces| {
        let mut out = Vec::with_capacity(pieces.len());
        for piece in pieces {
            match piece {
                Message::Array(items) => out.extend(items),
                other => out.push(other),
            }
        }
        Message::Array(out)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Piece {
    index: u32,
    message: Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Bucket {
    key: Parents,
    total: u32,
    pieces: Vec<Piece>,
}

/// Reassembles split siblings into a single message
///
/// Messages are bucketed by their parent sequence minus the final tag; the
/// final tag's `index`/`total` say which piece this is and how many exist.
/// A bucket emits once every index has arrived, with the bucket key as the
/// emitted provenance. Partial buckets are part of the agent state and
/// survive checkpoints.
pub struct ListCollectAgent {
    harness: AgentHarness,
    compose: Compose,
    buckets: Vec<Bucket>,
}

impl ListCollectAgent {
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self::with_compose(id, default_compose())
    }

    pub fn with_compose(id: impl Into<AgentId>, compose: Compose) -> Self {
        Self {
            harness: AgentHarness::new(id, "ListCollectAgent", any_schema(), any_schema()),
            compose,
            buckets: Vec::new(),
        }
    }

    /// Number of groups still waiting for siblings
    pub fn pending_groups(&self) -> usize {
        self.buckets.len()
    }

    fn absorb(
        &mut self,
        parents: Parents,
        message: Message,
    ) -> Result<Option<(Parents, Message)>, FlowError> {
        let Some((last, key)) = parents.split_last() else {
            // Fed directly with no provenance: a group of one.
            return Ok(Some((Vec::new(), (self.compose)(vec![message]))));
        };
        let key = key.to_vec();
        let (index, total) = (last.index(), last.total());

        let pos = match self.buckets.iter().position(|b| b.key == key) {
            Some(pos) => pos,
            None => {
                self.buckets.push(Bucket {
                    key: key.clone(),
                    total,
                    pieces: Vec::new(),
                });
                self.buckets.len() - 1
            }
        };

        {
            let bucket = &mut self.buckets[pos];
            if bucket.total != total {
                return Err(FlowError::parent_id(format!(
                    "sibling total mismatch in group of '{last}': {} vs {total}",
                    bucket.total
                )));
            }
            if bucket.pieces.iter().any(|p| p.index == index) {
                return Err(FlowError::parent_id(format!(
                    "duplicate sibling index in '{last}'"
                )));
            }
            bucket.pieces.push(Piece { index, message });
        }

        if self.buckets[pos].pieces.len() as u32 == total {
            let mut bucket = self.buckets.remove(pos);
            bucket.pieces.sort_by_key(|p| p.index);
            let pieces = bucket.pieces.into_iter().map(|p| p.message).collect();
            return Ok(Some((bucket.key, (self.compose)(pieces))));
        }
        Ok(None)
    }
}

#[async_trait]
impl Agent for ListCollectAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }

    async fn step(&mut self) -> Result<Activity, FlowError> {
        let Some(port) = self.harness.default_input().cloned() else {
            return Ok(Activity::Idle);
        };
        let Some(envelope) = port.pop() else {
            return Ok(Activity::Idle);
        };
        self.harness.note_input(&envelope);
        port.schema().validate(port.name(), &envelope.message)?;
        let Envelope { parents, message } = envelope;
        if let Some((key, composed)) = self.absorb(parents, message)? {
            self.harness.emit(AgentOutput::One(composed), &key)?;
        }
        Ok(Activity::Productive)
    }

    fn state_value(&self) -> Result<Message, FlowError> {
        Ok(serde_json::to_value(&self.buckets)?)
    }

    fn restore_state(&mut self, state: Message) -> Result<(), FlowError> {
        self.buckets = serde_json::from_value(state)?;
        Ok(())
    }
}

/// Joins one message per named input port under a common ancestor
///
/// A group is ready when every declared port holds a message sharing a
/// non-empty common prefix with the group's anchor. Branch messages always
/// differ in their trailing tags (every connection mints its own send
/// UUID), so membership is decided by shared ancestry, never by full
/// overlap. The oldest viable anchor wins. The emitted payload maps port
/// name to the joined message; the emitted provenance is the common
/// prefix. Waiting messages simply stay queued on their ports, so partial
/// groups survive checkpoints with the port snapshots.
pub struct JoinAgent {
    harness: AgentHarness,
}

impl JoinAgent {
    pub fn new(
        id: impl Into<AgentId>,
        inputs: Vec<(String, SchemaRef)>,
        output_schema: SchemaRef,
    ) -> Result<Self, FlowError> {
        if inputs.len() < 2 {
            return Err(FlowError::wiring(
                "a join needs at least two input ports".to_string(),
            ));
        }
        Ok(Self {
            harness: AgentHarness::multi(id, "JoinAgent", inputs, output_schema)?,
        })
    }
}

#[async_trait]
impl Agent for JoinAgent {
    fn harness(&self) -> &AgentHarness {
        &self.harness
    }

    async fn step(&mut self) -> Result<Activity, FlowError> {
        let ports = self.harness.inputs().to_vec();
        if ports.iter().any(|p| p.is_empty()) {
            return Ok(Activity::Idle);
        }

        let anchor_queue = ports[0].queued();
        'anchors: for (anchor_idx, anchor) in anchor_queue.iter().enumerate() {
            let mut picks = vec![anchor_idx];
            let mut group = vec![anchor.clone()];
            for port in &ports[1..] {
                let queue = port.queued();
                let found = queue.iter().position(|env| {
                    !longest_common_prefix(&[&anchor.parents, &env.parents]).is_empty()
                });
                match found {
                    Some(idx) => {
                        picks.push(idx);
                        group.push(queue[idx].clone());
                    }
                    None => continue 'anchors,
                }
            }

            let seqs: Vec<&[ParentId]> = group.iter().map(|e| e.parents.as_slice()).collect();
            let prefix = longest_common_prefix(&seqs);
            if prefix.is_empty() {
                continue;
            }

            self.harness.note_input(anchor);
            for (port, idx) in ports.iter().zip(&picks) {
                port.remove_at(*idx);
            }
            let mut joined = serde_json::Map::new();
            for (port, env) in ports.iter().zip(group) {
                port.schema().validate(port.name(), &env.message)?;
                joined.insert(port.name().to_string(), env.message);
            }
            self.harness
                .emit(AgentOutput::One(Message::Object(joined)), &prefix)?;
            return Ok(Activity::Productive);
        }
        Ok(Activity::Idle)
    }
}
