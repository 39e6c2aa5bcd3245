//! # agentflow
//!
//! Message-passing agent pipelines: directed graphs of stateful agents that
//! consume envelopes from typed input ports and emit on a typed output port.
//! A deterministic round-robin scheduler drives the graph to quiescence,
//! every port traversal stamps a provenance tag onto the message, and the
//! whole pipeline can be checkpointed to disk and resumed.
//!
//! ## Building blocks
//!
//! - [`ParentId`] / [`parent`] — the `uuid:index:total` provenance algebra
//!   that lets aggregators reassemble split messages
//! - [`InputPort`] / [`OutputPort`] — FIFO endpoints and connections with
//!   optional per-connection transformers and filter conditions
//! - [`Agent`] — the single-step execution contract; implementations embed
//!   an [`AgentHarness`] and override `run`, `process`, or `step`
//! - [`Scheduler`] — strict round-robin driver with quiescence detection,
//!   error capture, and periodic snapshots
//! - [`ListCollectAgent`] / [`JoinAgent`] — aggregation on top of the
//!   provenance structure
//! - [`PipelinePrinter`] — ASCII / Mermaid views of the wiring
//!
//! ## Example
//!
//! ```no_run
//! use agentflow::{
//!     Agent, CounterAgent, ListSinkAgent, Scheduler, condition,
//! };
//!
//! # async fn demo() -> Result<(), agentflow::FlowError> {
//! let counter = CounterAgent::new("counter", 5);
//! let sink = ListSinkAgent::new("sink");
//! let received = sink.buffer();
//! counter.connect_to(
//!     &sink,
//!     None,
//!     Some(condition(|m| m.as_u64().is_some_and(|n| n % 2 == 0))),
//! )?;
//!
//! let mut scheduler = Scheduler::new();
//! scheduler.add_agent(Box::new(counter))?;
//! scheduler.add_agent(Box::new(sink))?;
//! scheduler.step_all().await?;
//!
//! assert_eq!(received.len(), 2); // 2 and 4
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agents;
pub mod aggregate;
pub mod checkpoint;
pub mod error;
pub mod message;
pub mod parent;
pub mod port;
pub mod printer;
pub mod scheduler;
pub mod schema;

pub use agent::{
    Activity, Agent, AgentHarness, AgentId, AgentOutput, DEFAULT_INPUT, OUTPUT,
};
pub use agents::{CounterAgent, FnAgent, IdentityAgent, ListSinkAgent, SinkBuffer};
pub use aggregate::{default_compose, Compose, JoinAgent, ListCollectAgent};
pub use checkpoint::{latest_checkpoint, list_checkpoints, SchedulerStateFile};
pub use error::FlowError;
pub use message::{Envelope, Message};
pub use parent::{group_key, longest_common_prefix, shares_prefix, ParentId, Parents};
pub use port::{
    condition, map_transformer, split_transformer, Condition, Connection, InputPort,
    OutputPort, PortSnapshot, Transformer,
};
pub use printer::{GraphEdge, GraphNode, PipelineGraph, PipelinePrinter};
pub use scheduler::{ErrorPolicy, ErrorReport, Scheduler, SchedulerConfig};
pub use schema::{any_schema, kind_schema, AnySchema, KindSchema, Schema, SchemaRef};
