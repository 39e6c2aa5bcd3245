//! Human-readable views of a pipeline's wiring
//!
//! Pure traversal over registered agents and their outbound connections.
//! Agents render in registration order, connections in declaration order,
//! and every agent appears even when nothing points at it, so the output is
//! total and stable. The structured [`PipelineGraph`] is serializable for
//! external renderers; [`PipelinePrinter::to_mermaid`] is one such renderer
//! built in.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::agent::{Agent, AgentId};

/// One registered agent
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: AgentId,
    pub kind: String,
    /// Display label, `<Kind>#<n>` numbered per kind in registration order
    pub label: String,
}

/// One connection from an agent's output port to an input port
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub source: AgentId,
    pub target: AgentId,
    pub target_kind: String,
    pub target_port: String,
    pub target_is_default: bool,
    pub transformed: bool,
    pub conditional: bool,
}

/// Structured description of the wiring, the input to any renderer
#[derive(Debug, Clone, Serialize)]
pub struct PipelineGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl PipelineGraph {
    fn label_of(&self, id: &AgentId) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| &n.id == id)
            .map(|n| n.label.as_str())
    }
}

/// Renders pipeline wiring as ASCII, Mermaid, or a structured graph
#[derive(Debug, Default, Clone, Copy)]
pub struct PipelinePrinter;

impl PipelinePrinter {
    pub fn new() -> Self {
        Self
    }

    /// Collect the wiring of `agents` into a [`PipelineGraph`]
    pub fn to_graph<'a>(&self, agents: impl IntoIterator<Item = &'a dyn Agent>) -> PipelineGraph {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut kind_counts: HashMap<String, usize> = HashMap::new();

        for agent in agents {
            let harness = agent.harness();
            let kind = harness.kind().to_string();
            let n = kind_counts.entry(kind.clone()).or_insert(0);
            *n += 1;
            nodes.push(GraphNode {
                id: harness.id().clone(),
                kind: kind.clone(),
                label: format!("{kind}#{n}"),
            });

            for conn in harness.output().connections() {
                let target = conn.target();
                edges.push(GraphEdge {
                    source: harness.id().clone(),
                    target: target.owner().clone(),
                    target_kind: target.owner_kind().to_string(),
                    target_port: target.name().to_string(),
                    target_is_default: target.is_default(),
                    transformed: conn.has_transformer(),
                    conditional: conn.has_condition(),
                });
            }
        }
        PipelineGraph { nodes, edges }
    }

    /// ASCII tree, one block per registered agent
    ///
    /// ```text
    /// CounterAgent#1 [counter]
    ///   ├─▶ IdentityAgent#1
    ///   └─▶ JoinAgent#1 @meta
    /// ```
    pub fn render_ascii<'a>(&self, agents: impl IntoIterator<Item = &'a dyn Agent>) -> String {
        let graph = self.to_graph(agents);
        let mut out = String::new();

        for node in &graph.nodes {
            writeln!(out, "{} [{}]", node.label, node.id).expect("string write");
            let outgoing: Vec<&GraphEdge> =
                graph.edges.iter().filter(|e| e.source == node.id).collect();
            for (i, edge) in outgoing.iter().enumerate() {
                let branch = if i + 1 == outgoing.len() {
                    "  └─▶ "
                } else {
                    "  ├─▶ "
                };
                let target = graph
                    .label_of(&edge.target)
                    .unwrap_or(edge.target_kind.as_str());
                let suffix = if edge.target_is_default {
                    String::new()
                } else {
                    format!(" @{}", edge.target_port)
                };
                writeln!(out, "{branch}{target}{suffix}").expect("string write");
            }
        }
        out
    }

    /// Mermaid `graph TD` rendering; conditional connections are dotted
    pub fn to_mermaid<'a>(&self, agents: impl IntoIterator<Item = &'a dyn Agent>) -> String {
        let graph = self.to_graph(agents);
        let mut out = String::from("graph TD\n");

        for node in &graph.nodes {
            writeln!(out, "    {}[{}]", sanitize_id(node.id.as_str()), node.label)
                .expect("string write");
        }
        writeln!(out).expect("string write");
        for edge in &graph.edges {
            let from = sanitize_id(edge.source.as_str());
            let to = sanitize_id(edge.target.as_str());
            if edge.conditional {
                writeln!(out, "    {from} -. \"filter\" .-> {to}").expect("string write");
            } else {
                writeln!(out, "    {from} --> {to}").expect("string write");
            }
        }
        out
    }
}

/// Replace characters Mermaid cannot use in node identifiers
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
