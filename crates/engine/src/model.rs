//! # Parsed Workflow Model
//!
//! The parser turns an authored [`stepline_types::WorkflowDocument`] into a
//! [`Workflow`]: a node table in declaration order plus a jump table resolved to
//! declaration indices. Nodes are immutable after parsing; the interpreter only ever
//! reads them.
//!
//! ## Jump table
//!
//! Every node carries a [`Jumps`] record:
//!
//! - `next`: explicit `next`, or the following declared node, or [`Target::PastEnd`]
//! - `true_next` / `false_next`: only on `if` / `while`; `false_next` defaults to `next`

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;
use stepline_types::NodeType;

/// Resolved jump destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "index")]
pub enum Target {
    /// Declaration index of a node.
    Node(usize),
    /// The reserved `end` target.
    End,
    /// Fell off the end of the declared order.
    PastEnd,
}

impl Target {
    pub fn node_index(&self) -> Option<usize> {
        match self {
            Target::Node(index) => Some(*index),
            Target::End | Target::PastEnd => None,
        }
    }
}

/// Jump record of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Jumps {
    pub next: Target,
    pub true_next: Option<Target>,
    pub false_next: Option<Target>,
}

impl Jumps {
    /// Destination of a branching node for the given outcome.
    pub fn branch(&self, outcome: bool) -> Target {
        let explicit = if outcome { self.true_next } else { self.false_next };
        explicit.unwrap_or(self.next)
    }
}

/// One declared node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    pub node_type: NodeType,
    /// Raw, untemplated property values.
    pub properties: IndexMap<String, String>,
    pub jumps: Jumps,
}

impl WorkflowNode {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

/// Label of a derived edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Next,
    True,
    False,
}

/// Edge between two declared nodes, derived from the jump table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// A parsed, validated workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub name: String,
    pub description: Option<String>,
    nodes: Vec<WorkflowNode>,
    start: usize,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Workflow {
    /// Assembles a workflow from already validated parts.
    pub(crate) fn from_parts(name: String, description: Option<String>, nodes: Vec<WorkflowNode>, start: usize) -> Self {
        let index = nodes.iter().enumerate().map(|(position, node)| (node.id.clone(), position)).collect();
        Self {
            name,
            description,
            nodes,
            start,
            index,
        }
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&WorkflowNode> {
        self.nodes.get(index)
    }

    pub fn node_by_id(&self, id: &str) -> Option<&WorkflowNode> {
        self.index_of(id).and_then(|position| self.nodes.get(position))
    }

    /// Declaration index of a node id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Declaration index of the entry node.
    pub fn start_index(&self) -> usize {
        self.start
    }

    pub fn start_node(&self) -> Option<&WorkflowNode> {
        self.nodes.get(self.start)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in declaration order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.id.as_str())
    }

    /// Edge list derived from the jump table. Jumps to `end` or past the end carry no edge.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for node in &self.nodes {
            let mut push = |target: Target, kind: EdgeKind| {
                if let Some(destination) = target.node_index().and_then(|position| self.nodes.get(position)) {
                    edges.push(Edge {
                        from: node.id.clone(),
                        to: destination.id.clone(),
                        kind,
                    });
                }
            };
            if node.node_type.is_branching() {
                push(node.jumps.branch(true), EdgeKind::True);
                push(node.jumps.branch(false), EdgeKind::False);
            } else {
                push(node.jumps.next, EdgeKind::Next);
            }
        }
        edges
    }
}
