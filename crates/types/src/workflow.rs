//! Authoring schema for workflow documents shared by the engine and the CLI.
//!
//! A workflow document is a flat, ordered list of node objects. Each node carries an
//! `id`, a `type` tag, optional jump targets (`next`, `trueNext`, `falseNext`) and an
//! open set of type-specific properties. The models here only capture the raw shape;
//! structural checks (unique ids, declared targets, back-references) live in the
//! engine parser.

use std::{fmt, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;

pub mod properties;

/// Reserved jump target that terminates the run.
pub const END_TARGET: &str = "end";

/// A single authored workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    /// Human-readable workflow name.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Identifier of the entry node. Defaults to the first declared node.
    #[serde(default)]
    pub start_node: Option<String>,
    /// Nodes in declaration order.
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
}

/// A document bundling several named workflows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowBundleDocument {
    /// Workflows keyed by name, preserving authoring order.
    pub workflows: IndexMap<String, WorkflowDocument>,
}

/// Raw node as authored, before templating or validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Unique node identifier. Generated from the declaration position when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Node type tag, for example `set` or `drive-read`.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Explicit successor for non-branching nodes.
    #[serde(default)]
    pub next: Option<String>,
    /// Target taken when an `if`/`while` condition holds.
    #[serde(default)]
    pub true_next: Option<String>,
    /// Target taken when an `if`/`while` condition fails.
    #[serde(default)]
    pub false_next: Option<String>,
    /// Canvas layout metadata. Ignored by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<YamlValue>,
    /// Remaining type-specific properties.
    #[serde(flatten)]
    pub properties: IndexMap<String, YamlValue>,
}

/// Closed set of node type tags understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Variable,
    Set,
    If,
    While,
    Sleep,
    Command,
    Http,
    Json,
    DriveFile,
    DriveRead,
    DriveSearch,
    DriveList,
    DriveFolderList,
    DriveSave,
    Preview,
    Dialog,
    PromptValue,
    PromptFile,
    PromptSelection,
    Workflow,
    Mcp,
    RagSync,
}

impl NodeType {
    /// Every supported tag, in catalogue order.
    pub const ALL: [NodeType; 22] = [
        NodeType::Variable,
        NodeType::Set,
        NodeType::If,
        NodeType::While,
        NodeType::Sleep,
        NodeType::Command,
        NodeType::Http,
        NodeType::Json,
        NodeType::DriveFile,
        NodeType::DriveRead,
        NodeType::DriveSearch,
        NodeType::DriveList,
        NodeType::DriveFolderList,
        NodeType::DriveSave,
        NodeType::Preview,
        NodeType::Dialog,
        NodeType::PromptValue,
        NodeType::PromptFile,
        NodeType::PromptSelection,
        NodeType::Workflow,
        NodeType::Mcp,
        NodeType::RagSync,
    ];

    /// Returns the authoring tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Variable => "variable",
            NodeType::Set => "set",
            NodeType::If => "if",
            NodeType::While => "while",
            NodeType::Sleep => "sleep",
            NodeType::Command => "command",
            NodeType::Http => "http",
            NodeType::Json => "json",
            NodeType::DriveFile => "drive-file",
            NodeType::DriveRead => "drive-read",
            NodeType::DriveSearch => "drive-search",
            NodeType::DriveList => "drive-list",
            NodeType::DriveFolderList => "drive-folder-list",
            NodeType::DriveSave => "drive-save",
            NodeType::Preview => "preview",
            NodeType::Dialog => "dialog",
            NodeType::PromptValue => "prompt-value",
            NodeType::PromptFile => "prompt-file",
            NodeType::PromptSelection => "prompt-selection",
            NodeType::Workflow => "workflow",
            NodeType::Mcp => "mcp",
            NodeType::RagSync => "rag-sync",
        }
    }

    /// Branching nodes select their successor through `trueNext`/`falseNext`.
    pub fn is_branching(&self) -> bool {
        matches!(self, NodeType::If | NodeType::While)
    }

    /// Interactive nodes may suspend the run waiting for a human answer.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            NodeType::Dialog | NodeType::PromptValue | NodeType::PromptFile | NodeType::PromptSelection
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a type tag is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownNodeType(pub String);

impl fmt::Display for UnknownNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node type '{}'", self.0)
    }
}

impl std::error::Error for UnknownNodeType {}

impl FromStr for NodeType {
    type Err = UnknownNodeType;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let trimmed = tag.trim();
        NodeType::ALL
            .iter()
            .copied()
            .find(|candidate| candidate.as_str() == trimmed)
            .ok_or_else(|| UnknownNodeType(trimmed.to_string()))
    }
}
