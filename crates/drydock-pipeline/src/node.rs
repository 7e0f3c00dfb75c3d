//! Pipeline tree and step node definitions.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// Category of a step node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Long-lived sidecar attached to the job network.
    Service,

    /// Generic one-shot scripted step.
    Integration,

    /// Direct image build from the workspace.
    Build,

    /// Hook before the main build.
    PreBuild,

    /// Hook after the main build.
    PostBuild,
}

impl NodeType {
    /// Every step category, in declaration order.
    pub const ALL: [NodeType; 5] = [
        NodeType::Service,
        NodeType::Integration,
        NodeType::Build,
        NodeType::PreBuild,
        NodeType::PostBuild,
    ];

    /// Get the node type name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::Service => "service",
            NodeType::Integration => "integration",
            NodeType::Build => "build",
            NodeType::PreBuild => "pre_build",
            NodeType::PostBuild => "post_build",
        }
    }

    fn bit(self) -> u8 {
        match self {
            NodeType::Service => 1 << 0,
            NodeType::Integration => 1 << 1,
            NodeType::Build => 1 << 2,
            NodeType::PreBuild => 1 << 3,
            NodeType::PostBuild => 1 << 4,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NodeType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.name() == s.trim())
            .ok_or_else(|| PipelineError::UnknownNodeType(s.to_string()))
    }
}

/// Set of step categories selected for a run.
///
/// The empty set is "no restriction": every category runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeTypes(u8);

impl NodeTypes {
    /// No selection (run everything).
    pub const fn empty() -> Self {
        NodeTypes(0)
    }

    /// Every category selected explicitly.
    pub fn all() -> Self {
        NodeType::ALL.into_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, node_type: NodeType) -> bool {
        self.0 & node_type.bit() != 0
    }

    pub fn insert(&mut self, node_type: NodeType) {
        self.0 |= node_type.bit();
    }

    /// Whether a node of `node_type` is selected under these flags.
    pub fn selects(&self, node_type: NodeType) -> bool {
        self.is_empty() || self.contains(node_type)
    }

    /// Iterate the selected categories in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = NodeType> + '_ {
        NodeType::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl From<NodeType> for NodeTypes {
    fn from(node_type: NodeType) -> Self {
        NodeTypes(node_type.bit())
    }
}

impl FromIterator<NodeType> for NodeTypes {
    fn from_iter<I: IntoIterator<Item = NodeType>>(iter: I) -> Self {
        let mut set = NodeTypes::empty();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

impl BitOr for NodeTypes {
    type Output = NodeTypes;

    fn bitor(self, rhs: NodeTypes) -> NodeTypes {
        NodeTypes(self.0 | rhs.0)
    }
}

impl BitOr<NodeType> for NodeTypes {
    type Output = NodeTypes;

    fn bitor(self, rhs: NodeType) -> NodeTypes {
        NodeTypes(self.0 | rhs.bit())
    }
}

impl BitOr for NodeType {
    type Output = NodeTypes;

    fn bitor(self, rhs: NodeType) -> NodeTypes {
        NodeTypes(self.bit() | rhs.bit())
    }
}

impl BitOrAssign<NodeType> for NodeTypes {
    fn bitor_assign(&mut self, rhs: NodeType) {
        self.insert(rhs);
    }
}

/// Parses a comma separated list such as `"service,post_build"`.
/// An empty string is the empty set.
impl FromStr for NodeTypes {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(NodeType::from_str)
            .collect()
    }
}

impl fmt::Display for NodeTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|t| t.name()).collect();
        f.write_str(&names.join(","))
    }
}

/// Configuration carried by a step node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StepNode {
    /// Step name. For services this is the alias on the job network.
    pub name: String,

    /// Image reference the step runs in.
    pub image: String,

    /// Directory of the Dockerfile, relative to the build context.
    pub dockerfile_path: String,

    /// Dockerfile file name.
    pub dockerfile_name: String,

    /// Shell commands, executed in order as one script.
    pub commands: Vec<String>,

    /// Paths inside the container to capture after the step.
    pub outputs: Vec<String>,

    /// Extra environment passed to the container.
    pub environment: BTreeMap<String, String>,
}

impl StepNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_dockerfile(mut self, path: impl Into<String>, name: impl Into<String>) -> Self {
        self.dockerfile_path = path.into();
        self.dockerfile_name = name.into();
        self
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Whether a Dockerfile path or name is declared.
    pub fn has_dockerfile(&self) -> bool {
        !self.dockerfile_path.is_empty() || !self.dockerfile_name.is_empty()
    }

    /// True when neither an image nor a Dockerfile is declared.
    pub fn lacks_image_config(&self) -> bool {
        self.image.is_empty() && !self.has_dockerfile()
    }
}

/// Ordered group of child nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListNode {
    pub nodes: Vec<Node>,
}

/// A node of the pipeline tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    List(ListNode),
    Service(StepNode),
    Integration(StepNode),
    Build(StepNode),
    PreBuild(StepNode),
    PostBuild(StepNode),
}

impl Node {
    /// Build a list node from children.
    pub fn list(nodes: Vec<Node>) -> Self {
        Node::List(ListNode { nodes })
    }

    /// Wrap a step in the variant for `node_type`.
    pub fn step(node_type: NodeType, step: StepNode) -> Self {
        match node_type {
            NodeType::Service => Node::Service(step),
            NodeType::Integration => Node::Integration(step),
            NodeType::Build => Node::Build(step),
            NodeType::PreBuild => Node::PreBuild(step),
            NodeType::PostBuild => Node::PostBuild(step),
        }
    }

    /// Step category, or `None` for list nodes.
    pub fn node_type(&self) -> Option<NodeType> {
        match self {
            Node::List(_) => None,
            Node::Service(_) => Some(NodeType::Service),
            Node::Integration(_) => Some(NodeType::Integration),
            Node::Build(_) => Some(NodeType::Build),
            Node::PreBuild(_) => Some(NodeType::PreBuild),
            Node::PostBuild(_) => Some(NodeType::PostBuild),
        }
    }

    /// Step payload, or `None` for list nodes.
    pub fn as_step(&self) -> Option<&StepNode> {
        match self {
            Node::List(_) => None,
            Node::Service(step)
            | Node::Integration(step)
            | Node::Build(step)
            | Node::PreBuild(step)
            | Node::PostBuild(step) => Some(step),
        }
    }
}

/// Parsed pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tree {
    pub root: Node,
}

impl Tree {
    pub fn new(root: Node) -> Self {
        Self { root }
    }

    /// Load a tree from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Count step nodes (list nodes excluded).
    pub fn step_count(&self) -> usize {
        fn count(node: &Node) -> usize {
            match node {
                Node::List(list) => list.nodes.iter().map(count).sum(),
                _ => 1,
            }
        }
        count(&self.root)
    }
}
