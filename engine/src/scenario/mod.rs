//! Conversation tree model
//!
//! A scenario is a declarative YAML document describing the scripted turns of
//! a conversation and the labelled edges between them. Loading validates every
//! structural invariant once, so the rest of the engine can treat a
//! [`ConversationTree`] as a read-only value:
//!
//! - exactly one root: the first node, which has no incoming edges
//! - every node reachable from the root, no cycles
//! - unique node ids, unique branch labels per node, no dangling edges
//! - every non-leaf node has exactly one default edge
//! - every leaf is a `continuation_request` or explicitly `terminal`
//!
//! # Example
//!
//! ```
//! use dossier_engine::scenario::ConversationTree;
//!
//! let yaml = r#"
//! scenario:
//!   name: tiny
//!   nodes:
//!     - { id: u1, speaker: user, phase: orientation, text: "Hi", next: a1 }
//!     - { id: a1, speaker: assistant, phase: continuation_request, text: "Hello" }
//! "#;
//!
//! let tree = ConversationTree::from_yaml_str(yaml).unwrap();
//! assert_eq!(tree.root().node_id, "u1");
//! assert_eq!(tree.len(), 2);
//! ```

use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{Phase, Speaker};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

/// Label given to the edge created by the `next:` shorthand
pub const NEXT_LABEL: &str = "next";

/// Identifier used in errors that concern the document as a whole
const DOCUMENT_ID: &str = "<scenario>";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDocument {
    scenario: RawScenario,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawScenario {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNode {
    id: String,
    speaker: Speaker,
    phase: Phase,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    branches: Vec<RawBranch>,
    #[serde(default)]
    generated: bool,
    #[serde(default)]
    terminal: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBranch {
    label: String,
    next: String,
    #[serde(default)]
    default: bool,
}

/// Labelled edge from a node to one of its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub label: String,
    pub target: String,
    pub is_default: bool,
}

/// A single scripted turn of the scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationNode {
    pub node_id: String,
    pub speaker: Speaker,
    pub phase: Phase,
    /// Literal utterance, or the prompt template of a generated node
    pub text: String,
    /// The target model produces this turn during a live replay
    pub generated: bool,
    /// Leaf explicitly allowed to end outside `continuation_request`
    pub terminal: bool,
    /// Ordered edges to child nodes, empty at leaves
    pub children: Vec<Edge>,
}

impl ConversationNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Edge whose label equals `label`, if any
    pub fn child_for(&self, label: &str) -> Option<&Edge> {
        self.children.iter().find(|edge| edge.label == label)
    }

    /// The designated default edge
    pub fn default_edge(&self) -> Option<&Edge> {
        self.children.iter().find(|edge| edge.is_default)
    }
}

/// Validated, immutable scenario graph
#[derive(Debug, Clone)]
pub struct ConversationTree {
    name: String,
    description: Option<String>,
    nodes: Vec<ConversationNode>,
    index: HashMap<String, usize>,
    root: usize,
}

impl ConversationTree {
    /// Load and validate a scenario file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        let tree = Self::from_yaml_str(&contents)?;
        tracing::info!(
            scenario = %tree.name,
            nodes = tree.len(),
            path = %path.display(),
            "Loaded scenario"
        );
        Ok(tree)
    }

    /// Parse and validate a scenario document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, EngineError> {
        let document: ScenarioDocument = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::schema(DOCUMENT_ID, e.to_string()))?;
        Self::from_raw(document.scenario)
    }

    fn from_raw(raw: RawScenario) -> Result<Self, EngineError> {
        if raw.name.trim().is_empty() {
            return Err(EngineError::schema(DOCUMENT_ID, "scenario name is empty"));
        }
        if raw.nodes.is_empty() {
            return Err(EngineError::schema(DOCUMENT_ID, "scenario has no nodes"));
        }

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        let mut index = HashMap::with_capacity(raw.nodes.len());

        for raw_node in raw.nodes {
            if index.contains_key(&raw_node.id) {
                return Err(EngineError::DuplicateNodeId(raw_node.id));
            }
            let node = build_node(raw_node)?;
            index.insert(node.node_id.clone(), nodes.len());
            nodes.push(node);
        }

        let root = validate_structure(&nodes, &index)?;

        Ok(Self {
            name: raw.name,
            description: raw.description,
            nodes,
            index,
            root,
        })
    }

    /// Build a tree without structural validation
    #[cfg(test)]
    pub(crate) fn from_nodes_unchecked(
        name: &str,
        nodes: Vec<ConversationNode>,
        root_id: &str,
    ) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id.clone(), i))
            .collect();
        let root = index.get(root_id).copied().unwrap_or(0);
        Self {
            name: name.to_string(),
            description: None,
            nodes,
            index,
            root,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn root(&self) -> &ConversationNode {
        &self.nodes[self.root]
    }

    pub fn node(&self, node_id: &str) -> Option<&ConversationNode> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    /// Nodes in document order
    pub fn nodes(&self) -> &[ConversationNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True if any node must be produced by the target model
    pub fn has_generated_nodes(&self) -> bool {
        self.nodes.iter().any(|n| n.generated)
    }

    /// Every branch label declared in the scenario, sorted
    pub fn branch_labels(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .flat_map(|n| n.children.iter())
            .filter(|edge| edge.label != NEXT_LABEL)
            .map(|edge| edge.label.as_str())
            .collect()
    }
}

/// Per-node checks that need no knowledge of the rest of the graph
fn build_node(raw: RawNode) -> Result<ConversationNode, EngineError> {
    let id = raw.id;

    if id.trim().is_empty() {
        return Err(EngineError::schema(DOCUMENT_ID, "node with empty id"));
    }

    let text = match raw.text {
        Some(text) if !text.trim().is_empty() => text,
        _ => return Err(EngineError::schema(&id, "missing text")),
    };

    if raw.generated && raw.speaker != Speaker::Assistant {
        return Err(EngineError::schema(
            &id,
            "only assistant nodes can be generated",
        ));
    }

    let children = match (raw.next, raw.branches.is_empty()) {
        (Some(_), false) => {
            return Err(EngineError::schema(
                &id,
                "node declares both `next` and `branches`",
            ))
        }
        (Some(target), true) => vec![Edge {
            label: NEXT_LABEL.to_string(),
            target,
            is_default: true,
        }],
        (None, true) => Vec::new(),
        (None, false) => build_branches(&id, raw.branches)?,
    };

    if raw.terminal && !children.is_empty() {
        return Err(EngineError::schema(&id, "terminal node has children"));
    }

    Ok(ConversationNode {
        node_id: id,
        speaker: raw.speaker,
        phase: raw.phase,
        text,
        generated: raw.generated,
        terminal: raw.terminal,
        children,
    })
}

fn build_branches(node_id: &str, branches: Vec<RawBranch>) -> Result<Vec<Edge>, EngineError> {
    let mut seen = HashSet::new();
    for branch in &branches {
        if branch.label.trim().is_empty() {
            return Err(EngineError::schema(node_id, "empty branch label"));
        }
        if branch.label == NEXT_LABEL {
            return Err(EngineError::schema(
                node_id,
                format!("branch label '{}' is reserved", NEXT_LABEL),
            ));
        }
        if !seen.insert(branch.label.as_str()) {
            return Err(EngineError::schema(
                node_id,
                format!("duplicate branch label '{}'", branch.label),
            ));
        }
    }

    let defaults = branches.iter().filter(|b| b.default).count();
    let single = branches.len() == 1;
    if !single && defaults != 1 {
        return Err(EngineError::schema(
            node_id,
            format!(
                "branching node needs exactly one default edge, found {}",
                defaults
            ),
        ));
    }

    Ok(branches
        .into_iter()
        .map(|b| Edge {
            is_default: b.default || single,
            label: b.label,
            target: b.next,
        })
        .collect())
}

/// Graph-level checks; returns the index of the root node
///
/// The root is the first node in document order.
fn validate_structure(
    nodes: &[ConversationNode],
    index: &HashMap<String, usize>,
) -> Result<usize, EngineError> {
    const ROOT: usize = 0;

    // Dangling edges
    let mut in_degree = vec![0usize; nodes.len()];
    for node in nodes {
        for edge in &node.children {
            match index.get(&edge.target) {
                Some(&target) => in_degree[target] += 1,
                None => {
                    return Err(EngineError::schema(
                        &node.node_id,
                        format!("edge '{}' points to unknown node '{}'", edge.label, edge.target),
                    ))
                }
            }
        }
    }

    if in_degree[ROOT] != 0 {
        return Err(EngineError::schema(
            &nodes[ROOT].node_id,
            "root node has an incoming edge",
        ));
    }

    // Reachability from the root; any other parentless node shows up here
    let mut reached = vec![false; nodes.len()];
    let mut queue = VecDeque::from([ROOT]);
    reached[ROOT] = true;
    while let Some(current) = queue.pop_front() {
        for edge in &nodes[current].children {
            if let Some(&child) = index.get(&edge.target) {
                if !reached[child] {
                    reached[child] = true;
                    queue.push_back(child);
                }
            }
        }
    }
    if let Some(unreached) = reached.iter().position(|r| !r) {
        return Err(EngineError::UnreachableNode(
            nodes[unreached].node_id.clone(),
        ));
    }

    if let Some(on_cycle) = find_cycle(nodes, index) {
        return Err(EngineError::schema(
            &nodes[on_cycle].node_id,
            "cycle detected",
        ));
    }

    // Leaves end the conversation
    for node in nodes.iter().filter(|n| n.is_leaf()) {
        if node.phase != Phase::ContinuationRequest && !node.terminal {
            return Err(EngineError::schema(
                &node.node_id,
                format!(
                    "leaf in phase '{}' must be a continuation_request or marked terminal",
                    node.phase
                ),
            ));
        }
    }

    Ok(ROOT)
}

/// Iterative three-colour DFS; returns a node on a cycle, if any
fn find_cycle(nodes: &[ConversationNode], index: &HashMap<String, usize>) -> Option<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];

    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // (node, next child position)
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::InProgress;

        while let Some((current, child_pos)) = stack.pop() {
            let children = &nodes[current].children;
            if child_pos >= children.len() {
                marks[current] = Mark::Done;
                continue;
            }
            stack.push((current, child_pos + 1));

            let Some(&child) = index.get(&children[child_pos].target) else {
                continue;
            };
            match marks[child] {
                Mark::InProgress => return Some(child),
                Mark::Unvisited => {
                    marks[child] = Mark::InProgress;
                    stack.push((child, 0));
                }
                Mark::Done => {}
            }
        }
    }

    None
}
