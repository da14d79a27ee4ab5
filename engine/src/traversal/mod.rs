//! Branch selection and traversal
//!
//! Walks a [`ConversationTree`] from the root to a leaf. At every node with
//! children the edge whose label equals the requested branch label is taken,
//! otherwise the node's default edge. The walk is a pure function of the tree
//! and the label: no clock, no randomness, no model calls.
//!
//! [`replay`] follows the same path but lets the target model produce the
//! turns of `generated` nodes.

mod replay;

pub use replay::replay;

use crate::scenario::{ConversationTree, NEXT_LABEL};
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::Transcript;

/// Path chosen through the tree, root first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPath {
    pub node_ids: Vec<String>,
    /// A non-empty label selected at least one edge
    pub label_matched: bool,
}

/// Treat an empty label the same as no label
fn normalize(branch_label: Option<&str>) -> Option<&str> {
    branch_label.map(str::trim).filter(|l| !l.is_empty())
}

/// Select the path for `branch_label` without producing turns
///
/// The walk is capped at the number of nodes in the tree. A validated tree
/// never reaches the cap; a graph that does raises
/// [`EngineError::TraversalDepthExceeded`].
pub fn select_path(
    tree: &ConversationTree,
    branch_label: Option<&str>,
) -> Result<SelectedPath, EngineError> {
    let label = normalize(branch_label);
    let limit = tree.len();

    let mut node = tree.root();
    let mut node_ids = Vec::new();
    let mut label_matched = false;

    loop {
        if node_ids.len() == limit {
            return Err(EngineError::TraversalDepthExceeded {
                node_id: node.node_id.clone(),
                limit,
            });
        }
        node_ids.push(node.node_id.clone());

        if node.is_leaf() {
            break;
        }

        // Implicit `next:` edges are not branches and never match a label
        let labelled = label
            .filter(|l| *l != NEXT_LABEL)
            .and_then(|l| node.child_for(l));
        let edge = match labelled {
            Some(edge) => {
                label_matched = true;
                edge
            }
            None => node
                .default_edge()
                .ok_or_else(|| EngineError::UnknownBranchLabel {
                    node_id: node.node_id.clone(),
                    label: label.unwrap_or_default().to_string(),
                })?,
        };

        node = tree.node(&edge.target).ok_or_else(|| {
            EngineError::schema(
                node.node_id.clone(),
                format!("edge '{}' points to unknown node '{}'", edge.label, edge.target),
            )
        })?;
    }

    if let Some(l) = label {
        if !label_matched {
            tracing::warn!(
                scenario = %tree.name(),
                branch_label = %l,
                "Branch label matched no edge, default path used throughout"
            );
        }
    }

    Ok(SelectedPath {
        node_ids,
        label_matched,
    })
}

/// Walk the tree and produce the transcript of literal node texts
///
/// `None` and `Some("")` both select the default path. The same tree and
/// label always yield an identical transcript.
pub fn traverse(
    tree: &ConversationTree,
    branch_label: Option<&str>,
) -> Result<Transcript, EngineError> {
    let path = select_path(tree, branch_label)?;
    let mut transcript = Transcript::new(tree.name(), normalize(branch_label).map(str::to_string));
    transcript.label_matched = path.label_matched;

    for node_id in &path.node_ids {
        // select_path only returns ids it resolved through the tree
        if let Some(node) = tree.node(node_id) {
            transcript.push(node.speaker, node.phase, node_id.clone(), node.text.clone());
        }
    }

    tracing::debug!(
        scenario = %tree.name(),
        branch_label = ?transcript.branch_label,
        turns = transcript.len(),
        "Traversed scenario"
    );
    Ok(transcript)
}
