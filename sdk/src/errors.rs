//! Error types and handling
//!
//! This module provides the single error taxonomy used throughout the dossier
//! engine. Every variant carries the offending identifier (node id, turn index,
//! or a fragment of the raw judge payload) so a failed run can be diagnosed
//! from the error alone.
//!
//! All errors implement the `DossierErrorExt` trait which provides operator
//! hints and indicates whether retrying the same step can help.

use thiserror::Error;

/// Maximum number of characters of an untrusted payload kept inside an error
pub const PAYLOAD_FRAGMENT_LIMIT: usize = 200;

/// Trait for dossier error extensions
pub trait DossierErrorExt {
    /// Returns a short hint for the operator
    ///
    /// The hint never contains API keys or raw model output.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors may succeed if the same step is attempted again with
    /// identical inputs (for example a judge call that timed out). Structural
    /// errors require fixing the scenario or the configuration.
    fn is_recoverable(&self) -> bool;
}

/// Pipeline stage an error belongs to
///
/// The run orchestrator uses the stage to decide how far an error propagates:
/// scenario and traversal errors abort the run before any artifact exists,
/// judge errors only abort the judge and memo steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Scenario definition could not be loaded
    Scenario,
    /// Branch selection or transcript construction failed
    Traversal,
    /// Judge output failed validation
    Judge,
    /// A model backend could not be reached
    Transport,
    /// Memo citations could not be verified
    Memo,
    /// Invalid configuration
    Config,
    /// Reading or writing artifacts failed
    Io,
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Scenario**: `Schema`, `DuplicateNodeId`, `UnreachableNode`
/// - **Traversal**: `UnknownBranchLabel`, `TraversalDepthExceeded`
/// - **Judge validation**: `JudgeFormat`, `JudgeCitation`
/// - **Transport**: `JudgeUnavailable`, `BackendUnavailable`
/// - **Memo**: `CitationMismatch`
///
/// # Examples
///
/// ```
/// use dossier_sdk::errors::{DossierErrorExt, EngineError, ErrorStage};
///
/// let error = EngineError::UnreachableNode("a9".to_string());
/// assert_eq!(error.stage(), ErrorStage::Scenario);
/// assert!(!error.is_recoverable());
///
/// let transient = EngineError::JudgeUnavailable("timed out after 60s".to_string());
/// assert!(transient.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Scenario errors
    #[error("Schema error at node '{node_id}': {reason}")]
    Schema { node_id: String, reason: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Node not reachable from root: {0}")]
    UnreachableNode(String),

    // Traversal errors
    #[error("No edge for branch label '{label}' and no default at node '{node_id}'")]
    UnknownBranchLabel { node_id: String, label: String },

    #[error("Traversal exceeded {limit} steps at node '{node_id}'")]
    TraversalDepthExceeded { node_id: String, limit: usize },

    // Judge validation errors
    #[error("Judge output rejected: {reason} (payload: {payload})")]
    JudgeFormat { reason: String, payload: String },

    #[error("Judge cited turn {turn} but the transcript has {transcript_len} turns")]
    /// `turn` is the value as sent, which may exceed any machine index
    JudgeCitation { turn: i128, transcript_len: usize },

    // Transport errors
    #[error("Judge model unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("Target model unavailable while generating node '{node_id}': {reason}")]
    BackendUnavailable { node_id: String, reason: String },

    // Memo errors
    #[error("Citation for turn {turn_index} cannot be verified: {reason}")]
    CitationMismatch { turn_index: usize, reason: String },

    // Artifact errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build a schema error for a specific node
    pub fn schema(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Build a judge format error, keeping only a bounded fragment of the payload
    pub fn judge_format(reason: impl Into<String>, payload: &str) -> Self {
        Self::JudgeFormat {
            reason: reason.into(),
            payload: payload_fragment(payload),
        }
    }

    /// Pipeline stage this error belongs to
    pub fn stage(&self) -> ErrorStage {
        match self {
            Self::Config(_) => ErrorStage::Config,
            Self::Schema { .. } | Self::DuplicateNodeId(_) | Self::UnreachableNode(_) => {
                ErrorStage::Scenario
            }
            Self::UnknownBranchLabel { .. } | Self::TraversalDepthExceeded { .. } => {
                ErrorStage::Traversal
            }
            Self::JudgeFormat { .. } | Self::JudgeCitation { .. } => ErrorStage::Judge,
            Self::JudgeUnavailable(_) | Self::BackendUnavailable { .. } => ErrorStage::Transport,
            Self::CitationMismatch { .. } => ErrorStage::Memo,
            Self::Serialization(_) | Self::Io(_) => ErrorStage::Io,
        }
    }

    /// True for errors raised while validating untrusted judge output
    pub fn is_judge_rejection(&self) -> bool {
        self.stage() == ErrorStage::Judge
    }
}

impl DossierErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",

            Self::Schema { .. } => "Fix the scenario definition at the named node",
            Self::DuplicateNodeId(_) => "Every scenario node needs a unique id",
            Self::UnreachableNode(_) => "Connect the node to the tree or remove it",

            Self::UnknownBranchLabel { .. } => {
                "Use a branch label declared in the scenario or mark a default edge"
            }
            Self::TraversalDepthExceeded { .. } => "The scenario graph is malformed",

            Self::JudgeFormat { .. } => "The judge model did not follow the JSON schema",
            Self::JudgeCitation { .. } => "The judge model cited a turn that does not exist",

            Self::JudgeUnavailable(_) => {
                "Judge model unreachable. Check your API keys and network, then rejudge"
            }
            Self::BackendUnavailable { .. } => {
                "Target model unreachable. Check your API keys and network"
            }

            Self::CitationMismatch { .. } => "Memo evidence does not match the transcript",

            Self::Serialization(_) => "Artifact could not be encoded or decoded",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::JudgeUnavailable(_) | Self::BackendUnavailable { .. } | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Truncate an untrusted payload to a bounded, single-line fragment
pub fn payload_fragment(payload: &str) -> String {
    let flat: String = payload
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = flat.trim();

    if trimmed.chars().count() <= PAYLOAD_FRAGMENT_LIMIT {
        trimmed.to_string()
    } else {
        let head: String = trimmed.chars().take(PAYLOAD_FRAGMENT_LIMIT).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_classification() {
        assert_eq!(
            EngineError::schema("u1", "missing text").stage(),
            ErrorStage::Scenario
        );
        assert_eq!(
            EngineError::DuplicateNodeId("u1".into()).stage(),
            ErrorStage::Scenario
        );
        assert_eq!(
            EngineError::UnknownBranchLabel {
                node_id: "u2".into(),
                label: "x".into()
            }
            .stage(),
            ErrorStage::Traversal
        );
        assert_eq!(
            EngineError::JudgeCitation {
                turn: 999,
                transcript_len: 5
            }
            .stage(),
            ErrorStage::Judge
        );
        assert_eq!(
            EngineError::JudgeUnavailable("timeout".into()).stage(),
            ErrorStage::Transport
        );
    }

    #[test]
    fn test_judge_rejection_is_distinct_from_unavailable() {
        assert!(EngineError::judge_format("missing flag", "{}").is_judge_rejection());
        assert!(!EngineError::JudgeUnavailable("down".into()).is_judge_rejection());
    }

    #[test]
    fn test_payload_fragment_is_bounded() {
        let long = "x".repeat(1000);
        let fragment = payload_fragment(&long);
        assert_eq!(fragment.chars().count(), PAYLOAD_FRAGMENT_LIMIT + 3);
        assert!(fragment.ends_with("..."));
    }

    #[test]
    fn test_payload_fragment_flattens_newlines() {
        assert_eq!(payload_fragment("{\n  \"flag\": 1\n}"), "{   \"flag\": 1 }");
    }

    #[test]
    fn test_error_messages_carry_identifiers() {
        let err = EngineError::TraversalDepthExceeded {
            node_id: "a3".into(),
            limit: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("a3"));
        assert!(msg.contains('7'));
    }
}
