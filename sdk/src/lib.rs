//! Dossier SDK
//!
//! Shared library providing the artifact data model and the error taxonomy.
//! This crate is used by the engine and by anything that reads run artifacts.

/// Error types and handling
pub mod errors;

/// Artifact data model
pub mod types;

// Re-export commonly used types
pub use errors::{DossierErrorExt, EngineError, ErrorStage};
pub use types::{FeatureCategory, FeatureMatch, JudgeVerdict, Phase, Speaker, Transcript, Turn};
