//! Dossier Engine Library
//!
//! This library provides the evaluation pipeline behind the `dossier`
//! binary: scenario loading, traversal, feature extraction, rule evaluation,
//! the LLM judge, memo rendering and artifact persistence.
//! It is used by both the main binary and integration tests.

/// Conversation tree loading and validation
pub mod scenario;

/// Branch selection, transcript building and live replay
pub mod traversal;

/// Turn-anchored feature extraction
pub mod features;

/// Versioned combination rule
pub mod rules;

/// LLM provider abstraction layer
pub mod llm;

/// Judge prompt and strict verdict validation
pub mod judge;

/// Neutral memo rendering with citations
pub mod memo;

/// Stage orchestration for one run
pub mod pipeline;

/// Run directory persistence
pub mod artifacts;

/// Configuration management module
pub mod config;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
