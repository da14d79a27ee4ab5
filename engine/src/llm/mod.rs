//! Model backend abstraction
//!
//! The target model (during a live replay) and the judge model are both
//! consumed through the [`LLMProvider`] trait: a list of messages and a set of
//! generation parameters in, raw text out. Providers never interpret the
//! output; validation of judge JSON happens in the judge module.
//!
//! Model identifiers take the form `provider/model`, for example
//! `openai/gpt-4.1` or `ollama/llama3.1:8b`, and are resolved by
//! [`provider_for`].

use async_trait::async_trait;
use dossier_sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LLMConfig;

pub mod ollama;
pub mod openai;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Message in a conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// 0.0 asks the backend for the most deterministic output it offers
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// A model backend: prompt in, text out
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Model the provider sends requests to
    fn model(&self) -> &str;

    /// Generate a single completion
    ///
    /// # Arguments
    /// * `messages` - Conversation history including the system prompt
    /// * `params` - Sampling parameters
    ///
    /// # Returns
    /// * `Ok(String)` - The raw completion text
    /// * `Err(LLMError)` - If the request fails
    async fn generate(&self, messages: &[Message], params: &GenerationParams) -> Result<String>;
}

/// Provider prefixes accepted in model identifiers
pub const KNOWN_PROVIDERS: [&str; 2] = ["openai", "ollama"];

/// Split `provider/model` into its two parts
pub fn split_model_id(model_id: &str) -> std::result::Result<(&str, &str), EngineError> {
    let (provider, model) = model_id.split_once('/').ok_or_else(|| {
        EngineError::Config(format!(
            "Model id '{}' must have the form provider/model",
            model_id
        ))
    })?;
    if model.is_empty() {
        return Err(EngineError::Config(format!(
            "Model id '{}' has an empty model name",
            model_id
        )));
    }
    if !KNOWN_PROVIDERS.contains(&provider) {
        return Err(EngineError::Config(format!(
            "Unknown provider '{}' in model id '{}'. Must be one of: {}",
            provider,
            model_id,
            KNOWN_PROVIDERS.join(", ")
        )));
    }
    Ok((provider, model))
}

/// Build the provider for a `provider/model` identifier
///
/// The OpenAI API key is read here, from the environment variable named in
/// the configuration. A missing key is not an error until a request is made,
/// so offline commands keep working.
pub fn provider_for(
    model_id: &str,
    config: &LLMConfig,
) -> std::result::Result<Box<dyn LLMProvider>, EngineError> {
    let (provider, model) = split_model_id(model_id)?;
    match provider {
        "openai" => {
            let api_key = std::env::var(&config.openai.api_key_env)
                .ok()
                .filter(|k| !k.is_empty());
            Ok(Box::new(openai::OpenAIProvider::new(
                config.openai.base_url.clone(),
                model,
                api_key,
            )))
        }
        "ollama" => Ok(Box::new(ollama::OllamaProvider::new(
            config.ollama.base_url.clone(),
            model,
        ))),
        other => Err(EngineError::Config(format!("Unknown provider '{}'", other))),
    }
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
pub(crate) fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
pub(crate) fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let system_msg = Message::system("You are a careful, neutral reviewer.");
        assert_eq!(system_msg.role, MessageRole::System);
        assert_eq!(Message::assistant("Hi").role.to_string(), "assistant");
    }

    #[test]
    fn test_split_model_id() {
        assert_eq!(split_model_id("openai/gpt-4.1").unwrap(), ("openai", "gpt-4.1"));
        assert_eq!(
            split_model_id("ollama/llama3.1:8b").unwrap(),
            ("ollama", "llama3.1:8b")
        );
        assert!(split_model_id("gpt-4.1").is_err());
        assert!(split_model_id("openai/").is_err());
        assert!(split_model_id("mystery/model").is_err());
    }

    #[test]
    fn test_provider_for_resolves_backends() {
        let config = LLMConfig::default();
        let judge = provider_for("openai/gpt-4.1", &config).unwrap();
        assert_eq!(judge.name(), "openai");
        assert_eq!(judge.model(), "gpt-4.1");

        let local = provider_for("ollama/llama3.1:8b", &config).unwrap();
        assert_eq!(local.name(), "ollama");
        assert_eq!(local.model(), "llama3.1:8b");
    }

    #[test]
    fn test_extract_fenced_json() {
        let content = "Here you go:\n```json\n{\"flag\": true}\n```\nThanks";
        assert_eq!(extract_fenced_json(content), Some("{\"flag\": true}\n"));
        assert_eq!(extract_fenced_json("no fence"), None);
    }

    #[test]
    fn test_extract_balanced_json_respects_strings() {
        let s = r#"{"rationale": "uses } inside", "flag": false} trailing"#;
        assert_eq!(
            extract_balanced_json(s),
            Some(r#"{"rationale": "uses } inside", "flag": false}"#)
        );
        assert_eq!(extract_balanced_json("{\"open\": 1"), None);
        assert_eq!(extract_balanced_json("prefix {}"), None);
    }
}
