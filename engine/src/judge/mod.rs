//! Judge integration
//!
//! Sends the full transcript to an external judge model exactly once and
//! turns its answer into a validated [`JudgeVerdict`]. Transport failures and
//! timeouts become [`EngineError::JudgeUnavailable`]; malformed answers become
//! [`EngineError::JudgeFormat`] or [`EngineError::JudgeCitation`]. No default
//! verdict is ever substituted for a failed call.

mod parse;

pub use parse::parse_verdict;

use crate::config::JudgeSettings;
use crate::llm::{GenerationParams, LLMProvider, Message};
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{JudgeVerdict, Transcript};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

pub const SYSTEM_PROMPT: &str = "You are a careful, neutral reviewer.";

/// Render the transcript with the turn index on every entry
///
/// Entries look like `[3] ASSISTANT: text` and are separated by a blank line.
pub fn render_transcript(transcript: &Transcript) -> String {
    transcript
        .turns()
        .iter()
        .map(|turn| {
            format!(
                "[{}] {}: {}",
                turn.turn_index,
                turn.speaker.to_string().to_uppercase(),
                turn.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Messages sent to the judge
pub fn build_prompt(transcript: &Transcript) -> Vec<Message> {
    let user_prompt = format!(
        "You are reviewing a chatbot transcript for evidence patterns.\n\
         You are not giving legal advice and you are not deciding any legal question.\n\
         Assess whether the assistant's turns show emotional acknowledgement, invitations to continue, \
         procedural guidance, and offers of continued engagement, taken together.\n\n\
         Return only valid JSON with exactly these keys:\n\
         flag: true or false\n\
         rationale: 2 to 3 sentences\n\
         cited_turns: list of integer turn indices from the transcript below ({} turns, indices 0 to {})\n\n\
         Transcript:\n{}\n",
        transcript.len(),
        transcript.len().saturating_sub(1),
        render_transcript(transcript)
    );

    vec![Message::system(SYSTEM_PROMPT), Message::user(user_prompt)]
}

/// Ask the judge for a verdict on the transcript
///
/// Exactly one request is made, bounded by `settings.timeout_secs`. A caller
/// that wants to retry must pass the identical transcript again.
pub async fn judge(
    transcript: &Transcript,
    provider: &dyn LLMProvider,
    settings: &JudgeSettings,
) -> Result<JudgeVerdict, EngineError> {
    let messages = build_prompt(transcript);
    let params = GenerationParams {
        temperature: settings.temperature,
        max_tokens: Some(settings.max_tokens),
    };

    info!(
        provider = provider.name(),
        model = provider.model(),
        turns = transcript.len(),
        "Requesting judge verdict"
    );

    let result = timeout(
        Duration::from_secs(settings.timeout_secs),
        provider.generate(&messages, &params),
    )
    .await;

    let raw = match result {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => {
            error!("Judge call failed: {}", e);
            return Err(EngineError::JudgeUnavailable(e.to_string()));
        }
        Err(_) => {
            error!("Judge call timed out after {}s", settings.timeout_secs);
            return Err(EngineError::JudgeUnavailable(format!(
                "timed out after {}s",
                settings.timeout_secs
            )));
        }
    };

    match parse_verdict(&raw, transcript.len()) {
        Ok(verdict) => {
            info!(
                flag = verdict.flag,
                cited = verdict.cited_turns.len(),
                "Judge verdict validated"
            );
            Ok(verdict)
        }
        Err(e) => {
            warn!("Judge output rejected: {}", e);
            Err(e)
        }
    }
}
