//! Live replay against the target model

use super::{normalize, select_path};
use crate::config::TargetSettings;
use crate::llm::{GenerationParams, LLMProvider, Message};
use crate::scenario::ConversationTree;
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{Speaker, Transcript};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

/// Walk the selected path, asking the target model for `generated` turns
///
/// User turns and scripted assistant turns are copied literally. For a
/// generated node the model receives the configured system prompt, the
/// conversation so far, and the node text as a trailing system instruction.
/// Each call is made once under the configured timeout; any failure is
/// reported as [`EngineError::BackendUnavailable`] naming the node.
pub async fn replay(
    tree: &ConversationTree,
    branch_label: Option<&str>,
    provider: &dyn LLMProvider,
    settings: &TargetSettings,
) -> Result<Transcript, EngineError> {
    let path = select_path(tree, branch_label)?;
    let mut transcript = Transcript::new(tree.name(), normalize(branch_label).map(str::to_string));
    transcript.label_matched = path.label_matched;

    let params = GenerationParams {
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
    };

    for node_id in &path.node_ids {
        let Some(node) = tree.node(node_id) else {
            continue;
        };

        let text = if node.generated {
            let messages = conversation(&transcript, &settings.system_prompt, &node.text);
            let started = std::time::Instant::now();

            let result = timeout(
                Duration::from_secs(settings.timeout_secs),
                provider.generate(&messages, &params),
            )
            .await;

            let text = match result {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    error!(node_id = %node_id, "Target model call failed: {}", e);
                    return Err(EngineError::BackendUnavailable {
                        node_id: node_id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    error!(node_id = %node_id, "Target model call timed out after {}s", settings.timeout_secs);
                    return Err(EngineError::BackendUnavailable {
                        node_id: node_id.clone(),
                        reason: format!("timed out after {}s", settings.timeout_secs),
                    });
                }
            };

            if text.trim().is_empty() {
                return Err(EngineError::BackendUnavailable {
                    node_id: node_id.clone(),
                    reason: "target model returned an empty completion".to_string(),
                });
            }

            info!(
                node_id = %node_id,
                model = %provider.model(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generated target turn"
            );
            text
        } else {
            node.text.clone()
        };

        transcript.push(node.speaker, node.phase, node_id.clone(), text);
    }

    Ok(transcript)
}

/// Messages sent to the target model for the next generated turn
fn conversation(transcript: &Transcript, system_prompt: &str, instruction: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(transcript.len() + 2);
    if !system_prompt.trim().is_empty() {
        messages.push(Message::system(system_prompt));
    }
    for turn in transcript.turns() {
        messages.push(match turn.speaker {
            Speaker::User => Message::user(turn.text.clone()),
            Speaker::Assistant => Message::assistant(turn.text.clone()),
        });
    }
    if !instruction.trim().is_empty() {
        messages.push(Message::system(instruction));
    }
    messages
}
