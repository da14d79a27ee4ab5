//! Artifact data model
//!
//! Every artifact a run produces is a plain value defined here: the
//! transcript, the feature matches anchored to it, and the validated judge
//! verdict. `turn_index` is the only identifier downstream artifacts use to
//! refer back into the transcript.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Who produced a turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// Scripted user utterance
    User,
    /// Reply of the target model (scripted or generated)
    Assistant,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Conversational stage a turn belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Orientation,
    Clarification,
    ProceduralFollowUp,
    RelationalCue,
    ContinuationRequest,
}

impl Phase {
    /// Snake case name as it appears in scenario files
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Orientation => "orientation",
            Phase::Clarification => "clarification",
            Phase::ProceduralFollowUp => "procedural_follow_up",
            Phase::RelationalCue => "relational_cue",
            Phase::ContinuationRequest => "continuation_request",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn of a transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    /// 0-based position in the transcript
    pub turn_index: usize,
    pub speaker: Speaker,
    pub phase: Phase,
    /// Scenario node this turn was produced from
    pub node_id: String,
    /// Literal text of the turn
    pub text: String,
}

/// Ordered, gapless sequence of turns produced by one run
///
/// Turns can only be appended through [`Transcript::push`], which assigns the
/// next index, so `turn_index` values are always exactly `0..len`.
/// Deserialization re-checks the same invariant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawTranscript")]
pub struct Transcript {
    /// Scenario the transcript was walked from
    pub scenario: String,
    /// Branch label requested for the run (`None` means default path)
    pub branch_label: Option<String>,
    /// Whether the branch label selected at least one edge
    pub label_matched: bool,
    turns: Vec<Turn>,
}

#[derive(Deserialize)]
struct RawTranscript {
    scenario: String,
    branch_label: Option<String>,
    #[serde(default)]
    label_matched: bool,
    turns: Vec<Turn>,
}

impl TryFrom<RawTranscript> for Transcript {
    type Error = EngineError;

    fn try_from(raw: RawTranscript) -> Result<Self, Self::Error> {
        let mut transcript = Transcript::new(raw.scenario, raw.branch_label);
        transcript.label_matched = raw.label_matched;
        transcript.extend_checked(raw.turns)?;
        Ok(transcript)
    }
}

impl Transcript {
    /// Create an empty transcript
    pub fn new(scenario: impl Into<String>, branch_label: Option<String>) -> Self {
        Self {
            scenario: scenario.into(),
            branch_label,
            label_matched: false,
            turns: Vec::new(),
        }
    }

    /// Append a turn, assigning the next turn index
    pub fn push(
        &mut self,
        speaker: Speaker,
        phase: Phase,
        node_id: impl Into<String>,
        text: impl Into<String>,
    ) -> usize {
        let turn_index = self.turns.len();
        self.turns.push(Turn {
            turn_index,
            speaker,
            phase,
            node_id: node_id.into(),
            text: text.into(),
        });
        turn_index
    }

    /// Append already indexed turns, rejecting gaps and repeats
    pub fn extend_checked(&mut self, turns: Vec<Turn>) -> Result<(), EngineError> {
        for turn in turns {
            if turn.turn_index != self.turns.len() {
                return Err(EngineError::Serialization(format!(
                    "expected turn_index {} but found {}",
                    self.turns.len(),
                    turn.turn_index
                )));
            }
            self.turns.push(turn);
        }
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, turn_index: usize) -> Option<&Turn> {
        self.turns.get(turn_index)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Check that `excerpt` is a literal substring of the given turn
    pub fn contains_excerpt(&self, turn_index: usize, excerpt: &str) -> bool {
        self.get(turn_index)
            .map(|turn| !excerpt.is_empty() && turn.text.contains(excerpt))
            .unwrap_or(false)
    }
}

/// Evidentiary pattern categories, in declaration order
///
/// The derived ordering is the declaration order and is used to order
/// matches within a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    EmotionalAcknowledgement,
    InvitationToContinue,
    ProceduralGuidance,
    ContinuedEngagementOffer,
}

impl FeatureCategory {
    /// All categories in declaration order
    pub const ALL: [FeatureCategory; 4] = [
        FeatureCategory::EmotionalAcknowledgement,
        FeatureCategory::InvitationToContinue,
        FeatureCategory::ProceduralGuidance,
        FeatureCategory::ContinuedEngagementOffer,
    ];

    /// Snake case identifier used in artifacts and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::EmotionalAcknowledgement => "emotional_acknowledgement",
            FeatureCategory::InvitationToContinue => "invitation_to_continue",
            FeatureCategory::ProceduralGuidance => "procedural_guidance",
            FeatureCategory::ContinuedEngagementOffer => "continued_engagement_offer",
        }
    }

    /// Human readable label used in memos
    pub fn label(&self) -> &'static str {
        match self {
            FeatureCategory::EmotionalAcknowledgement => "emotional acknowledgement",
            FeatureCategory::InvitationToContinue => "invitation to continue",
            FeatureCategory::ProceduralGuidance => "procedural guidance",
            FeatureCategory::ContinuedEngagementOffer => "offer of continued engagement",
        }
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One located evidentiary pattern
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureMatch {
    pub category: FeatureCategory,
    pub turn_index: usize,
    /// Literal contiguous substring of the turn text
    pub excerpt: String,
    /// Byte offset of `excerpt` within the turn text
    pub offset: usize,
    /// The phrase that triggered the match, as it appears in the text
    pub matched: String,
    pub rationale: String,
}

/// Validated verdict of the external judge model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JudgeVerdict {
    pub flag: bool,
    pub rationale: String,
    pub cited_turns: BTreeSet<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transcript {
        let mut t = Transcript::new("demo", None);
        t.push(Speaker::User, Phase::Orientation, "u1", "Hello there");
        t.push(
            Speaker::Assistant,
            Phase::Orientation,
            "a1",
            "That's understandable.",
        );
        t
    }

    #[test]
    fn test_push_assigns_gapless_indices() {
        let t = sample();
        let indices: Vec<usize> = t.turns().iter().map(|turn| turn.turn_index).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_contains_excerpt() {
        let t = sample();
        assert!(t.contains_excerpt(1, "understandable"));
        assert!(!t.contains_excerpt(1, "Understandable"));
        assert!(!t.contains_excerpt(5, "Hello"));
        assert!(!t.contains_excerpt(0, ""));
    }

    #[test]
    fn test_transcript_json_round_trip() {
        let t = sample();
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn test_deserialize_rejects_index_gap() {
        let json = r#"{
            "scenario": "demo",
            "branch_label": null,
            "turns": [
                {"turn_index": 0, "speaker": "user", "phase": "orientation", "node_id": "u1", "text": "a"},
                {"turn_index": 2, "speaker": "assistant", "phase": "orientation", "node_id": "a1", "text": "b"}
            ]
        }"#;
        let result: Result<Transcript, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_category_order_is_declaration_order() {
        let mut sorted = FeatureCategory::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, FeatureCategory::ALL.to_vec());
    }

    #[test]
    fn test_phase_serialization() {
        let json = serde_json::to_string(&Phase::ProceduralFollowUp).unwrap();
        assert_eq!(json, "\"procedural_follow_up\"");
        assert_eq!(Phase::RelationalCue.to_string(), "relational_cue");
    }
}
