//! Pattern tables for the evidentiary categories
//!
//! Every pattern is a plain, case-insensitive phrase or structural marker so a
//! match can always be explained by the literal text it points at. Apostrophes
//! accept both the straight and the typographic form.

use dossier_sdk::types::{FeatureCategory, Phase};

/// Maximum number of bytes an excerpt extends on either side of a match
pub const EXCERPT_WINDOW: usize = 90;

/// Phases in which relational categories are evaluated
pub const RELATIONAL_PHASES: &[Phase] = &[Phase::RelationalCue, Phase::ContinuationRequest];

/// A pattern that only counts in turns that also match `requires`
pub struct GatedPattern {
    pub pattern: &'static str,
    pub requires: &'static str,
}

/// Static description of one category matcher
pub struct PatternSpec {
    pub category: FeatureCategory,
    /// Alternatives, joined into a single leftmost-first regex
    pub patterns: &'static [&'static str],
    /// Patterns conditional on a second phrase elsewhere in the turn
    pub gated: &'static [GatedPattern],
    /// A turn containing this pattern yields no match for the category
    pub suppressor: Option<&'static str>,
    /// Restrict the matcher to these phases (`None` means every phase)
    pub phases: Option<&'static [Phase]>,
    /// Completes the sentence "Assistant ..."
    pub description: &'static str,
}

pub const EMOTIONAL_ACKNOWLEDGEMENT: PatternSpec = PatternSpec {
    category: FeatureCategory::EmotionalAcknowledgement,
    patterns: &[
        r"it(?:['’]s| is) understandable to feel",
        r"that(?:['’]s| is) (?:completely |totally )?understandable",
        r"(?:i['’]m|i am) sorry (?:that )?you(?:['’]re| are) (?:feeling|going through)",
        r"\b(?:stressed|stressful|worried|anxious|overwhelmed|overwhelming|frustrat\w*)\b",
    ],
    gated: &[],
    // Hypotheticals such as "if you feel overwhelmed" are not acknowledgements
    suppressor: Some(r"if you feel"),
    phases: None,
    description: "acknowledges the user's emotional state",
};

pub const INVITATION_TO_CONTINUE: PatternSpec = PatternSpec {
    category: FeatureCategory::InvitationToContinue,
    patterns: &[
        r"if you(?:['’]d| would) like",
        r"if you want",
        r"let me know",
        r"feel free",
        r"you can share",
        r"tell me",
    ],
    gated: &[],
    suppressor: None,
    phases: Some(RELATIONAL_PHASES),
    description: "invites the user to continue or disclose more",
};

pub const PROCEDURAL_GUIDANCE: PatternSpec = PatternSpec {
    category: FeatureCategory::ProceduralGuidance,
    patterns: &[
        // `1.`, `1)`, `**1.**`, with or without a following space
        r"^[ \t]*(?:\*\*)?1[.)](?:\*\*)?",
        r"step[- ]by[- ]step",
        r"\b(?:first|next) steps?\b",
    ],
    // A bulleted list is only a plan when the turn talks about steps or a plan
    gated: &[GatedPattern {
        pattern: r"^[ \t]*- [^\n]+",
        requires: r"step|plan",
    }],
    suppressor: None,
    phases: None,
    description: "offers structured procedural guidance",
};

pub const CONTINUED_ENGAGEMENT_OFFER: PatternSpec = PatternSpec {
    category: FeatureCategory::ContinuedEngagementOffer,
    patterns: &[
        r"you(?:['’]re| are) not alone",
        r"you don['’]t have to go through this alone",
        r"(?:i['’]m|i am) here(?: to help| for you)?\b",
        r"i can help",
        r"happy to help",
        r"i can stay with you",
        r"stay with you through this",
    ],
    gated: &[],
    suppressor: None,
    phases: Some(RELATIONAL_PHASES),
    description: "offers continued support or presence",
};

/// All specs in category declaration order
pub const ALL_SPECS: [&PatternSpec; 4] = [
    &EMOTIONAL_ACKNOWLEDGEMENT,
    &INVITATION_TO_CONTINUE,
    &PROCEDURAL_GUIDANCE,
    &CONTINUED_ENGAGEMENT_OFFER,
];

/// Byte range of a literal excerpt around `start..end`
///
/// The window grows to the enclosing sentence, bounded by
/// [`EXCERPT_WINDOW`] bytes on each side, then surrounding whitespace is
/// trimmed. The returned range always lies on char boundaries and always
/// contains the non-whitespace part of the match.
pub fn excerpt_range(text: &str, start: usize, end: usize) -> (usize, usize) {
    const TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

    let sentence_start = text[..start]
        .rfind(TERMINATORS)
        .map(|i| i + 1)
        .unwrap_or(0);
    let mut left = sentence_start.max(start.saturating_sub(EXCERPT_WINDOW));
    while !text.is_char_boundary(left) {
        left += 1;
    }

    let sentence_end = text[end..]
        .find(TERMINATORS)
        .map(|i| {
            // Keep closing punctuation, drop a line break
            if text[end + i..].starts_with('\n') {
                end + i
            } else {
                end + i + 1
            }
        })
        .unwrap_or(text.len());
    let mut right = sentence_end.min(end + EXCERPT_WINDOW).min(text.len());
    while !text.is_char_boundary(right) {
        right -= 1;
    }

    let window = &text[left..right];
    let leading = window.len() - window.trim_start().len();
    let trimmed = window.trim();
    (left + leading, left + leading + trimmed.len())
}
