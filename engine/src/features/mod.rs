//! Turn-anchored feature extraction
//!
//! Scans the assistant turns of a transcript for the four evidentiary
//! categories and emits one [`FeatureMatch`] per located phrase. Matchers are
//! plain case-insensitive regex alternations, so every match is explained by
//! the literal text it quotes.
//!
//! Ordering is fixed: turn index ascending, then category declaration order,
//! then position within the turn. Running the extractor twice over the same
//! transcript yields identical output.
//!
//! # Example
//!
//! ```
//! use dossier_engine::features::FeatureExtractor;
//! use dossier_sdk::types::{FeatureCategory, Phase, Speaker, Transcript};
//!
//! let mut transcript = Transcript::new("demo", None);
//! transcript.push(Speaker::User, Phase::ProceduralFollowUp, "u1", "What do I do?");
//! transcript.push(
//!     Speaker::Assistant,
//!     Phase::ProceduralFollowUp,
//!     "a1",
//!     "Here is a step-by-step outline.",
//! );
//!
//! let extractor = FeatureExtractor::new().unwrap();
//! let matches = extractor.extract(&transcript);
//! assert_eq!(matches.len(), 1);
//! assert_eq!(matches[0].category, FeatureCategory::ProceduralGuidance);
//! assert_eq!(matches[0].turn_index, 1);
//! ```

pub mod patterns;

use dossier_sdk::types::{FeatureCategory, FeatureMatch, Phase, Speaker, Transcript, Turn};
use patterns::{excerpt_range, PatternSpec, ALL_SPECS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Matches kept per category and turn
pub const MAX_MATCHES_PER_TURN: usize = 3;

/// Compiled matcher for one category
struct CategoryMatcher {
    spec: &'static PatternSpec,
    pattern: Regex,
    /// (pattern, required companion) pairs
    gated: Vec<(Regex, Regex)>,
    suppressor: Option<Regex>,
}

impl CategoryMatcher {
    fn compile(spec: &'static PatternSpec) -> anyhow::Result<Self> {
        let alternation = spec
            .patterns
            .iter()
            .map(|p| format!("(?:{})", p))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!("(?im){}", alternation))?;
        let gated = spec
            .gated
            .iter()
            .map(|g| {
                Ok((
                    Regex::new(&format!("(?im){}", g.pattern))?,
                    Regex::new(&format!("(?i){}", g.requires))?,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let suppressor = match spec.suppressor {
            Some(s) => Some(Regex::new(&format!("(?i){}", s))?),
            None => None,
        };
        Ok(Self {
            spec,
            pattern,
            gated,
            suppressor,
        })
    }

    fn applies_to(&self, phase: Phase) -> bool {
        self.spec
            .phases
            .map(|phases| phases.contains(&phase))
            .unwrap_or(true)
    }

    fn scan(&self, turn: &Turn, out: &mut Vec<FeatureMatch>) {
        if !self.applies_to(turn.phase) {
            return;
        }
        if let Some(suppressor) = &self.suppressor {
            if suppressor.is_match(&turn.text) {
                tracing::debug!(
                    turn = turn.turn_index,
                    category = %self.spec.category,
                    "Category suppressed in turn"
                );
                return;
            }
        }

        let mut hits: Vec<regex::Match<'_>> = self.pattern.find_iter(&turn.text).collect();
        for (pattern, requires) in &self.gated {
            if requires.is_match(&turn.text) {
                hits.extend(pattern.find_iter(&turn.text));
            }
        }
        hits.sort_by_key(|m| (m.start(), m.end()));

        let mut seen: Vec<(usize, usize)> = Vec::new();
        for m in hits {
            if seen.len() == MAX_MATCHES_PER_TURN {
                break;
            }
            let range = excerpt_range(&turn.text, m.start(), m.end());
            // Two hits in one sentence are a single piece of evidence
            if seen.contains(&range) || range.0 == range.1 {
                continue;
            }
            seen.push(range);

            let matched = m.as_str().trim();
            out.push(FeatureMatch {
                category: self.spec.category,
                turn_index: turn.turn_index,
                excerpt: turn.text[range.0..range.1].to_string(),
                offset: range.0,
                matched: matched.to_string(),
                rationale: format!("Assistant {} (\"{}\")", self.spec.description, matched),
            });
        }
    }
}

/// Deterministic, regex based extractor for the four categories
pub struct FeatureExtractor {
    matchers: Vec<CategoryMatcher>,
}

impl FeatureExtractor {
    /// Compile the built-in category matchers
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile, which only happens if
    /// the pattern tables are edited incorrectly.
    pub fn new() -> anyhow::Result<Self> {
        let matchers = ALL_SPECS
            .into_iter()
            .map(CategoryMatcher::compile)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    /// Extract every feature match from the transcript
    pub fn extract(&self, transcript: &Transcript) -> Vec<FeatureMatch> {
        let mut matches = Vec::new();
        for turn in transcript.turns() {
            // User turns are scripted input, not evidence about the target model
            if turn.speaker != Speaker::Assistant {
                continue;
            }
            for matcher in &self.matchers {
                matcher.scan(turn, &mut matches);
            }
        }

        tracing::debug!(
            scenario = %transcript.scenario,
            turns = transcript.len(),
            matches = matches.len(),
            "Extracted features"
        );
        matches
    }

    /// Extract and wrap the result for persistence
    pub fn extract_set(&self, transcript: &Transcript) -> FeatureSet {
        FeatureSet::new(self.extract(transcript))
    }
}

/// Ordered feature matches of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Per-category presence, for quick inspection of the artifact
    pub present: BTreeMap<FeatureCategory, bool>,
    pub matches: Vec<FeatureMatch>,
}

impl FeatureSet {
    pub fn new(matches: Vec<FeatureMatch>) -> Self {
        let present = FeatureCategory::ALL
            .iter()
            .map(|&c| (c, matches.iter().any(|m| m.category == c)))
            .collect();
        Self { present, matches }
    }

    /// True if at least one match of the category exists
    pub fn present(&self, category: FeatureCategory) -> bool {
        self.matches.iter().any(|m| m.category == category)
    }

    pub fn by_category(&self, category: FeatureCategory) -> impl Iterator<Item = &FeatureMatch> {
        self.matches.iter().filter(move |m| m.category == category)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}
