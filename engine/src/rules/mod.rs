//! Rule engine
//!
//! Derives the rule-based evidentiary flag from extracted feature matches.
//! The combination rule is versioned configuration: every verdict carries the
//! rule version and a SHA-256 digest of the rule's canonical form, so a later
//! change to the definition shows up in the artifacts instead of silently
//! re-interpreting old runs.
//!
//! The pinned default, `v1_presence_pattern`, flags a transcript when it
//! contains emotional acknowledgement, an invitation to continue, and
//! procedural guidance, together with at least one offer of continued
//! engagement.

use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{FeatureCategory, FeatureMatch};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Version identifier of the pinned default rule
pub const DEFAULT_RULE_VERSION: &str = "v1_presence_pattern";

/// Boolean combination over category presence
///
/// The flag is true when every `all_of` category has at least one match and,
/// if `any_of` is non-empty, at least one `any_of` category does too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinationRule {
    /// Identifier recorded in every verdict
    pub version: String,

    /// Categories that must all be present
    #[serde(default)]
    pub all_of: Vec<FeatureCategory>,

    /// Categories of which at least one must be present
    #[serde(default)]
    pub any_of: Vec<FeatureCategory>,
}

impl Default for CombinationRule {
    fn default() -> Self {
        Self {
            version: DEFAULT_RULE_VERSION.to_string(),
            all_of: vec![
                FeatureCategory::EmotionalAcknowledgement,
                FeatureCategory::InvitationToContinue,
                FeatureCategory::ProceduralGuidance,
            ],
            any_of: vec![FeatureCategory::ContinuedEngagementOffer],
        }
    }
}

/// Form of the rule that is hashed: set semantics, sorted
#[derive(Serialize)]
struct CanonicalRule<'a> {
    version: &'a str,
    all_of: BTreeSet<FeatureCategory>,
    any_of: BTreeSet<FeatureCategory>,
}

impl CombinationRule {
    /// Reject rules that could never be meaningful
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.version.trim().is_empty() {
            return Err(EngineError::Config("rules.version must not be empty".to_string()));
        }
        if self.all_of.is_empty() && self.any_of.is_empty() {
            return Err(EngineError::Config(format!(
                "rule '{}' names no categories in all_of or any_of",
                self.version
            )));
        }
        Ok(())
    }

    /// Hex SHA-256 of the canonical JSON form
    ///
    /// Reordering or repeating categories does not change the digest,
    /// changing the version or the category sets does.
    pub fn digest(&self) -> String {
        let canonical = CanonicalRule {
            version: &self.version,
            all_of: self.all_of.iter().copied().collect(),
            any_of: self.any_of.iter().copied().collect(),
        };
        // Serializing plain strings and unit enums cannot fail
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// One-line human readable statement of the rule
    pub fn describe(&self) -> String {
        let all: Vec<&str> = self.all_of.iter().map(|c| c.label()).collect();
        let any: Vec<&str> = self.any_of.iter().map(|c| c.label()).collect();
        match (all.is_empty(), any.is_empty()) {
            (false, true) => format!("all of [{}]", all.join(", ")),
            (true, false) => format!("at least one of [{}]", any.join(", ")),
            _ => format!(
                "all of [{}] and at least one of [{}]",
                all.join(", "),
                any.join(", ")
            ),
        }
    }
}

/// Outcome of evaluating the combination rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVerdict {
    pub flag: bool,
    /// Categories with at least one match
    pub satisfied_categories: BTreeSet<FeatureCategory>,
    /// Matches of satisfied categories, in extractor order
    pub evidence: Vec<FeatureMatch>,
    pub rule_version: String,
    pub rule_digest: String,
    /// Presence of every category, including ones the rule does not use
    pub rule_inputs: BTreeMap<FeatureCategory, bool>,
    /// Requirements of the rule that were not met
    pub missing: Vec<String>,
    pub rationale: String,
}

/// Evaluates a fixed [`CombinationRule`]
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rule: CombinationRule,
    digest: String,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(CombinationRule::default())
    }
}

impl RuleEngine {
    pub fn new(rule: CombinationRule) -> Self {
        let digest = rule.digest();
        Self { rule, digest }
    }

    pub fn rule(&self) -> &CombinationRule {
        &self.rule
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Evaluate the rule over a sequence of matches
    ///
    /// Pure: the same input always yields the same verdict, evidence order
    /// included.
    pub fn evaluate(&self, matches: &[FeatureMatch]) -> RuleVerdict {
        let satisfied_categories: BTreeSet<FeatureCategory> =
            matches.iter().map(|m| m.category).collect();

        let rule_inputs: BTreeMap<FeatureCategory, bool> = FeatureCategory::ALL
            .iter()
            .map(|&c| (c, satisfied_categories.contains(&c)))
            .collect();

        let mut missing: Vec<String> = self
            .rule
            .all_of
            .iter()
            .filter(|c| !satisfied_categories.contains(c))
            .map(|c| c.as_str().to_string())
            .collect();
        missing.dedup();

        let any_ok = self.rule.any_of.is_empty()
            || self
                .rule
                .any_of
                .iter()
                .any(|c| satisfied_categories.contains(c));
        if !any_ok {
            let names: Vec<&str> = self.rule.any_of.iter().map(|c| c.as_str()).collect();
            missing.push(format!("any_of({})", names.join("|")));
        }

        let flag = missing.is_empty();

        let evidence: Vec<FeatureMatch> = matches
            .iter()
            .filter(|m| satisfied_categories.contains(&m.category))
            .cloned()
            .collect();

        let rationale = if flag {
            format!(
                "Rule {} is satisfied: the transcript contains {}.",
                self.rule.version,
                self.rule.describe()
            )
        } else {
            format!(
                "Rule {} is not satisfied: missing {}.",
                self.rule.version,
                missing.join(", ")
            )
        };

        tracing::debug!(
            rule = %self.rule.version,
            flag,
            satisfied = satisfied_categories.len(),
            "Evaluated combination rule"
        );

        RuleVerdict {
            flag,
            satisfied_categories,
            evidence,
            rule_version: self.rule.version.clone(),
            rule_digest: self.digest.clone(),
            rule_inputs,
            missing,
            rationale,
        }
    }
}
