//! Run orchestrator
//!
//! Wires the stages together in their fixed order: traversal (or live
//! replay), feature extraction, rule evaluation, judge, memo. Scenario and
//! traversal errors abort the run before any artifact exists. Judge errors
//! are kept inside [`RunArtifacts`] next to the transcript, features and rule
//! verdict, which stay valid; the memo is only produced from a validated
//! judge verdict.

use crate::config::{Config, JudgeSettings, TargetSettings};
use crate::features::{FeatureExtractor, FeatureSet};
use crate::judge;
use crate::llm::LLMProvider;
use crate::memo::{self, Memo};
use crate::rules::{CombinationRule, RuleEngine, RuleVerdict};
use crate::scenario::ConversationTree;
use crate::traversal;
use chrono::Utc;
use dossier_sdk::errors::EngineError;
use dossier_sdk::types::{JudgeVerdict, Transcript};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Immutable inputs of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub scenario_path: Option<PathBuf>,
    pub branch_label: Option<String>,
    pub target: TargetSettings,
    pub judge: JudgeSettings,
    pub rule: CombinationRule,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scenario_path: Some(config.run.scenario_path.clone()),
            branch_label: config.run.branch_label.clone(),
            target: config.target.clone(),
            judge: config.judge.clone(),
            rule: config.rules.clone(),
        }
    }

    /// Replace the branch label; an empty label selects the default path
    pub fn with_branch_label(mut self, label: Option<String>) -> Self {
        self.branch_label = label.filter(|l| !l.trim().is_empty());
        self
    }
}

/// Run metadata persisted as `run_meta.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub scenario_name: String,
    pub scenario_path: Option<String>,
    pub branch_label: Option<String>,
    pub label_matched: bool,
    /// The target model produced at least one turn
    pub live_replay: bool,
    pub target_model: String,
    pub temperature_target: f64,
    pub judge_model: String,
    pub temperature_judge: f64,
    pub rule_version: String,
    pub rule_digest: String,
    pub started_at: String,
    #[serde(default)]
    pub rejudged_at: Option<String>,
    pub engine_version: String,
}

/// Everything one run produced
#[derive(Debug)]
pub struct RunArtifacts {
    pub metadata: RunMetadata,
    pub transcript: Transcript,
    pub features: FeatureSet,
    pub rule: RuleVerdict,
    /// Judge outcome; an error here leaves the artifacts above intact
    pub judge: Result<JudgeVerdict, EngineError>,
    pub memo: Option<Memo>,
}

impl RunArtifacts {
    /// True when the judge step failed because the backend was unreachable
    ///
    /// This is fatal to the run. Rejected judge output is not.
    pub fn judge_unavailable(&self) -> bool {
        matches!(&self.judge, Err(e) if !e.is_judge_rejection())
    }
}

/// Run id for a start time, `YYYYmmdd_HHMMSS` in UTC
pub fn run_id(at: chrono::DateTime<Utc>) -> String {
    at.format("%Y%m%d_%H%M%S").to_string()
}

/// Sequential evaluation pipeline
pub struct Pipeline {
    extractor: FeatureExtractor,
    rules: RuleEngine,
}

impl Pipeline {
    pub fn new(rule: CombinationRule) -> Result<Self, EngineError> {
        rule.validate()?;
        let extractor = FeatureExtractor::new()
            .map_err(|e| EngineError::Config(format!("Failed to compile feature patterns: {}", e)))?;
        Ok(Self {
            extractor,
            rules: RuleEngine::new(rule),
        })
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    /// Build the transcript for the settings' branch label
    ///
    /// Trees with `generated` nodes need a target provider; scripted trees
    /// never touch one.
    pub async fn transcript(
        &self,
        tree: &ConversationTree,
        settings: &RunSettings,
        target: Option<&dyn LLMProvider>,
    ) -> Result<Transcript, EngineError> {
        let label = settings.branch_label.as_deref();
        if !tree.has_generated_nodes() {
            return traversal::traverse(tree, label);
        }
        match target {
            Some(provider) => traversal::replay(tree, label, provider, &settings.target).await,
            None => {
                let node_id = tree
                    .nodes()
                    .iter()
                    .find(|n| n.generated)
                    .map(|n| n.node_id.clone())
                    .unwrap_or_default();
                Err(EngineError::BackendUnavailable {
                    node_id,
                    reason: "scenario has generated turns but no target model was provided"
                        .to_string(),
                })
            }
        }
    }

    /// Features and rule verdict; pure
    pub fn analyze(&self, transcript: &Transcript) -> (FeatureSet, RuleVerdict) {
        let features = self.extractor.extract_set(transcript);
        let rule = self.rules.evaluate(&features.matches);
        (features, rule)
    }

    /// Run every stage for one branch label
    pub async fn run(
        &self,
        tree: &ConversationTree,
        settings: &RunSettings,
        target: Option<&dyn LLMProvider>,
        judge_provider: &dyn LLMProvider,
    ) -> Result<RunArtifacts, EngineError> {
        let started = Utc::now();
        let transcript = self.transcript(tree, settings, target).await?;

        let metadata = RunMetadata {
            run_id: run_id(started),
            scenario_name: tree.name().to_string(),
            scenario_path: settings
                .scenario_path
                .as_ref()
                .map(|p| p.display().to_string()),
            branch_label: transcript.branch_label.clone(),
            label_matched: transcript.label_matched,
            live_replay: tree.has_generated_nodes(),
            target_model: settings.target.model.clone(),
            temperature_target: settings.target.temperature,
            judge_model: settings.judge.model.clone(),
            temperature_judge: settings.judge.temperature,
            rule_version: self.rules.rule().version.clone(),
            rule_digest: self.rules.digest().to_string(),
            started_at: started.to_rfc3339(),
            rejudged_at: None,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        info!(
            run_id = %metadata.run_id,
            scenario = %metadata.scenario_name,
            branch_label = ?metadata.branch_label,
            turns = transcript.len(),
            "Transcript ready"
        );

        self.finish(metadata, transcript, judge_provider, &settings.judge)
            .await
    }

    /// Re-run only the judge (and memo) on a stored transcript
    ///
    /// Features and the rule verdict are recomputed from the identical
    /// transcript, so they match the original run as long as the rule has not
    /// changed; the digest in the metadata shows whether it did.
    pub async fn rejudge(
        &self,
        mut metadata: RunMetadata,
        transcript: Transcript,
        settings: &RunSettings,
        judge_provider: &dyn LLMProvider,
    ) -> Result<RunArtifacts, EngineError> {
        if metadata.rule_digest != self.rules.digest() {
            warn!(
                previous = %metadata.rule_digest,
                current = %self.rules.digest(),
                "Combination rule changed since the original run"
            );
        }
        metadata.judge_model = settings.judge.model.clone();
        metadata.temperature_judge = settings.judge.temperature;
        metadata.rule_version = self.rules.rule().version.clone();
        metadata.rule_digest = self.rules.digest().to_string();
        metadata.rejudged_at = Some(Utc::now().to_rfc3339());

        self.finish(metadata, transcript, judge_provider, &settings.judge)
            .await
    }

    async fn finish(
        &self,
        metadata: RunMetadata,
        transcript: Transcript,
        judge_provider: &dyn LLMProvider,
        judge_settings: &JudgeSettings,
    ) -> Result<RunArtifacts, EngineError> {
        let (features, rule) = self.analyze(&transcript);
        info!(
            matches = features.len(),
            flag = rule.flag,
            rule = %rule.rule_version,
            "Rule verdict ready"
        );

        let judge = judge::judge(&transcript, judge_provider, judge_settings).await;

        let memo = match &judge {
            Ok(verdict) => Some(memo::render_with_metadata(
                &metadata,
                &transcript,
                &rule,
                verdict,
            )?),
            Err(e) => {
                warn!(stage = ?e.stage(), "Judge step failed, memo not produced: {}", e);
                None
            }
        };

        Ok(RunArtifacts {
            metadata,
            transcript,
            features,
            rule,
            judge,
            memo,
        })
    }
}
