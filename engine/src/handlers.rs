//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - validate: Load a scenario and report its structure
//! - traverse: Print the transcript for a branch label
//! - extract: Print feature matches and the rule verdict
//! - run: Full pipeline, artifacts written to disk
//! - rejudge: Judge again on a stored transcript
//!
//! Judge output that fails validation is persisted as `judge_error.json` and
//! the command still succeeds, since every upstream artifact is valid. An
//! unreachable judge is persisted the same way but fails the command.

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::artifacts;
use crate::cli::ScenarioArgs;
use crate::config::{resolve_scenario_path, Config};
use crate::llm::{provider_for, LLMProvider};
use crate::pipeline::{Pipeline, RunArtifacts, RunSettings};
use crate::scenario::ConversationTree;
use crate::traversal;
use dossier_sdk::errors::{DossierErrorExt, EngineError};
use dossier_sdk::types::Transcript;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

fn scenario_path(explicit: Option<&Path>, config: &Config) -> PathBuf {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.run.scenario_path.clone());
    resolve_scenario_path(&path)
}

fn settings_for(args: &ScenarioArgs, config: &Config) -> RunSettings {
    let mut settings = RunSettings::from_config(config);
    settings.scenario_path = Some(scenario_path(args.scenario.as_deref(), config));
    match &args.branch {
        Some(label) => settings.with_branch_label(Some(label.clone())),
        None => settings,
    }
}

fn load_tree(path: &Path) -> Result<ConversationTree> {
    ConversationTree::load(path)
        .with_context(|| format!("Failed to load scenario {}", path.display()))
}

fn print_transcript(transcript: &Transcript) {
    for turn in transcript.turns() {
        println!(
            "[{}] {} ({}, {}):",
            turn.turn_index, turn.speaker, turn.phase, turn.node_id
        );
        for line in turn.text.lines() {
            println!("    {}", line);
        }
    }
}

/// Load a scenario and report its structure
pub async fn handle_validate(
    scenario: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let path = scenario_path(scenario.as_deref(), config);
    let tree = load_tree(&path)?;
    let labels: Vec<&str> = tree.branch_labels().into_iter().collect();

    match format {
        OutputFormat::Text => {
            println!("Scenario '{}' is valid", tree.name());
            println!("  Path:            {}", path.display());
            println!("  Nodes:           {}", tree.len());
            if let Some(description) = tree.description() {
                println!("  Description:     {}", description.trim());
            }
            println!("  Root:            {}", tree.root().node_id);
            println!("  Branch labels:   {}", labels.join(", "));
            println!(
                "  Generated turns: {}",
                if tree.has_generated_nodes() { "yes" } else { "no" }
            );
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "valid",
                "scenario": tree.name(),
                "description": tree.description(),
                "path": path.display().to_string(),
                "nodes": tree.len(),
                "root": tree.root().node_id,
                "branch_labels": labels,
                "generated": tree.has_generated_nodes(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Print the transcript for a branch label
///
/// Uses the literal node texts; generated nodes show their prompt template.
pub async fn handle_traverse(args: ScenarioArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let settings = settings_for(&args, config);
    let tree = load_tree(&scenario_path(args.scenario.as_deref(), config))?;
    if tree.has_generated_nodes() {
        tracing::warn!(
            scenario = %tree.name(),
            "Scenario has generated turns; their prompt templates are shown instead of model output"
        );
    }
    let transcript = traversal::traverse(&tree, settings.branch_label.as_deref())?;

    match format {
        OutputFormat::Text => print_transcript(&transcript),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&transcript)?),
    }
    Ok(())
}

fn target_provider_for(
    tree: &ConversationTree,
    settings: &RunSettings,
    config: &Config,
) -> Result<Option<Box<dyn LLMProvider>>> {
    if tree.has_generated_nodes() {
        Ok(Some(provider_for(&settings.target.model, &config.llm)?))
    } else {
        Ok(None)
    }
}

/// Print the feature matches and the rule verdict for a branch label
///
/// Generated turns are produced by the target model first, so prompt
/// templates are never scanned as evidence.
pub async fn handle_extract(args: ScenarioArgs, config: &Config, format: OutputFormat) -> Result<()> {
    let settings = settings_for(&args, config);
    let tree = load_tree(&scenario_path(args.scenario.as_deref(), config))?;
    let target_provider = target_provider_for(&tree, &settings, config)?;

    let pipeline = Pipeline::new(settings.rule.clone())?;
    let transcript = pipeline
        .transcript(&tree, &settings, target_provider.as_deref())
        .await?;
    let (features, rule) = pipeline.analyze(&transcript);

    match format {
        OutputFormat::Text => {
            for m in &features.matches {
                println!(
                    "[{}] {}: \"{}\"",
                    m.turn_index,
                    m.category.label(),
                    m.excerpt.replace('\n', " ")
                );
            }
            println!();
            let short_digest: String = rule.rule_digest.chars().take(12).collect();
            println!(
                "Rule {} ({}): flag = {}",
                rule.rule_version, short_digest, rule.flag
            );
            println!("{}", rule.rationale);
        }
        OutputFormat::Json => {
            let output = json!({
                "features": features,
                "rule": rule,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn report(artifacts: &RunArtifacts, dir: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Run {} written to {}", artifacts.metadata.run_id, dir.display());
            println!("  Turns:          {}", artifacts.transcript.len());
            println!("  Feature matches: {}", artifacts.features.len());
            println!("  Rule flag:      {}", artifacts.rule.flag);
            match &artifacts.judge {
                Ok(verdict) => println!("  Judge flag:     {}", verdict.flag),
                Err(e) => {
                    println!("  Judge:          failed ({})", e);
                    println!("  Hint:           {}", e.user_hint());
                }
            }
        }
        OutputFormat::Json => {
            let judge = match &artifacts.judge {
                Ok(verdict) => json!({ "status": "ok", "verdict": verdict }),
                Err(e) => json!({
                    "status": "failed",
                    "error": e.to_string(),
                    "hint": e.user_hint(),
                }),
            };
            let output = json!({
                "run_id": artifacts.metadata.run_id,
                "dir": dir.display().to_string(),
                "turns": artifacts.transcript.len(),
                "matches": artifacts.features.len(),
                "rule_flag": artifacts.rule.flag,
                "judge": judge,
                "memo": artifacts.memo.is_some(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

/// Turn a persisted judge failure into the command's exit status
fn judge_outcome(artifacts: RunArtifacts) -> Result<()> {
    match artifacts.judge {
        Err(e) if !e.is_judge_rejection() => Err(e.into()),
        Err(e) => {
            tracing::warn!("Judge output rejected, upstream artifacts kept: {}", e);
            Ok(())
        }
        Ok(_) => Ok(()),
    }
}

/// Run the full pipeline and write the artifacts
pub async fn handle_run(
    args: ScenarioArgs,
    output_dir: Option<PathBuf>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let settings = settings_for(&args, config);
    let tree = load_tree(&scenario_path(args.scenario.as_deref(), config))?;

    let judge_provider = provider_for(&settings.judge.model, &config.llm)?;
    let target_provider = target_provider_for(&tree, &settings, config)?;

    let pipeline = Pipeline::new(settings.rule.clone())?;
    let artifacts = pipeline
        .run(
            &tree,
            &settings,
            target_provider.as_deref(),
            &*judge_provider,
        )
        .await?;

    let output_dir = output_dir.unwrap_or_else(|| config.core.output_dir.clone());
    let dir = artifacts::write_run(&output_dir, &artifacts)
        .with_context(|| format!("Failed to write artifacts under {}", output_dir.display()))?;

    report(&artifacts, &dir, format)?;
    judge_outcome(artifacts)
}

/// Re-run the judge on a stored run, reusing its transcript
pub async fn handle_rejudge(run_dir: PathBuf, config: &Config, format: OutputFormat) -> Result<()> {
    let (metadata, transcript) = artifacts::load_run(&run_dir)
        .with_context(|| format!("Failed to load run from {}", run_dir.display()))?;

    tracing::info!(
        run_id = %metadata.run_id,
        turns = transcript.len(),
        "Rejudging stored transcript"
    );

    let settings = RunSettings::from_config(config);
    let judge_provider = provider_for(&settings.judge.model, &config.llm)?;
    let pipeline = Pipeline::new(settings.rule.clone())?;

    let artifacts = pipeline
        .rejudge(metadata, transcript, &settings, &*judge_provider)
        .await?;

    artifacts::write_run_into(&run_dir, &artifacts)?;
    report(&artifacts, &run_dir, format)?;
    judge_outcome(artifacts)
}

/// Print an error with its operator hint
pub fn print_error(error: &anyhow::Error, format: OutputFormat) {
    let hint = error
        .downcast_ref::<EngineError>()
        .map(|e| e.user_hint().to_string());

    match format {
        OutputFormat::Text => {
            eprintln!("Error: {:#}", error);
            if let Some(hint) = hint {
                eprintln!("Hint: {}", hint);
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "status": "failed",
                "error": format!("{:#}", error),
                "hint": hint,
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
        }
    }
}
