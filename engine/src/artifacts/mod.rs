//! Artifact persistence
//!
//! One directory per run, `<output_dir>/<run_id>/`:
//!
//! | file               | content                                   |
//! |--------------------|-------------------------------------------|
//! | `transcript.jsonl` | one turn record per line                  |
//! | `run_meta.json`    | [`RunMetadata`]                           |
//! | `features.json`    | [`FeatureSet`](crate::features::FeatureSet) |
//! | `rule.json`        | [`RuleVerdict`](crate::rules::RuleVerdict) |
//! | `judge.json`       | validated judge verdict                   |
//! | `judge_error.json` | why the judge step failed (instead of `judge.json`) |
//! | `memo.md`          | rendered memo                             |
//! | `citations.json`   | the memo's citations                      |

use crate::pipeline::{RunArtifacts, RunMetadata};
use dossier_sdk::errors::{DossierErrorExt, EngineError};
use dossier_sdk::types::{Transcript, Turn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const TRANSCRIPT_FILE: &str = "transcript.jsonl";
pub const META_FILE: &str = "run_meta.json";
pub const FEATURES_FILE: &str = "features.json";
pub const RULE_FILE: &str = "rule.json";
pub const JUDGE_FILE: &str = "judge.json";
pub const JUDGE_ERROR_FILE: &str = "judge_error.json";
pub const MEMO_FILE: &str = "memo.md";
pub const CITATIONS_FILE: &str = "citations.json";

/// Persisted description of a failed judge step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeErrorRecord {
    pub stage: String,
    pub message: String,
    pub hint: String,
    pub recoverable: bool,
}

impl From<&EngineError> for JudgeErrorRecord {
    fn from(e: &EngineError) -> Self {
        Self {
            stage: format!("{:?}", e.stage()).to_lowercase(),
            message: e.to_string(),
            hint: e.user_hint().to_string(),
            recoverable: e.is_recoverable(),
        }
    }
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), EngineError> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(dir.join(name), json)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(dir: &Path, name: &str) -> Result<T, EngineError> {
    let contents = fs::read_to_string(dir.join(name))?;
    serde_json::from_str(&contents)
        .map_err(|e| EngineError::Serialization(format!("{}: {}", name, e)))
}

/// Write the transcript as JSON lines, one turn per line
pub fn write_transcript(path: &Path, transcript: &Transcript) -> Result<(), EngineError> {
    let mut file = fs::File::create(path)?;
    for turn in transcript.turns() {
        let line = serde_json::to_string(turn)?;
        writeln!(file, "{}", line)?;
    }
    file.flush()?;
    Ok(())
}

/// Read JSON lines back into a transcript, re-checking the turn indices
pub fn read_transcript(
    path: &Path,
    scenario: &str,
    branch_label: Option<String>,
) -> Result<Transcript, EngineError> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut turns = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let turn: Turn = serde_json::from_str(&line).map_err(|e| {
            EngineError::Serialization(format!("{} line {}: {}", TRANSCRIPT_FILE, line_no + 1, e))
        })?;
        turns.push(turn);
    }

    let mut transcript = Transcript::new(scenario, branch_label);
    transcript.extend_checked(turns)?;
    Ok(transcript)
}

/// Write every artifact of a run into `<output_dir>/<run_id>/`
pub fn write_run(output_dir: &Path, artifacts: &RunArtifacts) -> Result<PathBuf, EngineError> {
    let dir = output_dir.join(&artifacts.metadata.run_id);
    fs::create_dir_all(&dir)?;
    write_run_into(&dir, artifacts)?;
    tracing::info!(dir = %dir.display(), "Artifacts written");
    Ok(dir)
}

/// Write (or overwrite) the artifacts inside an existing run directory
pub fn write_run_into(dir: &Path, artifacts: &RunArtifacts) -> Result<(), EngineError> {
    write_transcript(&dir.join(TRANSCRIPT_FILE), &artifacts.transcript)?;
    write_json(dir, META_FILE, &artifacts.metadata)?;
    write_json(dir, FEATURES_FILE, &artifacts.features)?;
    write_json(dir, RULE_FILE, &artifacts.rule)?;

    match &artifacts.judge {
        Ok(verdict) => {
            write_json(dir, JUDGE_FILE, verdict)?;
            remove_if_exists(&dir.join(JUDGE_ERROR_FILE))?;
        }
        Err(e) => {
            write_json(dir, JUDGE_ERROR_FILE, &JudgeErrorRecord::from(e))?;
            remove_if_exists(&dir.join(JUDGE_FILE))?;
        }
    }

    match &artifacts.memo {
        Some(memo) => {
            fs::write(dir.join(MEMO_FILE), &memo.text)?;
            write_json(dir, CITATIONS_FILE, &memo.citations)?;
        }
        None => {
            remove_if_exists(&dir.join(MEMO_FILE))?;
            remove_if_exists(&dir.join(CITATIONS_FILE))?;
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Load the metadata and transcript of a stored run
pub fn load_run(dir: &Path) -> Result<(RunMetadata, Transcript), EngineError> {
    let metadata: RunMetadata = read_json(dir, META_FILE)?;
    let mut transcript = read_transcript(
        &dir.join(TRANSCRIPT_FILE),
        &metadata.scenario_name,
        metadata.branch_label.clone(),
    )?;
    transcript.label_matched = metadata.label_matched;
    Ok((metadata, transcript))
}
