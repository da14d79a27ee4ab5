//! CLI interface for dossier
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conversation-tree evaluator
///
/// Walks a scripted, branching conversation, extracts turn-anchored evidence,
/// evaluates a versioned rule, asks an independent judge model, and writes a
/// neutral memo with verifiable citations.
#[derive(Parser, Debug)]
#[command(name = "dossier")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a scenario and check its structure
    Validate {
        /// Scenario file (defaults to run.scenario_path)
        scenario: Option<PathBuf>,
    },

    /// Print the transcript for a branch label
    Traverse {
        #[command(flatten)]
        target: ScenarioArgs,
    },

    /// Print the feature matches and rule verdict for a branch label
    Extract {
        #[command(flatten)]
        target: ScenarioArgs,
    },

    /// Run the full pipeline and write the artifacts
    Run {
        #[command(flatten)]
        target: ScenarioArgs,

        /// Directory that receives the run directory (defaults to core.output_dir)
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },

    /// Re-run the judge on a stored run, reusing its transcript
    Rejudge {
        /// Run directory written by `dossier run`
        run_dir: PathBuf,
    },
}

/// Scenario selection shared by several commands
#[derive(clap::Args, Debug, Clone)]
pub struct ScenarioArgs {
    /// Scenario file (defaults to run.scenario_path)
    #[arg(long, value_name = "PATH")]
    pub scenario: Option<PathBuf>,

    /// Branch label; an empty string selects the default path
    #[arg(long, value_name = "LABEL")]
    pub branch: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_with_flags() {
        let cli = Cli::try_parse_from([
            "dossier",
            "--json",
            "run",
            "--branch",
            "ask_for_guidance",
            "--output-dir",
            "/tmp/out",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Run { target, output_dir } => {
                assert_eq!(target.branch.as_deref(), Some("ask_for_guidance"));
                assert_eq!(output_dir, Some(PathBuf::from("/tmp/out")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["dossier", "validate", "s.yaml", "--log", "debug"]).unwrap();
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Validate { scenario: Some(_) }));
    }

    #[test]
    fn test_rejudge_requires_run_dir() {
        assert!(Cli::try_parse_from(["dossier", "rejudge"]).is_err());
    }
}
