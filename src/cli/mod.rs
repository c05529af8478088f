// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for shipflow.

pub mod gate;
pub mod list;
pub mod run;
pub mod validate;
pub mod version;

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::{EngineConfig, CONFIG_FILE};
use crate::errors::ShipflowError;
use crate::gate::{CheckStatus, GateFacts};
use crate::store::DefinitionStore;

/// Build pipeline orchestrator
#[derive(Parser, Debug)]
#[clap(
    name = "shipflow",
    version,
    about = "Deterministic build pipelines with conditional signing and release gates",
    long_about = None,
    after_help = "Examples:\n\
        shipflow list                                  List loaded pipelines\n\
        shipflow validate                              Check every pipeline definition\n\
        shipflow run mobile -i build_type=release      Run a pipeline\n\
        shipflow run mobile --dry-run                  Show the plan without running it\n\n\
        See 'shipflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Engine configuration file
    #[clap(long, global = true, env = "SHIPFLOW_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline
    Run(RunArgs),

    /// Validate pipeline definitions
    Validate {
        /// Pipeline files (default: every file in the pipelines directory)
        files: Vec<PathBuf>,
    },

    /// List loaded pipelines
    List {
        /// Output format
        #[clap(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the build version for the current checkout
    Version {
        /// Use this pipeline's version separator
        pipeline: Option<String>,

        /// Commit count to use instead of asking git
        #[clap(long, env = "SHIPFLOW_COMMIT_COUNT")]
        commit_count: Option<u64>,

        /// Build date (YYYY-MM-DD) instead of today (UTC)
        #[clap(long)]
        date: Option<chrono::NaiveDate>,
    },

    /// Evaluate a pipeline's release gate against the given facts
    Gate {
        /// Pipeline name
        pipeline: String,

        /// Input values (KEY=VALUE)
        #[clap(short, long = "input", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        inputs: Vec<(String, String)>,

        #[clap(flatten)]
        facts: FactArgs,

        /// Output format
        #[clap(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Arguments of `shipflow run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Pipeline name
    pub pipeline: String,

    /// Input values (KEY=VALUE)
    #[clap(short, long = "input", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub inputs: Vec<(String, String)>,

    /// Read a secret from an environment variable (NAME or NAME=VAR)
    #[clap(long = "secret-env", value_name = "NAME[=VAR]")]
    pub secret_env: Vec<String>,

    /// Read a secret from a file (NAME=PATH)
    #[clap(long = "secret-file", value_name = "NAME=PATH", value_parser = parse_key_val)]
    pub secret_file: Vec<(String, String)>,

    #[clap(flatten)]
    pub facts: FactArgs,

    /// Commit count to use instead of asking git
    #[clap(long, env = "SHIPFLOW_COMMIT_COUNT")]
    pub commit_count: Option<u64>,

    /// Build date (YYYY-MM-DD) instead of today (UTC)
    #[clap(long)]
    pub date: Option<chrono::NaiveDate>,

    /// Run budget in seconds (overrides the pipeline)
    #[clap(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directory the run works in (default: current directory)
    #[clap(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Show the plan and selected profile without running anything
    #[clap(long)]
    pub dry_run: bool,

    /// Output format
    #[clap(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Release facts for the gate
#[derive(Args, Debug, Clone, Default)]
pub struct FactArgs {
    /// Branch being built
    #[clap(long, env = "SHIPFLOW_BRANCH")]
    pub branch: Option<String>,

    /// Tag being released
    #[clap(long, env = "SHIPFLOW_TAG")]
    pub tag: Option<String>,

    /// Upstream check result (NAME=STATUS)
    #[clap(long = "check", value_name = "NAME=STATUS", value_parser = parse_check)]
    pub checks: Vec<(String, CheckStatus)>,
}

impl FactArgs {
    pub fn into_facts(self) -> GateFacts {
        GateFacts {
            branch: self.branch.filter(|b| !b.is_empty()),
            tag: self.tag.filter(|t| !t.is_empty()),
            checks: self.checks.into_iter().collect(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

fn parse_check(s: &str) -> Result<(String, CheckStatus), String> {
    let (name, status) = parse_key_val(s)?;
    Ok((name, status.parse()?))
}

/// Load the engine configuration and every pipeline definition
pub fn load_project(config: Option<&Path>) -> Result<(EngineConfig, DefinitionStore), ShipflowError> {
    let root = std::env::current_dir()?;
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load(&root.join(CONFIG_FILE))?,
    }
    .rooted_at(&root);

    let store = DefinitionStore::load_dir(&config.pipelines_dir)?;
    Ok((config, store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("build_type=release").unwrap(),
            ("build_type".to_string(), "release".to_string())
        );
        assert_eq!(parse_key_val("note=a=b").unwrap().1, "a=b");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_parse_check() {
        let (name, status) = parse_check("unit-tests=success").unwrap();
        assert_eq!(name, "unit-tests");
        assert_eq!(status, CheckStatus::Success);
        assert!(parse_check("unit-tests=maybe").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "shipflow",
            "run",
            "mobile",
            "-i",
            "build_type=release",
            "--secret-env",
            "KEYSTORE",
            "--check",
            "tests=success",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.pipeline, "mobile");
                assert_eq!(args.inputs, vec![("build_type".into(), "release".into())]);
                assert_eq!(args.secret_env, vec!["KEYSTORE"]);
                assert_eq!(args.format, OutputFormat::Json);
                assert_eq!(args.facts.into_facts().checks.len(), 1);
            }
            other => panic!("Expected run, got {:?}", other),
        }
    }
}
