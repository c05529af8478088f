// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Gate command - evaluate a release gate without running the pipeline

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::process::ExitCode;

use super::{load_project, FactArgs, OutputFormat};
use crate::engine::Engine;
use crate::report::RunStatus;
use crate::utils::gate_line;

/// Run the gate command
pub async fn run(
    pipeline: String,
    inputs: Vec<(String, String)>,
    facts: FactArgs,
    format: OutputFormat,
    config: Option<PathBuf>,
) -> Result<ExitCode> {
    let (config, store) = load_project(config.as_deref())?;
    let engine = Engine::new(store, config);

    let inputs = inputs.into_iter().collect();
    let verdict = engine.evaluate_gate(&pipeline, &inputs, &facts.into_facts())?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&verdict)
                .map_err(|e| miette::miette!("Failed to serialize verdict: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("{} {}", "Gate for".bold(), pipeline.cyan());
            for result in &verdict.results {
                println!("  {}", gate_line(result));
            }
            println!();
            if verdict.passed {
                println!("{}", "Gate passed".green().bold());
            } else {
                println!("{}", "Gate failed".red().bold());
            }
        }
    }

    let status = if verdict.passed {
        RunStatus::Passed
    } else {
        RunStatus::GateFailed
    };
    Ok(ExitCode::from(status.exit_code()))
}
