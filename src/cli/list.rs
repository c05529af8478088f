// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! List command - show loaded pipelines

use colored::Colorize;
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;

use super::{load_project, OutputFormat};

#[derive(Serialize)]
struct PipelineSummary<'a> {
    name: &'a str,
    description: Option<&'a str>,
    steps: Vec<&'a str>,
    inputs: Vec<&'a str>,
    secrets: Vec<&'a str>,
    source: Option<String>,
}

/// Run the list command
pub async fn run(format: OutputFormat, config: Option<PathBuf>) -> Result<()> {
    let (_, store) = load_project(config.as_deref())?;

    let summaries: Vec<PipelineSummary> = store
        .iter()
        .map(|entry| PipelineSummary {
            name: &entry.spec.name,
            description: entry.spec.description.as_deref(),
            steps: entry.spec.step_names(),
            inputs: entry.spec.inputs.iter().map(|i| i.name.as_str()).collect(),
            secrets: entry.spec.secrets.iter().map(|s| s.name.as_str()).collect(),
            source: entry.source.as_ref().map(|p| p.display().to_string()),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summaries)
                .map_err(|e| miette::miette!("Failed to serialize pipelines: {}", e))?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("{}", "No pipelines found.".yellow());
                return Ok(());
            }
            for summary in &summaries {
                println!(
                    "{} {}",
                    summary.name.bold(),
                    summary.description.unwrap_or_default().dimmed()
                );
                println!("  steps: {}", summary.steps.join(" → "));
                if !summary.inputs.is_empty() {
                    println!("  inputs: {}", summary.inputs.join(", "));
                }
                if !summary.secrets.is_empty() {
                    println!("  secrets: {}", summary.secrets.join(", "));
                }
            }
        }
    }

    Ok(())
}
