// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Validate command - check pipeline definitions

use colored::Colorize;
use miette::Result;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::{EngineConfig, CONFIG_FILE};
use crate::errors::ShipflowError;
use crate::store::{inspect, pipeline_files};
use crate::utils::{print_error, print_success, print_warning};

/// Run the validate command
pub async fn run(files: Vec<PathBuf>, config: Option<PathBuf>, verbose: bool) -> Result<()> {
    let files = if files.is_empty() {
        let root = std::env::current_dir().map_err(ShipflowError::from)?;
        let config = match config {
            Some(path) => EngineConfig::load(&path)?,
            None => EngineConfig::load(&root.join(CONFIG_FILE))?,
        }
        .rooted_at(&root);
        pipeline_files(&config.pipelines_dir)?
    } else {
        files
    };

    if files.is_empty() {
        return Err(miette::miette!(
            "No pipeline definitions found\n\n\
             Put pipeline files in .shipflow/pipelines/ or pass them explicitly."
        ));
    }

    println!("{}", "Validating pipelines...".bold());

    let mut failed = 0;
    let mut names: HashMap<String, PathBuf> = HashMap::new();

    for path in &files {
        println!();
        println!("{}", path.display().to_string().bold());

        let (spec, validation) = match inspect(path) {
            Ok(parsed) => parsed,
            Err(e) => {
                print_error(&e.to_string());
                failed += 1;
                continue;
            }
        };

        print_success(&format!("Parsed pipeline '{}'", spec.name));

        for error in &validation.errors {
            print_error(error);
        }
        for warning in &validation.warnings {
            print_warning(warning);
        }

        if let Some(first) = names.insert(spec.name.clone(), path.clone()) {
            print_error(&format!("Pipeline name '{}' is also used by {}", spec.name, first.display()));
            failed += 1;
        } else if !validation.is_valid() {
            failed += 1;
        }

        if verbose {
            println!("  Steps:");
            for step in &spec.steps {
                println!("    - {} {}", step.name, format!("(when {})", step.when).dimmed());
            }
            if let Ok(profiles) = spec.profiles() {
                for profile in profiles {
                    println!(
                        "  Profile {} requires [{}]",
                        profile.name,
                        profile.requires.join(", ")
                    );
                }
            }
        }
    }

    println!();

    if failed > 0 {
        Err(miette::miette!("{} of {} pipeline(s) failed validation", failed, files.len()))
    } else {
        println!("{}", "All pipelines are valid!".green().bold());
        Ok(())
    }
}
