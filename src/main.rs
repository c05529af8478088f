// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! shipflow - build pipeline orchestrator
//!
//! Runs declarative build pipelines with deterministic versions, conditional
//! signing material and release gates.

use clap::Parser;
use miette::Result;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "shipflow=debug" } else { "shipflow=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run(args) => shipflow::cli::run::run(args, cli.config, cli.verbose).await,
        Commands::Validate { files } => {
            shipflow::cli::validate::run(files, cli.config, cli.verbose).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List { format } => {
            shipflow::cli::list::run(format, cli.config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version {
            pipeline,
            commit_count,
            date,
        } => {
            shipflow::cli::version::run(pipeline, commit_count, date, cli.config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gate {
            pipeline,
            inputs,
            facts,
            format,
        } => shipflow::cli::gate::run(pipeline, inputs, facts, format, cli.config).await,
    }
}
