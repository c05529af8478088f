// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run command - execute a pipeline

use colored::Colorize;
use miette::Result;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{load_project, OutputFormat, RunArgs};
use crate::engine::{Engine, RunRequest};
use crate::errors::ShipflowError;
use crate::report::{RunReport, RunStatus};
use crate::secrets::{SecretBlob, SecretVault};
use crate::utils::{
    gate_line, print_info, print_section, print_warning, status_label, step_line, ConsoleObserver,
};
use crate::version::{FixedClock, KnownCount};

/// Run a pipeline
pub async fn run(args: RunArgs, config: Option<PathBuf>, verbose: bool) -> Result<ExitCode> {
    let (config, store) = load_project(config.as_deref())?;
    let working_dir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(ShipflowError::from)?,
    };

    let secrets = collect_secrets(&args.secret_env, &args.secret_file)?;

    let mut engine = Engine::new(store, config);
    if let Some(count) = args.commit_count {
        engine = engine.with_commit_counter(KnownCount(Some(count)));
    }
    if let Some(date) = args.date {
        engine = engine.with_clock(FixedClock(date));
    }
    if args.format == OutputFormat::Text && !args.dry_run {
        engine = engine.with_observer(Arc::new(ConsoleObserver::new(verbose)));
        println!("{} {}", "Running pipeline".bold(), args.pipeline.cyan());
        println!();
    }

    let mut request = RunRequest::new(args.pipeline, working_dir)
        .secrets(secrets)
        .facts(args.facts.into_facts())
        .timeout(args.timeout.map(Duration::from_secs))
        .dry_run(args.dry_run);
    request.inputs = args.inputs.into_iter().collect();

    // Dropping the run future on a signal tears down steps and signing material.
    let started = Instant::now();
    let pipeline = request.pipeline.clone();
    let report = tokio::select! {
        report = engine.run(request) => report,
        signal = shutdown_signal() => {
            tracing::warn!(signal = %signal, pipeline = %pipeline, "Run interrupted");
            RunReport::interrupted(pipeline, started.elapsed().as_millis() as u64)
        }
    };

    match args.format {
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Text => print_report(&report),
    }

    Ok(ExitCode::from(report.exit_code()))
}

/// Resolves with the signal name once the process is asked to stop
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Build the vault from `--secret-env` and `--secret-file` flags
///
/// An unset or empty variable is left out, so the run reports it as missing
/// only if an enabled step or the selected profile needs it.
fn collect_secrets(from_env: &[String], from_file: &[(String, String)]) -> Result<SecretVault, ShipflowError> {
    let mut vault = SecretVault::new();

    for spec in from_env {
        let (name, var) = spec.split_once('=').unwrap_or((spec.as_str(), spec.as_str()));
        match std::env::var_os(var) {
            Some(value) if !value.is_empty() => {
                vault.insert(name, value.to_string_lossy().into_owned());
            }
            _ => tracing::debug!(secret = %name, var = %var, "Secret variable is not set"),
        }
    }

    for (name, path) in from_file {
        let path = Path::new(path);
        let bytes = std::fs::read(path).map_err(|e| ShipflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        vault.insert(name.as_str(), SecretBlob::new(bytes));
    }

    Ok(vault)
}

fn print_report(report: &RunReport) {
    if report.dry_run {
        println!("{} {}", "Plan for".bold(), report.pipeline.cyan());
        println!();
        for step in &report.steps {
            println!("  {}", step_line(step));
        }
    }

    if let Some(version) = &report.version {
        print_info(&format!("Version: {}", version.to_string().bold()));
    }

    if let Some(profile) = &report.profile {
        let kind = if profile.fallback { " (fallback)" } else { "" };
        print_info(&format!("Profile: {}{}", profile.profile.bold(), kind.dimmed()));
        for skip in &profile.skipped {
            println!(
                "      {}",
                format!("{} not selected: {}", skip.profile, describe_skip(&skip.reason)).dimmed()
            );
        }
    }

    if let Some(results) = &report.gate_results {
        print_section("Gate");
        for result in results {
            println!("  {}", gate_line(result));
        }
    }

    if let Some(error) = &report.error {
        println!();
        eprintln!("{} {}", "Error:".red().bold(), error.message);
        if let Some(step) = report.steps.iter().find(|s| s.output.is_some()) {
            if let Some(output) = &step.output {
                eprintln!();
                eprintln!("{}", output.dimmed());
            }
        }
        if let Some(recovery) = &report.recovery {
            eprintln!();
            eprint!("{}", recovery);
        }
    }

    if report.status == RunStatus::Interrupted {
        println!();
        print_warning("Interrupted; step processes and signing material were removed");
    }

    println!();
    let elapsed = format!("in {:.1}s", report.duration_ms as f64 / 1000.0);
    if report.status == RunStatus::Passed && report.dry_run {
        println!("{} {}", "Plan OK".green().bold(), elapsed.dimmed());
    } else {
        println!("{} {}", status_label(report.status), elapsed.dimmed());
    }
}

fn describe_skip(reason: &crate::artifacts::SkipReason) -> String {
    match reason {
        crate::artifacts::SkipReason::MissingSecrets { secrets } => {
            format!("missing {}", secrets.join(", "))
        }
        crate::artifacts::SkipReason::Disabled { condition } => {
            format!("condition `{}` is false", condition)
        }
    }
}
