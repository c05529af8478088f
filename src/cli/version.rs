// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Version command - print the build version of the current checkout

use miette::Result;
use std::path::PathBuf;

use super::load_project;
use crate::engine::Engine;
use crate::errors::{RecoverySuggestion, ShipflowError};
use crate::version::{FixedClock, KnownCount, VersionSeparator};

/// Run the version command
pub async fn run(
    pipeline: Option<String>,
    commit_count: Option<u64>,
    date: Option<chrono::NaiveDate>,
    config: Option<PathBuf>,
) -> Result<()> {
    let (config, store) = load_project(config.as_deref())?;

    let separator = match &pipeline {
        Some(name) => store
            .get(name)?
            .versioning
            .as_ref()
            .map(|v| v.separator)
            .unwrap_or_default(),
        None => VersionSeparator::default(),
    };

    let mut engine = Engine::new(store, config);
    if let Some(count) = commit_count {
        engine = engine.with_commit_counter(KnownCount(Some(count)));
    }
    if let Some(date) = date {
        engine = engine.with_clock(FixedClock(date));
    }

    let cwd = std::env::current_dir().map_err(ShipflowError::from)?;
    match engine.build_version(&cwd, separator).await {
        Ok(version) => {
            println!("{}", version);
            Ok(())
        }
        Err(e) => {
            if let Some(suggestion) = RecoverySuggestion::for_error(&e) {
                eprintln!("{}", suggestion);
            }
            Err(e.into())
        }
    }
}
