// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Progress display for running steps

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

use super::colors::step_marker;
use crate::pipeline::RunObserver;
use crate::report::{StepRecord, StepStatus};

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
        .template("  {spinner:.blue} {msg} {elapsed:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Prints one line per step, with a spinner while a step runs
#[derive(Default)]
pub struct ConsoleObserver {
    current: Mutex<Option<ProgressBar>>,
    verbose: bool,
}

impl ConsoleObserver {
    pub fn new(verbose: bool) -> Self {
        Self {
            current: Mutex::new(None),
            verbose,
        }
    }

    fn take_spinner(&self) -> Option<ProgressBar> {
        self.current.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Text for a finished step
pub fn step_line(record: &StepRecord) -> String {
    let timing = record
        .duration_ms
        .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
        .unwrap_or_default();

    match record.status {
        StepStatus::Skipped => format!(
            "{} {} {}",
            step_marker(record.status),
            record.name.dimmed(),
            format!("(skipped: {})", record.reason.as_deref().unwrap_or("disabled")).dimmed()
        ),
        StepStatus::Failed | StepStatus::TimedOut => format!(
            "{} {}{} - {}",
            step_marker(record.status),
            record.name,
            timing.dimmed(),
            record.reason.as_deref().unwrap_or_default().red()
        ),
        StepStatus::Planned | StepStatus::Succeeded => {
            format!("{} {}{}", step_marker(record.status), record.name, timing.dimmed())
        }
    }
}

impl RunObserver for ConsoleObserver {
    fn step_started(&self, step: &str) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = Some(create_spinner(step));
        }
    }

    fn step_skipped(&self, step: &str, reason: &str) {
        println!("  {}", step_line(&StepRecord::skipped(step, reason)));
    }

    fn step_finished(&self, record: &StepRecord) {
        if let Some(pb) = self.take_spinner() {
            pb.finish_and_clear();
        }
        println!("  {}", step_line(record));

        if self.verbose && !record.outputs.is_empty() {
            for (key, value) in &record.outputs {
                println!("      {} = {}", key.dimmed(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_step_lines() {
        colored::control::set_override(false);

        let done = StepRecord::succeeded("build", Duration::from_millis(1500), BTreeMap::new());
        assert_eq!(step_line(&done), "✓ build (1.5s)");

        let skipped = StepRecord::skipped("lint", "condition `inputs.lint` is false");
        assert_eq!(step_line(&skipped), "○ lint (skipped: condition `inputs.lint` is false)");

        let failed = StepRecord::failed("push", "exit 1", Some(1), None);
        assert_eq!(step_line(&failed), "✗ push - exit 1");
    }

    #[test]
    fn test_observer_clears_spinner() {
        let observer = ConsoleObserver::new(false);
        observer.step_started("build");
        observer.step_finished(&StepRecord::succeeded("build", Duration::ZERO, BTreeMap::new()));
        assert!(observer.take_spinner().is_none());
    }
}
