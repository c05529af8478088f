// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Terminal color utilities
//!
//! Consistent styling for run, step and gate outcomes.

use colored::{ColoredString, Colorize};

use crate::gate::PredicateResult;
use crate::report::{RunStatus, StepStatus};

/// Colored label for a run status
pub fn status_label(status: RunStatus) -> ColoredString {
    let text = status.to_string().to_uppercase();
    match status {
        RunStatus::Passed => text.green().bold(),
        RunStatus::GateFailed => text.yellow().bold(),
        _ => text.red().bold(),
    }
}

/// Marker shown in front of a step line
pub fn step_marker(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Planned => "→".blue(),
        StepStatus::Succeeded => "✓".green(),
        StepStatus::Skipped => "○".dimmed(),
        StepStatus::Failed => "✗".red(),
        StepStatus::TimedOut => "⏱".red(),
    }
}

/// One gate line, e.g. `✓ release-tag: tag 'v1.2.0' matches ...`
pub fn gate_line(result: &PredicateResult) -> String {
    let marker = if result.passed() {
        "✓".green()
    } else if result.required {
        "✗".red()
    } else {
        "⚠".yellow()
    };
    let optional = if result.required { "" } else { " (optional)" };
    format!("{} {}{}: {}", marker, result.name.bold(), optional.dimmed(), result.reason)
}

/// Print a styled section
pub fn print_section(title: &str) {
    println!();
    println!("{}:", title.bold());
}

/// Print a success check
pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green(), msg);
}

/// Print an error cross
pub fn print_error(msg: &str) {
    println!("  {} {}", "✗".red(), msg);
}

/// Print a warning
pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠".yellow(), msg);
}

/// Print an info item
pub fn print_info(msg: &str) {
    println!("  {} {}", "→".blue(), msg);
}
