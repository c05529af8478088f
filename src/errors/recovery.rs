// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from a failed run.

use super::ShipflowError;

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
}

impl RecoverySuggestion {
    /// Pick a suggestion for an error, if one applies
    pub fn for_error(error: &ShipflowError) -> Option<Self> {
        match error {
            ShipflowError::IncompleteHistory { .. } => Some(Self::fetch_full_history()),
            ShipflowError::MissingSecret { secret, .. } => Some(Self::supply_secret(secret)),
            ShipflowError::SecretDecode { secret, .. } => Some(Self::reencode_secret(secret)),
            ShipflowError::Timeout { .. } => Some(Self::raise_timeout()),
            ShipflowError::ShellNotFound { shell, .. } => Some(Self::install_shell(shell)),
            _ => None,
        }
    }

    /// Suggest fetching the complete commit history
    pub fn fetch_full_history() -> Self {
        Self {
            action: "Fetch the full commit history".into(),
            steps: vec![
                "Build versions count every commit reachable from the revision".into(),
                "A shallow clone cannot provide that count".into(),
            ],
            commands: vec![
                "# Convert an existing shallow clone:".into(),
                "git fetch --unshallow".into(),
                "".into(),
                "# Or pass a known count explicitly:".into(),
                "shipflow run <pipeline> --commit-count <n>".into(),
            ],
        }
    }

    /// Suggest supplying a missing secret
    pub fn supply_secret(secret: &str) -> Self {
        Self {
            action: format!("Supply secret '{}'", secret),
            steps: vec![
                "Secrets are never read implicitly from the environment".into(),
                "Pass each one explicitly when starting the run".into(),
            ],
            commands: vec![
                "# From an environment variable of the same name:".into(),
                format!("shipflow run <pipeline> --secret-env {}", secret),
                "".into(),
                "# From a file:".into(),
                format!("shipflow run <pipeline> --secret-file {}=<path>", secret),
            ],
        }
    }

    /// Suggest re-encoding a malformed base64 payload
    pub fn reencode_secret(secret: &str) -> Self {
        Self {
            action: format!("Re-encode secret '{}'", secret),
            steps: vec![
                "The payload must be standard base64 (RFC 4648, with padding)".into(),
                "Line breaks are tolerated, other characters are not".into(),
            ],
            commands: vec!["base64 -w0 <file>".into()],
        }
    }

    /// Suggest raising the run budget
    pub fn raise_timeout() -> Self {
        Self {
            action: "Raise the run timeout".into(),
            steps: vec![
                "The budget covers every step of the run, not a single step".into(),
            ],
            commands: vec![
                "# In the pipeline definition:".into(),
                "timeout_secs: 3600".into(),
                "".into(),
                "# Or for a single invocation:".into(),
                "shipflow run <pipeline> --timeout 3600".into(),
            ],
        }
    }

    /// Suggest installing a missing shell
    pub fn install_shell(shell: &str) -> Self {
        Self {
            action: format!("Install {}", shell),
            steps: vec![format!("Install {} and ensure it's in your PATH", shell)],
            commands: vec![],
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
