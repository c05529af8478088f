// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Step executors
//!
//! This module provides the executor trait, which runs one fully rendered
//! step invocation, and its shell implementation.

mod shell;

pub use shell::ShellExecutor;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ShipflowError;

/// Everything needed to run one step
pub struct StepInvocation<'a> {
    /// Step name
    pub step: &'a str,

    /// Shell to run the command with
    pub shell: &'a str,

    /// Rendered command
    pub command: String,

    /// Directory the command runs in
    pub working_dir: PathBuf,

    /// Plain environment variables
    pub env: HashMap<String, String>,

    /// Secret environment variables, borrowed from the run's vault
    pub secret_env: Vec<(&'a str, &'a str)>,
}

impl fmt::Debug for StepInvocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepInvocation")
            .field("step", &self.step)
            .field("shell", &self.shell)
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env)
            .field(
                "secret_env",
                &self.secret_env.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Result of running a step
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the command exited successfully
    pub success: bool,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// Exit code (absent when killed by a signal)
    pub exit_code: Option<i32>,

    /// Execution duration
    pub duration: Duration,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(stdout: String, duration: Duration) -> Self {
        Self {
            success: true,
            stdout,
            stderr: String::new(),
            exit_code: Some(0),
            duration,
        }
    }

    /// Create a failed result
    pub fn failure(stderr: String, exit_code: Option<i32>, duration: Duration) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr,
            exit_code,
            duration,
        }
    }

    /// Standard output followed by standard error
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Trait for step executors
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a step to completion
    ///
    /// A command that runs and exits non-zero is an `Ok` result with
    /// `success == false`; `Err` means the command could not be run at all.
    async fn execute(&self, invocation: &StepInvocation<'_>) -> Result<ExecutionResult, ShipflowError>;

    /// Check that a shell can be used
    async fn check_available(&self, shell: &str) -> bool;
}
