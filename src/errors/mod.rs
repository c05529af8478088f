// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Error types
//!
//! Every failure a run can hit is a structured variant carrying the step,
//! secret or pipeline it concerns, so the same value can drive both the
//! human-facing diagnostic and the machine-readable run summary.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for shipflow operations
pub type ShipflowResult<T> = Result<T, ShipflowError>;

/// Main error type for shipflow
#[derive(Error, Debug, Diagnostic)]
pub enum ShipflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Caller Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Invalid input: {message}")]
    #[diagnostic(code(shipflow::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("{}", missing_secret_message(.secret, .step.as_deref()))]
    #[diagnostic(
        code(shipflow::missing_secret),
        help("Supply '{secret}' with --secret-env or --secret-file")
    )]
    MissingSecret {
        secret: String,
        step: Option<String>,
    },

    #[error("Secret '{secret}' could not be decoded: {reason}")]
    #[diagnostic(
        code(shipflow::secret_decode),
        help("Re-encode the payload without line wrapping, e.g. 'base64 -w0 <file>'")
    )]
    SecretDecode { secret: String, reason: String },

    #[error("Commit history is incomplete: {reason}")]
    #[diagnostic(
        code(shipflow::incomplete_history),
        help("Check out the full history (git fetch --unshallow, or fetch-depth: 0)")
    )]
    IncompleteHistory { reason: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Step '{step}' failed{}", exit_code_suffix(*.exit_code))]
    #[diagnostic(code(shipflow::step_failed))]
    StepExecution {
        step: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Step '{step}' exceeded the run budget of {}s", .budget.as_secs())]
    #[diagnostic(
        code(shipflow::timeout),
        help("Raise 'timeout_secs' in the pipeline or pass a larger --timeout")
    )]
    Timeout { step: String, budget: Duration },

    #[error("Shell '{shell}' required by step '{step}' is not available")]
    #[diagnostic(code(shipflow::shell_not_found))]
    ShellNotFound { shell: String, step: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline '{name}' not found")]
    #[diagnostic(
        code(shipflow::pipeline_not_found),
        help("Run 'shipflow list' to see the pipelines that were loaded")
    )]
    PipelineNotFound { name: String },

    #[error("Invalid pipeline configuration: {reason}")]
    #[diagnostic(code(shipflow::invalid_pipeline))]
    InvalidPipeline {
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(shipflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(shipflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(shipflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(shipflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON error: {message}")]
    #[diagnostic(code(shipflow::json_error))]
    Json { message: String },
}

fn missing_secret_message(secret: &str, step: Option<&str>) -> String {
    match step {
        Some(step) => format!("Secret '{}' is required by step '{}' but was not supplied", secret, step),
        None => format!("Secret '{}' is required but was not supplied", secret),
    }
}

fn exit_code_suffix(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => String::new(),
    }
}

/// Failure category, as reported in the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    MissingSecret,
    SecretDecode,
    IncompleteHistory,
    StepExecution,
    Timeout,
    Internal,
}

impl ShipflowError {
    /// Shorthand for a validation error without help text
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Shorthand for an invalid pipeline error without help text
    pub fn invalid_pipeline(reason: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            reason: reason.into(),
            help: None,
        }
    }

    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::PipelineNotFound { .. } | Self::InvalidPipeline { .. } => {
                ErrorKind::Validation
            }
            Self::MissingSecret { .. } => ErrorKind::MissingSecret,
            Self::SecretDecode { .. } => ErrorKind::SecretDecode,
            Self::IncompleteHistory { .. } => ErrorKind::IncompleteHistory,
            Self::StepExecution { .. } => ErrorKind::StepExecution,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ShellNotFound { .. }
            | Self::FileReadError { .. }
            | Self::FileWriteError { .. }
            | Self::Io { .. }
            | Self::Yaml { .. }
            | Self::Json { .. } => ErrorKind::Internal,
        }
    }

    /// Step this error concerns, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::MissingSecret { step, .. } => step.as_deref(),
            Self::StepExecution { step, .. }
            | Self::Timeout { step, .. }
            | Self::ShellNotFound { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Secret this error concerns, if any
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::MissingSecret { secret, .. } | Self::SecretDecode { secret, .. } => Some(secret),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ShipflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ShipflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ShipflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}
