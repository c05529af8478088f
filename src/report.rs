// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Machine-readable run summary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::artifacts::Assembly;
use crate::errors::{ErrorKind, RecoverySuggestion, ShipflowError};
use crate::gate::PredicateResult;
use crate::version::BuildVersion;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    ValidationFailed,
    MissingSecret,
    SecretDecodeFailed,
    IncompleteHistory,
    StepFailed,
    TimedOut,
    GateFailed,
    /// Cancelled by a signal; placed material was removed
    Interrupted,
    Error,
}

impl RunStatus {
    /// Process exit code for this status
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::Error => 1,
            Self::ValidationFailed => 2,
            Self::MissingSecret => 3,
            Self::SecretDecodeFailed => 4,
            Self::IncompleteHistory => 5,
            Self::StepFailed => 6,
            Self::TimedOut => 7,
            Self::GateFailed => 8,
            Self::Interrupted => 130,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Passed
    }
}

impl From<ErrorKind> for RunStatus {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Self::ValidationFailed,
            ErrorKind::MissingSecret => Self::MissingSecret,
            ErrorKind::SecretDecode => Self::SecretDecodeFailed,
            ErrorKind::IncompleteHistory => Self::IncompleteHistory,
            ErrorKind::StepExecution => Self::StepFailed,
            ErrorKind::Timeout => Self::TimedOut,
            ErrorKind::Internal => Self::Error,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::ValidationFailed => "validation failed",
            Self::MissingSecret => "missing secret",
            Self::SecretDecodeFailed => "secret decode failed",
            Self::IncompleteHistory => "incomplete history",
            Self::StepFailed => "step failed",
            Self::TimedOut => "timed out",
            Self::GateFailed => "gate failed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Planned,
    Succeeded,
    Skipped,
    Failed,
    TimedOut,
}

/// What happened to one step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
    /// Masked tail of the captured output, kept for failed steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl StepRecord {
    fn new(name: &str, status: StepStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            reason: None,
            exit_code: None,
            duration_ms: None,
            outputs: BTreeMap::new(),
            output: None,
        }
    }

    pub fn succeeded(name: &str, duration: Duration, outputs: BTreeMap<String, String>) -> Self {
        Self {
            exit_code: Some(0),
            duration_ms: Some(duration.as_millis() as u64),
            outputs,
            ..Self::new(name, StepStatus::Succeeded)
        }
    }

    /// Enabled step in a dry run
    pub fn planned(name: &str) -> Self {
        Self::new(name, StepStatus::Planned)
    }

    pub fn skipped(name: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(name, StepStatus::Skipped)
        }
    }

    pub fn failed(name: &str, reason: impl Into<String>, exit_code: Option<i32>, output: Option<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            exit_code,
            output,
            ..Self::new(name, StepStatus::Failed)
        }
    }

    pub fn timed_out(name: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(name, StepStatus::TimedOut)
        }
    }
}

/// Error details in the summary
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl From<&ShipflowError> for ErrorSummary {
    fn from(error: &ShipflowError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            secret: error.secret().map(str::to_string),
            step: error.step().map(str::to_string),
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub pipeline: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<BuildVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Assembly>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_results: Option<Vec<PredicateResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
    pub duration_ms: u64,
    #[serde(skip)]
    pub recovery: Option<RecoverySuggestion>,
}

impl RunReport {
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Passed,
            pipeline: pipeline.into(),
            version: None,
            failed_step: None,
            profile: None,
            steps: Vec::new(),
            gate_results: None,
            error: None,
            dry_run: false,
            duration_ms: 0,
            recovery: None,
        }
    }

    /// Record the error that ended the run
    pub fn fail(&mut self, error: &ShipflowError) {
        self.status = error.kind().into();
        if matches!(
            error,
            ShipflowError::StepExecution { .. } | ShipflowError::Timeout { .. }
        ) {
            self.failed_step = error.step().map(str::to_string);
        }
        self.error = Some(error.into());
        self.recovery = RecoverySuggestion::for_error(error);
    }

    /// Report for a run that was cancelled before it could finish
    pub fn interrupted(pipeline: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            status: RunStatus::Interrupted,
            duration_ms,
            ..Self::new(pipeline)
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn to_json(&self) -> Result<String, ShipflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let all = [
            RunStatus::Passed,
            RunStatus::ValidationFailed,
            RunStatus::MissingSecret,
            RunStatus::SecretDecodeFailed,
            RunStatus::IncompleteHistory,
            RunStatus::StepFailed,
            RunStatus::TimedOut,
            RunStatus::GateFailed,
            RunStatus::Interrupted,
            RunStatus::Error,
        ];
        let mut codes: Vec<u8> = all.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(RunStatus::Passed.exit_code(), 0);
    }

    #[test]
    fn test_step_failure_sets_failed_step() {
        let mut report = RunReport::new("docker");
        report.fail(&ShipflowError::StepExecution {
            step: "push".into(),
            exit_code: Some(1),
            output: String::new(),
        });

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "step_failed");
        assert_eq!(json["failed_step"], "push");
        assert_eq!(json["error"]["kind"], "step_execution");
        assert!(json.get("gate_results").is_none());
        assert!(json.get("version").is_none());
        assert_eq!(report.exit_code(), 6);
    }

    #[test]
    fn test_missing_secret_names_the_secret() {
        let mut report = RunReport::new("mobile");
        report.fail(&ShipflowError::MissingSecret {
            secret: "KEYSTORE".into(),
            step: Some("sign".into()),
        });

        assert_eq!(report.status, RunStatus::MissingSecret);
        assert_eq!(report.failed_step, None);
        let error = report.error.unwrap();
        assert_eq!(error.secret.as_deref(), Some("KEYSTORE"));
        assert_eq!(error.step.as_deref(), Some("sign"));
    }

    #[test]
    fn test_skipped_record_omits_empty_fields() {
        let record = StepRecord::skipped("lint", "condition `inputs.lint` is false");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "skipped");
        assert!(json.get("exit_code").is_none());
        assert!(json.get("outputs").is_none());
    }
}
