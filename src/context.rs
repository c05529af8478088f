// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Per-run state
//!
//! A `RunContext` is created once per pipeline invocation by the resolver,
//! owned by the run for its whole lifetime, and dropped when the run ends.
//! Dropping it wipes the secrets it holds.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pipeline::InputValue;
use crate::secrets::{SecretHandle, SecretVault};
use crate::version::BuildVersion;

/// Input values after defaults and validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResolvedInputs {
    values: BTreeMap<String, InputValue>,
}

impl ResolvedInputs {
    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.values.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: InputValue) {
        self.values.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Whether a step runs in this invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDecision {
    Run,
    Skip { reason: String },
}

/// A step together with its enablement decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub name: String,
    pub decision: StepDecision,
}

impl PlannedStep {
    pub fn enabled(&self) -> bool {
        self.decision == StepDecision::Run
    }
}

/// State of a single pipeline run
#[derive(Debug)]
pub struct RunContext {
    pipeline: String,
    inputs: ResolvedInputs,
    secrets: SecretVault,
    plan: Vec<PlannedStep>,
    working_dir: PathBuf,
    version: Option<BuildVersion>,
    profile: Option<String>,
    outputs: BTreeMap<String, BTreeMap<String, String>>,
}

impl RunContext {
    pub fn new(
        pipeline: impl Into<String>,
        inputs: ResolvedInputs,
        secrets: SecretVault,
        plan: Vec<PlannedStep>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            inputs,
            secrets,
            plan,
            working_dir: working_dir.into(),
            version: None,
            profile: None,
            outputs: BTreeMap::new(),
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn inputs(&self) -> &ResolvedInputs {
        &self.inputs
    }

    pub fn secrets(&self) -> &SecretVault {
        &self.secrets
    }

    pub fn secrets_mut(&mut self) -> &mut SecretVault {
        &mut self.secrets
    }

    /// Handle for a secret the run received
    pub fn secret(&self, name: &str) -> Option<SecretHandle> {
        self.secrets.handle(name)
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn plan(&self) -> &[PlannedStep] {
        &self.plan
    }

    /// Enablement decision for a step, if the step is part of the plan
    pub fn decision(&self, step: &str) -> Option<&StepDecision> {
        self.plan.iter().find(|p| p.name == step).map(|p| &p.decision)
    }

    pub fn version(&self) -> Option<&BuildVersion> {
        self.version.as_ref()
    }

    pub fn set_version(&mut self, version: BuildVersion) {
        self.version = Some(version);
    }

    /// Name of the selected artifact profile
    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn set_profile(&mut self, profile: impl Into<String>) {
        self.profile = Some(profile.into());
    }

    pub fn output(&self, step: &str, key: &str) -> Option<&str> {
        self.outputs.get(step)?.get(key).map(String::as_str)
    }

    pub fn step_outputs(&self, step: &str) -> Option<&BTreeMap<String, String>> {
        self.outputs.get(step)
    }

    pub fn record_outputs(&mut self, step: impl Into<String>, outputs: BTreeMap<String, String>) {
        self.outputs.insert(step.into(), outputs);
    }

    /// Wipe all secret material held by the run
    pub fn release_secrets(&mut self) {
        self.secrets.clear();
    }
}
