// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Step execution
//!
//! Runs the steps of a pipeline strictly in declaration order. Disabled steps
//! are skipped, the first failing step halts the run, and nothing is retried.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::context::{RunContext, StepDecision};
use crate::errors::ShipflowError;
use crate::executors::{ExecutionResult, Executor, StepInvocation};
use crate::pipeline::{template, PipelineSpec, StepSpec};
use crate::report::{StepRecord, StepStatus};

/// Captured output beyond this many bytes is cut from the front
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Variable naming the file a step appends its outputs to
pub const OUTPUT_ENV: &str = "SHIPFLOW_OUTPUT";

/// Receives step lifecycle events as a run progresses
pub trait RunObserver: Send + Sync {
    fn step_started(&self, _step: &str) {}
    fn step_skipped(&self, _step: &str, _reason: &str) {}
    fn step_finished(&self, _record: &StepRecord) {}
}

/// Observer that ignores every event
#[derive(Debug, Default)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Run-level time budget
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self::starting_at(Instant::now(), budget)
    }

    pub fn starting_at(started: Instant, budget: Duration) -> Self {
        Self { started, budget }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }
}

/// Outcome of running all steps
#[derive(Debug)]
pub struct StepsOutcome {
    /// One record per step reached, in declaration order
    pub records: Vec<StepRecord>,
    /// The error that halted the run, if any
    pub error: Option<ShipflowError>,
}

impl StepsOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Sequential step executor
pub struct StepExecutor<'a> {
    executor: &'a dyn Executor,
    observer: &'a dyn RunObserver,
    deadline: Option<Deadline>,
    state_dir: Option<PathBuf>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(executor: &'a dyn Executor, observer: &'a dyn RunObserver) -> Self {
        Self {
            executor,
            observer,
            deadline: None,
            state_dir: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Deadline>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Directory for step output files (default: `.shipflow/outputs` in the run directory)
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Verify that the shell of every enabled step exists
    pub async fn check_shells(&self, spec: &PipelineSpec, ctx: &RunContext) -> Result<(), ShipflowError> {
        for step in &spec.steps {
            if ctx.decision(&step.name) != Some(&StepDecision::Run) {
                continue;
            }
            if !self.executor.check_available(&step.shell).await {
                return Err(ShipflowError::ShellNotFound {
                    shell: step.shell.clone(),
                    step: step.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run every step in order
    pub async fn execute(&self, spec: &PipelineSpec, ctx: &mut RunContext) -> StepsOutcome {
        let mut records = Vec::with_capacity(spec.steps.len());

        for (index, step) in spec.steps.iter().enumerate() {
            match ctx.decision(&step.name).cloned() {
                Some(StepDecision::Run) => {}
                Some(StepDecision::Skip { reason }) => {
                    tracing::info!(step = %step.name, %reason, "Skipping step");
                    self.observer.step_skipped(&step.name, &reason);
                    records.push(StepRecord::skipped(&step.name, reason));
                    continue;
                }
                None => {
                    let error = ShipflowError::validation(format!(
                        "Step '{}' is not part of the run plan",
                        step.name
                    ));
                    records.push(StepRecord::failed(&step.name, error.to_string(), None, None));
                    return StepsOutcome {
                        records,
                        error: Some(error),
                    };
                }
            }

            self.observer.step_started(&step.name);
            tracing::info!(step = %step.name, "Running step");

            let (record, error) = self.run_step(index, step, spec, ctx).await;
            self.observer.step_finished(&record);
            records.push(record);

            if let Some(error) = error {
                tracing::error!(step = %step.name, error = %error, "Step failed, halting run");
                return StepsOutcome {
                    records,
                    error: Some(error),
                };
            }
        }

        StepsOutcome { records, error: None }
    }

    async fn run_step(
        &self,
        index: usize,
        step: &StepSpec,
        spec: &PipelineSpec,
        ctx: &mut RunContext,
    ) -> (StepRecord, Option<ShipflowError>) {
        let output_file = self.output_file(ctx, index, step);
        if let Err(e) = prepare_output_file(&output_file) {
            return (StepRecord::failed(&step.name, e.to_string(), None, None), Some(e));
        }

        let result = {
            let invocation = match build_invocation(step, spec, ctx, &output_file) {
                Ok(invocation) => invocation,
                Err(e) => return (StepRecord::failed(&step.name, e.to_string(), None, None), Some(e)),
            };
            tracing::debug!(invocation = ?invocation, "Step invocation");
            self.invoke(&invocation).await
        };

        let result = match result {
            Ok(result) => result,
            Err(e @ ShipflowError::Timeout { .. }) => {
                discard_output_file(&output_file);
                return (StepRecord::timed_out(&step.name, e.to_string()), Some(e));
            }
            Err(e) => {
                discard_output_file(&output_file);
                return (StepRecord::failed(&step.name, e.to_string(), None, None), Some(e));
            }
        };

        let output = tail(&ctx.secrets().mask(&result.combined_output()), MAX_CAPTURED_OUTPUT);
        let duration = result.duration;

        if !result.success {
            discard_output_file(&output_file);
            let error = ShipflowError::StepExecution {
                step: step.name.clone(),
                exit_code: result.exit_code,
                output: output.clone(),
            };
            let mut record = StepRecord::failed(&step.name, error.to_string(), result.exit_code, Some(output));
            record.duration_ms = Some(duration.as_millis() as u64);
            return (record, Some(error));
        }

        let outputs = match collect_outputs(&output_file, step) {
            Ok(outputs) => outputs,
            Err(e) => return (StepRecord::failed(&step.name, e.to_string(), Some(0), None), Some(e)),
        };
        let masked: BTreeMap<String, String> = outputs
            .iter()
            .map(|(k, v)| (k.clone(), ctx.secrets().mask(v)))
            .collect();
        ctx.record_outputs(step.name.clone(), outputs);

        tracing::info!(step = %step.name, duration_ms = duration.as_millis() as u64, "Step succeeded");
        (StepRecord::succeeded(&step.name, duration, masked), None)
    }

    async fn invoke(&self, invocation: &StepInvocation<'_>) -> Result<ExecutionResult, ShipflowError> {
        let Some(deadline) = self.deadline else {
            return self.executor.execute(invocation).await;
        };

        let timeout = || ShipflowError::Timeout {
            step: invocation.step.to_string(),
            budget: deadline.budget(),
        };

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(timeout());
        }

        // Dropping the execute future kills the step's process group.
        tokio::time::timeout(remaining, self.executor.execute(invocation))
            .await
            .map_err(|_| timeout())?
    }

    fn output_file(&self, ctx: &RunContext, index: usize, step: &StepSpec) -> PathBuf {
        let dir = self
            .state_dir
            .clone()
            .unwrap_or_else(|| ctx.working_dir().join(".shipflow").join("outputs"));
        dir.join(format!("{:02}-{}.env", index, sanitize(&step.name)))
    }
}

fn build_invocation<'c>(
    step: &'c StepSpec,
    spec: &PipelineSpec,
    ctx: &'c RunContext,
    output_file: &Path,
) -> Result<StepInvocation<'c>, ShipflowError> {
    let command = template::render(&step.run, ctx)?;

    let mut env: HashMap<String, String> = spec.env.clone();
    env.extend(step.env.clone());
    env.insert("SHIPFLOW_PIPELINE".into(), ctx.pipeline().to_string());
    if let Some(version) = ctx.version() {
        env.insert("SHIPFLOW_VERSION".into(), version.to_string());
    }
    if let Some(profile) = ctx.profile() {
        env.insert("SHIPFLOW_PROFILE".into(), profile.to_string());
    }
    env.insert(OUTPUT_ENV.into(), output_file.display().to_string());

    let mut secret_env = Vec::with_capacity(step.secrets.len());
    for name in &step.secrets {
        let blob = ctx.secrets().get(name).ok_or_else(|| ShipflowError::MissingSecret {
            secret: name.clone(),
            step: Some(step.name.clone()),
        })?;
        let value = blob.as_str().ok_or_else(|| ShipflowError::SecretDecode {
            secret: name.clone(),
            reason: "value is not valid UTF-8 and cannot be exported to the environment".into(),
        })?;
        secret_env.push((name.as_str(), value));
    }

    let working_dir = match &step.working_directory {
        Some(dir) => ctx.working_dir().join(dir),
        None => ctx.working_dir().to_path_buf(),
    };

    Ok(StepInvocation {
        step: &step.name,
        shell: &step.shell,
        command,
        working_dir,
        env,
        secret_env,
    })
}

fn prepare_output_file(path: &Path) -> Result<(), ShipflowError> {
    let write_error = |e: std::io::Error| ShipflowError::FileWriteError {
        path: path.to_path_buf(),
        error: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_error)?;
    }
    std::fs::write(path, b"").map_err(write_error)
}

/// Read `key=value` and `key<<DELIMITER` blocks, keeping declared keys only
fn collect_outputs(path: &Path, step: &StepSpec) -> Result<BTreeMap<String, String>, ShipflowError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(ShipflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })
        }
    };
    discard_output_file(path);

    let mut outputs = BTreeMap::new();
    let mut lines = content.lines();
    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        let (key, value) = match (line.split_once('='), line.split_once("<<")) {
            (Some((key, value)), heredoc) if heredoc.map_or(true, |(k, _)| k.len() > key.len()) => {
                (key.trim().to_string(), value.to_string())
            }
            (_, Some((key, delimiter))) => {
                let delimiter = delimiter.trim();
                let mut block = Vec::new();
                for next in lines.by_ref() {
                    if next == delimiter {
                        break;
                    }
                    block.push(next);
                }
                (key.trim().to_string(), block.join("\n"))
            }
            _ => {
                tracing::warn!(step = %step.name, line = %line, "Ignoring malformed output line");
                continue;
            }
        };

        if step.outputs.contains(&key) {
            outputs.insert(key, value);
        } else {
            tracing::warn!(step = %step.name, key = %key, "Ignoring undeclared output");
        }
    }

    Ok(outputs)
}

fn discard_output_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "Could not remove step output file"),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Last `max` bytes of `text`, on a char boundary
fn tail(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... truncated ...]\n{}", &text[start..])
}
