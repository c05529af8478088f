// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Run orchestration
//!
//! One run flows through: resolve inputs and secrets, compute the build
//! version, place signing material, run the steps, remove the signing
//! material, evaluate the release gate. Every outcome ends in a
//! [`RunReport`]; secrets are dropped (and wiped) when the run returns.
//!
//! Signing material and run state are held by guards, so dropping a run
//! future part way through still removes them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::artifacts::{ArtifactAssembler, Assembly};
use crate::config::EngineConfig;
use crate::context::{RunContext, StepDecision};
use crate::errors::ShipflowError;
use crate::executors::{Executor, ShellExecutor};
use crate::gate::{GateFacts, GateVerdict, PolicyGate};
use crate::pipeline::{Deadline, NoopObserver, PipelineSpec, RunObserver, StepExecutor};
use crate::report::{RunReport, RunStatus, StepRecord};
use crate::resolver::ParameterResolver;
use crate::secrets::SecretVault;
use crate::store::DefinitionStore;
use crate::version::{self, BuildVersion, Clock, CommitCounter, GitHistory, SystemClock, VersionSeparator};

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Everything a caller supplies for one run
#[derive(Debug)]
pub struct RunRequest {
    pub pipeline: String,
    pub inputs: HashMap<String, String>,
    pub secrets: SecretVault,
    pub facts: GateFacts,
    /// Isolated directory the run works in
    pub working_dir: PathBuf,
    /// Overrides the pipeline's `timeout_secs`
    pub timeout: Option<Duration>,
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(pipeline: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: pipeline.into(),
            inputs: HashMap::new(),
            secrets: SecretVault::new(),
            facts: GateFacts::default(),
            working_dir: working_dir.into(),
            timeout: None,
            dry_run: false,
        }
    }

    pub fn input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn secrets(mut self, secrets: SecretVault) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn facts(mut self, facts: GateFacts) -> Self {
        self.facts = facts;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Pipeline engine
///
/// Holds no per-run state, so independent runs may share one engine.
pub struct Engine {
    store: DefinitionStore,
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    clock: Arc<dyn Clock>,
    commits: Option<Arc<dyn CommitCounter>>,
    observer: Arc<dyn RunObserver>,
}

impl Engine {
    pub fn new(store: DefinitionStore, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            executor: Arc::new(ShellExecutor::new()),
            clock: Arc::new(SystemClock),
            commits: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_executor(mut self, executor: impl Executor + 'static) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Use a fixed commit counter instead of asking git in the run directory
    pub fn with_commit_counter(mut self, counter: impl CommitCounter + 'static) -> Self {
        self.commits = Some(Arc::new(counter));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a pipeline to completion
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(&request.pipeline);
        report.dry_run = request.dry_run;

        tracing::info!(pipeline = %request.pipeline, dry_run = request.dry_run, "Starting run");

        if let Err(e) = self.execute(request, started, &mut report).await {
            tracing::error!(error = %e, "Run failed");
            report.fail(&e);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(status = %report.status, duration_ms = report.duration_ms, "Run finished");
        report
    }

    async fn execute(
        &self,
        request: RunRequest,
        started: Instant,
        report: &mut RunReport,
    ) -> Result<(), ShipflowError> {
        let RunRequest {
            pipeline,
            inputs,
            secrets,
            facts,
            working_dir,
            timeout,
            dry_run,
        } = request;

        let spec = self.store.get(&pipeline)?;
        let gate = spec.gate.as_ref().map(PolicyGate::new).transpose()?;
        let deadline = timeout
            .or(spec.timeout_secs.map(Duration::from_secs))
            .or(self.config.default_timeout())
            .map(|budget| Deadline::starting_at(started, budget));

        let mut ctx = ParameterResolver::new(&spec).resolve(&inputs, secrets, &working_dir)?;

        if let Some(versioning) = &spec.versioning {
            let version = self.build_version(&working_dir, versioning.separator).await?;
            tracing::info!(version = %version, "Computed build version");
            ctx.set_version(version.clone());
            report.version = Some(version);
        }

        let assembler = if spec.signing.is_some() {
            Some(ArtifactAssembler::new(spec.profiles()?))
        } else {
            None
        };

        if dry_run {
            if let Some(assembler) = &assembler {
                let selection = assembler.select(&ctx);
                report.profile = Some(Assembly {
                    profile: selection.profile.name.clone(),
                    fallback: selection.is_fallback(),
                    written: Vec::new(),
                    skipped: selection.skipped,
                });
            }
            report.steps = planned_steps(&ctx);
            return Ok(());
        }

        let state = RunState::new(self.run_state_dir(&working_dir, &spec));
        let steps = StepExecutor::new(self.executor.as_ref(), self.observer.as_ref())
            .with_deadline(deadline)
            .with_state_dir(state.dir());
        steps.check_shells(&spec, &ctx).await?;

        let placed = match &assembler {
            Some(assembler) => {
                let (assembly, guard) = assembler.assemble(&mut ctx)?;
                ctx.set_profile(assembly.profile.clone());
                report.profile = Some(assembly);
                if spec.cleanup_signing_material() {
                    Some(guard)
                } else {
                    let kept = guard.keep();
                    tracing::info!(files = kept.len(), "Keeping signing material after the run");
                    None
                }
            }
            None => None,
        };

        let outcome = steps.execute(&spec, &mut ctx).await;

        if let Some(guard) = placed {
            let removed = guard.release();
            tracing::debug!(files = removed, "Removed signing material");
        }
        drop(state);

        report.steps = outcome.records;
        ctx.release_secrets();
        if let Some(error) = outcome.error {
            return Err(error);
        }

        if let Some(gate) = gate {
            let verdict = gate.evaluate(&ctx, &facts);
            if !verdict.passed {
                report.status = RunStatus::GateFailed;
            }
            report.gate_results = Some(verdict.results);
        }

        Ok(())
    }

    /// Compute the build version for a checkout
    pub async fn build_version(
        &self,
        working_dir: &std::path::Path,
        separator: VersionSeparator,
    ) -> Result<BuildVersion, ShipflowError> {
        let count = match &self.commits {
            Some(counter) => counter.commit_count().await?,
            None => {
                GitHistory::new(working_dir)
                    .with_revision(self.config.revision.clone())
                    .commit_count()
                    .await?
            }
        };
        version::generate(self.clock.today(), Some(count), separator)
    }

    /// Evaluate a pipeline's gate against caller facts without running it
    ///
    /// Output rules fail here, since no step has produced anything.
    pub fn evaluate_gate(
        &self,
        pipeline: &str,
        inputs: &HashMap<String, String>,
        facts: &GateFacts,
    ) -> Result<GateVerdict, ShipflowError> {
        let spec = self.store.get(pipeline)?;
        let gate = PolicyGate::new(&spec.gate.clone().unwrap_or_default())?;

        let resolver = ParameterResolver::new(&spec);
        let resolved = resolver.resolve_inputs(inputs)?;
        let plan = resolver.plan(&resolved);
        let ctx = RunContext::new(spec.name.clone(), resolved, SecretVault::new(), plan, ".");

        Ok(gate.evaluate(&ctx, facts))
    }

    fn run_state_dir(&self, working_dir: &std::path::Path, spec: &PipelineSpec) -> PathBuf {
        let run = format!(
            "{}-{}-{}",
            spec.name,
            std::process::id(),
            RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        working_dir.join(&self.config.state_dir).join(run)
    }
}

/// Per-run directory for step output files, removed on drop
struct RunState {
    dir: PathBuf,
}

impl RunState {
    fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for RunState {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(dir = %self.dir.display(), error = %e, "Could not remove run state"),
        }
    }
}

fn planned_steps(ctx: &RunContext) -> Vec<StepRecord> {
    ctx.plan()
        .iter()
        .map(|planned| match &planned.decision {
            StepDecision::Run => StepRecord::planned(&planned.name),
            StepDecision::Skip { reason } => StepRecord::skipped(&planned.name, reason.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StepStatus;
    use crate::version::{FixedClock, KnownCount};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    const MOBILE: &str = r#"
name: mobile
inputs:
  - name: build_type
    type: enum
    allowed: [debug, release]
    default: debug
secrets:
  - name: KEYSTORE
    required: false
  - name: KEYSTORE_PROPERTIES
    required: false
versioning:
  separator: underscore
signing:
  profiles:
    - name: android-signed
      requires: [KEYSTORE, KEYSTORE_PROPERTIES]
      placements:
        - secret: KEYSTORE
          path: android/app/release.keystore
        - secret: KEYSTORE_PROPERTIES
          path: android/keystore.properties
steps:
  - name: check-signing
    run: test -f android/app/release.keystore && echo "v=${{ version }} p=${{ profile }}"
  - name: build
    run: echo "artifact=app-${{ version }}.apk" >> "$SHIPFLOW_OUTPUT"
    outputs: [artifact]
gate:
  predicates:
    - name: release-tag
      rule:
        tag:
          pattern: 'v\d+\.\d+\.\d+'
          require_tag: true
    - name: main
      rule:
        branch: [main]
"#;

    const KEYSTORE: &str = "a2V5c3RvcmUtYnl0ZXM=";
    const PROPERTIES: &str = "c3RvcmVQYXNzd29yZD14";

    fn engine(yaml: &str) -> Engine {
        let mut store = DefinitionStore::new();
        store.insert(PipelineSpec::from_yaml(yaml).unwrap()).unwrap();
        Engine::new(store, EngineConfig::default())
            .with_clock(FixedClock(NaiveDate::from_ymd_opt(2025, 12, 29).unwrap()))
            .with_commit_counter(KnownCount(Some(128)))
    }

    fn signed_vault() -> SecretVault {
        SecretVault::new()
            .with("KEYSTORE", KEYSTORE)
            .with("KEYSTORE_PROPERTIES", PROPERTIES)
    }

    fn release_facts() -> GateFacts {
        GateFacts {
            branch: Some("main".into()),
            tag: Some("v1.4.0".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_signed_run_passes_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new("mobile", dir.path())
            .secrets(signed_vault())
            .facts(release_facts());

        let report = engine(MOBILE).run(request).await;

        assert_eq!(report.status, RunStatus::Passed, "{:?}", report.error);
        assert_eq!(report.version.as_ref().unwrap().to_string(), "20251229_128");
        let profile = report.profile.as_ref().unwrap();
        assert_eq!(profile.profile, "android-signed");
        assert_eq!(profile.written.len(), 2);
        assert_eq!(report.steps[1].outputs["artifact"], "app-20251229_128.apk");
        assert!(!dir.path().join("android/app/release.keystore").exists());
        assert_eq!(report.gate_results.as_ref().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unsigned_fallback_when_secrets_absent() {
        let dir = TempDir::new().unwrap();
        let yaml = MOBILE.replace("test -f android/app/release.keystore && ", "");
        let report = engine(&yaml)
            .run(RunRequest::new("mobile", dir.path()).facts(release_facts()))
            .await;

        assert_eq!(report.status, RunStatus::Passed, "{:?}", report.error);
        let profile = report.profile.unwrap();
        assert_eq!(profile.profile, "unsigned");
        assert!(profile.fallback);
        assert_eq!(profile.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_secret_fails_before_any_step() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new("mobile", dir.path()).secrets(
            SecretVault::new()
                .with("KEYSTORE", "not*base64!")
                .with("KEYSTORE_PROPERTIES", PROPERTIES),
        );

        let report = engine(MOBILE).run(request).await;

        assert_eq!(report.status, RunStatus::SecretDecodeFailed);
        assert_eq!(report.error.unwrap().secret.as_deref(), Some("KEYSTORE"));
        assert!(report.steps.is_empty());
        assert!(!dir.path().join("android").exists());
    }

    #[tokio::test]
    async fn test_missing_history_is_fatal() {
        let dir = TempDir::new().unwrap();
        let report = engine(MOBILE)
            .with_commit_counter(KnownCount(None))
            .run(RunRequest::new("mobile", dir.path()))
            .await;
        assert_eq!(report.status, RunStatus::IncompleteHistory);
        assert!(report.version.is_none());
    }

    #[tokio::test]
    async fn test_gate_failure_reports_every_predicate() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new("mobile", dir.path())
            .secrets(signed_vault())
            .facts(GateFacts {
                branch: Some("main".into()),
                ..Default::default()
            });

        let report = engine(MOBILE).run(request).await;

        assert_eq!(report.status, RunStatus::GateFailed);
        assert_eq!(report.exit_code(), 8);
        let results = report.gate_results.unwrap();
        assert_eq!(results[0].reason, "tag required but absent");
        assert!(results[1].passed());
    }

    #[tokio::test]
    async fn test_step_failure_skips_gate() {
        let dir = TempDir::new().unwrap();
        let report = engine(MOBILE)
            .run(RunRequest::new("mobile", dir.path()).facts(release_facts()))
            .await;

        assert_eq!(report.status, RunStatus::StepFailed);
        assert_eq!(report.failed_step.as_deref(), Some("check-signing"));
        assert_eq!(report.steps.len(), 1);
        assert!(report.gate_results.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_executes_nothing() {
        let dir = TempDir::new().unwrap();
        let request = RunRequest::new("mobile", dir.path())
            .secrets(signed_vault())
            .dry_run(true);

        let report = engine(MOBILE).run(request).await;

        assert_eq!(report.status, RunStatus::Passed);
        assert!(report.dry_run);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Planned));
        assert_eq!(report.profile.unwrap().profile, "android-signed");
        assert!(!dir.path().join("android").exists());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_validation_failure() {
        let dir = TempDir::new().unwrap();
        let report = engine(MOBILE).run(RunRequest::new("nope", dir.path())).await;
        assert_eq!(report.status, RunStatus::ValidationFailed);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let engine = Arc::new(engine(MOBILE));
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let (a, b) = tokio::join!(
            engine.run(
                RunRequest::new("mobile", first.path())
                    .secrets(signed_vault())
                    .facts(release_facts())
            ),
            engine.run(
                RunRequest::new("mobile", second.path())
                    .secrets(signed_vault())
                    .input("build_type", "release")
                    .facts(release_facts())
            ),
        );

        assert_eq!(a.status, RunStatus::Passed, "{:?}", a.error);
        assert_eq!(b.status, RunStatus::Passed, "{:?}", b.error);
    }

    #[tokio::test]
    async fn test_dropped_run_removes_signing_material() {
        let dir = TempDir::new().unwrap();
        let yaml = MOBILE.replace("test -f android/app/release.keystore && echo", "sleep 3; echo");
        let engine = engine(&yaml);
        let keystore = dir.path().join("android/app/release.keystore");

        let mut run = Box::pin(engine.run(RunRequest::new("mobile", dir.path()).secrets(signed_vault())));
        let placed = async {
            while !keystore.exists() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::select! {
            report = &mut run => panic!("run finished before it was dropped: {:?}", report.status),
            _ = tokio::time::timeout(Duration::from_secs(2), placed) => {}
        }
        assert!(keystore.exists());

        drop(run);

        assert!(!keystore.exists());
        assert!(!dir.path().join("android/keystore.properties").exists());
        let state = dir.path().join(".shipflow/state");
        assert!(std::fs::read_dir(&state).map_or(true, |mut entries| entries.next().is_none()));
    }

    #[tokio::test]
    async fn test_kept_signing_material_survives_the_run() {
        let dir = TempDir::new().unwrap();
        let yaml = MOBILE.replace(
            "signing:\n  profiles:",
            "signing:\n  cleanup: false\n  profiles:",
        );
        let report = engine(&yaml)
            .run(
                RunRequest::new("mobile", dir.path())
                    .secrets(signed_vault())
                    .facts(release_facts()),
            )
            .await;

        assert_eq!(report.status, RunStatus::Passed, "{:?}", report.error);
        assert!(dir.path().join("android/app/release.keystore").exists());
    }

    #[test]
    fn test_standalone_gate_evaluation() {
        let engine = engine(MOBILE);
        let verdict = engine
            .evaluate_gate("mobile", &HashMap::new(), &release_facts())
            .unwrap();
        assert!(verdict.passed);
    }
}
