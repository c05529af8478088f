// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline definition store
//!
//! Loads pipeline definitions from a directory, validates each one and keeps
//! it as an immutable, shareable `Arc<PipelineSpec>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::ShipflowError;
use crate::pipeline::{PipelineSpec, PipelineValidator, ValidationResult};

/// A validated pipeline and where it came from
#[derive(Debug, Clone)]
pub struct StoredPipeline {
    pub spec: Arc<PipelineSpec>,
    pub source: Option<PathBuf>,
    pub warnings: Vec<String>,
}

/// Named, validated pipeline definitions
#[derive(Debug, Default)]
pub struct DefinitionStore {
    pipelines: BTreeMap<String, StoredPipeline>,
}

impl DefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml` / `*.yml` file in a directory
    pub fn load_dir(dir: &Path) -> Result<Self, ShipflowError> {
        let mut store = Self::new();

        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Pipeline directory does not exist");
            return Ok(store);
        }

        for path in pipeline_files(dir)? {
            let (spec, validation) = inspect(&path)?;
            store.admit(spec, Some(path), validation)?;
        }

        tracing::debug!(dir = %dir.display(), pipelines = store.len(), "Loaded pipeline definitions");
        Ok(store)
    }

    /// Validate and add a pipeline
    pub fn insert(&mut self, spec: PipelineSpec) -> Result<Arc<PipelineSpec>, ShipflowError> {
        let validation = PipelineValidator::validate(&spec);
        self.admit(spec, None, validation)
    }

    fn admit(
        &mut self,
        spec: PipelineSpec,
        source: Option<PathBuf>,
        validation: ValidationResult,
    ) -> Result<Arc<PipelineSpec>, ShipflowError> {
        let origin = source
            .as_ref()
            .map(|p| format!(" ({})", p.display()))
            .unwrap_or_default();

        if !validation.is_valid() {
            return Err(ShipflowError::InvalidPipeline {
                reason: format!("'{}'{}: {}", spec.name, origin, validation.errors.join("; ")),
                help: Some("Run 'shipflow validate' for the full list of problems".into()),
            });
        }

        if let Some(existing) = self.pipelines.get(&spec.name) {
            let first = existing
                .source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<inline>".into());
            return Err(ShipflowError::invalid_pipeline(format!(
                "pipeline '{}'{} is already defined in {}",
                spec.name, origin, first
            )));
        }

        for warning in &validation.warnings {
            tracing::warn!(pipeline = %spec.name, "{}", warning);
        }

        let spec = Arc::new(spec);
        self.pipelines.insert(
            spec.name.clone(),
            StoredPipeline {
                spec: Arc::clone(&spec),
                source,
                warnings: validation.warnings,
            },
        );
        Ok(spec)
    }

    pub fn get(&self, name: &str) -> Result<Arc<PipelineSpec>, ShipflowError> {
        self.pipelines
            .get(name)
            .map(|p| Arc::clone(&p.spec))
            .ok_or_else(|| ShipflowError::PipelineNotFound { name: name.to_string() })
    }

    pub fn entry(&self, name: &str) -> Option<&StoredPipeline> {
        self.pipelines.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredPipeline> {
        self.pipelines.values()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Pipeline files in a directory, sorted by path
pub fn pipeline_files(dir: &Path) -> Result<Vec<PathBuf>, ShipflowError> {
    let mut files = Vec::new();
    for ext in ["yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", ext));
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| ShipflowError::Io { message: e.to_string() })?;
        for entry in entries {
            files.push(entry.map_err(|e| ShipflowError::Io { message: e.to_string() })?);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse and validate one file without admitting it anywhere
pub fn inspect(path: &Path) -> Result<(PipelineSpec, ValidationResult), ShipflowError> {
    let spec = PipelineSpec::from_file(path).map_err(|e| match e {
        ShipflowError::Yaml { message } => ShipflowError::InvalidPipeline {
            reason: format!("{}: {}", path.display(), message),
            help: None,
        },
        other => other,
    })?;
    let validation = PipelineValidator::validate(&spec);
    Ok((spec, validation))
}
