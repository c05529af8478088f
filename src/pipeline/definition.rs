// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline definition structures
//!
//! Defines the schema of pipeline YAML documents.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use super::predicate::Predicate;
use crate::artifacts::presets;
use crate::errors::ShipflowError;
use crate::version::VersionSeparator;

/// Pipeline definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Schema version (for future compatibility)
    #[serde(default = "default_version")]
    pub version: String,

    /// Pipeline name
    pub name: String,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Declared inputs
    #[serde(default)]
    pub inputs: Vec<InputSpec>,

    /// Declared secrets
    #[serde(default)]
    pub secrets: Vec<SecretSpec>,

    /// Steps in execution order
    pub steps: Vec<StepSpec>,

    /// Pipeline-wide environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Build version generation (no version is computed when absent)
    #[serde(default)]
    pub versioning: Option<VersioningConfig>,

    /// Signing material profiles
    #[serde(default)]
    pub signing: Option<SigningConfig>,

    /// Release gate
    #[serde(default)]
    pub gate: Option<GateConfig>,

    /// Budget for the whole run, in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_version() -> String {
    "1".to_string()
}

impl PipelineSpec {
    /// Load a pipeline from a YAML file
    pub fn from_file(path: &std::path::Path) -> Result<Self, ShipflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| ShipflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse a pipeline from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ShipflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize the pipeline to YAML
    pub fn to_yaml(&self) -> Result<String, ShipflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    pub fn get_step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn get_input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn get_secret(&self, name: &str) -> Option<&SecretSpec> {
        self.secrets.iter().find(|s| s.name == name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Names of the steps that consume a secret
    pub fn consumers_of(&self, secret: &str) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.secrets.iter().any(|name| name == secret))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Signing profiles in declaration order, with presets expanded
    pub fn profiles(&self) -> Result<Vec<ArtifactProfile>, ShipflowError> {
        match &self.signing {
            Some(signing) => signing.profiles(),
            None => Ok(Vec::new()),
        }
    }

    /// Whether signing material placed on disk is removed at run end
    pub fn cleanup_signing_material(&self) -> bool {
        self.signing.as_ref().map_or(true, |s| s.cleanup)
    }
}

/// A declared pipeline input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Input name
    pub name: String,

    /// Value type
    #[serde(rename = "type", default)]
    pub kind: InputKind,

    /// Fail the run when no value can be resolved
    #[serde(default)]
    pub required: bool,

    /// Value used when the caller supplies none
    #[serde(default)]
    pub default: Option<InputValue>,

    /// Permitted values (enum inputs only)
    #[serde(default)]
    pub allowed: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
}

/// Input value types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    String,
    Bool,
    Enum,
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Enum => write!(f, "enum"),
        }
    }
}

/// A resolved or default input value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    String(String),
}

impl InputValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Bool(_) => None,
        }
    }

    /// Whether this value has the shape an input kind expects
    pub fn matches(&self, kind: InputKind) -> bool {
        matches!(
            (self, kind),
            (Self::Bool(_), InputKind::Bool) | (Self::String(_), InputKind::String | InputKind::Enum)
        )
    }
}

impl fmt::Display for InputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for InputValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        match serde_yaml::Value::deserialize(deserializer)? {
            serde_yaml::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_yaml::Value::String(s) => Ok(Self::String(s)),
            serde_yaml::Value::Number(n) => Ok(Self::String(n.to_string())),
            other => Err(D::Error::custom(format!(
                "input values must be scalars, found {:?}",
                other
            ))),
        }
    }
}

/// A declared secret
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Secret name
    pub name: String,

    /// Required regardless of which steps run
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub description: Option<String>,
}

/// A single pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step name (must be unique within pipeline)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Enablement predicate over resolved inputs
    #[serde(default)]
    pub when: Predicate,

    /// Command template
    pub run: String,

    /// Shell used to run the command
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Environment variables for this step
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Secrets this step requires, exported under their own names
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Output keys this step publishes
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Working directory, relative to the run directory
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

fn default_shell() -> String {
    "bash".to_string()
}

/// Build version configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Separator between date and commit count
    #[serde(default)]
    pub separator: VersionSeparator,
}

/// Signing material configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Candidate profiles
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,

    /// Remove placed files when the run ends
    #[serde(default = "default_true")]
    pub cleanup: bool,
}

fn default_true() -> bool {
    true
}

impl SigningConfig {
    /// Expand preset references into full profiles
    pub fn profiles(&self) -> Result<Vec<ArtifactProfile>, ShipflowError> {
        self.profiles
            .iter()
            .map(|entry| match entry {
                ProfileEntry::Preset { preset, when } => {
                    let mut profile = presets::by_name(preset).ok_or_else(|| {
                        ShipflowError::InvalidPipeline {
                            reason: format!("Unknown signing preset '{}'", preset),
                            help: Some(format!("Available presets: {}", presets::NAMES.join(", "))),
                        }
                    })?;
                    if when.is_some() {
                        profile.when = when.clone();
                    }
                    Ok(profile)
                }
                ProfileEntry::Inline(profile) => Ok(profile.clone()),
            })
            .collect()
    }
}

/// A profile, either declared inline or taken from a preset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProfileEntry {
    Preset {
        preset: String,
        #[serde(default)]
        when: Option<Predicate>,
    },
    Inline(ArtifactProfile),
}

/// Named signing/config profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactProfile {
    /// Profile name
    pub name: String,

    /// Secrets that must all be present for this profile
    #[serde(default)]
    pub requires: Vec<String>,

    /// Where decoded secrets are written
    #[serde(default)]
    pub placements: Vec<Placement>,

    /// Additional enablement predicate over inputs
    #[serde(default)]
    pub when: Option<Predicate>,

    /// Designated zero-requirement fallback
    #[serde(default)]
    pub fallback: bool,
}

impl ArtifactProfile {
    /// The built-in fallback used when a pipeline designates none
    pub fn unsigned() -> Self {
        Self {
            name: "unsigned".into(),
            requires: vec![],
            placements: vec![],
            when: None,
            fallback: true,
        }
    }
}

/// A secret-to-file placement rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Secret to place
    pub secret: String,

    /// Target path, relative to the run directory
    pub path: PathBuf,

    /// Payload encoding
    #[serde(default)]
    pub encoding: SecretEncoding,
}

/// How a secret payload is encoded
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecretEncoding {
    #[default]
    Base64,
    Raw,
}

/// Release gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Predicates, reported in this order
    #[serde(default)]
    pub predicates: Vec<GatePredicate>,
}

/// A named gate predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatePredicate {
    /// Predicate name
    pub name: String,

    /// Whether a failure fails the verdict
    #[serde(default = "default_true")]
    pub required: bool,

    /// What is checked
    pub rule: GateRule,
}

/// Gate predicate rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateRule {
    /// Branch matches one of the glob patterns
    Branch(Vec<String>),
    /// Tag matches an anchored regular expression
    Tag {
        pattern: String,
        #[serde(default)]
        require_tag: bool,
    },
    /// Upstream check reported success
    Check(String),
    /// Resolved input equals a value
    Input { name: String, equals: String },
    /// Step output is present (and equals a value, if given)
    Output {
        step: String,
        key: String,
        #[serde(default)]
        equals: Option<String>,
    },
    /// Selected signing profile is one of these
    Profile(Vec<String>),
}
