// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! # shipflow - Build Pipeline Orchestrator
//!
//! `shipflow` runs declarative build pipelines: it resolves caller inputs,
//! computes a deterministic build version, places signing material for the
//! most capable profile whose secrets are present, runs the steps in order
//! and evaluates a release gate.
//!
//! ## Features
//!
//! - **Deterministic versions** - `YYYYMMDD_<commit count>`, identical for identical checkouts
//! - **Conditional signing** - signed when the secrets are there, unsigned otherwise
//! - **Sequential steps** - skipped when disabled, halted on the first failure
//! - **Release gates** - every predicate reported, never just the verdict
//!
//! ## Quick Start
//!
//! ```bash
//! # Check pipeline definitions
//! shipflow validate
//!
//! # Run a pipeline
//! shipflow run mobile -i build_type=release --secret-env ANDROID_KEYSTORE_BASE64
//!
//! # Print the build version
//! shipflow version
//! ```

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod executors;
pub mod gate;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod secrets;
pub mod store;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use engine::{Engine, RunRequest};
pub use errors::{ShipflowError, ShipflowResult};
pub use pipeline::{PipelineSpec, StepSpec};
pub use report::{RunReport, RunStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
