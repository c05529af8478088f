// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline definitions and types
//!
//! This module defines the data structures for shipflow pipelines (inputs,
//! secrets, steps, signing profiles and gate rules) together with their
//! validation and the sequential step executor.

mod definition;
mod executor;
mod predicate;
pub mod template;
mod validation;

pub use definition::*;
pub use executor::{
    Deadline, NoopObserver, RunObserver, StepExecutor, StepsOutcome, MAX_CAPTURED_OUTPUT, OUTPUT_ENV,
};
pub use predicate::Predicate;
pub use validation::{PipelineValidator, ValidationResult};
