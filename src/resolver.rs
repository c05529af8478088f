// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Parameter resolution
//!
//! Merges caller-supplied inputs with declared defaults, validates them,
//! decides which steps run, and checks that every secret an enabled step
//! needs was supplied. Resolution has no side effects.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::context::{PlannedStep, ResolvedInputs, RunContext, StepDecision};
use crate::errors::ShipflowError;
use crate::pipeline::{InputKind, InputSpec, InputValue, PipelineSpec};
use crate::secrets::SecretVault;

/// Resolves a run context for one pipeline
pub struct ParameterResolver<'a> {
    spec: &'a PipelineSpec,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(spec: &'a PipelineSpec) -> Self {
        Self { spec }
    }

    /// Build the run context skeleton (no version, no profile yet)
    pub fn resolve(
        &self,
        raw: &HashMap<String, String>,
        secrets: SecretVault,
        working_dir: impl Into<PathBuf>,
    ) -> Result<RunContext, ShipflowError> {
        let inputs = self.resolve_inputs(raw)?;
        let plan = self.plan(&inputs);
        self.check_secrets(&plan, &secrets)?;

        tracing::debug!(
            pipeline = %self.spec.name,
            inputs = inputs.len(),
            secrets = secrets.handles().len(),
            enabled = plan.iter().filter(|p| p.enabled()).count(),
            "Resolved run parameters"
        );

        Ok(RunContext::new(
            self.spec.name.clone(),
            inputs,
            secrets,
            plan,
            working_dir,
        ))
    }

    /// Merge caller values with defaults
    pub fn resolve_inputs(&self, raw: &HashMap<String, String>) -> Result<ResolvedInputs, ShipflowError> {
        let mut unknown: Vec<&str> = raw
            .keys()
            .filter(|name| self.spec.get_input(name).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(ShipflowError::Validation {
                message: format!("Unexpected input(s): {}", unknown.join(", ")),
                help: Some(format!(
                    "Pipeline '{}' declares: {}",
                    self.spec.name,
                    self.spec
                        .inputs
                        .iter()
                        .map(|i| i.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            });
        }

        let mut resolved = ResolvedInputs::default();
        for input in &self.spec.inputs {
            let value = match raw.get(&input.name) {
                Some(value) => Some(parse_value(input, value)?),
                None => input.default.clone(),
            };

            match value {
                Some(value) => {
                    check_value(input, &value)?;
                    resolved.set(input.name.clone(), value);
                }
                None if input.required => {
                    return Err(ShipflowError::Validation {
                        message: format!("Input '{}' is required", input.name),
                        help: Some(format!("Pass it with -i {}=<value>", input.name)),
                    });
                }
                None => {}
            }
        }

        Ok(resolved)
    }

    /// Evaluate every step's enablement predicate once
    pub fn plan(&self, inputs: &ResolvedInputs) -> Vec<PlannedStep> {
        self.spec
            .steps
            .iter()
            .map(|step| {
                let decision = if step.when.evaluate(inputs) {
                    StepDecision::Run
                } else {
                    StepDecision::Skip {
                        reason: format!("condition `{}` is false", step.when),
                    }
                };
                PlannedStep {
                    name: step.name.clone(),
                    decision,
                }
            })
            .collect()
    }

    /// Secrets tied to disabled steps are not required
    fn check_secrets(&self, plan: &[PlannedStep], secrets: &SecretVault) -> Result<(), ShipflowError> {
        for secret in self.spec.secrets.iter().filter(|s| s.required) {
            if !secrets.is_present(&secret.name) {
                return Err(ShipflowError::MissingSecret {
                    secret: secret.name.clone(),
                    step: None,
                });
            }
        }

        for (step, planned) in self.spec.steps.iter().zip(plan) {
            if !planned.enabled() {
                continue;
            }
            for name in &step.secrets {
                if !secrets.is_present(name) {
                    return Err(ShipflowError::MissingSecret {
                        secret: name.clone(),
                        step: Some(step.name.clone()),
                    });
                }
            }
        }

        Ok(())
    }
}

fn parse_value(input: &InputSpec, raw: &str) -> Result<InputValue, ShipflowError> {
    match input.kind {
        InputKind::String | InputKind::Enum => Ok(InputValue::String(raw.to_string())),
        InputKind::Bool => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(InputValue::Bool(true)),
            "false" | "0" | "no" => Ok(InputValue::Bool(false)),
            _ => Err(ShipflowError::Validation {
                message: format!("Input '{}' expects a bool, got '{}'", input.name, raw),
                help: Some("Use true or false".into()),
            }),
        },
    }
}

fn check_value(input: &InputSpec, value: &InputValue) -> Result<(), ShipflowError> {
    if !value.matches(input.kind) {
        return Err(ShipflowError::validation(format!(
            "Input '{}' expects a {} value, got '{}'",
            input.name, input.kind, value
        )));
    }

    if input.kind == InputKind::Enum {
        let text = value.to_string();
        if !input.allowed.contains(&text) {
            return Err(ShipflowError::Validation {
                message: format!("Input '{}' does not allow '{}'", input.name, text),
                help: Some(format!("Allowed values: {}", input.allowed.join(", "))),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> PipelineSpec {
        PipelineSpec::from_yaml(
            r#"
name: mobile
inputs:
  - name: platform
    type: enum
    required: true
    allowed: [android, ios]
  - name: export_method
    type: enum
    allowed: [app-store, ad-hoc, development]
    default: app-store
  - name: publish
    type: bool
    default: false
  - name: flavor
secrets:
  - name: STORE_TOKEN
  - name: ALWAYS_NEEDED
    required: true
steps:
  - name: build
    run: flutter build
  - name: publish
    when:
      enabled: publish
    run: upload
    secrets: [STORE_TOKEN]
"#,
        )
        .unwrap()
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn base_secrets() -> SecretVault {
        SecretVault::new().with("ALWAYS_NEEDED", "x")
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let spec = spec();
        let inputs = ParameterResolver::new(&spec)
            .resolve_inputs(&raw(&[("platform", "ios")]))
            .unwrap();
        assert_eq!(inputs.get("platform"), Some(&InputValue::String("ios".into())));
        assert_eq!(inputs.get("export_method"), Some(&InputValue::String("app-store".into())));
        assert_eq!(inputs.get("publish"), Some(&InputValue::Bool(false)));
        assert_eq!(inputs.get("flavor"), None);
    }

    #[test]
    fn test_missing_required_input() {
        let spec = spec();
        let err = ParameterResolver::new(&spec).resolve_inputs(&raw(&[])).unwrap_err();
        assert!(matches!(err, ShipflowError::Validation { .. }));
        assert!(err.to_string().contains("platform"));
    }

    #[test]
    fn test_enum_value_outside_allowed_set() {
        let spec = spec();
        let err = ParameterResolver::new(&spec)
            .resolve_inputs(&raw(&[("platform", "windows")]))
            .unwrap_err();
        assert!(err.to_string().contains("does not allow 'windows'"));
    }

    #[test]
    fn test_bool_parsing() {
        let spec = spec();
        let resolver = ParameterResolver::new(&spec);
        let inputs = resolver
            .resolve_inputs(&raw(&[("platform", "android"), ("publish", "YES")]))
            .unwrap();
        assert_eq!(inputs.get("publish"), Some(&InputValue::Bool(true)));

        let err = resolver
            .resolve_inputs(&raw(&[("platform", "android"), ("publish", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ShipflowError::Validation { .. }));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let spec = spec();
        let err = ParameterResolver::new(&spec)
            .resolve_inputs(&raw(&[("platform", "ios"), ("colour", "red")]))
            .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_disabled_step_needs_no_secret() {
        let spec = spec();
        let ctx = ParameterResolver::new(&spec)
            .resolve(&raw(&[("platform", "ios")]), base_secrets(), ".")
            .unwrap();
        assert!(ctx.plan()[0].enabled());
        assert!(!ctx.plan()[1].enabled());
        match ctx.decision("publish") {
            Some(StepDecision::Skip { reason }) => assert!(reason.contains("inputs.publish")),
            other => panic!("Expected skip, got {:?}", other),
        }
    }

    #[test]
    fn test_enabled_step_missing_secret() {
        let spec = spec();
        let err = ParameterResolver::new(&spec)
            .resolve(&raw(&[("platform", "ios"), ("publish", "true")]), base_secrets(), ".")
            .unwrap_err();
        match err {
            ShipflowError::MissingSecret { secret, step } => {
                assert_eq!(secret, "STORE_TOKEN");
                assert_eq!(step.as_deref(), Some("publish"));
            }
            other => panic!("Expected MissingSecret, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_secret_counts_as_missing() {
        let spec = spec();
        let secrets = base_secrets().with("STORE_TOKEN", "");
        let err = ParameterResolver::new(&spec)
            .resolve(&raw(&[("platform", "ios"), ("publish", "true")]), secrets, ".")
            .unwrap_err();
        assert!(matches!(err, ShipflowError::MissingSecret { .. }));
    }

    #[test]
    fn test_globally_required_secret() {
        let spec = spec();
        let err = ParameterResolver::new(&spec)
            .resolve(&raw(&[("platform", "ios")]), SecretVault::new(), ".")
            .unwrap_err();
        match err {
            ShipflowError::MissingSecret { secret, step } => {
                assert_eq!(secret, "ALWAYS_NEEDED");
                assert!(step.is_none());
            }
            other => panic!("Expected MissingSecret, got {:?}", other),
        }
    }
}
