// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Pipeline validation
//!
//! Static checks run once when a pipeline is loaded, before any run.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::pipeline::template::{self, TemplateRef};
use crate::pipeline::{
    ArtifactProfile, GateRule, InputKind, InputValue, PipelineSpec, Predicate, StepSpec,
};

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline definition
    pub fn validate(pipeline: &PipelineSpec) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.name.trim().is_empty() {
            result.add_error("Pipeline name is empty");
        }

        if pipeline.steps.is_empty() {
            result.add_error("Pipeline has no steps defined");
        }

        check_unique(pipeline.steps.iter().map(|s| s.name.as_str()), "step", &mut result);
        check_unique(pipeline.inputs.iter().map(|i| i.name.as_str()), "input", &mut result);
        check_unique(pipeline.secrets.iter().map(|s| s.name.as_str()), "secret", &mut result);

        Self::validate_inputs(pipeline, &mut result);

        for (index, step) in pipeline.steps.iter().enumerate() {
            Self::validate_step(step, index, pipeline, &mut result);
        }

        Self::validate_secret_usage(pipeline, &mut result);
        Self::validate_signing(pipeline, &mut result);
        Self::validate_gate(pipeline, &mut result);

        result
    }

    fn validate_inputs(pipeline: &PipelineSpec, result: &mut ValidationResult) {
        for input in &pipeline.inputs {
            if input.kind == InputKind::Enum && input.allowed.is_empty() {
                result.add_error(&format!("Input '{}': enum input has no allowed values", input.name));
            }
            if input.kind != InputKind::Enum && !input.allowed.is_empty() {
                result.add_warning(&format!(
                    "Input '{}': 'allowed' is ignored for {} inputs",
                    input.name, input.kind
                ));
            }

            let Some(default) = &input.default else { continue };
            if !default.matches(input.kind) {
                result.add_error(&format!(
                    "Input '{}': default '{}' is not a {} value",
                    input.name, default, input.kind
                ));
            } else if let (InputKind::Enum, InputValue::String(value)) = (input.kind, default) {
                if !input.allowed.contains(value) {
                    result.add_error(&format!(
                        "Input '{}': default '{}' is not one of the allowed values",
                        input.name, value
                    ));
                }
            }
            if input.required {
                result.add_warning(&format!(
                    "Input '{}': required input has a default, so it can never be missing",
                    input.name
                ));
            }
        }
    }

    fn validate_step(step: &StepSpec, index: usize, pipeline: &PipelineSpec, result: &mut ValidationResult) {
        if step.run.trim().is_empty() {
            result.add_error(&format!("Step '{}': command is empty", step.name));
        }
        if step.shell.trim().is_empty() {
            result.add_error(&format!("Step '{}': shell is empty", step.name));
        }

        Self::validate_predicate(&step.when, &format!("Step '{}'", step.name), pipeline, result);

        for secret in &step.secrets {
            if pipeline.get_secret(secret).is_none() {
                result.add_error(&format!(
                    "Step '{}': requires undeclared secret '{}'",
                    step.name, secret
                ));
            }
        }

        check_unique(
            step.outputs.iter().map(String::as_str),
            &format!("output of step '{}'", step.name),
            result,
        );

        if let Some(dir) = &step.working_directory {
            if !is_contained(dir) {
                result.add_error(&format!(
                    "Step '{}': working directory '{}' escapes the run directory",
                    step.name,
                    dir.display()
                ));
            }
        }

        let references = match template::references(&step.run) {
            Ok(references) => references,
            Err(e) => {
                result.add_error(&format!("Step '{}': {}", step.name, e));
                return;
            }
        };

        for reference in references {
            match reference {
                TemplateRef::Input(name) if pipeline.get_input(name).is_none() => {
                    result.add_error(&format!(
                        "Step '{}': references unknown input '{}'",
                        step.name, name
                    ));
                }
                TemplateRef::Version if pipeline.versioning.is_none() => {
                    result.add_error(&format!(
                        "Step '{}': references the build version but the pipeline has no 'versioning' section",
                        step.name
                    ));
                }
                TemplateRef::StepOutput { step: source, key } => {
                    let earlier = pipeline.steps[..index].iter().find(|s| s.name == source);
                    match earlier {
                        None => result.add_error(&format!(
                            "Step '{}': references output of '{}', which is not an earlier step",
                            step.name, source
                        )),
                        Some(s) if !s.outputs.iter().any(|o| o == key) => {
                            result.add_error(&format!(
                                "Step '{}': step '{}' does not declare output '{}'",
                                step.name, source, key
                            ))
                        }
                        Some(_) => {}
                    }
                }
                TemplateRef::Secret(name) => {
                    result.add_error(&format!(
                        "Step '{}': secret '{}' cannot be interpolated into a command; \
                         list it under 'secrets' and read it from the environment",
                        step.name, name
                    ));
                }
                _ => {}
            }
        }
    }

    fn validate_predicate(
        predicate: &Predicate,
        owner: &str,
        pipeline: &PipelineSpec,
        result: &mut ValidationResult,
    ) {
        for name in predicate.referenced_inputs() {
            if pipeline.get_input(name).is_none() {
                result.add_error(&format!("{}: condition references unknown input '{}'", owner, name));
            }
        }
        check_enum_comparisons(predicate, owner, pipeline, result);
    }

    fn validate_secret_usage(pipeline: &PipelineSpec, result: &mut ValidationResult) {
        let profiles = pipeline.profiles().unwrap_or_default();
        for secret in &pipeline.secrets {
            let used_by_step = !pipeline.consumers_of(&secret.name).is_empty();
            let used_by_profile = profiles.iter().any(|p| p.requires.contains(&secret.name));
            if !used_by_step && !used_by_profile && !secret.required {
                result.add_warning(&format!(
                    "Secret '{}' is declared but no step or profile uses it",
                    secret.name
                ));
            }
        }
    }

    fn validate_signing(pipeline: &PipelineSpec, result: &mut ValidationResult) {
        let profiles = match pipeline.profiles() {
            Ok(profiles) => profiles,
            Err(e) => {
                result.add_error(&e.to_string());
                return;
            }
        };

        check_unique(profiles.iter().map(|p| p.name.as_str()), "profile", result);

        let fallbacks: Vec<&ArtifactProfile> = profiles.iter().filter(|p| p.fallback).collect();
        if fallbacks.len() > 1 {
            result.add_error(&format!(
                "More than one fallback profile: {}",
                fallbacks.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }

        for profile in &profiles {
            let owner = format!("Profile '{}'", profile.name);

            if profile.fallback && !profile.requires.is_empty() {
                result.add_error(&format!("{}: a fallback profile cannot require secrets", owner));
            }
            if profile.fallback && profile.when.is_some() {
                result.add_warning(&format!("{}: 'when' is ignored on a fallback profile", owner));
            }
            if let Some(when) = &profile.when {
                Self::validate_predicate(when, &owner, pipeline, result);
            }

            for secret in &profile.requires {
                if pipeline.get_secret(secret).is_none() {
                    result.add_error(&format!("{}: requires undeclared secret '{}'", owner, secret));
                }
            }

            for placement in &profile.placements {
                if !profile.requires.contains(&placement.secret) {
                    result.add_error(&format!(
                        "{}: places secret '{}' without requiring it",
                        owner, placement.secret
                    ));
                }
                if !is_contained(&placement.path) {
                    result.add_error(&format!(
                        "{}: target '{}' must be a relative path inside the run directory",
                        owner,
                        placement.path.display()
                    ));
                }
            }
        }
    }

    fn validate_gate(pipeline: &PipelineSpec, result: &mut ValidationResult) {
        let Some(gate) = &pipeline.gate else { return };
        let profiles = pipeline.profiles().unwrap_or_default();

        check_unique(
            gate.predicates.iter().map(|p| p.name.as_str()),
            "gate predicate",
            result,
        );

        for predicate in &gate.predicates {
            let owner = format!("Gate predicate '{}'", predicate.name);
            match &predicate.rule {
                GateRule::Branch(patterns) => {
                    if patterns.is_empty() {
                        result.add_error(&format!("{}: no branch patterns", owner));
                    }
                    for pattern in patterns {
                        if let Err(e) = glob::Pattern::new(pattern) {
                            result.add_error(&format!("{}: invalid branch pattern '{}': {}", owner, pattern, e));
                        }
                    }
                }
                GateRule::Tag { pattern, .. } => {
                    if let Err(e) = regex::Regex::new(&format!("^(?:{})$", pattern)) {
                        result.add_error(&format!("{}: invalid tag pattern: {}", owner, e));
                    }
                }
                GateRule::Check(name) => {
                    if name.trim().is_empty() {
                        result.add_error(&format!("{}: check name is empty", owner));
                    }
                }
                GateRule::Input { name, .. } => {
                    if pipeline.get_input(name).is_none() {
                        result.add_error(&format!("{}: references unknown input '{}'", owner, name));
                    }
                }
                GateRule::Output { step, key, .. } => match pipeline.get_step(step) {
                    None => result.add_error(&format!("{}: references unknown step '{}'", owner, step)),
                    Some(s) if !s.outputs.contains(key) => result.add_error(&format!(
                        "{}: step '{}' does not declare output '{}'",
                        owner, step, key
                    )),
                    Some(_) => {}
                },
                GateRule::Profile(names) => {
                    for name in names {
                        let known = profiles.iter().any(|p| &p.name == name)
                            || (name == "unsigned" && !profiles.iter().any(|p| p.fallback));
                        if !known {
                            result.add_error(&format!("{}: references unknown profile '{}'", owner, name));
                        }
                    }
                }
            }
        }
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, what: &str, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            result.add_error(&format!("Duplicate {} name: '{}'", what, name));
        }
    }
}

fn check_enum_comparisons(
    predicate: &Predicate,
    owner: &str,
    pipeline: &PipelineSpec,
    result: &mut ValidationResult,
) {
    match predicate {
        Predicate::Equals { input, value } => warn_if_not_allowed(input, value, owner, pipeline, result),
        Predicate::OneOf { input, values } => {
            for value in values {
                warn_if_not_allowed(input, value, owner, pipeline, result);
            }
        }
        Predicate::All(list) | Predicate::Any(list) => {
            for p in list {
                check_enum_comparisons(p, owner, pipeline, result);
            }
        }
        Predicate::Not(inner) => check_enum_comparisons(inner, owner, pipeline, result),
        Predicate::Always | Predicate::Never | Predicate::Enabled(_) => {}
    }
}

fn warn_if_not_allowed(
    input: &str,
    value: &str,
    owner: &str,
    pipeline: &PipelineSpec,
    result: &mut ValidationResult,
) {
    if let Some(spec) = pipeline.get_input(input) {
        if spec.kind == InputKind::Enum && !spec.allowed.iter().any(|a| a == value) {
            result.add_warning(&format!(
                "{}: condition compares '{}' with '{}', which is not an allowed value",
                owner, input, value
            ));
        }
    }
}

/// Relative, and never climbs above its base
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationResult {
        PipelineValidator::validate(&PipelineSpec::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_validate_empty_pipeline() {
        let result = validate("name: empty\nsteps: []\n");
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no steps"));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let result = validate(
            r#"
name: dup
steps:
  - name: build
    run: make
  - name: build
    run: make again
"#,
        );
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.contains("Duplicate step")));
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let result = validate(
            r#"
name: docker
inputs:
  - name: push
    type: bool
    default: false
secrets:
  - name: REGISTRY_TOKEN
versioning: {}
steps:
  - name: build
    run: docker build -t app:${{ version }} .
    outputs: [digest]
  - name: push
    when:
      enabled: push
    run: docker push app@${{ steps.build.outputs.digest }}
    secrets: [REGISTRY_TOKEN]
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings(), "{:?}", result.warnings);
    }

    #[test]
    fn test_template_and_predicate_references() {
        let result = validate(
            r#"
name: refs
steps:
  - name: first
    when:
      enabled: nope
    run: echo ${{ inputs.missing }} ${{ steps.later.outputs.x }} ${{ version }}
  - name: later
    run: echo ${{ secrets.TOKEN }}
    outputs: [x]
"#,
        );
        let errors = result.errors.join("\n");
        assert!(errors.contains("unknown input 'nope'"));
        assert!(errors.contains("unknown input 'missing'"));
        assert!(errors.contains("not an earlier step"));
        assert!(errors.contains("no 'versioning' section"));
        assert!(errors.contains("cannot be interpolated"));
    }

    #[test]
    fn test_enum_defaults_and_comparisons() {
        let result = validate(
            r#"
name: enums
inputs:
  - name: method
    type: enum
    allowed: [app-store, ad-hoc]
    default: enterprise
  - name: empty
    type: enum
steps:
  - name: build
    when:
      equals: { input: method, value: development }
    run: flutter build ipa
"#,
        );
        let errors = result.errors.join("\n");
        assert!(errors.contains("default 'enterprise' is not one of the allowed values"));
        assert!(errors.contains("enum input has no allowed values"));
        assert!(result.warnings.iter().any(|w| w.contains("'development'")));
    }

    #[test]
    fn test_signing_rules() {
        let result = validate(
            r#"
name: signing
secrets:
  - name: KEY
steps:
  - name: build
    run: make
signing:
  profiles:
    - name: signed
      requires: [KEY, OTHER]
      placements:
        - secret: KEY
          path: ../outside.key
        - secret: EXTRA
          path: /etc/key
    - name: a
      fallback: true
    - name: b
      fallback: true
      requires: [KEY]
"#,
        );
        let errors = result.errors.join("\n");
        assert!(errors.contains("undeclared secret 'OTHER'"));
        assert!(errors.contains("places secret 'EXTRA' without requiring it"));
        assert!(errors.contains("'../outside.key'"));
        assert!(errors.contains("'/etc/key'"));
        assert!(errors.contains("More than one fallback"));
        assert!(errors.contains("fallback profile cannot require secrets"));
    }

    #[test]
    fn test_gate_rules() {
        let result = validate(
            r#"
name: gated
steps:
  - name: build
    run: make
    outputs: [artifact]
gate:
  predicates:
    - name: tag
      rule:
        tag: { pattern: "v[0-9+" }
    - name: output
      rule:
        output: { step: build, key: sbom }
    - name: profile
      rule:
        profile: [unsigned, ios-signed]
"#,
        );
        let errors = result.errors.join("\n");
        assert!(errors.contains("invalid tag pattern"));
        assert!(errors.contains("does not declare output 'sbom'"));
        assert!(errors.contains("unknown profile 'ios-signed'"));
        assert!(!errors.contains("unknown profile 'unsigned'"));
    }

    #[test]
    fn test_unused_secret_warns() {
        let result = validate(
            r#"
name: unused
secrets:
  - name: FORGOTTEN
steps:
  - name: build
    run: make
"#,
        );
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.contains("FORGOTTEN")));
    }
}
