// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Release gate
//!
//! Evaluates every configured predicate against the finished run and the
//! release facts supplied by the caller. Evaluation never stops early: a
//! verdict always lists the outcome and reason of every predicate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::context::RunContext;
use crate::errors::ShipflowError;
use crate::pipeline::{GateConfig, GateRule};

/// Result reported by an upstream check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Success,
    Failure,
    Pending,
    Skipped,
    Cancelled,
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" | "passed" | "ok" => Ok(Self::Success),
            "failure" | "failed" | "error" => Ok(Self::Failure),
            "pending" | "in_progress" => Ok(Self::Pending),
            "skipped" => Ok(Self::Skipped),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown check status '{}'", other)),
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Release metadata supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateFacts {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub checks: BTreeMap<String, CheckStatus>,
}

/// Outcome of a single predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
}

/// One line of the verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PredicateResult {
    pub name: String,
    pub required: bool,
    pub outcome: Outcome,
    pub reason: String,
}

impl PredicateResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }
}

/// Aggregate gate verdict
#[derive(Debug, Clone, Serialize)]
pub struct GateVerdict {
    pub passed: bool,
    pub results: Vec<PredicateResult>,
}

impl GateVerdict {
    /// Required predicates that failed
    pub fn blocking(&self) -> impl Iterator<Item = &PredicateResult> {
        self.results.iter().filter(|r| r.required && !r.passed())
    }
}

impl fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "gate {}", if self.passed { "passed" } else { "failed" })?;
        for result in &self.results {
            writeln!(
                f,
                "  [{}] {}{}: {}",
                if result.passed() { "pass" } else { "fail" },
                result.name,
                if result.required { "" } else { " (optional)" },
                result.reason
            )?;
        }
        Ok(())
    }
}

enum Rule {
    Branch(Vec<glob::Pattern>),
    Tag {
        pattern: String,
        regex: Regex,
        require_tag: bool,
    },
    Check(String),
    Input {
        name: String,
        equals: String,
    },
    Output {
        step: String,
        key: String,
        equals: Option<String>,
    },
    Profile(Vec<String>),
}

struct CompiledPredicate {
    name: String,
    required: bool,
    rule: Rule,
}

/// Compiled release gate
pub struct PolicyGate {
    predicates: Vec<CompiledPredicate>,
}

impl PolicyGate {
    /// Compile every pattern up front
    pub fn new(config: &GateConfig) -> Result<Self, ShipflowError> {
        let predicates = config
            .predicates
            .iter()
            .map(|p| {
                Ok(CompiledPredicate {
                    name: p.name.clone(),
                    required: p.required,
                    rule: compile(&p.name, &p.rule)?,
                })
            })
            .collect::<Result<Vec<_>, ShipflowError>>()?;
        Ok(Self { predicates })
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Evaluate all predicates
    pub fn evaluate(&self, ctx: &RunContext, facts: &GateFacts) -> GateVerdict {
        let results: Vec<PredicateResult> = self
            .predicates
            .iter()
            .map(|predicate| {
                let (outcome, reason) = check(&predicate.rule, ctx, facts);
                tracing::debug!(predicate = %predicate.name, ?outcome, %reason, "Evaluated gate predicate");
                PredicateResult {
                    name: predicate.name.clone(),
                    required: predicate.required,
                    outcome,
                    reason,
                }
            })
            .collect();

        let passed = results.iter().all(|r| !r.required || r.passed());
        tracing::info!(passed, predicates = results.len(), "Gate evaluated");

        GateVerdict { passed, results }
    }
}

fn compile(name: &str, rule: &GateRule) -> Result<Rule, ShipflowError> {
    let invalid = |what: String| ShipflowError::InvalidPipeline {
        reason: format!("gate predicate '{}': {}", name, what),
        help: None,
    };

    Ok(match rule {
        GateRule::Branch(patterns) => Rule::Branch(
            patterns
                .iter()
                .map(|p| glob::Pattern::new(p).map_err(|e| invalid(format!("invalid branch pattern '{}': {}", p, e))))
                .collect::<Result<_, _>>()?,
        ),
        GateRule::Tag { pattern, require_tag } => Rule::Tag {
            regex: Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| invalid(format!("invalid tag pattern: {}", e)))?,
            pattern: pattern.clone(),
            require_tag: *require_tag,
        },
        GateRule::Check(check) => Rule::Check(check.clone()),
        GateRule::Input { name, equals } => Rule::Input {
            name: name.clone(),
            equals: equals.clone(),
        },
        GateRule::Output { step, key, equals } => Rule::Output {
            step: step.clone(),
            key: key.clone(),
            equals: equals.clone(),
        },
        GateRule::Profile(names) => Rule::Profile(names.clone()),
    })
}

fn verdict(ok: bool, reason: String) -> (Outcome, String) {
    (if ok { Outcome::Pass } else { Outcome::Fail }, reason)
}

fn check(rule: &Rule, ctx: &RunContext, facts: &GateFacts) -> (Outcome, String) {
    match rule {
        Rule::Branch(patterns) => match &facts.branch {
            None => verdict(false, "branch not supplied".into()),
            Some(branch) => {
                let list = patterns.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ");
                match patterns.iter().find(|p| p.matches(branch)) {
                    Some(p) => verdict(true, format!("branch '{}' matches '{}'", branch, p.as_str())),
                    None => verdict(false, format!("branch '{}' matches none of [{}]", branch, list)),
                }
            }
        },
        Rule::Tag {
            pattern,
            regex,
            require_tag,
        } => match &facts.tag {
            None if *require_tag => verdict(false, "tag required but absent".into()),
            None => verdict(true, "no tag supplied; not required".into()),
            Some(tag) if regex.is_match(tag) => verdict(true, format!("tag '{}' matches `{}`", tag, pattern)),
            Some(tag) => verdict(false, format!("tag '{}' does not match `{}`", tag, pattern)),
        },
        Rule::Check(name) => match facts.checks.get(name) {
            Some(CheckStatus::Success) => verdict(true, format!("check '{}' succeeded", name)),
            Some(status) => verdict(false, format!("check '{}' is {}", name, status)),
            None => verdict(false, format!("check '{}' was not reported", name)),
        },
        Rule::Input { name, equals } => match ctx.inputs().get(name) {
            Some(value) if value.to_string() == *equals => {
                verdict(true, format!("input '{}' is '{}'", name, equals))
            }
            Some(value) => verdict(
                false,
                format!("input '{}' is '{}', expected '{}'", name, value, equals),
            ),
            None => verdict(false, format!("input '{}' is not set", name)),
        },
        Rule::Output { step, key, equals } => match (ctx.output(step, key), equals) {
            (None, _) => verdict(false, format!("step '{}' produced no output '{}'", step, key)),
            (Some(value), Some(expected)) if value != expected => verdict(
                false,
                format!("output {}.{} is '{}', expected '{}'", step, key, value, expected),
            ),
            (Some(_), _) => verdict(true, format!("output {}.{} present", step, key)),
        },
        Rule::Profile(names) => match ctx.profile() {
            Some(profile) if names.iter().any(|n| n == profile) => {
                verdict(true, format!("profile '{}' selected", profile))
            }
            Some(profile) => verdict(
                false,
                format!("profile '{}' is not one of [{}]", profile, names.join(", ")),
            ),
            None => verdict(false, "no signing profile was selected".into()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResolvedInputs;
    use crate::pipeline::{GatePredicate, InputValue};
    use crate::secrets::SecretVault;

    fn predicate(name: &str, required: bool, rule: GateRule) -> GatePredicate {
        GatePredicate {
            name: name.into(),
            required,
            rule,
        }
    }

    fn ctx() -> RunContext {
        let mut inputs = ResolvedInputs::default();
        inputs.set("build_type", InputValue::String("release".into()));
        let mut ctx = RunContext::new("mobile", inputs, SecretVault::new(), vec![], ".");
        ctx.set_profile("android-signed");
        let mut outputs = BTreeMap::new();
        outputs.insert("digest".to_string(), "sha256:abc".to_string());
        ctx.record_outputs("build", outputs);
        ctx
    }

    fn tag_rule(require_tag: bool) -> GateRule {
        GateRule::Tag {
            pattern: r"v\d+\.\d+\.\d+".into(),
            require_tag,
        }
    }

    #[test]
    fn test_required_tag_absent_fails_and_branch_still_reported() {
        let gate = PolicyGate::new(&GateConfig {
            predicates: vec![
                predicate("tagged", true, tag_rule(true)),
                predicate("main-branch", true, GateRule::Branch(vec!["main".into()])),
            ],
        })
        .unwrap();
        let facts = GateFacts {
            branch: Some("main".into()),
            ..Default::default()
        };

        let verdict = gate.evaluate(&ctx(), &facts);

        assert!(!verdict.passed);
        assert_eq!(verdict.results.len(), 2);
        assert_eq!(verdict.results[0].outcome, Outcome::Fail);
        assert_eq!(verdict.results[0].reason, "tag required but absent");
        assert_eq!(verdict.results[1].outcome, Outcome::Pass);
    }

    #[test]
    fn test_tag_pattern_is_anchored() {
        let gate = PolicyGate::new(&GateConfig {
            predicates: vec![predicate("tagged", true, tag_rule(true))],
        })
        .unwrap();

        for (tag, expected) in [("v1.2.3", true), ("v1.2.3-rc1", false), ("xv1.2.3", false)] {
            let facts = GateFacts {
                tag: Some(tag.into()),
                ..Default::default()
            };
            assert_eq!(gate.evaluate(&ctx(), &facts).passed, expected, "tag {}", tag);
        }
    }

    #[test]
    fn test_optional_tag_absent_passes() {
        let gate = PolicyGate::new(&GateConfig {
            predicates: vec![predicate("tagged", true, tag_rule(false))],
        })
        .unwrap();
        assert!(gate.evaluate(&ctx(), &GateFacts::default()).passed);
    }

    #[test]
    fn test_non_required_failure_does_not_block() {
        let gate = PolicyGate::new(&GateConfig {
            predicates: vec![
                predicate("lint", false, GateRule::Check("lint".into())),
                predicate("tests", true, GateRule::Check("tests".into())),
            ],
        })
        .unwrap();
        let mut facts = GateFacts::default();
        facts.checks.insert("lint".into(), CheckStatus::Failure);
        facts.checks.insert("tests".into(), CheckStatus::Success);

        let verdict = gate.evaluate(&ctx(), &facts);
        assert!(verdict.passed);
        assert_eq!(verdict.results[0].outcome, Outcome::Fail);
        assert_eq!(verdict.blocking().count(), 0);
    }

    #[test]
    fn test_verdict_fails_iff_a_required_predicate_fails() {
        let rules = || {
            vec![
                predicate("branch", true, GateRule::Branch(vec!["release/*".into()])),
                predicate("input", true, GateRule::Input {
                    name: "build_type".into(),
                    equals: "release".into(),
                }),
                predicate("digest", true, GateRule::Output {
                    step: "build".into(),
                    key: "digest".into(),
                    equals: None,
                }),
                predicate("signed", true, GateRule::Profile(vec!["android-signed".into()])),
                predicate("scan", false, GateRule::Check("scan".into())),
            ]
        };
        let gate = PolicyGate::new(&GateConfig { predicates: rules() }).unwrap();

        let good = GateFacts {
            branch: Some("release/2.0".into()),
            ..Default::default()
        };
        let verdict = gate.evaluate(&ctx(), &good);
        assert!(verdict.passed);
        assert_eq!(verdict.results.len(), 5);

        let bad = GateFacts {
            branch: Some("feature/x".into()),
            ..Default::default()
        };
        let verdict = gate.evaluate(&ctx(), &bad);
        assert!(!verdict.passed);
        let blocking: Vec<&str> = verdict.blocking().map(|r| r.name.as_str()).collect();
        assert_eq!(blocking, vec!["branch"]);
        assert_eq!(verdict.results.len(), 5);
    }

    #[test]
    fn test_empty_gate_passes() {
        let gate = PolicyGate::new(&GateConfig::default()).unwrap();
        assert!(gate.is_empty());
        assert!(gate.evaluate(&ctx(), &GateFacts::default()).passed);
    }

    #[test]
    fn test_invalid_tag_pattern_rejected() {
        let result = PolicyGate::new(&GateConfig {
            predicates: vec![predicate(
                "tagged",
                true,
                GateRule::Tag {
                    pattern: "v(".into(),
                    require_tag: true,
                },
            )],
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_check_status_parsing() {
        assert_eq!("SUCCESS".parse::<CheckStatus>().unwrap(), CheckStatus::Success);
        assert_eq!("failed".parse::<CheckStatus>().unwrap(), CheckStatus::Failure);
        assert!("weird".parse::<CheckStatus>().is_err());
    }
}
