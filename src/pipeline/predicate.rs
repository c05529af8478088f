// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Enablement predicates
//!
//! Conditions are plain data parsed once with the pipeline, then evaluated
//! against the resolved inputs of a run.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::ResolvedInputs;

/// Boolean expression over resolved inputs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Always true (default)
    #[default]
    Always,
    /// Always false
    Never,
    /// A bool input is true
    Enabled(String),
    /// An input equals a value
    Equals { input: String, value: String },
    /// An input equals one of several values
    OneOf { input: String, values: Vec<String> },
    /// Every sub-predicate holds
    All(Vec<Predicate>),
    /// At least one sub-predicate holds
    Any(Vec<Predicate>),
    /// The sub-predicate does not hold
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluate against resolved inputs. Unset inputs are neither true nor equal to anything.
    pub fn evaluate(&self, inputs: &ResolvedInputs) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Enabled(name) => inputs.get(name).and_then(|v| v.as_bool()).unwrap_or(false),
            Self::Equals { input, value } => inputs
                .get(input)
                .is_some_and(|v| v.to_string() == *value),
            Self::OneOf { input, values } => inputs
                .get(input)
                .is_some_and(|v| values.contains(&v.to_string())),
            Self::All(all) => all.iter().all(|p| p.evaluate(inputs)),
            Self::Any(any) => any.iter().any(|p| p.evaluate(inputs)),
            Self::Not(inner) => !inner.evaluate(inputs),
        }
    }

    /// Every input name this predicate reads
    pub fn referenced_inputs(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_inputs(&mut names);
        names
    }

    fn collect_inputs<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Always | Self::Never => {}
            Self::Enabled(name) => names.push(name),
            Self::Equals { input, .. } | Self::OneOf { input, .. } => names.push(input),
            Self::All(list) | Self::Any(list) => {
                for p in list {
                    p.collect_inputs(names);
                }
            }
            Self::Not(inner) => inner.collect_inputs(names),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
            Self::Enabled(name) => write!(f, "inputs.{}", name),
            Self::Equals { input, value } => write!(f, "inputs.{} == '{}'", input, value),
            Self::OneOf { input, values } => {
                write!(f, "inputs.{} in [{}]", input, values.join(", "))
            }
            Self::All(list) => write_joined(f, list, " && "),
            Self::Any(list) => write_joined(f, list, " || "),
            Self::Not(inner) => write!(f, "!({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, list: &[Predicate], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, p) in list.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", p)?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InputValue;

    fn inputs() -> ResolvedInputs {
        let mut inputs = ResolvedInputs::default();
        inputs.set("push", InputValue::Bool(true));
        inputs.set("sign", InputValue::Bool(false));
        inputs.set("build_type", InputValue::String("release".into()));
        inputs
    }

    #[test]
    fn test_leaf_predicates() {
        let inputs = inputs();
        assert!(Predicate::Always.evaluate(&inputs));
        assert!(!Predicate::Never.evaluate(&inputs));
        assert!(Predicate::Enabled("push".into()).evaluate(&inputs));
        assert!(!Predicate::Enabled("sign".into()).evaluate(&inputs));
        assert!(!Predicate::Enabled("missing".into()).evaluate(&inputs));
        assert!(Predicate::Equals {
            input: "build_type".into(),
            value: "release".into()
        }
        .evaluate(&inputs));
        assert!(Predicate::Equals {
            input: "push".into(),
            value: "true".into()
        }
        .evaluate(&inputs));
        assert!(!Predicate::OneOf {
            input: "build_type".into(),
            values: vec!["debug".into(), "profile".into()]
        }
        .evaluate(&inputs));
    }

    #[test]
    fn test_composite_predicates() {
        let inputs = inputs();
        let p = Predicate::All(vec![
            Predicate::Enabled("push".into()),
            Predicate::Not(Box::new(Predicate::Enabled("sign".into()))),
        ]);
        assert!(p.evaluate(&inputs));

        let p = Predicate::Any(vec![Predicate::Never, Predicate::Enabled("sign".into())]);
        assert!(!p.evaluate(&inputs));
        assert_eq!(p.referenced_inputs(), vec!["sign"]);
    }

    #[test]
    fn test_parse_from_yaml() {
        let yaml = r#"
all:
  - enabled: push
  - not:
      equals: { input: build_type, value: debug }
  - one_of: { input: platform, values: [android, ios] }
"#;
        let p: Predicate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(p.referenced_inputs(), vec!["push", "build_type", "platform"]);

        let p: Predicate = serde_yaml::from_str("never").unwrap();
        assert_eq!(p, Predicate::Never);
    }

    #[test]
    fn test_display() {
        let p = Predicate::All(vec![
            Predicate::Enabled("push".into()),
            Predicate::Equals {
                input: "build_type".into(),
                value: "release".into(),
            },
        ]);
        assert_eq!(p.to_string(), "(inputs.push && inputs.build_type == 'release')");
    }
}
