// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 shipflow contributors

//! Command templates
//!
//! Supports references like:
//! - `${{ inputs.NAME }}` - Resolved input (empty when unset)
//! - `${{ version }}` - Computed build version
//! - `${{ pipeline.name }}` - Pipeline name
//! - `${{ profile }}` - Selected signing profile
//! - `${{ steps.STEP.outputs.KEY }}` - Output of an earlier step (empty when skipped)
//!
//! Secret values are never interpolated; steps read them from their environment.

use regex::Regex;
use std::sync::LazyLock;

use crate::context::RunContext;
use crate::errors::ShipflowError;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]*?)\s*\}\}").expect("valid template regex"));

/// A parsed `${{ ... }}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef<'a> {
    Input(&'a str),
    Version,
    PipelineName,
    Profile,
    StepOutput { step: &'a str, key: &'a str },
    Secret(&'a str),
}

impl<'a> TemplateRef<'a> {
    fn parse(expr: &'a str) -> Result<Self, String> {
        let parts: Vec<&str> = expr.split('.').collect();
        match parts.as_slice() {
            ["inputs", name] => Ok(Self::Input(name)),
            ["version"] => Ok(Self::Version),
            ["pipeline", "name"] => Ok(Self::PipelineName),
            ["profile"] => Ok(Self::Profile),
            ["steps", step, "outputs", key] => Ok(Self::StepOutput { step, key }),
            ["secrets", name] => Ok(Self::Secret(name)),
            _ => Err(format!("unknown template reference '${{{{ {} }}}}'", expr)),
        }
    }
}

/// Every reference in a template, in order of appearance
pub fn references(template: &str) -> Result<Vec<TemplateRef<'_>>, String> {
    REFERENCE
        .captures_iter(template)
        .map(|caps| {
            let expr = caps.get(1).map_or("", |m| m.as_str());
            TemplateRef::parse(expr)
        })
        .collect()
}

/// Substitute every reference against the run context
pub fn render(template: &str, ctx: &RunContext) -> Result<String, ShipflowError> {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for caps in REFERENCE.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        let expr = caps.get(1).map_or("", |m| m.as_str());
        let reference = TemplateRef::parse(expr).map_err(ShipflowError::validation)?;

        rendered.push_str(&template[last..whole.start()]);
        match reference {
            TemplateRef::Input(name) => {
                if let Some(value) = ctx.inputs().get(name) {
                    rendered.push_str(&value.to_string());
                }
            }
            TemplateRef::Version => {
                if let Some(version) = ctx.version() {
                    rendered.push_str(&version.to_string());
                }
            }
            TemplateRef::PipelineName => rendered.push_str(ctx.pipeline()),
            TemplateRef::Profile => rendered.push_str(ctx.profile().unwrap_or_default()),
            TemplateRef::StepOutput { step, key } => {
                rendered.push_str(ctx.output(step, key).unwrap_or_default());
            }
            TemplateRef::Secret(name) => {
                return Err(ShipflowError::Validation {
                    message: format!("Secret '{}' cannot be interpolated into a command", name),
                    help: Some(format!(
                        "List it under the step's 'secrets' and read ${} instead",
                        name
                    )),
                });
            }
        }
        last = whole.end();
    }

    rendered.push_str(&template[last..]);
    Ok(rendered)
}
