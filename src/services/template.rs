//! Template evaluation for patches, Helm values and local metrics.
//!
//! Templates use `{{ ... }}` placeholders holding a variable path:
//!
//! - `.Values.<name>`: the trial's assignment for parameter `<name>`
//! - `.Trial.Name`, `.Trial.Namespace`, `.Trial.TargetNamespace`
//! - `<name>` or `.<name>`: a context variable (local metrics: `duration`,
//!   `startTime`, `completionTime`), falling back to assignments
//!
//! Anything else is malformed. Evaluation errors are never retryable.

use std::collections::BTreeMap;

use regex::Regex;

use crate::domain::errors::TemplateError;
use crate::domain::models::Trial;

const PLACEHOLDER: &str = r"\{\{-?\s*(.*?)\s*-?\}\}";

/// Variables visible to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, String>,
    trial: BTreeMap<String, String>,
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    /// Context exposing a trial's assignments and identity.
    pub fn for_trial(trial: &Trial) -> Self {
        let values = trial
            .spec
            .assignments
            .iter()
            .map(|a| (a.name.clone(), a.value.to_string()))
            .collect();
        let mut identity = BTreeMap::new();
        identity.insert("Name".to_string(), trial.metadata.name.clone());
        identity.insert("Namespace".to_string(), trial.metadata.namespace.clone());
        identity.insert("TargetNamespace".to_string(), trial.target_namespace().to_string());
        Self {
            values,
            trial: identity,
            vars: BTreeMap::new(),
        }
    }

    /// Context for a local metric: trial context plus the run window.
    pub fn for_local_metric(trial: &Trial) -> Self {
        let mut ctx = Self::for_trial(trial);
        if let Some(duration) = trial.run_duration_seconds() {
            ctx = ctx.with_var("duration", duration);
        }
        if let Some(start) = trial.status.start_time {
            ctx = ctx.with_var("startTime", start.timestamp());
        }
        if let Some(end) = trial.status.completion_time {
            ctx = ctx.with_var("completionTime", end.timestamp());
        }
        ctx
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.vars.insert(name.into(), value.to_string());
        self
    }

    fn lookup(&self, expr: &str) -> Result<&str, TemplateError> {
        let path: Vec<&str> = expr.trim_start_matches('.').split('.').collect();
        if path.iter().any(|segment| !is_identifier(segment)) {
            return Err(TemplateError::Malformed(format!("unsupported expression `{expr}`")));
        }
        let found = match path.as_slice() {
            ["Values", name] => self.values.get(*name),
            ["Trial", field] => self.trial.get(*field),
            [name] => self.vars.get(*name).or_else(|| self.values.get(*name)),
            _ => None,
        };
        found
            .map(String::as_str)
            .ok_or_else(|| TemplateError::UnknownVariable(expr.to_string()))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Placeholder evaluator.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    placeholder: Regex,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            placeholder: Regex::new(PLACEHOLDER).expect("placeholder pattern is a valid regex"),
        }
    }

    /// Substitute every placeholder in `template`.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        for caps in self.placeholder.captures_iter(template) {
            let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&template[last..whole.start()]);
            if expr.as_str().is_empty() {
                return Err(TemplateError::Malformed("empty placeholder".to_string()));
            }
            out.push_str(ctx.lookup(expr.as_str())?);
            last = whole.end();
        }
        out.push_str(&template[last..]);

        if out.contains("{{") {
            return Err(TemplateError::Malformed("unterminated placeholder".to_string()));
        }
        Ok(out)
    }

    /// Evaluate a query: a template when it has placeholders, otherwise a
    /// bare variable name.
    pub fn evaluate(&self, query: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        let query = query.trim();
        if query.contains("{{") {
            self.render(query, ctx)
        } else {
            ctx.lookup(query).map(str::to_string)
        }
    }
}
