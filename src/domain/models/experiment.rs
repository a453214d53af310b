//! Experiment domain model.
//!
//! An experiment is the immutable template every trial is stamped from: the
//! parameter search space, the constraints over it, the metrics to observe
//! and the patches that put the cluster into the state a given assignment
//! describes.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::cluster::{LabelSelector, ObjectReference};
use super::trial::{Assignment, TrialTemplate};
use crate::domain::errors::ValidationError;

/// Domain of a single search-space dimension (inclusive integer bounds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
}

impl Parameter {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Requires `lower_parameter <= upper_parameter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderConstraint {
    pub lower_parameter: String,
    pub upper_parameter: String,
}

/// One weighted term of a sum constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SumConstraintParameter {
    pub name: String,
    pub weight: f64,
}

/// Weighted sum of parameters bounded above or below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SumConstraint {
    pub bound: f64,
    #[serde(default)]
    pub is_upper_bound: bool,
    pub parameters: Vec<SumConstraintParameter>,
}

/// A constraint over the search space; exactly one of `order`/`sum` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<SumConstraint>,
}

impl Constraint {
    fn label(&self) -> &str {
        if self.name.is_empty() {
            "<unnamed>"
        } else {
            &self.name
        }
    }

    fn referenced_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(order) = &self.order {
            names.push(order.lower_parameter.as_str());
            names.push(order.upper_parameter.as_str());
        }
        if let Some(sum) = &self.sum {
            names.extend(sum.parameters.iter().map(|p| p.name.as_str()));
        }
        names
    }

    /// Check the constraint against a resolved assignment map.
    #[allow(clippy::cast_precision_loss)]
    pub fn is_satisfied(&self, values: &BTreeMap<String, i64>) -> bool {
        if let Some(order) = &self.order {
            match (values.get(&order.lower_parameter), values.get(&order.upper_parameter)) {
                (Some(lower), Some(upper)) if lower <= upper => {}
                _ => return false,
            }
        }
        if let Some(sum) = &self.sum {
            let mut total = 0.0;
            for p in &sum.parameters {
                let Some(v) = values.get(&p.name) else {
                    return false;
                };
                total += p.weight * (*v as f64);
            }
            let ok = if sum.is_upper_bound {
                total <= sum.bound
            } else {
                total >= sum.bound
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// How a metric value is collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Template evaluated against the trial itself; no network call
    #[default]
    Local,
    /// PromQL issued against the matched service; must reduce to a scalar
    Prometheus,
    /// JSON document fetched from the matched service, queried by path
    #[serde(rename = "jsonpath")]
    JsonPath,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Prometheus => "prometheus",
            Self::JsonPath => "jsonpath",
        };
        f.write_str(s)
    }
}

/// Port number or named port on a matched service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortRef {
    Number(u16),
    Name(String),
}

/// An observable outcome of a trial run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub minimize: bool,
    #[serde(default, rename = "type")]
    pub metric_type: MetricType,
    pub query: String,
    /// Optional query for the standard deviation reported alongside the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Metric {
    pub fn local(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            minimize: true,
            metric_type: MetricType::Local,
            query: query.into(),
            error_query: None,
            selector: None,
            port: None,
            path: String::new(),
        }
    }

    pub fn prometheus(name: impl Into<String>, query: impl Into<String>, selector: LabelSelector) -> Self {
        Self {
            metric_type: MetricType::Prometheus,
            selector: Some(selector),
            ..Self::local(name, query)
        }
    }

    pub fn json_path(
        name: impl Into<String>,
        query: impl Into<String>,
        selector: LabelSelector,
        path: impl Into<String>,
    ) -> Self {
        Self {
            metric_type: MetricType::JsonPath,
            selector: Some(selector),
            path: path.into(),
            ..Self::local(name, query)
        }
    }
}

/// Patch content type understood by the cluster API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    /// RFC 6902 JSON patch
    Json,
    /// RFC 7386 JSON merge patch
    Merge,
    /// Kubernetes strategic merge patch
    #[default]
    Strategic,
}

impl PatchType {
    /// Media type sent to the cluster API for this patch type.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json-patch+json",
            Self::Merge => "application/merge-patch+json",
            Self::Strategic => "application/strategic-merge-patch+json",
        }
    }
}

impl fmt::Display for PatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Merge => "merge",
            Self::Strategic => "strategic",
        };
        f.write_str(s)
    }
}

/// Condition a patched object must report before the trial may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReadinessGate {
    pub condition_type: String,
}

/// A patch template and the object(s) it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchTemplate {
    #[serde(default, rename = "type")]
    pub patch_type: PatchType,
    /// Template text evaluating to the patch document
    pub patch: String,
    /// Direct target; when its name is empty, `selector` is used instead
    #[serde(default)]
    pub target_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<PatchReadinessGate>,
}

/// Static description of a search space and how to evaluate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Trials to execute concurrently; placement fan-out is external
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub patches: Vec<PatchTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
    #[serde(default)]
    pub template: TrialTemplate,
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            replicas: None,
            parameters: Vec::new(),
            constraints: Vec::new(),
            metrics: Vec::new(),
            patches: Vec::new(),
            namespace_selector: None,
            template: TrialTemplate::default(),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn with_patch(mut self, patch: PatchTemplate) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Check the internal consistency of the experiment definition.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName("experiment"));
        }

        let mut seen = HashSet::new();
        for p in &self.parameters {
            if p.name.is_empty() {
                return Err(ValidationError::EmptyName("parameter"));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(ValidationError::DuplicateParameter(p.name.clone()));
            }
            if p.min > p.max {
                return Err(ValidationError::InvalidBounds {
                    name: p.name.clone(),
                    min: p.min,
                    max: p.max,
                });
            }
        }

        for c in &self.constraints {
            if c.order.is_some() == c.sum.is_some() {
                return Err(ValidationError::InvalidConstraint {
                    name: c.label().to_string(),
                    reason: "exactly one of order or sum must be set".to_string(),
                });
            }
            for name in c.referenced_names() {
                if !seen.contains(name) {
                    return Err(ValidationError::UnknownParameter(name.to_string()));
                }
            }
        }

        let mut metric_names = HashSet::new();
        for m in &self.metrics {
            if m.name.is_empty() {
                return Err(ValidationError::EmptyName("metric"));
            }
            if !metric_names.insert(m.name.as_str()) {
                return Err(ValidationError::DuplicateMetric(m.name.clone()));
            }
            if m.query.trim().is_empty() {
                return Err(ValidationError::InvalidMetric {
                    name: m.name.clone(),
                    reason: "query is empty".to_string(),
                });
            }
            if m.metric_type != MetricType::Local && m.selector.is_none() {
                return Err(ValidationError::InvalidMetric {
                    name: m.name.clone(),
                    reason: format!("{} metrics require a selector", m.metric_type),
                });
            }
        }

        self.template.validate_duration_hints()?;

        for (index, patch) in self.patches.iter().enumerate() {
            if patch.target_ref.name.is_empty() && patch.selector.is_none() {
                return Err(ValidationError::InvalidPatch {
                    index,
                    reason: "either targetRef.name or selector is required".to_string(),
                });
            }
            if patch.patch.trim().is_empty() {
                return Err(ValidationError::InvalidPatch {
                    index,
                    reason: "patch template is empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Check a trial's assignments against the search space.
    ///
    /// Assignment names must match the parameters exactly, every value must
    /// lie within its bounds, and all constraints must hold.
    pub fn validate_assignments(&self, assignments: &[Assignment]) -> Result<(), ValidationError> {
        let mut values = BTreeMap::new();
        for a in assignments {
            let Some(parameter) = self.parameter(&a.name) else {
                return Err(ValidationError::UnknownParameter(a.name.clone()));
            };
            if values.insert(a.name.clone(), a.value).is_some() {
                return Err(ValidationError::DuplicateAssignment(a.name.clone()));
            }
            if !parameter.contains(a.value) {
                return Err(ValidationError::OutOfBounds {
                    name: a.name.clone(),
                    value: a.value,
                    min: parameter.min,
                    max: parameter.max,
                });
            }
        }

        if let Some(missing) = self.parameters.iter().find(|p| !values.contains_key(&p.name)) {
            return Err(ValidationError::MissingAssignment(missing.name.clone()));
        }

        if let Some(violated) = self.constraints.iter().find(|c| !c.is_satisfied(&values)) {
            return Err(ValidationError::ConstraintViolated(violated.label().to_string()));
        }

        Ok(())
    }
}
