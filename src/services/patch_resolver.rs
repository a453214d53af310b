//! Patch resolution and application.
//!
//! Resolution evaluates every patch template of an experiment against a
//! trial's assignments and binds each result to its target object(s).
//! All templates are rendered before any selector is looked up, so a bad
//! template fails the trial without consulting the cluster.
//!
//! Application drives each operation's `attempts_remaining` counter through
//! `RetryPolicy::run_bounded`; already-applied operations (counter at zero)
//! are skipped, which makes re-running the phase safe.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::errors::TemplateError;
use crate::domain::models::{
    Experiment, ObjectReference, PatchOperation, PatchTemplate, PatchType, Trial,
};
use crate::domain::ports::{ClusterClient, ClusterError};
use crate::services::retry::{AttemptOutcome, RetryPolicy};
use crate::services::template::{TemplateContext, TemplateEngine};

/// Why patching could not finish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchFailure {
    /// A template could not be evaluated; never retried
    Template { index: usize, error: TemplateError },
    /// Selector lookup failed permanently or ran out of attempts
    Lookup { index: usize, error: ClusterError },
    /// A selector matched nothing
    NoTargets { index: usize, selector: String },
    /// Applying an operation failed
    Apply {
        target: String,
        error: ClusterError,
        exhausted: bool,
    },
    /// The trial was cancelled mid-operation
    Cancelled,
}

impl PatchFailure {
    /// Condition reason recorded on the trial.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Template { .. } => "PatchTemplateInvalid",
            Self::Lookup { .. } | Self::NoTargets { .. } => "PatchTargetNotFound",
            Self::Apply { exhausted: true, .. } => "PatchRetriesExhausted",
            Self::Apply { exhausted: false, .. } => "PatchRejected",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Human readable condition message.
    pub fn message(&self) -> String {
        match self {
            Self::Template { index, error } => format!("patch template #{index}: {error}"),
            Self::Lookup { index, error } => format!("patch template #{index}: target lookup failed: {error}"),
            Self::NoTargets { index, selector } => {
                format!("patch template #{index}: no objects match selector {selector}")
            }
            Self::Apply { target, error, .. } => format!("patch of {target} failed: {error}"),
            Self::Cancelled => "patching was cancelled".to_string(),
        }
    }
}

/// A patched target that must report conditions before the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatedTarget {
    pub target: ObjectReference,
    pub condition_types: Vec<String>,
}

pub struct PatchResolver {
    cluster: Arc<dyn ClusterClient>,
    engine: TemplateEngine,
    policy: RetryPolicy,
    max_attempts: u32,
}

impl PatchResolver {
    pub fn new(cluster: Arc<dyn ClusterClient>, policy: RetryPolicy, max_attempts: u32) -> Self {
        Self {
            cluster,
            engine: TemplateEngine::new(),
            policy,
            max_attempts,
        }
    }

    /// Render one template into a JSON patch document.
    fn render(&self, template: &PatchTemplate, ctx: &TemplateContext) -> Result<Vec<u8>, TemplateError> {
        let text = self.engine.render(&template.patch, ctx)?;
        // YAML is a superset of JSON, accept either and normalise to JSON
        let document: serde_json::Value = serde_yaml::from_str(&text)
            .map_err(|e| TemplateError::Malformed(format!("patch is not valid JSON or YAML: {e}")))?;
        match (template.patch_type, &document) {
            (PatchType::Json, serde_json::Value::Array(_))
            | (PatchType::Merge | PatchType::Strategic, serde_json::Value::Object(_)) => {}
            (PatchType::Json, _) => {
                return Err(TemplateError::Malformed("json patch must be an array of operations".to_string()))
            }
            _ => return Err(TemplateError::Malformed(format!("{} patch must be an object", template.patch_type))),
        }
        serde_json::to_vec(&document).map_err(|e| TemplateError::Malformed(e.to_string()))
    }

    /// Evaluate every template against the trial and record the resulting
    /// operations on it. Returns the targets whose patch carries readiness
    /// gates.
    ///
    /// On a template error the failed template is recorded as an operation
    /// with zero attempts (when its target is named) and no cluster call is
    /// made at all.
    pub async fn resolve(
        &self,
        experiment: &Experiment,
        trial: &mut Trial,
        cancel: &CancellationToken,
    ) -> Result<Vec<GatedTarget>, PatchFailure> {
        let ctx = TemplateContext::for_trial(trial);
        let namespace = trial.target_namespace().to_string();
        trial.spec.patch_operations.clear();

        let mut rendered = Vec::with_capacity(experiment.patches.len());
        for (index, template) in experiment.patches.iter().enumerate() {
            match self.render(template, &ctx) {
                Ok(data) => rendered.push(data),
                Err(error) => {
                    warn!(trial = %trial.name(), index, error = %error, "patch template evaluation failed");
                    if !template.target_ref.name.is_empty() {
                        trial.spec.patch_operations.push(PatchOperation {
                            target_ref: template.target_ref.defaulted(&namespace),
                            patch_type: template.patch_type,
                            data: Vec::new(),
                            attempts_remaining: 0,
                        });
                    }
                    return Err(PatchFailure::Template { index, error });
                }
            }
        }

        let mut operations = Vec::new();
        let mut gated_targets = Vec::new();
        for (index, (template, data)) in experiment.patches.iter().zip(rendered).enumerate() {
            let targets = self.targets(index, template, &namespace, cancel).await?;
            for target in targets {
                debug!(trial = %trial.name(), target = %target, patch_type = %template.patch_type, "resolved patch");
                if !template.readiness_gates.is_empty() {
                    gated_targets.push(GatedTarget {
                        target: target.clone(),
                        condition_types: template
                            .readiness_gates
                            .iter()
                            .map(|g| g.condition_type.clone())
                            .collect(),
                    });
                }
                operations.push(PatchOperation {
                    target_ref: target,
                    patch_type: template.patch_type,
                    data: data.clone(),
                    attempts_remaining: self.max_attempts,
                });
            }
        }

        info!(trial = %trial.name(), operations = operations.len(), "patches resolved");
        trial.spec.patch_operations = operations;
        Ok(gated_targets)
    }

    /// Objects a template applies to: its named target, or every selector match.
    async fn targets(
        &self,
        index: usize,
        template: &PatchTemplate,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ObjectReference>, PatchFailure> {
        if !template.target_ref.name.is_empty() {
            return Ok(vec![template.target_ref.defaulted(namespace)]);
        }

        let selector = template.selector.clone().unwrap_or_default();
        let lookup_namespace = if template.target_ref.namespace.is_empty() {
            namespace
        } else {
            template.target_ref.namespace.as_str()
        };

        let mut attempts = self.max_attempts;
        let outcome = self
            .policy
            .run_bounded(&mut attempts, cancel, || {
                self.cluster
                    .list(&template.target_ref.kind, lookup_namespace, &selector)
            })
            .await;

        let objects = match outcome {
            AttemptOutcome::Succeeded(objects) => objects,
            AttemptOutcome::Cancelled => return Err(PatchFailure::Cancelled),
            AttemptOutcome::Exhausted(error) | AttemptOutcome::Rejected(error) => {
                return Err(PatchFailure::Lookup { index, error })
            }
            AttemptOutcome::Skipped => Vec::new(),
        };

        if objects.is_empty() {
            return Err(PatchFailure::NoTargets {
                index,
                selector: selector.to_string(),
            });
        }

        Ok(objects
            .into_iter()
            .map(|o| {
                let mut target = o.reference;
                if target.api_version.is_empty() {
                    target.api_version.clone_from(&template.target_ref.api_version);
                }
                target
            })
            .collect())
    }

    /// Apply every pending operation in order.
    ///
    /// Stops at the first operation that cannot be applied; operations after
    /// it keep their counters.
    pub async fn apply_pending(&self, trial: &mut Trial, cancel: &CancellationToken) -> Result<usize, PatchFailure> {
        let name = trial.name().to_string();
        let mut applied = 0;

        for op in &mut trial.spec.patch_operations {
            let target_ref = &op.target_ref;
            let patch_type = op.patch_type;
            let data = op.data.as_slice();

            let outcome = self
                .policy
                .run_bounded(&mut op.attempts_remaining, cancel, || {
                    self.cluster.apply_patch(target_ref, patch_type, data)
                })
                .await;

            match outcome {
                AttemptOutcome::Succeeded(()) => {
                    info!(trial = %name, target = %target_ref, "patch applied");
                    applied += 1;
                }
                AttemptOutcome::Skipped => {}
                AttemptOutcome::Cancelled => return Err(PatchFailure::Cancelled),
                AttemptOutcome::Exhausted(error) => {
                    return Err(PatchFailure::Apply {
                        target: target_ref.to_string(),
                        error,
                        exhausted: true,
                    })
                }
                AttemptOutcome::Rejected(error) => {
                    return Err(PatchFailure::Apply {
                        target: target_ref.to_string(),
                        error,
                        exhausted: false,
                    })
                }
            }
        }

        Ok(applied)
    }
}
