//! Trial domain model.
//!
//! A trial is one concrete run of an experiment: the assignment it was
//! created for, the patches and setup side effects that assignment resolves
//! to, the readiness checks gating the run and the metric values the run
//! produced. Status is append-only conditions plus a persisted phase so a
//! controller can resume a trial after a restart.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::cluster::{ConditionStatus, LabelSelector, ObjectReference};
use super::experiment::PatchType;
use crate::domain::errors::{TrialError, ValidationError};

/// A named integer value bound to an experiment parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub name: String,
    pub value: i64,
}

impl Assignment {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A resolved patch, ready to be applied to a single object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    pub target_ref: ObjectReference,
    pub patch_type: PatchType,
    #[serde(with = "raw_patch")]
    pub data: Vec<u8>,
    /// Set to zero once the patch is applied, or when it can never be
    #[serde(default)]
    pub attempts_remaining: u32,
}

impl PatchOperation {
    pub fn is_pending(&self) -> bool {
        self.attempts_remaining > 0
    }
}

mod raw_patch {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

/// An observed metric value. `value`/`error` are float64s formatted as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default)]
    pub attempts_remaining: u32,
    /// Condition reason recorded when collection gave up
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
}

impl Value {
    pub fn pending(name: impl Into<String>, attempts: u32) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            error: String::new(),
            attempts_remaining: attempts,
            failure_reason: String::new(),
            failure_message: String::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.attempts_remaining > 0
    }

    pub fn is_observed(&self) -> bool {
        !self.value.is_empty()
    }

    /// Collection finished without ever producing a value.
    pub fn is_exhausted(&self) -> bool {
        self.attempts_remaining == 0 && self.value.is_empty()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.parse().ok()
    }
}

/// Selects a trial assignment by parameter name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSelector {
    pub name: String,
}

/// Source of a Helm value other than a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmValueSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_ref: Option<ParameterSelector>,
}

/// A Helm value passed to a setup task release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmValue {
    pub name: String,
    #[serde(default)]
    pub force_string: bool,
    /// Template evaluated with the same rules as patches
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<HelmValueSource>,
}

/// Auxiliary application state installed before and removed after a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupTask {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default)]
    pub skip_create: bool,
    #[serde(default)]
    pub skip_delete: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub helm_chart: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm_values: Vec<HelmValue>,
}

impl SetupTask {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A readiness requirement declared on the trial template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialReadinessGate {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition_types: Vec<String>,
    #[serde(default)]
    pub initial_delay_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
}

/// A resolved readiness check tracked on the trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessCheck {
    pub target_ref: ObjectReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    pub condition_types: Vec<String>,
    #[serde(default)]
    pub initial_delay_seconds: u32,
    #[serde(default)]
    pub period_seconds: u32,
    /// Set to zero once the check passes, or when its poll budget runs out
    #[serde(default)]
    pub attempts_remaining: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_time: Option<DateTime<Utc>>,
}

impl ReadinessCheck {
    pub fn is_pending(&self) -> bool {
        self.attempts_remaining > 0
    }

    /// Human readable target, used in condition messages.
    pub fn describe(&self) -> String {
        match &self.selector {
            Some(selector) if self.target_ref.name.is_empty() => {
                format!("{} matching {}", self.target_ref.kind, selector)
            }
            _ => self.target_ref.to_string(),
        }
    }
}

/// Lifecycle phase of a trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialPhase {
    #[default]
    Pending,
    Patching,
    AwaitingSetup,
    AwaitingReady,
    Running,
    Measuring,
    SettingDown,
    Complete,
    Failed,
}

impl TrialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Patching => "Patching",
            Self::AwaitingSetup => "AwaitingSetup",
            Self::AwaitingReady => "AwaitingReady",
            Self::Running => "Running",
            Self::Measuring => "Measuring",
            Self::SettingDown => "SettingDown",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Valid transitions from this phase. Every live phase may fail.
    pub fn valid_transitions(&self) -> Vec<TrialPhase> {
        match self {
            Self::Pending => vec![Self::Patching, Self::Failed],
            Self::Patching => vec![Self::AwaitingSetup, Self::Failed],
            Self::AwaitingSetup => vec![Self::AwaitingReady, Self::Failed],
            Self::AwaitingReady => vec![Self::Running, Self::Failed],
            Self::Running => vec![Self::Measuring, Self::Failed],
            Self::Measuring => vec![Self::SettingDown, Self::Failed],
            Self::SettingDown => vec![Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for TrialPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable condition types on a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrialConditionType {
    /// Successful run when `True`
    Complete,
    /// Failed run when `True`
    Failed,
    Patched,
    SetupCreated,
    Ready,
    /// `False` records a non-blocking teardown failure
    SetupDeleted,
}

impl fmt::Display for TrialConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "Complete",
            Self::Failed => "Failed",
            Self::Patched => "Patched",
            Self::SetupCreated => "SetupCreated",
            Self::Ready => "Ready",
            Self::SetupDeleted => "SetupDeleted",
        };
        f.write_str(s)
    }
}

/// A timestamped observation of a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCondition {
    #[serde(rename = "type")]
    pub condition_type: TrialConditionType,
    pub status: ConditionStatus,
    pub last_probe_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Object identity and optimistic-concurrency version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Zero until first persisted
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// Template used to stamp new trials from an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialTemplate {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_offset_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_runtime_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_failure: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<TrialReadinessGate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_tasks: Vec<SetupTask>,
}

/// Largest accepted duration hint (ten years).
pub const MAX_DURATION_HINT_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

fn shift(at: DateTime<Utc>, seconds: u64, hint: &str) -> Result<DateTime<Utc>, TrialError> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .ok_or_else(|| TrialError::RunWindowOverflow(format!("{hint} of {seconds}s from {at}")))
}

impl TrialTemplate {
    /// Reject duration hints too large to apply to a timestamp.
    pub fn validate_duration_hints(&self) -> Result<(), ValidationError> {
        let hints = [
            ("startTimeOffset", self.start_time_offset_seconds),
            ("approximateRuntime", self.approximate_runtime_seconds),
        ];
        for (field, value) in hints {
            if let Some(seconds) = value.filter(|s| *s > MAX_DURATION_HINT_SECONDS) {
                return Err(ValidationError::InvalidDurationHint {
                    field,
                    seconds,
                    max: MAX_DURATION_HINT_SECONDS,
                });
            }
        }
        Ok(())
    }
}

/// Desired state of a trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialSpec {
    pub experiment_ref: ObjectReference,
    /// Default namespace for patch targets, falls back to the trial namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_offset_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_runtime_seconds: Option<u64>,
    /// Advisory to the external garbage collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_finished: Option<u32>,
    /// Advisory to the external garbage collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_failure: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readiness_gates: Vec<TrialReadinessGate>,
    #[serde(default)]
    pub patch_operations: Vec<PatchOperation>,
    #[serde(default)]
    pub readiness_checks: Vec<ReadinessCheck>,
    #[serde(default)]
    pub values: Vec<Value>,
    #[serde(default)]
    pub setup_tasks: Vec<SetupTask>,
}

/// Observed state of a trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatus {
    #[serde(default)]
    pub phase: TrialPhase,
    /// `name=value` summary for reporting
    #[serde(default)]
    pub assignments: String,
    /// `name=value` summary for reporting
    #[serde(default)]
    pub values: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Vec<TrialCondition>,
}

/// One run of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub metadata: ObjectMeta,
    pub spec: TrialSpec,
    #[serde(default)]
    pub status: TrialStatus,
}

impl Trial {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, experiment_ref: ObjectReference) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..ObjectMeta::default()
            },
            spec: TrialSpec {
                experiment_ref,
                ..TrialSpec::default()
            },
            status: TrialStatus::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> TrialPhase {
        self.status.phase
    }

    /// Namespace patch targets default to.
    pub fn target_namespace(&self) -> &str {
        if self.spec.target_namespace.is_empty() {
            &self.metadata.namespace
        } else {
            &self.spec.target_namespace
        }
    }

    pub fn assignment_map(&self) -> BTreeMap<String, i64> {
        self.spec
            .assignments
            .iter()
            .map(|a| (a.name.clone(), a.value))
            .collect()
    }

    /// The most recent condition of the given type.
    pub fn condition(&self, condition_type: TrialConditionType) -> Option<&TrialCondition> {
        self.status
            .conditions
            .iter()
            .rev()
            .find(|c| c.condition_type == condition_type)
    }

    pub fn has_condition(&self, condition_type: TrialConditionType, status: ConditionStatus) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == status)
    }

    /// `Complete=True` or `Failed=True` has been recorded.
    pub fn is_finished(&self) -> bool {
        self.has_condition(TrialConditionType::Complete, ConditionStatus::True)
            || self.has_condition(TrialConditionType::Failed, ConditionStatus::True)
    }

    pub fn is_failed(&self) -> bool {
        self.has_condition(TrialConditionType::Failed, ConditionStatus::True)
    }

    /// Append a condition. Allowed on finished trials (informational only).
    pub fn append_condition(
        &mut self,
        condition_type: TrialConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) {
        let now = Utc::now();
        let last_transition_time = match self.condition(condition_type) {
            Some(previous) if previous.status == status => previous.last_transition_time,
            _ => now,
        };
        self.status.conditions.push(TrialCondition {
            condition_type,
            status,
            last_probe_time: now,
            last_transition_time,
            reason: reason.into(),
            message: message.into(),
        });
    }

    /// Reject mutation of a finished trial.
    pub fn ensure_mutable(&self) -> Result<(), TrialError> {
        if self.is_finished() {
            Err(TrialError::Terminal(self.metadata.name.clone()))
        } else {
            Ok(())
        }
    }

    /// Move to the next lifecycle phase.
    pub fn transition_to(&mut self, next: TrialPhase) -> Result<(), TrialError> {
        self.ensure_mutable()?;
        if !self.status.phase.can_transition_to(next) {
            return Err(TrialError::InvalidStateTransition {
                from: self.status.phase,
                to: next,
            });
        }
        self.status.phase = next;
        Ok(())
    }

    /// Record the single terminal failure of this trial.
    pub fn fail(&mut self, reason: impl Into<String>, message: impl Into<String>) -> Result<(), TrialError> {
        self.transition_to(TrialPhase::Failed)?;
        self.append_condition(TrialConditionType::Failed, ConditionStatus::True, reason, message);
        self.refresh_summaries();
        Ok(())
    }

    /// Record successful completion of this trial.
    pub fn complete(&mut self, reason: impl Into<String>, message: impl Into<String>) -> Result<(), TrialError> {
        self.transition_to(TrialPhase::Complete)?;
        self.append_condition(TrialConditionType::Complete, ConditionStatus::True, reason, message);
        self.refresh_summaries();
        Ok(())
    }

    /// Record the job run window, applying the configured duration hints.
    pub fn record_run_window(&mut self, started: DateTime<Utc>, finished: DateTime<Utc>) -> Result<(), TrialError> {
        self.ensure_mutable()?;
        let start = match self.spec.start_time_offset_seconds {
            Some(offset) => shift(started, offset, "startTimeOffset")?,
            None => started,
        };
        let mut completion = finished.max(start);
        if let Some(runtime) = self.spec.approximate_runtime_seconds {
            completion = completion.min(shift(start, runtime, "approximateRuntime")?);
        }
        self.status.start_time = Some(start);
        self.status.completion_time = Some(completion);
        Ok(())
    }

    /// Duration of the effective run window in seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn run_duration_seconds(&self) -> Option<f64> {
        match (self.status.start_time, self.status.completion_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    pub fn value_mut(&mut self, name: &str) -> Result<&mut Value, TrialError> {
        self.spec
            .values
            .iter_mut()
            .find(|v| v.name == name)
            .ok_or_else(|| TrialError::UnknownValue(name.to_string()))
    }

    /// Rebuild the `name=value` reporting strings.
    pub fn refresh_summaries(&mut self) {
        self.status.assignments = self
            .spec
            .assignments
            .iter()
            .map(|a| format!("{}={}", a.name, a.value))
            .collect::<Vec<_>>()
            .join(", ");
        self.status.values = self
            .spec
            .values
            .iter()
            .filter(|v| v.is_observed())
            .map(|v| format!("{}={}", v.name, v.value))
            .collect::<Vec<_>>()
            .join(", ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial() -> Trial {
        let mut t = Trial::new("tune-001", "default", ObjectReference::new("Experiment", "default", "tune"));
        t.spec.assignments = vec![Assignment::new("replicas", 3), Assignment::new("cpu", 250)];
        t
    }

    #[test]
    fn test_phase_transitions_follow_lifecycle() {
        let mut t = trial();
        for next in [
            TrialPhase::Patching,
            TrialPhase::AwaitingSetup,
            TrialPhase::AwaitingReady,
            TrialPhase::Running,
            TrialPhase::Measuring,
            TrialPhase::SettingDown,
        ] {
            t.transition_to(next).expect("lifecycle transition should be valid");
        }
        t.complete("Completed", "done").expect("complete should succeed");
        assert_eq!(t.phase(), TrialPhase::Complete);
        assert!(t.is_finished());
        assert!(!t.is_failed());
    }

    #[test]
    fn test_skipping_a_phase_is_rejected() {
        let mut t = trial();
        let err = t.transition_to(TrialPhase::Running).unwrap_err();
        assert_eq!(
            err,
            TrialError::InvalidStateTransition {
                from: TrialPhase::Pending,
                to: TrialPhase::Running
            }
        );
    }

    #[test]
    fn test_finished_trial_is_immutable_but_accepts_conditions() {
        let mut t = trial();
        t.fail("PatchFailed", "boom").expect("fail from pending");
        assert!(t.is_failed());
        assert!(matches!(t.ensure_mutable(), Err(TrialError::Terminal(_))));
        assert!(t.transition_to(TrialPhase::Patching).is_err());
        assert!(t.fail("Again", "again").is_err());
        assert!(t.record_run_window(Utc::now(), Utc::now()).is_err());

        t.append_condition(
            TrialConditionType::SetupDeleted,
            ConditionStatus::False,
            "SetupDeleteFailed",
            "late warning",
        );
        assert_eq!(t.status.conditions.len(), 2);
        assert!(t.is_failed());
    }

    #[test]
    fn test_transition_time_kept_for_repeated_status() {
        let mut t = trial();
        t.append_condition(TrialConditionType::Ready, ConditionStatus::False, "", "");
        let first = t.status.conditions[0].last_transition_time;
        t.append_condition(TrialConditionType::Ready, ConditionStatus::False, "", "");
        assert_eq!(t.status.conditions[1].last_transition_time, first);
    }

    #[test]
    fn test_run_window_applies_offset_and_runtime_bound() {
        let mut t = trial();
        t.spec.start_time_offset_seconds = Some(30);
        t.spec.approximate_runtime_seconds = Some(60);
        let started = Utc::now();
        let finished = started + Duration::seconds(300);
        t.record_run_window(started, finished).expect("live trial");

        assert_eq!(t.status.start_time, Some(started + Duration::seconds(30)));
        assert_eq!(t.status.completion_time, Some(started + Duration::seconds(90)));
        assert_eq!(t.run_duration_seconds(), Some(60.0));
    }

    #[test]
    fn test_oversized_duration_hints_are_errors() {
        let started = Utc::now();
        let mut t = trial();
        t.spec.start_time_offset_seconds = Some(u64::MAX / 4);
        assert!(matches!(
            t.record_run_window(started, started),
            Err(TrialError::RunWindowOverflow(_))
        ));

        t.spec.start_time_offset_seconds = None;
        t.spec.approximate_runtime_seconds = Some(u64::MAX);
        assert!(matches!(
            t.record_run_window(started, started),
            Err(TrialError::RunWindowOverflow(_))
        ));
        assert_eq!(t.status.start_time, None);
    }

    #[test]
    fn test_duration_hints_are_bounded() {
        let mut template = TrialTemplate::default();
        template.approximate_runtime_seconds = Some(MAX_DURATION_HINT_SECONDS);
        assert!(template.validate_duration_hints().is_ok());

        template.start_time_offset_seconds = Some(MAX_DURATION_HINT_SECONDS + 1);
        assert!(matches!(
            template.validate_duration_hints(),
            Err(ValidationError::InvalidDurationHint { field: "startTimeOffset", .. })
        ));
    }

    #[test]
    fn test_summaries() {
        let mut t = trial();
        t.spec.values = vec![
            Value {
                value: "12.5".to_string(),
                ..Value::pending("duration", 0)
            },
            Value::pending("p95", 3),
        ];
        t.refresh_summaries();
        assert_eq!(t.status.assignments, "replicas=3, cpu=250");
        assert_eq!(t.status.values, "duration=12.5");
    }

    #[test]
    fn test_patch_data_serializes_as_text() {
        let op = PatchOperation {
            target_ref: ObjectReference::new("Deployment", "default", "web"),
            patch_type: PatchType::Merge,
            data: br#"{"spec":{"replicas":3}}"#.to_vec(),
            attempts_remaining: 3,
        };
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["data"], r#"{"spec":{"replicas":3}}"#);
        let back: PatchOperation = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, op);
    }
}
