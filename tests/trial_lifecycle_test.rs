//! End-to-end trial lifecycles against the in-memory adapters.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use common::{experiment, Harness, MockSource};
use trialctl::adapters::memory::{MemoryJobMonitor, MemoryTrialRepository, SetupStep};
use trialctl::domain::models::{
    Assignment, ClusterObject, ConditionStatus, LabelSelector, Metric, ObjectReference, PatchReadinessGate,
    PatchTemplate, PatchType, SetupTask, Trial, TrialConditionType, TrialPhase, TrialReadinessGate,
};
use trialctl::domain::ports::{JobCompletion, PrometheusData, PrometheusResponse, StoreError, TrialRepository};
use trialctl::services::{ControllerPorts, TrialController};
use trialctl::ControllerError;

fn replicas(value: i64) -> Vec<Assignment> {
    vec![Assignment::new("replicas", value)]
}

fn deployment(name: &str) -> ClusterObject {
    ClusterObject::new(ObjectReference::new("Deployment", "bench", name))
        .with_label("tier", "web")
        .with_body(json!({"spec": {"replicas": 1}}))
}

fn failure_reason(trial: &Trial) -> &str {
    trial
        .condition(TrialConditionType::Failed)
        .map(|c| c.reason.as_str())
        .expect("trial should carry a Failed condition")
}

/// Delegating store that keeps every written snapshot and can reject one write.
struct RecordingTrials {
    inner: Arc<MemoryTrialRepository>,
    written: Mutex<Vec<Trial>>,
    reject_once: Option<TrialPhase>,
    rejected: AtomicBool,
}

impl RecordingTrials {
    fn new(inner: Arc<MemoryTrialRepository>, reject_once: Option<TrialPhase>) -> Self {
        Self {
            inner,
            written: Mutex::new(Vec::new()),
            reject_once,
            rejected: AtomicBool::new(false),
        }
    }

    fn phases(&self) -> Vec<TrialPhase> {
        self.written.lock().unwrap().iter().map(Trial::phase).collect()
    }
}

#[async_trait]
impl TrialRepository for RecordingTrials {
    async fn insert(&self, trial: &Trial) -> Result<Trial, StoreError> {
        self.inner.insert(trial).await
    }

    async fn get(&self, name: &str) -> Result<Option<Trial>, StoreError> {
        self.inner.get(name).await
    }

    async fn update(&self, trial: &Trial) -> Result<Trial, StoreError> {
        if self.reject_once == Some(trial.phase()) && !self.rejected.swap(true, Ordering::SeqCst) {
            let version = trial.metadata.resource_version;
            return Err(StoreError::Conflict {
                name: trial.name().to_string(),
                expected: version,
                actual: version + 1,
            });
        }
        let stored = self.inner.update(trial).await?;
        self.written.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn list_for_experiment(&self, experiment: &str) -> Result<Vec<Trial>, StoreError> {
        self.inner.list_for_experiment(experiment).await
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.inner.delete(name).await
    }
}

async fn wait_for_phase(harness: &Harness, name: &str, phase: TrialPhase) {
    for _ in 0..2000 {
        if harness.stored(name).await.phase() == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("trial {name} never reached {phase}");
}

#[tokio::test]
async fn test_local_metric_trial_completes() {
    common::setup_test_logging();
    let harness = Harness::new();
    let trial = harness.create_trial(&experiment(), replicas(3)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Complete);
    assert!(done.is_finished());
    assert!(!done.is_failed());
    assert_eq!(done.condition(TrialConditionType::Complete).unwrap().reason, "TrialCompleted");

    assert_eq!(done.spec.values.len(), 1);
    assert_eq!(done.spec.values[0].name, "duration");
    assert_eq!(done.spec.values[0].value, "90");
    assert_eq!(done.spec.values[0].attempts_remaining, 0);
    assert_eq!(done.status.assignments, "replicas=3");
    assert_eq!(done.status.values, "duration=90");

    // Nothing to patch, set up or wait for
    assert!(done.condition(TrialConditionType::Patched).is_none());
    assert!(done.condition(TrialConditionType::SetupCreated).is_none());
    assert!(done.condition(TrialConditionType::Ready).is_none());

    assert_eq!(harness.stored(trial.name()).await, done);
    assert_eq!(harness.jobs.signalled().await, vec![trial.name().to_string()]);
}

#[tokio::test]
async fn test_every_phase_is_persisted_in_order() {
    let harness = Harness::new();
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db")];
    let trial = harness.create_trial(&exp, replicas(3)).await;
    assert_eq!(trial.phase(), TrialPhase::Pending);

    let recording = Arc::new(RecordingTrials::new(harness.trials.clone(), None));
    let ports = ControllerPorts {
        trials: recording.clone(),
        ..harness.ports(MockSource::new())
    };
    let controller = TrialController::new(ports, &harness.config);
    let (updates, mut snapshots) = watch::channel(trial.clone());

    let done = controller
        .run_with_updates(trial.name(), &CancellationToken::new(), &updates)
        .await
        .unwrap();

    assert_eq!(
        recording.phases(),
        vec![
            TrialPhase::Patching,
            TrialPhase::AwaitingSetup,
            TrialPhase::AwaitingReady,
            TrialPhase::Running,
            TrialPhase::Measuring,
            TrialPhase::SettingDown,
            TrialPhase::Complete,
        ]
    );

    // Every write carries the whole status, not a partial update
    let written = recording.written.lock().unwrap().clone();
    for snapshot in &written {
        assert_eq!(snapshot.name(), trial.name());
        assert_eq!(snapshot.status.assignments, "replicas=3");
    }
    let versions: Vec<u64> = written.iter().map(|t| t.metadata.resource_version).collect();
    assert!(versions.windows(2).all(|w| w[0] < w[1]));

    assert!(written[2].condition(TrialConditionType::SetupCreated).is_some());
    assert!(written[5].spec.values[0].is_observed());
    assert_eq!(written.last(), Some(&done));
    assert_eq!(*snapshots.borrow_and_update(), done);
}

#[tokio::test]
async fn test_patches_applied_and_gated_before_run() {
    let harness = Harness::new();
    harness
        .cluster
        .put(deployment("web-a").with_condition("Available", ConditionStatus::True))
        .await;
    harness
        .cluster
        .put(deployment("web-b").with_condition("Available", ConditionStatus::True))
        .await;

    let exp = experiment().with_patch(PatchTemplate {
        patch_type: PatchType::Merge,
        patch: r#"{"spec": {"replicas": {{ .Values.replicas }}}}"#.to_string(),
        target_ref: ObjectReference::new("Deployment", "", ""),
        selector: Some(LabelSelector::with_label("tier", "web")),
        readiness_gates: vec![PatchReadinessGate {
            condition_type: "Available".to_string(),
        }],
    });
    let trial = harness.create_trial(&exp, replicas(3)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Complete);
    assert_eq!(done.spec.patch_operations.len(), 2);
    assert!(done.spec.patch_operations.iter().all(|op| op.attempts_remaining == 0));
    assert_eq!(done.spec.readiness_checks.len(), 2);
    assert!(done.spec.readiness_checks.iter().all(|c| !c.is_pending()));
    assert_eq!(done.condition(TrialConditionType::Patched).unwrap().status, ConditionStatus::True);
    assert_eq!(done.condition(TrialConditionType::Ready).unwrap().status, ConditionStatus::True);

    for name in ["web-a", "web-b"] {
        let object = harness
            .cluster
            .object(&ObjectReference::new("Deployment", "bench", name))
            .await
            .unwrap();
        assert_eq!(object.body["spec"]["replicas"], json!(3));
    }
    assert_eq!(harness.cluster.applied_patches().await.len(), 2);
}

#[tokio::test]
async fn test_unassigned_template_variable_fails_without_cluster_calls() {
    let harness = Harness::new();
    harness.cluster.put(deployment("web")).await;

    let exp = experiment().with_patch(PatchTemplate {
        patch_type: PatchType::Strategic,
        patch: r#"{"spec": {"cpu": "{{ .Values.cpu }}"}}"#.to_string(),
        target_ref: ObjectReference::new("Deployment", "bench", "web"),
        selector: None,
        readiness_gates: Vec::new(),
    });
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "PatchTemplateInvalid");
    assert_eq!(harness.cluster.calls(), 0);
    assert!(harness.cluster.applied_patches().await.is_empty());
    assert!(harness.jobs.signalled().await.is_empty());
    assert!(done.spec.values.is_empty());
}

#[tokio::test]
async fn test_readiness_timeout_fails_trial() {
    let harness = Harness::new();
    harness
        .cluster
        .put(ClusterObject::new(ObjectReference::new("StatefulSet", "bench", "db")).with_condition("Ready", ConditionStatus::False))
        .await;

    let mut exp = experiment();
    exp.template.readiness_gates = vec![TrialReadinessGate {
        kind: "StatefulSet".to_string(),
        name: "db".to_string(),
        condition_types: vec!["Ready".to_string()],
        ..TrialReadinessGate::default()
    }];
    let trial = harness.create_trial(&exp, replicas(1)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "ReadinessTimeout");
    assert_eq!(done.spec.readiness_checks.len(), 1);
    assert_eq!(done.spec.readiness_checks[0].attempts_remaining, 0);
    assert!(done.spec.values.is_empty());
    assert!(done.spec.patch_operations.is_empty());
    assert!(harness.jobs.signalled().await.is_empty());
}

#[tokio::test]
async fn test_non_scalar_prometheus_result_fails_trial() {
    let harness = Harness::new();
    harness
        .cluster
        .put(
            ClusterObject::new(ObjectReference::new("Service", "bench", "prometheus"))
                .with_label("app", "prometheus")
                .with_body(json!({"spec": {"ports": [{"name": "web", "port": 9090}]}})),
        )
        .await;

    let exp = experiment().with_metric(Metric::prometheus(
        "latency",
        "histogram_quantile(0.99, rate(request_seconds_bucket[5m]))",
        LabelSelector::with_label("app", "prometheus"),
    ));
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let mut source = MockSource::new();
    source
        .expect_query_prometheus()
        .withf(|base, _, _| base == "http://prometheus.bench:9090")
        .times(1)
        .returning(|_, _, _| {
            Ok(PrometheusResponse {
                status: "success".to_string(),
                data: Some(PrometheusData {
                    result_type: "vector".to_string(),
                    result: json!([
                        {"metric": {"pod": "a"}, "value": [1_700_000_000.0, "0.1"]},
                        {"metric": {"pod": "b"}, "value": [1_700_000_000.0, "0.2"]},
                        {"metric": {"pod": "c"}, "value": [1_700_000_000.0, "0.3"]},
                    ]),
                }),
                error_type: None,
                error: None,
            })
        });
    let controller = TrialController::new(harness.ports(source), &harness.config);

    let done = controller.run(trial.name(), &CancellationToken::new()).await.unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "MetricQueryInvalid");
    assert!(done
        .condition(TrialConditionType::Failed)
        .unwrap()
        .message
        .contains("latency"));

    // The other metric is still collected
    let duration = done.spec.values.iter().find(|v| v.name == "duration").unwrap();
    assert_eq!(duration.value, "90");
    let latency = done.spec.values.iter().find(|v| v.name == "latency").unwrap();
    assert!(latency.value.is_empty());
    assert_eq!(latency.attempts_remaining, 0);
}

#[tokio::test]
async fn test_setup_tasks_installed_and_removed() {
    let harness = Harness::new();
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db")];
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Complete);
    assert_eq!(done.condition(TrialConditionType::SetupCreated).unwrap().status, ConditionStatus::True);
    assert_eq!(done.condition(TrialConditionType::SetupDeleted).unwrap().status, ConditionStatus::True);

    let release = format!("{}-db", trial.name());
    assert_eq!(
        harness.setup.history().await,
        vec![(SetupStep::Create, release.clone()), (SetupStep::Delete, release)]
    );
    assert!(harness.setup.installed().await.is_empty());
}

#[tokio::test]
async fn test_setup_delete_failure_does_not_fail_trial() {
    let harness = Harness::new();
    harness.setup.fail_task("db", SetupStep::Delete).await;
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db")];
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Complete);
    assert!(!done.is_failed());
    let deleted = done.condition(TrialConditionType::SetupDeleted).unwrap();
    assert_eq!(deleted.status, ConditionStatus::False);
    assert_eq!(deleted.reason, "SetupDeleteFailed");
    assert_eq!(harness.setup.installed().await, vec![format!("{}-db", trial.name())]);
}

#[tokio::test]
async fn test_setup_create_failure_fails_trial() {
    let harness = Harness::new();
    harness.setup.fail_task("db", SetupStep::Create).await;
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db")];
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "SetupCreateFailed");
    assert!(harness.jobs.signalled().await.is_empty());
}

#[tokio::test]
async fn test_setup_create_failure_removes_earlier_tasks() {
    let harness = Harness::new();
    harness.setup.fail_task("cache", SetupStep::Create).await;
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db"), SetupTask::new("cache")];
    let trial = harness.create_trial(&exp, replicas(2)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "SetupCreateFailed");
    assert!(done.condition(TrialConditionType::SetupCreated).is_none());
    assert!(done.condition(TrialConditionType::SetupDeleted).is_some());
    assert!(harness.setup.installed().await.is_empty());
    assert!(harness.jobs.signalled().await.is_empty());

    let db = format!("{}-db", trial.name());
    assert!(harness
        .setup
        .history()
        .await
        .contains(&(SetupStep::Delete, db)));
}

#[tokio::test]
async fn test_metric_failure_reason_survives_a_lost_write() {
    let harness = Harness::new();
    let exp = experiment().with_metric(Metric::local("throughput", "requests_served"));
    let trial = harness.create_trial(&exp, replicas(2)).await;

    // The write of the Failed status loses a race; the stored trial stays in SettingDown
    let recording = Arc::new(RecordingTrials::new(harness.trials.clone(), Some(TrialPhase::Failed)));
    let ports = ControllerPorts {
        trials: recording,
        ..harness.ports(MockSource::new())
    };
    let err = TrialController::new(ports, &harness.config)
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let paused = harness.stored(trial.name()).await;
    assert_eq!(paused.phase(), TrialPhase::SettingDown);
    let throughput = paused.spec.values.iter().find(|v| v.name == "throughput").unwrap();
    assert_eq!(throughput.failure_reason, "MetricQueryInvalid");

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "MetricQueryInvalid");
    assert!(done
        .condition(TrialConditionType::Failed)
        .unwrap()
        .message
        .contains("throughput"));
}

#[tokio::test]
async fn test_failed_job_tears_down_setup() {
    let harness = Harness::with_jobs(MemoryJobMonitor::auto_complete(30, false));
    let mut exp = experiment();
    exp.template.setup_tasks = vec![SetupTask::new("db")];
    let trial = harness.create_trial(&exp, replicas(4)).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "JobFailed");
    assert!(done.spec.values.is_empty());
    assert!(harness.setup.installed().await.is_empty());
    assert_eq!(done.condition(TrialConditionType::SetupDeleted).unwrap().status, ConditionStatus::True);
}

#[tokio::test]
async fn test_rejected_run_signal_fails_trial() {
    let harness = Harness::with_jobs(MemoryJobMonitor::new());
    let trial = harness.create_trial(&experiment(), replicas(1)).await;
    harness.jobs.reject_signal(trial.name()).await;

    let done = harness
        .controller()
        .run(trial.name(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(failure_reason(&done), "JobSignalFailed");
}

#[tokio::test]
async fn test_invalid_assignments_rejected_at_admission() {
    let harness = Harness::new();
    let exp = experiment();
    harness.create_trial(&exp, replicas(1)).await;

    // Written by someone other than the factory
    let mut rogue = Trial::new(
        "tune-rogue",
        "bench",
        ObjectReference::new("Experiment", "bench", "tune"),
    );
    rogue.spec.assignments = replicas(9);
    harness.trials.insert(&rogue).await.unwrap();

    let done = harness
        .controller()
        .run("tune-rogue", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(done.phase(), TrialPhase::Failed);
    assert_eq!(failure_reason(&done), "InvalidAssignments");
}

#[tokio::test]
async fn test_finished_trial_is_returned_untouched() {
    let harness = Harness::new();
    let trial = harness.create_trial(&experiment(), replicas(3)).await;
    let controller = harness.controller();

    let first = controller.run(trial.name(), &CancellationToken::new()).await.unwrap();
    let second = controller.run(trial.name(), &CancellationToken::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(
        harness.stored(trial.name()).await.metadata.resource_version,
        first.metadata.resource_version
    );
    assert_eq!(harness.jobs.signalled().await.len(), 1);
}

#[tokio::test]
async fn test_cancelled_trial_resumes_where_it_stopped() {
    let harness = Harness::with_jobs(MemoryJobMonitor::new());
    let trial = harness.create_trial(&experiment(), replicas(3)).await;
    let controller = std::sync::Arc::new(harness.controller());

    let cancel = CancellationToken::new();
    let run = tokio::spawn({
        let controller = controller.clone();
        let cancel = cancel.clone();
        let name = trial.name().to_string();
        async move { controller.run(&name, &cancel).await }
    });

    wait_for_phase(&harness, trial.name(), TrialPhase::Running).await;
    cancel.cancel();
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(err, ControllerError::Cancelled(_)));

    let paused = harness.stored(trial.name()).await;
    assert_eq!(paused.phase(), TrialPhase::Running);
    assert!(!paused.is_finished());
    assert!(paused.spec.values.is_empty());

    let start = Utc::now();
    harness
        .jobs
        .complete(
            trial.name(),
            JobCompletion {
                succeeded: true,
                start_time: start,
                completion_time: start + chrono::Duration::seconds(60),
                message: "job completed".to_string(),
            },
        )
        .await;

    let done = controller.run(trial.name(), &CancellationToken::new()).await.unwrap();
    assert_eq!(done.phase(), TrialPhase::Complete);
    assert_eq!(done.spec.values[0].value, "60");
}

#[tokio::test]
async fn test_missing_trial_and_experiment_are_errors() {
    let harness = Harness::new();
    let controller = harness.controller();

    let err = controller.run("nope", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ControllerError::TrialNotFound(name) if name == "nope"));

    let orphan = Trial::new(
        "orphan-1",
        "bench",
        ObjectReference::new("Experiment", "bench", "gone"),
    );
    harness.trials.insert(&orphan).await.unwrap();
    let err = controller.run("orphan-1", &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ControllerError::ExperimentNotFound(name) if name == "gone"));
}
