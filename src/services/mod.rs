pub mod metric_collector;
pub mod patch_resolver;
pub mod readiness;
pub mod retry;
pub mod setup_orchestrator;
pub mod supervisor;
pub mod template;
pub mod trial_controller;
pub mod trial_factory;

pub use metric_collector::{CollectionReport, MetricCollector, MetricFailure};
pub use patch_resolver::{GatedTarget, PatchFailure, PatchResolver};
pub use readiness::{ReadinessEvaluator, ReadinessFailure, ReadinessState};
pub use retry::{AttemptOutcome, RetryPolicy, Retryable};
pub use setup_orchestrator::{SetupFailure, SetupOrchestrator, SetupSummary, SetupWarning};
pub use supervisor::TrialSupervisor;
pub use template::{TemplateContext, TemplateEngine};
pub use trial_controller::{ControllerPorts, TrialController};
pub use trial_factory::{TrialFactory, EXPERIMENT_LABEL};
