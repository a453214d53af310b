pub mod cluster;
pub mod config;
pub mod experiment;
pub mod trial;

pub use cluster::{
    ClusterObject, ConditionStatus, LabelSelector, LabelSelectorRequirement, ObjectCondition,
    ObjectReference, SelectorOperator,
};
pub use config::{
    Config, LoggingConfig, MetricsConfig, PatchConfig, ReadinessConfig, RetryConfig,
    SuggestionConfig, SupervisorConfig,
};
pub use experiment::{
    Constraint, Experiment, Metric, MetricType, OrderConstraint, Parameter, PatchReadinessGate,
    PatchTemplate, PatchType, PortRef, SumConstraint, SumConstraintParameter,
};
pub use trial::{
    Assignment, HelmValue, HelmValueSource, ObjectMeta, ParameterSelector, PatchOperation,
    ReadinessCheck, SetupTask, Trial, TrialCondition, TrialConditionType, TrialPhase,
    TrialReadinessGate, TrialSpec, TrialStatus, TrialTemplate, Value, MAX_DURATION_HINT_SECONDS,
};
