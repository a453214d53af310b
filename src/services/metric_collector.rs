//! Metric collection.
//!
//! Every metric of the experiment has a `Value` on the trial with its own
//! attempt counter. A collection pass tries every pending value once through
//! `RetryPolicy::run_bounded`; a metric that fails fatally does not stop the
//! others, so partial results stay on the trial for diagnostics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::{Experiment, Metric, MetricType, MetricsConfig, PortRef, Trial, Value};
use crate::domain::ports::{ClusterClient, MetricError, MetricSource, PrometheusResponse};
use crate::services::retry::{AttemptOutcome, RetryPolicy};
use crate::services::template::{TemplateContext, TemplateEngine};

/// A metric that will never produce a value for this trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFailure {
    pub metric: String,
    pub error: MetricError,
    /// Transient failures used up the counter, as opposed to a query that can never succeed
    pub exhausted: bool,
}

impl MetricFailure {
    /// Build the failure and store its reason on the value so it survives a re-read.
    fn record(value: &mut Value, error: MetricError, exhausted: bool) -> Self {
        let failure = Self {
            metric: value.name.clone(),
            error,
            exhausted,
        };
        value.failure_reason = failure.reason().to_string();
        value.failure_message = failure.message();
        failure
    }

    pub fn reason(&self) -> &'static str {
        if self.exhausted {
            "MetricRetriesExhausted"
        } else {
            "MetricQueryInvalid"
        }
    }

    pub fn message(&self) -> String {
        format!("metric {}: {}", self.metric, self.error)
    }
}

/// Result of one collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub collected: usize,
    pub failures: Vec<MetricFailure>,
    pub cancelled: bool,
}

/// Inputs shared by every query of one pass.
struct QueryScope {
    ctx: TemplateContext,
    namespace: String,
    at: DateTime<Utc>,
}

pub struct MetricCollector {
    cluster: Arc<dyn ClusterClient>,
    source: Arc<dyn MetricSource>,
    engine: TemplateEngine,
    policy: RetryPolicy,
    config: MetricsConfig,
}

impl MetricCollector {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        source: Arc<dyn MetricSource>,
        policy: RetryPolicy,
        config: MetricsConfig,
    ) -> Self {
        Self {
            cluster,
            source,
            engine: TemplateEngine::new(),
            policy,
            config,
        }
    }

    /// One pending value per experiment metric, in declaration order.
    pub fn initial_values(&self, experiment: &Experiment) -> Vec<Value> {
        experiment
            .metrics
            .iter()
            .map(|m| Value::pending(&m.name, self.config.max_attempts))
            .collect()
    }

    /// Collect every pending value on the trial.
    #[instrument(skip(self, experiment, trial, cancel), fields(trial = %trial.name()))]
    pub async fn collect(&self, experiment: &Experiment, trial: &mut Trial, cancel: &CancellationToken) -> CollectionReport {
        if trial.spec.values.is_empty() {
            trial.spec.values = self.initial_values(experiment);
        }

        let scope = QueryScope {
            ctx: TemplateContext::for_local_metric(trial),
            namespace: trial.target_namespace().to_string(),
            at: trial.status.completion_time.unwrap_or_else(Utc::now),
        };
        let mut report = CollectionReport::default();

        for value in &mut trial.spec.values {
            let Some(metric) = experiment.metric(&value.name) else {
                warn!(metric = %value.name, "value has no matching metric");
                continue;
            };

            let outcome = self
                .policy
                .run_bounded(&mut value.attempts_remaining, cancel, || self.measure(metric, &scope))
                .await;

            match outcome {
                AttemptOutcome::Succeeded((observed, error)) => {
                    value.value = format_float(observed);
                    if let Some(error) = error {
                        value.error = format_float(error);
                    }
                    info!(metric = %metric.name, value = %value.value, "metric collected");
                    report.collected += 1;
                }
                AttemptOutcome::Skipped => {
                    debug!(metric = %metric.name, "metric already settled");
                }
                AttemptOutcome::Cancelled => {
                    report.cancelled = true;
                    return report;
                }
                AttemptOutcome::Exhausted(error) => report.failures.push(MetricFailure::record(value, error, true)),
                AttemptOutcome::Rejected(error) => report.failures.push(MetricFailure::record(value, error, false)),
            }
        }

        report
    }

    /// Measure a metric and, when configured, its error band.
    async fn measure(&self, metric: &Metric, scope: &QueryScope) -> Result<(f64, Option<f64>), MetricError> {
        let value = self.evaluate(metric, &metric.query, scope).await?;
        let error = match &metric.error_query {
            Some(query) if !query.trim().is_empty() => Some(self.evaluate(metric, query, scope).await?),
            _ => None,
        };
        Ok((value, error))
    }

    async fn evaluate(&self, metric: &Metric, query: &str, scope: &QueryScope) -> Result<f64, MetricError> {
        match metric.metric_type {
            MetricType::Local => {
                let text = self
                    .engine
                    .evaluate(query, &scope.ctx)
                    .map_err(|e| MetricError::InvalidQuery(e.to_string()))?;
                parse_float(&text)
            }
            MetricType::Prometheus => {
                let query = self.render_query(query, scope)?;
                let base = self.endpoint(metric, &scope.namespace).await?;
                let response = self.source.query_prometheus(&base, &query, scope.at).await?;
                prometheus_scalar(&response)
            }
            MetricType::JsonPath => {
                let pointer = json_pointer(&self.render_query(query, scope)?)?;
                let url = self.endpoint(metric, &scope.namespace).await?;
                let document = self.source.fetch_json(&url).await?;
                json_scalar(&document, &pointer)
            }
        }
    }

    fn render_query(&self, query: &str, scope: &QueryScope) -> Result<String, MetricError> {
        self.engine
            .render(query, &scope.ctx)
            .map_err(|e| MetricError::InvalidQuery(e.to_string()))
    }

    /// `{scheme}://{service}.{namespace}:{port}{path}` of the first matching service.
    async fn endpoint(&self, metric: &Metric, namespace: &str) -> Result<String, MetricError> {
        let selector = metric.selector.clone().unwrap_or_default();
        let services = self.cluster.list("Service", namespace, &selector).await?;
        let Some(service) = services.first() else {
            return Err(MetricError::NoMatchingService(selector.to_string()));
        };

        let port = resolve_port(&service.body, metric.port.as_ref()).ok_or_else(|| MetricError::UnknownPort {
            service: service.reference.name.clone(),
            port: metric
                .port
                .as_ref()
                .map_or_else(|| "<unset>".to_string(), port_label),
        })?;

        let service_namespace = if service.reference.namespace.is_empty() {
            namespace
        } else {
            service.reference.namespace.as_str()
        };
        Ok(format!(
            "{}://{}.{}:{}{}",
            self.config.scheme, service.reference.name, service_namespace, port, metric.path
        ))
    }
}

fn port_label(port: &PortRef) -> String {
    match port {
        PortRef::Number(n) => n.to_string(),
        PortRef::Name(name) => name.clone(),
    }
}

/// Resolve a port against a service document's `spec.ports`.
fn resolve_port(body: &serde_json::Value, port: Option<&PortRef>) -> Option<u64> {
    let ports = body.pointer("/spec/ports").and_then(serde_json::Value::as_array);
    let number = |p: &serde_json::Value| p.get("port").and_then(serde_json::Value::as_u64);

    match port {
        Some(PortRef::Number(n)) => Some(u64::from(*n)),
        Some(PortRef::Name(name)) => ports?
            .iter()
            .find(|p| p.get("name").and_then(serde_json::Value::as_str) == Some(name.as_str()))
            .and_then(number),
        None => match ports?.as_slice() {
            [only] => number(only),
            _ => None,
        },
    }
}

fn format_float(value: f64) -> String {
    format!("{value}")
}

fn parse_float(text: &str) -> Result<f64, MetricError> {
    let text = text.trim();
    let value: f64 = text
        .parse()
        .map_err(|_| MetricError::Unparseable(text.to_string()))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricError::Unparseable(text.to_string()))
    }
}

/// Reduce a Prometheus response to a single value.
pub fn prometheus_scalar(response: &PrometheusResponse) -> Result<f64, MetricError> {
    if response.status != "success" {
        let message = response.error.clone().unwrap_or_else(|| response.status.clone());
        return match response.error_type.as_deref() {
            Some("bad_data") => Err(MetricError::InvalidQuery(message)),
            _ => Err(MetricError::Transport(message)),
        };
    }

    let Some(data) = &response.data else {
        return Err(MetricError::NoData("response has no data".to_string()));
    };

    let sample = match data.result_type.as_str() {
        "scalar" => data.result.get(1),
        "vector" => {
            let samples = data.result.as_array().map_or(&[][..], Vec::as_slice);
            match samples {
                [] => return Err(MetricError::NoData("empty vector".to_string())),
                [one] => one.pointer("/value/1"),
                many => return Err(MetricError::NonScalar(many.len())),
            }
        }
        "matrix" => {
            return Err(MetricError::NonScalar(
                data.result.as_array().map_or(0, Vec::len),
            ))
        }
        other => return Err(MetricError::Unparseable(format!("result type {other}"))),
    };

    let text = sample
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| MetricError::Unparseable(data.result.to_string()))?;
    match text {
        // Prometheus reports NaN until enough samples exist
        "NaN" => Err(MetricError::NoData("NaN".to_string())),
        _ => parse_float(text),
    }
}

/// Convert a jsonpath expression such as `{.a.b[0]}` into a JSON pointer.
pub fn json_pointer(expr: &str) -> Result<String, MetricError> {
    let invalid = || MetricError::InvalidQuery(expr.to_string());
    let trimmed = expr.trim();
    let body = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .unwrap_or(trimmed);
    let body = body.trim().strip_prefix('$').unwrap_or(body.trim());

    let mut pointer = String::new();
    let mut rest = body;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let key = &after[..end];
            if key.is_empty() {
                return Err(invalid());
            }
            push_segment(&mut pointer, key);
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(invalid)?;
            let inner = after[..end].trim();
            let key = inner
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
            match key {
                Some(key) => push_segment(&mut pointer, key),
                None if !inner.is_empty() && inner.chars().all(|c| c.is_ascii_digit()) => {
                    push_segment(&mut pointer, inner);
                }
                None => return Err(invalid()),
            }
            rest = &after[end + 1..];
        } else {
            return Err(invalid());
        }
    }

    if pointer.is_empty() {
        return Err(invalid());
    }
    Ok(pointer)
}

fn push_segment(pointer: &mut String, key: &str) {
    pointer.push('/');
    pointer.push_str(&key.replace('~', "~0").replace('/', "~1"));
}

/// Extract a single number from a JSON document.
pub fn json_scalar(document: &serde_json::Value, pointer: &str) -> Result<f64, MetricError> {
    match document.pointer(pointer) {
        None | Some(serde_json::Value::Null) => Err(MetricError::NoData(pointer.to_string())),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| MetricError::Unparseable(n.to_string())),
        Some(serde_json::Value::String(s)) => parse_float(s),
        Some(serde_json::Value::Array(items)) => Err(MetricError::NonScalar(items.len())),
        Some(other) => Err(MetricError::Unparseable(other.to_string())),
    }
}
