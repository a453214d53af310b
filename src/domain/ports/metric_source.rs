use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::errors::MetricError;

/// Prometheus HTTP API query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PrometheusData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result section of a Prometheus query response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusData {
    pub result_type: String,
    pub result: serde_json::Value,
}

/// Port for fetching raw metric data from an endpoint
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Evaluate a PromQL query at an instant against `{base_url}/api/v1/query`
    async fn query_prometheus(
        &self,
        base_url: &str,
        query: &str,
        at: DateTime<Utc>,
    ) -> Result<PrometheusResponse, MetricError>;

    /// Fetch a JSON document
    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, MetricError>;
}
