use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client as ReqwestClient, Response};
use tracing::debug;

use crate::domain::ports::{MetricError, MetricSource, PrometheusResponse};

/// Metric source talking to Prometheus-compatible and JSON endpoints over HTTP
pub struct HttpMetricSource {
    http_client: ReqwestClient,
    timeout: Duration,
}

impl HttpMetricSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http_client, timeout })
    }

    fn transport_error(&self, err: &reqwest::Error) -> MetricError {
        if err.is_timeout() {
            MetricError::Timeout(u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX))
        } else {
            MetricError::Transport(err.to_string())
        }
    }

    async fn check_status(response: Response) -> Result<Response, MetricError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error response".to_string());
        Err(MetricError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn query_prometheus(
        &self,
        base_url: &str,
        query: &str,
        at: DateTime<Utc>,
    ) -> Result<PrometheusResponse, MetricError> {
        let url = format!("{}/api/v1/query", base_url.trim_end_matches('/'));
        debug!(url = %url, query = %query, "querying prometheus");

        let response = self
            .http_client
            .get(&url)
            .query(&[("query", query.to_string()), ("time", at.timestamp().to_string())])
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        // Prometheus reports query errors with a 400/422 and a JSON body
        // carrying errorType, which the collector classifies.
        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 422 {
            return response
                .json::<PrometheusResponse>()
                .await
                .map_err(|e| MetricError::InvalidQuery(e.to_string()));
        }

        Self::check_status(response)
            .await?
            .json::<PrometheusResponse>()
            .await
            .map_err(|e| MetricError::Unparseable(e.to_string()))
    }

    async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, MetricError> {
        debug!(url = %url, "fetching metric document");

        let response = self
            .http_client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        Self::check_status(response)
            .await?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| MetricError::Unparseable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn source() -> HttpMetricSource {
        HttpMetricSource::new(Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_query_prometheus_sends_query_and_time() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/prom/api/v1/query")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "up{job=\"api\"}".into()),
                Matcher::UrlEncoded("time".into(), "1700000000".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "status": "success",
                    "data": {"resultType": "scalar", "result": [1700000000, "1"]}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let at = DateTime::from_timestamp(1_700_000_000, 0).expect("timestamp");
        let response = source()
            .query_prometheus(&format!("{}/prom", server.url()), "up{job=\"api\"}", at)
            .await
            .expect("query should succeed");

        mock.assert_async().await;
        assert_eq!(response.status, "success");
        assert_eq!(response.data.expect("data").result_type, "scalar");
    }

    #[tokio::test]
    async fn test_query_prometheus_bad_data_body_is_returned() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(
                serde_json::json!({
                    "status": "error",
                    "errorType": "bad_data",
                    "error": "parse error at char 4"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = source()
            .query_prometheus(&server.url(), "sum(", Utc::now())
            .await
            .expect("error body should parse");

        assert_eq!(response.status, "error");
        assert_eq!(response.error_type.as_deref(), Some("bad_data"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = source()
            .query_prometheus(&server.url(), "up", Utc::now())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            MetricError::Status {
                status: 503,
                body: "overloaded".to_string()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stats")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"latency": {"p99": 12.5}}"#)
            .create_async()
            .await;

        let doc = source()
            .fetch_json(&format!("{}/stats", server.url()))
            .await
            .expect("fetch should succeed");

        assert_eq!(doc["latency"]["p99"], serde_json::json!(12.5));
    }

    #[tokio::test]
    async fn test_fetch_json_not_json() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/stats")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let err = source()
            .fetch_json(&format!("{}/stats", server.url()))
            .await
            .unwrap_err();

        assert!(matches!(err, MetricError::Unparseable(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let err = source()
            .fetch_json("http://127.0.0.1:1/stats")
            .await
            .unwrap_err();

        assert!(matches!(err, MetricError::Transport(_)));
        assert!(err.is_transient());
    }
}
