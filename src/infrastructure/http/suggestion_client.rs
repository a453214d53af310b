use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::models::{Assignment, Experiment, Parameter};
use crate::domain::ports::{SuggestionClient, SuggestionError};

#[derive(Debug, Serialize)]
struct SuggestionRequest<'a> {
    parameters: &'a [Parameter],
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    assignments: Vec<Assignment>,
}

/// Suggestion client for an optimizer service speaking JSON over HTTP
pub struct HttpSuggestionClient {
    http_client: ReqwestClient,
    base_url: String,
}

impl HttpSuggestionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, experiment: &Experiment) -> Result<Vec<Assignment>, SuggestionError> {
        let url = format!("{}/experiments/{}/trials", self.base_url, experiment.name);
        debug!(url = %url, "requesting suggestion");

        let response = self
            .http_client
            .post(&url)
            .json(&SuggestionRequest {
                parameters: &experiment.parameters,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(SuggestionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let suggestion: SuggestionResponse = response.json().await?;
        if suggestion.assignments.is_empty() {
            return Err(SuggestionError::InvalidResponse(
                "response carried no assignments".to_string(),
            ));
        }
        Ok(suggestion.assignments)
    }
}

#[async_trait]
impl SuggestionClient for HttpSuggestionClient {
    async fn next_assignments(
        &self,
        experiment: &Experiment,
        cancel: &CancellationToken,
    ) -> Result<Vec<Assignment>, SuggestionError> {
        if cancel.is_cancelled() {
            return Err(SuggestionError::Cancelled);
        }
        let assignments = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SuggestionError::Cancelled),
            result = self.request(experiment) => result?,
        };
        info!(experiment = %experiment.name, count = assignments.len(), "received suggestion");
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn experiment() -> Experiment {
        Experiment::new("tune")
            .with_parameter(Parameter::new("replicas", 1, 4))
            .with_parameter(Parameter::new("cpu", 100, 2000))
    }

    #[tokio::test]
    async fn test_next_assignments_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/experiments/tune/trials")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "parameters": [{"name": "replicas"}, {"name": "cpu"}]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "assignments": [
                        {"name": "replicas", "value": 2},
                        {"name": "cpu", "value": 500}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpSuggestionClient::new(format!("{}/", server.url()), Duration::from_secs(5))
            .expect("client");
        let assignments = client
            .next_assignments(&experiment(), &CancellationToken::new())
            .await
            .expect("suggestion should succeed");

        mock.assert_async().await;
        assert_eq!(
            assignments,
            vec![Assignment::new("replicas", 2), Assignment::new("cpu", 500)]
        );
    }

    #[tokio::test]
    async fn test_error_status_is_propagated() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/experiments/tune/trials")
            .with_status(409)
            .with_body("experiment is finished")
            .create_async()
            .await;

        let client = HttpSuggestionClient::new(server.url(), Duration::from_secs(5)).expect("client");
        let err = client
            .next_assignments(&experiment(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SuggestionError::Status { status, body } => {
                assert_eq!(status, 409);
                assert_eq!(body, "experiment is finished");
            }
            other => panic!("Expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_suggestion_is_invalid() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/experiments/tune/trials")
            .with_status(200)
            .with_body(r#"{"assignments": []}"#)
            .create_async()
            .await;

        let client = HttpSuggestionClient::new(server.url(), Duration::from_secs(5)).expect("client");
        let err = client
            .next_assignments(&experiment(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SuggestionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/experiments/tune/trials")
            .expect(0)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = HttpSuggestionClient::new(server.url(), Duration::from_secs(5)).expect("client");
        let err = client.next_assignments(&experiment(), &cancel).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, SuggestionError::Cancelled));
    }
}
