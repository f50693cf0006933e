//! Dashboard publisher

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

use smoketest_core::{NoopPublisher, PublishError, Publisher, TestResult};

/// Timeout of one publish request
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs every result tree to the dashboard, which answers 204
pub struct DashboardPublisher {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl DashboardPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout: PUBLISH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Publisher for DashboardPublisher {
    async fn publish(&self, results: &[TestResult]) -> Result<(), PublishError> {
        let body = serde_json::to_vec(results)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PublishError::Network(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(PublishError::UnexpectedStatus(status.as_u16()));
        }
        tracing::debug!(endpoint = %self.endpoint, "results published");
        Ok(())
    }
}

/// Dashboard publisher when an endpoint is configured, no-op otherwise
pub fn publisher(endpoint: Option<&str>) -> Box<dyn Publisher> {
    match endpoint {
        Some(endpoint) => Box::new(DashboardPublisher::new(endpoint)),
        None => {
            tracing::info!("no dashboard endpoint configured, results are not published");
            Box::new(NoopPublisher)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoketest_core::aggregate;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn results() -> Vec<TestResult> {
        vec![
            TestResult::passed("Me").with_key("me"),
            aggregate("mySQL", "MySQL", vec![TestResult::failed("Open connection", "refused")]),
        ]
    }

    #[tokio::test]
    async fn test_publish_posts_result_tree() {
        let server = MockServer::start().await;
        let expected = serde_json::to_value(results()).unwrap();
        Mock::given(method("POST"))
            .and(path("/data"))
            .and(header("content-type", "application/json"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = DashboardPublisher::new(format!("{}/data", server.uri()));
        publisher.publish(&results()).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_rejects_other_success_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let publisher = DashboardPublisher::new(server.uri());
        let err = publisher.publish(&results()).await.unwrap_err();
        assert!(matches!(err, PublishError::UnexpectedStatus(200)));
    }

    #[tokio::test]
    async fn test_publish_network_error() {
        let publisher = DashboardPublisher::new("http://127.0.0.1:1/data").with_timeout(Duration::from_secs(1));
        let err = publisher.publish(&results()).await.unwrap_err();
        assert!(matches!(err, PublishError::Network(_)));
    }
}
