//! HTTP health probes

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Target;
use crate::errors::{MonitorError, Result};

/// Outcome of one probe against one target
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    pub target: Target,
    pub healthy: bool,
    /// Present whenever the server answered, even with the wrong status
    pub latency_ms: Option<f64>,
    pub http_status: Option<u16>,
    pub body: Option<Value>,
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn healthy(target: &Target, latency_ms: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            target: target.clone(),
            healthy: true,
            latency_ms: Some(latency_ms),
            http_status: Some(target.expected_status),
            body: None,
            error: None,
            observed_at,
        }
    }

    /// Server responded with a status other than the expected one
    pub fn unexpected_status(
        target: &Target,
        status: u16,
        latency_ms: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            target: target.clone(),
            healthy: false,
            latency_ms: Some(latency_ms),
            http_status: Some(status),
            body: None,
            error: Some(format!(
                "expected status {}, got {}",
                target.expected_status, status
            )),
            observed_at,
        }
    }

    /// No response at all: connection error or timeout
    pub fn unreachable(target: &Target, error: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            target: target.clone(),
            healthy: false,
            latency_ms: None,
            http_status: None,
            body: None,
            error: Some(error.into()),
            observed_at,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn target_name(&self) -> &str {
        &self.target.name
    }
}

/// A single health check against a target. Implementations must be safe to
/// call concurrently for distinct targets and must not retry.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, target: &Target) -> ProbeResult;
}

/// Probe issuing one GET per check, bounded by the target's timeout
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    clock: Arc<dyn Clock>,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("health_monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self { client, clock })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip(self, target), fields(target = %target.name))]
    async fn check(&self, target: &Target) -> ProbeResult {
        let start = Instant::now();

        // Latency covers the full body, not just the headers
        let outcome = timeout(target.timeout, async {
            let response = self.client.get(&target.url).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        })
        .await;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let observed_at = self.clock.now();

        match outcome {
            Ok(Ok((status, body))) if status == target.expected_status => {
                info!("{} is healthy (Response time: {:.2}ms)", target.name, latency_ms);
                let result = ProbeResult::healthy(target, latency_ms, observed_at);

                match serde_json::from_slice::<Value>(&body) {
                    Ok(json) => result.with_body(json),
                    Err(_) => {
                        debug!("{} returned a non-JSON health body", target.name);
                        result
                    }
                }
            }
            Ok(Ok((status, _))) => {
                warn!("{} returned status {}", target.name, status);
                ProbeResult::unexpected_status(target, status, latency_ms, observed_at)
            }
            Ok(Err(e)) => {
                error!("Failed to check {}: {}", target.name, e);
                ProbeResult::unreachable(target, e.to_string(), observed_at)
            }
            Err(_) => {
                error!(
                    "Failed to check {}: timed out after {}ms",
                    target.name,
                    target.timeout.as_millis()
                );
                ProbeResult::unreachable(
                    target,
                    format!("timed out after {}ms", target.timeout.as_millis()),
                    observed_at,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target_for(server: &MockServer) -> Target {
        Target::new("test", format!("{}/health", server.uri()))
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
            .mount(&server)
            .await;

        let probe = HttpProbe::new().unwrap();
        let result = probe.check(&target_for(&server)).await;

        assert!(result.healthy);
        assert!(result.latency_ms.is_some());
        assert_eq!(result.http_status, Some(200));
        assert_eq!(result.body, Some(json!({"status": "healthy"})));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_non_json_body_is_still_healthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let result = HttpProbe::new().unwrap().check(&target_for(&server)).await;

        assert!(result.healthy);
        assert!(result.body.is_none());
    }

    #[tokio::test]
    async fn test_status_mismatch_keeps_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = HttpProbe::new().unwrap().check(&target_for(&server)).await;

        assert!(!result.healthy);
        assert!(result.latency_ms.is_some());
        assert_eq!(result.http_status, Some(503));
        assert!(result.body.is_none());
    }

    #[tokio::test]
    async fn test_custom_expected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let target = target_for(&server).with_expected_status(204);
        let result = HttpProbe::new().unwrap().check(&target).await;

        assert!(result.healthy);
    }

    #[tokio::test]
    async fn test_timeout_has_no_latency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let target = target_for(&server).with_timeout(Duration::from_millis(50));
        let result = HttpProbe::new().unwrap().check(&target).await;

        assert!(!result.healthy);
        assert!(result.latency_ms.is_none());
        assert!(result.http_status.is_none());
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let target = Target::new("down", "http://127.0.0.1:1/health")
            .with_timeout(Duration::from_secs(2));

        let result = HttpProbe::new().unwrap().check(&target).await;

        assert!(!result.healthy);
        assert!(result.latency_ms.is_none());
        assert!(result.error.is_some());
    }
}
