//! Remediation actuators: restarting a failing service

use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::RemediationConfig;

/// Result of a restart request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartOutcome {
    Success,
    /// The runtime has no container/process for this service
    NotFound,
    Failure(String),
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartOutcome::Success => write!(f, "restarted"),
            RestartOutcome::NotFound => write!(f, "not found"),
            RestartOutcome::Failure(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Restarts a service by name. Never panics or errors: every failure mode is
/// folded into the returned outcome.
#[async_trait]
pub trait RemediationActuator: Send + Sync {
    async fn restart(&self, service: &str) -> RestartOutcome;
}

/// Restarts containers through the docker CLI
#[derive(Debug, Clone)]
pub struct DockerActuator {
    docker_bin: String,
    container_template: String,
}

impl DockerActuator {
    pub fn new(container_template: impl Into<String>) -> Self {
        Self {
            docker_bin: "docker".to_string(),
            container_template: container_template.into(),
        }
    }

    pub fn from_config(config: &RemediationConfig) -> Self {
        Self::new(config.container_template.clone())
    }

    pub fn with_binary(mut self, docker_bin: impl Into<String>) -> Self {
        self.docker_bin = docker_bin.into();
        self
    }

    pub fn container_name(&self, service: &str) -> String {
        self.container_template.replace("{service}", service)
    }
}

#[async_trait]
impl RemediationActuator for DockerActuator {
    async fn restart(&self, service: &str) -> RestartOutcome {
        let container = self.container_name(service);
        info!("Restarting container: {}", container);

        let mut cmd = Command::new(&self.docker_bin);
        cmd.arg("restart").arg(&container);
        debug!("Running: {:?}", cmd);

        let output = match cmd.output().await {
            Ok(output) => output,
            Err(e) => {
                error!("Failed to restart service {}: {}", service, e);
                return RestartOutcome::Failure(format!("failed to run {}: {}", self.docker_bin, e));
            }
        };

        if output.status.success() {
            return RestartOutcome::Success;
        }

        classify_failure(&container, &String::from_utf8_lossy(&output.stderr))
    }
}

fn classify_failure(container: &str, stderr: &str) -> RestartOutcome {
    let stderr = stderr.trim();

    if stderr.contains("No such container") || stderr.contains("no such container") {
        error!("Container not found: {}", container);
        RestartOutcome::NotFound
    } else {
        error!("Failed to restart container {}: {}", container, stderr);
        RestartOutcome::Failure(if stderr.is_empty() {
            "docker restart exited with an error".to_string()
        } else {
            stderr.to_string()
        })
    }
}

/// Logs restart requests and reports success without touching any runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunActuator;

#[async_trait]
impl RemediationActuator for DryRunActuator {
    async fn restart(&self, service: &str) -> RestartOutcome {
        warn!("Dry run: would restart service {}", service);
        RestartOutcome::Success
    }
}
