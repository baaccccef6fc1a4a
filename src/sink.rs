//! Alert sinks: where alerts go once they are recorded

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::alert::{Alert, Severity};
use crate::errors::{MonitorError, Result};

/// Notification channel for alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Emits alerts as tracing events at a level matching their severity
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        match alert.severity {
            Severity::Critical | Severity::Error => {
                error!(severity = %alert.severity, "ALERT [{}]: {}", alert.severity, alert.message)
            }
            Severity::Warning => {
                warn!(severity = %alert.severity, "ALERT [{}]: {}", alert.severity, alert.message)
            }
            Severity::Info | Severity::Remediation => {
                info!(severity = %alert.severity, "ALERT [{}]: {}", alert.severity, alert.message)
            }
        }
        Ok(())
    }
}

/// Appends each alert as one JSON line
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl AlertSink for FileSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut line = serde_json::to_string(alert)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

/// Delivers to every inner sink; one failing sink does not stop the others
pub struct CompositeSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl CompositeSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for CompositeSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let mut failures = Vec::new();

        for sink in &self.sinks {
            if let Err(e) = sink.notify(alert).await {
                failures.push(e.to_string());
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::Sink(failures.join("; ")))
        }
    }
}

/// Discards every alert
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl AlertSink for NullSink {
    async fn notify(&self, _alert: &Alert) -> Result<()> {
        Ok(())
    }
}

/// Keeps delivered alerts in memory, for embedding hosts and tests
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: RwLock<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().await.clone()
    }
}

#[async_trait]
impl AlertSink for MemorySink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.push(alert.clone());
        Ok(())
    }
}
