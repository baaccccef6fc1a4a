//! Alerts and the bounded in-memory alert history

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::sink::AlertSink;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Remediation,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Remediation => write!(f, "REMEDIATION"),
        }
    }
}

impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "warning" | "warn" => Severity::Warning,
            "error" | "err" => Severity::Error,
            "critical" | "fatal" => Severity::Critical,
            "remediation" => Severity::Remediation,
            _ => Severity::Info, // Default fallback
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

impl Alert {
    pub fn new(message: impl Into<String>, severity: Severity, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            severity,
        }
    }
}

/// Records every alert in memory and forwards it to the configured sink.
///
/// The history append happens before delivery, so a failing sink never loses
/// an alert from the recent-alerts view. Readers always get a copy.
pub struct AlertManager {
    history: Arc<RwLock<VecDeque<Alert>>>,
    capacity: usize,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
}

impl AlertManager {
    pub fn new(sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            history: Arc::new(RwLock::new(VecDeque::new())),
            capacity: capacity.max(1),
            sink,
            clock,
        }
    }

    /// Create an alert stamped with the current time and deliver it
    pub async fn send_alert(&self, message: impl Into<String>, severity: Severity) -> Alert {
        let alert = Alert::new(message, severity, self.clock.now());
        self.push(alert.clone()).await;
        alert
    }

    /// Append an already-built alert and deliver it
    pub async fn push(&self, alert: Alert) {
        {
            let mut history = self.history.write().await;
            if history.len() >= self.capacity {
                history.pop_front();
                debug!("Alert history full, dropping oldest entry");
            }
            history.push_back(alert.clone());
        }

        if let Err(e) = self.sink.notify(&alert).await {
            error!("Failed to deliver alert [{}] {}: {}", alert.severity, alert.message, e);
        }
    }

    /// Alerts newer than `hours` ago, oldest first
    pub async fn recent_alerts(&self, hours: u32) -> Vec<Alert> {
        let cutoff = self.clock.now() - Duration::hours(i64::from(hours));
        let history = self.history.read().await;

        history
            .iter()
            .filter(|alert| alert.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Copy of the full in-memory history
    pub async fn history(&self) -> Vec<Alert> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.history.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::{MonitorError, Result};
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    struct FailingSink;

    #[async_trait]
    impl AlertSink for FailingSink {
        async fn notify(&self, _alert: &Alert) -> Result<()> {
            Err(MonitorError::Sink("transport down".to_string()))
        }
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!(Severity::from("critical"), Severity::Critical);
        assert_eq!(Severity::from("WARNING"), Severity::Warning);
        assert_eq!(Severity::from("remediation"), Severity::Remediation);
        assert_eq!(Severity::from("unknown"), Severity::Info);
    }

    #[test]
    fn test_alert_serializes_lowercase_severity() {
        let alert = Alert::new("Test alert", Severity::Warning, Utc::now());
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["message"], "Test alert");
    }

    #[tokio::test]
    async fn test_send_alert_records_and_delivers() {
        let sink = Arc::new(MemorySink::new());
        let manager = AlertManager::new(sink.clone(), Arc::new(ManualClock::default()), 10);

        manager.send_alert("Test alert", Severity::Warning).await;

        let history = manager.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].severity, Severity::Warning);
        assert_eq!(sink.alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_alert_in_history() {
        let manager = AlertManager::new(Arc::new(FailingSink), Arc::new(ManualClock::default()), 10);

        manager.send_alert("still recorded", Severity::Critical).await;

        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let manager = AlertManager::new(Arc::new(MemorySink::new()), Arc::new(ManualClock::default()), 3);

        for i in 0..5 {
            manager.send_alert(format!("alert {}", i), Severity::Info).await;
        }

        let history = manager.history().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "alert 2");
        assert_eq!(history[2].message, "alert 4");
    }

    #[tokio::test]
    async fn test_recent_alerts_window() {
        let clock = Arc::new(ManualClock::default());
        let manager = AlertManager::new(Arc::new(MemorySink::new()), clock.clone(), 10);

        manager.send_alert("two hours old", Severity::Warning).await;
        clock.advance(Duration::minutes(110));
        manager.send_alert("ten minutes old", Severity::Critical).await;
        clock.advance(Duration::minutes(10));

        let recent = manager.recent_alerts(1).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "ten minutes old");

        let all = manager.recent_alerts(24).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "two hours old");
    }
}
