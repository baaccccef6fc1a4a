//! The health-check and remediation control loop

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::alert::{Alert, AlertManager, Severity};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::errors::{MonitorError, Result};
use crate::metrics::MetricsWindow;
use crate::probe::{HttpProbe, Probe, ProbeResult};
use crate::remediation::{DockerActuator, DryRunActuator, RemediationActuator, RestartOutcome};
use crate::sampler::{MetricsSampler, ProcSampler, SnapshotHistory};
use crate::sink::{AlertSink, CompositeSink, FileSink, LogSink};
use crate::tracker::{FailureState, FailureTracker, TargetHealth};

/// Window used for the average response time in status reports
const STATUS_WINDOW_MINUTES: u32 = 5;

/// External capabilities the loop drives
#[derive(Clone)]
pub struct Collaborators {
    pub probe: Arc<dyn Probe>,
    pub sink: Arc<dyn AlertSink>,
    pub actuator: Arc<dyn RemediationActuator>,
    pub sampler: Arc<dyn MetricsSampler>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Production wiring: HTTP probes, log (+ file) alerts, docker restarts, procfs sampling
    pub fn from_config(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];
        if let Some(path) = &config.alerts.log_file {
            sinks.push(Arc::new(FileSink::new(path)));
        }

        let actuator: Arc<dyn RemediationActuator> = if config.remediation.dry_run {
            Arc::new(DryRunActuator)
        } else {
            Arc::new(DockerActuator::from_config(&config.remediation))
        };

        Ok(Self {
            probe: Arc::new(HttpProbe::with_clock(Arc::clone(&clock))?),
            sink: Arc::new(CompositeSink::new(sinks)),
            actuator,
            sampler: Arc::new(ProcSampler::new().with_clock(Arc::clone(&clock))),
            clock,
        })
    }
}

/// What happened to one target during a tick
#[derive(Clone, Debug, PartialEq)]
pub struct TargetOutcome {
    pub target: String,
    pub healthy: bool,
    pub latency_ms: Option<f64>,
    pub consecutive_failures: u32,
    pub health: TargetHealth,
    pub remediation: Option<RestartOutcome>,
}

/// Summary of one tick, in configured target order
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    pub outcomes: Vec<TargetOutcome>,
    pub alerts: Vec<Alert>,
}

impl TickReport {
    pub fn all_healthy(&self) -> bool {
        self.outcomes.iter().all(|o| o.healthy)
    }

    pub fn alerts_with(&self, severity: Severity) -> usize {
        self.alerts.iter().filter(|a| a.severity == severity).count()
    }
}

/// Current view of a target for dashboards and shutdown reports
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TargetStatus {
    pub name: String,
    pub health: TargetHealth,
    pub consecutive_failures: u32,
    pub average_response_ms: Option<f64>,
    pub last_remediation_at: Option<DateTime<Utc>>,
}

/// Periodically probes every target, escalates persistent failures to
/// alerts and restarts, and samples system metrics on its own cadence.
///
/// `run_tick` takes `&mut self`, so two ticks of one loop never overlap and
/// each target's failure counter has a single writer.
pub struct ControlLoop {
    config: Config,
    probe: Arc<dyn Probe>,
    actuator: Arc<dyn RemediationActuator>,
    sampler: Arc<dyn MetricsSampler>,
    clock: Arc<dyn Clock>,
    tracker: FailureTracker,
    metrics: Arc<MetricsWindow>,
    alerts: Arc<AlertManager>,
    system_history: Arc<SnapshotHistory>,
    monitor_id: String,
    ticks: u64,
}

impl ControlLoop {
    /// Validate the configuration and assemble the loop
    pub fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate().map_err(MonitorError::Config)?;

        let metrics = Arc::new(MetricsWindow::new(
            config.metrics.window_capacity,
            Arc::clone(&collaborators.clock),
        ));
        let alerts = Arc::new(AlertManager::new(
            collaborators.sink,
            Arc::clone(&collaborators.clock),
            config.alerts.history_capacity,
        ));
        let system_history = Arc::new(SnapshotHistory::new(config.metrics.system_history_capacity));

        Ok(Self {
            config,
            probe: collaborators.probe,
            actuator: collaborators.actuator,
            sampler: collaborators.sampler,
            clock: collaborators.clock,
            tracker: FailureTracker::new(),
            metrics,
            alerts,
            system_history,
            monitor_id: Uuid::new_v4().to_string(),
            ticks: 0,
        })
    }

    /// Assemble the loop with production collaborators
    pub fn from_config(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::new(config, collaborators)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    pub fn alerts(&self) -> Arc<AlertManager> {
        Arc::clone(&self.alerts)
    }

    pub fn metrics(&self) -> Arc<MetricsWindow> {
        Arc::clone(&self.metrics)
    }

    pub fn system_history(&self) -> Arc<SnapshotHistory> {
        Arc::clone(&self.system_history)
    }

    pub fn failure_state(&self, target: &str) -> Option<&FailureState> {
        self.tracker.state(target)
    }

    /// Probe every target once and act on the results.
    ///
    /// Probes run concurrently; results are evaluated sequentially in
    /// configured order.
    #[instrument(skip(self), fields(monitor_id = %self.monitor_id))]
    pub async fn run_tick(&mut self) -> TickReport {
        self.ticks += 1;
        info!("Running health checks...");

        let probe = Arc::clone(&self.probe);
        let results = join_all(self.config.targets.iter().map(|target| probe.check(target))).await;

        let mut report = TickReport {
            tick: self.ticks,
            ..TickReport::default()
        };

        for result in results {
            let outcome = self.process_result(result, &mut report.alerts).await;
            report.outcomes.push(outcome);
        }

        debug!(
            tick = report.tick,
            alerts = report.alerts.len(),
            "Health checks complete, all healthy: {}",
            report.all_healthy()
        );

        report
    }

    async fn process_result(&mut self, result: ProbeResult, raised: &mut Vec<Alert>) -> TargetOutcome {
        let name = result.target.name.clone();
        let threshold = self.config.thresholds.consecutive_failures;

        let mut state = self.tracker.record(&result);

        if let Some(latency_ms) = result.latency_ms {
            self.metrics.record(&name, latency_ms).await;
        }

        let mut remediation = None;
        if !result.healthy && FailureTracker::should_alert(&state, threshold) {
            let alert = self
                .alerts
                .send_alert(
                    format!(
                        "Service {} has failed {} consecutive times",
                        name, state.consecutive_failures
                    ),
                    Severity::Critical,
                )
                .await;
            raised.push(alert);

            remediation = self.remediate(&state, raised).await;
            if let Some(current) = self.tracker.state(&name) {
                state = current.clone();
            }
        }

        if let Some(latency_ms) = result.latency_ms {
            if latency_ms > self.config.thresholds.response_time_ms {
                let alert = self
                    .alerts
                    .send_alert(
                        format!("Service {} response time is high: {:.2}ms", name, latency_ms),
                        Severity::Warning,
                    )
                    .await;
                raised.push(alert);
            }
        }

        TargetOutcome {
            target: name,
            healthy: result.healthy,
            latency_ms: result.latency_ms,
            consecutive_failures: state.consecutive_failures,
            health: FailureTracker::classify(&state, threshold),
            remediation,
        }
    }

    /// Restart a target that is at or past the threshold, if policy allows
    async fn remediate(&mut self, state: &FailureState, raised: &mut Vec<Alert>) -> Option<RestartOutcome> {
        let name = state.target.as_str();
        let threshold = self.config.thresholds.consecutive_failures;
        let cooldown_seconds = self.config.remediation.cooldown_seconds;

        if !self.config.remediation.enabled {
            info!("Remediation is disabled");
            return None;
        }

        if !FailureTracker::should_remediate(state, threshold, &self.config.remediation) {
            debug!("Service restart disabled, skipping remediation for {}", name);
            return None;
        }

        let now = self.clock.now();
        if let Some(last) = state.last_remediation_at {
            // Cool-downs too large for a TimeDelta never expire
            let inside_cooldown = cooldown_seconds > 0
                && ChronoDuration::try_seconds(i64::try_from(cooldown_seconds).unwrap_or(i64::MAX))
                    .is_none_or(|cooldown| now - last < cooldown);
            if inside_cooldown {
                info!(
                    "Skipping remediation for {}, last attempt {}s ago is inside the {}s cool-down",
                    name,
                    (now - last).num_seconds(),
                    cooldown_seconds
                );
                return None;
            }
        }

        warn!("Performing remediation for {}", name);
        self.tracker.mark_remediation(name, now);

        let outcome = self.actuator.restart(name).await;
        let alert = match &outcome {
            RestartOutcome::Success => {
                self.tracker.reset(name);
                self.alerts
                    .send_alert(
                        format!("Service {} restarted automatically", name),
                        Severity::Remediation,
                    )
                    .await
            }
            RestartOutcome::NotFound => {
                self.alerts
                    .send_alert(
                        format!("Remediation failed for {}: service not found", name),
                        Severity::Error,
                    )
                    .await
            }
            RestartOutcome::Failure(reason) => {
                self.alerts
                    .send_alert(
                        format!("Remediation failed for {}: {}", name, reason),
                        Severity::Error,
                    )
                    .await
            }
        };
        raised.push(alert);

        Some(outcome)
    }

    /// Take one system snapshot and keep it in the history
    pub async fn sample_system(&self) {
        sample_once(self.sampler.as_ref(), &self.system_history).await;
    }

    /// Per-target health, failure count and recent average latency
    pub async fn status(&self) -> Vec<TargetStatus> {
        let threshold = self.config.thresholds.consecutive_failures;
        let mut statuses = Vec::with_capacity(self.config.targets.len());

        for target in &self.config.targets {
            let state = self.tracker.state(&target.name);
            let consecutive_failures = state.map(|s| s.consecutive_failures).unwrap_or(0);
            let health = state
                .map(|s| FailureTracker::classify(s, threshold))
                .unwrap_or(TargetHealth::Healthy);

            statuses.push(TargetStatus {
                name: target.name.clone(),
                health,
                consecutive_failures,
                average_response_ms: self.metrics.average(&target.name, STATUS_WINDOW_MINUTES).await,
                last_remediation_at: state.and_then(|s| s.last_remediation_at),
            });
        }

        statuses
    }

    /// Run until `shutdown` flips to true (or its sender is dropped).
    ///
    /// The first tick runs immediately. A tick already in progress when the
    /// signal arrives completes before the loop returns.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health monitoring service {} for {} targets (check every {}s, metrics every {}s)",
            self.monitor_id,
            self.config.targets.len(),
            self.config.check_interval_seconds,
            self.config.metrics_interval_seconds
        );

        let sampler_task = spawn_sampler(
            Arc::clone(&self.sampler),
            Arc::clone(&self.system_history),
            self.config.metrics_interval(),
            shutdown.clone(),
        );

        let mut check_interval = interval(self.config.check_interval());
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = check_interval.tick() => {
                    self.run_tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped, stopping");
                        break;
                    }
                }
            }
        }

        if let Err(e) = sampler_task.await {
            error!("Metrics sampling task failed: {}", e);
        }

        self.log_status().await;
        info!("Health monitoring service {} stopped after {} ticks", self.monitor_id, self.ticks);
    }

    /// Log the status report
    pub async fn log_status(&self) {
        for status in self.status().await {
            match status.average_response_ms {
                Some(avg) => info!(
                    "{}: {} ({} consecutive failures, avg response {:.2}ms)",
                    status.name, status.health, status.consecutive_failures, avg
                ),
                None => info!(
                    "{}: {} ({} consecutive failures, no recent responses)",
                    status.name, status.health, status.consecutive_failures
                ),
            }
        }
    }
}

async fn sample_once(sampler: &dyn MetricsSampler, history: &SnapshotHistory) {
    match sampler.sample_system().await {
        Ok(snapshot) => {
            info!(
                "System metrics: CPU: {:.1}%, Memory: {:.1}%, Disk: {:.1}%, Load: {:.2}",
                snapshot.cpu_percent,
                snapshot.memory_percent,
                snapshot.disk_percent,
                snapshot.load_average
            );
            history.push(snapshot).await;
        }
        Err(e) => error!("Failed to collect system metrics: {}", e),
    }
}

/// Sample system metrics every `period`, first sample after one period
fn spawn_sampler(
    sampler: Arc<dyn MetricsSampler>,
    history: Arc<SnapshotHistory>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut metrics_interval = interval_at(Instant::now() + period, period);
        metrics_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = metrics_interval.tick() => {
                    sample_once(sampler.as_ref(), &history).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Metrics sampling stopped");
    })
}
