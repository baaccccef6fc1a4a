//! System metrics sampling (CPU, memory, disk, load)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::clock::{Clock, SystemClock};
use crate::errors::{MonitorError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub load_average: f64,
    pub timestamp: DateTime<Utc>,
}

/// Producer of system snapshots, invoked on the metrics cadence
#[async_trait]
pub trait MetricsSampler: Send + Sync {
    async fn sample_system(&self) -> Result<SystemSnapshot>;
}

/// Linux sampler reading procfs and `df`
pub struct ProcSampler {
    proc_root: PathBuf,
    disk_path: String,
    cpu_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl ProcSampler {
    pub fn new() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            disk_path: "/".to_string(),
            cpu_interval: Duration::from_secs(1),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    pub fn with_disk_path(mut self, disk_path: impl Into<String>) -> Self {
        self.disk_path = disk_path.into();
        self
    }

    pub fn with_cpu_interval(mut self, cpu_interval: Duration) -> Self {
        self.cpu_interval = cpu_interval;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn read_proc(&self, name: &str) -> Result<String> {
        let path = self.proc_root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| MonitorError::Sampler(format!("failed to read {}: {}", path.display(), e)))
    }

    async fn cpu_percent(&self) -> Result<f64> {
        let first = parse_cpu_times(&self.read_proc("stat").await?)?;
        tokio::time::sleep(self.cpu_interval).await;
        let second = parse_cpu_times(&self.read_proc("stat").await?)?;
        Ok(cpu_busy_percent(first, second))
    }

    async fn disk_percent(&self) -> Result<f64> {
        let output = Command::new("df")
            .arg("-P")
            .arg(&self.disk_path)
            .output()
            .await
            .map_err(|e| MonitorError::Sampler(format!("failed to run df: {}", e)))?;

        if !output.status.success() {
            return Err(MonitorError::Sampler(format!(
                "df exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_df(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for ProcSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSampler for ProcSampler {
    #[instrument(skip(self))]
    async fn sample_system(&self) -> Result<SystemSnapshot> {
        let cpu_percent = self.cpu_percent().await?;
        let memory_percent = parse_meminfo(&self.read_proc("meminfo").await?)?;
        let load_average = parse_loadavg(&self.read_proc("loadavg").await?)?;
        let disk_percent = self.disk_percent().await?;

        debug!("Sampled system metrics from {}", self.proc_root.display());

        Ok(SystemSnapshot {
            cpu_percent,
            memory_percent,
            disk_percent,
            load_average,
            timestamp: self.clock.now(),
        })
    }
}

/// (idle, total) jiffies from the aggregate `cpu` line
fn parse_cpu_times(stat: &str) -> Result<(u64, u64)> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| MonitorError::Sampler("no aggregate cpu line in stat".to_string()))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| MonitorError::Sampler(format!("invalid cpu line: {}", e)))?;

    if fields.len() < 4 {
        return Err(MonitorError::Sampler("truncated cpu line".to_string()));
    }

    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total = fields.iter().sum();
    Ok((idle, total))
}

fn cpu_busy_percent(first: (u64, u64), second: (u64, u64)) -> f64 {
    let idle = second.0.saturating_sub(first.0) as f64;
    let total = second.1.saturating_sub(first.1) as f64;

    if total == 0.0 {
        0.0
    } else {
        ((total - idle) / total * 100.0).clamp(0.0, 100.0)
    }
}

fn parse_meminfo(meminfo: &str) -> Result<f64> {
    let field = |name: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse().ok())
    };

    let total = field("MemTotal:")
        .ok_or_else(|| MonitorError::Sampler("MemTotal missing from meminfo".to_string()))?;
    let available = field("MemAvailable:")
        .or_else(|| {
            Some(field("MemFree:")? + field("Buffers:").unwrap_or(0.0) + field("Cached:").unwrap_or(0.0))
        })
        .ok_or_else(|| MonitorError::Sampler("MemAvailable missing from meminfo".to_string()))?;

    if total <= 0.0 {
        return Err(MonitorError::Sampler("MemTotal is zero".to_string()));
    }

    Ok((total - available) / total * 100.0)
}

fn parse_loadavg(loadavg: &str) -> Result<f64> {
    loadavg
        .split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| MonitorError::Sampler(format!("invalid loadavg: {}", loadavg.trim())))
}

/// Used share of the filesystem from POSIX `df -P` output
fn parse_df(output: &str) -> Result<f64> {
    let line = output
        .lines()
        .nth(1)
        .ok_or_else(|| MonitorError::Sampler("df printed no filesystem line".to_string()))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(MonitorError::Sampler(format!("unexpected df line: {}", line)));
    }

    let used: f64 = fields[2]
        .parse()
        .map_err(|_| MonitorError::Sampler(format!("invalid used blocks: {}", fields[2])))?;
    let available: f64 = fields[3]
        .parse()
        .map_err(|_| MonitorError::Sampler(format!("invalid available blocks: {}", fields[3])))?;

    if used + available == 0.0 {
        return Ok(0.0);
    }

    Ok(used / (used + available) * 100.0)
}

/// Bounded history of system snapshots, oldest evicted first
#[derive(Debug)]
pub struct SnapshotHistory {
    snapshots: RwLock<VecDeque<SystemSnapshot>>,
    capacity: usize,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub async fn push(&self, snapshot: SystemSnapshot) {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.len() >= self.capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot);
    }

    pub async fn latest(&self) -> Option<SystemSnapshot> {
        self.snapshots.read().await.back().cloned()
    }

    pub async fn snapshots(&self) -> Vec<SystemSnapshot> {
        self.snapshots.read().await.iter().cloned().collect()
    }
}
