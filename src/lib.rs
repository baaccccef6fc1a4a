//! Health Monitor Library
//!
//! Periodically probes HTTP targets, tracks consecutive failures, raises
//! alerts past configurable thresholds and restarts services that keep
//! failing.

pub mod alert;
pub mod clock;
pub mod config;
pub mod control;
pub mod errors;
pub mod metrics;
pub mod probe;
pub mod remediation;
pub mod sampler;
pub mod sink;
pub mod tracker;

pub use alert::{Alert, AlertManager, Severity};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, Target};
pub use control::{Collaborators, ControlLoop, TargetStatus, TickReport};
pub use errors::{MonitorError, Result};
pub use metrics::MetricsWindow;
pub use probe::{HttpProbe, Probe, ProbeResult};
pub use remediation::{RemediationActuator, RestartOutcome};
pub use sampler::{MetricsSampler, SystemSnapshot};
pub use sink::AlertSink;
pub use tracker::{FailureState, FailureTracker, TargetHealth};
