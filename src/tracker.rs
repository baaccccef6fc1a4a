//! Per-target consecutive failure tracking

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::RemediationConfig;
use crate::probe::ProbeResult;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FailureState {
    pub target: String,
    pub consecutive_failures: u32,
    pub last_remediation_at: Option<DateTime<Utc>>,
}

impl FailureState {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            consecutive_failures: 0,
            last_remediation_at: None,
        }
    }
}

/// Health classification derived from a failure count
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TargetHealth {
    /// No failures since the last success
    Healthy,
    /// Failing, but below the threshold
    Degraded,
    /// At or past the threshold
    Failing,
}

impl std::fmt::Display for TargetHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetHealth::Healthy => write!(f, "healthy"),
            TargetHealth::Degraded => write!(f, "degraded"),
            TargetHealth::Failing => write!(f, "failing"),
        }
    }
}

/// Consecutive-failure counters keyed by target name. Pure state, no I/O.
#[derive(Debug, Default)]
pub struct FailureTracker {
    states: HashMap<String, FailureState>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one probe result into its target's counter
    pub fn record(&mut self, result: &ProbeResult) -> FailureState {
        let name = result.target_name();
        let state = self
            .states
            .entry(name.to_string())
            .or_insert_with(|| FailureState::new(name));

        if result.healthy {
            if state.consecutive_failures > 0 {
                debug!(
                    failures = state.consecutive_failures,
                    "{} recovered, resetting failure count", name
                );
            }
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }

        state.clone()
    }

    /// Clear the counter after a successful remediation
    pub fn reset(&mut self, target: &str) {
        if let Some(state) = self.states.get_mut(target) {
            state.consecutive_failures = 0;
        }
    }

    pub fn mark_remediation(&mut self, target: &str, at: DateTime<Utc>) {
        self.states
            .entry(target.to_string())
            .or_insert_with(|| FailureState::new(target))
            .last_remediation_at = Some(at);
    }

    pub fn state(&self, target: &str) -> Option<&FailureState> {
        self.states.get(target)
    }

    pub fn consecutive_failures(&self, target: &str) -> u32 {
        self.states
            .get(target)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Copy of every known state
    pub fn snapshot(&self) -> Vec<FailureState> {
        self.states.values().cloned().collect()
    }

    /// True on every evaluation where the count is at or past the threshold,
    /// not only on the first crossing.
    pub fn should_alert(state: &FailureState, threshold: u32) -> bool {
        state.consecutive_failures >= threshold
    }

    pub fn should_remediate(state: &FailureState, threshold: u32, policy: &RemediationConfig) -> bool {
        policy.enabled && policy.restart_service && Self::should_alert(state, threshold)
    }

    pub fn classify(state: &FailureState, threshold: u32) -> TargetHealth {
        match state.consecutive_failures {
            0 => TargetHealth::Healthy,
            n if n < threshold => TargetHealth::Degraded,
            _ => TargetHealth::Failing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Target;

    fn result(name: &str, healthy: bool) -> ProbeResult {
        let target = Target::new(name, "http://example/health");
        if healthy {
            ProbeResult::healthy(&target, 12.0, Utc::now())
        } else {
            ProbeResult::unreachable(&target, "connection refused", Utc::now())
        }
    }

    #[test]
    fn test_counts_trailing_failures() {
        let sequences: [&[bool]; 5] = [
            &[],
            &[false, false, false],
            &[false, false, true],
            &[true, false, true, false, false],
            &[false, true, false, false, false, false],
        ];

        for outcomes in sequences {
            let mut tracker = FailureTracker::new();
            for &healthy in outcomes {
                tracker.record(&result("api", healthy));
            }

            let expected = outcomes.iter().rev().take_while(|&&h| !h).count() as u32;
            assert_eq!(tracker.consecutive_failures("api"), expected, "{:?}", outcomes);
        }
    }

    #[test]
    fn test_targets_are_independent() {
        let mut tracker = FailureTracker::new();
        tracker.record(&result("a", false));
        tracker.record(&result("a", false));
        tracker.record(&result("b", false));
        tracker.record(&result("b", true));

        assert_eq!(tracker.consecutive_failures("a"), 2);
        assert_eq!(tracker.consecutive_failures("b"), 0);
        assert_eq!(tracker.consecutive_failures("never-seen"), 0);
        assert_eq!(tracker.snapshot().len(), 2);
    }

    #[test]
    fn test_threshold_checks_use_greater_or_equal() {
        let mut tracker = FailureTracker::new();
        let mut state = tracker.record(&result("api", false));
        assert!(!FailureTracker::should_alert(&state, 2));

        state = tracker.record(&result("api", false));
        assert!(FailureTracker::should_alert(&state, 2));

        state = tracker.record(&result("api", false));
        assert!(FailureTracker::should_alert(&state, 2));
        assert_eq!(FailureTracker::classify(&state, 2), TargetHealth::Failing);
    }

    #[test]
    fn test_should_remediate_requires_both_flags() {
        let state = FailureState {
            target: "api".to_string(),
            consecutive_failures: 3,
            last_remediation_at: None,
        };

        let mut policy = RemediationConfig {
            enabled: true,
            restart_service: true,
            ..RemediationConfig::default()
        };
        assert!(FailureTracker::should_remediate(&state, 3, &policy));
        assert!(!FailureTracker::should_remediate(&state, 4, &policy));

        policy.restart_service = false;
        assert!(!FailureTracker::should_remediate(&state, 3, &policy));

        policy.restart_service = true;
        policy.enabled = false;
        assert!(!FailureTracker::should_remediate(&state, 3, &policy));
    }

    #[test]
    fn test_reset_and_remediation_marker() {
        let mut tracker = FailureTracker::new();
        tracker.record(&result("api", false));
        tracker.record(&result("api", false));

        let at = Utc::now();
        tracker.mark_remediation("api", at);
        tracker.reset("api");

        let state = tracker.state("api").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_remediation_at, Some(at));
    }

    #[test]
    fn test_classify() {
        let mut state = FailureState::new("api");
        assert_eq!(FailureTracker::classify(&state, 3), TargetHealth::Healthy);

        state.consecutive_failures = 2;
        assert_eq!(FailureTracker::classify(&state, 3), TargetHealth::Degraded);

        state.consecutive_failures = 3;
        assert_eq!(FailureTracker::classify(&state, 3), TargetHealth::Failing);
    }
}
