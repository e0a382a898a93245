//! Worker accounts and their health state machine
//!
//! A worker is one authenticated platform account. Its health record is only
//! written by the prober; the selector reads a cached copy. The outstanding
//! request counter is reserved with compare-and-set so admission decisions
//! never exceed the worker's budget.
//!
//! Health transitions:
//!
//! | from      | outcome                      | to        |
//! |-----------|------------------------------|-----------|
//! | Unknown   | success                      | Healthy   |
//! | Unknown   | failure, count < threshold   | Unknown   |
//! | Unknown   | failure, count >= threshold  | Unhealthy |
//! | Healthy   | success                      | Healthy   |
//! | Healthy   | failure, count < threshold   | Healthy   |
//! | Healthy   | failure, count >= threshold  | Unhealthy |
//! | Unhealthy | failure                      | Unhealthy |
//! | Unhealthy | success                      | Healthy   |

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::platform::PlatformClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

impl HealthState {
    /// Next state after a probe. `consecutive_failures` is the count including
    /// this probe.
    pub fn transition(self, outcome: ProbeOutcome, consecutive_failures: u32, threshold: u32) -> Self {
        match (self, outcome) {
            (_, ProbeOutcome::Success) => HealthState::Healthy,
            (_, ProbeOutcome::Failure) if consecutive_failures >= threshold => HealthState::Unhealthy,
            (state, ProbeOutcome::Failure) => state,
        }
    }
}

/// Last known health of a worker
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_probe: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Unknown,
            consecutive_failures: 0,
            last_probe: None,
            last_error: None,
        }
    }
}

impl HealthRecord {
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_probe = Some(at);
        self.last_error = None;
        self.state = self.state.transition(ProbeOutcome::Success, 0, 1);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: String, threshold: u32) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_probe = Some(at);
        self.last_error = Some(error);
        self.state = self
            .state
            .transition(ProbeOutcome::Failure, self.consecutive_failures, threshold);
    }
}

/// One platform account in the pool
pub struct Worker {
    name: String,
    client: Arc<dyn PlatformClient>,
    budget: usize,
    health: RwLock<HealthRecord>,
    in_flight: AtomicUsize,
    last_selected: AtomicU64,
}

impl Debug for Worker {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("budget", &self.budget)
            .field("in_flight", &self.in_flight())
            .field("state", &self.state())
            .finish()
    }
}

impl Worker {
    pub fn new(name: impl Into<String>, client: Arc<dyn PlatformClient>, budget: usize) -> Self {
        Self {
            name: name.into(),
            client,
            budget,
            health: RwLock::new(HealthRecord::default()),
            in_flight: AtomicUsize::new(0),
            last_selected: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Selection stamp of the last hand-out; 0 means never selected.
    pub fn last_selected(&self) -> u64 {
        self.last_selected.load(Ordering::Acquire)
    }

    pub(crate) fn mark_selected(&self, stamp: u64) {
        self.last_selected.store(stamp, Ordering::Release);
    }

    pub fn health(&self) -> HealthRecord {
        self.health
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn state(&self) -> HealthState {
        self.health
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state
    }

    pub fn is_healthy(&self) -> bool {
        self.state() == HealthState::Healthy
    }

    /// Reserve one slot of the budget. Fails without blocking when full.
    pub(crate) fn try_acquire(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.budget).then_some(current + 1)
            })
            .is_ok()
    }

    pub(crate) fn release(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    /// Apply a successful probe; returns (previous, new) state.
    pub fn record_probe_success(&self) -> (HealthState, HealthState) {
        let mut health = self
            .health
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = health.state;
        health.record_success(Utc::now());
        (previous, health.state)
    }

    /// Apply a failed probe; returns (previous, new) state.
    pub fn record_probe_failure(&self, error: String, threshold: u32) -> (HealthState, HealthState) {
        let mut health = self
            .health
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = health.state;
        health.record_failure(Utc::now(), error, threshold);
        (previous, health.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePlatform;
    use HealthState::*;
    use ProbeOutcome::*;

    #[test]
    fn test_transition_table() {
        let threshold = 3;
        let cases = [
            (Unknown, Success, 0, Healthy),
            (Unknown, Failure, 1, Unknown),
            (Unknown, Failure, 3, Unhealthy),
            (Healthy, Success, 0, Healthy),
            (Healthy, Failure, 1, Healthy),
            (Healthy, Failure, 2, Healthy),
            (Healthy, Failure, 3, Unhealthy),
            (Unhealthy, Failure, 4, Unhealthy),
            (Unhealthy, Success, 0, Healthy),
        ];

        for (from, outcome, failures, expected) in cases {
            assert_eq!(
                from.transition(outcome, failures, threshold),
                expected,
                "{:?} --{:?}({})-->",
                from,
                outcome,
                failures
            );
        }
    }

    #[test]
    fn test_debounce_flips_only_at_threshold() {
        for threshold in 1..=5u32 {
            let mut record = HealthRecord::default();
            record.record_success(Utc::now());

            for n in 1..threshold {
                record.record_failure(Utc::now(), "timeout".into(), threshold);
                assert_eq!(record.state, Healthy, "flipped after {} of {}", n, threshold);
            }
            record.record_failure(Utc::now(), "timeout".into(), threshold);
            assert_eq!(record.state, Unhealthy);
            assert_eq!(record.consecutive_failures, threshold);
        }
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut record = HealthRecord::default();
        record.record_failure(Utc::now(), "reset".into(), 3);
        record.record_failure(Utc::now(), "reset".into(), 3);
        record.record_success(Utc::now());
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_error.is_none());

        record.record_failure(Utc::now(), "reset".into(), 3);
        assert_eq!(record.state, Healthy);
    }

    #[test]
    fn test_acquire_respects_budget() {
        let worker = Worker::new("bot-1", Arc::new(FakePlatform::default()), 2);
        assert!(worker.try_acquire());
        assert!(worker.try_acquire());
        assert!(!worker.try_acquire());
        assert_eq!(worker.in_flight(), 2);

        worker.release();
        assert!(worker.try_acquire());

        worker.release();
        worker.release();
        worker.release();
        assert_eq!(worker.in_flight(), 0);
    }
}
