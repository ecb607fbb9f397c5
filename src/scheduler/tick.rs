//! Tick bookkeeping for the scheduling loop
//!
//! Each tick:
//! - Reaps exited jobs and records their outcome
//! - Asks the store to re-evaluate held jobs
//! - Admits and launches queued jobs while they fit

use std::time::Duration;

use crate::config::SchedulerConfig;

/// Configuration for the scheduling loop
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Longest the loop sleeps between ticks without being woken
    pub idle_timeout: Duration,
    /// Mark jobs that cannot be launched as Failed instead of leaving them Queued
    pub fail_on_launch_error: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10),
            fail_on_launch_error: false,
        }
    }
}

impl TickConfig {
    /// Create a new tick config
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..Default::default()
        }
    }

    /// Fail unlaunchable jobs instead of retrying them
    pub fn with_fail_on_launch_error(mut self, fail: bool) -> Self {
        self.fail_on_launch_error = fail;
        self
    }
}

impl From<&SchedulerConfig> for TickConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            fail_on_launch_error: config.fail_on_launch_error,
        }
    }
}

/// What happened during a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Jobs launched
    pub started: usize,
    /// Jobs that exited with code 0
    pub succeeded: usize,
    /// Jobs that exited nonzero
    pub failed: usize,
    /// Jobs aborted because something they depend on failed
    pub aborted: usize,
    /// Held jobs moved back to Queued
    pub released: usize,
    /// Jobs that could not be launched
    pub launch_errors: usize,
}

impl TickSummary {
    /// Number of jobs reaped this tick
    pub fn reaped(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Tick state tracks totals across ticks
#[derive(Debug, Default)]
pub struct TickState {
    /// Number of ticks since start
    pub tick_count: u64,
    /// Number of jobs started this session
    pub total_started: u64,
    /// Number of jobs succeeded this session
    pub total_succeeded: u64,
    /// Number of jobs failed this session
    pub total_failed: u64,
    /// Number of launch errors this session
    pub total_launch_errors: u64,
}

impl TickState {
    /// Create a new tick state
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished tick into the totals
    pub fn record(&mut self, summary: &TickSummary) {
        self.tick_count += 1;
        self.total_started += summary.started as u64;
        self.total_succeeded += summary.succeeded as u64;
        self.total_failed += summary.failed as u64;
        self.total_launch_errors += summary.launch_errors as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_config_default() {
        let config = TickConfig::default();
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert!(!config.fail_on_launch_error);
    }

    #[test]
    fn test_tick_config_builder() {
        let config = TickConfig::new(Duration::from_millis(200)).with_fail_on_launch_error(true);
        assert_eq!(config.idle_timeout, Duration::from_millis(200));
        assert!(config.fail_on_launch_error);
    }

    #[test]
    fn test_tick_config_from_scheduler_config() {
        let sched = SchedulerConfig {
            idle_timeout_secs: 3,
            fail_on_launch_error: true,
        };
        let config = TickConfig::from(&sched);
        assert_eq!(config.idle_timeout, Duration::from_secs(3));
        assert!(config.fail_on_launch_error);
    }

    #[test]
    fn test_tick_summary_reaped() {
        let summary = TickSummary {
            succeeded: 2,
            failed: 1,
            ..Default::default()
        };
        assert_eq!(summary.reaped(), 3);
    }

    #[test]
    fn test_tick_state_record() {
        let mut state = TickState::new();
        state.record(&TickSummary {
            started: 3,
            succeeded: 1,
            ..Default::default()
        });
        state.record(&TickSummary {
            failed: 2,
            launch_errors: 1,
            ..Default::default()
        });
        assert_eq!(state.tick_count, 2);
        assert_eq!(state.total_started, 3);
        assert_eq!(state.total_succeeded, 1);
        assert_eq!(state.total_failed, 2);
        assert_eq!(state.total_launch_errors, 1);
    }
}
