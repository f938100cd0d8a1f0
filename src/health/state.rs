//! Healthcheck debounce state machine.
//!
//! # States
//! - Healthy: the last `rise` samples were all successes
//! - Unhealthy: the last `fall` samples were all failures (initial state)
//!
//! # State Transitions
//! ```text
//! Unhealthy → Healthy: last `rise` samples all true
//! Healthy → Unhealthy: last `fall` samples all false
//! ```
//!
//! # Design Decisions
//! - History is a ring of `max(rise, fall) + 1` samples, oldest dropped first
//! - `can_report_yet` gates consumers until `min(rise, fall)` samples exist
//! - Mixed windows keep the previous state (hysteresis)

use std::collections::VecDeque;

/// Debounced health state for one healthcheck.
#[derive(Debug, Clone)]
pub struct HealthState {
    rise: usize,
    fall: usize,
    history: VecDeque<bool>,
    healthy: bool,
    run_count: u64,
}

impl HealthState {
    /// Create a fresh state. Zero thresholds are treated as one.
    pub fn new(rise: u32, fall: u32) -> Self {
        let rise = rise.max(1) as usize;
        let fall = fall.max(1) as usize;
        Self {
            rise,
            fall,
            history: VecDeque::with_capacity(rise.max(fall) + 1),
            healthy: false,
            run_count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.rise.max(self.fall) + 1
    }

    /// Record one probe result.
    ///
    /// Returns `Some(new_status)` when the sample caused a transition.
    pub fn record(&mut self, success: bool) -> Option<bool> {
        if self.history.len() == self.capacity() {
            self.history.pop_front();
        }
        self.history.push_back(success);
        self.run_count += 1;

        let before = self.healthy;
        if self.healthy {
            if self.last_n_all(self.fall, false) {
                self.healthy = false;
            }
        } else if self.last_n_all(self.rise, true) {
            self.healthy = true;
        }

        (before != self.healthy).then_some(self.healthy)
    }

    fn last_n_all(&self, n: usize, value: bool) -> bool {
        self.history.len() >= n && self.history.iter().rev().take(n).all(|s| *s == value)
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// True once enough samples exist to evaluate rise or fall.
    pub fn can_report_yet(&self) -> bool {
        self.run_count >= self.rise.min(self.fall) as u64
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Samples in the ring, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.history.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = HealthState::new(2, 3);
        assert!(!state.is_healthy());
        assert!(!state.can_report_yet());
        assert_eq!(state.run_count(), 0);
        assert!(state.history().is_empty());
    }

    #[test]
    fn test_rise_transition() {
        let mut state = HealthState::new(2, 3);
        assert_eq!(state.record(true), None);
        assert!(!state.is_healthy());
        assert!(state.can_report_yet());
        assert_eq!(state.record(true), Some(true));
        assert!(state.is_healthy());
        assert_eq!(state.record(true), None);
    }

    #[test]
    fn test_fall_transition() {
        let mut state = HealthState::new(2, 3);
        state.record(true);
        state.record(true);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), None);
        assert!(state.is_healthy());
        assert_eq!(state.record(false), Some(false));
        assert!(!state.is_healthy());
    }

    #[test]
    fn test_mixed_window_keeps_state() {
        let mut state = HealthState::new(2, 2);
        state.record(true);
        state.record(true);
        for sample in [false, true, false, true] {
            assert_eq!(state.record(sample), None);
            assert!(state.is_healthy());
        }
    }

    #[test]
    fn test_rise_one_reports_after_one_run() {
        let mut state = HealthState::new(1, 1);
        assert_eq!(state.record(true), Some(true));
        assert!(state.is_healthy());
        assert!(state.can_report_yet());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = HealthState::new(2, 3);
        for _ in 0..10 {
            state.record(true);
        }
        state.record(false);
        assert_eq!(state.history(), vec![true, true, true, false]);
        assert_eq!(state.run_count(), 11);
    }

    #[test]
    fn test_healthy_iff_last_rise_true() {
        // Walk every 6-sample history and compare with a direct evaluation.
        for bits in 0u32..64 {
            let mut state = HealthState::new(2, 3);
            let mut expected = false;
            let mut seen: Vec<bool> = Vec::new();
            for i in 0..6 {
                let sample = bits & (1 << i) != 0;
                state.record(sample);
                seen.push(sample);
                let (n, want) = if expected { (3, false) } else { (2, true) };
                if seen.len() >= n && seen.iter().rev().take(n).all(|s| *s == want) {
                    expected = want;
                }
                assert_eq!(state.is_healthy(), expected, "history {:?}", seen);
            }
        }
    }
}
