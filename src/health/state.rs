//! Endpoint health state machine.
//!
//! # State Transitions
//! ```text
//! Unknown   → Healthy:   consecutive successes >= healthy_threshold
//! Unknown   → Unhealthy: consecutive failures  >= unhealthy_threshold
//! Healthy   → Unhealthy: consecutive failures  >= unhealthy_threshold
//! Unhealthy → Healthy:   consecutive successes >= healthy_threshold
//! ```
//!
//! # Design Decisions
//! - Hysteresis prevents flapping on a single blip
//! - An opposite outcome resets the running streak
//! - Counters reset on state transition

use crate::routing::Health;

/// Probe outcome tracker for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthState {
    health: Health,
    successes: u32,
    failures: u32,
    healthy_threshold: u32,
    unhealthy_threshold: u32,
}

impl HealthState {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            health: Health::Unknown,
            successes: 0,
            failures: 0,
            healthy_threshold: healthy_threshold.max(1),
            unhealthy_threshold: unhealthy_threshold.max(1),
        }
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// Adopt a state set elsewhere (e.g. a registry readiness hint).
    pub fn sync(&mut self, observed: Health) {
        if observed != self.health {
            self.health = observed;
            self.successes = 0;
            self.failures = 0;
        }
    }

    /// Record one probe outcome. Returns the new state on a transition.
    pub fn record(&mut self, success: bool) -> Option<Health> {
        if success {
            self.failures = 0;
            if self.health == Health::Healthy {
                return None;
            }
            self.successes += 1;
            if self.successes >= self.healthy_threshold {
                return Some(self.transition(Health::Healthy));
            }
        } else {
            self.successes = 0;
            if self.health == Health::Unhealthy {
                return None;
            }
            self.failures += 1;
            if self.failures >= self.unhealthy_threshold {
                return Some(self.transition(Health::Unhealthy));
            }
        }
        None
    }

    fn transition(&mut self, to: Health) -> Health {
        self.health = to;
        self.successes = 0;
        self.failures = 0;
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_needs_n_successes() {
        let mut state = HealthState::new(2, 3);
        assert_eq!(state.record(true), None);
        assert_eq!(state.health(), Health::Unknown);
        assert_eq!(state.record(true), Some(Health::Healthy));
        assert_eq!(state.record(true), None);
    }

    #[test]
    fn healthy_needs_m_failures() {
        let mut state = HealthState::new(2, 3);
        state.sync(Health::Healthy);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), Some(Health::Unhealthy));
        assert_eq!(state.record(false), None);
    }

    #[test]
    fn single_flip_does_not_transition() {
        let mut state = HealthState::new(2, 3);
        state.sync(Health::Healthy);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(true), None);
        // Streak restarted
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), None);
        assert_eq!(state.health(), Health::Healthy);
        assert_eq!(state.record(false), Some(Health::Unhealthy));
    }

    #[test]
    fn unhealthy_recovers_after_n_successes() {
        let mut state = HealthState::new(2, 3);
        state.sync(Health::Unhealthy);
        assert_eq!(state.record(true), None);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(true), None);
        assert_eq!(state.record(true), Some(Health::Healthy));
    }

    #[test]
    fn unknown_goes_unhealthy_after_m_failures() {
        let mut state = HealthState::new(2, 3);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), None);
        assert_eq!(state.record(false), Some(Health::Unhealthy));
    }

    #[test]
    fn sync_resets_streak() {
        let mut state = HealthState::new(2, 3);
        assert_eq!(state.record(true), None);
        state.sync(Health::Unhealthy);
        assert_eq!(state.record(true), None);
        assert_eq!(state.record(true), Some(Health::Healthy));
    }
}
