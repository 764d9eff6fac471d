//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::load_balancer::LoadBalancer;
use crate::routing::{Endpoint, ServiceId};

/// Round-robin selector.
/// Keeps one monotonic cursor per service.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<ServiceId, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cursors of services `keep` rejects.
    pub fn retain(&self, mut keep: impl FnMut(&ServiceId) -> bool) {
        self.cursors.retain(|service, _| keep(service));
    }

    fn advance(&self, service: &ServiceId) -> usize {
        if let Some(cursor) = self.cursors.get(service) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service.clone())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl LoadBalancer for RoundRobin {
    fn next_endpoint(&self, service: &ServiceId, candidates: &[&Endpoint]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(self.advance(service) % candidates.len())
    }
}
