//! Weighted random load balancing strategy.

use crate::load_balancer::LoadBalancer;
use crate::routing::{Endpoint, ServiceId};

/// Picks an endpoint with probability proportional to its weight.
/// Zero-weight endpoints are never picked.
#[derive(Debug, Default)]
pub struct Weighted;

impl Weighted {
    pub fn new() -> Self {
        Self
    }

    fn pick(candidates: &[&Endpoint], mut ticket: u64) -> Option<usize> {
        for (i, endpoint) in candidates.iter().enumerate() {
            let weight = u64::from(endpoint.weight);
            if ticket < weight {
                return Some(i);
            }
            ticket -= weight;
        }
        None
    }
}

impl LoadBalancer for Weighted {
    fn next_endpoint(&self, _service: &ServiceId, candidates: &[&Endpoint]) -> Option<usize> {
        let total: u64 = candidates.iter().map(|e| u64::from(e.weight)).sum();
        if total == 0 {
            return None;
        }
        Self::pick(candidates, fastrand::u64(0..total))
    }
}
