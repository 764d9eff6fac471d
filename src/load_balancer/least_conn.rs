//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::in_flight::InFlight;
use crate::load_balancer::LoadBalancer;
use crate::routing::{Endpoint, ServiceId};

/// Least connections selector.
/// Selects the endpoint with the fewest in-flight requests.
#[derive(Debug)]
pub struct LeastConnections {
    in_flight: Arc<InFlight>,
}

impl LeastConnections {
    pub fn new(in_flight: Arc<InFlight>) -> Self {
        Self { in_flight }
    }
}

impl LoadBalancer for LeastConnections {
    fn next_endpoint(&self, _service: &ServiceId, candidates: &[&Endpoint]) -> Option<usize> {
        // In case of tie, the first one is selected (stability)
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| self.in_flight.count(e.address))
            .map(|(i, _)| i)
    }
}
