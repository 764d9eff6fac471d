//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests currently being served by each endpoint
//! - Feed the least-connections strategy
//! - Decrement automatically when a request finishes (RAII guard)

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Per-endpoint in-flight counters.
#[derive(Debug, Default)]
pub struct InFlight {
    counters: DashMap<SocketAddr, Arc<AtomicUsize>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of in-flight requests for an endpoint.
    pub fn count(&self, addr: SocketAddr) -> usize {
        self.counters
            .get(&addr)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a request start. The returned guard records its end.
    pub fn track(&self, addr: SocketAddr) -> InFlightGuard {
        let counter = match self.counters.get(&addr) {
            Some(counter) => counter.clone(),
            None => self.counters.entry(addr).or_default().clone(),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { addr, counter }
    }

    /// Whether a counter exists for `addr`.
    pub fn is_tracked(&self, addr: SocketAddr) -> bool {
        self.counters.contains_key(&addr)
    }

    /// Drop counters for endpoints that are idle and no longer wanted.
    pub fn retain(&self, mut keep: impl FnMut(&SocketAddr) -> bool) {
        self.counters
            .retain(|addr, counter| keep(addr) || counter.load(Ordering::Relaxed) > 0);
    }
}

/// A RAII guard that keeps an endpoint's in-flight count raised.
#[derive(Debug)]
pub struct InFlightGuard {
    addr: SocketAddr,
    counter: Arc<AtomicUsize>,
}

impl InFlightGuard {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
