//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::pool::{backend::Backend, LoadBalancer};

/// Round-robin selector.
/// Stores an internal counter to rotate through backends.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = backends.len();

        // Retired entries can linger in a snapshot taken mid-pass.
        (0..len)
            .map(|i| &backends[(start + i) % len])
            .find(|b| !b.is_retired())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let b1 = Arc::new(Backend::new("127.0.0.1:8080", 1));
        let b2 = Arc::new(Backend::new("127.0.0.1:8081", 1));
        let backends = vec![b1.clone(), b2.clone()];

        let s1 = lb.next_backend(&backends).unwrap();
        assert_eq!(s1.addr(), b1.addr());

        let s2 = lb.next_backend(&backends).unwrap();
        assert_eq!(s2.addr(), b2.addr());

        let s3 = lb.next_backend(&backends).unwrap();
        assert_eq!(s3.addr(), b1.addr());
    }

    #[test]
    fn skips_retired() {
        let lb = RoundRobin::new();
        let b1 = Arc::new(Backend::new("127.0.0.1:8080", 1));
        let b2 = Arc::new(Backend::new("127.0.0.1:8081", 1));
        b1.retire();
        let backends = vec![b1, b2.clone()];

        for _ in 0..3 {
            assert_eq!(lb.next_backend(&backends).unwrap().addr(), b2.addr());
        }
        assert!(lb.next_backend(&[]).is_none());
    }
}
