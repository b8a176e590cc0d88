//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::pool::{backend::Backend, LoadBalancer};

/// Least connections selector.
/// Selects the backend with the fewest outstanding requests.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_backend(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // In case of tie, the first one is selected (stability)
        backends
            .iter()
            .filter(|b| !b.is_retired())
            .min_by_key(|b| b.outstanding())
            .cloned()
    }
}
