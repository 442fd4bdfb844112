//! Per-endpoint single-flight guard.
//!
//! Only one download may drive a terminal at a time. A manual download and
//! a scheduled one racing on the same endpoint would interleave
//! disable/enable calls on one session, so the second caller is turned away
//! with [`FleetError::Busy`] instead of queueing behind the first.

use crate::device::Endpoint;
use crate::error::{FleetError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Set of endpoints with an operation in flight.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    active: Arc<Mutex<HashSet<Endpoint>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `endpoint`. The claim is released when the guard drops.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Busy`] if another guard for the endpoint is alive.
    pub fn begin(&self, endpoint: &Endpoint) -> Result<FlightGuard> {
        let mut active = self
            .active
            .lock()
            .map_err(|e| FleetError::Task(format!("single-flight lock poisoned: {e}")))?;
        if !active.insert(endpoint.clone()) {
            return Err(FleetError::Busy(endpoint.clone()));
        }
        Ok(FlightGuard {
            endpoint: endpoint.clone(),
            active: Arc::clone(&self.active),
        })
    }

    /// Whether an operation is in flight for `endpoint`.
    pub fn is_active(&self, endpoint: &Endpoint) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(endpoint))
            .unwrap_or(false)
    }
}

/// Proof of an exclusive claim on an endpoint.
#[derive(Debug)]
pub struct FlightGuard {
    endpoint: Endpoint,
    active: Arc<Mutex<HashSet<Endpoint>>>,
}

impl FlightGuard {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.endpoint);
    }
}
