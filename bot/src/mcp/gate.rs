//! Single-flight gate
//!
//! One permit shared by every client built from the same gate. Acquisition
//! never waits: if the permit is out, the caller gets [`ToolError::Busy`].
//! The permit returns when the [`GatePermit`] drops, which covers early
//! returns, panics and a cancelled caller future alike.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::{ToolError, ToolResult};

/// Process-wide exclusion for tool calls
#[derive(Debug, Clone)]
pub struct BusyGate {
    permits: Arc<Semaphore>,
}

/// Proof of holding the gate; dropping it frees the gate
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<Semaphore>,
    _permit: OwnedSemaphorePermit,
}

impl BusyGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the gate, or fail immediately if it is held
    pub fn try_acquire(&self) -> ToolResult<GatePermit> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map(|permit| GatePermit {
                gate: self.permits.clone(),
                _permit: permit,
            })
            .map_err(|_| ToolError::Busy)
    }

    /// Whether a call currently holds the gate
    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl GatePermit {
    /// Whether this permit was taken from `gate` (or a clone of it)
    pub fn belongs_to(&self, gate: &BusyGate) -> bool {
        Arc::ptr_eq(&self.gate, &gate.permits)
    }
}

impl Default for BusyGate {
    fn default() -> Self {
        Self::new()
    }
}
