//! Shutdown Coordination
//!
//! A sticky, atomically observable stop flag. SIGINT/SIGTERM trigger every
//! registered flag; capture loops check theirs at batch boundaries.

use crate::error::SignalError;
use parking_lot::{const_mutex, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Signals registered with the process handler
static REGISTRY: Mutex<Vec<Weak<AtomicBool>>> = const_mutex(Vec::new());

/// Outcome of the one-time handler installation
static HANDLER: OnceLock<Result<(), SignalError>> = OnceLock::new();

/// Cooperative stop request, shared by clones.
///
/// Starts clear; once triggered it stays set for the life of the value.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    /// New, untriggered signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Has shutdown been requested
    #[inline(always)]
    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Make SIGINT/SIGTERM trigger `signal`.
///
/// The process handler is installed on the first call; later calls only add
/// their signal. Registering the same signal twice is a no-op.
pub fn install_signal_handlers(signal: &ShutdownSignal) -> Result<(), SignalError> {
    {
        let mut registry = REGISTRY.lock();
        registry.retain(|weak| weak.strong_count() > 0);
        let present = registry
            .iter()
            .any(|weak| weak.upgrade().is_some_and(|flag| Arc::ptr_eq(&flag, &signal.0)));
        if !present {
            registry.push(Arc::downgrade(&signal.0));
        }
    }

    HANDLER
        .get_or_init(|| {
            ctrlc::set_handler(|| {
                tracing::info!("shutdown signal received, stopping capture");
                trigger_all(&REGISTRY.lock());
            })
            .map_err(SignalError::from)
        })
        .clone()
}

fn trigger_all(registry: &[Weak<AtomicBool>]) {
    for weak in registry {
        if let Some(flag) = weak.upgrade() {
            flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
fn registered(signal: &ShutdownSignal) -> bool {
    REGISTRY
        .lock()
        .iter()
        .any(|weak| weak.upgrade().is_some_and(|flag| Arc::ptr_eq(&flag, &signal.0)))
}
