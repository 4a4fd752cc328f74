//! Error types for the capture engine
//!
//! Every error that can cross the engine boundary maps to a stable negative
//! code via `code()`, so callers that only speak integers can tell the
//! failing stage apart.

use crate::port::{PortStage, PortState};
use std::sync::Arc;
use thiserror::Error;

/// Buffer pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Memory for the pool could not be reserved
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Slot was already free when released
    #[error("slot {0} released twice")]
    DoubleRelease(u32),

    /// Slot handle came from a different pool
    #[error("slot {slot} does not belong to pool {pool}")]
    ForeignSlot {
        /// Slot index carried by the handle
        slot: u32,
        /// Pool the release was attempted on
        pool: u64,
    },
}

/// Errors reported by a device backend
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Runtime environment could not be brought up
    #[error("environment error: {0}")]
    Environment(String),

    /// Port id does not name an available device
    #[error("invalid port {0}")]
    InvalidPort(u16),

    /// A driver call returned a failure code
    #[error("{op} failed with code {code}")]
    Driver {
        /// Operation that failed
        op: &'static str,
        /// Driver status code (negative errno style)
        code: i32,
    },

    /// Operation not valid in the port's current state
    #[error("cannot {op} a port in state {state:?}")]
    InvalidState {
        /// Attempted operation
        op: &'static str,
        /// State the port was in
        state: PortState,
    },

    /// OS-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A port setup step failed
#[derive(Error, Debug)]
#[error("{stage}: {source}")]
pub struct PortSetupError {
    /// Step that failed
    pub stage: PortStage,
    /// Underlying device error
    #[source]
    pub source: DeviceError,
}

impl PortSetupError {
    pub(crate) fn new(stage: PortStage, source: DeviceError) -> Self {
        Self { stage, source }
    }
}

/// SIGINT/SIGTERM handler installation errors
#[derive(Error, Debug, Clone)]
pub enum SignalError {
    /// Another handler already owns SIGINT/SIGTERM in this process
    #[error("another handler is already installed")]
    AlreadyInstalled,

    /// The handler could not be installed
    #[error("{0}")]
    Install(Arc<ctrlc::Error>),
}

impl From<ctrlc::Error> for SignalError {
    fn from(err: ctrlc::Error) -> Self {
        match err {
            ctrlc::Error::MultipleHandlers => SignalError::AlreadyInstalled,
            other => SignalError::Install(Arc::new(other)),
        }
    }
}

/// Engine initialization errors, one per stage
#[derive(Error, Debug)]
pub enum InitError {
    /// Runtime environment bring-up failed
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The runtime reports no devices
    #[error("no network devices available")]
    NoDeviceAvailable,

    /// Requested port id is beyond the available devices
    #[error("port {port} not available (only {available} ports)")]
    PortOutOfRange {
        /// Requested port
        port: u16,
        /// Number of devices the runtime reports
        available: u16,
    },

    /// The buffer pool could not be created
    #[error("cannot create buffer pool: {0}")]
    PoolCreation(#[source] PoolError),

    /// Device configuration, queue setup or start failed
    #[error("cannot init port: {0}")]
    PortConfiguration(#[from] PortSetupError),

    /// Signal handlers could not be installed
    #[error("cannot install signal handlers: {0}")]
    SignalHandlers(#[from] SignalError),
}

impl InitError {
    /// Stable negative code identifying the failing stage
    pub fn code(&self) -> i32 {
        match self {
            InitError::Initialization(_) => -1,
            InitError::NoDeviceAvailable => -2,
            InitError::PortOutOfRange { .. } => -3,
            InitError::PoolCreation(_) => -4,
            InitError::PortConfiguration(_) => -5,
            InitError::SignalHandlers(_) => -6,
        }
    }
}

/// Capture-call errors
#[derive(Error, Debug)]
pub enum CaptureError {
    /// `max_packets` was zero or negative
    #[error("invalid argument: max_packets must be positive, got {0}")]
    InvalidArgument(i32),

    /// The engine has been cleaned up
    #[error("port is closed")]
    PortClosed,
}

impl CaptureError {
    /// Stable negative code
    pub fn code(&self) -> i32 {
        match self {
            CaptureError::InvalidArgument(_) => -1,
            CaptureError::PortClosed => -2,
        }
    }
}

/// Statistics query errors
#[derive(Error, Debug)]
pub enum StatsError {
    /// Query named a port other than the active one
    #[error("port {requested} is not the active port {active}")]
    PortMismatch {
        /// Port asked for
        requested: u16,
        /// Port this engine owns
        active: u16,
    },

    /// The engine has been cleaned up
    #[error("port is closed")]
    PortClosed,

    /// The device failed to report its counters
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl StatsError {
    /// Stable negative code
    pub fn code(&self) -> i32 {
        match self {
            StatsError::PortMismatch { .. } => -1,
            StatsError::PortClosed => -2,
            StatsError::Device(_) => -3,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`crate::EngineConfig`]
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Core list string is malformed
    #[error("invalid core list {input:?}: {reason}")]
    InvalidCoreList {
        /// Offending input
        input: String,
        /// What is wrong with it
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_codes_are_distinct() {
        let errors = [
            InitError::Initialization("eal".into()),
            InitError::NoDeviceAvailable,
            InitError::PortOutOfRange { port: 5, available: 2 },
            InitError::PoolCreation(PoolError::ResourceExhausted("no memory".into())),
            InitError::PortConfiguration(PortSetupError::new(
                PortStage::Start,
                DeviceError::Driver { op: "start", code: -5 },
            )),
            InitError::SignalHandlers(SignalError::AlreadyInstalled),
        ];

        let codes: Vec<i32> = errors.iter().map(InitError::code).collect();
        assert_eq!(codes, vec![-1, -2, -3, -4, -5, -6]);
    }

    #[test]
    fn test_port_setup_error_names_stage() {
        let err = InitError::from(PortSetupError::new(
            PortStage::RxQueueSetup,
            DeviceError::Driver { op: "rx_queue_setup", code: -12 },
        ));
        let msg = err.to_string();
        assert!(msg.contains("rx queue setup"), "{msg}");
        assert!(msg.contains("-12"), "{msg}");
    }

    #[test]
    fn test_capture_invalid_argument_code() {
        assert_eq!(CaptureError::InvalidArgument(0).code(), -1);
        assert_eq!(StatsError::PortMismatch { requested: 1, active: 0 }.code(), -1);
    }

    #[test]
    fn test_signal_error_from_ctrlc() {
        let err = SignalError::from(ctrlc::Error::MultipleHandlers);
        assert!(matches!(err, SignalError::AlreadyInstalled));

        let err = InitError::from(SignalError::from(ctrlc::Error::NoSuchSignal(
            ctrlc::SignalType::Ctrlc,
        )));
        assert_eq!(err.code(), -6);
        assert!(err.to_string().starts_with("cannot install signal handlers"), "{err}");
    }
}
