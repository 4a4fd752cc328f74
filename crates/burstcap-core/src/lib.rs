//! burstcap Capture Engine
//!
//! Polling packet capture over a single device/queue pair, built for minimal
//! copying and minimal per-packet overhead.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CaptureEngine                         │
//! │                                                              │
//! │  ┌──────────────┐   binds    ┌──────────────┐                │
//! │  │ Buffer Pool  │──────────▶│ Port (RX q0) │                │
//! │  │ (one region) │            └──────┬───────┘                │
//! │  └──────▲───────┘                   │ rx_burst (≤32)         │
//! │         │ release on drop           ▼                        │
//! │         │                   ┌──────────────┐                 │
//! │         └───────────────────│    Batch     │──▶ caller       │
//! │                             │ (descriptors)│                 │
//! │                             └──────────────┘                 │
//! │                                                              │
//! │  ShutdownSignal ◀── SIGINT / SIGTERM                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! 1. **No allocation on the hot path**: pool memory is reserved up front and
//!    batches live in fixed inline arrays.
//! 2. **Never blocks**: an empty queue is an empty batch, not an error.
//! 3. **Borrow-checked descriptors**: a [`Batch`] borrows the engine, so its
//!    slots cannot be overwritten by the next capture while it is alive.
//! 4. **Explicit instances**: every engine owns its runtime, port, pool and
//!    shutdown flag; several may coexist in one process.

#![warn(missing_docs)]

pub mod buffer;
pub mod capture;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod port;
pub mod shutdown;
pub mod sim;
pub mod stats;

#[cfg(all(target_os = "linux", feature = "af_packet"))]
pub mod af_packet;

pub use buffer::{BufferPool, Locality, SlotHandle};
pub use capture::{Batch, OwnedPacket, Packet, PinnedPacket};
pub use config::{CoreList, EngineConfig, PoolConfig};
pub use device::{NetDevice, Runtime, RuntimeArgs};
pub use engine::{CaptureEngine, IdlePolicy, RunSummary, StopReason};
pub use error::{
    CaptureError, ConfigError, DeviceError, InitError, PoolError, PortSetupError, SignalError,
    StatsError,
};
pub use port::{Port, PortStage, PortState};
pub use shutdown::ShutdownSignal;
pub use stats::{CaptureCounters, CaptureSnapshot, PortStats};

/// Maximum packets returned by one capture call
pub const MAX_PKT_BURST: usize = 32;

/// Default number of slots in the buffer pool
pub const DEFAULT_POOL_SLOTS: u32 = 8192;

/// Default per-core slot cache hint
pub const DEFAULT_POOL_CACHE: u32 = 250;

/// Default data room per slot (bytes)
pub const DEFAULT_SLOT_CAPACITY: u32 = 2048;

/// Requested RX descriptor ring size
pub const DEFAULT_RX_RING: u16 = 1024;

/// Requested TX descriptor ring size
pub const DEFAULT_TX_RING: u16 = 1024;

/// Largest standard Ethernet frame including FCS
pub const ETHER_MAX_LEN: u32 = 1518;

/// Initialize an engine the way the external boundary does.
///
/// Equivalent to building an [`EngineConfig`] from the three arguments and
/// calling [`CaptureEngine::initialize`] with a fresh [`ShutdownSignal`].
pub fn initialize<R: Runtime>(
    runtime: R,
    port_id: u16,
    cores: &str,
    batch_size: i32,
) -> Result<CaptureEngine<R>, InitError> {
    let config = EngineConfig::new(port_id, cores, batch_size);
    CaptureEngine::initialize(runtime, &config, ShutdownSignal::new())
}
