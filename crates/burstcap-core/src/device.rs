//! Device Backends
//!
//! The seam between the engine and whatever actually moves frames: a
//! [`Runtime`] brings the environment up and enumerates devices, a
//! [`NetDevice`] is one port with its queues.

use crate::buffer::{BufferPool, Locality, SlotHandle};
use crate::config::CoreList;
use crate::error::DeviceError;
use crate::stats::PortStats;
use crate::MAX_PKT_BURST;
use arrayvec::ArrayVec;
use std::fmt;
use std::sync::Arc;

/// Slots handed back by one RX poll
pub type RxBurst = ArrayVec<SlotHandle, MAX_PKT_BURST>;

bitflags::bitflags! {
    /// Transmit offload capabilities
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct TxOffloads: u64 {
        /// IPv4 header checksum
        const IPV4_CKSUM = 1 << 1;
        /// UDP checksum
        const UDP_CKSUM = 1 << 2;
        /// TCP checksum
        const TCP_CKSUM = 1 << 3;
        /// Multi-segment frames
        const MULTI_SEGS = 1 << 15;
        /// Buffers on a TX queue come from one pool and are not shared
        const MBUF_FAST_FREE = 1 << 16;
    }
}

/// Descriptor ring size limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescLimits {
    /// Smallest ring
    pub min: u16,
    /// Largest ring
    pub max: u16,
    /// Ring sizes must be a multiple of this
    pub align: u16,
}

impl DescLimits {
    /// Fit a requested ring size into the limits
    pub fn adjust(&self, requested: u16) -> u16 {
        let align = self.align.max(1);
        let clamped = requested.clamp(self.min, self.max);
        let aligned = clamped - clamped % align;
        aligned.max(self.min)
    }
}

impl Default for DescLimits {
    fn default() -> Self {
        Self {
            min: 64,
            max: 4096,
            align: 32,
        }
    }
}

/// Transmit queue parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxConf {
    /// Free descriptors below which completed buffers are reclaimed
    pub tx_free_thresh: u16,
    /// Descriptors between report-status writebacks
    pub tx_rs_thresh: u16,
    /// Offloads enabled on this queue
    pub offloads: TxOffloads,
}

/// Device-wide configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConf {
    /// Largest frame the RX path must accept
    pub max_rx_pkt_len: u32,
    /// Offloads enabled on the TX side
    pub tx_offloads: TxOffloads,
}

impl Default for PortConf {
    fn default() -> Self {
        Self {
            max_rx_pkt_len: crate::ETHER_MAX_LEN,
            tx_offloads: TxOffloads::empty(),
        }
    }
}

/// What a device reports about itself
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Driver name
    pub driver_name: String,
    /// Maximum RX queues
    pub max_rx_queues: u16,
    /// Maximum TX queues
    pub max_tx_queues: u16,
    /// RX ring limits
    pub rx_desc_lim: DescLimits,
    /// TX ring limits
    pub tx_desc_lim: DescLimits,
    /// Supported TX offloads
    pub tx_offload_capa: TxOffloads,
    /// Driver's preferred TX queue parameters
    pub default_txconf: TxConf,
}

/// Ethernet MAC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddr(pub [u8; 6]);

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Arguments for bringing the runtime environment up
#[derive(Debug, Clone)]
pub struct RuntimeArgs {
    /// Program name passed as argv[0]
    pub app_name: String,
    /// Cores the runtime may use
    pub lcores: CoreList,
    /// Extra backend-specific arguments
    pub extra: Vec<String>,
}

impl RuntimeArgs {
    /// Create arguments for a core list
    pub fn new(app_name: impl Into<String>, lcores: CoreList) -> Self {
        Self {
            app_name: app_name.into(),
            lcores,
            extra: Vec::new(),
        }
    }

    /// Render as an argv vector: `<app> -l <cores> [extra..] --`
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = vec![self.app_name.clone(), "-l".to_string(), self.lcores.to_string()];
        argv.extend(self.extra.iter().cloned());
        argv.push("--".to_string());
        argv
    }
}

/// Process-scoped networking environment
pub trait Runtime {
    /// Device type this runtime opens
    type Device: NetDevice;

    /// Bring the environment up
    fn init(&mut self, args: &RuntimeArgs) -> Result<(), DeviceError>;

    /// Number of usable devices
    fn available_ports(&self) -> u16;

    /// Open the device behind `port_id`
    fn open(&mut self, port_id: u16) -> Result<Self::Device, DeviceError>;

    /// Release the environment; called at most once per successful `init`
    fn cleanup(&mut self);
}

/// One network device and its queues
pub trait NetDevice: Send {
    /// Capabilities and limits
    fn info(&self) -> Result<DeviceInfo, DeviceError>;

    /// NUMA socket the device is attached to
    fn socket(&self) -> Locality {
        Locality::Any
    }

    /// Set queue counts and device-wide configuration
    fn configure(&mut self, rx_queues: u16, tx_queues: u16, conf: &PortConf)
        -> Result<(), DeviceError>;

    /// Fit requested ring sizes into the device limits
    fn adjust_ring_sizes(&self, rx: &mut u16, tx: &mut u16) -> Result<(), DeviceError> {
        let info = self.info()?;
        *rx = info.rx_desc_lim.adjust(*rx);
        *tx = info.tx_desc_lim.adjust(*tx);
        Ok(())
    }

    /// Set up an RX queue fed from `pool`
    fn rx_queue_setup(
        &mut self,
        queue: u16,
        ring_size: u16,
        socket: Locality,
        pool: Arc<BufferPool>,
    ) -> Result<(), DeviceError>;

    /// Set up a TX queue
    fn tx_queue_setup(
        &mut self,
        queue: u16,
        ring_size: u16,
        socket: Locality,
        conf: &TxConf,
    ) -> Result<(), DeviceError>;

    /// Start the device
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Hardware address
    fn mac_address(&self) -> Result<MacAddr, DeviceError>;

    /// Toggle promiscuous receive
    fn set_promiscuous(&mut self, enable: bool) -> Result<(), DeviceError>;

    /// Poll `queue` once for up to `max` frames, appending filled slots to `out`.
    ///
    /// Must never block. Returns the number of slots appended; fewer than
    /// `max` when the queue is drained or the pool has no free slot.
    fn rx_burst(&mut self, queue: u16, out: &mut RxBurst, max: usize) -> usize;

    /// Device counters
    fn stats(&self) -> Result<PortStats, DeviceError>;

    /// Stop the device
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release the device; it cannot be used afterwards
    fn close(&mut self);
}
