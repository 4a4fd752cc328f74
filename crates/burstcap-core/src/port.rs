//! Port Controller
//!
//! Lifecycle of one device/queue pair:
//! `Uninitialized → Configured → Started → Stopped → Closed`.
//! Exactly one RX and one TX queue are set up.

use crate::buffer::BufferPool;
use crate::device::{MacAddr, NetDevice, PortConf, RxBurst, TxConf, TxOffloads};
use crate::error::{DeviceError, PortSetupError};
use crate::stats::PortStats;
use std::fmt;
use std::sync::Arc;

const RX_QUEUES: u16 = 1;
const TX_QUEUES: u16 = 1;

/// Port lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    /// Opened, nothing configured yet
    Uninitialized,
    /// Queues set up
    Configured,
    /// Receiving
    Started,
    /// Stopped; may be started again
    Stopped,
    /// Released; terminal
    Closed,
}

/// Port setup step, reported when one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortStage {
    /// Opening the device
    Open,
    /// Reading device capabilities
    DeviceInfo,
    /// Setting queue counts and offloads
    Configure,
    /// Fitting ring sizes to the device
    AdjustRings,
    /// Binding the RX queue to the pool
    RxQueueSetup,
    /// Setting up the TX queue
    TxQueueSetup,
    /// Starting the device
    Start,
    /// Reading the hardware address
    MacAddress,
    /// Enabling promiscuous mode
    Promiscuous,
}

impl fmt::Display for PortStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PortStage::Open => "device open",
            PortStage::DeviceInfo => "device info",
            PortStage::Configure => "configure",
            PortStage::AdjustRings => "ring adjust",
            PortStage::RxQueueSetup => "rx queue setup",
            PortStage::TxQueueSetup => "tx queue setup",
            PortStage::Start => "start",
            PortStage::MacAddress => "mac address",
            PortStage::Promiscuous => "promiscuous enable",
        })
    }
}

/// One device bound to the engine
#[derive(Debug)]
pub struct Port<D> {
    id: u16,
    device: D,
    state: PortState,
    rx_ring: u16,
    tx_ring: u16,
    tx_offloads: TxOffloads,
    promiscuous: bool,
    mac: Option<MacAddr>,
}

impl<D: NetDevice> Port<D> {
    /// Wrap an opened device
    pub fn new(id: u16, device: D) -> Self {
        Self {
            id,
            device,
            state: PortState::Uninitialized,
            rx_ring: 0,
            tx_ring: 0,
            tx_offloads: TxOffloads::empty(),
            promiscuous: false,
            mac: None,
        }
    }

    /// Configure one RX queue bound to `pool` and one TX queue.
    ///
    /// Fast-free TX offload is enabled when the device supports it; ring
    /// sizes are adjusted to the device limits.
    pub fn configure(
        &mut self,
        pool: Arc<BufferPool>,
        rx_ring: u16,
        tx_ring: u16,
    ) -> Result<(), PortSetupError> {
        use crate::port::PortStage::*;

        if self.state != PortState::Uninitialized {
            return Err(PortSetupError::new(
                Configure,
                DeviceError::InvalidState { op: "configure", state: self.state },
            ));
        }

        let info = self
            .device
            .info()
            .map_err(|e| PortSetupError::new(DeviceInfo, e))?;

        let mut conf = PortConf::default();
        if info.tx_offload_capa.contains(TxOffloads::MBUF_FAST_FREE) {
            conf.tx_offloads |= TxOffloads::MBUF_FAST_FREE;
        }

        self.device
            .configure(RX_QUEUES, TX_QUEUES, &conf)
            .map_err(|e| PortSetupError::new(Configure, e))?;

        let (mut rx, mut tx) = (rx_ring, tx_ring);
        self.device
            .adjust_ring_sizes(&mut rx, &mut tx)
            .map_err(|e| PortSetupError::new(AdjustRings, e))?;

        let socket = self.device.socket();
        self.device
            .rx_queue_setup(0, rx, socket, pool)
            .map_err(|e| PortSetupError::new(RxQueueSetup, e))?;

        let txconf = TxConf {
            offloads: conf.tx_offloads,
            ..info.default_txconf
        };
        self.device
            .tx_queue_setup(0, tx, socket, &txconf)
            .map_err(|e| PortSetupError::new(TxQueueSetup, e))?;

        self.rx_ring = rx;
        self.tx_ring = tx;
        self.tx_offloads = conf.tx_offloads;
        self.state = PortState::Configured;

        tracing::debug!(
            port = self.id,
            driver = %info.driver_name,
            rx_ring = rx,
            tx_ring = tx,
            offloads = ?conf.tx_offloads,
            "port configured"
        );
        Ok(())
    }

    /// Start receiving, optionally in promiscuous mode
    pub fn start(&mut self, promiscuous: bool) -> Result<MacAddr, PortSetupError> {
        if !matches!(self.state, PortState::Configured | PortState::Stopped) {
            return Err(PortSetupError::new(
                PortStage::Start,
                DeviceError::InvalidState { op: "start", state: self.state },
            ));
        }

        self.device
            .start()
            .map_err(|e| PortSetupError::new(PortStage::Start, e))?;
        self.state = PortState::Started;

        let mac = self
            .device
            .mac_address()
            .map_err(|e| PortSetupError::new(PortStage::MacAddress, e))?;
        self.mac = Some(mac);
        tracing::info!("Port {} MAC: {}", self.id, mac);

        if promiscuous {
            self.device
                .set_promiscuous(true)
                .map_err(|e| PortSetupError::new(PortStage::Promiscuous, e))?;
            self.promiscuous = true;
        }

        Ok(mac)
    }

    /// Poll RX queue 0; returns 0 unless started
    #[inline]
    pub fn rx_burst(&mut self, out: &mut RxBurst, max: usize) -> usize {
        if self.state != PortState::Started {
            return 0;
        }
        self.device.rx_burst(0, out, max)
    }

    /// Device counters
    pub fn stats(&self) -> Result<PortStats, DeviceError> {
        if self.state == PortState::Closed {
            return Err(DeviceError::InvalidState { op: "read stats of", state: self.state });
        }
        self.device.stats()
    }

    /// Stop receiving
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        if self.state != PortState::Started {
            return Err(DeviceError::InvalidState { op: "stop", state: self.state });
        }
        self.device.stop()?;
        self.state = PortState::Stopped;
        Ok(())
    }

    /// Stop if needed and release the device. Idempotent.
    pub fn close(&mut self) {
        if self.state == PortState::Started {
            if let Err(e) = self.stop() {
                tracing::warn!(port = self.id, error = %e, "stop failed during close");
            }
        }
        if self.state != PortState::Closed {
            if self.promiscuous {
                if let Err(e) = self.device.set_promiscuous(false) {
                    tracing::debug!(port = self.id, error = %e, "promiscuous disable failed");
                }
                self.promiscuous = false;
            }
            self.device.close();
            self.state = PortState::Closed;
            tracing::debug!(port = self.id, "port closed");
        }
    }

    /// Port id
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Lifecycle state
    pub fn state(&self) -> PortState {
        self.state
    }

    /// Adjusted RX ring size
    pub fn rx_ring_size(&self) -> u16 {
        self.rx_ring
    }

    /// Adjusted TX ring size
    pub fn tx_ring_size(&self) -> u16 {
        self.tx_ring
    }

    /// Negotiated TX offloads
    pub fn tx_offloads(&self) -> TxOffloads {
        self.tx_offloads
    }

    /// Promiscuous mode enabled
    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous
    }

    /// Hardware address, once started
    pub fn mac(&self) -> Option<MacAddr> {
        self.mac
    }

    /// Underlying device
    pub fn device(&self) -> &D {
        &self.device
    }
}
