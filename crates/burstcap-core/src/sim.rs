//! In-memory Device Backend
//!
//! A [`Runtime`] whose devices receive whatever frames are injected through a
//! [`SimTraffic`] handle. Used by the test suite, the benches and the CLI's
//! `sim` backend. Faults can be injected at any setup step, and a
//! [`SimProbe`] exposes what the engine did to the runtime and its devices.

use crate::buffer::{BufferPool, Locality};
use crate::device::{
    DescLimits, DeviceInfo, MacAddr, NetDevice, PortConf, Runtime, RuntimeArgs, RxBurst, TxConf,
    TxOffloads,
};
use crate::error::DeviceError;
use crate::stats::PortStats;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Status code returned by injected faults (`-EIO`)
pub const SIM_FAULT_CODE: i32 = -5;

/// Step at which an injected fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Runtime bring-up
    Init,
    /// Opening the device
    Open,
    /// Reading device info
    Info,
    /// Device configuration
    Configure,
    /// RX queue setup
    RxQueueSetup,
    /// TX queue setup
    TxQueueSetup,
    /// Device start
    Start,
    /// MAC address read
    MacAddress,
    /// Promiscuous enable
    Promiscuous,
    /// Statistics read
    Stats,
}

#[derive(Debug, Default)]
struct SimPort {
    queue: Mutex<VecDeque<Bytes>>,
    open: AtomicBool,
    started: AtomicBool,
    promiscuous: AtomicBool,
    close_calls: AtomicUsize,
    tx_offloads: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_nombuf: AtomicU64,
}

#[derive(Debug)]
struct SimShared {
    ports: Vec<SimPort>,
    runtime_active: AtomicBool,
    init_calls: AtomicUsize,
    cleanup_calls: AtomicUsize,
    last_argv: Mutex<Vec<String>>,
}

/// In-memory runtime with a fixed number of devices
#[derive(Debug)]
pub struct SimRuntime {
    shared: Arc<SimShared>,
    fault: Option<SimFault>,
    fast_free: bool,
    max_ring: u16,
}

impl SimRuntime {
    /// Runtime exposing `count` devices
    pub fn with_devices(count: u16) -> Self {
        let shared = SimShared {
            ports: (0..count).map(|_| SimPort::default()).collect(),
            runtime_active: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            cleanup_calls: AtomicUsize::new(0),
            last_argv: Mutex::new(Vec::new()),
        };
        Self {
            shared: Arc::new(shared),
            fault: None,
            fast_free: true,
            max_ring: DescLimits::default().max,
        }
    }

    /// Whether devices advertise the fast-free TX offload (default: yes)
    pub fn with_fast_free(mut self, supported: bool) -> Self {
        self.fast_free = supported;
        self
    }

    /// Largest ring the devices accept
    pub fn with_max_ring(mut self, max_ring: u16) -> Self {
        self.max_ring = max_ring;
        self
    }

    /// Fail at `fault`
    pub fn fail_at(mut self, fault: SimFault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Frame source for device `port`.
    ///
    /// # Panics
    ///
    /// If the runtime has no such device.
    pub fn traffic(&self, port: u16) -> SimTraffic {
        assert!(
            (port as usize) < self.shared.ports.len(),
            "sim runtime has no device {}",
            port
        );
        SimTraffic {
            shared: Arc::clone(&self.shared),
            port: port as usize,
        }
    }

    /// Observer for runtime and device state
    pub fn probe(&self) -> SimProbe {
        SimProbe {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check(&self, fault: SimFault, op: &'static str) -> Result<(), DeviceError> {
        check_fault(self.fault, fault, op)
    }
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::with_devices(1)
    }
}

fn check_fault(
    configured: Option<SimFault>,
    fault: SimFault,
    op: &'static str,
) -> Result<(), DeviceError> {
    if configured == Some(fault) {
        return Err(DeviceError::Driver { op, code: SIM_FAULT_CODE });
    }
    Ok(())
}

impl Runtime for SimRuntime {
    type Device = SimDevice;

    fn init(&mut self, args: &RuntimeArgs) -> Result<(), DeviceError> {
        if self.fault == Some(SimFault::Init) {
            return Err(DeviceError::Environment("injected init failure".into()));
        }
        if self.shared.runtime_active.swap(true, Ordering::AcqRel) {
            return Err(DeviceError::Environment("runtime already initialized".into()));
        }
        self.shared.init_calls.fetch_add(1, Ordering::Relaxed);
        *self.shared.last_argv.lock() = args.to_argv();
        Ok(())
    }

    fn available_ports(&self) -> u16 {
        self.shared.ports.len() as u16
    }

    fn open(&mut self, port_id: u16) -> Result<SimDevice, DeviceError> {
        if !self.shared.runtime_active.load(Ordering::Acquire) {
            return Err(DeviceError::Environment("runtime not initialized".into()));
        }
        let port = self
            .shared
            .ports
            .get(port_id as usize)
            .ok_or(DeviceError::InvalidPort(port_id))?;
        self.check(SimFault::Open, "open")?;
        if port.open.swap(true, Ordering::AcqRel) {
            return Err(DeviceError::Environment(format!("device {} already open", port_id)));
        }

        Ok(SimDevice {
            id: port_id,
            shared: Arc::clone(&self.shared),
            fault: self.fault,
            fast_free: self.fast_free,
            max_ring: self.max_ring,
            pool: None,
            configured: false,
            started: false,
        })
    }

    fn cleanup(&mut self) {
        if self.shared.runtime_active.swap(false, Ordering::AcqRel) {
            self.shared.cleanup_calls.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// One simulated device
#[derive(Debug)]
pub struct SimDevice {
    id: u16,
    shared: Arc<SimShared>,
    fault: Option<SimFault>,
    fast_free: bool,
    max_ring: u16,
    pool: Option<Arc<BufferPool>>,
    configured: bool,
    started: bool,
}

impl SimDevice {
    /// Pool bound to RX queue 0, if set up
    pub fn bound_pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    fn port(&self) -> &SimPort {
        &self.shared.ports[self.id as usize]
    }

    fn check(&self, fault: SimFault, op: &'static str) -> Result<(), DeviceError> {
        check_fault(self.fault, fault, op)
    }
}

impl NetDevice for SimDevice {
    fn info(&self) -> Result<DeviceInfo, DeviceError> {
        self.check(SimFault::Info, "dev_info_get")?;

        let mut capa = TxOffloads::IPV4_CKSUM | TxOffloads::UDP_CKSUM | TxOffloads::TCP_CKSUM;
        if self.fast_free {
            capa |= TxOffloads::MBUF_FAST_FREE;
        }
        let limits = DescLimits {
            max: self.max_ring,
            ..DescLimits::default()
        };
        Ok(DeviceInfo {
            driver_name: "net_sim".into(),
            max_rx_queues: 4,
            max_tx_queues: 4,
            rx_desc_lim: limits,
            tx_desc_lim: limits,
            tx_offload_capa: capa,
            default_txconf: TxConf {
                tx_free_thresh: 32,
                tx_rs_thresh: 32,
                offloads: TxOffloads::empty(),
            },
        })
    }

    fn socket(&self) -> Locality {
        Locality::Socket(0)
    }

    fn configure(
        &mut self,
        rx_queues: u16,
        tx_queues: u16,
        _conf: &PortConf,
    ) -> Result<(), DeviceError> {
        self.check(SimFault::Configure, "dev_configure")?;
        if rx_queues != 1 || tx_queues != 1 {
            return Err(DeviceError::Driver { op: "dev_configure", code: -22 });
        }
        self.configured = true;
        Ok(())
    }

    fn rx_queue_setup(
        &mut self,
        queue: u16,
        _ring_size: u16,
        _socket: Locality,
        pool: Arc<BufferPool>,
    ) -> Result<(), DeviceError> {
        self.check(SimFault::RxQueueSetup, "rx_queue_setup")?;
        if !self.configured || queue != 0 {
            return Err(DeviceError::Driver { op: "rx_queue_setup", code: -22 });
        }
        self.pool = Some(pool);
        Ok(())
    }

    fn tx_queue_setup(
        &mut self,
        queue: u16,
        _ring_size: u16,
        _socket: Locality,
        conf: &TxConf,
    ) -> Result<(), DeviceError> {
        self.check(SimFault::TxQueueSetup, "tx_queue_setup")?;
        if !self.configured || queue != 0 {
            return Err(DeviceError::Driver { op: "tx_queue_setup", code: -22 });
        }
        self.port().tx_offloads.store(conf.offloads.bits(), Ordering::Relaxed);
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        self.check(SimFault::Start, "dev_start")?;
        if self.pool.is_none() {
            return Err(DeviceError::Driver { op: "dev_start", code: -22 });
        }
        self.started = true;
        self.port().started.store(true, Ordering::Release);
        Ok(())
    }

    fn mac_address(&self) -> Result<MacAddr, DeviceError> {
        self.check(SimFault::MacAddress, "macaddr_get")?;
        let [hi, lo] = self.id.to_be_bytes();
        Ok(MacAddr([0x02, 0x00, 0x00, 0x00, hi, lo]))
    }

    fn set_promiscuous(&mut self, enable: bool) -> Result<(), DeviceError> {
        if enable {
            self.check(SimFault::Promiscuous, "promiscuous_enable")?;
        }
        self.port().promiscuous.store(enable, Ordering::Relaxed);
        Ok(())
    }

    fn rx_burst(&mut self, queue: u16, out: &mut RxBurst, max: usize) -> usize {
        let (Some(pool), true, 0) = (self.pool.as_ref(), self.started, queue) else {
            return 0;
        };
        let port = &self.shared.ports[self.id as usize];
        let mut pending = port.queue.lock();

        let mut received = 0;
        while received < max && !out.is_full() {
            let Some(frame) = pending.front() else { break };
            let Some(mut slot) = pool.borrow() else {
                port.rx_nombuf.fetch_add(1, Ordering::Relaxed);
                break;
            };
            let len = pool.fill(&mut slot, frame);
            pending.pop_front();
            port.rx_packets.fetch_add(1, Ordering::Relaxed);
            port.rx_bytes.fetch_add(len as u64, Ordering::Relaxed);
            out.push(slot);
            received += 1;
        }
        received
    }

    fn stats(&self) -> Result<PortStats, DeviceError> {
        self.check(SimFault::Stats, "stats_get")?;
        let port = self.port();
        Ok(PortStats {
            rx_packets: port.rx_packets.load(Ordering::Relaxed),
            rx_bytes: port.rx_bytes.load(Ordering::Relaxed),
            rx_nombuf: port.rx_nombuf.load(Ordering::Relaxed),
            ..Default::default()
        })
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        self.port().started.store(false, Ordering::Release);
        Ok(())
    }

    fn close(&mut self) {
        self.started = false;
        self.configured = false;
        self.pool = None;
        let port = self.port();
        port.started.store(false, Ordering::Release);
        port.open.store(false, Ordering::Release);
        port.close_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Injects frames into one simulated device's RX queue
#[derive(Debug, Clone)]
pub struct SimTraffic {
    shared: Arc<SimShared>,
    port: usize,
}

impl SimTraffic {
    /// Queue one frame
    pub fn inject(&self, frame: &[u8]) {
        self.shared.ports[self.port]
            .queue
            .lock()
            .push_back(Bytes::copy_from_slice(frame));
    }

    /// Queue `count` Ethernet-shaped frames of `len` bytes, each carrying a
    /// sequence number after the header
    pub fn inject_synthetic(&self, count: usize, len: usize) {
        let len = len.max(18);
        let mut queue = self.shared.ports[self.port].queue.lock();
        for seq in 0..count {
            let mut frame = vec![0u8; len];
            frame[0..6].copy_from_slice(&[0xff; 6]);
            frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0xaa, 0x01]);
            frame[12..14].copy_from_slice(&0x88b5u16.to_be_bytes());
            frame[14..18].copy_from_slice(&(seq as u32).to_be_bytes());
            queue.push_back(Bytes::from(frame));
        }
    }

    /// Frames waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.ports[self.port].queue.lock().len()
    }
}

/// Read-only view of what happened to the simulated runtime
#[derive(Debug, Clone)]
pub struct SimProbe {
    shared: Arc<SimShared>,
}

impl SimProbe {
    /// Runtime initialized and not yet cleaned up
    pub fn runtime_active(&self) -> bool {
        self.shared.runtime_active.load(Ordering::Acquire)
    }

    /// Successful `init` calls
    pub fn init_calls(&self) -> usize {
        self.shared.init_calls.load(Ordering::Relaxed)
    }

    /// `cleanup` calls that released an active runtime
    pub fn cleanup_calls(&self) -> usize {
        self.shared.cleanup_calls.load(Ordering::Relaxed)
    }

    /// Arguments of the last successful `init`
    pub fn last_argv(&self) -> Vec<String> {
        self.shared.last_argv.lock().clone()
    }

    /// Any device currently open
    pub fn any_device_bound(&self) -> bool {
        self.shared.ports.iter().any(|p| p.open.load(Ordering::Acquire))
    }

    /// Device `port` open
    pub fn device_bound(&self, port: u16) -> bool {
        self.shared
            .ports
            .get(port as usize)
            .is_some_and(|p| p.open.load(Ordering::Acquire))
    }

    /// Device `port` started
    pub fn started(&self, port: u16) -> bool {
        self.shared
            .ports
            .get(port as usize)
            .is_some_and(|p| p.started.load(Ordering::Acquire))
    }

    /// Device `port` in promiscuous mode
    pub fn promiscuous(&self, port: u16) -> bool {
        self.shared
            .ports
            .get(port as usize)
            .is_some_and(|p| p.promiscuous.load(Ordering::Relaxed))
    }

    /// Times device `port` was closed
    pub fn close_calls(&self, port: u16) -> usize {
        self.shared
            .ports
            .get(port as usize)
            .map_or(0, |p| p.close_calls.load(Ordering::Relaxed))
    }

    /// Offloads the TX queue of device `port` was set up with
    pub fn tx_offloads(&self, port: u16) -> TxOffloads {
        self.shared.ports.get(port as usize).map_or(TxOffloads::empty(), |p| {
            TxOffloads::from_bits_truncate(p.tx_offloads.load(Ordering::Relaxed))
        })
    }
}
