//! AF_PACKET Device Backend (Linux)
//!
//! Each port is a kernel network interface read through a raw `AF_PACKET`
//! socket. Frames are received with non-blocking `recv` straight into pool
//! slots, so the only copy is the kernel's.
//!
//! The socket is opened unbound and only bound to `ETH_P_ALL` when the port
//! starts; stopping rebinds it to protocol 0, which stops delivery.

use crate::buffer::{BufferPool, Locality, SlotHandle};
use crate::device::{
    DescLimits, DeviceInfo, MacAddr, NetDevice, PortConf, Runtime, RuntimeArgs, RxBurst, TxConf,
    TxOffloads,
};
use crate::error::DeviceError;
use crate::stats::PortStats;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;

const IFNAMSIZ: usize = libc::IFNAMSIZ;

/// Runtime over a fixed list of kernel interfaces; port `n` is the `n`th name
#[derive(Debug)]
pub struct AfPacketRuntime {
    interfaces: Vec<String>,
    active: bool,
    pin_main_core: bool,
}

impl AfPacketRuntime {
    /// Runtime exposing `interfaces` as ports 0, 1, ...
    pub fn new(interfaces: Vec<String>) -> Self {
        Self {
            interfaces,
            active: false,
            pin_main_core: true,
        }
    }

    /// Whether `init` pins the calling thread to the first listed core
    pub fn pin_main_core(mut self, pin: bool) -> Self {
        self.pin_main_core = pin;
        self
    }

    /// Interface names in port order
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }
}

impl Runtime for AfPacketRuntime {
    type Device = AfPacketDevice;

    fn init(&mut self, args: &RuntimeArgs) -> Result<(), DeviceError> {
        if self.active {
            return Err(DeviceError::Environment("runtime already initialized".into()));
        }
        for name in &self.interfaces {
            interface_name(name)?;
        }
        if self.pin_main_core {
            let core = args.lcores.main_core();
            pin_to_core(core).map_err(|e| {
                DeviceError::Environment(format!("cannot pin to core {}: {}", core, e))
            })?;
            tracing::debug!(core, "polling thread pinned");
        }
        self.active = true;
        Ok(())
    }

    fn available_ports(&self) -> u16 {
        self.interfaces.len().min(u16::MAX as usize) as u16
    }

    fn open(&mut self, port_id: u16) -> Result<AfPacketDevice, DeviceError> {
        if !self.active {
            return Err(DeviceError::Environment("runtime not initialized".into()));
        }
        let name = self
            .interfaces
            .get(port_id as usize)
            .ok_or(DeviceError::InvalidPort(port_id))?;
        AfPacketDevice::open(name)
    }

    fn cleanup(&mut self) {
        self.active = false;
    }
}

/// Pin the calling thread to one core
pub fn pin_to_core(core: usize) -> io::Result<()> {
    // SAFETY: cpu_set_t is plain data; CPU_SET bounds-checks the index.
    unsafe {
        let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut cpuset);
        libc::CPU_SET(core, &mut cpuset);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &cpuset) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// One interface behind a raw packet socket
#[derive(Debug)]
pub struct AfPacketDevice {
    name: String,
    ifindex: i32,
    fd: Option<OwnedFd>,
    pool: Option<Arc<BufferPool>>,
    spare: Option<SlotHandle>,
    configured: bool,
    rx_nombuf: u64,
    rx_errors: u64,
}

impl AfPacketDevice {
    /// Open a raw socket for interface `name`; needs `CAP_NET_RAW`
    pub fn open(name: &str) -> Result<Self, DeviceError> {
        let cname = interface_name(name)?;
        // SAFETY: cname is a valid NUL-terminated string.
        let ifindex = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if ifindex == 0 {
            return Err(DeviceError::Environment(format!("no interface named {}", name)));
        }

        // SAFETY: plain socket(2) call; the result is checked below.
        let raw = unsafe { libc::socket(libc::AF_PACKET, libc::SOCK_RAW | libc::SOCK_CLOEXEC, 0) };
        if raw < 0 {
            return Err(DeviceError::Io(io::Error::last_os_error()));
        }
        // SAFETY: raw is a freshly created descriptor we own.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        tracing::debug!(interface = name, ifindex, "packet socket opened");
        Ok(Self {
            name: name.to_string(),
            ifindex: ifindex as i32,
            fd: Some(fd),
            pool: None,
            spare: None,
            configured: false,
            rx_nombuf: 0,
            rx_errors: 0,
        })
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self, op: &'static str) -> Result<RawFd, DeviceError> {
        self.fd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(DeviceError::Driver { op, code: -libc::EBADF })
    }

    fn bind(&self, protocol: u16) -> Result<(), DeviceError> {
        let fd = self.raw_fd("bind")?;
        let addr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: protocol.to_be(),
            sll_ifindex: self.ifindex,
            sll_hatype: 0,
            sll_pkttype: 0,
            sll_halen: 0,
            sll_addr: [0; 8],
        };
        // SAFETY: addr is a fully initialized sockaddr_ll of the given size.
        let ret = unsafe {
            libc::bind(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(DeviceError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn sysfs(&self, rel: &str) -> PathBuf {
        PathBuf::from("/sys/class/net").join(&self.name).join(rel)
    }

    fn release_spare(&mut self) {
        if let (Some(slot), Some(pool)) = (self.spare.take(), self.pool.as_ref()) {
            if let Err(e) = pool.release(slot) {
                tracing::error!(interface = %self.name, error = %e, "spare slot release failed");
            }
        }
    }
}

impl NetDevice for AfPacketDevice {
    fn info(&self) -> Result<DeviceInfo, DeviceError> {
        Ok(DeviceInfo {
            driver_name: "af_packet".into(),
            max_rx_queues: 1,
            max_tx_queues: 1,
            rx_desc_lim: DescLimits::default(),
            tx_desc_lim: DescLimits::default(),
            tx_offload_capa: TxOffloads::empty(),
            default_txconf: TxConf::default(),
        })
    }

    fn socket(&self) -> Locality {
        std::fs::read_to_string(self.sysfs("device/numa_node"))
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map_or(Locality::Any, Locality::from_socket_id)
    }

    fn configure(
        &mut self,
        rx_queues: u16,
        tx_queues: u16,
        _conf: &PortConf,
    ) -> Result<(), DeviceError> {
        if rx_queues != 1 || tx_queues > 1 {
            return Err(DeviceError::Driver { op: "configure", code: -libc::EINVAL });
        }
        self.raw_fd("configure")?;
        self.configured = true;
        Ok(())
    }

    fn rx_queue_setup(
        &mut self,
        queue: u16,
        ring_size: u16,
        _socket: Locality,
        pool: Arc<BufferPool>,
    ) -> Result<(), DeviceError> {
        if !self.configured || queue != 0 {
            return Err(DeviceError::Driver { op: "rx_queue_setup", code: -libc::EINVAL });
        }
        let fd = self.raw_fd("rx_queue_setup")?;

        // Socket buffer sized like a descriptor ring of full slots
        let rcvbuf = (ring_size as usize * pool.slot_capacity()).min(i32::MAX as usize) as libc::c_int;
        // SAFETY: rcvbuf outlives the call and has the advertised size.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                &rcvbuf as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(DeviceError::Io(io::Error::last_os_error()));
        }

        self.release_spare();
        self.pool = Some(pool);
        Ok(())
    }

    fn tx_queue_setup(
        &mut self,
        queue: u16,
        _ring_size: u16,
        _socket: Locality,
        _conf: &TxConf,
    ) -> Result<(), DeviceError> {
        if !self.configured || queue != 0 {
            return Err(DeviceError::Driver { op: "tx_queue_setup", code: -libc::EINVAL });
        }
        Ok(())
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.pool.is_none() {
            return Err(DeviceError::Driver { op: "start", code: -libc::EINVAL });
        }
        self.bind(libc::ETH_P_ALL as u16)
    }

    fn mac_address(&self) -> Result<MacAddr, DeviceError> {
        let fd = self.raw_fd("mac_address")?;
        let mut ifr = ifreq_for(&self.name)?;
        // SAFETY: ifr is a zeroed ifreq carrying a valid interface name.
        let ret = unsafe { libc::ioctl(fd, libc::SIOCGIFHWADDR as _, &mut ifr) };
        if ret < 0 {
            return Err(DeviceError::Io(io::Error::last_os_error()));
        }
        // SAFETY: SIOCGIFHWADDR fills the hwaddr member of the union.
        let data = unsafe { ifr.ifr_ifru.ifru_hwaddr.sa_data };
        let mut mac = [0u8; 6];
        for (dst, src) in mac.iter_mut().zip(data.iter()) {
            *dst = *src as u8;
        }
        Ok(MacAddr(mac))
    }

    fn set_promiscuous(&mut self, enable: bool) -> Result<(), DeviceError> {
        let fd = self.raw_fd("promiscuous")?;
        let mreq = libc::packet_mreq {
            mr_ifindex: self.ifindex,
            mr_type: libc::PACKET_MR_PROMISC as u16,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let optname = if enable {
            libc::PACKET_ADD_MEMBERSHIP
        } else {
            libc::PACKET_DROP_MEMBERSHIP
        };
        // SAFETY: mreq outlives the call and has the advertised size.
        let ret = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_PACKET,
                optname,
                &mreq as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::packet_mreq>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(DeviceError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    fn rx_burst(&mut self, queue: u16, out: &mut RxBurst, max: usize) -> usize {
        let (Some(fd), Some(pool), 0) = (self.fd.as_ref(), self.pool.as_ref(), queue) else {
            return 0;
        };
        let fd = fd.as_raw_fd();

        let mut received = 0;
        while received < max && !out.is_full() {
            let Some(mut slot) = self.spare.take().or_else(|| pool.borrow()) else {
                self.rx_nombuf += 1;
                break;
            };
            let buf = pool.buffer_mut(&mut slot);
            let room = buf.len();
            // SAFETY: buf is a writable region of buf.len() bytes owned by slot.
            let n = unsafe {
                libc::recv(
                    fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    room,
                    libc::MSG_DONTWAIT | libc::MSG_TRUNC,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    self.rx_errors += 1;
                    tracing::trace!(interface = %self.name, error = %err, "recv failed");
                }
                self.spare = Some(slot);
                break;
            }
            let (len, truncated) = frame_len(n as usize, room);
            if truncated {
                self.rx_errors += 1;
                tracing::trace!(interface = %self.name, wire = n, kept = len, "frame truncated");
            }
            pool.commit(&mut slot, len);
            out.push(slot);
            received += 1;
        }
        received
    }

    fn stats(&self) -> Result<PortStats, DeviceError> {
        let read = |name: &str| read_counter(&self.sysfs("statistics").join(name));
        Ok(PortStats {
            rx_packets: read("rx_packets")?,
            tx_packets: read("tx_packets")?,
            rx_bytes: read("rx_bytes")?,
            tx_bytes: read("tx_bytes")?,
            rx_missed: read("rx_missed_errors").unwrap_or(0),
            rx_nombuf: self.rx_nombuf,
            rx_errors: read("rx_errors").unwrap_or(0) + self.rx_errors,
        })
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.bind(0)
    }

    fn close(&mut self) {
        self.release_spare();
        self.pool = None;
        self.configured = false;
        if self.fd.take().is_some() {
            tracing::debug!(interface = %self.name, "packet socket closed");
        }
    }
}

impl Drop for AfPacketDevice {
    fn drop(&mut self) {
        self.close();
    }
}

fn interface_name(name: &str) -> Result<CString, DeviceError> {
    if name.is_empty() || name.len() >= IFNAMSIZ {
        return Err(DeviceError::Environment(format!(
            "interface name {:?} must be 1..{} bytes",
            name, IFNAMSIZ
        )));
    }
    CString::new(name)
        .map_err(|_| DeviceError::Environment(format!("interface name {:?} contains NUL", name)))
}

fn ifreq_for(name: &str) -> Result<libc::ifreq, DeviceError> {
    let cname = interface_name(name)?;
    // SAFETY: ifreq is plain data; all-zero is a valid value.
    let mut ifr: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in ifr.ifr_name.iter_mut().zip(cname.as_bytes_with_nul()) {
        *dst = *src as libc::c_char;
    }
    Ok(ifr)
}

fn read_counter(path: &std::path::Path) -> Result<u64, DeviceError> {
    let content = std::fs::read_to_string(path)?;
    content.trim().parse().map_err(|_| {
        DeviceError::Environment(format!("unreadable counter {}", path.display()))
    })
}

/// Bytes kept from a frame of `wire` bytes in a `room`-byte slot, and
/// whether the tail was cut off
fn frame_len(wire: usize, room: usize) -> (usize, bool) {
    (wire.min(room), wire > room)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_name_validation() {
        assert!(interface_name("eth0").is_ok());
        assert!(interface_name("").is_err());
        assert!(interface_name("a-very-long-interface-name").is_err());
        assert!(interface_name("et\0h").is_err());
    }

    #[test]
    fn test_ifreq_carries_name() {
        let ifr = ifreq_for("lo").unwrap();
        assert_eq!(ifr.ifr_name[0] as u8, b'l');
        assert_eq!(ifr.ifr_name[1] as u8, b'o');
        assert_eq!(ifr.ifr_name[2], 0);
    }

    #[test]
    fn test_runtime_ports() {
        let mut rt = AfPacketRuntime::new(vec!["lo".into()]).pin_main_core(false);
        assert_eq!(rt.available_ports(), 1);
        assert!(matches!(rt.open(0), Err(DeviceError::Environment(_))));

        rt.init(&RuntimeArgs::new("test", "0".parse().unwrap())).unwrap();
        assert!(matches!(rt.open(4), Err(DeviceError::InvalidPort(4))));
        rt.cleanup();
    }

    #[test]
    fn test_runtime_rejects_bad_names() {
        let mut rt = AfPacketRuntime::new(vec!["".into()]).pin_main_core(false);
        assert!(rt.init(&RuntimeArgs::new("test", "0".parse().unwrap())).is_err());
    }

    #[test]
    fn test_read_counter() {
        let path = std::env::temp_dir().join(format!("burstcap-counter-{}", std::process::id()));
        std::fs::write(&path, "12345\n").unwrap();
        assert_eq!(read_counter(&path).unwrap(), 12345);

        std::fs::write(&path, "garbage").unwrap();
        assert!(read_counter(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_frame_len_flags_truncation() {
        assert_eq!(frame_len(64, 2048), (64, false));
        assert_eq!(frame_len(2048, 2048), (2048, false));
        assert_eq!(frame_len(9000, 2048), (2048, true));
        assert_eq!(frame_len(0, 2048), (0, false));
    }
}
