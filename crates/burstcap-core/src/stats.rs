//! Capture Statistics
//!
//! Device counters reported by the driver, plus lock-free engine-side
//! counters for the capture loop.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Device counters as reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    /// Frames received
    pub rx_packets: u64,
    /// Frames transmitted
    pub tx_packets: u64,
    /// Bytes received
    pub rx_bytes: u64,
    /// Bytes transmitted
    pub tx_bytes: u64,
    /// Frames dropped by the device (ring full)
    pub rx_missed: u64,
    /// RX buffer allocation failures
    pub rx_nombuf: u64,
    /// Erroneous received frames
    pub rx_errors: u64,
}

/// Engine-side capture counters (cache-line aligned)
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CaptureCounters {
    pub(crate) polls: AtomicU64,
    pub(crate) empty_polls: AtomicU64,
    pub(crate) batches: AtomicU64,
    pub(crate) packets: AtomicU64,
    pub(crate) bytes: AtomicU64,
    pub(crate) pool_exhausted: AtomicU64,
}

impl CaptureCounters {
    #[inline(always)]
    pub(crate) fn record_empty(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("burstcap_empty_polls_total").increment(1);
    }

    #[inline(always)]
    pub(crate) fn record_batch(&self, packets: u64, bytes: u64) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.packets.fetch_add(packets, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        metrics::counter!("burstcap_rx_packets_total").increment(packets);
        metrics::counter!("burstcap_rx_bytes_total").increment(bytes);
    }

    #[inline(always)]
    pub(crate) fn record_pool_exhausted(&self) {
        self.pool_exhausted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("burstcap_pool_exhausted_total").increment(1);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            packets: self.packets.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Counters snapshot (non-atomic)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    /// RX polls
    pub polls: u64,
    /// Polls that returned nothing
    pub empty_polls: u64,
    /// Polls that returned frames
    pub batches: u64,
    /// Frames handed out
    pub packets: u64,
    /// Frame bytes handed out
    pub bytes: u64,
    /// Short polls with the pool drained
    pub pool_exhausted: u64,
}

impl CaptureSnapshot {
    /// Bits per second over `elapsed_secs`, in Gbit/s
    pub fn throughput_gbps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 { return 0.0; }
        (self.bytes as f64 * 8.0) / (elapsed_secs * 1_000_000_000.0)
    }

    /// Frames per second over `elapsed_secs`, in millions
    pub fn packet_rate_mpps(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs == 0.0 { return 0.0; }
        self.packets as f64 / (elapsed_secs * 1_000_000.0)
    }

    /// Average frames per non-empty poll
    pub fn mean_batch(&self) -> f64 {
        if self.batches == 0 { return 0.0; }
        self.packets as f64 / self.batches as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_counters() {
        let counters = CaptureCounters::default();
        counters.record_batch(10, 640);
        counters.record_batch(2, 128);
        counters.record_empty();
        counters.record_pool_exhausted();

        let snap = counters.snapshot();
        assert_eq!(snap.polls, 3);
        assert_eq!(snap.empty_polls, 1);
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.packets, 12);
        assert_eq!(snap.bytes, 768);
        assert_eq!(snap.pool_exhausted, 1);
        assert_eq!(snap.mean_batch(), 6.0);
    }

    #[test]
    fn test_rates() {
        let snap = CaptureSnapshot {
            packets: 2_000_000,
            bytes: 1_000_000_000,
            ..Default::default()
        };
        assert_eq!(snap.packet_rate_mpps(2.0), 1.0);
        assert_eq!(snap.throughput_gbps(8.0), 1.0);
        assert_eq!(snap.throughput_gbps(0.0), 0.0);
    }

    #[test]
    fn test_port_stats_json() {
        let stats = PortStats { rx_packets: 10, rx_bytes: 640, ..Default::default() };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["rx_packets"], 10);
        assert_eq!(json["tx_bytes"], 0);
    }
}
