//! Capture Engine
//!
//! Owns the runtime, the port, the buffer pool and the shutdown flag of one
//! capture instance. Bring-up runs in a fixed order and every step must
//! succeed before the next; a failure unwinds whatever was already acquired.

use crate::buffer::BufferPool;
use crate::capture::{coarse_now, Batch};
use crate::config::EngineConfig;
use crate::device::{NetDevice, Runtime, RuntimeArgs, RxBurst};
use crate::error::{CaptureError, InitError, PortSetupError, StatsError};
use crate::port::{Port, PortStage};
use crate::shutdown::{install_signal_handlers, ShutdownSignal};
use crate::stats::{CaptureCounters, PortStats};
use serde::Serialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What the run loop does after an empty poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Busy-poll with a spin hint
    Spin,
    /// Yield the thread
    Yield,
    /// Sleep for the given duration
    Sleep(Duration),
}

impl Default for IdlePolicy {
    fn default() -> Self {
        IdlePolicy::Sleep(Duration::from_millis(1))
    }
}

impl IdlePolicy {
    #[inline]
    fn idle(&self) {
        match self {
            IdlePolicy::Spin => std::hint::spin_loop(),
            IdlePolicy::Yield => std::thread::yield_now(),
            IdlePolicy::Sleep(d) => std::thread::sleep(*d),
        }
    }
}

/// Why [`CaptureEngine::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The shutdown signal was triggered
    #[default]
    Shutdown,
    /// The batch callback asked to stop
    Callback,
}

/// Totals for one [`CaptureEngine::run`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Non-empty batches delivered
    pub batches: u64,
    /// Frames delivered
    pub packets: u64,
    /// Bytes delivered
    pub bytes: u64,
    /// Polls that returned nothing
    pub empty_polls: u64,
    /// Wall time spent in the loop
    pub elapsed_secs: f64,
    /// Why the loop ended
    pub stop_reason: StopReason,
}

/// Polling capture over one device/queue pair
pub struct CaptureEngine<R: Runtime> {
    runtime: R,
    runtime_active: bool,
    port: Option<Port<R::Device>>,
    pool: Option<Arc<BufferPool>>,
    port_id: u16,
    batch_ceiling: usize,
    shutdown: ShutdownSignal,
    counters: CaptureCounters,
}

impl<R: Runtime> CaptureEngine<R> {
    /// Bring up the runtime, the pool and the port, then install signal
    /// handlers for `shutdown`.
    ///
    /// On error everything acquired so far is released before returning.
    pub fn initialize(
        runtime: R,
        config: &EngineConfig,
        shutdown: ShutdownSignal,
    ) -> Result<Self, InitError> {
        let mut engine = Self {
            runtime,
            runtime_active: false,
            port: None,
            pool: None,
            port_id: config.port_id,
            batch_ceiling: config.batch_ceiling(),
            shutdown,
            counters: CaptureCounters::default(),
        };

        if let Err(e) = engine.bring_up(config) {
            tracing::warn!(code = e.code(), error = %e, "initialization failed, unwinding");
            engine.cleanup();
            return Err(e);
        }
        Ok(engine)
    }

    fn bring_up(&mut self, config: &EngineConfig) -> Result<(), InitError> {
        // 1. runtime environment
        let lcores = config
            .core_list()
            .map_err(|e| InitError::Initialization(e.to_string()))?;
        let args = RuntimeArgs::new(config.app_name.as_str(), lcores);
        self.runtime
            .init(&args)
            .map_err(|e| InitError::Initialization(e.to_string()))?;
        self.runtime_active = true;
        tracing::debug!(argv = ?args.to_argv(), "runtime initialized");

        // 2. port id
        let available = self.runtime.available_ports();
        if available == 0 {
            return Err(InitError::NoDeviceAvailable);
        }
        if config.port_id >= available || config.port_id > u8::MAX as u16 {
            return Err(InitError::PortOutOfRange {
                port: config.port_id,
                available,
            });
        }

        // 3. batch ceiling
        if self.batch_ceiling as i64 != config.batch_size as i64 {
            tracing::warn!(
                requested = config.batch_size,
                using = self.batch_ceiling,
                "batch size out of range, clamped"
            );
        }

        let device = self
            .runtime
            .open(config.port_id)
            .map_err(|e| PortSetupError::new(PortStage::Open, e))?;
        let port = self.port.insert(Port::new(config.port_id, device));

        // 4. buffer pool, placed on the device's socket unless overridden
        let locality = config.pool.locality.unwrap_or_else(|| port.device().socket());
        let pool = BufferPool::allocate(config.pool.slots, config.pool.slot_capacity, locality)
            .map_err(InitError::PoolCreation)?
            .with_cache_size(config.pool.cache_size);
        let pool = Arc::new(pool);
        self.pool = Some(Arc::clone(&pool));

        // 5-6. queues
        port.configure(pool, config.rx_ring_size, config.tx_ring_size)?;

        // 7. start
        port.start(config.promiscuous)?;

        // 8. signals
        install_signal_handlers(&self.shutdown)?;

        tracing::info!(
            port = config.port_id,
            cores = %args.lcores,
            batch = self.batch_ceiling,
            rx_ring = port.rx_ring_size(),
            pool_slots = config.pool.slots,
            "capture engine ready"
        );
        Ok(())
    }

    /// Poll the RX queue once for up to `max_packets` frames.
    ///
    /// Never blocks; an empty queue yields an empty batch. The effective
    /// limit is `min(max_packets, batch_ceiling)`.
    pub fn capture(&mut self, max_packets: i32) -> Result<Batch<'_>, CaptureError> {
        if max_packets <= 0 {
            return Err(CaptureError::InvalidArgument(max_packets));
        }
        let (Some(port), Some(pool)) = (self.port.as_mut(), self.pool.as_ref()) else {
            return Err(CaptureError::PortClosed);
        };

        let limit = (max_packets as usize).min(self.batch_ceiling);
        let port_id = self.port_id as u8;

        let mut rx = RxBurst::new();
        let received = port.rx_burst(&mut rx, limit);

        if received < limit && pool.available() == 0 {
            self.counters.record_pool_exhausted();
            tracing::trace!(received, limit, "buffer pool exhausted");
        }

        if received == 0 {
            self.counters.record_empty();
            return Ok(Batch::empty(pool, port_id));
        }

        let batch = Batch::new(pool, rx, port_id, coarse_now());
        self.counters.record_batch(received as u64, batch.total_bytes());
        Ok(batch)
    }

    /// Device counters of the active port
    pub fn get_stats(&self, port_id: u16) -> Result<PortStats, StatsError> {
        if port_id != self.port_id {
            return Err(StatsError::PortMismatch {
                requested: port_id,
                active: self.port_id,
            });
        }
        let port = self.port.as_ref().ok_or(StatsError::PortClosed)?;
        Ok(port.stats()?)
    }

    /// Capture until shutdown is signalled or `on_batch` breaks.
    ///
    /// The shutdown flag is checked between polls, never in the middle of a
    /// batch. Empty polls back off according to `idle`.
    pub fn run<F>(
        &mut self,
        max_packets: i32,
        idle: IdlePolicy,
        mut on_batch: F,
    ) -> Result<RunSummary, CaptureError>
    where
        F: FnMut(&Batch<'_>) -> ControlFlow<()>,
    {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        tracing::info!(port = self.port_id, ?idle, "capture loop started");

        while !self.shutdown.is_triggered() {
            let batch = self.capture(max_packets)?;
            if batch.is_empty() {
                summary.empty_polls += 1;
                drop(batch);
                idle.idle();
                continue;
            }

            summary.batches += 1;
            summary.packets += batch.len() as u64;
            summary.bytes += batch.total_bytes();

            if on_batch(&batch).is_break() {
                summary.stop_reason = StopReason::Callback;
                break;
            }
        }

        summary.elapsed_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            batches = summary.batches,
            packets = summary.packets,
            bytes = summary.bytes,
            reason = ?summary.stop_reason,
            "capture loop stopped"
        );
        Ok(summary)
    }

    /// Stop and close the device, then release the runtime. Idempotent.
    pub fn cleanup(&mut self) {
        if let Some(mut port) = self.port.take() {
            port.close();
        }
        if let Some(pool) = self.pool.take() {
            let pinned = pool.in_flight();
            if pinned > 0 {
                tracing::debug!(pinned, "slots still pinned at cleanup");
            }
        }
        if self.runtime_active {
            self.runtime.cleanup();
            self.runtime_active = false;
            tracing::info!(port = self.port_id, "capture engine cleaned up");
        }
    }

    /// Active port id
    pub fn port_id(&self) -> u16 {
        self.port_id
    }

    /// Effective per-capture limit
    pub fn batch_ceiling(&self) -> usize {
        self.batch_ceiling
    }

    /// True until [`cleanup`](Self::cleanup)
    pub fn is_active(&self) -> bool {
        self.port.is_some()
    }

    /// Port controller, while active
    pub fn port(&self) -> Option<&Port<R::Device>> {
        self.port.as_ref()
    }

    /// Buffer pool, while active
    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    /// This engine's shutdown flag
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Engine-side counters
    pub fn counters(&self) -> &CaptureCounters {
        &self.counters
    }

    /// The runtime this engine was built on
    pub fn runtime(&self) -> &R {
        &self.runtime
    }
}

impl<R: Runtime> Drop for CaptureEngine<R> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<R: Runtime> std::fmt::Debug for CaptureEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("port_id", &self.port_id)
            .field("batch_ceiling", &self.batch_ceiling)
            .field("active", &self.is_active())
            .field("runtime_active", &self.runtime_active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortState;
    use crate::sim::{SimFault, SimRuntime};
    use crate::MAX_PKT_BURST;
    use proptest::prelude::*;

    fn engine(sim: SimRuntime, config: &EngineConfig) -> CaptureEngine<SimRuntime> {
        CaptureEngine::initialize(sim, config, ShutdownSignal::new()).unwrap()
    }

    #[test]
    fn test_initialize_and_capture() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let probe = sim.probe();
        let mut engine = crate::initialize(sim, 0, "0-1", 64).unwrap();

        assert_eq!(engine.batch_ceiling(), MAX_PKT_BURST);
        assert!(probe.started(0));
        assert!(probe.promiscuous(0));
        assert_eq!(probe.last_argv(), vec!["burstcap", "-l", "0-1", "--"]);

        traffic.inject_synthetic(10, 64);
        let batch = engine.capture(64).unwrap();
        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|p| p.port() == 0 && p.len() == 64));
        let seqs: Vec<u32> = batch
            .iter()
            .map(|p| u32::from_be_bytes(p.data()[14..18].try_into().unwrap()))
            .collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_queue_is_empty_batch() {
        let mut engine = engine(SimRuntime::with_devices(1), &EngineConfig::default());
        let batch = engine.capture(32).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.timestamp(), 0);
        drop(batch);
        assert_eq!(engine.counters().snapshot().empty_polls, 1);
    }

    #[test]
    fn test_capture_rejects_non_positive() {
        let mut engine = engine(SimRuntime::with_devices(1), &EngineConfig::default());
        for n in [0, -1, i32::MIN] {
            let err = engine.capture(n).unwrap_err();
            assert!(matches!(err, CaptureError::InvalidArgument(_)));
            assert_eq!(err.code(), -1);
        }
    }

    #[test]
    fn test_small_ceiling_bounds_batches() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::new(0, "0", 4));
        traffic.inject_synthetic(10, 60);

        let lens: Vec<usize> = (0..4).map(|_| engine.capture(32).unwrap().len()).collect();
        assert_eq!(lens, vec![4, 4, 2, 0]);
    }

    #[test]
    fn test_get_stats() {
        let sim = SimRuntime::with_devices(2);
        let traffic = sim.traffic(1);
        let mut engine = engine(sim, &EngineConfig::new(1, "0", 32));
        traffic.inject_synthetic(3, 100);
        drop(engine.capture(32).unwrap());

        let stats = engine.get_stats(1).unwrap();
        assert_eq!(stats.rx_packets, 3);
        assert_eq!(stats.rx_bytes, 300);
        assert_eq!(stats.tx_packets, 0);

        let err = engine.get_stats(0).unwrap_err();
        assert!(matches!(err, StatsError::PortMismatch { requested: 0, active: 1 }));
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn test_stats_device_failure_propagates() {
        let sim = SimRuntime::with_devices(1).fail_at(SimFault::Stats);
        let engine = engine(sim, &EngineConfig::default());
        assert!(matches!(engine.get_stats(0), Err(StatsError::Device(_))));
    }

    #[test]
    fn test_cleanup_twice() {
        let sim = SimRuntime::with_devices(1);
        let probe = sim.probe();
        let mut engine = engine(sim, &EngineConfig::default());

        engine.cleanup();
        engine.cleanup();
        drop(engine);

        assert_eq!(probe.close_calls(0), 1);
        assert_eq!(probe.cleanup_calls(), 1);
        assert!(!probe.runtime_active());
        assert!(!probe.any_device_bound());
    }

    #[test]
    fn test_capture_after_cleanup() {
        let mut engine = engine(SimRuntime::with_devices(1), &EngineConfig::default());
        engine.cleanup();
        assert!(!engine.is_active());
        assert!(matches!(engine.capture(8), Err(CaptureError::PortClosed)));
        assert!(matches!(engine.get_stats(0), Err(StatsError::PortClosed)));
    }

    #[test]
    fn test_drop_releases_everything() {
        let sim = SimRuntime::with_devices(1);
        let probe = sim.probe();
        drop(engine(sim, &EngineConfig::default()));
        assert!(!probe.runtime_active());
        assert_eq!(probe.close_calls(0), 1);
    }

    #[test]
    fn test_port_out_of_range_unwinds() {
        let sim = SimRuntime::with_devices(2);
        let probe = sim.probe();
        let err = crate::initialize(sim, 5, "0", 32).unwrap_err();

        assert!(matches!(err, InitError::PortOutOfRange { port: 5, available: 2 }));
        assert_eq!(err.code(), -3);
        assert!(!probe.any_device_bound());
        assert!(!probe.runtime_active());
        assert_eq!(probe.cleanup_calls(), 1);
    }

    #[test]
    fn test_port_id_above_u8_rejected() {
        let sim = SimRuntime::with_devices(300);
        let err = crate::initialize(sim, 256, "0", 32).unwrap_err();
        assert_eq!(err.code(), -3);
    }

    #[test]
    fn test_no_device() {
        let sim = SimRuntime::with_devices(0);
        let probe = sim.probe();
        let err = crate::initialize(sim, 0, "0", 32).unwrap_err();
        assert!(matches!(err, InitError::NoDeviceAvailable));
        assert_eq!(err.code(), -2);
        assert!(!probe.runtime_active());
    }

    #[test]
    fn test_runtime_failures() {
        let err = crate::initialize(SimRuntime::with_devices(1), 0, "zero", 32).unwrap_err();
        assert_eq!(err.code(), -1);

        let sim = SimRuntime::with_devices(1).fail_at(SimFault::Init);
        let probe = sim.probe();
        let err = crate::initialize(sim, 0, "0", 32).unwrap_err();
        assert_eq!(err.code(), -1);
        assert_eq!(probe.cleanup_calls(), 0);
    }

    #[test]
    fn test_pool_creation_failure() {
        let sim = SimRuntime::with_devices(1);
        let probe = sim.probe();
        let mut config = EngineConfig::default();
        config.pool.slots = 0;

        let err = CaptureEngine::initialize(sim, &config, ShutdownSignal::new()).unwrap_err();
        assert_eq!(err.code(), -4);
        assert!(!probe.any_device_bound());
        assert!(!probe.runtime_active());
    }

    #[test]
    fn test_port_faults_unwind() {
        let stages = [
            (SimFault::Open, PortStage::Open),
            (SimFault::Info, PortStage::DeviceInfo),
            (SimFault::Configure, PortStage::Configure),
            (SimFault::RxQueueSetup, PortStage::RxQueueSetup),
            (SimFault::TxQueueSetup, PortStage::TxQueueSetup),
            (SimFault::Start, PortStage::Start),
            (SimFault::MacAddress, PortStage::MacAddress),
            (SimFault::Promiscuous, PortStage::Promiscuous),
        ];
        for (fault, stage) in stages {
            let sim = SimRuntime::with_devices(1).fail_at(fault);
            let probe = sim.probe();
            let err = crate::initialize(sim, 0, "0", 32).unwrap_err();

            assert_eq!(err.code(), -5, "{fault:?}");
            match err {
                InitError::PortConfiguration(e) => assert_eq!(e.stage, stage),
                other => panic!("{fault:?}: unexpected {other}"),
            }
            assert!(!probe.any_device_bound(), "{fault:?}");
            assert!(!probe.started(0), "{fault:?}");
            assert!(!probe.runtime_active(), "{fault:?}");
        }
    }

    #[test]
    fn test_pool_exhaustion_is_silent() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut config = EngineConfig::default();
        config.pool.slots = 8;
        let mut engine = engine(sim, &config);
        traffic.inject_synthetic(13, 64);

        let mut held = Vec::new();
        loop {
            let batch = engine.capture(32).unwrap();
            if batch.is_empty() {
                break;
            }
            held.extend(batch.pin_all());
        }
        assert_eq!(held.len(), 8);
        assert_eq!(traffic.pending(), 5);
        assert!(engine.counters().snapshot().pool_exhausted >= 1);
        assert!(engine.get_stats(0).unwrap().rx_nombuf >= 1);

        held.clear();
        assert_eq!(engine.capture(32).unwrap().len(), 5);
    }

    #[test]
    fn test_batch_release_returns_slots() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::default());
        traffic.inject_synthetic(20, 64);

        drop(engine.capture(32).unwrap());
        assert_eq!(engine.pool().unwrap().in_flight(), 0);
    }

    #[test]
    fn test_pinned_outlives_engine() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::default());
        traffic.inject(b"keep me");

        let pinned = engine.capture(1).unwrap().pin(0).unwrap();
        drop(engine);
        assert_eq!(pinned.data(), b"keep me");
        assert_eq!(pinned.port(), 0);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::default());

        let mut last = 0;
        for _ in 0..50 {
            traffic.inject_synthetic(2, 64);
            let batch = engine.capture(32).unwrap();
            assert!(batch.timestamp() >= last);
            assert!(batch.iter().all(|p| p.timestamp() == batch.timestamp()));
            last = batch.timestamp();
        }
    }

    #[test]
    fn test_run_until_callback_breaks() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::default());
        traffic.inject_synthetic(70, 64);

        let mut seen = 0u64;
        let summary = engine
            .run(32, IdlePolicy::Spin, |batch| {
                seen += batch.len() as u64;
                if seen >= 70 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(summary.packets, 70);
        assert_eq!(summary.batches, 3);
        assert_eq!(summary.bytes, 70 * 64);
        assert_eq!(summary.stop_reason, StopReason::Callback);
    }

    #[test]
    fn test_run_stops_on_shutdown() {
        let sim = SimRuntime::with_devices(1);
        let traffic = sim.traffic(0);
        let mut engine = engine(sim, &EngineConfig::default());
        let shutdown = engine.shutdown().clone();
        traffic.inject_synthetic(5, 64);

        let summary = engine
            .run(32, IdlePolicy::Yield, |_| {
                shutdown.trigger();
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(summary.packets, 5);
        assert_eq!(summary.stop_reason, StopReason::Shutdown);

        // Already triggered: returns without polling.
        let summary = engine.run(32, IdlePolicy::Spin, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(summary.batches + summary.empty_polls, 0);
    }

    #[test]
    fn test_run_rejects_bad_limit() {
        let mut engine = engine(SimRuntime::with_devices(1), &EngineConfig::default());
        let result = engine.run(0, IdlePolicy::Spin, |_| ControlFlow::Continue(()));
        assert!(matches!(result, Err(CaptureError::InvalidArgument(0))));
    }

    #[test]
    fn test_engine_fast_free_and_rings() {
        let sim = SimRuntime::with_devices(1).with_max_ring(256);
        let engine = engine(sim, &EngineConfig::default());
        let port = engine.port().unwrap();
        assert_eq!(port.state(), PortState::Started);
        assert_eq!(port.rx_ring_size(), 256);
        assert!(port.tx_offloads().contains(crate::device::TxOffloads::MBUF_FAST_FREE));
        assert!(port.mac().is_some());
    }

    #[test]
    fn test_pool_placed_on_device_socket() {
        let engine = engine(SimRuntime::with_devices(1), &EngineConfig::default());
        let pool = engine.pool().unwrap();
        assert_eq!(pool.locality(), engine.port().unwrap().device().socket());
        assert_eq!(pool.locality(), crate::buffer::Locality::Socket(0));

        let mut config = EngineConfig::default();
        config.pool.locality = Some(crate::buffer::Locality::Any);
        let engine = self::engine(SimRuntime::with_devices(1), &config);
        assert_eq!(engine.pool().unwrap().locality(), crate::buffer::Locality::Any);
    }

    #[test]
    fn test_independent_engines() {
        let a = SimRuntime::with_devices(1);
        let b = SimRuntime::with_devices(1);
        let (ta, tb) = (a.traffic(0), b.traffic(0));
        let mut ea = engine(a, &EngineConfig::default());
        let mut eb = engine(b, &EngineConfig::default());

        ta.inject_synthetic(3, 64);
        tb.inject_synthetic(1, 64);
        ea.shutdown().trigger();

        assert_eq!(ea.capture(32).unwrap().len(), 3);
        assert_eq!(eb.capture(32).unwrap().len(), 1);
        assert!(!eb.shutdown().is_triggered());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_batch_len_bounded(
            batch_size in -8i32..80,
            max_packets in 1i32..100,
            frames in 0usize..120,
        ) {
            let sim = SimRuntime::with_devices(1);
            let traffic = sim.traffic(0);
            let mut config = EngineConfig::new(0, "0", batch_size);
            config.pool.slots = 256;
            let mut engine = CaptureEngine::initialize(sim, &config, ShutdownSignal::new()).unwrap();
            traffic.inject_synthetic(frames, 64);

            let bound = (max_packets as usize).min(engine.batch_ceiling());
            prop_assert!(engine.batch_ceiling() <= MAX_PKT_BURST);

            let mut total = 0;
            loop {
                let batch = engine.capture(max_packets).unwrap();
                prop_assert!(batch.len() <= bound);
                if batch.is_empty() {
                    break;
                }
                total += batch.len();
            }
            prop_assert_eq!(total, frames);
        }
    }
}
