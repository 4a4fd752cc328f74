//! `burstcap run`

use crate::output::{packet_line, OutputFormat};
use anyhow::{bail, Result};
use burstcap_core::sim::SimRuntime;
use burstcap_core::{
    CaptureEngine, CaptureSnapshot, EngineConfig, IdlePolicy, PortStats, RunSummary, Runtime,
    ShutdownSignal,
};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Bytes of each frame shown by `--print-packets`
const PREVIEW_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// In-memory device fed with synthetic frames
    Sim,
    /// Raw socket on a kernel interface (Linux)
    AfPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdleMode {
    Spin,
    Yield,
    Sleep,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Port to capture from
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Core list, e.g. "0-1" or "0,2"
    #[arg(long, short)]
    pub cores: Option<String>,

    /// Packets per capture call (clamped to 32)
    #[arg(long, short, allow_negative_numbers = true)]
    pub batch_size: Option<i32>,

    /// Device backend
    #[arg(long, value_enum, default_value = "sim")]
    pub backend: Backend,

    /// Interface for the af-packet backend; repeat for more ports
    #[arg(long = "iface", value_name = "NAME")]
    pub ifaces: Vec<String>,

    /// JSON engine configuration; flags override it
    #[arg(long, env = "BURSTCAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// What to do after an empty poll
    #[arg(long, value_enum, default_value = "sleep")]
    pub idle: IdleMode,

    /// Sleep per empty poll with `--idle sleep`
    #[arg(long, default_value_t = 1000)]
    pub idle_us: u64,

    /// Stop after this many packets
    #[arg(long)]
    pub limit: Option<u64>,

    /// Print one line per captured packet
    #[arg(long)]
    pub print_packets: bool,

    /// Frames injected by the sim backend (also its default limit)
    #[arg(long, default_value_t = 1000)]
    pub sim_frames: usize,

    /// Length of each injected frame
    #[arg(long, default_value_t = 64)]
    pub sim_frame_len: usize,

    /// Print the final report as JSON
    #[arg(long)]
    pub stats_json: bool,
}

impl RunArgs {
    /// Config file (or defaults) with flag overrides applied
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        if let Some(port) = self.port {
            config.port_id = port;
        }
        if let Some(cores) = &self.cores {
            config.cores = cores.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        Ok(config)
    }

    pub fn idle_policy(&self) -> IdlePolicy {
        match self.idle {
            IdleMode::Spin => IdlePolicy::Spin,
            IdleMode::Yield => IdlePolicy::Yield,
            IdleMode::Sleep => IdlePolicy::Sleep(Duration::from_micros(self.idle_us)),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    port: u16,
    backend: &'static str,
    summary: RunSummary,
    engine: CaptureSnapshot,
    device: PortStats,
    throughput_gbps: f64,
    packet_rate_mpps: f64,
}

pub fn execute(args: RunArgs, format: OutputFormat) -> Result<()> {
    let config = args.engine_config()?;
    let format = if args.stats_json { OutputFormat::Json } else { format };

    match args.backend {
        Backend::Sim => {
            // one device per addressable port id; larger ids are left for
            // initialize to reject
            let devices = config.port_id.min(u8::MAX as u16) + 1;
            let sim = SimRuntime::with_devices(devices);
            if config.port_id < devices {
                sim.traffic(config.port_id)
                    .inject_synthetic(args.sim_frames, args.sim_frame_len);
            }
            let limit = args.limit.or(Some(args.sim_frames as u64));
            capture(sim, "sim", &config, &args, limit, format)
        }
        Backend::AfPacket => {
            let runtime = af_packet_runtime(&args)?;
            capture(runtime, "af-packet", &config, &args, args.limit, format)
        }
    }
}

#[cfg(all(target_os = "linux", feature = "af_packet"))]
fn af_packet_runtime(args: &RunArgs) -> Result<burstcap_core::af_packet::AfPacketRuntime> {
    if args.ifaces.is_empty() {
        bail!("the af-packet backend needs at least one --iface");
    }
    Ok(burstcap_core::af_packet::AfPacketRuntime::new(args.ifaces.clone()))
}

#[cfg(not(all(target_os = "linux", feature = "af_packet")))]
fn af_packet_runtime(_args: &RunArgs) -> Result<SimRuntime> {
    bail!("the af-packet backend is not available in this build")
}

fn capture<R: Runtime>(
    runtime: R,
    backend: &'static str,
    config: &EngineConfig,
    args: &RunArgs,
    limit: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let mut engine = CaptureEngine::initialize(runtime, config, ShutdownSignal::new())
        .map_err(|e| {
            let code = e.code();
            anyhow::Error::new(e).context(format!("engine initialization failed (code {code})"))
        })?;

    let summary = if limit == Some(0) {
        RunSummary::default()
    } else {
        let mut captured = 0u64;
        let mut last_report = Instant::now();
        let max_packets = engine.batch_ceiling() as i32;

        engine.run(max_packets, args.idle_policy(), |batch| {
            if args.print_packets {
                for packet in batch.iter() {
                    println!(
                        "{}",
                        packet_line(packet.data(), packet.port(), packet.timestamp(), PREVIEW_BYTES)
                    );
                }
            }

            captured += batch.len() as u64;
            if last_report.elapsed() >= Duration::from_secs(1) {
                tracing::info!(packets = captured, "capturing");
                last_report = Instant::now();
            }

            match limit {
                Some(limit) if captured >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        })?
    };

    let device = engine.get_stats(engine.port_id())?;
    let snapshot = engine.counters().snapshot();
    let report = RunReport {
        port: engine.port_id(),
        backend,
        throughput_gbps: snapshot.throughput_gbps(summary.elapsed_secs),
        packet_rate_mpps: snapshot.packet_rate_mpps(summary.elapsed_secs),
        summary,
        engine: snapshot,
        device,
    };
    engine.cleanup();

    format.print(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        Harness::parse_from(std::iter::once("run").chain(args.iter().copied())).run
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = parse(&["--port", "2", "--cores", "0-3", "--batch-size", "-1"]);
        let config = args.engine_config().unwrap();
        assert_eq!(config.port_id, 2);
        assert_eq!(config.cores, "0-3");
        assert_eq!(config.batch_size, -1);
        assert_eq!(config.batch_ceiling(), 32);
        assert_eq!(args.backend, Backend::Sim);
    }

    #[test]
    fn test_flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("burstcap-run-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "port_id": 1, "cores": "4", "batch_size": 8 }"#).unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--batch-size", "16"]);
        let config = args.engine_config().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.port_id, 1);
        assert_eq!(config.cores, "4");
        assert_eq!(config.batch_size, 16);
    }

    #[test]
    fn test_idle_policy() {
        assert_eq!(parse(&["--idle", "spin"]).idle_policy(), IdlePolicy::Spin);
        assert_eq!(
            parse(&["--idle-us", "250"]).idle_policy(),
            IdlePolicy::Sleep(Duration::from_micros(250))
        );
    }

    #[test]
    fn test_sim_run_completes() {
        let args = parse(&["--sim-frames", "100", "--idle", "yield", "--port", "1"]);
        execute(args, OutputFormat::Json).unwrap();
    }

    #[test]
    fn test_sim_run_reports_init_code() {
        let args = parse(&["--cores", "x"]);
        let err = execute(args, OutputFormat::Text).unwrap_err();
        assert!(err.to_string().contains("code -1"), "{err}");
    }

    #[test]
    fn test_sim_run_rejects_large_port() {
        for port in ["256", "65535"] {
            let args = parse(&["--port", port, "--sim-frames", "1"]);
            let err = execute(args, OutputFormat::Text).unwrap_err();
            assert!(err.to_string().contains("code -3"), "{err}");
        }
    }
}
