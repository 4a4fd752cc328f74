//! Engine Configuration

use crate::buffer::Locality;
use crate::error::ConfigError;
use crate::{
    DEFAULT_POOL_CACHE, DEFAULT_POOL_SLOTS, DEFAULT_RX_RING, DEFAULT_SLOT_CAPACITY,
    DEFAULT_TX_RING, MAX_PKT_BURST,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Highest core index accepted in a core list
pub const MAX_CORE_INDEX: usize = 1023;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program name handed to the runtime
    pub app_name: String,
    /// Device to capture from
    pub port_id: u16,
    /// Core list, e.g. `"0-1"` or `"0,2,4-6"`
    pub cores: String,
    /// Requested batch ceiling; clamped into `1..=MAX_PKT_BURST`
    pub batch_size: i32,
    /// Requested RX ring size (adjusted to the device)
    pub rx_ring_size: u16,
    /// Requested TX ring size (adjusted to the device)
    pub tx_ring_size: u16,
    /// Receive every frame on the wire
    pub promiscuous: bool,
    /// Buffer pool sizing
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_name: "burstcap".into(),
            port_id: 0,
            cores: "0".into(),
            batch_size: MAX_PKT_BURST as i32,
            rx_ring_size: DEFAULT_RX_RING,
            tx_ring_size: DEFAULT_TX_RING,
            promiscuous: true,
            pool: PoolConfig::default(),
        }
    }
}

/// Buffer pool sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of slots
    pub slots: u32,
    /// Data room per slot (bytes)
    pub slot_capacity: u32,
    /// Per-core cache hint
    pub cache_size: u32,
    /// Placement; `None` follows the device's socket
    pub locality: Option<Locality>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_POOL_SLOTS,
            slot_capacity: DEFAULT_SLOT_CAPACITY,
            cache_size: DEFAULT_POOL_CACHE,
            locality: None,
        }
    }
}

impl EngineConfig {
    /// Config for a port, core list and batch size; everything else default
    pub fn new(port_id: u16, cores: impl Into<String>, batch_size: i32) -> Self {
        Self {
            port_id,
            cores: cores.into(),
            batch_size,
            ..Default::default()
        }
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed core list
    pub fn core_list(&self) -> Result<CoreList, ConfigError> {
        self.cores.parse()
    }

    /// Effective batch ceiling
    pub fn batch_ceiling(&self) -> usize {
        clamp_batch(self.batch_size)
    }
}

/// Clamp a requested batch size: out-of-range values become the maximum
pub fn clamp_batch(requested: i32) -> usize {
    if requested <= 0 || requested as usize > MAX_PKT_BURST {
        MAX_PKT_BURST
    } else {
        requested as usize
    }
}

/// Sorted, de-duplicated set of core indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreList(Vec<usize>);

impl CoreList {
    /// Core indices in ascending order
    pub fn cores(&self) -> &[usize] {
        &self.0
    }

    /// Lowest core, where the polling thread runs
    pub fn main_core(&self) -> usize {
        self.0[0]
    }

    /// Number of cores
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a parsed list
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for CoreList {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidCoreList {
            input: input.to_string(),
            reason,
        };
        let parse_core = |s: &str| -> Result<usize, ConfigError> {
            let core: usize = s
                .trim()
                .parse()
                .map_err(|_| invalid(format!("{:?} is not a core index", s.trim())))?;
            if core > MAX_CORE_INDEX {
                return Err(invalid(format!("core {} above {}", core, MAX_CORE_INDEX)));
            }
            Ok(core)
        };

        let mut cores = Vec::new();
        for part in input.split(',') {
            if part.trim().is_empty() {
                return Err(invalid("empty element".into()));
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let (lo, hi) = (parse_core(lo)?, parse_core(hi)?);
                    if lo > hi {
                        return Err(invalid(format!("range {}-{} is reversed", lo, hi)));
                    }
                    cores.extend(lo..=hi);
                }
                None => cores.push(parse_core(part)?),
            }
        }

        cores.sort_unstable();
        cores.dedup();
        Ok(CoreList(cores))
    }
}

impl fmt::Display for CoreList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut i = 0;
        while i < self.0.len() {
            let start = self.0[i];
            let mut end = start;
            while i + 1 < self.0.len() && self.0[i + 1] == end + 1 {
                i += 1;
                end = self.0[i];
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
            i += 1;
        }
        Ok(())
    }
}
