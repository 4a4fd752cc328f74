//! `burstcap check`: can this host capture?

use crate::output::OutputFormat;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct HugePages {
    pub total: u64,
    pub free: u64,
    pub size_kb: u64,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    privileged: bool,
    af_packet_backend: bool,
    hugepages: Option<HugePages>,
    interfaces: Vec<String>,
}

pub fn execute(format: OutputFormat) -> Result<()> {
    let report = CheckReport {
        privileged: is_privileged(),
        af_packet_backend: cfg!(all(target_os = "linux", feature = "af_packet")),
        hugepages: std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|content| parse_meminfo(&content)),
        interfaces: list_interfaces(),
    };

    if !report.privileged {
        tracing::warn!("not running as root; raw capture needs CAP_NET_RAW");
    }
    if report.hugepages.as_ref().map_or(true, |h| h.total == 0) {
        tracing::info!("no huge pages reserved; pool memory uses regular pages");
    }

    format.print(&report)
}

#[cfg(target_os = "linux")]
fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(target_os = "linux"))]
fn is_privileged() -> bool {
    false
}

fn list_interfaces() -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir("/sys/class/net")
        .map(|dir| {
            dir.filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// HugePages_Total / HugePages_Free / Hugepagesize from /proc/meminfo
pub fn parse_meminfo(content: &str) -> Option<HugePages> {
    let mut pages = HugePages::default();
    let mut found = false;
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else { continue };
        let value = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        let Some(value) = value else { continue };
        match key.trim() {
            "HugePages_Total" => pages.total = value,
            "HugePages_Free" => pages.free = value,
            "Hugepagesize" => pages.size_kb = value,
            _ => continue,
        }
        found = true;
    }
    found.then_some(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16318412 kB
HugePages_Total:    1024
HugePages_Free:      512
HugePages_Rsvd:        0
Hugepagesize:       2048 kB
";
        let pages = parse_meminfo(content).unwrap();
        assert_eq!(pages, HugePages { total: 1024, free: 512, size_kb: 2048 });
    }

    #[test]
    fn test_parse_meminfo_without_hugepages() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_none());
        assert!(parse_meminfo("").is_none());
    }
}
