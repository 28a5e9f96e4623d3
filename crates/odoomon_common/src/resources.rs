//! Host resource snapshot.
//!
//! CPU, memory, disk and load readings for the dev server the services
//! run on. Every field is best-effort: a failed probe yields None, never
//! an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total_mb: u64,
    pub available_mb: u64,
    pub used_mb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total_mb: u64,
    pub free_mb: u64,
    pub used_mb: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: Option<f32>,
    pub cpu_cores: u32,
    pub load_avg_1min: Option<f64>,
    pub memory: Option<MemoryUsage>,
    pub disk: Option<DiskUsage>,
}

/// Take one snapshot of host resources.
pub fn collect() -> ResourceSnapshot {
    ResourceSnapshot {
        timestamp: Utc::now(),
        cpu_percent: collect_cpu_percent(),
        cpu_cores: num_cpus::get() as u32,
        load_avg_1min: read_load_average(),
        memory: collect_memory(),
        disk: collect_root_disk(),
    }
}

fn collect_cpu_percent() -> Option<f32> {
    let mut sys = System::new();
    // Two samples are needed for a meaningful usage figure
    sys.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();

    if sys.cpus().is_empty() {
        debug!("No CPU information available");
        return None;
    }
    Some(sys.global_cpu_info().cpu_usage())
}

fn collect_memory() -> Option<MemoryUsage> {
    let mut sys = System::new();
    sys.refresh_memory();

    let total_mb = sys.total_memory() / 1024 / 1024;
    if total_mb == 0 {
        debug!("No memory information available");
        return None;
    }
    let available_mb = sys.available_memory() / 1024 / 1024;
    let used_mb = sys.used_memory() / 1024 / 1024;

    Some(MemoryUsage {
        total_mb,
        available_mb,
        used_mb,
        percent: (used_mb as f64 / total_mb as f64) * 100.0,
    })
}

fn collect_root_disk() -> Option<DiskUsage> {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))?;

    let total_mb = root.total_space() / 1024 / 1024;
    if total_mb == 0 {
        return None;
    }
    let free_mb = root.available_space() / 1024 / 1024;
    let used_mb = total_mb.saturating_sub(free_mb);

    Some(DiskUsage {
        total_mb,
        free_mb,
        used_mb,
        percent: (used_mb as f64 / total_mb as f64) * 100.0,
    })
}

fn read_load_average() -> Option<f64> {
    let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
    contents.split_whitespace().next()?.parse().ok()
}
