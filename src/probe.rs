//! System load sampling.
//!
//! [`LoadProbe`] is the seam between the scheduler and the OS. The default
//! [`SysinfoProbe`] takes a fresh reading on every call; CPU usage needs two
//! refreshes separated by [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`], so the
//! whole sample runs on the blocking pool and never stalls the runtime.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::error::{IndexError, Result};
use crate::models::SystemSample;

#[async_trait]
pub trait LoadProbe: Send + Sync {
    /// Take a fresh sample. May block briefly; implementations must not
    /// block the async runtime while doing so.
    async fn sample(&self) -> Result<SystemSample>;
}

/// Idle iff both readings are strictly below their thresholds.
pub fn is_idle(cpu_percent: f32, ram_percent: f32, cpu_threshold: f32, ram_threshold: f32) -> bool {
    cpu_percent < cpu_threshold && ram_percent < ram_threshold
}

/// Probe backed by the `sysinfo` crate.
pub struct SysinfoProbe {
    /// Mount point whose usage is reported as `disk_percent`.
    disk_mount: PathBuf,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            disk_mount: PathBuf::from("/"),
        }
    }

    /// Report disk usage for the volume containing `disk_mount`.
    pub fn with_disk_mount(disk_mount: impl Into<PathBuf>) -> Self {
        Self {
            disk_mount: disk_mount.into(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadProbe for SysinfoProbe {
    async fn sample(&self) -> Result<SystemSample> {
        let mount = self.disk_mount.clone();
        tokio::task::spawn_blocking(move || sample_blocking(&mount))
            .await
            .map_err(|e| IndexError::Io(std::io::Error::other(e)))
    }
}

fn sample_blocking(mount: &std::path::Path) -> SystemSample {
    let mut sys = System::new();
    sys.refresh_cpu();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    sys.refresh_memory();

    let cpu_percent = sys.global_cpu_info().cpu_usage();
    let ram_percent = percent(sys.used_memory(), sys.total_memory());

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disks
        .list()
        .iter()
        .filter(|d| mount.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| disk_used_percent(d.total_space(), d.available_space()))
        .unwrap_or(0.0);

    SystemSample {
        cpu_percent,
        ram_percent,
        disk_percent,
        timestamp: Utc::now(),
    }
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    (used.min(total) as f64 / total as f64 * 100.0) as f32
}

/// Some filesystems report more available space than their total.
fn disk_used_percent(total: u64, available: u64) -> f32 {
    percent(total.saturating_sub(available), total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_idle_strict() {
        assert!(is_idle(10.0, 20.0, 30.0, 50.0));
        assert!(!is_idle(30.0, 20.0, 30.0, 50.0));
        assert!(!is_idle(10.0, 50.0, 30.0, 50.0));
        assert!(!is_idle(31.0, 51.0, 30.0, 50.0));
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0.0);
        assert_eq!(percent(50, 200), 25.0);
        assert_eq!(percent(300, 200), 100.0);
    }

    #[test]
    fn test_disk_used_percent_never_underflows() {
        assert_eq!(disk_used_percent(200, 150), 25.0);
        assert_eq!(disk_used_percent(10, 20), 0.0);
        assert_eq!(disk_used_percent(0, 5), 0.0);
    }

    #[tokio::test]
    async fn test_sysinfo_sample_in_range() {
        let sample = SysinfoProbe::new().sample().await.unwrap();
        assert!((0.0..=100.0).contains(&sample.ram_percent));
        assert!(sample.cpu_percent >= 0.0);
    }

    #[tokio::test]
    async fn test_sysinfo_sample_for_data_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let sample = SysinfoProbe::with_disk_mount(tmp.path()).sample().await.unwrap();
        assert!((0.0..=100.0).contains(&sample.disk_percent));
    }
}
