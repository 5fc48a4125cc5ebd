//! Disk space usage per configured mountpoint

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sysinfo::Disks;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::{MetricModule, parse_options};
use crate::point::MetricPoint;

#[derive(Debug, Deserialize)]
struct DiskOptions {
    #[serde(default = "default_mountpoints")]
    mountpoints: Vec<String>,
}

fn default_mountpoints() -> Vec<String> {
    vec!["/".to_string()]
}

impl Default for DiskOptions {
    fn default() -> Self {
        Self {
            mountpoints: default_mountpoints(),
        }
    }
}

pub struct DiskModule {
    name: String,
    mountpoints: Vec<String>,
    disks: Disks,
}

impl DiskModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        let options: DiskOptions = parse_options(descriptor)?;
        let mountpoints: Vec<String> = options
            .mountpoints
            .iter()
            .map(|m| normalise_mountpoint(m))
            .collect();

        let disks = Disks::new_with_refreshed_list();
        for mountpoint in &mountpoints {
            if !disks
                .iter()
                .any(|d| d.mount_point().to_string_lossy() == *mountpoint)
            {
                return Err(AgentError::Config(format!(
                    "Module '{}': invalid mountpoint '{}'",
                    descriptor.name, mountpoint
                )));
            }
        }

        Ok(Self {
            name: descriptor.name.clone(),
            mountpoints,
            disks,
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for DiskModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        self.disks.refresh();

        let mut point = MetricPoint::new("disk", now);
        for mountpoint in &self.mountpoints {
            let Some(disk) = self
                .disks
                .iter()
                .find(|d| d.mount_point().to_string_lossy() == *mountpoint)
            else {
                // Unmounted since startup; skip this cycle rather than fail
                continue;
            };

            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            let percent = if total == 0 {
                0.0
            } else {
                (used as f64 * 10_000.0 / total as f64).round() / 100.0
            };

            point = point
                .with_field(format!("{}_total", mountpoint), total as i64)
                .with_field(format!("{}_used", mountpoint), used as i64)
                .with_field(format!("{}_percent", mountpoint), percent);
        }

        if point.fields.is_empty() {
            return Err(AgentError::Collection(format!(
                "Module '{}': no configured mountpoint is currently mounted",
                self.name
            )));
        }
        Ok(vec![point])
    }
}

/// Trailing slash on a mountpoint is optional in config
fn normalise_mountpoint(mountpoint: &str) -> String {
    if mountpoint.len() > 1 && mountpoint.ends_with('/') {
        mountpoint[..mountpoint.len() - 1].to_string()
    } else {
        mountpoint.to_string()
    }
}
