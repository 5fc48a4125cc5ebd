//! Disk IO rates aggregated over physical devices

use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::MetricModule;
use crate::point::MetricPoint;

const SECTOR_SIZE: u64 = 512;

/// Aggregate counters across all physical block devices
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DiskIoCounters {
    reads: u64,
    read_bytes: u64,
    writes: u64,
    write_bytes: u64,
}

pub struct DiskIoModule {
    name: String,
    prev: DiskIoCounters,
    last_sample: Instant,
}

impl DiskIoModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        // Baseline sample so the first cycle already has a delta
        let prev = read_counters().map_err(|e| {
            AgentError::Init(format!(
                "Module '{}': disk IO counters unavailable: {}",
                descriptor.name, e
            ))
        })?;

        Ok(Self {
            name: descriptor.name.clone(),
            prev,
            last_sample: Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for DiskIoModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        let current = read_counters()
            .map_err(|e| AgentError::Collection(format!("Module '{}': {}", self.name, e)))?;
        let elapsed = self.last_sample.elapsed().as_secs_f64().max(0.001);
        self.last_sample = Instant::now();

        let rate = |current: u64, prev: u64| (current.saturating_sub(prev) as f64 / elapsed).round() as i64;
        let point = MetricPoint::new("diskio", now)
            .with_field("read_bytes", rate(current.read_bytes, self.prev.read_bytes))
            .with_field("write_bytes", rate(current.write_bytes, self.prev.write_bytes))
            .with_field("disk_reads", rate(current.reads, self.prev.reads))
            .with_field("disk_writes", rate(current.writes, self.prev.writes));

        self.prev = current;
        Ok(vec![point])
    }
}

fn read_counters() -> std::io::Result<DiskIoCounters> {
    Ok(parse_diskstats(&std::fs::read_to_string("/proc/diskstats")?))
}

fn parse_diskstats(contents: &str) -> DiskIoCounters {
    let mut counters = DiskIoCounters::default();

    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // major minor name reads _ sectors_read _ writes _ sectors_written ...
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if !is_physical_device(name) {
            continue;
        }

        let parse = |index: usize| fields.get(index).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        counters.reads += parse(3);
        counters.read_bytes += parse(5) * SECTOR_SIZE;
        counters.writes += parse(7);
        counters.write_bytes += parse(9) * SECTOR_SIZE;
    }

    counters
}

/// Whole physical devices only: virtual devices and partitions would double
/// count IO that the kernel already attributes to the parent device
fn is_physical_device(name: &str) -> bool {
    for prefix in ["loop", "ram", "zram", "dm-", "md", "sr", "fd"] {
        if name.starts_with(prefix) {
            return false;
        }
    }

    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        // nvme0n1p2 / mmcblk0p1 are partitions; nvme0n1 / mmcblk0 are not
        match name.rfind('p') {
            Some(index) if index > 0 => {
                let (head, tail) = name.split_at(index);
                !(tail.len() > 1
                    && tail[1..].chars().all(|c| c.is_ascii_digit())
                    && head.ends_with(|c: char| c.is_ascii_digit()))
            }
            _ => true,
        }
    } else {
        // sda1 is a partition of sda
        !name.ends_with(|c: char| c.is_ascii_digit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_device_filter() {
        assert!(is_physical_device("sda"));
        assert!(is_physical_device("vdb"));
        assert!(is_physical_device("nvme0n1"));
        assert!(is_physical_device("mmcblk0"));

        assert!(!is_physical_device("sda1"));
        assert!(!is_physical_device("nvme0n1p2"));
        assert!(!is_physical_device("mmcblk0p1"));
        assert!(!is_physical_device("loop3"));
        assert!(!is_physical_device("ram0"));
        assert!(!is_physical_device("dm-0"));
        assert!(!is_physical_device("md127"));
    }

    #[test]
    fn test_parse_diskstats() {
        let sample = "\
   8       0 sda 100 0 2048 50 200 0 4096 80 0 0 0
   8       1 sda1 90 0 2000 45 190 0 4000 75 0 0 0
   7       0 loop0 5 0 40 1 0 0 0 0 0 0 0
 259       0 nvme0n1 10 0 512 5 20 0 1024 10 0 0 0
";
        let counters = parse_diskstats(sample);
        // sda + nvme0n1 only
        assert_eq!(counters.reads, 110);
        assert_eq!(counters.read_bytes, (2048 + 512) * SECTOR_SIZE);
        assert_eq!(counters.writes, 220);
        assert_eq!(counters.write_bytes, (4096 + 1024) * SECTOR_SIZE);
    }

    #[test]
    fn test_parse_diskstats_ignores_short_lines() {
        assert_eq!(parse_diskstats("8 0 sda\n"), DiskIoCounters::default());
    }
}
