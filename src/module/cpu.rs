//! CPU utilisation, frequency and kernel counter rates

use chrono::{DateTime, Utc};
use log::debug;
use std::time::Instant;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::config::ModuleDescriptor;
use crate::error::Result;
use crate::module::MetricModule;
use crate::point::MetricPoint;

/// Snapshot of the `/proc/stat` counters used for rate and share computation
#[derive(Debug, Clone, PartialEq)]
struct ProcStat {
    /// Aggregate cpu line jiffies: user, nice, system, idle, iowait, irq, softirq
    cpu_times: Vec<u64>,
    ctx_switches: u64,
    interrupts: u64,
}

pub struct CpuModule {
    name: String,
    system: System,
    /// Baseline for delta computation; None when /proc/stat is unavailable
    prev: Option<ProcStat>,
    last_sample: Instant,
}

impl CpuModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        let mut system = System::new_with_specifics(
            RefreshKind::new().with_cpu(CpuRefreshKind::everything()),
        );
        // First refresh establishes the usage baseline; sysinfo reports
        // utilisation relative to the previous refresh
        system.refresh_cpu();

        let prev = match read_proc_stat() {
            Ok(stat) => Some(stat),
            Err(e) => {
                debug!("CPU kernel counters unavailable: {}", e);
                None
            }
        };

        Ok(Self {
            name: descriptor.name.clone(),
            system,
            prev,
            last_sample: Instant::now(),
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for CpuModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        self.system.refresh_cpu();
        let elapsed = self.last_sample.elapsed().as_secs_f64().max(0.001);
        self.last_sample = Instant::now();

        let mut point = MetricPoint::new("cpu", now);
        for (index, cpu) in self.system.cpus().iter().enumerate() {
            point = point
                .with_field(format!("cpu{}", index), round2(cpu.cpu_usage() as f64))
                .with_field(
                    format!("cpu{}_freq", index),
                    (cpu.frequency() * 1_000_000) as i64,
                );
        }

        if let Ok(current) = read_proc_stat() {
            if let Some(prev) = self.prev.take() {
                let ctx_rate = current.ctx_switches.saturating_sub(prev.ctx_switches) as f64 / elapsed;
                let intr_rate = current.interrupts.saturating_sub(prev.interrupts) as f64 / elapsed;
                point = point
                    .with_field("ctx_switches", ctx_rate.round() as i64)
                    .with_field("interrupts", intr_rate.round() as i64);

                for (field, share) in time_shares(&prev.cpu_times, &current.cpu_times) {
                    point = point.with_field(field, share);
                }
            }
            self.prev = Some(current);
        }

        Ok(vec![point])
    }
}

const CPU_TIME_FIELDS: [&str; 7] = ["user", "nice", "system", "idle", "iowait", "irq", "softirq"];

/// Percentage of elapsed jiffies spent in each reported mode since `prev`
fn time_shares(prev: &[u64], current: &[u64]) -> Vec<(&'static str, f64)> {
    let total: u64 = current
        .iter()
        .zip(prev.iter())
        .map(|(c, p)| c.saturating_sub(*p))
        .sum();
    if total == 0 {
        return Vec::new();
    }

    CPU_TIME_FIELDS
        .iter()
        .enumerate()
        .filter(|(_, field)| !matches!(**field, "idle"))
        .filter_map(|(index, field)| {
            let c = current.get(index)?;
            let p = prev.get(index)?;
            Some((*field, round2(c.saturating_sub(*p) as f64 * 100.0 / total as f64)))
        })
        .collect()
}

fn read_proc_stat() -> std::io::Result<ProcStat> {
    parse_proc_stat(&std::fs::read_to_string("/proc/stat")?)
}

fn parse_proc_stat(contents: &str) -> std::io::Result<ProcStat> {
    let mut cpu_times = Vec::new();
    let mut ctx_switches = 0;
    let mut interrupts = 0;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("cpu") => {
                cpu_times = parts.take(7).filter_map(|v| v.parse().ok()).collect();
            }
            Some("ctxt") => {
                ctx_switches = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            Some("intr") => {
                interrupts = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            }
            _ => {}
        }
    }

    if cpu_times.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "no aggregate cpu line in /proc/stat",
        ));
    }

    Ok(ProcStat {
        cpu_times,
        ctx_switches,
        interrupts,
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
cpu  10000 200 3000 80000 500 100 50 0 0 0
cpu0 5000 100 1500 40000 250 50 25 0 0 0
intr 123456 0 1 2
ctxt 654321
btime 1700000000
processes 4242
";

    #[test]
    fn test_parse_proc_stat() {
        let stat = parse_proc_stat(SAMPLE).unwrap();
        assert_eq!(stat.cpu_times, vec![10000, 200, 3000, 80000, 500, 100, 50]);
        assert_eq!(stat.ctx_switches, 654321);
        assert_eq!(stat.interrupts, 123456);
    }

    #[test]
    fn test_parse_proc_stat_rejects_garbage() {
        assert!(parse_proc_stat("intr 5\nctxt 6\n").is_err());
    }

    #[test]
    fn test_time_shares() {
        let prev = vec![100, 0, 100, 700, 100, 0, 0];
        // 1000 jiffies elapsed: 50% user, 30% system, 10% iowait, 10% idle
        let current = vec![600, 0, 400, 800, 200, 0, 0];
        let shares = time_shares(&prev, &current);

        let get = |name: &str| shares.iter().find(|(f, _)| *f == name).map(|(_, v)| *v);
        assert_eq!(get("user"), Some(50.0));
        assert_eq!(get("system"), Some(30.0));
        assert_eq!(get("iowait"), Some(10.0));
        // idle is tracked for the total but never emitted
        assert_eq!(get("idle"), None);
    }

    #[test]
    fn test_time_shares_no_elapsed_time() {
        let times = vec![100, 0, 100, 700, 100, 0, 0];
        assert!(time_shares(&times, &times).is_empty());
    }
}
