//! Network IO rates aggregated over non-loopback interfaces

use chrono::{DateTime, Utc};
use std::time::Instant;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::MetricModule;
use crate::point::MetricPoint;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct NetIoCounters {
    rx_bytes: u64,
    rx_packets: u64,
    tx_bytes: u64,
    tx_packets: u64,
}

pub struct NetIoModule {
    name: String,
    prev: NetIoCounters,
    last_sample: Instant,
}

impl NetIoModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        let prev = read_counters().map_err(|e| {
            AgentError::Init(format!(
                "Module '{}': network IO counters unavailable: {}",
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
impl MetricModule for NetIoModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        let current = read_counters()
            .map_err(|e| AgentError::Collection(format!("Module '{}': {}", self.name, e)))?;
        let elapsed = self.last_sample.elapsed().as_secs_f64().max(0.001);
        self.last_sample = Instant::now();

        let rate = |current: u64, prev: u64| (current.saturating_sub(prev) as f64 / elapsed).round() as i64;
        let point = MetricPoint::new("netio", now)
            .with_field("rx_bytes", rate(current.rx_bytes, self.prev.rx_bytes))
            .with_field("tx_bytes", rate(current.tx_bytes, self.prev.tx_bytes))
            .with_field("rx_packets", rate(current.rx_packets, self.prev.rx_packets))
            .with_field("tx_packets", rate(current.tx_packets, self.prev.tx_packets));

        self.prev = current;
        Ok(vec![point])
    }
}

fn read_counters() -> std::io::Result<NetIoCounters> {
    Ok(parse_net_dev(&std::fs::read_to_string("/proc/net/dev")?))
}

fn parse_net_dev(contents: &str) -> NetIoCounters {
    let mut counters = NetIoCounters::default();

    for line in contents.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }

        let fields: Vec<u64> = rest
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        // rx: bytes packets errs drop fifo frame compressed multicast, then tx
        if fields.len() < 10 {
            continue;
        }
        counters.rx_bytes += fields[0];
        counters.rx_packets += fields[1];
        counters.tx_bytes += fields[8];
        counters.tx_packets += fields[9];
    }

    counters
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  999999    9999    0    0    0     0          0         0   999999    9999    0    0    0     0       0          0
  eth0: 1000000   10000    0    0    0     0          0         0  2000000   15000    0    0    0     0       0          0
 wlan0:  500000    5000    0    0    0     0          0         0   250000    2500    0    0    0     0       0          0
";

    #[test]
    fn test_parse_net_dev_sums_and_skips_loopback() {
        let counters = parse_net_dev(SAMPLE);
        assert_eq!(counters.rx_bytes, 1_500_000);
        assert_eq!(counters.rx_packets, 15_000);
        assert_eq!(counters.tx_bytes, 2_250_000);
        assert_eq!(counters.tx_packets, 17_500);
    }

    #[test]
    fn test_parse_net_dev_empty() {
        assert_eq!(parse_net_dev(""), NetIoCounters::default());
    }
}
