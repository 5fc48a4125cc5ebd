//! Memory usage in absolute bytes and percent

use chrono::{DateTime, Utc};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

use crate::config::ModuleDescriptor;
use crate::error::Result;
use crate::module::MetricModule;
use crate::point::MetricPoint;

pub struct MemoryModule {
    name: String,
    system: System,
}

impl MemoryModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        Ok(Self {
            name: descriptor.name.clone(),
            system: System::new_with_specifics(
                RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
            ),
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for MemoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        // "used" counts what is unavailable to applications, not just
        // unallocated pages
        let used = total.saturating_sub(self.system.available_memory());
        let percent = if total == 0 {
            0.0
        } else {
            (used as f64 * 10_000.0 / total as f64).round() / 100.0
        };

        Ok(vec![
            MetricPoint::new("memory", now)
                .with_field("total", total as i64)
                .with_field("used", used as i64)
                .with_field("percent", percent),
        ])
    }
}
