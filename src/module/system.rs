//! Load averages, process count and uptime

use chrono::{DateTime, Utc};
use sysinfo::{ProcessRefreshKind, RefreshKind, System, UpdateKind};

use crate::config::ModuleDescriptor;
use crate::error::Result;
use crate::module::MetricModule;
use crate::point::MetricPoint;

pub struct SystemModule {
    name: String,
    system: System,
}

impl SystemModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        Ok(Self {
            name: descriptor.name.clone(),
            system: System::new_with_specifics(
                RefreshKind::new()
                    .with_processes(ProcessRefreshKind::new().with_exe(UpdateKind::Never)),
            ),
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for SystemModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        self.system.refresh_processes();

        let load = System::load_average();
        Ok(vec![
            MetricPoint::new("system", now)
                .with_field("load_1", load.one)
                .with_field("load_5", load.five)
                .with_field("load_15", load.fifteen)
                .with_field("processes", self.system.processes().len() as i64)
                .with_field("uptime", System::uptime() as i64),
        ])
    }
}
