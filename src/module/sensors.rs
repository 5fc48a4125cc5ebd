//! CPU temperature from hardware sensors

use chrono::{DateTime, Utc};
use log::info;
use sysinfo::Components;

use crate::config::ModuleDescriptor;
use crate::error::Result;
use crate::module::MetricModule;
use crate::point::MetricPoint;

pub struct SensorsModule {
    name: String,
    components: Components,
    /// "no sensor" is reported once, not every cycle
    missing_reported: bool,
}

impl SensorsModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        Ok(Self {
            name: descriptor.name.clone(),
            components: Components::new_with_refreshed_list(),
            missing_reported: false,
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for SensorsModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        self.components.refresh();

        match cpu_temperature(&self.components) {
            Some(temperature) => Ok(vec![
                MetricPoint::new("sensors", now).with_field("cpu_temp", temperature as f64),
            ]),
            None => {
                if !self.missing_reported {
                    info!("CPU thermal sensor not found");
                    self.missing_reported = true;
                }
                Ok(Vec::new())
            }
        }
    }
}

/// Prefer the package-level sensor; otherwise any component that looks like a
/// CPU or SoC thermal zone
fn cpu_temperature(components: &Components) -> Option<f32> {
    if let Some(component) = components
        .iter()
        .find(|c| c.label().contains("Package id 0"))
    {
        return Some(component.temperature());
    }

    components
        .iter()
        .find(|c| {
            let label = c.label().to_lowercase();
            label.contains("cpu") || label.contains("coretemp") || label.contains("thermal")
        })
        .map(|c| c.temperature())
}
