//! NVIDIA GPU utilisation, memory and temperature via nvidia-smi

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::MetricModule;
use crate::point::MetricPoint;
use crate::util::command::run_command;

const QUERY_FIELDS: &str = "index,utilization.gpu,memory.used,memory.total,temperature.gpu";
const MIB: i64 = 1024 * 1024;

pub struct GpuModule {
    name: String,
    budget: Duration,
}

impl GpuModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        // Probe at construction so a machine without NVIDIA hardware disables
        // the module once instead of failing every cycle
        let probe = std::process::Command::new("nvidia-smi")
            .arg("-L")
            .output()
            .map_err(|e| {
                AgentError::Init(format!(
                    "Module '{}': nvidia-smi unavailable: {}",
                    descriptor.name, e
                ))
            })?;
        if !probe.status.success() {
            return Err(AgentError::Init(format!(
                "Module '{}': nvidia-smi reported no usable GPU",
                descriptor.name
            )));
        }

        Ok(Self {
            name: descriptor.name.clone(),
            budget: descriptor.timeout(),
        })
    }
}

#[async_trait::async_trait]
impl MetricModule for GpuModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        let args = vec![
            format!("--query-gpu={}", QUERY_FIELDS),
            "--format=csv,noheader,nounits".to_string(),
        ];
        let output = run_command("nvidia-smi", &args, self.budget).await?;
        parse_query_output(&output, now)
    }
}

fn parse_query_output(output: &str, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
    let mut points = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        if columns.len() != 5 {
            return Err(AgentError::Collection(format!(
                "Unexpected nvidia-smi output: '{}'",
                line
            )));
        }

        let parse_f64 = |v: &str| {
            v.parse::<f64>().map_err(|_| {
                AgentError::Collection(format!("Unexpected nvidia-smi value: '{}'", v))
            })
        };

        points.push(
            MetricPoint::new("gpu", now)
                .with_tag("gpu", columns[0])
                .with_field("utilization", parse_f64(columns[1])?)
                .with_field("memory_used", (parse_f64(columns[2])? as i64) * MIB)
                .with_field("memory_total", (parse_f64(columns[3])? as i64) * MIB)
                .with_field("temperature", parse_f64(columns[4])?),
        );
    }

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_output() {
        let output = "0, 42, 1024, 8192, 65\n1, 7, 256, 8192, 41\n";
        let points = parse_query_output(output, Utc::now()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].tags.get("gpu").map(String::as_str), Some("0"));
        assert_eq!(
            points[0].fields.get("memory_used"),
            Some(&crate::point::FieldValue::Integer(1024 * MIB))
        );
        assert_eq!(
            points[1].fields.get("utilization"),
            Some(&crate::point::FieldValue::Float(7.0))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_line() {
        assert!(parse_query_output("not,csv", Utc::now()).is_err());
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_query_output("", Utc::now()).unwrap().is_empty());
    }
}
