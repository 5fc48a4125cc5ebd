//! User-defined metrics from an external command
//!
//! The command prints a JSON object (or array of objects) on stdout. Each
//! object names its `measurement`, may carry a `tags` object, and every other
//! entry becomes a field:
//!
//! ```json
//! {"measurement": "backups", "tags": {"job": "nightly"}, "age_hours": 7.5, "ok": true}
//! ```

use chrono::{DateTime, Utc};
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::ModuleDescriptor;
use crate::error::{AgentError, Result};
use crate::module::{MetricModule, parse_options};
use crate::point::{FieldValue, MetricPoint};

#[derive(Debug, Deserialize, Default)]
struct ExecOptions {
    /// Program to run; required
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    /// Fallback measurement for objects that do not name their own
    #[serde(default)]
    measurement: Option<String>,
}

pub struct ExecModule {
    name: String,
    command: String,
    args: Vec<String>,
    measurement: Option<String>,
    budget: Duration,
}

impl ExecModule {
    pub fn new(descriptor: &ModuleDescriptor) -> Result<Self> {
        let options: ExecOptions = parse_options(descriptor)?;
        let command = options.command.ok_or_else(|| {
            AgentError::Config(format!(
                "Module '{}' requires a 'command' option",
                descriptor.name
            ))
        })?;

        Ok(Self {
            name: descriptor.name.clone(),
            command,
            args: options.args,
            measurement: options.measurement,
            budget: descriptor.timeout(),
        })
    }

    fn parse_output(&self, output: &str, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        let value: Value = serde_json::from_str(output).map_err(|e| {
            AgentError::Collection(format!(
                "Module '{}': command output is not valid JSON: {}",
                self.name, e
            ))
        })?;

        let objects = match value {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(AgentError::Collection(format!(
                    "Module '{}': expected a JSON object or array, got {}",
                    self.name, other
                )));
            }
        };

        let mut points = Vec::new();
        for object in objects {
            if let Some(point) = self.object_to_point(object, now)? {
                points.push(point);
            }
        }
        Ok(points)
    }

    fn object_to_point(&self, object: Value, now: DateTime<Utc>) -> Result<Option<MetricPoint>> {
        let Value::Object(entries) = object else {
            return Err(AgentError::Collection(format!(
                "Module '{}': array entries must be JSON objects",
                self.name
            )));
        };

        let measurement = entries
            .get("measurement")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.measurement.clone());
        let Some(measurement) = measurement else {
            // Matches the plugin contract: output without a measurement is ignored
            debug!("Module '{}': object without a measurement ignored", self.name);
            return Ok(None);
        };

        let mut point = MetricPoint::new(measurement, now);
        for (key, value) in entries {
            match (key.as_str(), value) {
                ("measurement", _) => {}
                ("tags", Value::Object(tags)) => {
                    for (tag, tag_value) in tags {
                        if let Value::String(s) = tag_value {
                            point.tags.insert(tag, s);
                        }
                    }
                }
                ("tags", _) => {
                    return Err(AgentError::Collection(format!(
                        "Module '{}': 'tags' must be a JSON object of strings",
                        self.name
                    )));
                }
                (_, value) => {
                    if let Some(field) = json_to_field(value) {
                        point.fields.insert(key, field);
                    }
                }
            }
        }

        if point.fields.is_empty() {
            debug!("Module '{}': object with no fields ignored", self.name);
            return Ok(None);
        }
        Ok(Some(point))
    }
}

fn json_to_field(value: Value) -> Option<FieldValue> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        Value::Bool(b) => Some(FieldValue::Boolean(b)),
        Value::String(s) => Some(FieldValue::Text(s)),
        _ => None,
    }
}

#[async_trait::async_trait]
impl MetricModule for ExecModule {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&mut self, now: DateTime<Utc>) -> Result<Vec<MetricPoint>> {
        let output = crate::util::command::run_command(&self.command, &self.args, self.budget).await?;
        self.parse_output(&output, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn module(measurement: Option<&str>) -> ExecModule {
        ExecModule {
            name: "custom".to_string(),
            command: "true".to_string(),
            args: Vec::new(),
            measurement: measurement.map(str::to_string),
            budget: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_missing_command_is_config_error() {
        let descriptor = ModuleDescriptor {
            name: "custom".to_string(),
            module: Some("exec".to_string()),
            interval_secs: 10,
            enabled: true,
            timeout_secs: None,
            options: HashMap::new(),
        };
        assert!(matches!(
            ExecModule::new(&descriptor),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_parse_single_object() {
        let now = Utc::now();
        let points = module(None)
            .parse_output(r#"{"measurement": "dummy", "times_called": 3, "ok": true}"#, now)
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].name, "dummy");
        assert_eq!(points[0].fields.get("times_called"), Some(&FieldValue::Integer(3)));
        assert_eq!(points[0].fields.get("ok"), Some(&FieldValue::Boolean(true)));
    }

    #[test]
    fn test_parse_array_with_tags() {
        let output = r#"[
            {"measurement": "queue", "tags": {"queue": "mail"}, "depth": 4},
            {"measurement": "queue", "tags": {"queue": "web"}, "depth": 0.5}
        ]"#;
        let points = module(None).parse_output(output, Utc::now()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].tags.get("queue").map(String::as_str), Some("mail"));
        assert_eq!(points[1].fields.get("depth"), Some(&FieldValue::Float(0.5)));
    }

    #[test]
    fn test_object_without_measurement_ignored() {
        let points = module(None)
            .parse_output(r#"{"value": 1}"#, Utc::now())
            .unwrap();
        assert!(points.is_empty());
    }

    #[test]
    fn test_default_measurement_applies() {
        let points = module(Some("fallback"))
            .parse_output(r#"{"value": 1}"#, Utc::now())
            .unwrap();
        assert_eq!(points[0].name, "fallback");
    }

    #[test]
    fn test_invalid_json_is_collection_error() {
        let err = module(None).parse_output("not json", Utc::now()).unwrap_err();
        assert!(matches!(err, AgentError::Collection(_)));
    }
}
