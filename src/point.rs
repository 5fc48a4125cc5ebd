//! Metric point type and InfluxDB line protocol rendering

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// A single field value within a metric point
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::Boolean(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// One timestamped measurement, the atomic unit written to the store
#[derive(Debug, Clone)]
pub struct MetricPoint {
    /// Measurement name
    pub name: String,

    /// Tag set (indexed key/value metadata)
    pub tags: BTreeMap<String, String>,

    /// Field set; must be non-empty for the point to be writable
    pub fields: BTreeMap<String, FieldValue>,

    /// Collection timestamp
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a new point with no tags or fields
    pub fn new(name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// A point is writable when it has a measurement name and at least one field
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.fields.is_empty()
    }

    /// Render this point as one InfluxDB line protocol entry (no trailing newline)
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::with_capacity(64);
        line.push_str(&escape_measurement(&self.name));

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_string());
        }

        line.push(' ');
        // Nanosecond precision; chrono can represent this range until the year 2262
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis() * 1_000_000);
        line.push_str(&nanos.to_string());

        line
    }
}

/// Render a batch of points as a line protocol request body
pub fn batch_to_line_protocol(points: &[MetricPoint]) -> String {
    let mut body = String::new();
    for point in points {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&point.to_line_protocol());
    }
    body
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_line_protocol_basic() {
        let point = MetricPoint::new("cpu", ts())
            .with_tag("host", "web01")
            .with_field("cpu0", 42.5)
            .with_field("interrupts", 120i64);

        assert_eq!(
            point.to_line_protocol(),
            format!("cpu,host=web01 cpu0=42.5,interrupts=120i {}", ts().timestamp_nanos_opt().unwrap())
        );
    }

    #[test]
    fn test_line_protocol_escaping() {
        let point = MetricPoint::new("disk usage", ts())
            .with_tag("mount point", "/var=data")
            .with_field("used", 10i64)
            .with_field("label", "root, primary");

        let line = point.to_line_protocol();
        assert!(line.starts_with("disk\\ usage,mount\\ point=/var\\=data "));
        assert!(line.contains("label=\"root, primary\""));
        assert!(line.contains("used=10i"));
    }

    #[test]
    fn test_field_value_rendering() {
        assert_eq!(FieldValue::Float(1.25).to_string(), "1.25");
        assert_eq!(FieldValue::Integer(-3).to_string(), "-3i");
        assert_eq!(FieldValue::Boolean(true).to_string(), "true");
        assert_eq!(FieldValue::Text("a\"b".into()).to_string(), "\"a\\\"b\"");
    }

    #[test]
    fn test_validity() {
        let empty = MetricPoint::new("cpu", ts());
        assert!(!empty.is_valid());
        assert!(empty.with_field("value", 1.0).is_valid());
        assert!(!MetricPoint::new("", ts()).with_field("value", 1.0).is_valid());
    }

    #[test]
    fn test_batch_rendering() {
        let a = MetricPoint::new("a", ts()).with_field("v", 1i64);
        let b = MetricPoint::new("b", ts()).with_field("v", 2i64);
        let body = batch_to_line_protocol(&[a, b]);
        assert_eq!(body.lines().count(), 2);
    }
}
