//! InfluxDB 1.x HTTP sink using the line protocol

use async_trait::async_trait;
use log::trace;
use reqwest::StatusCode;

use crate::config::InfluxConfig;
use crate::error::{AgentError, Result};
use crate::point::{MetricPoint, batch_to_line_protocol};
use crate::sink::MetricSink;

pub struct InfluxSink {
    client: reqwest::Client,
    config: InfluxConfig,
    write_url: String,
    ping_url: String,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.write_timeout())
            .build()
            .map_err(|e| AgentError::Init(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            write_url: format!("{}/write", config.base_url()),
            ping_url: format!("{}/ping", config.base_url()),
            config: config.clone(),
        })
    }

    fn authenticated(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.username {
            Some(username) => request.basic_auth(username, self.config.password.as_deref()),
            None => request,
        }
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn write_points(&self, points: &[MetricPoint]) -> Result<()> {
        let body = batch_to_line_protocol(points);
        trace!("Writing {} points to {}", points.len(), self.write_url);

        let request = self
            .client
            .post(&self.write_url)
            .query(&[
                ("db", self.config.database.as_str()),
                ("precision", "ns"),
            ])
            .body(body);

        let response = self
            .authenticated(request)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        Err(classify_status(status, &detail))
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .authenticated(self.client.get(&self.ping_url))
            .send()
            .await
            .map_err(classify_request_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::WriteTransient(format!(
                "Ping returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}

fn classify_request_error(error: reqwest::Error) -> AgentError {
    if error.is_timeout() {
        AgentError::Timeout(format!("Write attempt timed out: {}", error))
    } else {
        AgentError::WriteTransient(error.to_string())
    }
}

/// 4xx means the server understood and rejected the payload; retry cannot
/// change that. Everything else is worth retrying, including 429.
fn classify_status(status: StatusCode, detail: &str) -> AgentError {
    let message = if detail.is_empty() {
        format!("Server returned {}", status)
    } else {
        format!("Server returned {}: {}", status, detail.trim())
    };

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        AgentError::WriteTransient(message)
    } else {
        AgentError::WriteFatal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> InfluxConfig {
        InfluxConfig {
            host: "influx.example.net".to_string(),
            port: 8086,
            database: "system_stats".to_string(),
            username: Some("agent".to_string()),
            password: Some("secret".to_string()),
            https: false,
            timeout_secs: 10,
        }
    }

    #[test]
    fn test_urls() {
        let sink = InfluxSink::new(&config()).unwrap();
        assert_eq!(sink.write_url, "http://influx.example.net:8086/write");
        assert_eq!(sink.ping_url, "http://influx.example.net:8086/ping");
    }

    #[test]
    fn test_https_base_url() {
        let mut config = config();
        config.https = true;
        assert_eq!(config.base_url(), "https://influx.example.net:8086");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "partial write: field type conflict"),
            AgentError::WriteFatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            AgentError::WriteFatal(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, ""),
            AgentError::WriteTransient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            AgentError::WriteTransient(_)
        ));
    }
}
