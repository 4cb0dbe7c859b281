use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use super::checker::ServiceIdentity;
use super::state::ProbeOutcome;

const METRIC_NAME: &str = "service_status";

/// Receives one data point per probe
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn push(
        &self,
        service: &ServiceIdentity,
        outcome: ProbeOutcome,
        response_time: Duration,
    ) -> anyhow::Result<()>;
}

/// Writes data points to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn push(
        &self,
        service: &ServiceIdentity,
        outcome: ProbeOutcome,
        response_time: Duration,
    ) -> anyhow::Result<()> {
        info!(
            target: "metrics",
            metric = METRIC_NAME,
            value = outcome.metric_value(),
            service = %service,
            response_time_ms = response_time.as_millis() as u64,
            "probe result"
        );
        Ok(())
    }
}

/// POSTs data points as JSON to a collector endpoint
#[derive(Debug, Clone)]
pub struct HttpMetricsSink {
    client: Client,
    url: String,
}

impl HttpMetricsSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetricsSink for HttpMetricsSink {
    async fn push(
        &self,
        service: &ServiceIdentity,
        outcome: ProbeOutcome,
        response_time: Duration,
    ) -> anyhow::Result<()> {
        let payload = json!({
            "metric": METRIC_NAME,
            "value": outcome.metric_value(),
            "dimension": {
                "service": format!("{}:{}", service.hostname, service.binary),
            },
            "hostname": service.hostname,
            "binary": service.binary,
            "response_time": response_time.as_secs_f64(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
