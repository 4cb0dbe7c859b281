use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{info, instrument};

use super::{Driver, DriverError};
use crate::alarm::AlarmContext;
use crate::config::WebhookConfig;
use crate::util::retry_linear;

/// POSTs every alarm as JSON to a fixed URL
#[derive(Debug, Clone)]
pub struct WebhookDriver {
    client: Client,
    config: WebhookConfig,
}

impl WebhookDriver {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, config })
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<(), DriverError> {
        let response = self.client.post(&self.config.url).json(payload).send().await?;

        if !response.status().is_success() {
            return Err(DriverError::Status(response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for WebhookDriver {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, content, context))]
    async fn deliver(
        &self,
        title: &str,
        content: &str,
        context: &AlarmContext,
    ) -> Result<(), DriverError> {
        let payload = json!({
            "title": title,
            "content": content,
            "context": context,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let attempts = self.config.attempts;
        retry_linear(
            attempts,
            Duration::from_secs(self.config.retry_delay_secs),
            |_| self.post(&payload),
        )
        .await
        .map_err(|last| match attempts {
            0 | 1 => last,
            _ => DriverError::Exhausted {
                attempts,
                last: Box::new(last),
            },
        })?;

        info!("Successfully sent webhook alarm");
        Ok(())
    }
}
