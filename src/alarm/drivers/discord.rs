use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument};

use super::{Driver, DriverError};
use crate::alarm::{AlarmContext, CONTEXT_KIND};
use crate::config::DiscordConfig;

const RED: u32 = 15158332;
const GREEN: u32 = 3066993;

/// Discord caps embed descriptions at 4096 characters
const MAX_DESCRIPTION: usize = 4000;

#[derive(Debug, Clone, Serialize)]
pub struct DiscordMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Posts alarms as embeds to a Discord webhook
#[derive(Debug, Clone)]
pub struct DiscordDriver {
    client: Client,
    config: DiscordConfig,
    env_name: String,
}

impl DiscordDriver {
    pub fn new(config: DiscordConfig, env_name: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config,
            env_name,
        })
    }

    pub fn build_message(&self, title: &str, content: &str, context: &AlarmContext) -> DiscordMessage {
        let recovered = context.get(CONTEXT_KIND).is_some_and(|kind| kind == "recovered");

        let description: String = content.chars().take(MAX_DESCRIPTION).collect();
        let embed = Embed {
            title: Some(format!("{} {title}", if recovered { "✅" } else { "🔥" })),
            description: Some(description),
            color: Some(if recovered { GREEN } else { RED }),
            fields: context
                .iter()
                .filter(|(name, _)| name.as_str() != CONTEXT_KIND)
                .map(|(name, value)| EmbedField {
                    name: name.clone(),
                    value: value.clone(),
                    inline: true,
                })
                .collect(),
            footer: Some(EmbedFooter {
                text: format!("stackwatch | {}", self.env_name),
            }),
            timestamp: Some(Utc::now().to_rfc3339()),
        };

        DiscordMessage {
            content: self.config.user_id.as_ref().map(|user_id| format!("<@{user_id}>")),
            embeds: vec![embed],
        }
    }
}

#[async_trait]
impl Driver for DiscordDriver {
    fn name(&self) -> &str {
        "discord"
    }

    #[instrument(skip(self, content, context))]
    async fn deliver(
        &self,
        title: &str,
        content: &str,
        context: &AlarmContext,
    ) -> Result<(), DriverError> {
        let message = self.build_message(title, content, context);

        let response = self.client.post(&self.config.url).json(&message).send().await?;
        if !response.status().is_success() {
            return Err(DriverError::Status(response.status()));
        }

        info!("Successfully sent discord alarm");
        Ok(())
    }
}
