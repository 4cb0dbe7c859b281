//! Alarm delivery backends
//!
//! A driver accepts a title, a content and a flat string context and tries to
//! deliver them once. Retrying is the driver's own business; the dispatcher
//! only logs a returned error and moves on to the next driver.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::AlarmContext;
use crate::config::Config;

pub mod discord;
pub mod email;
pub mod log;
pub mod webhook;

pub use discord::DiscordDriver;
pub use email::EmailDriver;
pub use log::LogDriver;
pub use webhook::WebhookDriver;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("invalid email: {0}")]
    Email(String),

    #[error("delivery failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: Box<DriverError>,
    },
}

#[async_trait]
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        title: &str,
        content: &str,
        context: &AlarmContext,
    ) -> Result<(), DriverError>;
}

type DriverFactory = fn(&Config) -> anyhow::Result<Arc<dyn Driver>>;

/// Driver name to constructor, resolved once at startup
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: DriverFactory) {
        self.factories.insert(name, factory);
    }

    /// Build the drivers named in `names`, keeping their order
    pub fn build(&self, names: &[String], config: &Config) -> anyhow::Result<Vec<Arc<dyn Driver>>> {
        names
            .iter()
            .map(|name| {
                let factory = self
                    .factories
                    .get(name.as_str())
                    .ok_or_else(|| anyhow::anyhow!("unknown alarm driver '{name}'"))?;
                factory(config)
            })
            .collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("log", |_| Ok(Arc::new(LogDriver)));
        registry.register("email", |config| {
            let email = config
                .alarm
                .email
                .clone()
                .ok_or_else(|| anyhow::anyhow!("email driver requires an 'alarm.email' section"))?;
            Ok(Arc::new(EmailDriver::new(email)))
        });
        registry.register("webhook", |config| {
            let webhook = config
                .alarm
                .webhook
                .clone()
                .ok_or_else(|| anyhow::anyhow!("webhook driver requires an 'alarm.webhook' section"))?;
            Ok(Arc::new(WebhookDriver::new(webhook)?))
        });
        registry.register("discord", |config| {
            let discord = config
                .alarm
                .discord
                .clone()
                .ok_or_else(|| anyhow::anyhow!("discord driver requires an 'alarm.discord' section"))?;
            Ok(Arc::new(DiscordDriver::new(discord, config.env_name.clone())?))
        });
        registry
    }
}
