use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::{FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Side channel re-publishing selected notifications to other systems
#[async_trait]
pub trait FanoutPublisher: Send + Sync {
    /// Publish `body` to the fanout `exchange`, expiring after `ttl` if set
    async fn fanout(&self, exchange: &str, body: &Value, ttl: Option<Duration>)
    -> anyhow::Result<()>;
}

/// AMQP fanout publisher with a lazily opened, reused channel
pub struct AmqpPublisher {
    uri: String,
    channel: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            channel: Mutex::new(None),
        }
    }

    async fn open_channel(&self) -> anyhow::Result<Channel> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .context("Connect to notifier broker failed")?;
        connection
            .create_channel()
            .await
            .context("Open notifier channel failed")
    }

    async fn publish_once(
        &self,
        exchange: &str,
        payload: &[u8],
        ttl: Option<Duration>,
    ) -> anyhow::Result<()> {
        let mut slot = self.channel.lock().await;
        let channel = match slot.as_ref() {
            Some(channel) if channel.status().connected() => channel.clone(),
            _ => {
                let channel = self.open_channel().await?;
                *slot = Some(channel.clone());
                channel
            }
        };

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut properties =
            BasicProperties::default().with_content_type(ShortString::from("application/json"));
        if let Some(ttl) = ttl {
            properties = properties.with_expiration(ShortString::from(ttl.as_millis().to_string()));
        }

        let publish = channel
            .basic_publish(exchange, "", BasicPublishOptions::default(), payload, properties)
            .await;
        if publish.is_err() {
            *slot = None;
        }
        publish?.await?;
        Ok(())
    }
}

#[async_trait]
impl FanoutPublisher for AmqpPublisher {
    #[instrument(skip(self, body))]
    async fn fanout(
        &self,
        exchange: &str,
        body: &Value,
        ttl: Option<Duration>,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(body)?;
        debug!("Notifying message to {exchange}");

        // one reconnect if the cached channel went stale
        if let Err(e) = self.publish_once(exchange, &payload, ttl).await {
            warn!("fanout to {exchange} failed, reconnecting: {e:#}");
            *self.channel.lock().await = None;
            self.publish_once(exchange, &payload, ttl).await?;
        }
        Ok(())
    }
}
