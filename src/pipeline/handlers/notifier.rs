use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::bus::FanoutPublisher;
use crate::config::NotifierConfig;
use crate::message::Message;
use crate::pipeline::chain::Handler;

/// Re-publishes selected events, stripped of their request context
pub struct NotifierHandler {
    event_types: HashSet<String>,
    exchange: String,
    ttl: Option<Duration>,
    publisher: Option<Arc<dyn FanoutPublisher>>,
}

impl NotifierHandler {
    /// Without a publisher the handler accepts and ignores everything.
    pub fn new(config: &NotifierConfig, publisher: Option<Arc<dyn FanoutPublisher>>) -> Self {
        Self {
            event_types: config.event_types.iter().cloned().collect(),
            exchange: config.exchange.clone(),
            ttl: config.ttl(),
            publisher,
        }
    }
}

#[async_trait]
impl Handler for NotifierHandler {
    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        let Some(publisher) = &self.publisher else {
            return Ok(());
        };
        if !self.event_types.contains(&message.event_type) {
            trace!("not notifying {}", message.event_type);
            return Ok(());
        }

        let body = message.to_json_without_context();
        debug!("Notifying message: {}", message.event_type);
        publisher.fanout(&self.exchange, &body, self.ttl).await
    }
}
