use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, error};

use crate::message::Message;

/// One step of a handler chain
///
/// A handler may fail; the chain logs the error with the handler's name and
/// carries on with the next one.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// Ordered handlers every message of one route flows through
pub struct HandlerChain {
    route: String,
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new(route: impl Into<String>, handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self {
            route: route.into(),
            handlers,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }

    /// Run every handler once, first to last.
    ///
    /// Returns the names of the handlers that failed or panicked.
    pub async fn process(&self, message: &Message) -> Vec<String> {
        debug!(route = %self.route, "Processing message: {}", message.event_type);

        let mut failed = Vec::new();
        for handler in &self.handlers {
            match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        route = %self.route,
                        "{} process message error, skip it: {e:#}",
                        handler.name()
                    );
                    failed.push(handler.name().to_string());
                }
                Err(_) => {
                    error!(
                        route = %self.route,
                        "{} panicked while processing {}, skip it",
                        handler.name(),
                        message.event_type
                    );
                    failed.push(handler.name().to_string());
                }
            }
        }
        failed
    }
}
