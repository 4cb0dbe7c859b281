use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, trace, warn};

use super::chain::HandlerChain;
use super::pool::TaskPool;
use crate::message::{Message, RawMessage};

/// Hands decoded messages to the chain of their route
pub struct Router {
    pool: TaskPool,
    chains: HashMap<String, Arc<HandlerChain>>,
}

impl Router {
    pub fn new(pool: TaskPool, chains: impl IntoIterator<Item = HandlerChain>) -> Self {
        let chains = chains
            .into_iter()
            .map(|chain| (chain.route().to_string(), Arc::new(chain)))
            .collect();
        Self { pool, chains }
    }

    pub fn has_route(&self, route: &str) -> bool {
        self.chains.contains_key(route)
    }

    pub fn routes(&self) -> Vec<&str> {
        let mut routes: Vec<_> = self.chains.keys().map(String::as_str).collect();
        routes.sort_unstable();
        routes
    }

    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Decode `raw` and schedule it on the chain of `route`.
    ///
    /// Returns as soon as the work is handed to the pool; waits only while
    /// the pool is saturated. Malformed messages and unknown routes are
    /// logged and dropped.
    pub async fn submit(&self, route: &str, raw: RawMessage) -> Option<JoinHandle<()>> {
        let Some(chain) = self.chains.get(route).cloned() else {
            warn!("no handler chain for route '{route}', dropping message");
            return None;
        };

        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(route, "dropping malformed message: {e}");
                return None;
            }
        };
        trace!(route, "submitting {}", message.event_type);

        match self
            .pool
            .spawn(async move {
                chain.process(&message).await;
            })
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("task pool is closed: {e}");
                None
            }
        }
    }

    /// Wait until every submitted message went through its chain
    pub async fn wait_idle(&self) {
        if let Err(e) = self.pool.wait_idle().await {
            error!("task pool is closed: {e}");
        }
    }
}
