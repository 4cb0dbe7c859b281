use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use super::chain::{Handler, HandlerChain};
use super::handlers::{BiLogHandler, EventStoreHandler, LogErrorHandler, NotifierHandler};
use crate::alarm::AlarmDispatcher;
use crate::bi::Correlator;
use crate::bus::FanoutPublisher;
use crate::config::NotifierConfig;
use crate::storage::StorageBackend;

/// Shared state handlers are built from
#[derive(Clone)]
pub struct HandlerDeps {
    pub env_name: String,
    pub storage: Arc<dyn StorageBackend>,
    pub dispatcher: Arc<AlarmDispatcher>,

    /// Absent when BI correlation is disabled
    pub correlator: Option<Arc<Correlator>>,

    /// Absent when the notifier is disabled
    pub publisher: Option<Arc<dyn FanoutPublisher>>,
    pub notifier: NotifierConfig,
}

/// Builds one handler for the chain of `route`
type HandlerFactory = fn(&HandlerDeps, &str) -> anyhow::Result<Arc<dyn Handler>>;

/// Handler name to constructor, resolved once at startup
pub struct HandlerRegistry {
    factories: HashMap<&'static str, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &'static str, factory: HandlerFactory) {
        self.factories.insert(name, factory);
    }

    pub fn build_chain(
        &self,
        route: &str,
        names: &[String],
        deps: &HandlerDeps,
    ) -> anyhow::Result<HandlerChain> {
        let handlers = names
            .iter()
            .map(|name| {
                let factory = self
                    .factories
                    .get(name.as_str())
                    .ok_or_else(|| anyhow::anyhow!("unknown handler '{name}'"))?;
                factory(deps, route)
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .with_context(|| format!("invalid handler chain for route '{route}'"))?;

        debug!("Created handler chain '{route}': {names:?}");
        Ok(HandlerChain::new(route, handlers))
    }

    /// Build every configured chain; any unknown handler name is an error.
    pub fn build_chains(
        &self,
        chains: &HashMap<String, Vec<String>>,
        deps: &HandlerDeps,
    ) -> anyhow::Result<Vec<HandlerChain>> {
        chains
            .iter()
            .map(|(route, names)| self.build_chain(route, names, deps))
            .collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("event_store", |deps, route| {
            Ok(Arc::new(EventStoreHandler::new(route, deps.storage.clone())))
        });
        registry.register("log_error", |deps, _| {
            Ok(Arc::new(LogErrorHandler::new(
                deps.env_name.clone(),
                deps.storage.clone(),
                deps.dispatcher.clone(),
            )))
        });
        registry.register("notifier", |deps, _| {
            Ok(Arc::new(NotifierHandler::new(&deps.notifier, deps.publisher.clone())))
        });
        registry.register("bi_log", |deps, _| {
            let correlator = deps
                .correlator
                .clone()
                .ok_or_else(|| anyhow::anyhow!("bi_log handler requires 'bi.enabled'"))?;
            Ok(Arc::new(BiLogHandler::new(correlator)))
        });
        registry
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::alarm::{AlarmJudge, AlarmTimer};
    use crate::storage::MemoryBackend;

    fn deps() -> HandlerDeps {
        let judge = AlarmJudge::new(Duration::from_secs(600), AlarmTimer::default());
        HandlerDeps {
            env_name: "test".to_string(),
            storage: Arc::new(MemoryBackend::new()),
            dispatcher: Arc::new(AlarmDispatcher::new(judge, vec![])),
            correlator: None,
            publisher: None,
            notifier: NotifierConfig::default(),
        }
    }

    #[test]
    fn test_chain_keeps_configured_order() {
        let chain = HandlerRegistry::default()
            .build_chain(
                "nova",
                &["notifier".to_string(), "event_store".to_string()],
                &deps(),
            )
            .unwrap();

        assert_eq!(chain.route(), "nova");
        assert_eq!(chain.handler_names(), vec!["notifier", "event_store"]);
    }

    #[test]
    fn test_unknown_handler_fails_at_startup() {
        let result =
            HandlerRegistry::default().build_chain("nova", &["mysql".to_string()], &deps());

        assert!(result.is_err());
    }

    #[test]
    fn test_bi_log_requires_correlator() {
        let result =
            HandlerRegistry::default().build_chain("nova", &["bi_log".to_string()], &deps());

        assert!(result.is_err());
    }
}
