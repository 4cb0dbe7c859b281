//! Engine context
//!
//! Everything shared at runtime is built here once, from the [`Config`], and
//! handed to the components that need it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmDispatcher, AlarmJudge, AlarmTimer, DriverRegistry};
use crate::bi::{Correlator, default_taggers};
use crate::bus::{AmqpPublisher, BusConsumer, ConsumerHandle, FanoutPublisher, amqp_uri};
use crate::config::Config;
use crate::monitor::{
    DiscoveryHandle, DiscoverySettings, HttpHealthChecker, HttpMetricsSink, LogMetricsSink,
    MetricsSink, ProberContext, RabbitManagementClient, RuleTable, ServiceDiscovery,
};
use crate::pipeline::handlers::bi_log_callback;
use crate::pipeline::{HandlerDeps, HandlerRegistry, Router, TaskPool};
use crate::storage::{MemoryBackend, StorageBackend};
use crate::util::{get_rabbit_password, get_smtp_password};

/// Replace secrets with their environment overrides, if set
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(password) = get_rabbit_password() {
        debug!("using bus password from environment");
        config.bus.password = password;
    }
    if let Some(password) = get_smtp_password() {
        match config.alarm.email.as_mut() {
            Some(email) => email.password = password,
            None => warn!("SMTP password set but no email driver configured"),
        }
    }
}

pub struct Engine {
    config: Config,
    storage: Arc<dyn StorageBackend>,
    dispatcher: Arc<AlarmDispatcher>,
    correlator: Option<Arc<Correlator>>,
    router: Arc<Router>,
}

impl Engine {
    /// Build the engine on the in-memory storage backend
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        Self::with_storage(config, Arc::new(MemoryBackend::new()))
    }

    pub fn with_storage(config: Config, storage: Arc<dyn StorageBackend>) -> anyhow::Result<Self> {
        let drivers = DriverRegistry::default()
            .build(&config.alarm.drivers, &config)
            .context("Invalid alarm driver configuration")?;
        let judge = AlarmJudge::new(
            config.alarm.quiet_period(),
            AlarmTimer::new(config.alarm.timer_retention_factor),
        );
        let dispatcher = Arc::new(AlarmDispatcher::new(judge, drivers));
        info!("alarm drivers: {:?}", dispatcher.driver_names());

        let correlator = if config.bi.enabled {
            Some(Arc::new(Correlator::new(
                default_taggers(),
                Duration::from_secs(config.bi.max_age_seconds),
                Duration::from_secs(config.bi.cleanup_interval_seconds),
                bi_log_callback(config.env_name.clone()),
            )?))
        } else {
            None
        };

        let publisher = config.notifier.enabled.then(|| {
            let host = config
                .notifier
                .host
                .clone()
                .or_else(|| config.bus.hosts.first().cloned())
                .unwrap_or_default();
            let uri = amqp_uri(
                &host,
                &config.bus.userid,
                &config.bus.password,
                &config.bus.virtual_host,
            );
            Arc::new(AmqpPublisher::new(uri)) as Arc<dyn FanoutPublisher>
        });

        let deps = HandlerDeps {
            env_name: config.env_name.clone(),
            storage: storage.clone(),
            dispatcher: dispatcher.clone(),
            correlator: correlator.clone(),
            publisher,
            notifier: config.notifier.clone(),
        };
        let chains = HandlerRegistry::default().build_chains(&config.chains, &deps)?;
        let router = Arc::new(Router::new(TaskPool::new(config.pipeline.pool_size), chains));

        Ok(Self {
            config,
            storage,
            dispatcher,
            correlator,
            router,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Arc<AlarmDispatcher> {
        &self.dispatcher
    }

    pub fn correlator(&self) -> Option<&Arc<Correlator>> {
        self.correlator.as_ref()
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The discovery loop, if service monitoring is enabled
    pub fn discovery(&self) -> anyhow::Result<Option<ServiceDiscovery>> {
        let monitor = &self.config.monitor;
        if !monitor.enabled {
            return Ok(None);
        }

        for (name, value) in [
            ("refresh_interval", monitor.refresh_interval),
            ("prober_interval", monitor.prober_interval),
            ("cleanup_interval", monitor.cleanup_interval),
            ("probe_timeout", monitor.probe_timeout),
        ] {
            if value == 0 {
                anyhow::bail!("monitor.{name} must be at least one second");
            }
        }

        let checker = HttpHealthChecker::new(
            monitor.checks.clone(),
            Duration::from_secs(monitor.probe_timeout),
        )?;
        let metrics: Arc<dyn MetricsSink> = match &self.config.metrics.url {
            Some(url) => Arc::new(HttpMetricsSink::new(
                url.clone(),
                Duration::from_secs(self.config.metrics.timeout_secs),
            )?),
            None => Arc::new(LogMetricsSink),
        };

        let management = &self.config.management;
        let management = RabbitManagementClient::for_hosts(
            &self.config.bus.hosts,
            management.port,
            management.userid.as_deref().unwrap_or(&self.config.bus.userid),
            management.password.as_deref().unwrap_or(&self.config.bus.password),
        )?;
        let rules = RuleTable::from_config(&monitor.rules)?;

        let ctx = Arc::new(ProberContext {
            checker: Arc::new(checker),
            storage: self.storage.clone(),
            dispatcher: self.dispatcher.clone(),
            metrics,
            env_name: self.config.env_name.clone(),
            interval: Duration::from_secs(monitor.prober_interval),
            probe_timeout: Duration::from_secs(monitor.probe_timeout),
            jitter: Duration::from_millis(monitor.jitter_ms),
        });
        let settings = DiscoverySettings {
            refresh_interval: Duration::from_secs(monitor.refresh_interval),
            cleanup_interval: Duration::from_secs(monitor.cleanup_interval),
            status_expired_period: Duration::from_secs(monitor.status_expired_period),
        };

        Ok(Some(ServiceDiscovery::new(
            Arc::new(management),
            rules,
            ctx,
            settings,
        )))
    }

    /// Consume the bus and probe services until ctrl-c
    pub async fn run(self) -> anyhow::Result<()> {
        let discovery = self.discovery()?.map(DiscoveryHandle::spawn);
        let consumer = ConsumerHandle::spawn(BusConsumer::new(
            self.config.bus.clone(),
            self.router.clone(),
        ));
        info!("engine started, routes: {:?}", self.router.routes());

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for ctrl-c")?;
        info!("shutting down");

        consumer.shutdown().await;
        if let Some(discovery) = discovery {
            discovery.shutdown().await;
        }
        self.router.wait_idle().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_every_chain() {
        let engine = Engine::from_config(Config::default()).unwrap();

        assert_eq!(
            engine.router().routes(),
            vec!["cinder", "glance", "log_error", "neutron", "nova"]
        );
        assert!(engine.correlator().is_some());
        assert!(engine.discovery().unwrap().is_none());
    }

    #[test]
    fn test_unknown_driver_is_a_startup_error() {
        let mut config = Config::default();
        config.alarm.drivers = vec!["pager".to_string()];

        assert!(Engine::from_config(config).is_err());
    }

    #[test]
    fn test_zero_monitor_intervals_are_startup_errors() {
        let mut config = Config::default();
        config.monitor.enabled = true;
        let engine = Engine::from_config(config.clone()).unwrap();
        assert!(engine.discovery().unwrap().is_some());

        for field in ["refresh_interval", "prober_interval", "cleanup_interval", "probe_timeout"] {
            let mut config = config.clone();
            match field {
                "refresh_interval" => config.monitor.refresh_interval = 0,
                "prober_interval" => config.monitor.prober_interval = 0,
                "cleanup_interval" => config.monitor.cleanup_interval = 0,
                _ => config.monitor.probe_timeout = 0,
            }
            let engine = Engine::from_config(config).unwrap();

            match engine.discovery() {
                Err(error) => assert!(error.to_string().contains(field), "{error}"),
                Ok(_) => panic!("{field} = 0 was accepted"),
            }
        }
    }

    #[test]
    fn test_bi_log_needs_bi_enabled() {
        let mut config = Config::default();
        config.bi.enabled = false;

        assert!(Engine::from_config(config).is_err());
    }
}
