//! Discovery loop - keeps one prober running per live service instance
//!
//! Every `refresh_interval` the broker's queues are listed and mapped to
//! service identities through a table of regex rules (first match wins).
//! Newly seen identities get a prober, vanished ones lose theirs. A separate,
//! slower sweep removes status and history rows nobody updated for
//! `status_expired_period`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use regex::Regex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, error, info, instrument, warn};

use super::checker::ServiceIdentity;
use super::management::BrokerManagement;
use super::messages::{DiscoveryCommand, RefreshSummary};
use super::prober::{ProberContext, ProberHandle};
use crate::config::DiscoveryRuleConfig;

/// Queue name patterns of the services that can be probed
pub const DEFAULT_RULES: &[(&str, &str)] = &[
    // nova
    (r"^scheduler\.(.*)$", "nova-scheduler"),
    (r"^compute\.(.*)$", "nova-compute"),
    (r"^conductor\.(.*)$", "nova-conductor"),
    (r"^consoleauth\.(.*)$", "nova-consoleauth"),
    // cinder
    (r"^cinder-scheduler:(.*)$", "cinder-scheduler"),
    (r"^cinder-volume:(.*)$", "cinder-volume"),
    // neutron
    (r"^l3_agent\.(.*)$", "neutron-l3-agent"),
    (r"^dhcp_agent\.(.*)$", "neutron-dhcp-agent"),
    (r"^monitor_agent\.(.*)$", "neutron-monitor-agent"),
    (
        r"^q-agent-notifier-l2population-update.\.(.*)$",
        "neutron-ovs-agent",
    ),
];

/// Ordered queue-name rules
pub struct RuleTable {
    rules: Vec<(Regex, String)>,
}

impl RuleTable {
    /// Compile the configured rules, or the defaults when none are given
    pub fn from_config(rules: &[DiscoveryRuleConfig]) -> Result<Self> {
        let pairs: Vec<(&str, &str)> = if rules.is_empty() {
            DEFAULT_RULES.to_vec()
        } else {
            rules
                .iter()
                .map(|rule| (rule.pattern.as_str(), rule.binary.as_str()))
                .collect()
        };

        let rules = pairs
            .into_iter()
            .map(|(pattern, binary)| {
                let regex = Regex::new(pattern)
                    .with_context(|| format!("invalid discovery pattern '{pattern}'"))?;
                if regex.captures_len() < 2 {
                    anyhow::bail!("discovery pattern '{pattern}' has no hostname group");
                }
                Ok((regex, binary.to_string()))
            })
            .collect::<Result<_>>()?;

        Ok(Self { rules })
    }

    /// Identity behind `queue_name`, if any rule matches
    pub fn parse(&self, queue_name: &str) -> Option<ServiceIdentity> {
        self.rules.iter().find_map(|(regex, binary)| {
            let hostname = regex.captures(queue_name)?.get(1)?.as_str();
            Some(ServiceIdentity::new(binary.as_str(), hostname))
        })
    }
}

pub struct DiscoverySettings {
    pub refresh_interval: Duration,
    pub cleanup_interval: Duration,

    /// Rows older than this are removed by the cleanup sweep
    pub status_expired_period: Duration,
}

/// Owns the running probers
pub struct ServiceDiscovery {
    management: Arc<dyn BrokerManagement>,
    rules: RuleTable,
    ctx: Arc<ProberContext>,
    settings: DiscoverySettings,
    probers: HashMap<ServiceIdentity, ProberHandle>,
}

impl ServiceDiscovery {
    pub fn new(
        management: Arc<dyn BrokerManagement>,
        rules: RuleTable,
        ctx: Arc<ProberContext>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            management,
            rules,
            ctx,
            settings,
            probers: HashMap::new(),
        }
    }

    async fn discover(&self) -> Result<BTreeSet<ServiceIdentity>> {
        let queues = self
            .management
            .list_queues()
            .await
            .context("Connect to RabbitMQ management failed")?;

        Ok(queues
            .iter()
            .filter_map(|queue| self.rules.parse(&queue.name))
            .filter(|service| {
                let supported = self.ctx.checker.supports(&service.binary);
                if !supported {
                    debug!("no health check for {service}, not probing it");
                }
                supported
            })
            .collect())
    }

    /// Reconcile the running probers with the live queues.
    ///
    /// When the queues cannot be listed nothing is started or stopped.
    #[instrument(skip(self))]
    pub async fn refresh(&mut self) -> Result<RefreshSummary> {
        debug!("Refresh services information");
        let discovered = self.discover().await?;

        let vanished: Vec<_> = self
            .probers
            .keys()
            .filter(|service| !discovered.contains(*service))
            .cloned()
            .collect();

        let mut summary = RefreshSummary::default();
        for service in vanished {
            if let Some(prober) = self.probers.remove(&service) {
                info!("Offline service: {service}");
                prober.shutdown().await;
                summary.stopped.push(service);
            }
        }

        for service in discovered {
            if self.probers.contains_key(&service) {
                continue;
            }
            info!("Online service: {service}");
            let prober = ProberHandle::spawn(service.clone(), self.ctx.clone());
            self.probers.insert(service.clone(), prober);
            summary.started.push(service);
        }

        debug!("Refresh service done");
        Ok(summary)
    }

    /// Remove persisted rows nobody updated within the staleness window
    pub async fn cleanup(&self) -> Result<usize> {
        let expired = TimeDelta::from_std(self.settings.status_expired_period)
            .context("status expiry period out of range")?;
        let before = Utc::now() - expired;

        let status = self.ctx.storage.cleanup_stale_status(before).await?;
        let history = self.ctx.storage.cleanup_stale_history(before).await?;
        if status + history > 0 {
            info!("removed {status} stale status and {history} stale history rows");
        }
        Ok(status + history)
    }

    pub fn running_services(&self) -> Vec<ServiceIdentity> {
        let mut services: Vec<_> = self.probers.keys().cloned().collect();
        services.sort();
        services
    }

    async fn stop_all(&mut self) {
        for (_, prober) in self.probers.drain() {
            prober.shutdown().await;
        }
    }

    #[instrument(skip_all)]
    async fn run(mut self, mut command_rx: mpsc::Receiver<DiscoveryCommand>) {
        debug!("starting discovery loop");

        let mut refresh_ticker = interval(self.settings.refresh_interval);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut cleanup_ticker = interval_at(
            Instant::now() + self.settings.cleanup_interval,
            self.settings.cleanup_interval,
        );
        cleanup_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = refresh_ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        error!("service discovery failed: {e:#}");
                    }
                }

                _ = cleanup_ticker.tick() => {
                    if let Err(e) = self.cleanup().await {
                        error!("status cleanup failed: {e:#}");
                    }
                }

                command = command_rx.recv() => match command {
                    Some(DiscoveryCommand::RefreshNow { respond_to }) => {
                        let _ = respond_to.send(self.refresh().await);
                    }
                    Some(DiscoveryCommand::RunningServices { respond_to }) => {
                        let _ = respond_to.send(self.running_services());
                    }
                    Some(DiscoveryCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        self.stop_all().await;
        debug!("discovery loop stopped");
    }
}

/// Handle for controlling the discovery loop
pub struct DiscoveryHandle {
    sender: mpsc::Sender<DiscoveryCommand>,
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    pub fn spawn(discovery: ServiceDiscovery) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let task = tokio::spawn(discovery.run(cmd_rx));
        Self {
            sender: cmd_tx,
            task,
        }
    }

    pub async fn refresh_now(&self) -> Result<RefreshSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryCommand::RefreshNow { respond_to: tx })
            .await?;
        rx.await?
    }

    pub async fn running_services(&self) -> Result<Vec<ServiceIdentity>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryCommand::RunningServices { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    /// Stop the loop and every prober it owns
    pub async fn shutdown(self) {
        let _ = self.sender.send(DiscoveryCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            error!("discovery loop ended abnormally: {e}");
        }
    }
}
