//! ProberActor - periodically health-checks one service instance
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → health check → process status → [storage, alarm dispatcher, metrics sink]
//!     ↑
//!     └─── Commands (ProbeNow, Shutdown)
//! ```
//!
//! The actor owns the instance's [`StateMachine`]. Nothing that happens in
//! one iteration ends the loop; only `Shutdown` (or dropping every handle)
//! does.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, instrument, warn};

use super::checker::{HealthChecker, ServiceIdentity};
use super::messages::{ProbeReport, ProberCommand};
use super::metrics::MetricsSink;
use super::state::{ProbeOutcome, StateMachine, StateTransition};
use crate::alarm::{AlarmCondition, AlarmContext, AlarmDispatcher, CONTEXT_KIND};
use crate::storage::{ServiceHistoryRow, StorageBackend};

/// Everything probers share
pub struct ProberContext {
    pub checker: Arc<dyn HealthChecker>,
    pub storage: Arc<dyn StorageBackend>,
    pub dispatcher: Arc<AlarmDispatcher>,
    pub metrics: Arc<dyn MetricsSink>,
    pub env_name: String,

    /// Time between two probes
    pub interval: Duration,

    /// A check running longer than this counts as TIMEOUT
    pub probe_timeout: Duration,

    /// Upper bound of the random delay before the first probe
    pub jitter: Duration,
}

/// Alarm identity of a service condition
///
/// Broken and recovered alarms are keyed apart so a recovery is never
/// swallowed by the quiet period of the preceding failure.
pub fn service_alarm_identity(service: &ServiceIdentity, kind: &str) -> String {
    format!("service:{}@{}:{kind}", service.binary, service.hostname)
}

struct ProberActor {
    service: ServiceIdentity,
    ctx: Arc<ProberContext>,
    machine: StateMachine,
    command_rx: mpsc::Receiver<ProberCommand>,
}

impl ProberActor {
    #[instrument(skip(self), fields(service = %self.service))]
    async fn run(mut self) {
        let jitter = random_jitter(self.ctx.jitter);
        debug!("starting prober, first probe in {jitter:?}");

        let mut ticker = interval_at(Instant::now() + jitter, self.ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => match command {
                    Some(ProberCommand::ProbeNow { respond_to }) => {
                        if let Some(report) = self.probe_guarded().await {
                            let _ = respond_to.send(report);
                        }
                    }
                    Some(ProberCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    self.probe_guarded().await;
                }
            }
        }

        debug!("prober stopped");
    }

    /// One iteration; a panic is logged and the loop goes on.
    async fn probe_guarded(&mut self) -> Option<ProbeReport> {
        let service = self.service.clone();
        match AssertUnwindSafe(self.probe()).catch_unwind().await {
            Ok(report) => Some(report),
            Err(_) => {
                error!("{service} check failed");
                None
            }
        }
    }

    async fn probe(&mut self) -> ProbeReport {
        let started = Instant::now();

        let outcome = match timeout(self.ctx.probe_timeout, self.ctx.checker.check(&self.service)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("health check of {} failed: {e:#}", self.service);
                ProbeOutcome::Failed
            }
            Err(_) => ProbeOutcome::Timeout,
        };
        let response_time = started.elapsed();

        debug!(
            "{} check result: {outcome}, sleep {:?}",
            self.service, self.ctx.interval
        );
        self.process_status(outcome, response_time).await
    }

    async fn process_status(&mut self, outcome: ProbeOutcome, response_time: Duration) -> ProbeReport {
        let now = Utc::now();

        if let Err(e) = self
            .ctx
            .storage
            .upsert_service_status(
                &self.service.binary,
                &self.service.hostname,
                outcome,
                response_time,
                now,
            )
            .await
        {
            error!("failed to store status of {}: {e}", self.service);
        }

        let transition = self.machine.change_to(outcome, now);
        if let Some(transition) = &transition {
            if transition.is_failure() {
                self.process_failed(transition, response_time).await;
            } else if transition.is_recovery() {
                self.process_regain(transition, response_time).await;
            }
        }

        if let Err(e) = self
            .ctx
            .metrics
            .push(&self.service, outcome, response_time)
            .await
        {
            warn!("failed to push metric of {}: {e:#}", self.service);
        }

        ProbeReport {
            outcome,
            response_time,
            transition,
        }
    }

    async fn process_failed(&self, transition: &StateTransition, response_time: Duration) {
        info!("{} is {}", self.service, transition.new_state);
        self.fire("broken", transition, response_time).await;
    }

    async fn process_regain(&self, transition: &StateTransition, response_time: Duration) {
        info!("{} recovered", self.service);

        let row = ServiceHistoryRow {
            binary: self.service.binary.clone(),
            hostname: self.service.hostname.clone(),
            start_at: transition.start_at,
            end_at: transition.end_at,
            duration: transition.duration.num_milliseconds() as f64 / 1000.0,
        };
        if let Err(e) = self.ctx.storage.insert_service_history(row).await {
            error!("failed to store history of {}: {e}", self.service);
        }

        self.fire("recovered", transition, response_time).await;
    }

    async fn fire(&self, kind: &str, transition: &StateTransition, response_time: Duration) {
        let title = format!(
            "{} | {} | {} {kind}",
            self.ctx.env_name, self.service.hostname, self.service.binary
        );
        let content = format!(
            "{} changed from {} to {} at {}; previous state lasted {}s. Response time {:.3}s.",
            self.service,
            transition.old_state,
            transition.new_state,
            transition.end_at.to_rfc3339(),
            transition.duration.num_seconds(),
            response_time.as_secs_f64(),
        );
        let context = AlarmContext::from([
            (CONTEXT_KIND.to_string(), kind.to_string()),
            ("binary".to_string(), self.service.binary.clone()),
            ("hostname".to_string(), self.service.hostname.clone()),
            ("old_state".to_string(), transition.old_state.to_string()),
            ("new_state".to_string(), transition.new_state.to_string()),
            ("start_at".to_string(), transition.start_at.to_rfc3339()),
            ("end_at".to_string(), transition.end_at.to_rfc3339()),
            (
                "response_time".to_string(),
                format!("{:.3}", response_time.as_secs_f64()),
            ),
        ]);

        let condition = AlarmCondition::new(service_alarm_identity(&self.service, kind));
        self.ctx
            .dispatcher
            .fire(&condition, &title, &content, &context)
            .await;
    }
}

fn random_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    rand::thread_rng().gen_range(Duration::ZERO..max)
}

/// Handle for controlling a prober actor
pub struct ProberHandle {
    sender: mpsc::Sender<ProberCommand>,
    service: ServiceIdentity,
    task: JoinHandle<()>,
    stop_timeout: Duration,
}

impl ProberHandle {
    /// Spawn a new prober actor
    pub fn spawn(service: ServiceIdentity, ctx: Arc<ProberContext>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let stop_timeout = ctx.probe_timeout + Duration::from_secs(1);

        let actor = ProberActor {
            service: service.clone(),
            ctx,
            machine: StateMachine::new(),
            command_rx: cmd_rx,
        };
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            service,
            task,
            stop_timeout,
        }
    }

    pub fn service(&self) -> &ServiceIdentity {
        &self.service
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Trigger an immediate probe and wait for its report
    pub async fn probe_now(&self) -> Result<ProbeReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ProberCommand::ProbeNow { respond_to: tx })
            .await?;
        Ok(rx.await?)
    }

    /// Stop the prober and wait for its loop to end
    ///
    /// A prober stuck in a check is aborted once the check could no longer
    /// finish in time.
    pub async fn shutdown(self) {
        let _ = self.sender.send(ProberCommand::Shutdown).await;

        let mut task = self.task;
        if timeout(self.stop_timeout, &mut task).await.is_err() {
            warn!("prober for {} did not stop in time, aborting", self.service);
            task.abort();
        }
    }
}
