//! Shared fakes for integration tests

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use stackwatch::alarm::{
    AlarmContext, AlarmDispatcher, AlarmJudge, AlarmTimer, Driver, DriverError,
};
use stackwatch::monitor::{
    BrokerManagement, HealthChecker, LogMetricsSink, ProbeOutcome, ProberContext, QueueInfo,
    ServiceIdentity,
};
use stackwatch::storage::StorageBackend;

/// Driver remembering every delivered title
#[derive(Default)]
pub struct RecordingDriver {
    titles: Mutex<Vec<String>>,
    contexts: Mutex<Vec<AlarmContext>>,
}

impl RecordingDriver {
    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<AlarmContext> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> usize {
        self.titles.lock().unwrap().len()
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(
        &self,
        title: &str,
        _content: &str,
        context: &AlarmContext,
    ) -> Result<(), DriverError> {
        self.titles.lock().unwrap().push(title.to_string());
        self.contexts.lock().unwrap().push(context.clone());
        Ok(())
    }
}

pub fn dispatcher_with(driver: Arc<RecordingDriver>, quiet: Duration) -> Arc<AlarmDispatcher> {
    let judge = AlarmJudge::new(quiet, AlarmTimer::default());
    Arc::new(AlarmDispatcher::new(judge, vec![driver]))
}

/// Broker whose queue list the test controls
#[derive(Default)]
pub struct FakeBroker {
    queues: Mutex<Vec<QueueInfo>>,
    unreachable: Mutex<bool>,
}

impl FakeBroker {
    pub fn set_queues(&self, names: &[&str]) {
        *self.queues.lock().unwrap() = names
            .iter()
            .map(|name| QueueInfo {
                name: name.to_string(),
                consumers: 1,
                durable: false,
            })
            .collect();
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock().unwrap() = unreachable;
    }
}

#[async_trait]
impl BrokerManagement for FakeBroker {
    async fn list_queues(&self) -> anyhow::Result<Vec<QueueInfo>> {
        if *self.unreachable.lock().unwrap() {
            anyhow::bail!("management API unreachable");
        }
        Ok(self.queues.lock().unwrap().clone())
    }
}

/// Checker answering OK except for the hostnames marked as down
#[derive(Default)]
pub struct SwitchableChecker {
    down: Mutex<HashSet<String>>,
    checks: AtomicUsize,
}

impl SwitchableChecker {
    pub fn set_down(&self, hostname: &str, down: bool) {
        let mut set = self.down.lock().unwrap();
        if down {
            set.insert(hostname.to_string());
        } else {
            set.remove(hostname);
        }
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthChecker for SwitchableChecker {
    async fn check(&self, service: &ServiceIdentity) -> anyhow::Result<ProbeOutcome> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.down.lock().unwrap().contains(&service.hostname) {
            Ok(ProbeOutcome::Failed)
        } else {
            Ok(ProbeOutcome::Ok)
        }
    }
}

pub fn prober_context(
    checker: Arc<dyn HealthChecker>,
    storage: Arc<dyn StorageBackend>,
    dispatcher: Arc<AlarmDispatcher>,
) -> Arc<ProberContext> {
    Arc::new(ProberContext {
        checker,
        storage,
        dispatcher,
        metrics: Arc::new(LogMetricsSink),
        env_name: "test".to_string(),
        interval: Duration::from_secs(1),
        probe_timeout: Duration::from_millis(500),
        jitter: Duration::ZERO,
    })
}

/// A bus notification as the services publish it
pub fn notification(event_type: &str, request_id: &str, payload: Value) -> Value {
    json!({
        "event_type": event_type,
        "publisher_id": "compute.node-1",
        "timestamp": "2015-02-28 06:26:01.134761",
        "priority": "INFO",
        "message_id": format!("msg-{event_type}"),
        "payload": payload,
        "_context_request_id": request_id,
        "_context_project_id": "tenant-1",
        "_context_project_name": "demo",
    })
}

/// A critical exception report for the `log_error` chain
pub fn exception_report(exc_value: &str) -> Value {
    json!({
        "event_type": "sentry.log.error",
        "publisher_id": "controller-1",
        "priority": "CRITICAL",
        "payload": {
            "binary": "nova-api",
            "exception": {
                "exc_class": "<class 'socket.error'>",
                "exc_value": exc_value,
                "frames": [
                    {"filename": "/opt/stack/nova/nova/cmd/api.py", "name": "main", "lineno": 51}
                ]
            }
        }
    })
}
