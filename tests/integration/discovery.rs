//! Discovery loop reconciling probers with the broker's queues

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stackwatch::monitor::{
    DiscoveryHandle, DiscoverySettings, RuleTable, ServiceDiscovery, ServiceIdentity,
};
use stackwatch::storage::{MemoryBackend, StorageBackend};

use crate::helpers::{FakeBroker, RecordingDriver, SwitchableChecker, dispatcher_with, prober_context};

struct Fixture {
    broker: Arc<FakeBroker>,
    checker: Arc<SwitchableChecker>,
    storage: Arc<MemoryBackend>,
    driver: Arc<RecordingDriver>,
    discovery: ServiceDiscovery,
}

fn fixture() -> Fixture {
    let broker = Arc::new(FakeBroker::default());
    let checker = Arc::new(SwitchableChecker::default());
    let storage = Arc::new(MemoryBackend::new());
    let driver = Arc::new(RecordingDriver::default());

    let ctx = prober_context(
        checker.clone(),
        storage.clone(),
        dispatcher_with(driver.clone(), Duration::from_secs(600)),
    );
    let settings = DiscoverySettings {
        refresh_interval: Duration::from_secs(30),
        cleanup_interval: Duration::from_secs(600),
        status_expired_period: Duration::from_secs(3600),
    };
    let discovery = ServiceDiscovery::new(
        broker.clone(),
        RuleTable::from_config(&[]).unwrap(),
        ctx,
        settings,
    );

    Fixture {
        broker,
        checker,
        storage,
        driver,
        discovery,
    }
}

async fn updates(storage: &MemoryBackend, hostname: &str) -> u64 {
    storage
        .get_service_status("nova-compute", hostname)
        .await
        .unwrap()
        .map(|row| row.updates)
        .unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn test_prober_started_then_stopped_with_its_queue() {
    let Fixture {
        broker,
        storage,
        mut discovery,
        ..
    } = fixture();

    broker.set_queues(&["compute.node-1", "notifications.info"]);
    let summary = discovery.refresh().await.unwrap();
    assert_eq!(summary.started, vec![ServiceIdentity::new("nova-compute", "node-1")]);

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert!(updates(&storage, "node-1").await >= 3);

    broker.set_queues(&["notifications.info"]);
    let summary = discovery.refresh().await.unwrap();
    assert_eq!(summary.stopped, vec![ServiceIdentity::new("nova-compute", "node-1")]);
    assert!(discovery.running_services().is_empty());

    let frozen = updates(&storage, "node-1").await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(updates(&storage, "node-1").await, frozen);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_keeps_probers() {
    let Fixture {
        broker,
        mut discovery,
        ..
    } = fixture();

    broker.set_queues(&["compute.node-1"]);
    discovery.refresh().await.unwrap();

    broker.set_unreachable(true);
    assert!(discovery.refresh().await.is_err());
    assert_eq!(discovery.running_services().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_and_recovery_raise_alarms() {
    let Fixture {
        broker,
        checker,
        storage,
        driver,
        discovery,
    } = fixture();

    broker.set_queues(&["compute.node-1"]);
    let handle = DiscoveryHandle::spawn(discovery);
    handle.refresh_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    checker.set_down("node-1", true);
    tokio::time::sleep(Duration::from_secs(2)).await;
    checker.set_down("node-1", false);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(
        driver.titles(),
        vec![
            "test | node-1 | nova-compute broken".to_string(),
            "test | node-1 | nova-compute recovered".to_string(),
        ]
    );
    let history = storage
        .list_service_history("nova-compute", "node-1")
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(checker.checks() >= 5);

    assert_eq!(
        handle.running_services().await.unwrap(),
        vec![ServiceIdentity::new("nova-compute", "node-1")]
    );
    handle.shutdown().await;
}
