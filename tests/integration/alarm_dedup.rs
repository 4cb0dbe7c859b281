//! End-to-end alarm deduplication through the `log_error` chain

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use stackwatch::alarm::{AlarmCondition, FireOutcome, ShutupWindow, Verdict};
use stackwatch::config::NotifierConfig;
use stackwatch::pipeline::{HandlerDeps, HandlerRegistry, Router, TaskPool};
use stackwatch::storage::{MemoryBackend, StorageBackend};

use crate::helpers::{RecordingDriver, dispatcher_with, exception_report};

const QUIET: Duration = Duration::from_secs(600);

fn log_error_router(driver: Arc<RecordingDriver>, storage: Arc<MemoryBackend>) -> Router {
    let deps = HandlerDeps {
        env_name: "prod".to_string(),
        storage,
        dispatcher: dispatcher_with(driver, QUIET),
        correlator: None,
        publisher: None,
        notifier: NotifierConfig::default(),
    };
    let chain = HandlerRegistry::default()
        .build_chain("log_error", &["log_error".to_string()], &deps)
        .unwrap();
    Router::new(TaskPool::new(16), [chain])
}

async fn submit(router: &Router, exc_value: &str) {
    let handle = router
        .submit("log_error", exception_report(exc_value).into())
        .await
        .expect("message should be scheduled");
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_repeated_exception_alarms_once_per_quiet_window() {
    let driver = Arc::new(RecordingDriver::default());
    let storage = Arc::new(MemoryBackend::new());
    let router = log_error_router(driver.clone(), storage);

    submit(&router, "Address already in use").await;
    tokio::time::advance(Duration::from_secs(1)).await;
    submit(&router, "Address already in use").await;

    assert_eq!(driver.deliveries(), 1);
    assert_eq!(driver.titles()[0], "prod | controller-1 | Address already in use");

    tokio::time::advance(Duration::from_secs(601)).await;
    submit(&router, "Address already in use").await;

    assert_eq!(driver.deliveries(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exception_on_process_is_not_alarmed() {
    let driver = Arc::new(RecordingDriver::default());
    let storage = Arc::new(MemoryBackend::new());
    let router = log_error_router(driver.clone(), storage.clone());

    submit(&router, "first").await;
    assert_eq!(driver.deliveries(), 1);

    let uuid = driver.contexts()[0]["uuid"].clone();
    storage.update_exception_flags(&uuid, true, None).await.unwrap();

    tokio::time::advance(Duration::from_secs(601)).await;
    submit(&router, "second").await;

    assert_eq!(driver.deliveries(), 1);
    let record = storage.get_exception(&uuid).await.unwrap().unwrap();
    assert_eq!(record.count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutup_window_overrides_timer() {
    let driver = Arc::new(RecordingDriver::default());
    let dispatcher = dispatcher_with(driver.clone(), QUIET);
    let now = Utc::now();
    let window = ShutupWindow::new(now - TimeDelta::minutes(5), now + TimeDelta::minutes(5));

    let silenced = AlarmCondition::new("fingerprint").shutup(Some(window));
    let outcome = dispatcher
        .fire(&silenced, "title", "content", &Default::default())
        .await;
    assert_eq!(outcome, FireOutcome::Suppressed(Verdict::Shutup));

    let released = AlarmCondition::new("fingerprint");
    let outcome = dispatcher
        .fire(&released, "title", "content", &Default::default())
        .await;
    assert!(outcome.delivered());
    assert_eq!(driver.deliveries(), 1);
}
