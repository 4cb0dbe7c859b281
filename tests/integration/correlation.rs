//! Action correlation through the `bi_log` handler

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use stackwatch::bi::{Action, Correlator, TaggerError, default_taggers};
use stackwatch::message::Message;
use stackwatch::pipeline::Handler;
use stackwatch::pipeline::handlers::{BiLogHandler, BiRecord};

use crate::helpers::notification;

fn correlator(done: Arc<Mutex<Vec<Action>>>) -> Arc<Correlator> {
    let correlator = Correlator::new(
        default_taggers(),
        Duration::from_secs(86400),
        Duration::from_secs(60),
        Arc::new(move |action: &Action| done.lock().unwrap().push(action.clone())),
    )
    .unwrap();
    Arc::new(correlator)
}

fn message(event_type: &str, request_id: &str, payload: serde_json::Value) -> Message {
    Message::decode(notification(event_type, request_id, payload).into()).unwrap()
}

#[tokio::test]
async fn test_start_and_end_complete_one_action() {
    let done = Arc::new(Mutex::new(Vec::new()));
    let correlator = correlator(done.clone());
    let handler = BiLogHandler::new(correlator.clone());

    handler
        .handle(&message("compute.instance.delete.start", "req-1", json!({})))
        .await
        .unwrap();
    handler
        .handle(&message("compute.instance.update", "req-1", json!({})))
        .await
        .unwrap();
    assert!(correlator.contains("req-1"));

    handler
        .handle(&message("compute.instance.delete.end", "req-1", json!({})))
        .await
        .unwrap();

    let done = done.lock().unwrap();
    assert_eq!(done.len(), 1);
    assert!(!correlator.contains("req-1"));

    let record = BiRecord::from_action(&done[0], "prod");
    assert_eq!(record.action_name, "compute.instance.delete");
    assert_eq!(record.tenant_name, "demo");
    assert_eq!(record.start_at, "2015-02-28 06:26:01.134761");
    assert_eq!(record.end_at, record.start_at);
    assert_eq!(record.service, "nvs");
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_action_is_purged_without_callback() {
    let done = Arc::new(Mutex::new(Vec::new()));
    let correlator = correlator(done.clone());

    correlator
        .process(&message("volume.create.start", "req-abandoned", json!({})))
        .unwrap();
    assert_eq!(correlator.live_actions(), 1);

    tokio::time::advance(Duration::from_secs(86401)).await;
    correlator
        .process(&message("volume.delete.start", "req-other", json!({})))
        .unwrap();

    assert!(!correlator.contains("req-abandoned"));
    assert!(done.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_conflicting_name_is_reported_and_action_kept() {
    let done = Arc::new(Mutex::new(Vec::new()));
    let correlator = correlator(done.clone());

    correlator
        .process(&message(
            "compute.instance.resize.prep.start",
            "req-1",
            json!({}),
        ))
        .unwrap();
    correlator
        .process(&message(
            "compute.instance.resize.prep.end",
            "req-1",
            json!({"instance_type_id": 1, "new_instance_type_id": 2}),
        ))
        .unwrap();

    // a second, inconsistent naming of the same request
    let error = correlator
        .process(&message(
            "compute.instance.resize.prep.end",
            "req-1",
            json!({"instance_type_id": 1, "new_instance_type_id": 1}),
        ))
        .unwrap_err();
    assert!(matches!(error, TaggerError::BiNameConflict { .. }));

    correlator
        .process(&message("compute.instance.finish_resize.end", "req-1", json!({})))
        .unwrap();

    let done = done.lock().unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].bi_name.as_deref(), Some("compute.instance.resize"));
}
