//! Routing through chains built from configuration

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use stackwatch::Engine;
use stackwatch::config::Config;
use stackwatch::message::Message;
use stackwatch::pipeline::handlers::EventStoreHandler;
use stackwatch::pipeline::{Handler, HandlerChain, Router, TaskPool};
use stackwatch::storage::{MemoryBackend, StorageBackend};

use crate::helpers::notification;

struct Exploding;

#[async_trait::async_trait]
impl Handler for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    async fn handle(&self, _: &Message) -> anyhow::Result<()> {
        panic!("handler bug");
    }
}

#[tokio::test]
async fn test_default_chains_store_events_per_service() {
    let storage = Arc::new(MemoryBackend::new());
    let engine = Engine::with_storage(Config::default(), storage.clone()).unwrap();
    let router = engine.router();

    router
        .submit(
            "nova",
            notification("compute.instance.delete.end", "req-1", json!({"instance_id": "vm-1"})).into(),
        )
        .await
        .unwrap();
    router
        .submit(
            "cinder",
            notification("volume.create.end", "req-2", json!({"volume_id": "vol-1"})).into(),
        )
        .await
        .unwrap();
    router.wait_idle().await;

    let mut events = storage.list_events(10).await.unwrap();
    events.sort_by(|a, b| a.service.cmp(&b.service));

    let summary: Vec<_> = events
        .iter()
        .map(|event| (event.service.as_str(), event.object_id.as_deref()))
        .collect();
    assert_eq!(summary, vec![("cinder", Some("vol-1")), ("nova", Some("vm-1"))]);
}

#[tokio::test]
async fn test_panicking_handler_does_not_stop_chain() {
    let storage = Arc::new(MemoryBackend::new());
    let handlers: Vec<Arc<dyn Handler>> = vec![
        Arc::new(Exploding),
        Arc::new(EventStoreHandler::new("nova", storage.clone())),
    ];
    let router = Router::new(TaskPool::new(2), [HandlerChain::new("nova", handlers)]);

    let handle = router
        .submit("nova", notification("compute.instance.create.end", "req-1", json!({})).into())
        .await
        .unwrap();
    handle.await.unwrap();

    assert_eq!(storage.list_events(10).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_saturated_pool_applies_backpressure() {
    let pool = TaskPool::new(1);
    let blocker = pool
        .spawn(tokio::time::sleep(Duration::from_millis(200)))
        .await
        .unwrap();
    assert_eq!(pool.in_flight(), 1);

    // waits for the first task instead of dropping the second
    let started = tokio::time::Instant::now();
    let second = pool.spawn(async {}).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(200));

    blocker.await.unwrap();
    second.await.unwrap();
}

#[test]
fn test_custom_chain_configuration() {
    let mut config = Config::default();
    config.chains = HashMap::from([("nova".to_string(), vec!["event_store".to_string()])]);

    let engine = Engine::from_config(config).unwrap();

    assert_eq!(engine.router().routes(), vec!["nova"]);
}
