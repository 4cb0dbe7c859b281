//! HTTP collaborators against a mock server

use std::collections::HashMap;
use std::time::Duration;

use assert_matches::assert_matches;
use stackwatch::alarm::drivers::{DiscordDriver, WebhookDriver};
use stackwatch::alarm::{AlarmContext, CONTEXT_KIND, Driver, DriverError};
use stackwatch::config::{DiscordConfig, HttpCheckConfig, WebhookConfig};
use stackwatch::monitor::{
    BrokerManagement, HealthChecker, HttpHealthChecker, HttpMetricsSink, MetricsSink, ProbeOutcome,
    RabbitManagementClient, ServiceIdentity,
};
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(kind: &str) -> AlarmContext {
    AlarmContext::from([
        (CONTEXT_KIND.to_string(), kind.to_string()),
        ("hostname".to_string(), "node-1".to_string()),
    ])
}

#[tokio::test]
async fn test_webhook_posts_alarm_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(serde_json::json!({
            "title": "prod | node-1 | nova-compute broken",
            "context": {"hostname": "node-1"}
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let driver = WebhookDriver::new(WebhookConfig {
        url: format!("{}/hook", server.uri()),
        attempts: 1,
        retry_delay_secs: 0,
        timeout_secs: 30,
    })
    .unwrap();

    driver
        .deliver("prod | node-1 | nova-compute broken", "details", &context("broken"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_webhook_retries_then_reports_exhaustion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let driver = WebhookDriver::new(WebhookConfig {
        url: server.uri(),
        attempts: 3,
        retry_delay_secs: 0,
        timeout_secs: 30,
    })
    .unwrap();

    let result = driver.deliver("title", "content", &AlarmContext::new()).await;

    assert_matches!(result, Err(DriverError::Exhausted { attempts: 3, .. }));
}

#[tokio::test]
async fn test_hung_webhook_fails_within_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let driver = WebhookDriver::new(WebhookConfig {
        url: server.uri(),
        attempts: 1,
        retry_delay_secs: 0,
        timeout_secs: 1,
    })
    .unwrap();

    let started = std::time::Instant::now();
    let result = driver.deliver("title", "content", &AlarmContext::new()).await;

    assert_matches!(result, Err(DriverError::Http(e)) if e.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_hung_discord_webhook_fails_within_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let driver = DiscordDriver::new(
        DiscordConfig {
            url: server.uri(),
            user_id: None,
            timeout_secs: 1,
        },
        "prod".to_string(),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let result = driver.deliver("title", "content", &context("broken")).await;

    assert_matches!(result, Err(DriverError::Http(e)) if e.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_hung_metrics_collector_fails_within_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let sink = HttpMetricsSink::new(server.uri(), Duration::from_millis(300)).unwrap();

    let started = std::time::Instant::now();
    let result = sink
        .push(
            &ServiceIdentity::new("nova-compute", "node-1"),
            ProbeOutcome::Ok,
            Duration::from_millis(12),
        )
        .await;

    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_discord_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(serde_json::json!({"content": "<@42>"})))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let driver = DiscordDriver::new(
        DiscordConfig {
            url: server.uri(),
            user_id: Some("42".to_string()),
            timeout_secs: 30,
        },
        "prod".to_string(),
    )
    .unwrap();

    let result = driver.deliver("title", "content", &context("recovered")).await;

    assert_matches!(result, Err(DriverError::Status(status)) if status.as_u16() == 400);
}

#[tokio::test]
async fn test_management_client_fails_over_to_live_endpoint() {
    let live = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/overview"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&live)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/queues"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "compute.node-1", "consumers": 1, "durable": false},
            {"name": "notifications.info", "consumers": 1, "durable": true}
        ])))
        .mount(&live)
        .await;

    let dead = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&dead)
        .await;

    let client =
        RabbitManagementClient::new(vec![dead.uri(), live.uri()], "guest", "guest").unwrap();

    let queues = client.list_queues().await.unwrap();
    let names: Vec<_> = queues.iter().map(|queue| queue.name.as_str()).collect();
    assert_eq!(names, vec!["compute.node-1", "notifications.info"]);
}

#[tokio::test]
async fn test_http_checker_maps_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health/node-1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health/node-2"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health/node-3"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let checks = HashMap::from([(
        "nova-compute".to_string(),
        HttpCheckConfig {
            url: format!("{}/health/{{hostname}}", server.uri()),
            expected_status: None,
        },
    )]);
    let checker = HttpHealthChecker::new(checks, Duration::from_millis(300)).unwrap();

    assert!(checker.supports("nova-compute"));
    assert!(!checker.supports("cinder-volume"));

    for (hostname, expected) in [
        ("node-1", ProbeOutcome::Ok),
        ("node-2", ProbeOutcome::Failed),
        ("node-3", ProbeOutcome::Timeout),
    ] {
        let service = ServiceIdentity::new("nova-compute", hostname);
        assert_eq!(checker.check(&service).await.unwrap(), expected, "{hostname}");
    }
}
