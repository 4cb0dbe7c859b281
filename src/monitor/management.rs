use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// One queue as reported by the broker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    #[serde(default)]
    pub consumers: u64,
    #[serde(default)]
    pub durable: bool,
}

/// Broker management capability
#[async_trait]
pub trait BrokerManagement: Send + Sync {
    async fn list_queues(&self) -> Result<Vec<QueueInfo>>;
}

/// Client for the RabbitMQ management HTTP API
///
/// The first endpoint answering `/api/overview` is kept until a request to
/// it fails; the next call then fails over to the remaining endpoints.
pub struct RabbitManagementClient {
    client: Client,
    endpoints: Vec<String>,
    userid: String,
    password: String,
    selected: Mutex<Option<String>>,
}

impl RabbitManagementClient {
    /// Management endpoints on `port` of every AMQP host
    pub fn for_hosts(hosts: &[String], port: u16, userid: &str, password: &str) -> Result<Self> {
        let endpoints = hosts
            .iter()
            .map(|host| {
                let host = host.split(':').next().unwrap_or(host);
                format!("http://{host}:{port}")
            })
            .collect();
        Self::new(endpoints, userid, password)
    }

    pub fn new(endpoints: Vec<String>, userid: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoints,
            userid: userid.to_string(),
            password: password.to_string(),
            selected: Mutex::new(None),
        })
    }

    async fn get(&self, endpoint: &str, path: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(format!("{endpoint}{path}"))
            .basic_auth(&self.userid, Some(&self.password))
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    async fn endpoint(&self) -> Result<String> {
        let mut selected = self.selected.lock().await;
        if let Some(endpoint) = selected.as_ref() {
            return Ok(endpoint.clone());
        }

        for endpoint in &self.endpoints {
            debug!("Attempting rabbit management at {endpoint}");
            match self.get(endpoint, "/api/overview").await {
                Ok(_) => {
                    debug!("Picked rabbit management at {endpoint}");
                    *selected = Some(endpoint.clone());
                    return Ok(endpoint.clone());
                }
                Err(e) => warn!("Rabbit management at {endpoint} failed: {e:#}, pick another"),
            }
        }

        anyhow::bail!("RabbitMQ management plugin not available")
    }
}

#[async_trait]
impl BrokerManagement for RabbitManagementClient {
    async fn list_queues(&self) -> Result<Vec<QueueInfo>> {
        let endpoint = self.endpoint().await?;

        let result = async {
            let response = self.get(&endpoint, "/api/queues").await?;
            Ok::<_, anyhow::Error>(response.json::<Vec<QueueInfo>>().await?)
        }
        .await;

        if result.is_err() {
            self.selected.lock().await.take();
        }
        result.context("Failed to list queues")
    }
}
