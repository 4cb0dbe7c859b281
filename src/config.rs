use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::trace;

use crate::message::Priority;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Environment name used in alarm titles and BI records
    #[serde(default = "default_env_name")]
    pub env_name: String,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub bus: BusConfig,

    /// Route name -> ordered handler names
    #[serde(default = "default_chains")]
    pub chains: HashMap<String, Vec<String>>,

    #[serde(default)]
    pub alarm: AlarmConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub management: ManagementConfig,

    #[serde(default)]
    pub notifier: NotifierConfig,

    #[serde(default)]
    pub bi: BiConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_name: default_env_name(),
            pipeline: PipelineConfig::default(),
            bus: BusConfig::default(),
            chains: default_chains(),
            alarm: AlarmConfig::default(),
            monitor: MonitorConfig::default(),
            management: ManagementConfig::default(),
            notifier: NotifierConfig::default(),
            bi: BiConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_env_name() -> String {
    "default".to_string()
}

fn default_chains() -> HashMap<String, Vec<String>> {
    HashMap::from([
        (
            "nova".to_string(),
            vec![
                "event_store".to_string(),
                "notifier".to_string(),
                "bi_log".to_string(),
            ],
        ),
        (
            "glance".to_string(),
            vec!["event_store".to_string(), "bi_log".to_string()],
        ),
        (
            "neutron".to_string(),
            vec!["event_store".to_string(), "bi_log".to_string()],
        ),
        (
            "cinder".to_string(),
            vec!["event_store".to_string(), "bi_log".to_string()],
        ),
        ("log_error".to_string(), vec!["log_error".to_string()]),
    ])
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of messages processed concurrently
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

fn default_pool_size() -> usize {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_rabbit_hosts")]
    pub hosts: Vec<String>,

    #[serde(default = "default_guest")]
    pub userid: String,

    #[serde(default = "default_guest")]
    pub password: String,

    #[serde(default = "default_virtual_host")]
    pub virtual_host: String,

    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_secs: u64,

    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,

    #[serde(default = "default_services")]
    pub services: Vec<ServiceBusConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            hosts: default_rabbit_hosts(),
            userid: default_guest(),
            password: default_guest(),
            virtual_host: default_virtual_host(),
            reconnect_initial_secs: default_reconnect_initial(),
            reconnect_max_secs: default_reconnect_max(),
            services: default_services(),
        }
    }
}

impl BusConfig {
    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_secs(self.reconnect_initial_secs)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_secs)
    }
}

fn default_rabbit_hosts() -> Vec<String> {
    vec!["127.0.0.1:5672".to_string()]
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_virtual_host() -> String {
    "/".to_string()
}

fn default_reconnect_initial() -> u64 {
    1
}

fn default_reconnect_max() -> u64 {
    60
}

/// Exchange and queue layout of one source service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceBusConfig {
    pub name: String,

    pub exchange: String,

    /// Base topic; queues are named `<topic>.<level>`
    pub topic: String,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    pub queues: Vec<QueueBinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueBinding {
    pub level: Priority,

    /// Handler chain receiving this queue's messages
    pub route: String,
}

impl ServiceBusConfig {
    pub fn queue_name(&self, binding: &QueueBinding) -> String {
        format!("{}.{}", self.topic, binding.level)
    }
}

fn service(name: &str, exchange: &str, topic: &str, queues: &[(Priority, &str)]) -> ServiceBusConfig {
    ServiceBusConfig {
        name: name.to_string(),
        exchange: exchange.to_string(),
        topic: topic.to_string(),
        durable: false,
        auto_delete: false,
        queues: queues
            .iter()
            .map(|(level, route)| QueueBinding {
                level: *level,
                route: route.to_string(),
            })
            .collect(),
    }
}

fn default_services() -> Vec<ServiceBusConfig> {
    use Priority::*;

    vec![
        service(
            "nova",
            "nova",
            "notifications",
            &[(Info, "nova"), (Error, "nova"), (Critical, "log_error")],
        ),
        service(
            "glance",
            "glance",
            "glance_notifications",
            &[(Info, "glance"), (Error, "glance"), (Warn, "glance")],
        ),
        service(
            "neutron",
            "neutron",
            "neutron_notifications",
            &[(Info, "neutron"), (Critical, "log_error")],
        ),
        service(
            "cinder",
            "openstack",
            "cinder_notifications",
            &[(Info, "cinder"), (Error, "cinder"), (Critical, "log_error")],
        ),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmConfig {
    /// Minimum seconds between two deliveries of the same alarm
    #[serde(default = "default_quiet_seconds")]
    pub quiet_seconds: u64,

    /// Names of the drivers alarms are delivered through, in order
    #[serde(default = "default_drivers")]
    pub drivers: Vec<String>,

    /// Timer entries older than `quiet_seconds * factor` are evicted
    #[serde(default = "default_retention_factor")]
    pub timer_retention_factor: u32,

    pub email: Option<EmailConfig>,

    pub webhook: Option<WebhookConfig>,

    pub discord: Option<DiscordConfig>,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            quiet_seconds: default_quiet_seconds(),
            drivers: default_drivers(),
            timer_retention_factor: default_retention_factor(),
            email: None,
            webhook: None,
            discord: None,
        }
    }
}

impl AlarmConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_seconds)
    }
}

fn default_quiet_seconds() -> u64 {
    600
}

fn default_drivers() -> Vec<String> {
    vec!["log".to_string()]
}

fn default_retention_factor() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,

    #[serde(default)]
    pub smtp_port: Option<u16>,

    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Implicit TLS instead of STARTTLS
    #[serde(default = "default_true")]
    pub ssl: bool,

    /// Sender address; derived from the username and SMTP domain if unset
    pub from: Option<String>,

    pub receivers: Vec<String>,

    #[serde(default = "default_email_attempts")]
    pub attempts: usize,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_email_attempts() -> usize {
    5
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_webhook_attempts")]
    pub attempts: usize,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Per request, a hung endpoint counts as a failed attempt
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_attempts() -> usize {
    1
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub url: String,
    pub user_id: Option<String>,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Seconds between two discovery passes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Seconds between two probes of one service
    #[serde(default = "default_prober_interval")]
    pub prober_interval: u64,

    /// Seconds after which a probe counts as TIMEOUT
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,

    /// Upper bound of the random delay before a new prober's first probe
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Status and history rows not updated for this many seconds are removed
    #[serde(default = "default_status_expired_period")]
    pub status_expired_period: u64,

    /// Seconds between two stale-status sweeps
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,

    /// Queue name rules; the built-in table is used when empty
    #[serde(default)]
    pub rules: Vec<DiscoveryRuleConfig>,

    /// Binary -> health endpoint
    #[serde(default)]
    pub checks: HashMap<String, HttpCheckConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval: default_refresh_interval(),
            prober_interval: default_prober_interval(),
            probe_timeout: default_probe_timeout(),
            jitter_ms: default_jitter_ms(),
            status_expired_period: default_status_expired_period(),
            cleanup_interval: default_cleanup_interval(),
            rules: Vec::new(),
            checks: HashMap::new(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_prober_interval() -> u64 {
    20
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_jitter_ms() -> u64 {
    2000
}

fn default_status_expired_period() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryRuleConfig {
    /// Regex with one capture group yielding the hostname
    pub pattern: String,
    pub binary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpCheckConfig {
    /// URL template, `{hostname}` is substituted
    pub url: String,

    /// Accepted status codes; any 2xx if unset
    pub expected_status: Option<Vec<u16>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagementConfig {
    #[serde(default = "default_management_port")]
    pub port: u16,

    /// Defaults to the bus credentials
    pub userid: Option<String>,
    pub password: Option<String>,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            port: default_management_port(),
            userid: None,
            password: None,
        }
    }
}

fn default_management_port() -> u16 {
    15672
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_notifier_exchange")]
    pub exchange: String,

    /// Message TTL in seconds; no TTL when zero
    #[serde(default = "default_notifier_ttl")]
    pub ttl_seconds: u64,

    #[serde(default = "default_notifier_event_types")]
    pub event_types: Vec<String>,

    /// Broker to publish to; defaults to the first bus host
    pub host: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            exchange: default_notifier_exchange(),
            ttl_seconds: default_notifier_ttl(),
            event_types: default_notifier_event_types(),
            host: None,
        }
    }
}

impl NotifierConfig {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }
}

fn default_notifier_exchange() -> String {
    "nvs_fanout".to_string()
}

fn default_notifier_ttl() -> u64 {
    86400
}

fn default_notifier_event_types() -> Vec<String> {
    vec![
        "compute.instance.delete.end".to_string(),
        "compute.instance.public_interface.attach".to_string(),
        "compute.instance.public_interface.detach".to_string(),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct BiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Unfinished actions older than this are discarded
    #[serde(default = "default_bi_max_age")]
    pub max_age_seconds: u64,

    /// Minimum seconds between two sweeps of the live action map
    #[serde(default = "default_bi_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for BiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_seconds: default_bi_max_age(),
            cleanup_interval_seconds: default_bi_cleanup_interval(),
        }
    }
}

fn default_bi_max_age() -> u64 {
    86400
}

fn default_bi_cleanup_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// HTTP endpoint receiving probe metrics; logged only when unset
    pub url: Option<String>,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
