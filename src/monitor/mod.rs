//! Service health probing
//!
//! The discovery loop maps broker queues to [`ServiceIdentity`]s and keeps
//! one prober actor per identity. Each prober health-checks its instance on
//! a fixed interval, records the result and raises broken/recovered alarms
//! on state transitions.

pub mod checker;
pub mod discovery;
pub mod management;
pub mod messages;
pub mod metrics;
pub mod prober;
pub mod state;

pub use checker::{HealthChecker, HttpHealthChecker, ServiceIdentity};
pub use discovery::{DiscoveryHandle, DiscoverySettings, RuleTable, ServiceDiscovery};
pub use management::{BrokerManagement, QueueInfo, RabbitManagementClient};
pub use messages::{ProbeReport, RefreshSummary};
pub use metrics::{HttpMetricsSink, LogMetricsSink, MetricsSink};
pub use prober::{ProberContext, ProberHandle, service_alarm_identity};
pub use state::{ProbeOutcome, StateMachine, StateTransition};
