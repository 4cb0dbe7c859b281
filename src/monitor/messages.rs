//! Commands understood by the prober and discovery actors

use std::time::Duration;

use tokio::sync::oneshot;

use super::checker::ServiceIdentity;
use super::state::{ProbeOutcome, StateTransition};

/// What one probe iteration observed
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub outcome: ProbeOutcome,
    pub response_time: Duration,

    /// Set when the outcome differs from the previous one
    pub transition: Option<StateTransition>,
}

#[derive(Debug)]
pub enum ProberCommand {
    /// Probe immediately, bypassing the interval timer
    ProbeNow {
        respond_to: oneshot::Sender<ProbeReport>,
    },

    /// Stop after the current iteration
    Shutdown,
}

/// Probers started and stopped by one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub started: Vec<ServiceIdentity>,
    pub stopped: Vec<ServiceIdentity>,
}

#[derive(Debug)]
pub enum DiscoveryCommand {
    /// Run a discovery pass immediately
    RefreshNow {
        respond_to: oneshot::Sender<anyhow::Result<RefreshSummary>>,
    },

    /// Identities that currently have a running prober
    RunningServices {
        respond_to: oneshot::Sender<Vec<ServiceIdentity>>,
    },

    /// Stop every prober, then the loop
    Shutdown,
}
