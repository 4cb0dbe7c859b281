use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{trace, warn};

use super::state::ProbeOutcome;
use crate::config::HttpCheckConfig;

/// One probed service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentity {
    pub binary: String,
    pub hostname: String,
}

impl ServiceIdentity {
    pub fn new(binary: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            hostname: hostname.into(),
        }
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.binary, self.hostname)
    }
}

/// Health-check capability
///
/// An `Err` is recorded as [`ProbeOutcome::Failed`] by the prober.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Whether instances of `binary` can be checked at all
    fn supports(&self, _binary: &str) -> bool {
        true
    }

    async fn check(&self, service: &ServiceIdentity) -> anyhow::Result<ProbeOutcome>;
}

/// Checks services through a per-binary HTTP endpoint
pub struct HttpHealthChecker {
    client: reqwest::Client,
    checks: HashMap<String, HttpCheckConfig>,
}

impl HttpHealthChecker {
    pub fn new(checks: HashMap<String, HttpCheckConfig>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, checks })
    }

    fn evaluate_response(check: &HttpCheckConfig, status_code: u16) -> ProbeOutcome {
        let status_ok = match &check.expected_status {
            Some(expected) => expected.contains(&status_code),
            None => (200..300).contains(&status_code),
        };

        if status_ok {
            ProbeOutcome::Ok
        } else {
            ProbeOutcome::Failed
        }
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    fn supports(&self, binary: &str) -> bool {
        self.checks.contains_key(binary)
    }

    async fn check(&self, service: &ServiceIdentity) -> anyhow::Result<ProbeOutcome> {
        let check = self
            .checks
            .get(&service.binary)
            .with_context(|| format!("no health check configured for {}", service.binary))?;
        let url = check.url.replace("{hostname}", &service.hostname);
        trace!("checking {service} at {url}");

        match self.client.get(&url).send().await {
            Ok(response) => Ok(Self::evaluate_response(check, response.status().as_u16())),
            Err(e) if e.is_timeout() => {
                warn!("{service} did not answer in time");
                Ok(ProbeOutcome::Timeout)
            }
            Err(e) => Err(e).context("HTTP request failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_response_uses_expected_codes() {
        let default = HttpCheckConfig {
            url: "http://{hostname}/".to_string(),
            expected_status: None,
        };
        let explicit = HttpCheckConfig {
            url: "http://{hostname}/".to_string(),
            expected_status: Some(vec![401]),
        };

        assert_eq!(HttpHealthChecker::evaluate_response(&default, 204), ProbeOutcome::Ok);
        assert_eq!(HttpHealthChecker::evaluate_response(&default, 500), ProbeOutcome::Failed);
        assert_eq!(HttpHealthChecker::evaluate_response(&explicit, 401), ProbeOutcome::Ok);
        assert_eq!(HttpHealthChecker::evaluate_response(&explicit, 200), ProbeOutcome::Failed);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(
            ServiceIdentity::new("nova-compute", "node-1").to_string(),
            "nova-compute@node-1"
        );
    }
}
