use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use crate::bi::{Action, CompletionCallback, Correlator};
use crate::message::Message;
use crate::pipeline::chain::Handler;

/// Service name written into every BI record
pub const BI_SERVICE: &str = "nvs";

/// One line of the BI log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiRecord {
    pub start_at: String,
    pub end_at: String,
    pub action_name: String,
    pub tenant_id: String,
    pub tenant_name: String,
    pub service: String,
    pub environment: String,
}

impl BiRecord {
    /// Missing fields are written as empty strings.
    pub fn from_action(action: &Action, environment: &str) -> Self {
        Self {
            start_at: action.start_at.clone().unwrap_or_default(),
            end_at: action.end_at.clone().unwrap_or_default(),
            action_name: action.bi_name.clone().unwrap_or_default(),
            tenant_id: action.tenant_id.clone().unwrap_or_default(),
            tenant_name: action.tenant_name.clone().unwrap_or_default(),
            service: BI_SERVICE.to_string(),
            environment: environment.to_string(),
        }
    }
}

/// Completion callback writing one JSON line per finished action on the `bi` target
pub fn bi_log_callback(environment: impl Into<String>) -> CompletionCallback {
    let environment = environment.into();
    Arc::new(move |action: &Action| {
        match serde_json::to_string(&BiRecord::from_action(action, &environment)) {
            Ok(line) => info!(target: "bi", "{line}"),
            Err(e) => error!("cannot encode BI record of {}: {e}", action.request_id),
        }
    })
}

/// Feeds every message into the action correlator
pub struct BiLogHandler {
    correlator: Arc<Correlator>,
}

impl BiLogHandler {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }
}

#[async_trait]
impl Handler for BiLogHandler {
    fn name(&self) -> &str {
        "bi_log"
    }

    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.correlator.process(message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_record_fields_and_order() {
        let mut action = Action::new("req-1");
        action.bi_name = Some("create_vm".to_string());
        action.start_at = Some("2015-02-28 06:26:01".to_string());
        action.end_at = Some("2015-02-28 06:26:09".to_string());
        action.tenant_id = Some("t-1".to_string());

        let line = serde_json::to_string(&BiRecord::from_action(&action, "prod")).unwrap();

        assert!(line.starts_with(r#"{"start_at":"#));
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&line).unwrap(),
            json!({
                "start_at": "2015-02-28 06:26:01",
                "end_at": "2015-02-28 06:26:09",
                "action_name": "create_vm",
                "tenant_id": "t-1",
                "tenant_name": "",
                "service": "nvs",
                "environment": "prod",
            })
        );
    }
}
