use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::alarm::{AlarmCondition, AlarmContext, AlarmDispatcher, CONTEXT_KIND, FireOutcome};
use crate::message::{Message, parse_timestamp};
use crate::pipeline::chain::Handler;
use crate::storage::{ExceptionRecord, ExceptionReport, StorageBackend};

pub const EXCEPTION_EVENT_TYPE: &str = "sentry.log.error";

#[derive(Debug, Default, Deserialize)]
struct ExceptionPayload {
    binary: Option<String>,
    datetime: Option<String>,
    exception: Option<ExceptionInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct ExceptionInfo {
    exc_class: Option<String>,
    #[serde(default)]
    exc_value: String,
    #[serde(default)]
    frames: Vec<Frame>,
}

#[derive(Debug, Default, Deserialize)]
struct Frame {
    #[serde(default)]
    filename: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    lineno: i64,
}

/// Fingerprint of an exception: same class raised at the same place
pub fn exception_fingerprint(exc_class: &str, file_path: &str, func_name: &str, lineno: i64) -> String {
    let digest = md5::compute(format!("{exc_class}{file_path}{func_name}{lineno}"));
    format!("{digest:x}")
}

/// Aggregates exception reports and raises an alarm for each of them
pub struct LogErrorHandler {
    env_name: String,
    storage: Arc<dyn StorageBackend>,
    dispatcher: Arc<AlarmDispatcher>,
}

impl LogErrorHandler {
    pub fn new(
        env_name: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        dispatcher: Arc<AlarmDispatcher>,
    ) -> Self {
        Self {
            env_name: env_name.into(),
            storage,
            dispatcher,
        }
    }

    fn report(message: &Message) -> anyhow::Result<Option<ExceptionReport>> {
        let payload: ExceptionPayload = serde_json::from_value(message.payload.clone())?;

        let Some(exception) = payload.exception else {
            return Ok(None);
        };
        let Some(exc_class) = exception.exc_class else {
            return Ok(None);
        };
        let last_frame = exception.frames.into_iter().last().unwrap_or_default();

        let seen_at = payload
            .datetime
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| message.parsed_timestamp())
            .unwrap_or_else(Utc::now);

        Ok(Some(ExceptionReport {
            uuid: exception_fingerprint(
                &exc_class,
                &last_frame.filename,
                &last_frame.name,
                last_frame.lineno,
            ),
            exc_class,
            exc_value: exception.exc_value,
            file_path: last_frame.filename,
            func_name: last_frame.name,
            lineno: last_frame.lineno,
            binary: payload.binary.unwrap_or_default(),
            hostname: message.publisher_id.clone(),
            payload: message.payload.clone(),
            seen_at,
        }))
    }

    async fn alarm(&self, record: &ExceptionRecord) -> FireOutcome {
        let condition = AlarmCondition::new(record.uuid.as_str())
            .on_process(record.on_process)
            .shutup(record.shutup);

        let title = format!("{} | {} | {}", self.env_name, record.hostname, record.exc_value);
        let content = format!(
            "{}: {}\n  at {}:{} in {}\n  seen {} times since {}",
            record.exc_class,
            record.exc_value,
            record.file_path,
            record.lineno,
            record.func_name,
            record.count,
            record.first_seen.to_rfc3339(),
        );

        let context = AlarmContext::from([
            (CONTEXT_KIND.to_string(), "exception".to_string()),
            ("uuid".to_string(), record.uuid.clone()),
            ("binary".to_string(), record.binary.clone()),
            ("hostname".to_string(), record.hostname.clone()),
            ("exc_class".to_string(), record.exc_class.clone()),
            ("count".to_string(), record.count.to_string()),
        ]);

        self.dispatcher.fire(&condition, &title, &content, &context).await
    }
}

#[async_trait]
impl Handler for LogErrorHandler {
    fn name(&self) -> &str {
        "log_error"
    }

    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        if message.event_type != EXCEPTION_EVENT_TYPE {
            warn!("Unknown msg_type {}, can not process.", message.event_type);
            return Ok(());
        }

        let Some(report) = Self::report(message)? else {
            debug!("no exception log, skip.");
            return Ok(());
        };
        info!(
            "Receive exception: '{}' from: {}",
            report.exc_value, report.hostname
        );

        let record = self.storage.upsert_exception(report).await?;
        match self.alarm(&record).await {
            FireOutcome::Suppressed(verdict) => {
                debug!("exception {} not alarmed: {verdict}", record.uuid)
            }
            FireOutcome::Delivered { failed, .. } if !failed.is_empty() => {
                warn!("exception {} alarm failed on {failed:?}", record.uuid)
            }
            FireOutcome::Delivered { .. } => {}
        }
        Ok(())
    }
}
