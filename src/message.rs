//! Decoded bus notifications
//!
//! Services publish lifecycle notifications as JSON records. A record is only
//! accepted when it is an object carrying at least `event_type` and
//! `publisher_id`; everything else is a [`DecodeError`] which the pipeline logs
//! and drops.
//!
//! Keys prefixed with `_context_` describe the request that caused the
//! notification (request id, tenant, user, ...). They are collected into
//! [`Message::context`] with the prefix stripped.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of request-context keys in a raw notification
pub const CONTEXT_PREFIX: &str = "_context_";

/// Envelope key used by oslo messaging v2 to wrap the real message
const OSLO_MESSAGE_KEY: &str = "oslo.message";

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message is not a JSON object")]
    NotAnObject,

    #[error("message is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("message field `{0}` has an unexpected type")]
    InvalidField(&'static str),

    #[error("unknown message priority `{0}`")]
    UnknownPriority(String),
}

/// Undecoded input as it comes off the transport
#[derive(Debug, Clone)]
pub enum RawMessage {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl From<String> for RawMessage {
    fn from(value: String) -> Self {
        RawMessage::Text(value)
    }
}

impl From<&str> for RawMessage {
    fn from(value: &str) -> Self {
        RawMessage::Text(value.to_string())
    }
}

impl From<Vec<u8>> for RawMessage {
    fn from(value: Vec<u8>) -> Self {
        RawMessage::Bytes(value)
    }
}

impl From<Value> for RawMessage {
    fn from(value: Value) -> Self {
        RawMessage::Json(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Info,
    Warn,
    Error,
    Critical,
}

impl Priority {
    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        match raw.to_ascii_lowercase().as_str() {
            "info" => Ok(Priority::Info),
            "warn" | "warning" => Ok(Priority::Warn),
            "error" => Ok(Priority::Error),
            "critical" => Ok(Priority::Critical),
            _ => Err(DecodeError::UnknownPriority(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Info => "info",
            Priority::Warn => "warn",
            Priority::Error => "error",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded bus notification
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Dotted event name, e.g. `compute.instance.create.end`
    pub event_type: String,

    /// `<binary>.<hostname>` of the emitting service
    pub publisher_id: String,

    /// Timestamp as sent by the publisher
    pub timestamp: String,

    pub priority: Priority,

    pub message_id: Option<String>,

    pub payload: Value,

    /// Request context with the `_context_` prefix stripped
    pub context: BTreeMap<String, Value>,

    /// Any other top-level keys
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn decode(raw: RawMessage) -> Result<Self, DecodeError> {
        let value = match raw {
            RawMessage::Text(text) => serde_json::from_str(&text)?,
            RawMessage::Bytes(bytes) => serde_json::from_slice(&bytes)?,
            RawMessage::Json(value) => value,
        };

        let Value::Object(mut object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        // oslo v2 envelope: the real message is a JSON string inside
        if let Some(inner) = object.remove(OSLO_MESSAGE_KEY) {
            let inner = match inner {
                Value::String(text) => serde_json::from_str(&text)?,
                other => other,
            };
            return Message::decode(RawMessage::Json(inner));
        }

        let event_type = take_string(&mut object, "event_type")?
            .ok_or(DecodeError::MissingField("event_type"))?;
        let publisher_id = take_string(&mut object, "publisher_id")?
            .ok_or(DecodeError::MissingField("publisher_id"))?;
        let timestamp = take_string(&mut object, "timestamp")?.unwrap_or_default();
        let priority = match take_string(&mut object, "priority")? {
            Some(raw) => Priority::parse(&raw)?,
            None => Priority::Info,
        };
        let message_id = take_string(&mut object, "message_id")?;
        let payload = object
            .remove("payload")
            .filter(|payload| !payload.is_null())
            .unwrap_or_else(|| Value::Object(Map::new()));

        let mut context = BTreeMap::new();
        let mut extra = Map::new();
        for (key, value) in object {
            match key.strip_prefix(CONTEXT_PREFIX) {
                Some(name) => {
                    context.insert(name.to_string(), value);
                }
                None => {
                    extra.insert(key, value);
                }
            }
        }

        Ok(Message {
            event_type,
            publisher_id,
            timestamp,
            priority,
            message_id,
            payload,
            context,
            extra,
        })
    }

    /// String value of a context key (without the `_context_` prefix)
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context_str("request_id")
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.context_str("project_id")
    }

    pub fn tenant_name(&self) -> Option<&str> {
        self.context_str("project_name")
    }

    /// Split the publisher into `(binary, hostname)` on the first dot
    pub fn binary_and_hostname(&self) -> Option<(&str, &str)> {
        self.publisher_id.split_once('.')
    }

    /// Walk `path` into the payload
    pub fn payload_at(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.payload, |value, key| value.get(*key))
    }

    /// Parse the publisher timestamp; naive timestamps are taken as UTC.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }

    /// Re-encode the message without its request context
    pub fn to_json_without_context(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert("event_type".into(), Value::String(self.event_type.clone()));
        object.insert(
            "publisher_id".into(),
            Value::String(self.publisher_id.clone()),
        );
        object.insert("timestamp".into(), Value::String(self.timestamp.clone()));
        object.insert(
            "priority".into(),
            Value::String(self.priority.as_str().to_uppercase()),
        );
        if let Some(message_id) = &self.message_id {
            object.insert("message_id".into(), Value::String(message_id.clone()));
        }
        object.insert("payload".into(), self.payload.clone());
        Value::Object(object)
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn take_string(
    object: &mut Map<String, Value>,
    key: &'static str,
) -> Result<Option<String>, DecodeError> {
    match object.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(_) => Err(DecodeError::InvalidField(key)),
    }
}
