use tracing::warn;

use super::engine::Action;
use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaggerError {
    #[error("bi_name already set to '{existing}', refusing '{new}'")]
    BiNameConflict { existing: String, new: String },

    #[error("payload field `{0}` is missing")]
    MissingField(&'static str),
}

/// Merges the fields of one event type into an action
pub trait Tagger: Send + Sync {
    fn event_type(&self) -> &str;

    fn tag(&self, action: &mut Action, message: &Message) -> Result<(), TaggerError>;
}

/// Derives the operation name from the message
pub type BiNamer = fn(&Message) -> Result<&'static str, TaggerError>;

/// Tagger assembled from the three basic steps
///
/// Steps run in a fixed order: fill start and tenant, set the name, fill
/// the end.
#[derive(Clone)]
pub struct RuleTagger {
    event_type: &'static str,
    fills_start: bool,
    bi_name: Option<BiNamer>,
    fills_end: bool,
}

impl RuleTagger {
    /// Opens an action under the name returned by `bi_name`
    pub fn start(event_type: &'static str, bi_name: BiNamer) -> Self {
        Self {
            event_type,
            fills_start: true,
            bi_name: Some(bi_name),
            fills_end: false,
        }
    }

    /// Opens an action whose name is only known later
    pub fn opening(event_type: &'static str) -> Self {
        Self {
            event_type,
            fills_start: true,
            bi_name: None,
            fills_end: false,
        }
    }

    /// Names an already opened action
    pub fn naming(event_type: &'static str, bi_name: BiNamer) -> Self {
        Self {
            event_type,
            fills_start: false,
            bi_name: Some(bi_name),
            fills_end: false,
        }
    }

    /// Closes an action
    pub fn end(event_type: &'static str) -> Self {
        Self {
            event_type,
            fills_start: false,
            bi_name: None,
            fills_end: true,
        }
    }

    /// Opens and closes an action with a single message
    pub fn sync(event_type: &'static str, bi_name: BiNamer) -> Self {
        Self {
            event_type,
            fills_start: true,
            bi_name: Some(bi_name),
            fills_end: true,
        }
    }
}

impl Tagger for RuleTagger {
    fn event_type(&self) -> &str {
        self.event_type
    }

    fn tag(&self, action: &mut Action, message: &Message) -> Result<(), TaggerError> {
        if self.fills_start {
            action.start_at = Some(message.timestamp.clone());
            action.tenant_id = message.tenant_id().map(str::to_string);
            action.tenant_name = message.tenant_name().map(str::to_string);
        }

        if let Some(bi_name) = self.bi_name {
            action.set_bi_name(bi_name(message)?)?;
        }

        if self.fills_end {
            if action.start_at.is_none() {
                warn!(
                    "{}: {} not started but ending",
                    self.event_type, action.request_id
                );
            } else {
                action.end_at = Some(message.timestamp.clone());
            }
        }

        Ok(())
    }
}

macro_rules! named {
    ($name:literal) => {
        |_: &Message| -> Result<&'static str, TaggerError> { Ok($name) }
    };
}

fn instance_create_source(message: &Message) -> Result<&'static str, TaggerError> {
    let image_type = message
        .payload_at(&["image_meta", "image_type"])
        .and_then(|value| value.as_str());

    Ok(match image_type {
        Some("snapshot") => "compute.instance.create.from.snapshot",
        _ => "compute.instance.create.from.image",
    })
}

fn resize_or_migrate(message: &Message) -> Result<&'static str, TaggerError> {
    let old = message
        .payload_at(&["instance_type_id"])
        .ok_or(TaggerError::MissingField("instance_type_id"))?;
    let new = message
        .payload_at(&["new_instance_type_id"])
        .ok_or(TaggerError::MissingField("new_instance_type_id"))?;

    Ok(if old != new {
        "compute.instance.resize"
    } else {
        "compute.instance.migrate"
    })
}

/// Every tagger known to the engine
pub fn default_taggers() -> Vec<Box<dyn Tagger>> {
    let rules = vec![
        // instance snapshot
        RuleTagger::start(
            "compute.instance.snapshot.start",
            named!("compute.instance.snapshot"),
        ),
        RuleTagger::end("compute.instance.snapshot.end"),
        // instance create; only the first of several create.end counts
        RuleTagger::start("compute.instance.create.start", instance_create_source),
        RuleTagger::end("compute.instance.create.end"),
        // instance delete
        RuleTagger::start(
            "compute.instance.delete.start",
            named!("compute.instance.delete"),
        ),
        RuleTagger::end("compute.instance.delete.end"),
        // instance resize and migrate
        RuleTagger::opening("compute.instance.resize.prep.start"),
        RuleTagger::naming("compute.instance.resize.prep.end", resize_or_migrate),
        RuleTagger::end("compute.instance.finish_resize.end"),
        // volumes
        RuleTagger::start("volume.create.start", named!("volume.create")),
        RuleTagger::end("volume.create.end"),
        RuleTagger::start("volume.delete.start", named!("volume.delete")),
        RuleTagger::end("volume.delete.end"),
        RuleTagger::start("volume.resize.start", named!("volume.resize")),
        RuleTagger::end("volume.resize.end"),
        RuleTagger::sync(
            "compute.instance.volume.attach",
            named!("compute.instance.volume.attach"),
        ),
        RuleTagger::sync(
            "compute.instance.volume.detach",
            named!("compute.instance.volume.detach"),
        ),
        // network
        RuleTagger::start("network.create.start", named!("network.create")),
        RuleTagger::end("network.create.end"),
        RuleTagger::start("port.create.start", named!("port.create")),
        RuleTagger::end("port.create.end"),
    ];

    rules
        .into_iter()
        .map(|rule| Box::new(rule) as Box<dyn Tagger>)
        .collect()
}
