use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::taggers::{Tagger, TaggerError};
use crate::message::Message;

/// One logical user operation assembled from several notifications
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub request_id: String,
    pub bi_name: Option<String>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
    created_at: Instant,
}

impl Action {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            bi_name: None,
            start_at: None,
            end_at: None,
            tenant_id: None,
            tenant_name: None,
            created_at: Instant::now(),
        }
    }

    pub fn finished(&self) -> bool {
        self.end_at.is_some()
    }

    pub fn started(&self) -> bool {
        self.start_at.is_some()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Setting the same name twice is a no-op, a different one an error.
    pub fn set_bi_name(&mut self, name: &str) -> Result<(), TaggerError> {
        match &self.bi_name {
            Some(existing) if existing == name => Ok(()),
            Some(existing) => Err(TaggerError::BiNameConflict {
                existing: existing.clone(),
                new: name.to_string(),
            }),
            None => {
                self.bi_name = Some(name.to_string());
                Ok(())
            }
        }
    }
}

pub type CompletionCallback = Arc<dyn Fn(&Action) + Send + Sync>;

struct LiveActions {
    actions: HashMap<String, Action>,
    last_cleanup: Option<Instant>,
}

/// Owns the live actions and folds every message into them
///
/// Reading and mutating an action happen under one lock; the completion
/// callback runs after the lock is released.
pub struct Correlator {
    taggers: HashMap<String, Box<dyn Tagger>>,
    live: Mutex<LiveActions>,
    callback: CompletionCallback,
    max_age: Duration,
    cleanup_interval: Duration,
}

impl Correlator {
    pub fn new(
        taggers: Vec<Box<dyn Tagger>>,
        max_age: Duration,
        cleanup_interval: Duration,
        callback: CompletionCallback,
    ) -> anyhow::Result<Self> {
        let mut registry = HashMap::new();
        for tagger in taggers {
            let event_type = tagger.event_type().to_string();
            debug!("Register BI tagger: {event_type}");
            if registry.insert(event_type.clone(), tagger).is_some() {
                anyhow::bail!("duplicate tagger for {event_type}");
            }
        }

        Ok(Self {
            taggers: registry,
            live: Mutex::new(LiveActions {
                actions: HashMap::new(),
                last_cleanup: None,
            }),
            callback,
            max_age,
            cleanup_interval,
        })
    }

    /// Fold `message` into the action of its request.
    ///
    /// Returns the action if this message finished it. A tagger error leaves
    /// the action as it was before the message.
    pub fn process(&self, message: &Message) -> Result<Option<Action>, TaggerError> {
        let (finished, result) = {
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = match message.request_id() {
                Some(request_id) => self.tag(&mut live.actions, request_id, message),
                None => {
                    debug!("{} carries no request id", message.event_type);
                    (None, Ok(()))
                }
            };
            self.cleanup(&mut live);
            outcome
        };

        if let Some(action) = &finished {
            (self.callback)(action);
        }

        result.map(|()| finished)
    }

    fn tag(
        &self,
        actions: &mut HashMap<String, Action>,
        request_id: &str,
        message: &Message,
    ) -> (Option<Action>, Result<(), TaggerError>) {
        let action = actions
            .entry(request_id.to_string())
            .or_insert_with(|| Action::new(request_id));

        let Some(tagger) = self.taggers.get(&message.event_type) else {
            return (None, Ok(()));
        };

        let mut draft = action.clone();
        if let Err(e) = tagger.tag(&mut draft, message) {
            warn!("tagging {request_id} with {} failed: {e}", message.event_type);
            return (None, Err(e));
        }
        *action = draft;

        if action.finished() {
            (actions.remove(request_id), Ok(()))
        } else {
            (None, Ok(()))
        }
    }

    fn cleanup(&self, live: &mut LiveActions) {
        let now = Instant::now();
        if live
            .last_cleanup
            .is_some_and(|last| now.duration_since(last) < self.cleanup_interval)
        {
            return;
        }
        live.last_cleanup = Some(now);

        debug!("Clean up old actions");
        live.actions.retain(|_, action| {
            if action.age() < self.max_age {
                return true;
            }
            if action.started() {
                warn!(
                    "Cleanup started action {} ({:?})",
                    action.request_id, action.bi_name
                );
            }
            false
        });
    }

    /// Number of unfinished actions
    pub fn live_actions(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actions
            .len()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .actions
            .contains_key(request_id)
    }
}
