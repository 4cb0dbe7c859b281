//! Multi-message action correlation
//!
//! Notifications sharing one request id are folded into an [`Action`] by
//! per-event-type [`Tagger`]s. Finished actions are handed to a completion
//! callback, abandoned ones are purged after a maximum age.

pub mod engine;
pub mod taggers;

pub use engine::{Action, CompletionCallback, Correlator};
pub use taggers::{RuleTagger, Tagger, TaggerError, default_taggers};
