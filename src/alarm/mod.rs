//! Alarm judgement and dispatch
//!
//! An alarm is identified by an [`AlarmIdentity`]. The [`AlarmJudge`]
//! decides whether it may fire right now, the [`AlarmDispatcher`] serializes
//! attempts per identity and hands allowed alarms to every configured
//! [`Driver`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod dispatcher;
pub mod drivers;
pub mod judge;
pub mod timer;

pub use dispatcher::{AlarmDispatcher, FireOutcome};
pub use drivers::{Driver, DriverError, DriverRegistry};
pub use judge::{AlarmCondition, AlarmJudge, ShutupWindow, Verdict};
pub use timer::AlarmTimer;

/// Flat key/value details handed to drivers along with title and content
pub type AlarmContext = BTreeMap<String, String>;

/// Context key telling drivers what kind of alarm they deliver
pub const CONTEXT_KIND: &str = "kind";

/// Stable fingerprint of a recurring condition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmIdentity(String);

impl AlarmIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlarmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlarmIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AlarmIdentity {
    fn from(value: String) -> Self {
        Self(value)
    }
}
