use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Result of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// The service answered correctly
    #[serde(rename = "success")]
    Ok,

    /// No answer in time, the service is probably offline
    #[serde(rename = "timeout")]
    Timeout,

    /// The service answered, but not correctly
    #[serde(rename = "failed")]
    Failed,
}

impl ProbeOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ProbeOutcome::Ok)
    }

    /// Value pushed to the metrics sink
    pub fn metric_value(&self) -> u8 {
        match self {
            ProbeOutcome::Ok => 0,
            ProbeOutcome::Timeout => 1,
            ProbeOutcome::Failed => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok => "success",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change; `start_at..end_at` is the tenure of `old_state`
#[derive(Debug, Clone, PartialEq)]
pub struct StateTransition {
    pub old_state: ProbeOutcome,
    pub new_state: ProbeOutcome,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration: TimeDelta,
}

impl StateTransition {
    pub fn is_failure(&self) -> bool {
        self.old_state.is_ok() && !self.new_state.is_ok()
    }

    pub fn is_recovery(&self) -> bool {
        !self.old_state.is_ok() && self.new_state.is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: Option<(ProbeOutcome, DateTime<Utc>)>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> Option<ProbeOutcome> {
        self.current.map(|(state, _)| state)
    }

    pub fn entered_at(&self) -> Option<DateTime<Utc>> {
        self.current.map(|(_, at)| at)
    }

    /// Move to `new_state` at `now`.
    ///
    /// The first result only seeds the machine. Staying in the same state
    /// keeps its start time.
    pub fn change_to(&mut self, new_state: ProbeOutcome, now: DateTime<Utc>) -> Option<StateTransition> {
        match self.current {
            None => {
                self.current = Some((new_state, now));
                None
            }
            Some((state, _)) if state == new_state => None,
            Some((old_state, start_at)) => {
                self.current = Some((new_state, now));
                Some(StateTransition {
                    old_state,
                    new_state,
                    start_at,
                    end_at: now,
                    duration: now - start_at,
                })
            }
        }
    }
}
