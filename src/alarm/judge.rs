use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AlarmIdentity;
use super::timer::AlarmTimer;

/// Operator-defined range during which an identity never fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutupWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShutupWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Both bounds are inclusive.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

/// Everything the judge needs to know about one alarm-worthy condition
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmCondition {
    pub identity: AlarmIdentity,

    /// Someone is already handling the condition
    pub on_process: bool,

    pub shutup: Option<ShutupWindow>,
}

impl AlarmCondition {
    pub fn new(identity: impl Into<AlarmIdentity>) -> Self {
        Self {
            identity: identity.into(),
            on_process: false,
            shutup: None,
        }
    }

    pub fn on_process(mut self, on_process: bool) -> Self {
        self.on_process = on_process;
        self
    }

    pub fn shutup(mut self, shutup: Option<ShutupWindow>) -> Self {
        self.shutup = shutup;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    OnProcess,
    Shutup,
    Quiet,
}

impl Verdict {
    pub fn allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Verdict::Allow => "allowed",
            Verdict::OnProcess => "on process",
            Verdict::Shutup => "inside shutup window",
            Verdict::Quiet => "inside quiet period",
        };
        f.write_str(text)
    }
}

/// Composes the on-process, shutup and quiet-period gates
///
/// Gates are evaluated in that order and the first denial wins. The timer is
/// only consulted (and therefore only recorded) when the first two pass.
pub struct AlarmJudge {
    timer: AlarmTimer,
    quiet: Duration,
}

impl AlarmJudge {
    pub fn new(quiet: Duration, timer: AlarmTimer) -> Self {
        Self { timer, quiet }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    pub fn timer(&self) -> &AlarmTimer {
        &self.timer
    }

    pub fn evaluate(&self, condition: &AlarmCondition, now: DateTime<Utc>) -> Verdict {
        if condition.on_process {
            debug!("{} is on process", condition.identity);
            return Verdict::OnProcess;
        }

        if condition.shutup.is_some_and(|window| window.contains(now)) {
            debug!("{} is inside its shutup window", condition.identity);
            return Verdict::Shutup;
        }

        if !self.timer.can_fire(&condition.identity, self.quiet) {
            debug!(
                "{} already fired within {:?}",
                condition.identity, self.quiet
            );
            return Verdict::Quiet;
        }

        Verdict::Allow
    }
}
