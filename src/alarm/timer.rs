//! Quiet-period bookkeeping per alarm identity

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::AlarmIdentity;

struct TimerState {
    last_fired: HashMap<AlarmIdentity, Instant>,
    last_sweep: Instant,
}

/// Remembers when each identity last fired
///
/// At most one fire is allowed per identity and quiet window. The window
/// slides from the last allowed fire, denied attempts leave it untouched.
/// Entries older than `quiet * retention_factor` are evicted by a sweep that
/// runs at most once per quiet window.
pub struct AlarmTimer {
    retention_factor: u32,
    state: Mutex<TimerState>,
}

impl AlarmTimer {
    pub fn new(retention_factor: u32) -> Self {
        Self {
            retention_factor: retention_factor.max(1),
            state: Mutex::new(TimerState {
                last_fired: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Check and record in one step.
    pub fn can_fire(&self, identity: &AlarmIdentity, quiet: Duration) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.duration_since(state.last_sweep) >= quiet {
            let retention = quiet * self.retention_factor;
            let before = state.last_fired.len();
            state
                .last_fired
                .retain(|_, fired| now.duration_since(*fired) < retention);
            state.last_sweep = now;
            debug!(
                "evicted {} alarm timer entries",
                before - state.last_fired.len()
            );
        }

        match state.last_fired.get(identity) {
            Some(last) if now.duration_since(*last) < quiet => false,
            _ => {
                state.last_fired.insert(identity.clone(), now);
                true
            }
        }
    }

    /// Number of identities currently remembered
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_fired
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AlarmTimer {
    fn default() -> Self {
        Self::new(2)
    }
}
