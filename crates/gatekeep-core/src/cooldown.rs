//! Per-subject grant spacing.
//!
//! The cache is keyed by [`Subject`], not by channel, so a face grant and a
//! card grant for the same person inside the window collapse into one.
//! It is not internally synchronized: the arbiter owns it and serializes
//! every check-then-record through `&mut self`.

use crate::types::Subject;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Default minimum spacing between two grants for one subject.
pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(5);

/// Default bound on tracked subjects.
pub const DEFAULT_COOLDOWN_CAPACITY: usize = 4096;

#[derive(Debug)]
pub struct CooldownCache {
    window: Duration,
    capacity: usize,
    entries: HashMap<Subject, DateTime<Utc>>,
}

impl CooldownCache {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if no grant is on record for `subject` or the window has elapsed.
    pub fn should_grant(&self, subject: Subject, now: DateTime<Utc>) -> bool {
        self.remaining(subject, now).is_none()
    }

    /// Time left before `subject` may be granted again, if any.
    pub fn remaining(&self, subject: Subject, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.entries.get(&subject)?;
        // A wall clock stepped backwards reads as a negative elapsed time;
        // treat it as expired rather than lock the subject out.
        let elapsed = (now - *last).to_std().ok()?;
        self.window.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    /// Record a grant that has already been handed to the access log.
    pub fn record_grant(&mut self, subject: Subject, now: DateTime<Utc>) {
        if !self.entries.contains_key(&subject) && self.entries.len() >= self.capacity {
            self.sweep(now);
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(subject, now);
    }

    /// Drop entries whose window has elapsed. Returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let window = self.window;
        self.entries.retain(|_, last| match (now - *last).to_std() {
            Ok(elapsed) => elapsed < window,
            Err(_) => false,
        });
        before - self.entries.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(subject, last)| (**last, **subject))
            .map(|(subject, _)| *subject);
        if let Some(subject) = oldest {
            self.entries.remove(&subject);
            tracing::debug!(%subject, "cooldown cache full; evicted oldest entry");
        }
    }
}

impl Default for CooldownCache {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_WINDOW, DEFAULT_COOLDOWN_CAPACITY)
    }
}
