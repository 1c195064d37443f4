//! One-shot timer set for reservation reconfirmation retries and
//! idle-queue deletion. Entries are pure data; the embedding dispatch loop
//! drives firing through [`ServerState::fire_due_timers`](crate::server::ServerState::fire_due_timers).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::resv::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Retry,
    IdleDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub owner: String,
    pub kind: TimerKind,
    pub fire_at: DateTime<Utc>,
}

/// At most one timer per (owner, kind); scheduling replaces any prior one.
#[derive(Debug, Default)]
pub struct TimerSet {
    entries: HashMap<(String, TimerKind), DateTime<Utc>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel-and-replace. The new timer is only installed when `fire_at`
    /// is strictly before `owner_end` (never schedule past the owning
    /// reservation's own expiry). Returns whether a timer is now armed.
    pub fn schedule(&mut self, owner: &str, kind: TimerKind, fire_at: DateTime<Utc>, owner_end: DateTime<Utc>) -> bool {
        self.entries.remove(&(owner.to_string(), kind));
        if fire_at >= owner_end {
            tracing::debug!(owner, ?kind, %fire_at, %owner_end, "Timer past reservation end, not armed");
            return false;
        }
        self.entries.insert((owner.to_string(), kind), fire_at);
        true
    }

    /// Remove the matching timer if present; idempotent.
    pub fn cancel(&mut self, owner: &str, kind: TimerKind) -> bool {
        self.entries.remove(&(owner.to_string(), kind)).is_some()
    }

    /// Cancel every timer owned by `owner` (reservation purge path).
    pub fn cancel_all(&mut self, owner: &str) {
        self.entries.retain(|(o, _), _| o != owner);
    }

    pub fn fire_time(&self, owner: &str, kind: TimerKind) -> Option<DateTime<Utc>> {
        self.entries.get(&(owner.to_string(), kind)).copied()
    }

    /// Remove and return every entry due at `now`, soonest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<TimerEntry> {
        let mut due: Vec<TimerEntry> = self
            .entries
            .iter()
            .filter(|(_, fire_at)| **fire_at <= now)
            .map(|((owner, kind), fire_at)| TimerEntry {
                owner: owner.clone(),
                kind: *kind,
                fire_at: *fire_at,
            })
            .collect();
        due.sort_by_key(|e| e.fire_at);
        for entry in &due {
            self.entries.remove(&(entry.owner.clone(), entry.kind));
        }
        due
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Next reconfirmation attempt for a degraded reservation: the midpoint
/// between now and the reservation start. When the midpoint is not in the
/// future (the window already opened), fall back to a short fixed delay
/// after the soonest occurrence start.
pub fn determine_retry(resv: &Reservation, now: DateTime<Utc>, fallback_delay_secs: i64) -> DateTime<Utc> {
    let midpoint = now + (resv.start - now) / 2;
    if midpoint > now {
        midpoint
    } else {
        resv.start + chrono::Duration::seconds(fallback_delay_secs)
    }
}
