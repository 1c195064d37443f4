//! `ServerState` owns the reservation core's data structures and wires them
//! to the external collaborators. All mutation happens on the embedding
//! server's single control thread; the dispatch loop calls the entry points
//! here and the timer loop calls [`ServerState::fire_due_timers`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::assign;
use crate::collab::Collaborators;
use crate::config::ServerConfig;
use crate::ledger::{self, NodeLedger, NodeRegistry};
use crate::resv::{Reservation, ResvState};
use crate::timer::{self, TimerKind, TimerSet};

pub struct ServerState {
    pub config: ServerConfig,
    pub resvs: HashMap<String, Reservation>,
    pub registry: NodeRegistry,
    pub ledger: NodeLedger,
    pub timers: TimerSet,
    pub collab: Box<dyn Collaborators>,
}

impl ServerState {
    pub fn new(config: ServerConfig, collab: Box<dyn Collaborators>) -> Self {
        Self {
            config,
            resvs: HashMap::new(),
            registry: NodeRegistry::new(),
            ledger: NodeLedger::new(),
            timers: TimerSet::new(),
            collab,
        }
    }

    pub fn add_reservation(&mut self, resv: Reservation) {
        self.resvs.insert(resv.id.clone(), resv);
    }

    pub fn find_reservation(&self, id: &str) -> Option<&Reservation> {
        self.resvs.get(id)
    }

    pub fn find_reservation_mut(&mut self, id: &str) -> Option<&mut Reservation> {
        self.resvs.get_mut(id)
    }

    /// Arm (or re-arm) the reconfirmation retry timer and mirror the time
    /// onto the reservation.
    pub fn set_resv_retry(&mut self, id: &str, at: DateTime<Utc>) {
        if let Some(resv) = self.resvs.get_mut(id) {
            resv.retry_time = Some(at);
            self.timers.schedule(id, TimerKind::Retry, at, resv.end);
            tracing::debug!(resv_id = %id, retry_at = %at, "Reservation retry scheduled");
        }
    }

    /// Drop any pending retry state for the reservation.
    pub fn unset_resv_retry(&mut self, id: &str) {
        if let Some(resv) = self.resvs.get_mut(id) {
            resv.retry_time = None;
        }
        self.timers.cancel(id, TimerKind::Retry);
    }

    /// Evict a single node from a reservation (ledger + node-spec surgery).
    pub fn release_node(&mut self, id: &str, node: &str) {
        if let Some(resv) = self.resvs.get_mut(id) {
            ledger::remove_node_from_resv(&mut self.ledger, resv, node, self.collab.as_mut());
        }
    }

    /// Evict every vnode of a host from a reservation. Exposed to the node
    /// health machinery as well as used by the conflict scanner.
    pub fn release_host(&mut self, id: &str, hostname: &str) {
        if let Some(resv) = self.resvs.get_mut(id) {
            ledger::remove_host_from_resv(&mut self.ledger, resv, &self.registry, hostname, self.collab.as_mut());
        }
    }

    /// Remove a reservation entirely: cancels its timers, empties its ledger
    /// rows, gives back any charged resources, and tells the persistence
    /// collaborator. Nothing can fire for the reservation afterwards.
    pub fn purge_reservation(&mut self, id: &str) {
        self.timers.cancel_all(id);
        if let Some(mut resv) = self.resvs.remove(id) {
            self.ledger.release_all(id);
            resv.nodes.clear();
            assign::release_charge(&mut resv, self.collab.as_mut());
            tracing::info!(resv_id = %id, "Reservation purged");
            self.collab.resv_purged(id);
        }
    }

    /// Startup scan: arm an idle-delete timer for every reservation that
    /// configured an idle timeout.
    pub fn init_idle_timers(&mut self, now: DateTime<Utc>) {
        let ids: Vec<String> = self
            .resvs
            .values()
            .filter(|r| r.idle_delete_secs.is_some())
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            self.arm_idle_delete(&id, now);
        }
    }

    /// Arm the idle-delete timer when the reservation is running and its
    /// queue holds no countable jobs. Replaces any previous timer.
    pub fn arm_idle_delete(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(resv) = self.resvs.get(id) else { return };
        let Some(idle_secs) = resv.idle_delete_secs else { return };

        let counts = self.collab.queue_job_counts(&resv.queue_name);
        if counts.active(self.config.job_history_enabled) == 0 && resv.state == ResvState::Running {
            self.timers
                .schedule(id, TimerKind::IdleDelete, now + Duration::seconds(idle_secs), resv.end);
        }
    }

    /// Idle-delete timer callback: request deletion when the queue is still
    /// idle at fire time.
    pub fn reap_idle(&mut self, id: &str) {
        let Some(resv) = self.resvs.get(id) else { return };
        let counts = self.collab.queue_job_counts(&resv.queue_name);
        if counts.active(self.config.job_history_enabled) == 0 {
            tracing::info!(
                resv_id = %id,
                idle_secs = resv.idle_delete_secs.unwrap_or(0),
                "Deleting reservation after idle timeout"
            );
            self.collab.request_delete(id);
        }
    }

    /// Drive every timer due at `now`. Called by the external timer loop.
    pub fn fire_due_timers(&mut self, now: DateTime<Utc>) {
        for entry in self.timers.take_due(now) {
            match entry.kind {
                TimerKind::IdleDelete => self.reap_idle(&entry.owner),
                TimerKind::Retry => {
                    if let Some(resv) = self.resvs.get_mut(&entry.owner) {
                        resv.sched_requests_sent += 1;
                        tracing::debug!(resv_id = %entry.owner, "Requesting reservation reconfirmation");
                        self.collab.request_reconfirm(resv);
                    }
                }
            }
        }
    }

    /// Compute and arm the next reconfirmation retry for a degraded,
    /// non-altered reservation.
    pub(crate) fn reschedule_retry(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(resv) = self.resvs.get(id) else { return };
        let at = timer::determine_retry(resv, now, self.config.retry_delay_secs);
        self.set_resv_retry(id, at);
    }
}
