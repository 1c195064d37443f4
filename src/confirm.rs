//! Confirmation state machine: interprets a scheduler confirm/deny message
//! for one reservation, drives assignment, accounting, timers and conflict
//! scanning, persists the result, and answers the waiting client.

use chrono::{DateTime, Duration, Utc};

use crate::assign;
use crate::collab::{
    AuditKind, ConfirmRequest, HookOutcome, MailEvent, QueueAction, CONFIRM_FAIL, CONFIRM_SUCCESS,
    PARTITION_KEY,
};
use crate::error::{ResvError, Result};
use crate::resv::{execvnode, Reservation, ResvKind, ResvState};
use crate::server::ServerState;

enum DenyOutcome {
    /// The denial has been fully handled; acknowledge and stop.
    Done,
    /// A forced alteration is being enforced despite the denial; the request
    /// has been rewritten as a confirmation and processing continues.
    ForceConfirm,
}

fn vanished() -> ResvError {
    ResvError::Internal("reservation vanished during confirmation".to_string())
}

impl ServerState {
    /// Entry point for a scheduler confirm/deny message. `Ok(())` means the
    /// request was handled (the wire-level acknowledgment is the caller's);
    /// an error is the rejection to report. The pending interactive client,
    /// if any, is answered through the reply collaborator exactly once.
    pub fn confirm_reservation(&mut self, mut req: ConfirmRequest, now: DateTime<Utc>) -> Result<()> {
        if !req.perm.privileged() {
            return Err(ResvError::PermissionDenied);
        }

        let rid = req.resv_id.clone();

        let (is_degraded, is_being_altered, is_confirmed, alter) = match self.resvs.get_mut(&rid) {
            Some(resv) => {
                resv.sched_replies_seen += 1;
                (
                    resv.is_degraded(),
                    resv.alter.in_flight(),
                    resv.substate == ResvState::Confirmed,
                    resv.alter.clone(),
                )
            }
            None => return Err(ResvError::UnknownReservation(rid)),
        };

        let Some(extension) = req.extension.clone() else {
            return Err(ResvError::MalformedRequest(
                "request does not carry a scheduler reply tag".to_string(),
            ));
        };

        if extension == CONFIRM_FAIL {
            match self.handle_deny(&rid, &mut req, is_degraded, is_being_altered, is_confirmed, now)? {
                DenyOutcome::Done => return Ok(()),
                DenyOutcome::ForceConfirm => {}
            }
        }

        if is_being_altered {
            if let Some(resv) = self.resvs.get_mut(&rid) {
                resv.alter.revert = None;
            }
        }

        // a confirmation may carry a new start; end follows the duration
        if let Some(new_start) = req.new_start {
            if let Some(resv) = self.resvs.get_mut(&rid) {
                resv.set_start(new_start);
            }
        }

        let next_execvnode = self.resolve_occurrence(&rid, &req, is_degraded, is_being_altered)?;

        {
            let resv = self.resvs.get(&rid).ok_or_else(vanished)?;
            if !self.collab.check_viable(resv, now) {
                return Err(ResvError::Infeasible);
            }
        }

        // reconfirming a degraded reservation starts from a clean slate:
        // give back charged resources, drop the node set and retry state
        if is_degraded {
            if let Some(resv) = self.resvs.get_mut(&rid) {
                if resv.state == ResvState::Running {
                    assign::release_charge(resv, self.collab.as_mut());
                }
                assign::release_resources(resv, &mut self.ledger);
                resv.down_node_count = 0;
            }
            self.unset_resv_retry(&rid);
        }

        if alter.end_modified {
            let resv = self.resvs.get(&rid).ok_or_else(vanished)?;
            self.collab.schedule_resv_end(resv)?;
        }

        if is_being_altered {
            if let Some(resv) = self.resvs.get_mut(&rid) {
                if alter.select_modified && resv.start <= now {
                    assign::release_charge(resv, self.collab.as_mut());
                }
                assign::release_resources(resv, &mut self.ledger);
            }
        }

        {
            let resv = self.resvs.get_mut(&rid).ok_or_else(vanished)?;
            assign::assign_resources(resv, &mut self.ledger, self.collab.as_mut(), &next_execvnode, false)?;

            // resources are charged once the window has opened and this pass
            // replaces what the reservation held before
            if resv.start <= now && (is_degraded || alter.select_modified) {
                assign::charge_resources(resv, self.collab.as_mut());
            }
        }

        if !is_degraded && (!is_being_altered || alter.start_modified) {
            let resv = self.resvs.get(&rid).ok_or_else(vanished)?;
            self.collab.schedule_resv_start(resv)?;
        }

        // the extension may have been rewritten by a forced-alteration
        // override, so read it back from the request
        let extension = req.extension.clone().unwrap_or_default();
        let mut fresh_confirmation = !is_degraded;
        let mut partition_name: Option<String> = None;
        if extension.starts_with(CONFIRM_SUCCESS) {
            let name = extension
                .find(PARTITION_KEY)
                .map(|i| extension[i + PARTITION_KEY.len()..].to_string())
                .unwrap_or_else(|| self.config.default_partition.clone());
            partition_name = Some(name);
            // a successful confirmation ends the degraded episode
            fresh_confirmation = true;
        }

        let new_state = {
            let resv = self.resvs.get_mut(&rid).ok_or_else(vanished)?;
            let (state, substate) = resv.eval_state(now);
            resv.set_state(state, substate);
            state
        };

        if new_state == ResvState::Confirmed {
            if let Some(partition) = partition_name {
                let queue_name = {
                    let resv = self.resvs.get_mut(&rid).ok_or_else(vanished)?;
                    resv.partition = Some(partition.clone());
                    resv.queue_name.clone()
                };
                self.collab.set_queue_partition(&queue_name, &partition)?;
            }
        }

        if let Some(resv) = self.resvs.get(&rid) {
            self.collab.save_resv(&resv.snapshot());
        }

        // answer the client blocked on the original submission
        let (client, convert_job, queue_name) = match self.resvs.get_mut(&rid) {
            Some(resv) => (resv.pending_client.take(), resv.convert_job.clone(), resv.queue_name.clone()),
            None => (None, None, String::new()),
        };
        if let Some(client) = client {
            let mut text = format!("{rid} CONFIRMED");
            if let Some(job_id) = convert_job {
                if let Err(err) = self.convert_qmove(&rid, &job_id, &queue_name) {
                    tracing::warn!(resv_id = %rid, error = %err, "Job-to-reservation conversion failed");
                    text = format!("{rid} FAILED");
                }
            }
            self.collab.reply_text(client, 0, &text);
        }

        // a failed conversion purges the reservation; nothing left to do
        if !self.resvs.contains_key(&rid) {
            return Ok(());
        }

        if let Some(resv) = self.resvs.get(&rid) {
            self.collab.notify_owner(resv, MailEvent::Confirm, "");
        }
        if let Some(resv) = self.resvs.get_mut(&rid) {
            resv.interactive = false;
        }

        if is_being_altered {
            if let Some(resv) = self.resvs.get_mut(&rid) {
                // a running reservation whose start moved into the future is
                // confirmed again: its queue must stop launching jobs and its
                // charged resources go back until the new start
                if resv.state == ResvState::Confirmed && resv.alter.prior_state == Some(ResvState::Running) {
                    self.collab.enable_or_start(resv, QueueAction::Started, false);
                    assign::release_charge(resv, self.collab.as_mut());
                }
                if resv.alter.select_modified {
                    resv.alter.prior_select = None;
                }
                resv.alter.select_modified = false;
                resv.alter.start_modified = false;
                resv.alter.end_modified = false;
                resv.alter.forced = false;
                resv.alter.prior_state = None;
            }
            tracing::info!(resv_id = %rid, "Reservation alter confirmed");
        } else {
            tracing::info!(resv_id = %rid, "Reservation confirmed");
        }

        if fresh_confirmation {
            let resv = self.resvs.get(&rid).ok_or_else(vanished)?;
            let audit_line = match resv.kind {
                ResvKind::Standing { count, .. } => format!(
                    "requestor={}@{} start={} end={} nodes={} count={}",
                    req.user,
                    req.host,
                    resv.start.timestamp(),
                    resv.end.timestamp(),
                    next_execvnode,
                    count
                ),
                ResvKind::Advance => format!(
                    "requestor={}@{} start={} end={} nodes={}",
                    req.user,
                    req.host,
                    resv.start.timestamp(),
                    resv.end.timestamp(),
                    next_execvnode
                ),
            };
            if self.collab.run_hooks(&req) == HookOutcome::Reject {
                tracing::debug!(resv_id = %rid, "Confirmation hook rejected event, accepting by default");
            }
            self.collab.audit(AuditKind::Confirm, resv, &audit_line);
        }

        // a maintenance reservation claiming nodes may newly conflict with
        // reservations already holding them
        if rid.starts_with(self.config.maintenance_prefix) {
            self.degrade_overlapping(&rid, now);
        }

        Ok(())
    }

    /// Deny branch of the state machine.
    fn handle_deny(
        &mut self,
        rid: &str,
        req: &mut ConfirmRequest,
        is_degraded: bool,
        is_being_altered: bool,
        is_confirmed: bool,
        now: DateTime<Utc>,
    ) -> Result<DenyOutcome> {
        let mut force_requested = false;

        if is_degraded && !is_being_altered {
            // could not be reconfirmed this time; try again at the midpoint
            self.reschedule_retry(rid, now);
        } else {
            let quota_exhausted = self
                .resvs
                .get(rid)
                .map(|r| r.sched_replies_seen >= r.sched_requests_sent)
                .unwrap_or(false);
            if quota_exhausted {
                // the last scheduler has spoken: release a waiting
                // interactive client with a terminal denial
                let client = match self.resvs.get_mut(rid) {
                    Some(resv) if resv.interactive && !resv.alter.forced => {
                        resv.interactive = false;
                        resv.pending_client.take()
                    }
                    _ => None,
                };
                if let Some(client) = client {
                    self.collab.reply_text(client, 0, &format!("{rid} DENIED"));
                }

                if !is_being_altered && !is_confirmed {
                    tracing::info!(resv_id = %rid, "Reservation denied");
                    if let Some(resv) = self.resvs.get(rid) {
                        let audit_line =
                            format!("requestor={}@{}", self.config.daemon_name, self.config.server_host);
                        self.collab.audit(AuditKind::Deny, resv, &audit_line);
                    }
                    self.purge_reservation(rid);
                }
            }
        }

        if let Some(resv) = self.resvs.get_mut(rid) {
            if resv.state == ResvState::BeingAltered {
                if !resv.alter.forced {
                    revert_alteration(resv);
                    tracing::info!(resv_id = %rid, "Reservation alter denied");
                } else if resv.sched_replies_seen >= resv.sched_requests_sent {
                    force_requested = true;
                }
            }
            if is_being_altered {
                resv.alter.revert = None;
            }
        }

        if !force_requested {
            return Ok(DenyOutcome::Done);
        }

        // Every scheduler rejected a forced alteration; enforce it anyway by
        // turning the denial into a confirmation carrying the reservation's
        // stored window and node assignment.
        let default_partition = self.config.default_partition.clone();
        let Some(resv) = self.resvs.get_mut(rid) else {
            return Ok(DenyOutcome::Done);
        };
        resv.alter.forced = false;
        let partition = resv.partition.clone().unwrap_or(default_partition);
        req.extension = Some(format!("{CONFIRM_SUCCESS}{PARTITION_KEY}{partition}"));
        if resv.start_known {
            req.new_start = Some(resv.start);
        }
        let destin = if resv.kind.is_standing() {
            resv.occurrence_seq.clone()
        } else {
            resv.node_spec.clone()
        };
        match destin {
            Some(destin) => req.destin = Some(destin),
            None => {
                return Err(ResvError::Internal(
                    "no stored node assignment to enforce altered reservation".to_string(),
                ))
            }
        }
        tracing::info!(resv_id = %rid, "Enforcing denied forced alteration");
        Ok(DenyOutcome::ForceConfirm)
    }

    /// Resolve the node assignment for the occurrence being confirmed. For a
    /// standing reservation this decodes the condensed sequence, arms
    /// first-confirmation bookkeeping and persists the full sequence; an
    /// advance reservation takes the supplied assignment directly. Nothing
    /// here touches the ledger, so any error leaves the node assignment
    /// untouched.
    fn resolve_occurrence(
        &mut self,
        rid: &str,
        req: &ConfirmRequest,
        is_degraded: bool,
        is_being_altered: bool,
    ) -> Result<String> {
        let destin = req.destin.clone().unwrap_or_default();
        let is_standing = self.resvs.get(rid).ok_or_else(vanished)?.kind.is_standing();
        if !is_standing {
            return Ok(destin);
        }

        let occurrences = execvnode::decode(&destin)?;
        let next_execvnode = occurrences[0].clone();

        if !is_degraded {
            // first confirmation: arm the end-of-window task (unless the
            // start is still unset) and start the occurrence count at 1,
            // the value status listings show
            {
                let resv = self.resvs.get(rid).ok_or_else(vanished)?;
                if resv.start_known {
                    self.collab.schedule_resv_end(resv)?;
                }
            }
            if let Some(resv) = self.resvs.get_mut(rid) {
                if let ResvKind::Standing { count, .. } = resv.kind {
                    resv.kind = ResvKind::Standing { count, index: 1 };
                }
            }
        }

        if !is_being_altered {
            let resv = self.resvs.get_mut(rid).ok_or_else(vanished)?;
            let remaining = resv.remaining_occurrences();
            if occurrences.len() as u32 != remaining {
                tracing::warn!(
                    resv_id = %rid,
                    supplied = occurrences.len(),
                    remaining,
                    "Number of occurrence assignments does not match occurrences left"
                );
                return Err(ResvError::ProtocolMismatch(format!(
                    "{} occurrence assignments supplied, {} occurrences remain",
                    occurrences.len(),
                    remaining
                )));
            }
            if remaining > 0 {
                resv.occurrence_seq = Some(destin);
            }
        }

        Ok(next_execvnode)
    }

    /// Job-to-reservation conversion on first confirmation: arm the end of
    /// the window, then move the stored job into the reservation's queue.
    /// The reservation is purged when the window task cannot be armed or the
    /// job no longer exists.
    fn convert_qmove(&mut self, rid: &str, job_id: &str, queue_name: &str) -> Result<()> {
        let end_failed = {
            let resv = self.resvs.get(rid).ok_or_else(vanished)?;
            self.collab.schedule_resv_end(resv).is_err()
        };
        if end_failed {
            self.purge_reservation(rid);
            return Err(ResvError::Internal("failed to arm end-of-window task".to_string()));
        }

        if !self.collab.find_job(job_id) {
            self.purge_reservation(rid);
            return Err(ResvError::Internal(format!("conversion job {job_id} not found")));
        }

        self.collab.move_job_to_resv(job_id, queue_name)
    }
}

/// Roll a denied alteration back to the saved pre-alter attributes.
fn revert_alteration(resv: &mut Reservation) {
    if let Some(revert) = resv.alter.revert.take() {
        resv.start = revert.start;
        resv.end = revert.end;
        resv.duration = Duration::seconds(revert.duration_secs);
        resv.set_state(revert.state, revert.substate);
    }
    resv.alter.select_modified = false;
    resv.alter.start_modified = false;
    resv.alter.end_modified = false;
    resv.alter.forced = false;
    resv.alter.prior_state = None;
    resv.alter.prior_select = None;
}
