//! External collaborator seam: everything the reservation core consumes
//! from the surrounding server (placement, accounting, queues, persistence,
//! replies, observability) behind one object-safe trait.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::resv::{PendingClient, Reservation, ResvSnapshot};

/// Extension tag carried by a scheduler reply that confirms a reservation.
/// May be followed by `:partition=<name>`.
pub const CONFIRM_SUCCESS: &str = "confirmsuccess";
/// Extension tag carried by a scheduler reply that denies a reservation.
pub const CONFIRM_FAIL: &str = "confirmfail";
/// Key separating the partition name inside a confirm-success extension.
pub const PARTITION_KEY: &str = ":partition=";

/// Direction of a resource-assigned counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incr,
    Decr,
}

/// Which queue toggle to flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    Enabled,
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Confirm,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailEvent {
    Confirm,
}

/// Outcome of running the confirmation-time policy hooks. The confirmation
/// proceeds regardless; a rejection is only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Accept,
    Reject,
    NoHook,
}

/// Per-state job counts of a reservation's backing queue, as needed for
/// idle detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueJobCounts {
    pub total: u32,
    pub moved: u32,
    pub finished: u32,
    pub expired: u32,
}

impl QueueJobCounts {
    /// Jobs that keep the reservation busy. With history retention on,
    /// moved/finished/expired jobs linger in the queue but do not count.
    pub fn active(&self, history_enabled: bool) -> u32 {
        if history_enabled {
            self.total
                .saturating_sub(self.moved)
                .saturating_sub(self.finished)
                .saturating_sub(self.expired)
        } else {
            self.total
        }
    }
}

/// Requester privilege bits carried by a batch request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestPerm {
    pub manager: bool,
    pub operator: bool,
}

impl RequestPerm {
    pub fn privileged(&self) -> bool {
        self.manager || self.operator
    }

    pub fn manager() -> Self {
        Self { manager: true, operator: false }
    }
}

/// A scheduler confirm/deny message for one reservation, as handed in by
/// the RPC dispatch layer.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub request_id: Uuid,
    pub resv_id: String,
    /// Scheduler-origin tag: [`CONFIRM_SUCCESS`] (optionally with partition)
    /// or [`CONFIRM_FAIL`]. A request without a tag is not from a scheduler.
    pub extension: Option<String>,
    /// New start time granted by the scheduler, if any.
    pub new_start: Option<DateTime<Utc>>,
    /// Node assignment: a single execution-vnode string for an advance
    /// reservation, a condensed occurrence sequence for a standing one.
    pub destin: Option<String>,
    pub perm: RequestPerm,
    pub user: String,
    pub host: String,
}

impl ConfirmRequest {
    pub fn new(resv_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            resv_id: resv_id.into(),
            extension: None,
            new_start: None,
            destin: None,
            perm: RequestPerm::manager(),
            user: "scheduler".to_string(),
            host: "localhost".to_string(),
        }
    }
}

/// The surrounding server, as seen from the reservation core.
pub trait Collaborators {
    /// External placement: resolve a node specification into a canonical
    /// node-spec for this reservation. Errors propagate verbatim.
    fn select_nodes(&mut self, resv: &Reservation, spec: &str, server_recovering: bool) -> Result<String>;

    /// Whole-reservation charge against node/server assigned counters.
    fn set_resource_assigned(&mut self, resv: &Reservation, occurrence_count: u32, dir: Direction);

    /// Per-range counter update for a node range being released from a
    /// reservation's node-spec.
    fn update_node_assigned(&mut self, range: &str, dir: Direction);

    /// Is the reservation still schedulable at all?
    fn check_viable(&self, resv: &Reservation, now: DateTime<Utc>) -> bool;

    /// Arm the external "start the reservation" timed task.
    fn schedule_resv_start(&mut self, resv: &Reservation) -> Result<()>;

    /// Arm the external end-of-window timed task.
    fn schedule_resv_end(&mut self, resv: &Reservation) -> Result<()>;

    /// Ask the scheduler for another confirmation pass over the reservation.
    fn request_reconfirm(&mut self, resv: &Reservation);

    fn queue_job_counts(&self, queue: &str) -> QueueJobCounts;

    fn enable_or_start(&mut self, resv: &Reservation, action: QueueAction, value: bool);

    /// Record the partition on the backing queue and persist it.
    fn set_queue_partition(&mut self, queue: &str, partition: &str) -> Result<()>;

    fn find_job(&self, job_id: &str) -> bool;

    /// Move a job into the reservation's queue (job-to-reservation
    /// conversion).
    fn move_job_to_resv(&mut self, job_id: &str, queue: &str) -> Result<()>;

    fn save_resv(&mut self, snapshot: &ResvSnapshot);

    /// The reservation has been purged from the core's state.
    fn resv_purged(&mut self, id: &str);

    /// Request deletion of an idle reservation.
    fn request_delete(&mut self, id: &str);

    /// Terminal text reply to a waiting client. The handle is consumed.
    fn reply_text(&mut self, client: PendingClient, code: i32, text: &str);

    fn audit(&mut self, kind: AuditKind, resv: &Reservation, text: &str);

    fn notify_owner(&mut self, resv: &Reservation, event: MailEvent, text: &str);

    fn run_hooks(&self, req: &ConfirmRequest) -> HookOutcome;
}
