use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a reservation. The same value space is used for the
/// coarse state and the finer-grained substate: `InConflict` only ever
/// appears as a substate qualifying `Degraded` or `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResvState {
    Unconfirmed,
    Confirmed,
    Degraded,
    InConflict,
    BeingAltered,
    Running,
    Finished,
    BeingDeleted,
}

impl std::fmt::Display for ResvState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResvState::Unconfirmed => write!(f, "unconfirmed"),
            ResvState::Confirmed => write!(f, "confirmed"),
            ResvState::Degraded => write!(f, "degraded"),
            ResvState::InConflict => write!(f, "in-conflict"),
            ResvState::BeingAltered => write!(f, "being-altered"),
            ResvState::Running => write!(f, "running"),
            ResvState::Finished => write!(f, "finished"),
            ResvState::BeingDeleted => write!(f, "being-deleted"),
        }
    }
}

/// Advance reservations hold a single time window; standing reservations
/// repeat over `count` occurrences. `index` is 1-based once the reservation
/// has been confirmed (it is what users see in status listings) and 0 before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResvKind {
    Advance,
    Standing { count: u32, index: u32 },
}

impl ResvKind {
    pub fn is_standing(&self) -> bool {
        matches!(self, ResvKind::Standing { .. })
    }
}

/// Saved attribute values restored when a denied alteration is rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterRevert {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: i64,
    pub state: ResvState,
    pub substate: ResvState,
}

/// Bookkeeping for an in-flight alter request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterState {
    pub select_modified: bool,
    pub start_modified: bool,
    pub end_modified: bool,
    /// A forced alteration is enforced even after every scheduler denied it.
    pub forced: bool,
    /// State the reservation was in when the alteration began.
    pub prior_state: Option<ResvState>,
    /// Node-selection string before the alteration, dropped once the new
    /// selection is confirmed.
    pub prior_select: Option<String>,
    pub revert: Option<AlterRevert>,
}

impl AlterState {
    /// An alteration is in flight while any field modification is pending.
    pub fn in_flight(&self) -> bool {
        self.select_modified || self.start_modified || self.end_modified
    }
}

/// Exclusive handle to a client blocked on a synchronous confirm/deny reply.
/// Consumed exactly once; no duplicate terminal reply can be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClient {
    pub request_id: Uuid,
    pub owner: String,
}

/// The central entity: one advance or standing reservation, its time window,
/// granted node set, and confirmation/alteration bookkeeping.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: String,
    /// Name of the reservation's private job queue (the ID up to the first
    /// `.`), used for idle detection and partition propagation.
    pub queue_name: String,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration: Duration,
    /// False for reservations submitted without a start time; they carry a
    /// placeholder window until the scheduler supplies one.
    pub start_known: bool,

    pub kind: ResvKind,
    pub state: ResvState,
    pub substate: ResvState,

    /// Ordered node names currently granted (mirrors the ledger).
    pub nodes: Vec<String>,
    /// Canonical node-spec string as persisted, e.g. `(v1:ncpus=2)+(v2:ncpus=2)`.
    pub node_spec: Option<String>,
    /// Encoded per-occurrence node assignments for standing reservations.
    pub occurrence_seq: Option<String>,

    /// True iff this reservation currently holds resources charged against
    /// the node/server assigned counters. Never true with an empty node set.
    pub resources_charged: bool,

    pub alter: AlterState,

    pub sched_requests_sent: u32,
    pub sched_replies_seen: u32,

    pub pending_client: Option<PendingClient>,
    pub partition: Option<String>,
    pub interactive: bool,
    /// Job to be moved into the reservation queue on first confirmation.
    pub convert_job: Option<String>,

    pub retry_time: Option<DateTime<Utc>>,
    pub down_node_count: u32,
    /// Reap the reservation after this many idle seconds; absent means never.
    pub idle_delete_secs: Option<i64>,
}

impl Reservation {
    pub fn new(id: impl Into<String>, start: DateTime<Utc>, duration: Duration) -> Self {
        let id = id.into();
        let queue_name = id.split('.').next().unwrap_or(&id).to_string();
        Self {
            id,
            queue_name,
            start,
            end: start + duration,
            duration,
            start_known: true,
            kind: ResvKind::Advance,
            state: ResvState::Unconfirmed,
            substate: ResvState::Unconfirmed,
            nodes: Vec::new(),
            node_spec: None,
            occurrence_seq: None,
            resources_charged: false,
            alter: AlterState::default(),
            sched_requests_sent: 0,
            sched_replies_seen: 0,
            pending_client: None,
            partition: None,
            interactive: false,
            convert_job: None,
            retry_time: None,
            down_node_count: 0,
            idle_delete_secs: None,
        }
    }

    pub fn standing(id: impl Into<String>, start: DateTime<Utc>, duration: Duration, count: u32) -> Self {
        let mut resv = Self::new(id, start, duration);
        resv.kind = ResvKind::Standing { count, index: 0 };
        resv
    }

    /// Move the window start, keeping `end == start + duration`.
    pub fn set_start(&mut self, start: DateTime<Utc>) {
        self.start = start;
        self.end = start + self.duration;
        self.start_known = true;
    }

    pub fn set_state(&mut self, state: ResvState, substate: ResvState) {
        if self.state != state || self.substate != substate {
            tracing::debug!(
                resv_id = %self.id,
                from = %self.state,
                to = %state,
                substate = %substate,
                "Reservation state change"
            );
        }
        self.state = state;
        self.substate = substate;
    }

    /// Degraded for reconfirmation purposes: the substate says the
    /// reservation lost validity, whatever the coarse state is.
    pub fn is_degraded(&self) -> bool {
        matches!(self.substate, ResvState::Degraded | ResvState::InConflict)
    }

    pub fn is_maintenance(&self, marker: char) -> bool {
        self.id.starts_with(marker)
    }

    /// Occurrences left to run, counting the current one. 1-based index.
    pub fn remaining_occurrences(&self) -> u32 {
        match self.kind {
            ResvKind::Advance => 1,
            ResvKind::Standing { count, index } => count.saturating_sub(index) + 1,
        }
    }

    /// Recompute {state, substate} from current facts.
    pub fn eval_state(&self, now: DateTime<Utc>) -> (ResvState, ResvState) {
        if self.nodes.is_empty() {
            return (ResvState::Unconfirmed, ResvState::Unconfirmed);
        }
        if let ResvKind::Standing { count, index } = self.kind {
            if index > count {
                return (ResvState::Finished, ResvState::Finished);
            }
        }
        if self.end <= now {
            (ResvState::Finished, ResvState::Finished)
        } else if self.start <= now {
            (ResvState::Running, ResvState::Running)
        } else {
            (ResvState::Confirmed, ResvState::Confirmed)
        }
    }

    /// The attribute surface handed to the persistence collaborator.
    pub fn snapshot(&self) -> ResvSnapshot {
        ResvSnapshot {
            id: self.id.clone(),
            queue_name: self.queue_name.clone(),
            start: self.start,
            end: self.end,
            duration_secs: self.duration.num_seconds(),
            kind: self.kind,
            state: self.state,
            substate: self.substate,
            node_spec: self.node_spec.clone(),
            occurrence_seq: self.occurrence_seq.clone(),
            partition: self.partition.clone(),
            interactive: self.interactive,
            idle_delete_secs: self.idle_delete_secs,
            retry_time: self.retry_time,
            alter: self.alter.clone(),
        }
    }
}

/// Persisted attribute snapshot of a reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResvSnapshot {
    pub id: String,
    pub queue_name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_secs: i64,
    pub kind: ResvKind,
    pub state: ResvState,
    pub substate: ResvState,
    pub node_spec: Option<String>,
    pub occurrence_seq: Option<String>,
    pub partition: Option<String>,
    pub interactive: bool,
    pub idle_delete_secs: Option<i64>,
    pub retry_time: Option<DateTime<Utc>>,
    pub alter: AlterState,
}
