//! Confirmation state machine: scheduler confirm/deny handling, alteration
//! paths, charge accounting, and client replies.


use chrono::Duration;
use reservd::collab::{AuditKind, Direction, QueueAction, RequestPerm};
use reservd::error::ResvError;
use reservd::resv::{AlterRevert, ResvKind, ResvState};
use reservd::timer::TimerKind;
use test_harness::{
    advance_resv, confirm_req, grant_nodes, new_server, pending_client, standing_resv, t0,
};

#[test]
fn rejects_unprivileged_requester() {
    let (mut server, _state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));

    let mut req = confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)"));
    req.perm = RequestPerm::default();

    let err = server.confirm_reservation(req, t0()).unwrap_err();
    assert!(matches!(err, ResvError::PermissionDenied));
    // rejected before the reply counter moves
    assert_eq!(server.find_reservation("R1.svr").unwrap().sched_replies_seen, 0);
}

#[test]
fn rejects_unknown_reservation() {
    let (mut server, _state) = new_server();
    let err = server
        .confirm_reservation(confirm_req("R9.svr", "confirmsuccess", None), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::UnknownReservation(_)));
}

#[test]
fn rejects_request_without_scheduler_tag() {
    let (mut server, _state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));

    let mut req = confirm_req("R1.svr", "", None);
    req.extension = None;

    let err = server.confirm_reservation(req, t0()).unwrap_err();
    assert!(matches!(err, ResvError::MalformedRequest(_)));
    // the reply was still counted against the scheduler round-trip
    assert_eq!(server.find_reservation("R1.svr").unwrap().sched_replies_seen, 1);
}

#[test]
fn confirms_new_advance_reservation() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.pending_client = Some(pending_client());
    resv.sched_requests_sent = 1;
    server.add_reservation(resv);

    let req = confirm_req("R1.svr", "confirmsuccess", Some("(vnodeA:ncpus=4)"));
    server.confirm_reservation(req, t0()).unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.state, ResvState::Confirmed);
    assert_eq!(resv.substate, ResvState::Confirmed);
    assert_eq!(resv.node_spec.as_deref(), Some("(vnodeA:ncpus=4)"));
    assert_eq!(resv.nodes, ["vnodeA"]);
    assert_eq!(resv.partition.as_deref(), Some("default"));
    assert!(resv.pending_client.is_none());
    assert!(server.ledger.contains("R1.svr", "vnodeA"));

    let state = state.lock().unwrap();
    assert_eq!(state.start_tasks, ["R1.svr"]);
    assert_eq!(state.partitions, [("R1".to_string(), "default".to_string())]);
    assert_eq!(state.replies.len(), 1);
    assert!(state.replies[0].2.ends_with("CONFIRMED"));
    assert!(state.saved.iter().any(|s| s.id == "R1.svr" && s.state == ResvState::Confirmed));
    assert_eq!(state.mails.len(), 1);
    assert_eq!(state.hook_runs, 1);
    assert!(state
        .audits
        .iter()
        .any(|(kind, id, text)| *kind == AuditKind::Confirm && id == "R1.svr" && text.contains("nodes=(vnodeA:ncpus=4)")));
}

#[test]
fn confirmation_extension_carries_partition() {
    let (mut server, state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));

    let req = confirm_req("R1.svr", "confirmsuccess:partition=gpu-pool", Some("(v1:ncpus=1)"));
    server.confirm_reservation(req, t0()).unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.partition.as_deref(), Some("gpu-pool"));
    assert_eq!(
        state.lock().unwrap().partitions,
        [("R1".to_string(), "gpu-pool".to_string())]
    );
}

#[test]
fn new_start_time_moves_the_window() {
    let (mut server, _state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));

    let mut req = confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)"));
    req.new_start = Some(t0() + Duration::seconds(900));
    server.confirm_reservation(req, t0()).unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.start, t0() + Duration::seconds(900));
    assert_eq!(resv.end, resv.start + Duration::seconds(3600));
    assert_eq!(resv.end - resv.start, resv.duration);
}

#[test]
fn deny_of_degraded_reservation_reschedules_midpoint_retry() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(1000), 3600);
    resv.state = ResvState::Degraded;
    resv.substate = ResvState::Degraded;
    resv.sched_requests_sent = 2;
    resv.pending_client = Some(pending_client());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    // state unchanged, retry armed at the midpoint between now and start
    assert_eq!(resv.state, ResvState::Degraded);
    assert_eq!(resv.retry_time, Some(t0() + Duration::seconds(500)));
    assert_eq!(
        server.timers.fire_time("R1.svr", TimerKind::Retry),
        Some(t0() + Duration::seconds(500))
    );
    // replies (1) < requests (2): the client keeps waiting
    assert!(state.lock().unwrap().replies.is_empty());
    assert!(resv.pending_client.is_some());
}

#[test]
fn final_deny_purges_unconfirmed_reservation() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.sched_requests_sent = 1;
    resv.interactive = true;
    resv.pending_client = Some(pending_client());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    assert!(server.find_reservation("R1.svr").is_none());
    let state = state.lock().unwrap();
    assert_eq!(state.replies.len(), 1);
    assert!(state.replies[0].2.ends_with("DENIED"));
    assert_eq!(state.purged, ["R1.svr"]);
    assert!(state
        .audits
        .iter()
        .any(|(kind, id, text)| *kind == AuditKind::Deny && id == "R1.svr" && text.starts_with("requestor=")));
}

#[test]
fn deny_without_exhausted_quota_leaves_reservation_alive() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.sched_requests_sent = 3;
    resv.interactive = true;
    resv.pending_client = Some(pending_client());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    // two schedulers have yet to answer
    assert!(server.find_reservation("R1.svr").is_some());
    assert!(state.lock().unwrap().replies.is_empty());
    assert!(state.lock().unwrap().purged.is_empty());
}

#[test]
fn final_deny_of_confirmed_reservation_does_not_purge() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.state = ResvState::Confirmed;
    resv.substate = ResvState::Confirmed;
    resv.sched_requests_sent = 1;
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    assert!(server.find_reservation("R1.svr").is_some());
    assert!(state.lock().unwrap().purged.is_empty());
}

#[test]
fn standing_first_confirmation_initializes_occurrences() {
    let (mut server, state) = new_server();
    server.add_reservation(standing_resv("S1.svr", t0() + Duration::seconds(600), 600, 3));

    let seq = "3#(v1:ncpus=1)[0](v2:ncpus=1)[1](v3:ncpus=1)[2]";
    server
        .confirm_reservation(confirm_req("S1.svr", "confirmsuccess", Some(seq)), t0())
        .unwrap();

    let resv = server.find_reservation("S1.svr").unwrap();
    assert_eq!(resv.kind, ResvKind::Standing { count: 3, index: 1 });
    assert_eq!(resv.occurrence_seq.as_deref(), Some(seq));
    // only the soonest occurrence's nodes are granted now
    assert_eq!(resv.nodes, ["v1"]);
    assert_eq!(resv.node_spec.as_deref(), Some("(v1:ncpus=1)"));
    assert_eq!(resv.state, ResvState::Confirmed);

    let state = state.lock().unwrap();
    assert_eq!(state.end_tasks, ["S1.svr"]);
    assert!(state
        .audits
        .iter()
        .any(|(_, id, text)| id == "S1.svr" && text.contains("count=3")));
}

#[test]
fn standing_occurrence_count_mismatch_leaves_no_half_assignment() {
    let (mut server, state) = new_server();
    server.add_reservation(standing_resv("S1.svr", t0() + Duration::seconds(600), 600, 3));

    // two occurrence assignments supplied for three remaining occurrences
    let seq = "2#(v1:ncpus=1)[0](v2:ncpus=1)[1]";
    let err = server
        .confirm_reservation(confirm_req("S1.svr", "confirmsuccess", Some(seq)), t0())
        .unwrap_err();

    assert!(matches!(err, ResvError::ProtocolMismatch(_)));
    let resv = server.find_reservation("S1.svr").unwrap();
    assert!(resv.nodes.is_empty());
    assert_eq!(resv.node_spec, None);
    assert_eq!(resv.occurrence_seq, None);
    assert!(server.ledger.nodes_of("S1.svr").is_empty());
    assert!(state.lock().unwrap().select_calls.is_empty());
}

#[test]
fn malformed_occurrence_sequence_is_rejected() {
    let (mut server, _state) = new_server();
    server.add_reservation(standing_resv("S1.svr", t0() + Duration::seconds(600), 600, 2));

    let err = server
        .confirm_reservation(confirm_req("S1.svr", "confirmsuccess", Some("x#(v1:ncpus=1)[0]")), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::ProtocolMismatch(_)));
}

#[test]
fn unviable_reservation_is_rejected_untouched() {
    let (mut server, state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));
    state.lock().unwrap().viable = false;

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap_err();

    assert!(matches!(err, ResvError::Infeasible));
    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.state, ResvState::Unconfirmed);
    assert!(resv.nodes.is_empty());
    assert!(state.lock().unwrap().select_calls.is_empty());
}

#[test]
fn placement_failure_propagates_verbatim() {
    let (mut server, state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));
    state.lock().unwrap().fail_select = Some("no nodes left".to_string());

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap_err();

    assert!(matches!(err, ResvError::ResourceExhaustion(_)));
    let resv = server.find_reservation("R1.svr").unwrap();
    assert!(resv.nodes.is_empty());
    assert!(!resv.resources_charged);
    assert!(state.lock().unwrap().start_tasks.is_empty());
}

#[test]
fn empty_node_spec_is_rejected() {
    let (mut server, _state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", None), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::BadNodeSpec));
}

#[test]
fn degraded_running_reconfirm_swaps_nodes_and_recharges() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() - Duration::seconds(600), 3600);
    resv.state = ResvState::Running;
    resv.substate = ResvState::Degraded;
    resv.resources_charged = true;
    resv.sched_requests_sent = 1;
    resv.down_node_count = 2;
    server.add_reservation(resv);
    grant_nodes(&mut server, "R1.svr", "(v1:ncpus=2)");
    server.set_resv_retry("R1.svr", t0() + Duration::seconds(60));

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v2:ncpus=2)")), t0())
        .unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.nodes, ["v2"]);
    assert!(!server.ledger.contains("R1.svr", "v1"));
    assert!(server.ledger.contains("R1.svr", "v2"));
    assert_eq!(resv.state, ResvState::Running);
    assert_eq!(resv.substate, ResvState::Running);
    assert_eq!(resv.down_node_count, 0);
    assert_eq!(resv.retry_time, None);
    assert_eq!(server.timers.fire_time("R1.svr", TimerKind::Retry), None);

    // gave the old charge back, then charged the new node set: strict
    // alternation, ending charged
    let state = state.lock().unwrap();
    let dirs: Vec<Direction> = state.charges.iter().map(|(_, d)| *d).collect();
    assert_eq!(dirs, [Direction::Decr, Direction::Incr]);
    assert!(resv.resources_charged);
    // reconfirmation does not arm a second start task
    assert!(state.start_tasks.is_empty());
}

#[test]
fn degraded_reconfirm_placement_failure_keeps_charge_released() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() - Duration::seconds(600), 3600);
    resv.state = ResvState::Running;
    resv.substate = ResvState::Degraded;
    resv.resources_charged = true;
    server.add_reservation(resv);
    grant_nodes(&mut server, "R1.svr", "(v1:ncpus=2)");
    state.lock().unwrap().fail_select = Some("placement failed".to_string());

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v2:ncpus=2)")), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::ResourceExhaustion(_)));

    // charge was given back before reassignment and never re-applied: the
    // flag can never be true with an empty node set
    let resv = server.find_reservation("R1.svr").unwrap();
    assert!(resv.nodes.is_empty());
    assert!(!resv.resources_charged);
    let dirs: Vec<Direction> = state.lock().unwrap().charges.iter().map(|(_, d)| *d).collect();
    assert_eq!(dirs, [Direction::Decr]);
}

#[test]
fn denied_alteration_reverts_saved_attributes() {
    let (mut server, _state) = new_server();
    let original_start = t0() + Duration::seconds(600);
    let mut resv = advance_resv("R1.svr", original_start + Duration::seconds(900), 3600);
    resv.state = ResvState::BeingAltered;
    resv.substate = ResvState::Confirmed;
    resv.sched_requests_sent = 1;
    resv.alter.start_modified = true;
    resv.alter.prior_state = Some(ResvState::Confirmed);
    resv.alter.revert = Some(AlterRevert {
        start: original_start,
        end: original_start + Duration::seconds(3600),
        duration_secs: 3600,
        state: ResvState::Confirmed,
        substate: ResvState::Confirmed,
    });
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.start, original_start);
    assert_eq!(resv.end, original_start + Duration::seconds(3600));
    assert_eq!(resv.state, ResvState::Confirmed);
    assert!(!resv.alter.in_flight());
    assert_eq!(resv.alter.revert, None);
}

#[test]
fn denied_forced_alteration_is_enforced_anyway() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.state = ResvState::BeingAltered;
    resv.substate = ResvState::Confirmed;
    resv.sched_requests_sent = 1;
    resv.alter.start_modified = true;
    resv.alter.forced = true;
    resv.alter.prior_state = Some(ResvState::Confirmed);
    resv.partition = Some("gold".to_string());
    resv.node_spec = Some("(v1:ncpus=4)".to_string());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    // the stored node-spec was re-applied through placement
    assert_eq!(resv.nodes, ["v1"]);
    assert_eq!(resv.state, ResvState::Confirmed);
    assert!(!resv.alter.forced);
    assert!(!resv.alter.in_flight());

    let state = state.lock().unwrap();
    assert_eq!(state.select_calls, [("R1.svr".to_string(), "(v1:ncpus=4)".to_string())]);
    // the reservation keeps its previously confirmed partition
    assert_eq!(state.partitions, [("R1".to_string(), "gold".to_string())]);
    assert_eq!(state.start_tasks, ["R1.svr"]);
}

#[test]
fn forced_alteration_waits_for_remaining_schedulers() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.state = ResvState::BeingAltered;
    resv.substate = ResvState::Confirmed;
    resv.sched_requests_sent = 2;
    resv.alter.start_modified = true;
    resv.alter.forced = true;
    resv.node_spec = Some("(v1:ncpus=4)".to_string());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmfail", None), t0())
        .unwrap();

    // one scheduler still owes an answer: nothing enforced yet
    let resv = server.find_reservation("R1.svr").unwrap();
    assert!(resv.alter.forced);
    assert_eq!(resv.state, ResvState::BeingAltered);
    assert!(state.lock().unwrap().select_calls.is_empty());
}

#[test]
fn altering_running_reservation_to_future_start_stops_queue() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() - Duration::seconds(600), 3600);
    resv.state = ResvState::BeingAltered;
    resv.substate = ResvState::Running;
    resv.resources_charged = true;
    resv.sched_requests_sent = 1;
    resv.alter.start_modified = true;
    resv.alter.prior_state = Some(ResvState::Running);
    server.add_reservation(resv);
    grant_nodes(&mut server, "R1.svr", "(v1:ncpus=2)");

    let mut req = confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=2)"));
    req.new_start = Some(t0() + Duration::seconds(1800));
    server.confirm_reservation(req, t0()).unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.state, ResvState::Confirmed);
    assert!(!resv.alter.in_flight());
    assert_eq!(resv.alter.prior_state, None);
    // queue must not keep launching jobs before the new start, and the
    // charge goes back until then
    assert!(!resv.resources_charged);
    let state = state.lock().unwrap();
    assert!(state
        .queue_toggles
        .iter()
        .any(|(id, action, value)| id == "R1.svr" && *action == QueueAction::Started && !value));
    assert!(state.charges.iter().any(|(_, d)| *d == Direction::Decr));
}

#[test]
fn select_alteration_of_running_reservation_recharges() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() - Duration::seconds(600), 3600);
    resv.state = ResvState::BeingAltered;
    resv.substate = ResvState::Running;
    resv.resources_charged = true;
    resv.sched_requests_sent = 1;
    resv.alter.select_modified = true;
    resv.alter.prior_state = Some(ResvState::Running);
    resv.alter.prior_select = Some("(v1:ncpus=2)".to_string());
    server.add_reservation(resv);
    grant_nodes(&mut server, "R1.svr", "(v1:ncpus=2)");

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v2:ncpus=4)")), t0())
        .unwrap();

    let resv = server.find_reservation("R1.svr").unwrap();
    assert_eq!(resv.nodes, ["v2"]);
    assert_eq!(resv.state, ResvState::Running);
    assert!(resv.resources_charged);
    assert_eq!(resv.alter.prior_select, None);
    assert!(!resv.alter.in_flight());

    let dirs: Vec<Direction> = state.lock().unwrap().charges.iter().map(|(_, d)| *d).collect();
    assert_eq!(dirs, [Direction::Decr, Direction::Incr]);
    // the select change re-ran placement with the new spec
    assert_eq!(
        state.lock().unwrap().select_calls,
        [("R1.svr".to_string(), "(v2:ncpus=4)".to_string())]
    );
}

#[test]
fn failed_start_task_is_fatal() {
    let (mut server, state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));
    state.lock().unwrap().fail_start_task = true;

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::Internal(_)));
}

#[test]
fn terminal_reply_is_sent_exactly_once() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.pending_client = Some(pending_client());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap();
    // a later reconfirmation finds no waiting client
    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap();

    assert_eq!(state.lock().unwrap().replies.len(), 1);
}

#[test]
fn conversion_moves_job_into_reservation_queue() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.pending_client = Some(pending_client());
    resv.convert_job = Some("1234.svr".to_string());
    server.add_reservation(resv);

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.moved_jobs, [("1234.svr".to_string(), "R1".to_string())]);
    assert!(state.replies[0].2.ends_with("CONFIRMED"));
}

#[test]
fn conversion_with_missing_job_purges_and_reports_failure() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.pending_client = Some(pending_client());
    resv.convert_job = Some("1234.svr".to_string());
    server.add_reservation(resv);
    state.lock().unwrap().job_exists = false;

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap();

    assert!(server.find_reservation("R1.svr").is_none());
    let state = state.lock().unwrap();
    assert!(state.replies[0].2.ends_with("FAILED"));
    assert_eq!(state.purged, ["R1.svr"]);
}

#[test]
fn failed_job_move_reports_failure_without_purging() {
    let (mut server, state) = new_server();
    let mut resv = advance_resv("R1.svr", t0() + Duration::seconds(600), 3600);
    resv.pending_client = Some(pending_client());
    resv.convert_job = Some("1234.svr".to_string());
    server.add_reservation(resv);
    state.lock().unwrap().fail_move = true;

    server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap();

    assert!(server.find_reservation("R1.svr").is_some());
    assert!(state.lock().unwrap().replies[0].2.ends_with("FAILED"));
}

#[test]
fn maintenance_confirmation_degrades_overlapping_reservations() {
    let (mut server, _state) = new_server();
    server.registry.register("n1", "host1");

    server.add_reservation(advance_resv("M1.svr", t0() + Duration::seconds(60), 7200));

    let mut victim = advance_resv("R2.svr", t0() + Duration::seconds(600), 3600);
    victim.state = ResvState::Confirmed;
    victim.substate = ResvState::Confirmed;
    server.add_reservation(victim);
    grant_nodes(&mut server, "R2.svr", "(n1:ncpus=2)");

    server
        .confirm_reservation(confirm_req("M1.svr", "confirmsuccess", Some("(n1:ncpus=8)")), t0())
        .unwrap();

    let victim = server.find_reservation("R2.svr").unwrap();
    assert_eq!(victim.state, ResvState::Degraded);
    assert_eq!(victim.substate, ResvState::InConflict);
    assert!(!server.ledger.contains("R2.svr", "n1"));
    assert!(server.ledger.contains("M1.svr", "n1"));
}

#[test]
fn queue_lookup_failure_is_internal_error() {
    let (mut server, state) = new_server();
    server.add_reservation(advance_resv("R1.svr", t0() + Duration::seconds(600), 3600));
    state.lock().unwrap().fail_partition = true;

    let err = server
        .confirm_reservation(confirm_req("R1.svr", "confirmsuccess", Some("(v1:ncpus=1)")), t0())
        .unwrap_err();
    assert!(matches!(err, ResvError::Internal(_)));
}
