//! Resource assignment engine: ties a reservation to the node set chosen by
//! the external placement collaborator, and gives it back again.

use crate::collab::{Collaborators, Direction};
use crate::error::{ResvError, Result};
use crate::ledger::NodeLedger;
use crate::resv::{execvnode, Reservation};

/// Resolve `node_spec` through external placement and record the resulting
/// node set on the reservation and in the ledger. Placement errors propagate
/// unchanged; nothing is recorded unless placement succeeded.
pub fn assign_resources(
    resv: &mut Reservation,
    ledger: &mut NodeLedger,
    collab: &mut dyn Collaborators,
    node_spec: &str,
    server_recovering: bool,
) -> Result<()> {
    if node_spec.is_empty() {
        return Err(ResvError::BadNodeSpec);
    }

    let canonical = collab.select_nodes(resv, node_spec, server_recovering)?;
    let nodes = execvnode::parse_nodes(&canonical);

    ledger.assign(&resv.id, &nodes);
    resv.nodes = nodes;
    resv.node_spec = Some(canonical);

    tracing::debug!(resv_id = %resv.id, nodes = resv.nodes.len(), "Nodes assigned to reservation");
    Ok(())
}

/// Release every node held by the reservation and clear its persisted
/// node-spec. No accounting happens here; charge transitions are the
/// orchestrator's job via [`charge_resources`]/[`release_charge`].
pub fn release_resources(resv: &mut Reservation, ledger: &mut NodeLedger) {
    ledger.release_all(&resv.id);
    resv.nodes.clear();
    resv.node_spec = None;
}

/// Charge the reservation's resources against the assigned counters.
/// Increment and decrement are strictly alternating per reservation; a
/// charge while already charged is a no-op.
pub fn charge_resources(resv: &mut Reservation, collab: &mut dyn Collaborators) {
    if !resv.resources_charged {
        collab.set_resource_assigned(resv, 1, Direction::Incr);
        resv.resources_charged = true;
    }
}

/// Give charged resources back. No-op when nothing is charged.
pub fn release_charge(resv: &mut Reservation, collab: &mut dyn Collaborators) {
    if resv.resources_charged {
        collab.set_resource_assigned(resv, 1, Direction::Decr);
        resv.resources_charged = false;
    }
}
