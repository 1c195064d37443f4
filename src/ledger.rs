//! Node-association ledger: which reservations occupy which nodes, and the
//! node-spec string bookkeeping that has to stay in lockstep with it.

use std::collections::HashMap;

use crate::collab::{Collaborators, Direction, QueueAction};
use crate::resv::execvnode;
use crate::resv::Reservation;

/// Registry of known execution nodes. Vnode name to hostname; a node the
/// registry has never heard of is assumed to be alone on its own host.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    hosts: HashMap<String, String>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: impl Into<String>, hostname: impl Into<String>) {
        self.hosts.insert(node.into(), hostname.into());
    }

    pub fn hostname_of<'a>(&'a self, node: &'a str) -> &'a str {
        self.hosts.get(node).map(String::as_str).unwrap_or(node)
    }
}

/// Per-node and per-reservation association lists. Membership of a
/// reservation in a node's list means the reservation occupies that node
/// for its active window.
#[derive(Debug, Default)]
pub struct NodeLedger {
    by_node: HashMap<String, Vec<String>>,
    by_resv: HashMap<String, Vec<String>>,
}

impl NodeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `resv_id` occupies each of `nodes`. Re-assigning a node
    /// already held is a no-op. Callers treat assignment as all-or-nothing:
    /// this method cannot partially fail, but a caller aborting a wider
    /// operation must roll back with [`NodeLedger::release_all`].
    pub fn assign(&mut self, resv_id: &str, nodes: &[String]) {
        for node in nodes {
            let on_node = self.by_node.entry(node.clone()).or_default();
            if !on_node.iter().any(|r| r == resv_id) {
                on_node.push(resv_id.to_string());
            }
            let held = self.by_resv.entry(resv_id.to_string()).or_default();
            if !held.iter().any(|n| n == node) {
                held.push(node.clone());
            }
        }
    }

    /// Remove the one entry matching reservation and node; no-op if absent.
    pub fn release(&mut self, resv_id: &str, node: &str) -> bool {
        let mut removed = false;
        if let Some(on_node) = self.by_node.get_mut(node) {
            let before = on_node.len();
            on_node.retain(|r| r != resv_id);
            removed = on_node.len() != before;
            if on_node.is_empty() {
                self.by_node.remove(node);
            }
        }
        if let Some(held) = self.by_resv.get_mut(resv_id) {
            held.retain(|n| n != node);
            if held.is_empty() {
                self.by_resv.remove(resv_id);
            }
        }
        removed
    }

    /// Release every node currently held by the reservation. Returns the
    /// nodes that were released.
    pub fn release_all(&mut self, resv_id: &str) -> Vec<String> {
        let held = self.by_resv.remove(resv_id).unwrap_or_default();
        for node in &held {
            if let Some(on_node) = self.by_node.get_mut(node) {
                on_node.retain(|r| r != resv_id);
                if on_node.is_empty() {
                    self.by_node.remove(node);
                }
            }
        }
        held
    }

    pub fn reservations_on(&self, node: &str) -> &[String] {
        self.by_node.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn nodes_of(&self, resv_id: &str) -> &[String] {
        self.by_resv.get(resv_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, resv_id: &str, node: &str) -> bool {
        self.reservations_on(node).iter().any(|r| r == resv_id)
    }
}

/// Evict one node from a reservation: strip its range from the persisted
/// node-spec (returning charged resources for that range first), then drop
/// the ledger association.
pub fn remove_node_from_resv(
    ledger: &mut NodeLedger,
    resv: &mut Reservation,
    node: &str,
    collab: &mut dyn Collaborators,
) {
    if let Some(spec) = resv.node_spec.clone() {
        if let Some((chunk, remaining)) = execvnode::strip_node_chunk(&spec, node) {
            if resv.resources_charged {
                // counters first, spec string second: the two must never
                // disagree about what this reservation holds
                collab.update_node_assigned(&chunk, Direction::Decr);
            }

            let remaining = execvnode::normalize_spec(&remaining);
            if remaining.is_empty() {
                resv.node_spec = None;
                // with no nodes left the backing queue must not keep
                // launching jobs that could land anywhere
                collab.enable_or_start(resv, QueueAction::Started, false);
                tracing::warn!(resv_id = %resv.id, "Reservation lost its last node, queue start disabled");
            } else {
                resv.node_spec = Some(remaining);
            }
        }
    }

    ledger.release(&resv.id, node);
    resv.nodes.retain(|n| n != node);
}

/// Evict every vnode of `hostname` from the reservation. Idempotent: a host
/// with no remaining vnodes in the reservation is a no-op.
pub fn remove_host_from_resv(
    ledger: &mut NodeLedger,
    resv: &mut Reservation,
    registry: &NodeRegistry,
    hostname: &str,
    collab: &mut dyn Collaborators,
) {
    let on_host: Vec<String> = resv
        .nodes
        .iter()
        .filter(|n| registry.hostname_of(n) == hostname)
        .cloned()
        .collect();
    for node in on_host {
        tracing::debug!(resv_id = %resv.id, node = %node, host = %hostname, "Evicting node from reservation");
        remove_node_from_resv(ledger, resv, &node, collab);
    }
}
