//! Degradation scanner: after a maintenance reservation claims nodes, every
//! overlapping reservation sharing one of those nodes is demoted, evicted
//! from the shared host, and queued for prompt reconfirmation.

use chrono::{DateTime, Utc};

use crate::resv::ResvState;
use crate::server::ServerState;

impl ServerState {
    /// Scan every node held by `id` for time-overlapping reservations and
    /// degrade them. Eviction mutates the node's association list, so the
    /// inner scan re-fetches the list and restarts until a full pass finds
    /// no further conflict.
    pub fn degrade_overlapping(&mut self, id: &str, now: DateTime<Utc>) {
        let Some(resv) = self.resvs.get(id) else { return };
        let (owner_id, owner_start, owner_end) = (resv.id.clone(), resv.start, resv.end);
        let owner_nodes = resv.nodes.clone();

        for node in owner_nodes {
            loop {
                let victim_id = self
                    .ledger
                    .reservations_on(&node)
                    .iter()
                    .find(|rid| {
                        if rid.as_str() == owner_id {
                            return false;
                        }
                        let Some(other) = self.resvs.get(rid.as_str()) else {
                            return false;
                        };
                        !other.is_maintenance(self.config.maintenance_prefix)
                            && other.state != ResvState::Unconfirmed
                            && owner_start <= other.end
                            && owner_end >= other.start
                    })
                    .cloned();

                let Some(victim_id) = victim_id else { break };

                tracing::info!(
                    resv_id = %victim_id,
                    node = %node,
                    conflicts_with = %owner_id,
                    "Reservation in conflict, degrading"
                );

                // force a prompt reconfirmation attempt
                self.set_resv_retry(&victim_id, now);

                if let Some(victim) = self.resvs.get_mut(&victim_id) {
                    let state = if victim.state == ResvState::Confirmed {
                        ResvState::Degraded
                    } else {
                        victim.state
                    };
                    victim.set_state(state, ResvState::InConflict);
                }

                let hostname = self.registry.hostname_of(&node).to_string();
                self.release_host(&victim_id, &hostname);

                if let Some(victim) = self.resvs.get(&victim_id) {
                    self.collab.save_resv(&victim.snapshot());
                }

                // eviction must have removed the victim from this node's
                // list, otherwise the scan could spin forever
                debug_assert!(!self.ledger.contains(&victim_id, &node));
                if self.ledger.contains(&victim_id, &node) {
                    tracing::error!(resv_id = %victim_id, node = %node, "Eviction left ledger entry behind");
                    self.ledger.release(&victim_id, &node);
                }
            }
        }
    }
}
