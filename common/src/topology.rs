use std::collections::{BTreeSet, HashMap};

use crate::error::NodeError;
use crate::message::NodeId;

/// The direct neighbors assigned to this node by the latest topology message.
#[derive(Debug, Default, Clone)]
pub struct Topology {
    neighbors: BTreeSet<NodeId>,
}

impl Topology {
    /// Replaces the neighbor set with the entry for `self_id`. The node never
    /// lists itself as a neighbor.
    pub fn apply(
        &mut self,
        self_id: Option<&NodeId>,
        mapping: Option<HashMap<NodeId, Vec<NodeId>>>,
    ) -> Result<(), NodeError> {
        let mut mapping = mapping.ok_or(NodeError::MissingTopology)?;
        let self_id = self_id.ok_or(NodeError::MissingTopologyEntry(None))?;
        let neighbors = mapping
            .remove(self_id)
            .ok_or_else(|| NodeError::MissingTopologyEntry(Some(self_id.clone())))?;

        self.neighbors = neighbors
            .into_iter()
            .filter(|neighbor| neighbor != self_id)
            .collect();
        Ok(())
    }

    /// Neighbors except `excluded`, usually the sender of the triggering message.
    pub fn targets_except(&self, excluded: &str) -> BTreeSet<NodeId> {
        self.neighbors
            .iter()
            .filter(|neighbor| neighbor.as_str() != excluded)
            .cloned()
            .collect()
    }

    pub fn neighbors(&self) -> &BTreeSet<NodeId> {
        &self.neighbors
    }
}
