//! Role resolution: what this node does in a given slot.

use crate::schedule::Slot;
use probe_types::NodeAddr;
use thiserror::Error;

/// Role resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoleError {
    /// The slot lists this node as initiator more than once.
    ///
    /// Impossible for a verified schedule; means the schedule was corrupted.
    #[error("{node} initiates {count} edges in one slot")]
    DuplicateInitiator {
        /// The node.
        node: NodeAddr,
        /// Number of matching edges.
        count: usize,
    },
}

/// Find this node's test partner in `slot`.
///
/// Returns the responder of the edge this node initiates, or `None` if the
/// node is idle or only a responder in this slot.
pub fn resolve_role(slot: &Slot, self_addr: &NodeAddr) -> Result<Option<NodeAddr>, RoleError> {
    let mut matches = slot.edges().iter().filter(|e| &e.initiator == self_addr);
    let first = matches.next();
    let extra = matches.count();
    if extra > 0 {
        return Err(RoleError::DuplicateInitiator {
            node: self_addr.clone(),
            count: extra + 1,
        });
    }
    Ok(first.map(|e| e.responder.clone()))
}

/// The node expected to test this node in `slot`, if any.
pub fn expected_initiator(slot: &Slot, self_addr: &NodeAddr) -> Option<NodeAddr> {
    slot.edges()
        .iter()
        .find(|e| &e.responder == self_addr)
        .map(|e| e.initiator.clone())
}
