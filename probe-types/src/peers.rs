//! Reachability feed payload.

use crate::{NodeAddr, TypesError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Announcement of which peers are currently reachable.
///
/// Encoded as `{"peers": ["10.19.30.101", ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerList {
    /// Currently reachable peers.
    #[serde(default)]
    pub peers: Vec<NodeAddr>,
}

impl PeerList {
    /// Decode a peer list from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TypesError> {
        serde_json::from_str(text).map_err(TypesError::InvalidPeerList)
    }

    /// Consume into a set, dropping duplicates.
    pub fn into_set(self) -> HashSet<NodeAddr> {
        self.peers.into_iter().collect()
    }
}
