//! Node identity and directed test pairs.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque address of a participating node (usually an IP address).
///
/// Ordering is lexicographic on the address text. Every node sorts the
/// node set with this ordering, which is what makes independently built
/// schedules identical.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddr(String);

impl NodeAddr {
    /// Create a NodeAddr, rejecting empty or whitespace-containing input.
    pub fn new(addr: impl Into<String>) -> Result<Self, TypesError> {
        let addr = addr.into();
        let trimmed = addr.trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyAddress);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TypesError::InvalidAddress(addr));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeAddr {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeAddr {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeAddr> for String {
    fn from(addr: NodeAddr) -> Self {
        addr.0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddr({})", self.0)
    }
}

impl AsRef<str> for NodeAddr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A directed test pair: `initiator` runs the client side against `responder`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Node that launches the probes.
    pub initiator: NodeAddr,
    /// Node that answers the probes.
    pub responder: NodeAddr,
}

impl Edge {
    /// Create a new edge.
    pub fn new(initiator: NodeAddr, responder: NodeAddr) -> Self {
        Self {
            initiator,
            responder,
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.initiator, self.responder)
    }
}
