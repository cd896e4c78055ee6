//! # probe-types
//!
//! Record and wire types shared by every mesh-probe crate.
//!
//! This crate provides the foundational types:
//! - [`NodeAddr`], [`Edge`] - Node identity and directed test pairs
//! - [`TestOutcome`], [`Role`], [`ProbeKind`] - Published per-attempt records
//! - [`PeerList`] - Reachability feed payload
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod addr;
mod error;
mod outcome;
mod peers;

pub use addr::{Edge, NodeAddr};
pub use error::TypesError;
pub use outcome::{ProbeKind, Role, TestOutcome};
pub use peers::PeerList;
