//! Error types for mesh-probe records.

use thiserror::Error;

/// Errors raised while building or decoding mesh-probe records.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Node address was empty or whitespace only
    #[error("node address must not be empty")]
    EmptyAddress,

    /// Node address contained interior whitespace
    #[error("invalid node address: {0:?}")]
    InvalidAddress(String),

    /// Peer list payload could not be decoded
    #[error("invalid peer list: {0}")]
    InvalidPeerList(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidAddress("10.0.0.1 x".into());
        assert_eq!(err.to_string(), "invalid node address: \"10.0.0.1 x\"");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
