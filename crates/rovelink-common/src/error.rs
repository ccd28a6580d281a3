//! Common error types for Rovelink.

use thiserror::Error;

/// Result type alias using Rovelink's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Rovelink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (socket, stdin, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected signaling traffic
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation invoked in a state that does not accept it
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An offer was sent while no device is registered
    #[error("routing miss: {0}")]
    RoutingMiss(String),

    /// Operation timed out
    #[error("timeout: {0}")]
    Timeout(String),

    /// The signaling transport closed underneath us
    #[error("transport dropped: {0}")]
    TransportDrop(String),

    /// Media session or connectivity failure
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a precondition error from any displayable type.
    pub fn precondition(msg: impl std::fmt::Display) -> Self {
        Self::Precondition(msg.to_string())
    }

    /// Create a routing miss from any displayable type.
    pub fn routing_miss(msg: impl std::fmt::Display) -> Self {
        Self::RoutingMiss(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create a transport drop error from any displayable type.
    pub fn transport_drop(msg: impl std::fmt::Display) -> Self {
        Self::TransportDrop(msg.to_string())
    }

    /// Create a negotiation error from any displayable type.
    pub fn negotiation(msg: impl std::fmt::Display) -> Self {
        Self::Negotiation(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_keep_message() {
        let err = Error::routing_miss("no device registered");
        assert!(matches!(err, Error::RoutingMiss(_)));
        assert_eq!(err.to_string(), "routing miss: no device registered");
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
