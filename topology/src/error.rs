//! Error types for the topology layer.

use thiserror::Error;

/// Errors that can occur while manipulating the overlay graph.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// A wire snapshot could not be decoded.
    #[error("topology snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The named peer is not part of the graph.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}

/// Convenience result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;
