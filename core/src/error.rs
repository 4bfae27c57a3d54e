//! Error types for the core layer.

use thiserror::Error;

/// Errors surfaced by registries and the orchestrator.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The typed line does not match the command grammar.
    #[error("invalid command")]
    InvalidCommand,

    /// The named peer, nickname or group is unknown.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A nickname or group name is already taken.
    #[error("name already taken: {0}")]
    DuplicateName(String),

    /// Wire protocol error.
    #[error(transparent)]
    Proto(#[from] meshtalk_proto::ProtoError),

    /// Crypto layer error.
    #[error(transparent)]
    Crypto(#[from] meshtalk_crypto::CryptoError),

    /// Transport layer error.
    #[error(transparent)]
    Net(#[from] meshtalk_net::NetError),

    /// Topology layer error.
    #[error(transparent)]
    Topology(#[from] meshtalk_topology::TopologyError),
}

/// Convenience result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
