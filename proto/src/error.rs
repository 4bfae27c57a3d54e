//! Error types for the wire protocol layer.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or tracking messages.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// Failed to serialize or deserialize an envelope or payload.
    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A message id did not have the `<origin>-<n>` shape.
    #[error("malformed message id: {0}")]
    MalformedId(String),

    /// The numeric ordinal on the wire does not name a command.
    #[error("unknown command ordinal: {0}")]
    UnknownCommand(u8),

    /// The payload does not have the shape required by its command.
    #[error("payload mismatch for {command}: {reason}")]
    PayloadMismatch {
        /// Logging tag of the command whose payload was malformed.
        command: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Convenience result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
