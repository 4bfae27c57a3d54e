//! Error types for the transport layer.

use thiserror::Error;

/// Errors that can occur in the discovery and peer-link transports.
#[derive(Error, Debug)]
pub enum NetError {
    /// Creating or configuring a socket failed. Fatal at startup.
    #[error("socket setup error: {0}")]
    Setup(std::io::Error),

    /// A connect attempt failed or timed out.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed {
        /// Address that was dialled.
        addr: String,
        /// Why it failed.
        reason: String,
    },

    /// All link slots are in use.
    #[error("link limit reached ({0})")]
    LinksFull(usize),

    /// No link is established to the peer.
    #[error("no link to peer: {0}")]
    NoLink(String),

    /// A peer sent a frame larger than the configured maximum.
    #[error("oversized frame from {peer}: {size} bytes (max {max})")]
    OversizedFrame {
        /// Offending peer.
        peer: String,
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The local hostname or address could not be determined.
    #[error("identity error: {0}")]
    Identity(String),

    /// Transport-level I/O error on an established link.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, NetError>;
