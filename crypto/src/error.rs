//! Error types for the crypto layer.

use thiserror::Error;

/// Errors that can occur while sealing, opening or managing keys.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Keypair generation or PEM encoding failed.
    #[error("key material error: {0}")]
    KeyMaterial(String),

    /// No public key is stored for the peer.
    #[error("no public key for peer: {0}")]
    UnknownPeer(String),

    /// No group key has been derived for the group.
    #[error("no key for group: {0}")]
    UnknownGroup(String),

    /// The RSA wrap or unwrap of the session key failed.
    #[error("session key wrap error: {0}")]
    Wrap(#[from] rsa::Error),

    /// The `#`-delimited ciphertext record is malformed.
    #[error("malformed cipher record: {0}")]
    MalformedRecord(String),

    /// Decryption failed — most likely the wrong key was used.
    #[error("decrypt failure (used another key?)")]
    Decrypt,
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::MalformedRecord(format!("base64: {e}"))
    }
}

/// Convenience result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
