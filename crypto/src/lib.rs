//! Meshtalk Crypto
//!
//! Two encryption contracts keep overlay traffic private:
//!
//! - **Hybrid seal** for everything on a peer link: a fresh AES-256
//!   session key encrypts the frame, the recipient's RSA public key
//!   wraps the session key. Wire form is the `#`-delimited record
//!   `b64(ek)#ekl#b64(iv)#ivl#b64(ct)#ctl`.
//! - **Group cipher** for group chat payloads: key and IV are derived
//!   deterministically from the group password, so every member who
//!   typed the same password can open them. Wire form `b64(ct)#ctl`.
//!
//! The derivation is the legacy 6-round SHA-256 construction and is
//! deliberately weak — it is part of the wire protocol and cannot be
//! hardened without breaking key agreement with existing peers.
//!
//! Decrypt failures are ordinary events here (a peer may simply hold
//! another group key); callers decide whether to surface them.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`keys`]  | Keypair generation, key store, group key derivation |
//! | [`seal`]  | Hybrid seal/open and the group cipher |
//! | [`error`] | Crate-wide error enum |

pub mod error;
pub mod keys;
pub mod seal;

pub use error::{CryptoError, Result};
pub use keys::{derive_group_key, GroupKey, KeyStore, RSA_KEY_BITS};
