//! Meshtalk Wire Protocol
//!
//! This crate defines everything that travels between peers and the
//! bookkeeping needed to deliver it exactly once:
//!
//! - **Envelopes** — every frame on a peer link carries one JSON
//!   [`Envelope`] with a per-origin monotone id, the command ordinal,
//!   and a per-command payload.
//! - **Commands** — the [`Command`] enum covers both overlay-internal
//!   messages (INIT, ADDCONNECTION, REMOVEPEER) and user-visible
//!   operations (MSG, NICK, group membership).
//! - **Message ledger** — the [`MessageLedger`] tracks the highest
//!   delivered id per origin (flood dedup) and the table of live
//!   membership proposals with their confirmation sets.
//!
//! The ledger is a pure state machine: wall-clock time is always
//! passed in by the caller, so every transition is reproducible in
//! tests.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`command`]  | Command ordinals, proposal classification |
//! | [`envelope`] | Envelope wire type, typed payload views, factory |
//! | [`ledger`]   | Seen-id dedup and the live proposal table |
//! | [`error`]    | Crate-wide error enum |

pub mod command;
pub mod envelope;
pub mod error;
pub mod ledger;

pub use command::Command;
pub use envelope::{
    AddConnectionPayload, Envelope, EnvelopeFactory, InitPayload, NewPeerInfo, PingPayload,
    TargetPayload, TextPayload,
};
pub use error::{ProtoError, Result};
pub use ledger::{MessageLedger, Proposal, PROPOSAL_TTL_SECS};

/// A peer identity on the overlay: its canonical hostname.
pub type Hostname = String;
