//! Meshtalk Transport
//!
//! Two socket families connect a peer to the overlay:
//!
//! - **Discovery** — a UDP socket joined to the IPv6 multicast group
//!   `ff12::1234`. A starting peer announces itself with a single
//!   hello datagram; established peers watch the group to bridge
//!   newcomers in.
//! - **Peer links** — up to three length-prefixed TCP streams, one
//!   per direct neighbor. Every frame is `u32-be length ‖ ciphertext`;
//!   partial reads and writes are looped until complete.
//!
//! Peers are identified by the canonical hostname of their address
//! (reverse DNS on accept, forward-confirmed on dial). Losing a link
//! first runs a one-second reconnect window — the lexicographically
//! smaller hostname listens, the larger dials — and only a failed
//! reconnect surfaces a [`LinkEvent::PeerLost`].
//!
//! This layer moves ciphertext; sealing and opening happen above it.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]    | `NetConfig` defaults and test overrides |
//! | [`discovery`] | Multicast hello socket |
//! | [`links`]     | Peer link set, framing, reconnect window |
//! | [`ident`]     | Local hostname and advertised address |
//! | [`error`]     | Crate-wide error enum |

pub mod config;
pub mod discovery;
pub mod error;
pub mod ident;
pub mod links;

pub use config::NetConfig;
pub use discovery::{DiscoverySocket, Hello};
pub use error::{NetError, Result};
pub use links::{Endpoint, LinkEvent, PeerLinks};
