//! Meshtalk Integration Tests
//!
//! Drives several real [`meshtalk_core::Client`] instances through
//! protocol scenarios without sockets: the harness constructs the
//! envelopes a flood would deliver and feeds them straight into each
//! client's envelope handler.
//!
//! # Scenarios covered
//!
//! 1. **Membership agreement** — NICK/CREATE/JOIN/LEAVE proposals,
//!    confirmation counting, conflict blocking, rejection, expiry
//! 2. **Registry convergence** — after a commit, every reachable
//!    peer's registries agree on the touched fields
//! 3. **Peer loss** — REMOVEPEER cleanup and admin succession
//! 4. **Snapshots** — the INIT payload faithfully reproduces the
//!    sender's registries on a fresh peer

pub mod harness;



#[cfg(test)]
mod snapshot_tests;
