//! Meshtalk Property-Based Invariant Tests
//!
//! Uses proptest to verify the protocol invariants across randomised
//! operation sequences:
//!
//! - Graph: the neighbor relation stays symmetric, routing stays
//!   consistent with reachability
//! - Membership: every non-empty group keeps its admin among the
//!   members; the nickname map stays injective
//! - Delivery: per-origin ids are delivered at most once and in
//!   monotone order; conflicting proposals never both survive

pub mod delivery_invariants;
pub mod graph_invariants;
pub mod membership_invariants;
