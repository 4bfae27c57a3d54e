//! Flood dedup and the live proposal table.
//!
//! The ledger answers two questions for the orchestrator:
//!
//! 1. *Have I delivered this envelope before?* — per-origin highest
//!   delivered counter, giving at-most-once delivery and per-origin
//!   monotone ordering.
//! 2. *Which membership proposals are live, and who confirmed them?*
//!   — proposal records keyed by envelope id, each with an
//!   idempotent confirmation set, expired after [`PROPOSAL_TTL_SECS`].
//!
//! Conflicting concurrent proposals are kept from both committing by
//! the blocking table in [`MessageLedger::is_blocked`]. All methods
//! take `now` explicitly so every transition is reproducible.

use {
    crate::{
        command::Command,
        envelope::{Envelope, TargetPayload},
        Hostname,
    },
    log::debug,
    std::collections::{HashMap, HashSet},
};

/// How long a proposal may live, measured from its envelope timestamp.
pub const PROPOSAL_TTL_SECS: u64 = 20;

/// A live proposal: the original envelope plus who confirmed it.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// The proposing envelope as received.
    pub data: Envelope,
    /// Hostnames that confirmed, deduplicated by origin.
    pub confirmations: HashSet<Hostname>,
}

/// Tracks delivered ids and live proposals for one node.
#[derive(Debug, Default)]
pub struct MessageLedger {
    /// Highest delivered envelope counter per origin.
    seen: HashMap<Hostname, u64>,
    /// Live proposals in arrival order.
    proposals: Vec<Proposal>,
}

impl MessageLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Delivery dedup ──────────────────────────────────────────────────

    /// Record the id and report whether it was already delivered.
    ///
    /// Returns `true` when the envelope must be dropped: its counter
    /// is at or below the highest one delivered for that origin.
    /// Malformed ids are treated as duplicates — they cannot be
    /// tracked, so they must not propagate.
    pub fn check_received(&mut self, id: &str, now: u64) -> bool {
        self.sweep(now);
        let Ok((origin, counter)) = Envelope::split_id(id) else {
            debug!("dropping envelope with malformed id {id:?}");
            return true;
        };
        match self.seen.get_mut(&origin) {
            None => {
                self.seen.insert(origin, counter);
                false
            }
            Some(highest) if *highest < counter => {
                *highest = counter;
                false
            }
            Some(_) => true,
        }
    }

    /// Drop the delivery counter for an origin. Called when the peer
    /// leaves the overlay so a returning instance starts fresh.
    pub fn forget_origin(&mut self, origin: &str, now: u64) {
        self.sweep(now);
        self.seen.remove(origin);
    }

    // ── Proposal table ──────────────────────────────────────────────────

    /// Insert a proposal with an empty confirmation set.
    ///
    /// Returns `false` if the envelope has no usable id or the same
    /// proposal is already live.
    pub fn add_proposal(&mut self, envelope: Envelope, now: u64) -> bool {
        self.sweep(now);
        if envelope.id.is_empty() || self.find(&envelope.id).is_some() {
            return false;
        }
        self.proposals.push(Proposal {
            data: envelope,
            confirmations: HashSet::new(),
        });
        true
    }

    /// Look up a live proposal by id.
    pub fn get_proposal(&mut self, id: &str, now: u64) -> Option<&Proposal> {
        self.sweep(now);
        self.proposals.iter().find(|p| p.data.id == id)
    }

    /// Remove a proposal (commit, reject, or cleanup).
    pub fn remove_proposal(&mut self, id: &str, now: u64) -> Option<Proposal> {
        self.sweep(now);
        let index = self.proposals.iter().position(|p| p.data.id == id)?;
        Some(self.proposals.remove(index))
    }

    /// Register a confirmation from `origin` for the proposal `id`.
    ///
    /// Idempotent per origin. Returns the confirmation count after
    /// the update, or 0 when no such proposal is live.
    pub fn add_confirmation(&mut self, id: &str, origin: &str, now: u64) -> usize {
        self.sweep(now);
        match self.proposals.iter_mut().find(|p| p.data.id == id) {
            Some(proposal) => {
                proposal.confirmations.insert(origin.to_string());
                proposal.confirmations.len()
            }
            None => 0,
        }
    }

    /// Number of currently live proposals.
    pub fn live_proposals(&mut self, now: u64) -> usize {
        self.sweep(now);
        self.proposals.len()
    }

    /// Whether an incoming proposal is blocked by a live one.
    ///
    /// Same-target rules:
    /// - NICK   is blocked by another NICK.
    /// - CREATE is blocked by another CREATE.
    /// - JOIN   is blocked by a CREATE or a LEAVE.
    /// - LEAVE  is blocked by a JOIN.
    pub fn is_blocked(&mut self, envelope: &Envelope, now: u64) -> bool {
        self.sweep(now);
        let Ok(TargetPayload { target }) = envelope.payload_as::<TargetPayload>() else {
            return false;
        };
        self.proposals.iter().any(|live| {
            let conflicting = match envelope.command {
                Command::Nick => live.data.command == Command::Nick,
                Command::Create => live.data.command == Command::Create,
                Command::Join => {
                    matches!(live.data.command, Command::Create | Command::Leave)
                }
                Command::Leave => live.data.command == Command::Join,
                _ => false,
            };
            conflicting
                && live
                    .data
                    .payload_as::<TargetPayload>()
                    .map(|p| p.target == target)
                    .unwrap_or(false)
        })
    }

    /// Drop proposals whose envelope timestamp is older than the TTL.
    fn sweep(&mut self, now: u64) {
        let horizon = now.saturating_sub(PROPOSAL_TTL_SECS);
        self.proposals.retain(|p| {
            let live = p.data.timestamp >= horizon;
            if !live {
                debug!("expiring proposal {}", p.data.id);
            }
            live
        });
    }

    fn find(&self, id: &str) -> Option<&Proposal> {
        self.proposals.iter().find(|p| p.data.id == id)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
