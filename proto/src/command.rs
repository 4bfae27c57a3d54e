//! Command ordinals and their protocol classification.
//!
//! Commands travel on the wire as bare integers (the `type` field of
//! an envelope), so the ordinal of every variant is part of the
//! protocol and must never change.

use {
    crate::error::ProtoError,
    serde::{Deserialize, Serialize},
};

/// Every message and user operation known to the overlay.
///
/// The discriminants are the wire ordinals. Variants up to `REJECT`
/// plus `CREATE` are overlay-internal; the rest map 1:1 onto
/// interactive commands (some of which never leave the local peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Command {
    /// Bootstrap snapshot sent by the first bridge to a new peer.
    Init = 0,
    /// New overlay edges, optionally announcing new peers.
    AddConnection = 1,
    /// A peer was lost; flooded so everyone drops it.
    RemovePeer = 2,
    /// Confirmation of a live proposal (payload = proposal id).
    Confirmation = 3,
    /// Rejection of a live proposal (payload = proposal id).
    Reject = 4,
    /// Group creation (a JOIN that targeted a non-existent group).
    Create = 5,
    /// Join an existing group.
    Join = 6,
    /// Leave a group.
    Leave = 7,
    /// Change the origin's nickname.
    Nick = 8,
    /// List groups (local only).
    List = 9,
    /// Show a group topic (local only).
    GetTopic = 10,
    /// Set a group topic (admin only, flooded).
    SetTopic = 11,
    /// Unicast or group chat message.
    Msg = 12,
    /// Shut down the local peer (local only).
    Quit = 13,
    /// List group members (local only).
    GetMembers = 14,
    /// List direct neighbors (local only).
    Neighbors = 15,
    /// Round-trip probe.
    Ping = 16,
    /// Answer to a probe, carrying the original start timestamp.
    Pong = 17,
    /// Show the route to a peer or the routing table (local only).
    Route = 18,
    /// Render the overlay graph to a file (local only).
    Plot = 19,
    /// Show the command reference (local only).
    Help = 20,
    /// Print a peer's public key (local only).
    GetPublicKey = 21,
    /// Print the own keypair (local only).
    GetKeyPair = 22,
}

impl Command {
    /// Whether this command is carried inside a proposal-flagged
    /// envelope and flooded to every neighbor.
    ///
    /// CONFIRMATION and REJECT are not proposals themselves but ride
    /// the same flood path, so they count here too.
    pub fn is_proposal_kind(self) -> bool {
        matches!(
            self,
            Command::Confirmation
                | Command::Reject
                | Command::Create
                | Command::Join
                | Command::Leave
                | Command::Nick
        )
    }

    /// Whether this command mutates shared membership state and thus
    /// needs unanimous confirmation before committing.
    pub fn needs_agreement(self) -> bool {
        matches!(
            self,
            Command::Create | Command::Join | Command::Leave | Command::Nick
        )
    }

    /// Parse an interactive command keyword (case-insensitive).
    ///
    /// Only user-typeable commands resolve; overlay-internal types
    /// (INIT, ADDCONNECTION, ...) return `None`.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "JOIN" => Some(Command::Join),
            "LEAVE" => Some(Command::Leave),
            "NICK" => Some(Command::Nick),
            "LIST" => Some(Command::List),
            "GETTOPIC" => Some(Command::GetTopic),
            "SETTOPIC" => Some(Command::SetTopic),
            "MSG" => Some(Command::Msg),
            "QUIT" => Some(Command::Quit),
            "GETMEMBERS" => Some(Command::GetMembers),
            "NEIGHBORS" => Some(Command::Neighbors),
            "PING" => Some(Command::Ping),
            "ROUTE" => Some(Command::Route),
            "PLOT" => Some(Command::Plot),
            "HELP" => Some(Command::Help),
            "GETPUBLICKEY" => Some(Command::GetPublicKey),
            "GETKEYPAIR" => Some(Command::GetKeyPair),
            _ => None,
        }
    }

    /// Return a human-readable tag for logging.
    pub fn kind(self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::AddConnection => "add_connection",
            Command::RemovePeer => "remove_peer",
            Command::Confirmation => "confirmation",
            Command::Reject => "reject",
            Command::Create => "create",
            Command::Join => "join",
            Command::Leave => "leave",
            Command::Nick => "nick",
            Command::List => "list",
            Command::GetTopic => "get_topic",
            Command::SetTopic => "set_topic",
            Command::Msg => "msg",
            Command::Quit => "quit",
            Command::GetMembers => "get_members",
            Command::Neighbors => "neighbors",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Route => "route",
            Command::Plot => "plot",
            Command::Help => "help",
            Command::GetPublicKey => "get_public_key",
            Command::GetKeyPair => "get_key_pair",
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = ProtoError;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        Ok(match ordinal {
            0 => Command::Init,
            1 => Command::AddConnection,
            2 => Command::RemovePeer,
            3 => Command::Confirmation,
            4 => Command::Reject,
            5 => Command::Create,
            6 => Command::Join,
            7 => Command::Leave,
            8 => Command::Nick,
            9 => Command::List,
            10 => Command::GetTopic,
            11 => Command::SetTopic,
            12 => Command::Msg,
            13 => Command::Quit,
            14 => Command::GetMembers,
            15 => Command::Neighbors,
            16 => Command::Ping,
            17 => Command::Pong,
            18 => Command::Route,
            19 => Command::Plot,
            20 => Command::Help,
            21 => Command::GetPublicKey,
            22 => Command::GetKeyPair,
            other => return Err(ProtoError::UnknownCommand(other)),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
