//! The envelope wire type and its per-command payload views.
//!
//! Every peer-link frame decrypts to one JSON envelope. The payload
//! shape depends on the command, so it is kept as a raw
//! [`serde_json::Value`] on the envelope and accessed through the
//! typed views below — the wire stays exactly what the protocol
//! defines while use sites get real structs.

use {
    crate::{
        command::Command,
        error::{ProtoError, Result},
        Hostname,
    },
    serde::{de::DeserializeOwned, Deserialize, Serialize},
    serde_json::Value,
    std::collections::BTreeMap,
};

/// One flooded or routed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Per-origin monotone id, `"<origin>-<n>"`.
    pub id: String,
    /// Hostname of the peer that created this envelope.
    pub origin: Hostname,
    /// Unix timestamp (seconds) at creation; drives proposal expiry.
    pub timestamp: u64,
    /// Whether this envelope takes the proposal flood path.
    pub proposal: bool,
    /// Command ordinal.
    #[serde(rename = "type")]
    pub command: Command,
    /// Per-command payload, see the typed views.
    pub payload: Value,
    /// Neighbor this envelope arrived from. Attached after decrypt
    /// and carried along on re-floods.
    #[serde(
        rename = "receivedFrom",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub received_from: Option<Hostname>,
}

impl Envelope {
    /// Serialize to the single-line JSON document that gets sealed
    /// and framed onto a peer link.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from decrypted frame text.
    pub fn from_wire(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the payload into one of the typed views.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtoError::PayloadMismatch {
            command: self.command.kind(),
            reason: e.to_string(),
        })
    }

    /// For CONFIRMATION / REJECT: the id of the proposal referred to.
    pub fn payload_id(&self) -> Result<String> {
        self.payload_as::<String>()
    }

    /// Split the id into its origin and counter halves.
    ///
    /// Hostnames may themselves contain `-`, so the split is on the
    /// last one.
    pub fn split_id(id: &str) -> Result<(Hostname, u64)> {
        let (origin, counter) = id
            .rsplit_once('-')
            .ok_or_else(|| ProtoError::MalformedId(id.to_string()))?;
        let counter = counter
            .parse::<u64>()
            .map_err(|_| ProtoError::MalformedId(id.to_string()))?;
        if origin.is_empty() {
            return Err(ProtoError::MalformedId(id.to_string()));
        }
        Ok((origin.to_string(), counter))
    }
}

// ── Typed payload views ─────────────────────────────────────────────────────

/// CREATE / JOIN / LEAVE / NICK / REMOVEPEER-adjacent payloads that
/// only name their target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetPayload {
    /// Group name, nickname or hostname, depending on the command.
    pub target: String,
}

/// MSG and SETTOPIC: a target plus text (ciphertext for MSG).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextPayload {
    /// Recipient hostname or group name.
    pub target: String,
    /// Message ciphertext, or the plaintext topic for SETTOPIC.
    pub text: String,
}

/// PING / PONG: the probe target and the departure timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PingPayload {
    /// Hostname being probed (or the origin, for the PONG leg).
    pub target: String,
    /// Milliseconds since the epoch when the PING left its origin.
    pub start: u64,
}

/// Announcement data for a peer that just joined the overlay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPeerInfo {
    /// Advertised IPv6 address.
    pub ip: String,
    /// Chosen nickname.
    pub name: String,
    /// Public key PEM.
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// ADDCONNECTION: new overlay edges, optionally with new peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AddConnectionPayload {
    /// Each entry is one new undirected edge `[a, b]`.
    pub connections: Vec<(Hostname, Hostname)>,
    /// Peers not yet known to the overlay, keyed by hostname.
    #[serde(rename = "newPeers", default, skip_serializing_if = "Option::is_none")]
    pub new_peers: Option<BTreeMap<Hostname, NewPeerInfo>>,
}

/// INIT: the full bootstrap snapshot a bridge hands a new peer.
///
/// The component wire forms live with their owners; this struct only
/// fixes the five keys of the snapshot object. Group keys are never
/// part of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitPayload {
    /// Overlay graph, `[{hostname, neighbors}, ...]`.
    pub topology: Value,
    /// Address book, `[[hostname, ip], ...]`.
    pub ips: Value,
    /// Nickname map, `[[hostname, nickname], ...]`.
    pub nicknames: Value,
    /// Group registry, `[[name, {admin, topic, members}], ...]`.
    pub groups: Value,
    /// Public-key table, `[[hostname, pem], ...]`.
    pub crypto: Value,
}

// ── Envelope construction ───────────────────────────────────────────────────

/// Builds envelopes for one node, numbering them monotonically.
#[derive(Debug)]
pub struct EnvelopeFactory {
    origin: Hostname,
    counter: u64,
}

impl EnvelopeFactory {
    /// Create a factory for the given origin. Ids start at
    /// `"<origin>-1"`.
    pub fn new(origin: impl Into<Hostname>) -> Self {
        Self {
            origin: origin.into(),
            counter: 0,
        }
    }

    /// The origin this factory stamps onto envelopes.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Build the next envelope.
    pub fn build(&mut self, proposal: bool, command: Command, payload: Value, now: u64) -> Envelope {
        self.counter += 1;
        Envelope {
            id: format!("{}-{}", self.origin, self.counter),
            origin: self.origin.clone(),
            timestamp: now,
            proposal,
            command,
            payload,
            received_from: None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn factory() -> EnvelopeFactory {
        EnvelopeFactory::new("alice.lan")
    }

    #[test]
    fn test_wire_roundtrip() {
        let mut f = factory();
        let env = f.build(
            false,
            Command::Msg,
            json!({"target": "bob.lan", "text": "q29k#4"}),
            1_700_000_000,
        );
        let wire = env.to_wire().unwrap();
        let back = Envelope::from_wire(&wire).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn test_wire_field_names() {
        let mut f = factory();
        let env = f.build(true, Command::Nick, json!({"target": "Zed"}), 1);
        let wire = env.to_wire().unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["type"], json!(8));
        assert_eq!(value["proposal"], json!(true));
        assert_eq!(value["id"], json!("alice.lan-1"));
        // receivedFrom is absent until a hop attaches it
        assert!(value.get("receivedFrom").is_none());
    }

    #[test]
    fn test_received_from_travels() {
        let mut f = factory();
        let mut env = f.build(false, Command::SetTopic, json!({"target": "g", "text": "t"}), 1);
        env.received_from = Some("carol.lan".into());
        let back = Envelope::from_wire(&env.to_wire().unwrap()).unwrap();
        assert_eq!(back.received_from.as_deref(), Some("carol.lan"));
    }

    #[test]
    fn test_ids_are_monotone() {
        let mut f = factory();
        let a = f.build(false, Command::Ping, json!({"target": "b", "start": 0}), 1);
        let b = f.build(false, Command::Ping, json!({"target": "b", "start": 0}), 1);
        assert_eq!(a.id, "alice.lan-1");
        assert_eq!(b.id, "alice.lan-2");
    }

    #[test]
    fn test_split_id_handles_dashed_hostnames() {
        let (origin, n) = Envelope::split_id("my-host-7.lan-42").unwrap();
        assert_eq!(origin, "my-host-7.lan");
        assert_eq!(n, 42);
        assert!(Envelope::split_id("no-number-").is_err());
        assert!(Envelope::split_id("nonumber").is_err());
        assert!(Envelope::split_id("-5").is_err());
    }

    #[test]
    fn test_typed_payload_views() {
        let mut f = factory();
        let env = f.build(
            false,
            Command::Ping,
            json!({"target": "bob.lan", "start": 123456}),
            1,
        );
        let ping: PingPayload = env.payload_as().unwrap();
        assert_eq!(ping.start, 123_456);

        let bad: Result<PingPayload> = f
            .build(false, Command::Ping, json!({"target": "bob.lan"}), 1)
            .payload_as();
        assert!(bad.is_err());
    }

    #[test]
    fn test_add_connection_payload_shape() {
        let payload = AddConnectionPayload {
            connections: vec![("a.lan".into(), "b.lan".into())],
            new_peers: Some(BTreeMap::from([(
                "b.lan".into(),
                NewPeerInfo {
                    ip: "2001:db8::2".into(),
                    name: "Bob".into(),
                    public_key: "-----BEGIN PUBLIC KEY-----".into(),
                },
            )])),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["connections"][0], json!(["a.lan", "b.lan"]));
        assert_eq!(value["newPeers"]["b.lan"]["ip"], json!("2001:db8::2"));

        // edges-only payloads omit the newPeers key entirely
        let bare = AddConnectionPayload {
            connections: vec![("a.lan".into(), "c.lan".into())],
            new_peers: None,
        };
        let value = serde_json::to_value(&bare).unwrap();
        assert!(value.get("newPeers").is_none());
    }
}
