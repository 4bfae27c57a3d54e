//! Snapshot fidelity: the INIT payload must reproduce the sender's
//! registries on a fresh peer, minus what never travels (group keys,
//! transient routing state).

use {
    crate::harness::{Mesh, TEST_KEY_BITS},
    crossbeam_channel::bounded,
    meshtalk_core::{Client, ClientOptions, Console},
    meshtalk_crypto::{seal, KeyStore},
    meshtalk_net::NetConfig,
    meshtalk_proto::{Command, InitPayload},
    serde_json::Value,
};

fn fresh_client(hostname: &str, ip: &str) -> Client {
    let (console, _console_rx) = Console::channel(false);
    let (_command_tx, command_rx) = bounded(4);
    let options = ClientOptions {
        nickname: Some("Fresh".to_string()),
        hostname: Some(hostname.to_string()),
        ip: Some(ip.to_string()),
        rsa_bits: TEST_KEY_BITS,
        multicast: false,
    };
    Client::new(NetConfig::dev_default(), options, command_rx, console, None).unwrap()
}

/// Build the INIT payload exactly the way a bridge does.
fn snapshot_of(client: &Client) -> InitPayload {
    InitPayload {
        topology: serde_json::to_value(client.topology().to_wire()).unwrap(),
        ips: serde_json::to_value(client.addrs().to_wire()).unwrap(),
        nicknames: serde_json::to_value(client.nicknames().to_wire()).unwrap(),
        groups: serde_json::to_value(client.groups().to_wire()).unwrap(),
        crypto: serde_json::to_value(client.keys().to_wire()).unwrap(),
    }
}

#[test]
fn test_init_reproduces_registries() {
    let mut mesh = Mesh::line(3);
    let create = mesh.propose("a.lan", "join chat pw", Command::Create, "chat");
    mesh.confirm("b.lan", &create);
    mesh.confirm("c.lan", &create);

    let payload = snapshot_of(&mesh.node("a.lan").client);
    let mut newcomer = fresh_client("x.lan", "2001:db8::99");
    newcomer.apply_init(&payload);

    // the newcomer sees what a sees
    let a = &mesh.node("a.lan").client;
    assert_eq!(newcomer.nicknames().get("b.lan"), a.nicknames().get("b.lan"));
    assert_eq!(newcomer.addrs().get("c.lan"), a.addrs().get("c.lan"));
    assert_eq!(
        newcomer.groups().get("chat").map(|g| g.admin().to_string()),
        Some("a.lan".to_string())
    );
    // edges came over; routing was recomputed locally
    assert_eq!(newcomer.topology().next_hop("a.lan"), None); // x has no links yet
    assert_eq!(
        newcomer.topology().peer("b.lan").unwrap().neighbors.len(),
        2
    );
    // group keys never travel
    assert!(!newcomer.keys().has_group_key("chat"));
}

#[test]
fn test_init_json_shape_matches_the_wire() {
    let mesh = Mesh::line(2);
    let payload = snapshot_of(&mesh.nodes[0].client);

    // maps are arrays of pairs, the topology an array of records
    let nicknames: Value = payload.nicknames.clone();
    assert!(nicknames.as_array().unwrap()[0].as_array().unwrap().len() == 2);
    let topology: Value = payload.topology.clone();
    assert!(topology.as_array().unwrap()[0].get("hostname").is_some());
    assert!(topology.as_array().unwrap()[0].get("neighbors").is_some());
    // no routing fields leak into the snapshot
    assert!(topology.as_array().unwrap()[0].get("nextHop").is_none());
    assert!(topology.as_array().unwrap()[0].get("next_hop").is_none());
}

#[test]
fn test_snapshot_public_keys_seal_end_to_end() {
    let mesh = Mesh::line(2);
    let a = &mesh.nodes[0].client;

    // a fresh store loading a's snapshot can seal for both peers
    let mut store = KeyStore::generate_with_bits("x.lan", TEST_KEY_BITS).unwrap();
    let wire: Vec<(String, String)> =
        serde_json::from_value(snapshot_of(a).crypto).unwrap();
    store.load_wire(&wire);

    let sealed = seal::seal_for(&store, "a.lan", b"hello a").unwrap();
    assert_eq!(seal::open(a.keys(), &sealed).unwrap(), b"hello a");
}

#[test]
fn test_roundtrip_through_json_text() {
    // the payload survives an actual serialize/parse cycle, as it
    // would inside a sealed INIT frame
    let mesh = Mesh::line(3);
    let payload = snapshot_of(&mesh.nodes[1].client);
    let text = serde_json::to_string(&payload).unwrap();
    let back: InitPayload = serde_json::from_str(&text).unwrap();
    assert_eq!(back, payload);
}
