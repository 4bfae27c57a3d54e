//! The orchestrator.
//!
//! One `Client` owns every registry, the topology, the key store and
//! both transports. All state changes happen inside [`Client::tick`]:
//! drain one user command, poll discovery, poll the peer links. The
//! proposal machine, the direct handlers and the healing policies all
//! live here, as methods over the owned state.
//!
//! Message processing is deliberately socket-free at its core:
//! [`Client::handle_peer_envelope`] takes an already-decrypted
//! envelope, so the whole protocol can be driven in tests without a
//! single connection.

use {
    crate::{
        addrs::AddrBook,
        commands::{self, ParsedCommand},
        console::Console,
        error::Result,
        groups::{GroupRegistry, GroupWire},
        nicknames::NicknameRegistry,
    },
    crossbeam_channel::Receiver,
    log::{debug, error, warn},
    meshtalk_crypto::{seal, KeyStore, RSA_KEY_BITS},
    meshtalk_net::{discovery::Hello, DiscoverySocket, LinkEvent, NetConfig, PeerLinks},
    meshtalk_proto::{
        AddConnectionPayload, Command, Envelope, EnvelopeFactory, InitPayload, MessageLedger,
        NewPeerInfo, PingPayload, TargetPayload, TextPayload,
    },
    meshtalk_topology::Topology,
    serde_json::{json, Value},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::PathBuf,
        time::{SystemTime, UNIX_EPOCH},
    },
};

/// Renders the overlay graph to a file. Implemented by the binary so
/// the drawing stack stays out of the core.
pub trait TopologyPlotter {
    /// Draw the given nodes and edges; returns the written path.
    fn plot(
        &self,
        nodes: &[String],
        edges: &[(String, String)],
    ) -> std::io::Result<PathBuf>;
}

/// Startup options for a client.
pub struct ClientOptions {
    /// Desired nickname; a random one is chosen when empty or taken.
    pub nickname: Option<String>,
    /// Identity override. `None` resolves the local hostname.
    pub hostname: Option<String>,
    /// Advertised address override. `None` picks an interface address.
    pub ip: Option<String>,
    /// RSA modulus size; tests shrink this to stay fast.
    pub rsa_bits: usize,
    /// Whether to join the discovery multicast group. Disabled in
    /// test environments without multicast routes.
    pub multicast: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            nickname: None,
            hostname: None,
            ip: None,
            rsa_bits: RSA_KEY_BITS,
            multicast: true,
        }
    }
}

/// The event loop and all overlay state for one peer.
pub struct Client {
    config: NetConfig,
    hostname: String,
    ip: String,
    desired_nickname: Option<String>,
    console: Console,
    commands: Receiver<String>,
    discovery: Option<DiscoverySocket>,
    links: PeerLinks,
    keys: KeyStore,
    topology: Topology,
    nicknames: NicknameRegistry,
    addrs: AddrBook,
    groups: GroupRegistry,
    ledger: MessageLedger,
    factory: EnvelopeFactory,
    plotter: Option<Box<dyn TopologyPlotter>>,
    running: bool,
}

impl Client {
    /// Set up sockets, keys and registries. Socket failures here are
    /// fatal: the caller reports them and exits non-zero.
    pub fn new(
        config: NetConfig,
        options: ClientOptions,
        commands: Receiver<String>,
        console: Console,
        plotter: Option<Box<dyn TopologyPlotter>>,
    ) -> Result<Self> {
        let hostname = match options.hostname {
            Some(hostname) => hostname,
            None => meshtalk_net::ident::local_hostname()?,
        };
        let ip = match options.ip {
            Some(ip) => ip,
            None => meshtalk_net::ident::advertised_ipv6()?,
        };
        let keys = KeyStore::generate_with_bits(&hostname, options.rsa_bits)?;
        let links = PeerLinks::listen(config.clone(), &hostname)?;
        let discovery = if options.multicast {
            Some(DiscoverySocket::bind(&config)?)
        } else {
            None
        };

        let mut addrs = AddrBook::new();
        addrs.add(&hostname, &ip);

        console.say("Welcome to the meshtalk overlay!");
        Ok(Self {
            config,
            topology: Topology::new(&hostname),
            factory: EnvelopeFactory::new(&hostname),
            desired_nickname: options.nickname,
            hostname,
            ip,
            console,
            commands,
            discovery,
            links,
            keys,
            nicknames: NicknameRegistry::new(),
            addrs,
            groups: GroupRegistry::new(),
            ledger: MessageLedger::new(),
            plotter,
            running: true,
        })
    }

    // ── Read access (used by the binary and by tests) ───────────────────

    /// This peer's hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The overlay graph.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The nickname registry.
    pub fn nicknames(&self) -> &NicknameRegistry {
        &self.nicknames
    }

    /// The group registry.
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// The address registry.
    pub fn addrs(&self) -> &AddrBook {
        &self.addrs
    }

    /// The key store.
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Whether QUIT has been processed.
    pub fn is_running(&self) -> bool {
        self.running
    }

    // ── Startup ─────────────────────────────────────────────────────────

    /// Bootstrap into the overlay, then tick until QUIT.
    pub fn run(&mut self) -> Result<()> {
        self.bootstrap()?;
        while self.running {
            self.tick();
        }
        Ok(())
    }

    /// Announce this peer and either join the overlay that answers or
    /// start a fresh one.
    pub fn bootstrap(&mut self) -> Result<()> {
        self.console
            .say("Starting discovery for an existing overlay.");
        if let Some(discovery) = &self.discovery {
            let hello = Hello {
                ip: self.ip.clone(),
                port: self.links.local_port()?,
                public_key: self
                    .keys
                    .public_pem(&self.hostname)
                    .unwrap_or_default()
                    .to_string(),
            };
            discovery.send_hello(&hello)?;
        }

        if self.links.accept_for(self.config.accept_window) {
            self.console.say("Waiting for the current overlay state.");
            if self.wait_for_init() {
                self.console.say("Successfully joined an existing overlay.");
                return Ok(());
            }
            warn!("bridge vanished during bootstrap, starting a fresh overlay");
        }

        self.console
            .say("No other peer connected. Creating a new overlay.");
        self.choose_nickname();
        Ok(())
    }

    /// Wait for the INIT snapshot from the first bridge, then
    /// announce ourselves with an ADDCONNECTION flood. `false` when
    /// every link died first.
    fn wait_for_init(&mut self) -> bool {
        loop {
            match self.links.poll() {
                Some(LinkEvent::Frame { from, ciphertext }) => {
                    let Some(envelope) = self.decrypt_frame(&from, &ciphertext) else {
                        continue;
                    };
                    // everything else waits until the snapshot is in
                    if envelope.command != Command::Init {
                        continue;
                    }
                    match envelope.payload_as::<InitPayload>() {
                        Ok(payload) => {
                            self.apply_init(&payload);
                            self.announce_self();
                            return true;
                        }
                        Err(e) => error!("unusable INIT payload: {e}"),
                    }
                }
                Some(LinkEvent::PeerLost { hostname }) => {
                    warn!("lost '{hostname}' while waiting for the overlay state");
                    if self.links.neighbors().is_empty() {
                        return false;
                    }
                }
                None => std::thread::sleep(self.config.poll_timeout),
            }
        }
    }

    /// Load the bootstrap snapshot into the registries.
    pub fn apply_init(&mut self, payload: &InitPayload) {
        if let Err(e) = self.topology.load_json(&payload.topology) {
            error!("INIT topology did not load: {e}");
        }
        match serde_json::from_value::<Vec<(String, String)>>(payload.ips.clone()) {
            Ok(wire) => {
                self.addrs.load_wire(&wire);
                for (hostname, ip) in &wire {
                    if hostname != &self.hostname {
                        self.links.record_endpoint(hostname, ip, None);
                    }
                }
            }
            Err(e) => error!("INIT address book did not load: {e}"),
        }
        match serde_json::from_value::<Vec<(String, String)>>(payload.nicknames.clone()) {
            Ok(wire) => self.nicknames.load_wire(&wire),
            Err(e) => error!("INIT nicknames did not load: {e}"),
        }
        match serde_json::from_value::<Vec<(String, GroupWire)>>(payload.groups.clone()) {
            Ok(wire) => self.groups.load_wire(&wire),
            Err(e) => error!("INIT groups did not load: {e}"),
        }
        match serde_json::from_value::<Vec<(String, String)>>(payload.crypto.clone()) {
            Ok(wire) => self.keys.load_wire(&wire),
            Err(e) => error!("INIT public keys did not load: {e}"),
        }
    }

    /// Register our links in the topology, pick a nickname and flood
    /// the ADDCONNECTION that makes the overlay aware of us.
    fn announce_self(&mut self) {
        let neighbors = self.links.neighbors();
        let mut connections = Vec::new();
        for neighbor in &neighbors {
            self.topology.set_connection(&self.hostname, neighbor, true);
            connections.push((self.hostname.clone(), neighbor.clone()));
        }

        self.choose_nickname();
        let nickname = self
            .nicknames
            .get(&self.hostname)
            .unwrap_or_default()
            .to_string();

        let payload = AddConnectionPayload {
            connections,
            new_peers: Some(BTreeMap::from([(
                self.hostname.clone(),
                NewPeerInfo {
                    ip: self.ip.clone(),
                    name: nickname,
                    public_key: self
                        .keys
                        .public_pem(&self.hostname)
                        .unwrap_or_default()
                        .to_string(),
                },
            )])),
        };
        self.send_command(
            Command::AddConnection,
            serde_json::to_value(payload).unwrap_or(Value::Null),
            neighbors,
        );
    }

    /// Pick the desired nickname when it is valid and free, a random
    /// one otherwise.
    fn choose_nickname(&mut self) {
        let desired = self.desired_nickname.take().unwrap_or_default();
        let nickname = if NicknameRegistry::is_valid(&desired)
            && self.nicknames.reverse(&desired).is_none()
        {
            desired
        } else {
            let random = self.nicknames.random();
            self.console.say(format!(
                "Your passed nickname was empty or already taken. Taking '{random}' now."
            ));
            random
        };
        self.nicknames.add(&self.hostname, &nickname);
    }

    // ── The tick ────────────────────────────────────────────────────────

    /// One scheduling round: a command, the discovery socket, the
    /// peer links.
    pub fn tick(&mut self) {
        if let Ok(line) = self.commands.try_recv() {
            self.process_command_line(&line);
        }
        if let Some(hello) = self.discovery.as_ref().and_then(DiscoverySocket::poll) {
            self.handle_hello(hello);
        } else if self.discovery.is_none() {
            // nothing blocked this tick; keep the loop from spinning
            std::thread::sleep(self.config.poll_timeout);
        }
        match self.links.poll() {
            Some(LinkEvent::Frame { from, ciphertext }) => {
                if let Some(envelope) = self.decrypt_frame(&from, &ciphertext) {
                    self.handle_peer_envelope(envelope);
                }
            }
            Some(LinkEvent::PeerLost { hostname }) => self.handle_peer_lost(&hostname),
            None => {}
        }
    }

    fn decrypt_frame(&self, from: &str, ciphertext: &[u8]) -> Option<Envelope> {
        let record = match std::str::from_utf8(ciphertext) {
            Ok(record) => record,
            Err(_) => {
                error!("binary garbage on the link from '{from}'");
                return None;
            }
        };
        let plaintext = match seal::open(&self.keys, record) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!("cannot open frame from '{from}': {e}");
                return None;
            }
        };
        match Envelope::from_wire(&String::from_utf8_lossy(&plaintext)) {
            Ok(mut envelope) => {
                envelope.received_from = Some(from.to_string());
                Some(envelope)
            }
            Err(e) => {
                error!("undecodable envelope from '{from}': {e}");
                None
            }
        }
    }

    /// A link died and its reconnect window failed: flood the loss as
    /// a locally synthesised REMOVEPEER.
    fn handle_peer_lost(&mut self, hostname: &str) {
        self.console
            .say(format!("Lost connection to peer '{hostname}'."));
        let mut envelope =
            self.factory
                .build(false, Command::RemovePeer, json!(hostname), unix_now());
        envelope.received_from = Some(hostname.to_string());
        self.handle_peer_envelope(envelope);
    }

    // ── Inbound envelopes ───────────────────────────────────────────────

    /// Process one decrypted envelope: dedup, then the proposal
    /// machine or the matching direct handler.
    pub fn handle_peer_envelope(&mut self, envelope: Envelope) {
        let now = unix_now();
        if self.ledger.check_received(&envelope.id, now) {
            debug!("dropping duplicate {}", envelope.id);
            return;
        }
        if envelope.proposal {
            self.handle_proposal(envelope, now);
            return;
        }

        match envelope.command {
            Command::RemovePeer => {
                self.flood_onward(&envelope);
                match envelope.payload_as::<String>() {
                    Ok(lost) => self.apply_remove_peer(&lost),
                    Err(e) => error!("bad REMOVEPEER payload: {e}"),
                }
            }
            Command::AddConnection => {
                self.apply_add_connection(&envelope);
                self.flood_onward(&envelope);
            }
            Command::SetTopic => {
                self.apply_set_topic(&envelope);
                self.flood_onward(&envelope);
            }
            Command::Msg => self.handle_msg(envelope),
            Command::Ping | Command::Pong => self.handle_ping(envelope),
            other => {
                error!(
                    "cannot process '{}' here: unknown or local-only",
                    other.kind()
                );
            }
        }
    }

    /// Re-flood to every neighbor except the one it came from.
    fn flood_onward(&mut self, envelope: &Envelope) {
        let mut hops = self.links.neighbors();
        if let Some(from) = &envelope.received_from {
            hops.remove(from);
        }
        self.forward(envelope, &hops);
    }

    /// Seal and send one envelope to each hop.
    fn forward(&mut self, envelope: &Envelope, hops: &BTreeSet<String>) {
        let wire = match envelope.to_wire() {
            Ok(wire) => wire,
            Err(e) => {
                error!("cannot encode envelope {}: {e}", envelope.id);
                return;
            }
        };
        for hop in hops {
            match seal::seal_for(&self.keys, hop, wire.as_bytes()) {
                Ok(sealed) => {
                    if let Err(e) = self.links.send(hop, sealed.as_bytes()) {
                        error!("error while sending to '{hop}': {e}");
                    }
                }
                Err(e) => error!("cannot seal for '{hop}': {e}"),
            }
        }
    }

    /// Build an envelope and send it: proposal kinds flood to every
    /// neighbor and return the envelope for local tracking, the rest
    /// go to the given hops.
    fn send_command(
        &mut self,
        command: Command,
        payload: Value,
        hops: BTreeSet<String>,
    ) -> Option<Envelope> {
        let now = unix_now();
        if command.is_proposal_kind() {
            let envelope = self.factory.build(true, command, payload, now);
            let neighbors = self.links.neighbors();
            self.forward(&envelope, &neighbors);
            Some(envelope)
        } else {
            let envelope = self.factory.build(false, command, payload, now);
            self.forward(&envelope, &hops);
            None
        }
    }

    // ── The proposal machine ────────────────────────────────────────────

    /// Confirmations needed before a proposal commits: every other
    /// peer.
    fn required_confirmations(&self) -> usize {
        self.topology.peer_count().saturating_sub(1)
    }

    fn handle_proposal(&mut self, envelope: Envelope, now: u64) {
        // own proposals circle back over other links; never re-judge them
        if envelope.origin == self.hostname {
            return;
        }
        self.flood_onward(&envelope);

        match envelope.command {
            Command::Confirmation => {
                if let Ok(id) = envelope.payload_id() {
                    let count = self.ledger.add_confirmation(&id, &envelope.origin, now);
                    if count == self.required_confirmations() {
                        self.execute_proposal(&id, now);
                    }
                } else {
                    error!("CONFIRMATION without a proposal id");
                }
            }
            Command::Reject => {
                if let Ok(id) = envelope.payload_id() {
                    self.ledger.remove_proposal(&id, now);
                }
            }
            Command::Create | Command::Join | Command::Leave | Command::Nick => {
                self.judge_proposal(envelope, now);
            }
            other => debug!("ignoring proposal-flagged '{}'", other.kind()),
        }
    }

    /// Validate, check the blocking table, then confirm or reject.
    fn judge_proposal(&mut self, envelope: Envelope, now: u64) {
        let id = envelope.id.clone();
        let command = envelope.command;
        let target = envelope
            .payload_as::<TargetPayload>()
            .map(|p| p.target)
            .unwrap_or_default();

        let mut confirm = match command {
            Command::Join | Command::Leave => {
                if self.groups.get(&target).is_none() {
                    debug!("{} proposal for unknown group '{target}'", command.kind());
                    false
                } else {
                    true
                }
            }
            Command::Create => {
                if self.groups.get(&target).is_some() {
                    debug!("create proposal for existing group '{target}'");
                    false
                } else {
                    true
                }
            }
            Command::Nick => {
                if self.nicknames.reverse(&target).is_some() {
                    debug!("nick proposal for taken nickname '{target}'");
                    false
                } else {
                    true
                }
            }
            _ => false,
        };

        if confirm {
            if self.ledger.is_blocked(&envelope, now) {
                debug!("proposal {id} is blocked by a live proposal");
                confirm = false;
            } else {
                confirm = self.ledger.add_proposal(envelope, now);
                if confirm {
                    // our own confirmation counts too
                    let hostname = self.hostname.clone();
                    let count = self.ledger.add_confirmation(&id, &hostname, now);
                    if count == self.required_confirmations() {
                        self.execute_proposal(&id, now);
                    }
                }
            }
        }

        let verdict = if confirm {
            Command::Confirmation
        } else {
            Command::Reject
        };
        debug!("sending {} for proposal {id}", verdict.kind());
        self.send_command(verdict, json!(id), BTreeSet::new());
    }

    /// Commit a proposal: remove it from the ledger and apply its
    /// effect.
    fn execute_proposal(&mut self, id: &str, now: u64) {
        let Some(proposal) = self.ledger.remove_proposal(id, now) else {
            debug!("proposal {id} expired before it could commit");
            return;
        };
        let envelope = proposal.data;
        let target = envelope
            .payload_as::<TargetPayload>()
            .map(|p| p.target)
            .unwrap_or_default();
        match envelope.command {
            Command::Join => self.apply_join(&envelope.origin, &target),
            Command::Create => self.apply_create(&envelope.origin, &target),
            Command::Leave => self.apply_leave(&envelope.origin, &target),
            Command::Nick => self.apply_nick(&envelope.origin, &target),
            other => error!("cannot execute proposal of type '{}'", other.kind()),
        }
    }

    // ── Commit actions ──────────────────────────────────────────────────

    fn apply_join(&mut self, origin: &str, groupname: &str) {
        let nick = self.nickname_or_host(origin);
        match self.groups.get_mut(groupname) {
            Some(group) => {
                group.add_member(origin);
                self.console
                    .say(format!("Peer '{nick}' joined group '{groupname}'."));
            }
            None => debug!("'{origin}' cannot join unknown group '{groupname}'"),
        }
    }

    fn apply_create(&mut self, origin: &str, groupname: &str) {
        let nick = self.nickname_or_host(origin);
        if self.groups.create(groupname, origin).is_some() {
            self.console
                .say(format!("Peer '{nick}' created group '{groupname}'."));
        } else {
            debug!("'{origin}' failed to create existing group '{groupname}'");
        }
    }

    fn apply_leave(&mut self, origin: &str, groupname: &str) {
        let nick = self.nickname_or_host(origin);
        let Some(group) = self.groups.get_mut(groupname) else {
            debug!("'{origin}' cannot leave unknown group '{groupname}'");
            return;
        };
        group.remove_member(origin);
        let new_admin_is_me =
            group.changed_admin() && group.admin() == self.hostname;
        self.console
            .say(format!("Peer '{nick}' left group '{groupname}'."));
        if new_admin_is_me {
            self.console
                .say(format!("You are the new admin of group '{groupname}'."));
        }
        for removed in self.groups.remove_empty() {
            self.console.say(format!(
                "Last member '{nick}' left group '{removed}'. Removing the group."
            ));
        }
        if origin == self.hostname {
            self.keys.remove_group_key(groupname);
        }
    }

    fn apply_nick(&mut self, origin: &str, nickname: &str) {
        let old = self.nickname_or_host(origin);
        if self.nicknames.rename(origin, nickname) {
            self.console
                .say(format!("Peer '{old}' changed nick to '{nickname}'."));
        } else {
            debug!("failed to rename unknown peer '{origin}'");
        }
    }

    // ── Direct handlers ─────────────────────────────────────────────────

    /// Drop a peer everywhere, then heal whatever its loss broke.
    fn apply_remove_peer(&mut self, lost: &str) {
        if self.nicknames.get(lost).is_none() {
            debug!("REMOVEPEER for unknown '{lost}'");
            return;
        }
        let nick = self.nickname_or_host(lost);
        self.console
            .say(format!("Peer '{nick}' lost connection. Removing it."));

        let now = unix_now();
        self.ledger.forget_origin(lost, now);
        self.topology.remove_peer(lost);

        for groupname in self.groups.remove_from_all(lost) {
            self.console
                .say(format!("Removed member '{nick}' from group '{groupname}'."));
            let new_admin_is_me = self
                .groups
                .get(&groupname)
                .map(|g| g.changed_admin() && g.admin() == self.hostname)
                .unwrap_or(false);
            if new_admin_is_me {
                self.console
                    .say(format!("You are the new admin of group '{groupname}'."));
            }
        }
        for removed in self.groups.remove_empty() {
            self.console.say(format!(
                "Last member '{nick}' left group '{removed}'. Removing the group."
            ));
        }

        self.nicknames.remove(lost);
        self.addrs.remove(lost);
        self.keys.remove_public_key(lost);
        self.links.forget_endpoint(lost);

        if self.topology.is_fractured() {
            self.heal_fracture();
        } else if self.topology.is_underconnected() {
            self.heal_underconnection();
        }
    }

    fn apply_add_connection(&mut self, envelope: &Envelope) {
        let payload = match envelope.payload_as::<AddConnectionPayload>() {
            Ok(payload) => payload,
            Err(e) => {
                error!("bad ADDCONNECTION payload: {e}");
                return;
            }
        };
        if let Some(new_peers) = &payload.new_peers {
            for (hostname, info) in new_peers {
                self.topology.add_peer(hostname);
                self.nicknames.add(hostname, &info.name);
                self.addrs.add(hostname, &info.ip);
                self.keys.add_public_key(hostname, &info.public_key);
                self.links.record_endpoint(hostname, &info.ip, None);
                debug!("added new peer '{hostname}'");
                self.console
                    .say(format!("Peer '{}' joined the chat.", info.name));
            }
        }
        for (a, b) in &payload.connections {
            self.topology.set_connection(a, b, true);
            debug!("added connection between '{a}' and '{b}'");
        }
    }

    fn apply_set_topic(&mut self, envelope: &Envelope) {
        let Ok(TextPayload { target, text }) = envelope.payload_as::<TextPayload>() else {
            error!("bad SETTOPIC payload");
            return;
        };
        let nick = self.nickname_or_host(&envelope.origin);
        let Some(group) = self.groups.get_mut(&target) else {
            debug!("'{nick}' set topic of unknown group '{target}'");
            return;
        };
        if group.admin() != envelope.origin {
            debug!("'{nick}' is not the admin of '{target}'");
            return;
        }
        group.set_topic(&text);
        self.console
            .say(format!("Peer '{nick}' set topic of group '{target}' to '{text}'."));
    }

    fn handle_msg(&mut self, envelope: Envelope) {
        let Ok(TextPayload { target, text }) = envelope.payload_as::<TextPayload>() else {
            error!("bad MSG payload");
            return;
        };
        let sender = self.nickname_or_host(&envelope.origin);

        if self.is_recipient(&self.hostname, &target) {
            if self.groups.get(&target).is_some() {
                match seal::group_open(&self.keys, &target, &text) {
                    Ok(bytes) => self.console.chat(format!(
                        "[{target}] {sender}: {}",
                        String::from_utf8_lossy(&bytes)
                    )),
                    Err(_) => self
                        .console
                        .chat(format!("[{target}] {sender} used another key for encryption.")),
                }
            } else {
                match seal::open(&self.keys, &text) {
                    Ok(bytes) => self
                        .console
                        .chat(format!("{sender}: {}", String::from_utf8_lossy(&bytes))),
                    Err(_) => self
                        .console
                        .chat(format!("{sender} used another key for encryption.")),
                }
            }
            // the terminal hop of a unicast forwards nothing
            if target == self.hostname {
                return;
            }
        }

        let mut hops = self.next_hops(&target, true, true);
        if let Some(from) = &envelope.received_from {
            hops.remove(from);
        }
        self.forward(&envelope, &hops);
    }

    fn handle_ping(&mut self, envelope: Envelope) {
        let Ok(PingPayload { target, start }) = envelope.payload_as::<PingPayload>() else {
            error!("bad PING payload");
            return;
        };
        if target != self.hostname {
            let hops = self.next_hops(&target, true, false);
            self.forward(&envelope, &hops);
            return;
        }
        match envelope.command {
            Command::Ping => {
                // answer with the original departure time
                let hops = self.next_hops(&envelope.origin, true, false);
                self.send_command(
                    Command::Pong,
                    json!({ "target": envelope.origin, "start": start }),
                    hops,
                );
            }
            _ => {
                let nick = self.nickname_or_host(&envelope.origin);
                let rtt = unix_now_ms().saturating_sub(start);
                self.console
                    .say(format!("Ping to peer '{nick}' is {rtt}ms."));
            }
        }
    }

    // ── Discovery ───────────────────────────────────────────────────────

    /// A newcomer said hello: connect when we are a bridge, and send
    /// the INIT snapshot when we are the first bridge.
    pub fn handle_hello(&mut self, hello: Hello) {
        if hello.ip == self.ip {
            return; // our own announcement looped back
        }
        debug!("received multicast hello from '{}'", hello.ip);
        let bridges = self.topology.bridge_peers();
        if !bridges.iter().any(|b| b == &self.hostname) {
            debug!("other peers have to connect to the newcomer");
            return;
        }

        self.console
            .say(format!("Connecting to new peer at '{}'.", hello.ip));
        let hostname = match self.links.connect(&hello.ip, Some(hello.port)) {
            Ok(hostname) => hostname,
            Err(e) => {
                error!("failed to connect to '{}': {e}", hello.ip);
                return;
            }
        };

        if bridges.first().map(String::as_str) == Some(self.hostname.as_str()) {
            // store the key first so the snapshot can be sealed
            self.keys.add_public_key(&hostname, &hello.public_key);
            let payload = InitPayload {
                topology: serde_json::to_value(self.topology.to_wire()).unwrap_or(Value::Null),
                ips: serde_json::to_value(self.addrs.to_wire()).unwrap_or(Value::Null),
                nicknames: serde_json::to_value(self.nicknames.to_wire()).unwrap_or(Value::Null),
                groups: serde_json::to_value(self.groups.to_wire()).unwrap_or(Value::Null),
                crypto: serde_json::to_value(self.keys.to_wire()).unwrap_or(Value::Null),
            };
            self.send_command(
                Command::Init,
                serde_json::to_value(payload).unwrap_or(Value::Null),
                BTreeSet::from([hostname]),
            );
        }
    }

    // ── Healing ─────────────────────────────────────────────────────────

    fn heal_fracture(&mut self) {
        let targets = self.topology.connection_targets();
        if targets.is_empty() {
            self.console.say(
                "The overlay is fractured! Waiting for other peers to do the reconnect.",
            );
            self.links.accept_for(self.config.heal_window);
            return;
        }

        self.console
            .say("The overlay is fractured! Trying to rescue it.");
        let mut connections = Vec::new();
        for target in targets {
            let Some(ip) = self.addrs.get(&target).map(str::to_string) else {
                error!("no address for healing target '{target}'");
                continue;
            };
            match self.links.connect(&ip, None) {
                Ok(_) => {
                    self.topology.set_connection(&self.hostname, &target, true);
                    connections.push((self.hostname.clone(), target));
                }
                Err(e) => error!("healing connect to '{target}' failed: {e}"),
            }
        }
        if !connections.is_empty() {
            let payload = AddConnectionPayload {
                connections,
                new_peers: None,
            };
            let neighbors = self.links.neighbors();
            self.send_command(
                Command::AddConnection,
                serde_json::to_value(payload).unwrap_or(Value::Null),
                neighbors,
            );
        }
    }

    fn heal_underconnection(&mut self) {
        let Some(target) = self.topology.underconnection_target() else {
            self.console.say(
                "The overlay is underconnected. Waiting for other peers to do the reconnect.",
            );
            self.links.accept_for(self.config.heal_window);
            return;
        };
        self.console
            .say("The overlay is underconnected! Trying to rescue it.");
        let Some(ip) = self.addrs.get(&target).map(str::to_string) else {
            error!("no address for underconnection target '{target}'");
            return;
        };
        match self.links.connect(&ip, None) {
            Ok(_) => {
                self.topology.set_connection(&self.hostname, &target, true);
                let payload = AddConnectionPayload {
                    connections: vec![(self.hostname.clone(), target)],
                    new_peers: None,
                };
                let neighbors = self.links.neighbors();
                self.send_command(
                    Command::AddConnection,
                    serde_json::to_value(payload).unwrap_or(Value::Null),
                    neighbors,
                );
            }
            Err(e) => error!("underconnection connect to '{target}' failed: {e}"),
        }
    }

    // ── User commands ───────────────────────────────────────────────────

    /// Validate and dispatch one typed line.
    pub fn process_command_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match commands::parse_line(line) {
            Ok(parsed) => self.dispatch_command(parsed),
            Err(_) => self.console.warn("Invalid command entered. Try again."),
        }
    }

    fn dispatch_command(&mut self, parsed: ParsedCommand) {
        let ParsedCommand {
            command,
            mut target,
            text,
        } = parsed;

        match command {
            // strictly local
            Command::List => return self.show_groups(),
            Command::GetTopic => return self.show_topic(&target),
            Command::GetMembers => return self.show_members(&target),
            Command::Neighbors => return self.show_neighbors(),
            Command::Route => return self.show_route(&target),
            Command::Plot => return self.render_plot(),
            Command::GetPublicKey => return self.show_public_key(&target),
            Command::GetKeyPair => return self.show_key_pair(),
            Command::Help => return self.show_help(),
            Command::Quit => return self.quit(),
            _ => {}
        }

        // routed and flooded commands
        let (payload, hops): (Value, BTreeSet<String>) = match command {
            Command::Msg => {
                let Some(built) = self.build_msg(&mut target, &text) else {
                    return;
                };
                built
            }
            Command::Ping => {
                let Some(built) = self.build_ping(&mut target) else {
                    return;
                };
                built
            }
            Command::SetTopic => {
                let Some(group) = self.groups.get(&target) else {
                    self.console
                        .warn(format!("Failed to set topic of unknown group '{target}'."));
                    return;
                };
                if group.admin() != self.hostname {
                    self.console.warn(format!(
                        "Failed to set topic of group '{target}'. You are not the admin."
                    ));
                    return;
                }
                // applies locally right away; everyone else needs it too
                if let Some(group) = self.groups.get_mut(&target) {
                    group.set_topic(&text);
                }
                (
                    json!({ "target": target, "text": text }),
                    self.links.neighbors(),
                )
            }
            Command::Nick => {
                if !NicknameRegistry::is_valid(&target) {
                    self.console.warn(
                        "Invalid nickname. Letters and numbers only, one to nine characters.",
                    );
                    return;
                }
                if self.nicknames.reverse(&target).is_some() || self.groups.get(&target).is_some()
                {
                    self.console.warn("Chosen nickname is already taken.");
                    return;
                }
                (json!({ "target": target }), BTreeSet::new())
            }
            Command::Leave => {
                let Some(group) = self.groups.get(&target) else {
                    self.console
                        .warn(format!("Failed to leave unknown group '{target}'."));
                    return;
                };
                if !group.is_member(&self.hostname) {
                    self.console
                        .warn("You cannot leave a group you are not a member of.");
                    return;
                }
                (json!({ "target": target }), BTreeSet::new())
            }
            Command::Join => {
                let Some(built) = self.build_join(&target, &text) else {
                    return;
                };
                built
            }
            other => {
                warn!("unroutable command '{}'", other.kind());
                return;
            }
        };

        // JOIN demotes itself to CREATE inside build_join
        let command = if command == Command::Join && self.groups.get(&target).is_none() {
            Command::Create
        } else {
            command
        };

        if let Some(envelope) = self.send_command(command, payload, hops) {
            let now = envelope.timestamp;
            let id = envelope.id.clone();
            self.ledger.add_proposal(envelope, now);
            // alone in the overlay there is nobody to confirm
            if self.topology.peer_count() == 1 {
                self.execute_proposal(&id, now);
            }
        }
    }

    fn build_msg(&mut self, target: &mut String, text: &str) -> Option<(Value, BTreeSet<String>)> {
        if let Some(group) = self.groups.get(target.as_str()) {
            if !group.is_member(&self.hostname) {
                self.console.warn(
                    "You are not a member of that group. Join it before sending messages.",
                );
                return None;
            }
            let hops = self.next_hops(target, false, true);
            if hops.is_empty() {
                self.console
                    .warn("No reachable members in that group right now.");
                return None;
            }
            match seal::group_seal(&self.keys, target, text.as_bytes()) {
                Ok(sealed) => Some((json!({ "target": target, "text": sealed }), hops)),
                Err(e) => {
                    self.console.error(format!("Group encryption failed: {e}"));
                    None
                }
            }
        } else {
            let Some(hostname) = self.nicknames.reverse(target) else {
                self.console
                    .warn("The target is neither a group nor a nickname.");
                return None;
            };
            if hostname == self.hostname {
                self.console.warn("Why would you message yourself?");
                return None;
            }
            let hops = self.next_hops(&hostname, true, false);
            if hops.is_empty() {
                self.console.warn("That peer is not reachable right now.");
                return None;
            }
            match seal::seal_for(&self.keys, &hostname, text.as_bytes()) {
                Ok(sealed) => {
                    *target = hostname.clone();
                    Some((json!({ "target": hostname, "text": sealed }), hops))
                }
                Err(e) => {
                    self.console.error(format!("Encryption failed: {e}"));
                    None
                }
            }
        }
    }

    fn build_ping(&mut self, target: &mut String) -> Option<(Value, BTreeSet<String>)> {
        let hostname = self
            .nicknames
            .reverse(target)
            .or_else(|| self.addrs.reverse(target));
        let Some(hostname) = hostname else {
            self.console.warn("Unknown nickname or address entered.");
            return None;
        };
        if hostname == self.hostname {
            self.console.warn("You cannot ping yourself.");
            return None;
        }
        let hops = self.next_hops(&hostname, true, false);
        if hops.is_empty() {
            self.console.warn("That peer is not reachable right now.");
            return None;
        }
        *target = hostname.clone();
        Some((
            json!({ "target": hostname, "start": unix_now_ms() }),
            hops,
        ))
    }

    fn build_join(&mut self, target: &str, key: &str) -> Option<(Value, BTreeSet<String>)> {
        match self.groups.get(target) {
            None => {
                if self.nicknames.reverse(target).is_some() {
                    self.console.warn(format!(
                        "Group '{target}' does not exist, but a peer has this name."
                    ));
                    return None;
                }
                self.console
                    .say(format!("Group '{target}' does not exist. Trying to create it."));
            }
            Some(group) => {
                if group.is_member(&self.hostname) {
                    self.console
                        .warn(format!("You are already a member of group '{target}'."));
                    return None;
                }
            }
        }
        // the password never travels; every member derives locally
        self.keys.set_group_key(target, key);
        Some((json!({ "target": target }), BTreeSet::new()))
    }

    // ── Local queries ───────────────────────────────────────────────────

    fn show_groups(&self) {
        let names = self.groups.names();
        if names.is_empty() {
            self.console.say("There are currently no groups.");
        } else {
            self.console.say(format!("Groups: {}", names.join(", ")));
        }
    }

    fn show_topic(&self, target: &str) {
        match self.groups.get(target) {
            Some(group) => self.console.say(format!("Topic: '{}'.", group.topic())),
            None => self
                .console
                .warn(format!("Failed to get topic of unknown group '{target}'.")),
        }
    }

    fn show_members(&self, target: &str) {
        let Some(group) = self.groups.get(target) else {
            self.console
                .warn(format!("Failed to list members of unknown group '{target}'."));
            return;
        };
        let members: Vec<String> = group
            .members()
            .iter()
            .map(|m| self.nickname_or_host(m))
            .collect();
        self.console.say(format!("Members: {}", members.join(", ")));
    }

    fn show_neighbors(&self) {
        let neighbors = self.links.neighbors();
        if neighbors.is_empty() {
            self.console.say("There are currently no neighbors.");
        } else {
            self.console.say(format!(
                "Neighbors: {}",
                neighbors.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
    }

    fn show_route(&self, target: &str) {
        if target.is_empty() {
            self.console.say("Routing table:");
            for (destination, next_hop) in self.topology.routing_table() {
                if destination == self.hostname {
                    continue;
                }
                let hop = next_hop
                    .as_deref()
                    .map(|h| self.nickname_or_host(h))
                    .unwrap_or_else(|| "unreachable".to_string());
                self.console.say(format!(
                    "Peer: '{}', next hop: '{hop}'",
                    self.nickname_or_host(&destination)
                ));
            }
            return;
        }

        let Some(hostname) = self.nicknames.reverse(target) else {
            self.console.warn("Unknown nickname passed.");
            return;
        };
        let path: Vec<String> = self
            .topology
            .shortest_path(&hostname)
            .iter()
            .map(|hop| self.nickname_or_host(hop))
            .collect();
        self.console.say(format!("Path: {}", path.join(" -> ")));
    }

    fn render_plot(&self) {
        let Some(plotter) = &self.plotter else {
            self.console.warn("Plotting is not available in this build.");
            return;
        };
        let nodes: Vec<String> = self
            .topology
            .peers()
            .map(|p| p.hostname.clone())
            .collect();
        let edges: Vec<(String, String)> = self.topology.edges().into_iter().collect();
        match plotter.plot(&nodes, &edges) {
            Ok(path) => {
                self.console
                    .say(format!("Plot saved at '{}'.", path.display()));
                self.console.say(format!(
                    "Nodes clockwise from the top: {}",
                    nodes
                        .iter()
                        .map(|n| self.nickname_or_host(n))
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
            Err(e) => self.console.error(format!("Plotting failed: {e}")),
        }
    }

    fn show_public_key(&self, target: &str) {
        let Some(hostname) = self.nicknames.reverse(target) else {
            self.console.warn(format!(
                "Failed to get public key of unknown nickname '{target}'."
            ));
            return;
        };
        match self.keys.public_pem(&hostname) {
            Some(pem) => self
                .console
                .say(format!("Public key of peer '{target}':\n{pem}")),
            None => self
                .console
                .warn(format!("No public key stored for '{target}'.")),
        }
    }

    fn show_key_pair(&self) {
        let public = self.keys.public_pem(&self.hostname).unwrap_or_default();
        self.console.say(format!(
            "Own public key:\n{public}\nOwn private key:\n{}",
            self.keys.private_pem()
        ));
    }

    fn show_help(&self) {
        for line in [
            "Available commands:",
            "JOIN <name> <key>: Join or create a group, encrypting with the passed key",
            "LEAVE <name>: Leave the group",
            "NICK <name>: Change the own nickname",
            "LIST: List all existing groups",
            "GETMEMBERS <name>: List all members of the group",
            "GETTOPIC <name>: Print the current topic of the group",
            "SETTOPIC <name> <text>: Set the topic of the group (admin only)",
            "MSG <name> <text>: Message a single peer or a group",
            "NEIGHBORS: List the direct neighbors",
            "PING <nick|ip>: Measure availability and round-trip time",
            "ROUTE [<name>]: Show the route to a peer, or the whole routing table",
            "PLOT: Render the overlay graph to plot.png",
            "GETPUBLICKEY <name>: Print the public key of a peer",
            "GETKEYPAIR: Print the own public and private key",
            "HELP: This text",
            "QUIT: Leave the chat",
        ] {
            self.console.say(line);
        }
    }

    fn quit(&mut self) {
        self.console.say("Leaving the chat. Bye!");
        self.links.close_all();
        self.running = false;
    }

    // ── Small helpers ───────────────────────────────────────────────────

    /// Next hops towards a hostname or towards all members of a
    /// group, never including ourselves.
    fn next_hops(&self, recipient: &str, check_host: bool, check_group: bool) -> BTreeSet<String> {
        let mut hops = BTreeSet::new();
        if check_group {
            if let Some(group) = self.groups.get(recipient) {
                for member in group.members() {
                    if let Some(hop) = self.topology.next_hop(member) {
                        hops.insert(hop.to_string());
                    }
                }
                hops.remove(&self.hostname);
                return hops;
            }
        }
        if check_host && self.nicknames.get(recipient).is_some() {
            if let Some(hop) = self.topology.next_hop(recipient) {
                hops.insert(hop.to_string());
            }
        }
        hops.remove(&self.hostname);
        hops
    }

    /// Whether `hostname` should locally deliver a message addressed
    /// to `recipient`.
    fn is_recipient(&self, hostname: &str, recipient: &str) -> bool {
        if hostname == recipient {
            return true;
        }
        self.groups
            .get(recipient)
            .map(|g| g.is_member(hostname))
            .unwrap_or(false)
    }

    fn nickname_or_host(&self, hostname: &str) -> String {
        self.nicknames
            .get(hostname)
            .unwrap_or(hostname)
            .to_string()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Tests ───────────────────────────────────────────────────────────────────
