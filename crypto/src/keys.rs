//! Keypair generation, the per-node key store, and group key
//! derivation.

use {
    crate::error::{CryptoError, Result},
    rsa::{
        pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
        RsaPrivateKey, RsaPublicKey,
    },
    sha2::{Digest, Sha256},
    std::collections::HashMap,
};

/// RSA modulus size for peer identities.
pub const RSA_KEY_BITS: usize = 2048;

/// Symmetric key and IV for one group, derived from its password.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey {
    /// AES-256 key.
    pub key: [u8; 32],
    /// CBC initialisation vector.
    pub iv: [u8; 16],
}

impl std::fmt::Debug for GroupKey {
    // never print key material
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("GroupKey(..)")
    }
}

/// Derive a group key from its password.
///
/// Legacy construction (kept for wire compatibility): the password is
/// zero-padded to 32 bytes of key-derivation input and its first 8
/// bytes double as the salt; 48 bytes of output are produced by
/// chained 6-round SHA-256 blocks, split into key and IV. The result
/// is a pure function of the password, which is exactly what lets
/// every member derive the same key independently.
pub fn derive_group_key(password: &str) -> GroupKey {
    const ROUNDS: usize = 6;
    let bytes = password.as_bytes();

    let mut data = [0u8; 32];
    let take = bytes.len().min(32);
    data[..take].copy_from_slice(&bytes[..take]);

    let mut salt = [0u8; 8];
    let take = bytes.len().min(8);
    salt[..take].copy_from_slice(&bytes[..take]);

    let mut output = Vec::with_capacity(48);
    let mut block: Vec<u8> = Vec::new();
    while output.len() < 48 {
        let mut hasher = Sha256::new();
        hasher.update(&block);
        hasher.update(data);
        hasher.update(salt);
        let mut digest = hasher.finalize();
        for _ in 1..ROUNDS {
            digest = Sha256::digest(digest);
        }
        block = digest.to_vec();
        output.extend_from_slice(&block);
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&output[..32]);
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&output[32..48]);
    GroupKey { key, iv }
}

/// Key material for one node: its own keypair, the public keys of
/// every known peer, and the derived group keys.
///
/// Group keys never leave this store; the wire snapshot covers public
/// keys only.
pub struct KeyStore {
    private_key: RsaPrivateKey,
    private_pem: String,
    public_keys: HashMap<String, String>,
    group_keys: HashMap<String, GroupKey>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("public_keys", &self.public_keys.len())
            .field("group_keys", &self.group_keys.len())
            .finish()
    }
}

impl KeyStore {
    /// Generate a fresh keypair and register its public half under
    /// the local hostname.
    pub fn generate(hostname: &str) -> Result<Self> {
        Self::generate_with_bits(hostname, RSA_KEY_BITS)
    }

    /// Generate with an explicit modulus size. Tests use small
    /// moduli to stay fast; production callers use [`Self::generate`].
    pub fn generate_with_bits(hostname: &str, bits: usize) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::KeyMaterial(format!("keygen: {e}")))?;
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMaterial(format!("private pem: {e}")))?
            .to_string();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMaterial(format!("public pem: {e}")))?;

        let mut store = Self {
            private_key,
            private_pem,
            public_keys: HashMap::new(),
            group_keys: HashMap::new(),
        };
        store.public_keys.insert(hostname.to_string(), public_pem);
        Ok(store)
    }

    /// Rebuild a store from a private key PEM (used by tests to get
    /// deterministic peers).
    pub fn from_private_pem(hostname: &str, pem: &str) -> Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::KeyMaterial(format!("private pem: {e}")))?;
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyMaterial(format!("public pem: {e}")))?;
        let mut store = Self {
            private_key,
            private_pem: pem.to_string(),
            public_keys: HashMap::new(),
            group_keys: HashMap::new(),
        };
        store.public_keys.insert(hostname.to_string(), public_pem);
        Ok(store)
    }

    // ── Own key material ────────────────────────────────────────────────

    /// The local private key (used by [`crate::seal::open`]).
    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// PEM of the local private key, for GETKEYPAIR.
    pub fn private_pem(&self) -> &str {
        &self.private_pem
    }

    // ── Public key table ────────────────────────────────────────────────

    /// Public key PEM for a peer, if known.
    pub fn public_pem(&self, hostname: &str) -> Option<&str> {
        self.public_keys.get(hostname).map(String::as_str)
    }

    /// Parsed public key for a peer.
    pub(crate) fn public_key(&self, hostname: &str) -> Result<RsaPublicKey> {
        let pem = self
            .public_pem(hostname)
            .ok_or_else(|| CryptoError::UnknownPeer(hostname.to_string()))?;
        RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CryptoError::KeyMaterial(format!("public pem for {hostname}: {e}")))
    }

    /// Register a peer's public key. Re-registration overwrites.
    pub fn add_public_key(&mut self, hostname: &str, pem: &str) {
        self.public_keys.insert(hostname.to_string(), pem.to_string());
    }

    /// Drop a peer's public key.
    pub fn remove_public_key(&mut self, hostname: &str) {
        self.public_keys.remove(hostname);
    }

    /// Snapshot the public-key table for the INIT payload,
    /// `[[hostname, pem], ...]` sorted for determinism.
    pub fn to_wire(&self) -> Vec<(String, String)> {
        let mut wire: Vec<(String, String)> = self
            .public_keys
            .iter()
            .map(|(h, p)| (h.clone(), p.clone()))
            .collect();
        wire.sort();
        wire
    }

    /// Merge a public-key snapshot into the table.
    pub fn load_wire(&mut self, wire: &[(String, String)]) {
        for (hostname, pem) in wire {
            self.add_public_key(hostname, pem);
        }
    }

    // ── Group keys ──────────────────────────────────────────────────────

    /// Derive and store the key for a group from its password,
    /// replacing any previous one.
    pub fn set_group_key(&mut self, group: &str, password: &str) {
        self.group_keys
            .insert(group.to_string(), derive_group_key(password));
    }

    /// The stored key for a group.
    pub(crate) fn group_key(&self, group: &str) -> Result<&GroupKey> {
        self.group_keys
            .get(group)
            .ok_or_else(|| CryptoError::UnknownGroup(group.to_string()))
    }

    /// Whether a key is stored for the group.
    pub fn has_group_key(&self, group: &str) -> bool {
        self.group_keys.contains_key(group)
    }

    /// Drop the key for a group (after leaving it).
    pub fn remove_group_key(&mut self, group: &str) {
        self.group_keys.remove(group);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
