//! Storage abstractions for sessions, prekeys, identities and sender keys.
//!
//! The protocol core only talks to these traits. Loads hand out owned copies
//! and nothing is written back until an operation has fully succeeded, so a
//! failed decrypt never disturbs stored state.
//!
//! The in-memory backends are thread-safe (`Arc<Mutex<_>>`) and suitable for
//! tests and applications that don't need persistence.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::address::{ProtocolAddress, SenderKeyName};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, IdentityKeyPair};
use crate::state::{PreKeyRecord, SenderKeyRecord, SessionRecord, SignedPreKeyRecord};

/// Our own identity plus the identities we have seen from others.
pub trait IdentityKeyStore: Send + Sync {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair>;

    fn local_registration_id(&self) -> Result<u32>;

    /// Records `identity` as the current identity of `name`.
    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<()>;

    /// Whether a session may be built with `identity` for `name`.
    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool>;

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>>;
}

/// Storage backend for one-time prekeys.
///
/// A prekey is removed once a session built from it has decrypted its first
/// message.
pub trait PreKeyStore: Send + Sync {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;

    /// If a prekey with the same ID already exists, it is replaced.
    fn store_pre_key(&mut self, id: u32, record: PreKeyRecord) -> Result<()>;

    fn contains_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_pre_key(&mut self, id: u32) -> Result<()>;
}

/// Storage backend for signed prekeys. These are never consumed.
pub trait SignedPreKeyStore: Send + Sync {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>>;

    fn store_signed_pre_key(&mut self, id: u32, record: SignedPreKeyRecord) -> Result<()>;

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool>;

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()>;
}

/// Session records keyed by remote device.
pub trait SessionStore: Send + Sync {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>>;

    /// Device ids other than 1 holding a session under `name`.
    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>>;

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()>;

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool>;

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()>;

    fn delete_all_sessions(&mut self, name: &str) -> Result<()>;
}

/// Sender key records keyed by (group, sender).
pub trait SenderKeyStore: Send + Sync {
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()>;

    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>>;
}

/// Everything pairwise sessions need.
pub trait ProtocolStore: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore {}

impl<T> ProtocolStore for T where T: SessionStore + PreKeyStore + SignedPreKeyStore + IdentityKeyStore {}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| Error::StorageError)
}

/// Identity store that trusts a name's first identity and nothing else after.
#[derive(Clone, Debug)]
pub struct InMemoryIdentityKeyStore {
    identity_key_pair: IdentityKeyPair,
    registration_id: u32,
    trusted_keys: Arc<Mutex<HashMap<String, IdentityKey>>>,
}

impl InMemoryIdentityKeyStore {
    #[must_use]
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            identity_key_pair,
            registration_id,
            trusted_keys: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl IdentityKeyStore for InMemoryIdentityKeyStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        Ok(self.identity_key_pair.clone())
    }

    fn local_registration_id(&self) -> Result<u32> {
        Ok(self.registration_id)
    }

    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<()> {
        lock(&self.trusted_keys)?.insert(name.to_owned(), *identity);
        Ok(())
    }

    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool> {
        Ok(lock(&self.trusted_keys)?
            .get(name)
            .map_or(true, |trusted| trusted == identity))
    }

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>> {
        Ok(lock(&self.trusted_keys)?.get(name).copied())
    }
}

/// Thread-safe in-memory prekey storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryPreKeyStore {
    pre_keys: Arc<Mutex<HashMap<u32, PreKeyRecord>>>,
}

impl InMemoryPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk-inserts prekeys, replacing any with the same id.
    pub fn populate(&mut self, records: Vec<PreKeyRecord>) -> Result<()> {
        let mut store = lock(&self.pre_keys)?;
        for record in records {
            store.insert(record.id(), record);
        }
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        Ok(lock(&self.pre_keys)?.len())
    }
}

impl PreKeyStore for InMemoryPreKeyStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        Ok(lock(&self.pre_keys)?.get(&id).cloned())
    }

    fn store_pre_key(&mut self, id: u32, record: PreKeyRecord) -> Result<()> {
        lock(&self.pre_keys)?.insert(id, record);
        Ok(())
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        Ok(lock(&self.pre_keys)?.contains_key(&id))
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        lock(&self.pre_keys)?.remove(&id);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySignedPreKeyStore {
    signed_pre_keys: Arc<Mutex<HashMap<u32, SignedPreKeyRecord>>>,
}

impl InMemorySignedPreKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignedPreKeyStore for InMemorySignedPreKeyStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        Ok(lock(&self.signed_pre_keys)?.get(&id).cloned())
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        Ok(lock(&self.signed_pre_keys)?.values().cloned().collect())
    }

    fn store_signed_pre_key(&mut self, id: u32, record: SignedPreKeyRecord) -> Result<()> {
        lock(&self.signed_pre_keys)?.insert(id, record);
        Ok(())
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        Ok(lock(&self.signed_pre_keys)?.contains_key(&id))
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        lock(&self.signed_pre_keys)?.remove(&id);
        Ok(())
    }
}

/// Keeps records serialized, so every load is an independent copy.
#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<ProtocolAddress, Vec<u8>>>>,
}

impl InMemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        lock(&self.sessions)?
            .get(address)
            .map(|bytes| SessionRecord::deserialize(bytes))
            .transpose()
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        let mut devices: Vec<u32> = lock(&self.sessions)?
            .keys()
            .filter(|a| a.name() == name && a.device_id() != 1)
            .map(ProtocolAddress::device_id)
            .collect();
        devices.sort_unstable();
        Ok(devices)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        lock(&self.sessions)?.insert(address.clone(), record.serialize());
        Ok(())
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        Ok(lock(&self.sessions)?.contains_key(address))
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        lock(&self.sessions)?.remove(address);
        Ok(())
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        lock(&self.sessions)?.retain(|address, _| address.name() != name);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySenderKeyStore {
    sender_keys: Arc<Mutex<HashMap<SenderKeyName, Vec<u8>>>>,
}

impl InMemorySenderKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SenderKeyStore for InMemorySenderKeyStore {
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        lock(&self.sender_keys)?.insert(name.clone(), record.serialize());
        Ok(())
    }

    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        lock(&self.sender_keys)?
            .get(name)
            .map(|bytes| SenderKeyRecord::deserialize(bytes))
            .transpose()
    }
}

/// All in-memory stores for one local device.
#[derive(Clone, Debug)]
pub struct InMemoryProtocolStore {
    pub session_store: InMemorySessionStore,
    pub pre_key_store: InMemoryPreKeyStore,
    pub signed_pre_key_store: InMemorySignedPreKeyStore,
    pub identity_store: InMemoryIdentityKeyStore,
    pub sender_key_store: InMemorySenderKeyStore,
}

impl InMemoryProtocolStore {
    #[must_use]
    pub fn new(identity_key_pair: IdentityKeyPair, registration_id: u32) -> Self {
        Self {
            session_store: InMemorySessionStore::new(),
            pre_key_store: InMemoryPreKeyStore::new(),
            signed_pre_key_store: InMemorySignedPreKeyStore::new(),
            identity_store: InMemoryIdentityKeyStore::new(identity_key_pair, registration_id),
            sender_key_store: InMemorySenderKeyStore::new(),
        }
    }
}

impl IdentityKeyStore for InMemoryProtocolStore {
    fn identity_key_pair(&self) -> Result<IdentityKeyPair> {
        self.identity_store.identity_key_pair()
    }

    fn local_registration_id(&self) -> Result<u32> {
        self.identity_store.local_registration_id()
    }

    fn save_identity(&mut self, name: &str, identity: &IdentityKey) -> Result<()> {
        self.identity_store.save_identity(name, identity)
    }

    fn is_trusted_identity(&self, name: &str, identity: &IdentityKey) -> Result<bool> {
        self.identity_store.is_trusted_identity(name, identity)
    }

    fn identity(&self, name: &str) -> Result<Option<IdentityKey>> {
        self.identity_store.identity(name)
    }
}

impl PreKeyStore for InMemoryProtocolStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
        self.pre_key_store.load_pre_key(id)
    }

    fn store_pre_key(&mut self, id: u32, record: PreKeyRecord) -> Result<()> {
        self.pre_key_store.store_pre_key(id, record)
    }

    fn contains_pre_key(&self, id: u32) -> Result<bool> {
        self.pre_key_store.contains_pre_key(id)
    }

    fn remove_pre_key(&mut self, id: u32) -> Result<()> {
        self.pre_key_store.remove_pre_key(id)
    }
}

impl SignedPreKeyStore for InMemoryProtocolStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
        self.signed_pre_key_store.load_signed_pre_key(id)
    }

    fn load_signed_pre_keys(&self) -> Result<Vec<SignedPreKeyRecord>> {
        self.signed_pre_key_store.load_signed_pre_keys()
    }

    fn store_signed_pre_key(&mut self, id: u32, record: SignedPreKeyRecord) -> Result<()> {
        self.signed_pre_key_store.store_signed_pre_key(id, record)
    }

    fn contains_signed_pre_key(&self, id: u32) -> Result<bool> {
        self.signed_pre_key_store.contains_signed_pre_key(id)
    }

    fn remove_signed_pre_key(&mut self, id: u32) -> Result<()> {
        self.signed_pre_key_store.remove_signed_pre_key(id)
    }
}

impl SessionStore for InMemoryProtocolStore {
    fn load_session(&self, address: &ProtocolAddress) -> Result<Option<SessionRecord>> {
        self.session_store.load_session(address)
    }

    fn sub_device_sessions(&self, name: &str) -> Result<Vec<u32>> {
        self.session_store.sub_device_sessions(name)
    }

    fn store_session(&mut self, address: &ProtocolAddress, record: &SessionRecord) -> Result<()> {
        self.session_store.store_session(address, record)
    }

    fn contains_session(&self, address: &ProtocolAddress) -> Result<bool> {
        self.session_store.contains_session(address)
    }

    fn delete_session(&mut self, address: &ProtocolAddress) -> Result<()> {
        self.session_store.delete_session(address)
    }

    fn delete_all_sessions(&mut self, name: &str) -> Result<()> {
        self.session_store.delete_all_sessions(name)
    }
}

impl SenderKeyStore for InMemoryProtocolStore {
    fn store_sender_key(&mut self, name: &SenderKeyName, record: &SenderKeyRecord) -> Result<()> {
        self.sender_key_store.store_sender_key(name, record)
    }

    fn load_sender_key(&self, name: &SenderKeyName) -> Result<Option<SenderKeyRecord>> {
        self.sender_key_store.load_sender_key(name)
    }
}
