//! Per-peer-device ratchet state.

use std::collections::VecDeque;

use crate::consts::{CIPHERTEXT_MESSAGE_CURRENT_VERSION, MAX_MESSAGE_KEYS, MAX_RECEIVER_CHAINS};
use crate::crypto::{IV_SIZE, KEY_SIZE_32};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey, SecretKey};
use crate::proto::{session_structure, SessionStructure};
use crate::ratchet::{ChainKey, MessageKeys, RootKey};

#[derive(Clone, Debug)]
struct SenderChain {
    ratchet_key: KeyPair,
    chain_key: ChainKey,
}

#[derive(Clone, Debug)]
struct ReceiverChain {
    sender_ratchet_key: PublicKey,
    chain_key: ChainKey,
    /// Keys for skipped counters, oldest first
    message_keys: VecDeque<MessageKeys>,
}

/// Outbound prekey message bookkeeping, kept until the peer first replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: PublicKey,
}

/// Our half of a legacy key exchange that has not been answered yet.
#[derive(Clone, Debug)]
pub struct PendingKeyExchange {
    pub sequence: u32,
    pub base_key: KeyPair,
    pub ratchet_key: KeyPair,
    pub identity_key: IdentityKeyPair,
}

/// Mutable ratchet state for one remote device.
///
/// A state is empty until a ratcheting session initializes it. Mutation goes
/// through `&mut self`, so the owner of the enclosing record is the single
/// writer for the session.
#[derive(Clone, Debug)]
pub struct SessionState {
    version: u8,
    local_identity: Option<IdentityKey>,
    remote_identity: Option<IdentityKey>,
    root_key: Option<RootKey>,
    previous_counter: u32,
    sender_chain: Option<SenderChain>,
    /// Oldest first
    receiver_chains: VecDeque<ReceiverChain>,
    pending_key_exchange: Option<PendingKeyExchange>,
    pending_pre_key: Option<PendingPreKey>,
    remote_registration_id: u32,
    local_registration_id: u32,
    needs_refresh: bool,
    alice_base_key: Option<PublicKey>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// An empty, uninitialized state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            local_identity: None,
            remote_identity: None,
            root_key: None,
            previous_counter: 0,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_key_exchange: None,
            pending_pre_key: None,
            remote_registration_id: 0,
            local_registration_id: 0,
            needs_refresh: false,
            alice_base_key: None,
        }
    }

    #[must_use]
    pub fn session_version(&self) -> u8 {
        self.version
    }

    pub fn set_session_version(&mut self, version: u8) {
        self.version = version;
    }

    #[must_use]
    pub fn local_identity_key(&self) -> Option<&IdentityKey> {
        self.local_identity.as_ref()
    }

    pub fn set_local_identity_key(&mut self, identity: IdentityKey) {
        self.local_identity = Some(identity);
    }

    #[must_use]
    pub fn remote_identity_key(&self) -> Option<&IdentityKey> {
        self.remote_identity.as_ref()
    }

    pub fn set_remote_identity_key(&mut self, identity: IdentityKey) {
        self.remote_identity = Some(identity);
    }

    #[must_use]
    pub fn root_key(&self) -> Option<&RootKey> {
        self.root_key.as_ref()
    }

    pub fn set_root_key(&mut self, root_key: RootKey) {
        self.root_key = Some(root_key);
    }

    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    pub fn set_previous_counter(&mut self, previous_counter: u32) {
        self.previous_counter = previous_counter;
    }

    #[must_use]
    pub fn has_sender_chain(&self) -> bool {
        self.sender_chain.is_some()
    }

    #[must_use]
    pub fn sender_ratchet_key(&self) -> Option<&PublicKey> {
        self.sender_chain.as_ref().map(|c| &c.ratchet_key.public_key)
    }

    #[must_use]
    pub fn sender_ratchet_key_pair(&self) -> Option<&KeyPair> {
        self.sender_chain.as_ref().map(|c| &c.ratchet_key)
    }

    #[must_use]
    pub fn sender_chain_key(&self) -> Option<&ChainKey> {
        self.sender_chain.as_ref().map(|c| &c.chain_key)
    }

    /// Installs a new sending chain, replacing any previous one.
    pub fn set_sender_chain(&mut self, ratchet_key: KeyPair, chain_key: ChainKey) {
        self.sender_chain = Some(SenderChain {
            ratchet_key,
            chain_key,
        });
    }

    /// Advances the existing sending chain.
    ///
    /// # Panics
    /// Panics if the state has no sending chain.
    pub fn set_sender_chain_key(&mut self, chain_key: ChainKey) {
        let chain = self
            .sender_chain
            .as_mut()
            .expect("sender chain key set on a state without a sender chain");
        chain.chain_key = chain_key;
    }

    fn receiver_chain(&self, sender_ratchet_key: &PublicKey) -> Option<&ReceiverChain> {
        self.receiver_chains
            .iter()
            .find(|c| &c.sender_ratchet_key == sender_ratchet_key)
    }

    fn receiver_chain_mut(&mut self, sender_ratchet_key: &PublicKey) -> Option<&mut ReceiverChain> {
        self.receiver_chains
            .iter_mut()
            .find(|c| &c.sender_ratchet_key == sender_ratchet_key)
    }

    #[must_use]
    pub fn has_receiver_chain(&self, sender_ratchet_key: &PublicKey) -> bool {
        self.receiver_chain(sender_ratchet_key).is_some()
    }

    #[must_use]
    pub fn receiver_chain_key(&self, sender_ratchet_key: &PublicKey) -> Option<&ChainKey> {
        self.receiver_chain(sender_ratchet_key).map(|c| &c.chain_key)
    }

    #[must_use]
    pub fn receiver_chain_count(&self) -> usize {
        self.receiver_chains.len()
    }

    /// Adds a receiving chain, evicting the oldest past the cap.
    pub fn add_receiver_chain(&mut self, sender_ratchet_key: PublicKey, chain_key: ChainKey) {
        self.receiver_chains.push_back(ReceiverChain {
            sender_ratchet_key,
            chain_key,
            message_keys: VecDeque::new(),
        });
        while self.receiver_chains.len() > MAX_RECEIVER_CHAINS {
            if let Some(evicted) = self.receiver_chains.pop_front() {
                tracing::info!(
                    ratchet_key = ?evicted.sender_ratchet_key,
                    "trimming oldest receiver chain"
                );
            }
        }
    }

    /// Advances an existing receiving chain.
    ///
    /// # Panics
    /// Panics if no chain exists for `sender_ratchet_key`.
    pub fn set_receiver_chain_key(&mut self, sender_ratchet_key: &PublicKey, chain_key: ChainKey) {
        let chain = self
            .receiver_chain_mut(sender_ratchet_key)
            .expect("receiver chain key set for an unknown ratchet key");
        chain.chain_key = chain_key;
    }

    #[must_use]
    pub fn has_message_keys(&self, sender_ratchet_key: &PublicKey, counter: u32) -> bool {
        self.receiver_chain(sender_ratchet_key)
            .is_some_and(|c| c.message_keys.iter().any(|k| k.counter() == counter))
    }

    /// Removes and returns the cached keys for a skipped counter.
    pub fn remove_message_keys(
        &mut self,
        sender_ratchet_key: &PublicKey,
        counter: u32,
    ) -> Option<MessageKeys> {
        let chain = self.receiver_chain_mut(sender_ratchet_key)?;
        let position = chain.message_keys.iter().position(|k| k.counter() == counter)?;
        chain.message_keys.remove(position)
    }

    /// Caches keys for a skipped counter, evicting the oldest past the cap.
    ///
    /// # Panics
    /// Panics if no chain exists for `sender_ratchet_key`.
    pub fn set_message_keys(&mut self, sender_ratchet_key: &PublicKey, message_keys: MessageKeys) {
        let chain = self
            .receiver_chain_mut(sender_ratchet_key)
            .expect("message keys cached for an unknown ratchet key");
        chain.message_keys.push_back(message_keys);
        if chain.message_keys.len() > MAX_MESSAGE_KEYS {
            chain.message_keys.pop_front();
            tracing::debug!("dropping oldest skipped message key");
        }
    }

    #[must_use]
    pub fn skipped_message_key_count(&self, sender_ratchet_key: &PublicKey) -> usize {
        self.receiver_chain(sender_ratchet_key)
            .map_or(0, |c| c.message_keys.len())
    }

    #[must_use]
    pub fn pending_key_exchange(&self) -> Option<&PendingKeyExchange> {
        self.pending_key_exchange.as_ref()
    }

    #[must_use]
    pub fn has_pending_key_exchange(&self) -> bool {
        self.pending_key_exchange.is_some()
    }

    pub fn set_pending_key_exchange(&mut self, pending: PendingKeyExchange) {
        self.pending_key_exchange = Some(pending);
    }

    pub fn clear_pending_key_exchange(&mut self) {
        self.pending_key_exchange = None;
    }

    pub fn set_unacknowledged_pre_key_message(
        &mut self,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
    ) {
        self.pending_pre_key = Some(PendingPreKey {
            pre_key_id,
            signed_pre_key_id,
            base_key,
        });
    }

    #[must_use]
    pub fn has_unacknowledged_pre_key_message(&self) -> bool {
        self.pending_pre_key.is_some()
    }

    #[must_use]
    pub fn unacknowledged_pre_key_message_items(&self) -> Option<&PendingPreKey> {
        self.pending_pre_key.as_ref()
    }

    pub fn clear_unacknowledged_pre_key_message(&mut self) {
        self.pending_pre_key = None;
    }

    #[must_use]
    pub fn remote_registration_id(&self) -> u32 {
        self.remote_registration_id
    }

    pub fn set_remote_registration_id(&mut self, id: u32) {
        self.remote_registration_id = id;
    }

    #[must_use]
    pub fn local_registration_id(&self) -> u32 {
        self.local_registration_id
    }

    pub fn set_local_registration_id(&mut self, id: u32) {
        self.local_registration_id = id;
    }

    /// Set on the side that lost a simultaneous initiate; the application
    /// should send a message soon so both sides settle on one session.
    #[must_use]
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    pub fn set_needs_refresh(&mut self, needs_refresh: bool) {
        self.needs_refresh = needs_refresh;
    }

    /// Base key of the initiating side; identifies the session on both ends.
    #[must_use]
    pub fn alice_base_key(&self) -> Option<&PublicKey> {
        self.alice_base_key.as_ref()
    }

    pub fn set_alice_base_key(&mut self, base_key: PublicKey) {
        self.alice_base_key = Some(base_key);
    }

    pub(crate) fn to_structure(&self) -> SessionStructure {
        SessionStructure {
            session_version: u32::from(self.version),
            local_identity_public: encode_optional(self.local_identity.map(|k| *k.public_key())),
            remote_identity_public: encode_optional(self.remote_identity.map(|k| *k.public_key())),
            root_key: self
                .root_key
                .as_ref()
                .map(|k| k.key().to_vec())
                .unwrap_or_default(),
            previous_counter: self.previous_counter,
            sender_chain: self.sender_chain.as_ref().map(|chain| session_structure::Chain {
                sender_ratchet_key: chain.ratchet_key.public_key.serialize().to_vec(),
                sender_ratchet_key_private: chain.ratchet_key.secret_key.as_bytes().to_vec(),
                chain_key: Some(chain_key_structure(&chain.chain_key)),
                message_keys: Vec::new(),
            }),
            receiver_chains: self
                .receiver_chains
                .iter()
                .map(|chain| session_structure::Chain {
                    sender_ratchet_key: chain.sender_ratchet_key.serialize().to_vec(),
                    sender_ratchet_key_private: Vec::new(),
                    chain_key: Some(chain_key_structure(&chain.chain_key)),
                    message_keys: chain
                        .message_keys
                        .iter()
                        .map(|k| session_structure::chain::MessageKey {
                            index: k.counter(),
                            cipher_key: k.cipher_key().to_vec(),
                            mac_key: k.mac_key().to_vec(),
                            iv: k.iv().to_vec(),
                        })
                        .collect(),
                })
                .collect(),
            pending_key_exchange: self.pending_key_exchange.as_ref().map(|p| {
                session_structure::PendingKeyExchange {
                    sequence: p.sequence,
                    local_base_key: p.base_key.public_key.serialize().to_vec(),
                    local_base_key_private: p.base_key.secret_key.as_bytes().to_vec(),
                    local_ratchet_key: p.ratchet_key.public_key.serialize().to_vec(),
                    local_ratchet_key_private: p.ratchet_key.secret_key.as_bytes().to_vec(),
                    local_identity_key: p.identity_key.identity_key().serialize().to_vec(),
                    local_identity_key_private: p.identity_key.secret_key().as_bytes().to_vec(),
                }
            }),
            pending_pre_key: self.pending_pre_key.map(|p| session_structure::PendingPreKey {
                pre_key_id: p.pre_key_id,
                base_key: p.base_key.serialize().to_vec(),
                signed_pre_key_id: p.signed_pre_key_id,
            }),
            remote_registration_id: self.remote_registration_id,
            local_registration_id: self.local_registration_id,
            needs_refresh: self.needs_refresh,
            alice_base_key: encode_optional(self.alice_base_key),
        }
    }

    pub(crate) fn from_structure(structure: &SessionStructure) -> Result<Self> {
        let version = u8::try_from(structure.session_version)
            .map_err(|_| Error::InvalidSessionState("session version out of range"))?;

        let sender_chain = structure
            .sender_chain
            .as_ref()
            .map(|chain| -> Result<SenderChain> {
                let public_key = decode_key(&chain.sender_ratchet_key)?;
                let secret_key = decode_secret(&chain.sender_ratchet_key_private)?;
                Ok(SenderChain {
                    ratchet_key: KeyPair {
                        public_key,
                        secret_key,
                    },
                    chain_key: decode_chain_key(chain.chain_key.as_ref())?,
                })
            })
            .transpose()?;

        let receiver_chains = structure
            .receiver_chains
            .iter()
            .map(|chain| -> Result<ReceiverChain> {
                let message_keys = chain
                    .message_keys
                    .iter()
                    .map(decode_message_keys)
                    .collect::<Result<VecDeque<_>>>()?;
                Ok(ReceiverChain {
                    sender_ratchet_key: decode_key(&chain.sender_ratchet_key)?,
                    chain_key: decode_chain_key(chain.chain_key.as_ref())?,
                    message_keys,
                })
            })
            .collect::<Result<VecDeque<_>>>()?;

        let pending_key_exchange = structure
            .pending_key_exchange
            .as_ref()
            .map(|p| -> Result<PendingKeyExchange> {
                Ok(PendingKeyExchange {
                    sequence: p.sequence,
                    base_key: KeyPair {
                        public_key: decode_key(&p.local_base_key)?,
                        secret_key: decode_secret(&p.local_base_key_private)?,
                    },
                    ratchet_key: KeyPair {
                        public_key: decode_key(&p.local_ratchet_key)?,
                        secret_key: decode_secret(&p.local_ratchet_key_private)?,
                    },
                    identity_key: IdentityKeyPair::from_secret(decode_secret(
                        &p.local_identity_key_private,
                    )?),
                })
            })
            .transpose()?;

        let pending_pre_key = structure
            .pending_pre_key
            .as_ref()
            .map(|p| -> Result<PendingPreKey> {
                Ok(PendingPreKey {
                    pre_key_id: p.pre_key_id,
                    signed_pre_key_id: p.signed_pre_key_id,
                    base_key: decode_key(&p.base_key)?,
                })
            })
            .transpose()?;

        let root_key = match structure.root_key.len() {
            0 => None,
            KEY_SIZE_32 => Some(RootKey::new(to_array(&structure.root_key)?)),
            _ => return Err(Error::InvalidSessionState("bad root key length")),
        };
        if sender_chain.is_some() && root_key.is_none() {
            return Err(Error::InvalidSessionState("sender chain without root key"));
        }

        Ok(Self {
            version,
            local_identity: decode_optional(&structure.local_identity_public)?.map(IdentityKey::new),
            remote_identity: decode_optional(&structure.remote_identity_public)?.map(IdentityKey::new),
            root_key,
            previous_counter: structure.previous_counter,
            sender_chain,
            receiver_chains,
            pending_key_exchange,
            pending_pre_key,
            remote_registration_id: structure.remote_registration_id,
            local_registration_id: structure.local_registration_id,
            needs_refresh: structure.needs_refresh,
            alice_base_key: decode_optional(&structure.alice_base_key)?,
        })
    }
}

fn chain_key_structure(chain_key: &ChainKey) -> session_structure::chain::ChainKey {
    session_structure::chain::ChainKey {
        index: chain_key.index(),
        key: chain_key.key().to_vec(),
    }
}

fn encode_optional(key: Option<PublicKey>) -> Vec<u8> {
    key.map(|k| k.serialize().to_vec()).unwrap_or_default()
}

fn decode_optional(bytes: &[u8]) -> Result<Option<PublicKey>> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        decode_key(bytes).map(Some)
    }
}

fn decode_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::decode_point(bytes).map_err(|_| Error::InvalidSessionState("bad public key"))
}

fn decode_secret(bytes: &[u8]) -> Result<SecretKey> {
    to_array(bytes).map(SecretKey::from_bytes)
}

fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidSessionState("bad key length"))
}

fn decode_chain_key(structure: Option<&session_structure::chain::ChainKey>) -> Result<ChainKey> {
    let structure = structure.ok_or(Error::InvalidSessionState("chain without chain key"))?;
    Ok(ChainKey::new(to_array(&structure.key)?, structure.index))
}

fn decode_message_keys(structure: &session_structure::chain::MessageKey) -> Result<MessageKeys> {
    let mut material = [0u8; KEY_SIZE_32 * 2 + IV_SIZE];
    material[..32].copy_from_slice(&to_array::<KEY_SIZE_32>(&structure.cipher_key)?);
    material[32..64].copy_from_slice(&to_array::<KEY_SIZE_32>(&structure.mac_key)?);
    material[64..].copy_from_slice(&to_array::<IV_SIZE>(&structure.iv)?);
    Ok(MessageKeys::from_parts(&material, structure.index))
}
