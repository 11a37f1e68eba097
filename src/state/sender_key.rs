//! Sender-key chain state for group messaging.
//!
//! Each group sender owns a one-directional hash chain plus an Ed25519
//! signing key. Receivers hold the chain and the public half only.

use std::collections::VecDeque;

use ed25519_dalek::{SigningKey, VerifyingKey};
use prost::Message;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::consts::{MAX_MESSAGE_KEYS, MAX_SENDER_KEY_STATES};
use crate::crypto::{hkdf_derive, hmac_sha256, IV_SIZE, KEY_SIZE_32};
use crate::error::{Error, Result};
use crate::proto::{sender_key_state_structure, SenderKeyRecordStructure, SenderKeyStateStructure};

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;
const GROUP_INFO: &[u8] = b"WhisperGroup";

/// Keys for one group message at `iteration`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SenderMessageKey {
    iteration: u32,
    seed: [u8; KEY_SIZE_32],
    iv: [u8; IV_SIZE],
    cipher_key: [u8; KEY_SIZE_32],
}

impl SenderMessageKey {
    #[must_use]
    pub fn new(iteration: u32, seed: [u8; KEY_SIZE_32]) -> Self {
        let mut okm = [0u8; IV_SIZE + KEY_SIZE_32];
        hkdf_derive(None, &seed, GROUP_INFO, &mut okm);
        let mut iv = [0u8; IV_SIZE];
        let mut cipher_key = [0u8; KEY_SIZE_32];
        iv.copy_from_slice(&okm[..IV_SIZE]);
        cipher_key.copy_from_slice(&okm[IV_SIZE..]);
        okm.zeroize();
        Self {
            iteration,
            seed,
            iv,
            cipher_key,
        }
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    #[must_use]
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    #[must_use]
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.cipher_key
    }
}

impl std::fmt::Debug for SenderMessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SenderMessageKey {{ iteration: {}, .. }}", self.iteration)
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SenderChainKey {
    iteration: u32,
    seed: [u8; KEY_SIZE_32],
}

impl SenderChainKey {
    #[must_use]
    pub fn new(iteration: u32, seed: [u8; KEY_SIZE_32]) -> Self {
        Self { iteration, seed }
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    #[must_use]
    pub fn seed(&self) -> &[u8; KEY_SIZE_32] {
        &self.seed
    }

    #[must_use]
    pub fn sender_message_key(&self) -> SenderMessageKey {
        SenderMessageKey::new(self.iteration, hmac_sha256(&self.seed, &[MESSAGE_KEY_SEED]))
    }

    /// # Errors
    /// `InvalidMessage` once the iteration counter is exhausted.
    pub fn next(&self) -> Result<Self> {
        let iteration = self
            .iteration
            .checked_add(1)
            .ok_or(Error::InvalidMessage("sender chain iteration overflow"))?;
        Ok(Self::new(iteration, hmac_sha256(&self.seed, &[CHAIN_KEY_SEED])))
    }
}

impl std::fmt::Debug for SenderChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SenderChainKey {{ iteration: {}, .. }}", self.iteration)
    }
}

/// One generation of a sender's group key.
#[derive(Clone)]
pub struct SenderKeyState {
    key_id: u32,
    chain_key: SenderChainKey,
    signing_public: VerifyingKey,
    signing_private: Option<SigningKey>,
    /// Skipped message keys, oldest first
    message_keys: VecDeque<SenderMessageKey>,
}

impl SenderKeyState {
    #[must_use]
    pub fn new(
        key_id: u32,
        chain_key: SenderChainKey,
        signing_public: VerifyingKey,
        signing_private: Option<SigningKey>,
    ) -> Self {
        Self {
            key_id,
            chain_key,
            signing_public,
            signing_private,
            message_keys: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    #[must_use]
    pub fn sender_chain_key(&self) -> &SenderChainKey {
        &self.chain_key
    }

    pub fn set_sender_chain_key(&mut self, chain_key: SenderChainKey) {
        self.chain_key = chain_key;
    }

    #[must_use]
    pub fn signing_key_public(&self) -> &VerifyingKey {
        &self.signing_public
    }

    #[must_use]
    pub fn signing_key_private(&self) -> Option<&SigningKey> {
        self.signing_private.as_ref()
    }

    #[must_use]
    pub fn has_sender_message_key(&self, iteration: u32) -> bool {
        self.message_keys.iter().any(|k| k.iteration() == iteration)
    }

    /// Caches a skipped key, evicting the oldest past the cap.
    pub fn add_sender_message_key(&mut self, key: SenderMessageKey) {
        self.message_keys.push_back(key);
        if self.message_keys.len() > MAX_MESSAGE_KEYS {
            self.message_keys.pop_front();
        }
    }

    pub fn remove_sender_message_key(&mut self, iteration: u32) -> Option<SenderMessageKey> {
        let position = self
            .message_keys
            .iter()
            .position(|k| k.iteration() == iteration)?;
        self.message_keys.remove(position)
    }

    fn to_structure(&self) -> SenderKeyStateStructure {
        SenderKeyStateStructure {
            sender_key_id: self.key_id,
            sender_chain_key: Some(sender_key_state_structure::SenderChainKey {
                iteration: self.chain_key.iteration(),
                seed: self.chain_key.seed().to_vec(),
            }),
            sender_signing_key: Some(sender_key_state_structure::SenderSigningKey {
                public: self.signing_public.to_bytes().to_vec(),
                private: self
                    .signing_private
                    .as_ref()
                    .map(|k| k.to_bytes().to_vec())
                    .unwrap_or_default(),
            }),
            sender_message_keys: self
                .message_keys
                .iter()
                .map(|k| sender_key_state_structure::SenderMessageKey {
                    iteration: k.iteration(),
                    seed: k.seed.to_vec(),
                })
                .collect(),
        }
    }

    fn from_structure(structure: &SenderKeyStateStructure) -> Result<Self> {
        let chain = structure
            .sender_chain_key
            .as_ref()
            .ok_or(Error::InvalidSessionState("sender key without chain key"))?;
        let signing = structure
            .sender_signing_key
            .as_ref()
            .ok_or(Error::InvalidSessionState("sender key without signing key"))?;

        let signing_public = VerifyingKey::from_bytes(&seed_array(&signing.public)?)
            .map_err(|_| Error::InvalidSessionState("bad sender signing key"))?;
        let signing_private = if signing.private.is_empty() {
            None
        } else {
            Some(SigningKey::from_bytes(&seed_array(&signing.private)?))
        };
        let message_keys = structure
            .sender_message_keys
            .iter()
            .map(|k| Ok(SenderMessageKey::new(k.iteration, seed_array(&k.seed)?)))
            .collect::<Result<VecDeque<_>>>()?;

        Ok(Self {
            key_id: structure.sender_key_id,
            chain_key: SenderChainKey::new(chain.iteration, seed_array(&chain.seed)?),
            signing_public,
            signing_private,
            message_keys,
        })
    }
}

impl std::fmt::Debug for SenderKeyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderKeyState")
            .field("key_id", &self.key_id)
            .field("chain_key", &self.chain_key)
            .field("signing_public", &self.signing_public)
            .field("skipped", &self.message_keys.len())
            .finish()
    }
}

fn seed_array(bytes: &[u8]) -> Result<[u8; KEY_SIZE_32]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvalidSessionState("bad sender key length"))
}

/// Sender key generations for one (group, sender) pair, newest first.
#[derive(Clone, Debug, Default)]
pub struct SenderKeyRecord {
    states: VecDeque<SenderKeyState>,
}

impl SenderKeyRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The newest generation.
    ///
    /// # Errors
    /// Returns `Error::NoSession` when the record holds no state.
    pub fn sender_key_state(&self) -> Result<&SenderKeyState> {
        self.states.front().ok_or(Error::NoSession)
    }

    pub fn sender_key_state_mut(&mut self) -> Result<&mut SenderKeyState> {
        self.states.front_mut().ok_or(Error::NoSession)
    }

    pub fn sender_key_state_by_id(&mut self, key_id: u32) -> Option<&mut SenderKeyState> {
        self.states.iter_mut().find(|s| s.key_id() == key_id)
    }

    /// Adds a received generation, evicting the oldest past the cap.
    pub fn add_sender_key_state(
        &mut self,
        key_id: u32,
        iteration: u32,
        chain_key: [u8; KEY_SIZE_32],
        signing_public: VerifyingKey,
    ) {
        self.states.push_front(SenderKeyState::new(
            key_id,
            SenderChainKey::new(iteration, chain_key),
            signing_public,
            None,
        ));
        self.states.truncate(MAX_SENDER_KEY_STATES);
    }

    /// Replaces every generation with our own sending state.
    pub fn set_sender_key_state(
        &mut self,
        key_id: u32,
        iteration: u32,
        chain_key: [u8; KEY_SIZE_32],
        signing_key: SigningKey,
    ) {
        self.states.clear();
        self.states.push_front(SenderKeyState::new(
            key_id,
            SenderChainKey::new(iteration, chain_key),
            signing_key.verifying_key(),
            Some(signing_key),
        ));
    }

    pub fn serialize(&self) -> Vec<u8> {
        SenderKeyRecordStructure {
            sender_key_states: self.states.iter().map(SenderKeyState::to_structure).collect(),
        }
        .encode_to_vec()
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let structure = SenderKeyRecordStructure::decode(bytes)
            .map_err(|_| Error::InvalidSessionState("malformed sender key record"))?;
        let states = structure
            .sender_key_states
            .iter()
            .map(SenderKeyState::from_structure)
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Self { states })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_chain_advances() {
        let chain = SenderChainKey::new(0, [1u8; 32]);
        let next = chain.next().unwrap();
        assert_eq!(next.iteration(), 1);
        assert_ne!(next.seed(), chain.seed());

        let first = chain.sender_message_key();
        let second = next.sender_message_key();
        assert_eq!(first.iteration(), 0);
        assert_ne!(first.cipher_key(), second.cipher_key());
    }

    #[test]
    fn test_chain_stops_at_last_iteration() {
        let chain = SenderChainKey::new(u32::MAX, [1u8; 32]);
        assert_eq!(chain.sender_message_key().iteration(), u32::MAX);
        assert!(matches!(chain.next(), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_record_keeps_newest_states() {
        let mut record = SenderKeyRecord::new();
        assert_eq!(record.sender_key_state().unwrap_err(), Error::NoSession);

        for id in 0..(MAX_SENDER_KEY_STATES as u32 + 2) {
            let signing = SigningKey::generate(&mut OsRng);
            record.add_sender_key_state(id, 0, [id as u8; 32], signing.verifying_key());
        }

        assert_eq!(record.sender_key_state().unwrap().key_id(), MAX_SENDER_KEY_STATES as u32 + 1);
        assert!(record.sender_key_state_by_id(0).is_none());
        assert!(record.sender_key_state_by_id(2).is_some());
    }

    #[test]
    fn test_record_serialize_round_trip() {
        let mut record = SenderKeyRecord::new();
        record.set_sender_key_state(9, 4, [3u8; 32], SigningKey::generate(&mut OsRng));
        let state = record.sender_key_state_mut().unwrap();
        state.add_sender_message_key(SenderChainKey::new(2, [4u8; 32]).sender_message_key());

        let restored = SenderKeyRecord::deserialize(&record.serialize()).unwrap();
        let state = restored.sender_key_state().unwrap();
        assert_eq!(state.key_id(), 9);
        assert_eq!(state.sender_chain_key().iteration(), 4);
        assert!(state.signing_key_private().is_some());
        assert!(state.has_sender_message_key(2));
    }
}
