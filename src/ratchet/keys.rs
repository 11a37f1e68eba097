//! Root, chain and message keys of the symmetric ratchet.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{hkdf_derive, hmac_sha256, IV_SIZE, KEY_SIZE_32, KEY_SIZE_64};
use crate::error::{Error, Result};
use crate::keys::{KeyPair, PublicKey};

const MESSAGE_KEY_SEED: u8 = 0x01;
const CHAIN_KEY_SEED: u8 = 0x02;

const RATCHET_INFO: &[u8] = b"WhisperRatchet";
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

/// Keys protecting exactly one message.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    cipher_key: [u8; KEY_SIZE_32],
    mac_key: [u8; KEY_SIZE_32],
    iv: [u8; IV_SIZE],
    counter: u32,
}

impl MessageKeys {
    /// Expands a message key seed into cipher key, MAC key and IV.
    #[must_use]
    pub fn derive(seed: &[u8; KEY_SIZE_32], counter: u32) -> Self {
        let mut okm = [0u8; KEY_SIZE_32 * 2 + IV_SIZE];
        hkdf_derive(None, seed, MESSAGE_KEYS_INFO, &mut okm);
        let keys = Self::from_parts(&okm, counter);
        okm.zeroize();
        keys
    }

    pub(crate) fn from_parts(material: &[u8; KEY_SIZE_32 * 2 + IV_SIZE], counter: u32) -> Self {
        let mut cipher_key = [0u8; KEY_SIZE_32];
        let mut mac_key = [0u8; KEY_SIZE_32];
        let mut iv = [0u8; IV_SIZE];
        cipher_key.copy_from_slice(&material[..32]);
        mac_key.copy_from_slice(&material[32..64]);
        iv.copy_from_slice(&material[64..]);
        Self {
            cipher_key,
            mac_key,
            iv,
            counter,
        }
    }

    #[must_use]
    pub fn cipher_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.cipher_key
    }

    #[must_use]
    pub fn mac_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.mac_key
    }

    #[must_use]
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

impl std::fmt::Debug for MessageKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageKeys {{ counter: {}, .. }}", self.counter)
    }
}

/// Symmetric chain key `(key, index)`.
///
/// Stepping is one-way: `next = HMAC(key, 0x02)`, so holding a chain key
/// reveals nothing about message keys below its index.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey {
    key: [u8; KEY_SIZE_32],
    index: u32,
}

impl ChainKey {
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE_32], index: u32) -> Self {
        Self { key, index }
    }

    #[must_use]
    pub fn key(&self) -> &[u8; KEY_SIZE_32] {
        &self.key
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The chain key one step further along.
    ///
    /// # Errors
    /// `InvalidMessage` once the index is exhausted.
    pub fn next_chain_key(&self) -> Result<Self> {
        let index = self
            .index
            .checked_add(1)
            .ok_or(Error::InvalidMessage("chain index overflow"))?;
        Ok(Self {
            key: hmac_sha256(&self.key, &[CHAIN_KEY_SEED]),
            index,
        })
    }

    /// Message keys for this chain position.
    #[must_use]
    pub fn message_keys(&self) -> MessageKeys {
        let mut seed = hmac_sha256(&self.key, &[MESSAGE_KEY_SEED]);
        let keys = MessageKeys::derive(&seed, self.index);
        seed.zeroize();
        keys
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChainKey {{ index: {}, key: [REDACTED] }}", self.index)
    }
}

/// Root of the asymmetric ratchet.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    key: [u8; KEY_SIZE_32],
}

impl RootKey {
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE_32]) -> Self {
        Self { key }
    }

    #[must_use]
    pub fn key(&self) -> &[u8; KEY_SIZE_32] {
        &self.key
    }

    /// One DH ratchet step.
    ///
    /// Computes `(RK', CK) = HKDF(salt = RK, ikm = DH(ours, theirs))`; the new
    /// chain key starts at index 0.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` when the agreement is non-contributory.
    pub fn create_chain(
        &self,
        their_ratchet_key: &PublicKey,
        our_ratchet_key: &KeyPair,
    ) -> Result<(RootKey, ChainKey)> {
        let shared = our_ratchet_key.calculate_agreement(their_ratchet_key)?;
        let mut okm = [0u8; KEY_SIZE_64];
        hkdf_derive(Some(&self.key), shared.as_bytes(), RATCHET_INFO, &mut okm);
        let derived = split_root_and_chain(&okm);
        okm.zeroize();
        Ok(derived)
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RootKey([REDACTED])")
    }
}

/// Splits 64 bytes of KDF output into a root key and a fresh chain key.
pub(crate) fn split_root_and_chain(okm: &[u8; KEY_SIZE_64]) -> (RootKey, ChainKey) {
    let mut root = [0u8; KEY_SIZE_32];
    let mut chain = [0u8; KEY_SIZE_32];
    root.copy_from_slice(&okm[..KEY_SIZE_32]);
    chain.copy_from_slice(&okm[KEY_SIZE_32..]);
    (RootKey::new(root), ChainKey::new(chain, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;
    use std::collections::HashSet;

    #[test]
    fn test_chain_key_steps() {
        let chain = ChainKey::new([42u8; 32], 0);
        let next = chain.next_chain_key().unwrap();

        assert_eq!(next.index(), 1);
        assert_ne!(next.key(), chain.key());
        assert_eq!(next.key(), &hmac_sha256(&[42u8; 32], &[0x02]));
    }

    #[test]
    fn test_chain_never_repeats_keys() {
        let mut chain = ChainKey::new([9u8; 32], 0);
        let mut chain_keys = HashSet::new();
        let mut cipher_keys = HashSet::new();
        for _ in 0..500 {
            assert!(chain_keys.insert(*chain.key()));
            assert!(cipher_keys.insert(*chain.message_keys().cipher_key()));
            chain = chain.next_chain_key().unwrap();
        }

        // Going forward only ever yields keys for the new index
        let keys = chain.message_keys();
        assert_eq!(keys.counter(), 500);
        assert!(!cipher_keys.contains(keys.cipher_key()));
        assert!(!chain_keys.contains(chain.key()));
    }

    #[test]
    fn test_chain_index_exhausted() {
        let chain = ChainKey::new([9u8; 32], u32::MAX);
        assert_eq!(chain.message_keys().counter(), u32::MAX);
        assert!(matches!(chain.next_chain_key(), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_message_keys_per_index() {
        let chain = ChainKey::new([7u8; 32], 0);
        let first = chain.message_keys();
        let second = chain.next_chain_key().unwrap().message_keys();

        assert_eq!(first.counter(), 0);
        assert_eq!(second.counter(), 1);
        assert_ne!(first.cipher_key(), second.cipher_key());
        assert_ne!(first.mac_key(), first.cipher_key());
        assert_eq!(chain.message_keys().iv(), first.iv());
    }

    #[test]
    fn test_create_chain_agrees() {
        let root = RootKey::new([3u8; 32]);
        let alice = KeyPair::generate(&mut OsRng);
        let bob = KeyPair::generate(&mut OsRng);

        let (alice_root, alice_chain) = root.create_chain(&bob.public_key, &alice).unwrap();
        let (bob_root, bob_chain) = root.create_chain(&alice.public_key, &bob).unwrap();

        assert_eq!(alice_root.key(), bob_root.key());
        assert_eq!(alice_chain.key(), bob_chain.key());
        assert_eq!(alice_chain.index(), 0);
        assert_ne!(alice_root.key(), root.key());
    }
}
