//! One-shot session initialization (X3DH) and the ratchet key schedule.
//!
//! Both sides concatenate a 32-byte `0xFF` discontinuity block with three or
//! four Diffie-Hellman outputs and expand the result with HKDF into a root key
//! and a first chain key. Alice then takes one DH ratchet step against Bob's
//! ratchet key so that she can send immediately.

mod keys;

pub use keys::{ChainKey, MessageKeys, RootKey};

use std::cmp::Ordering;

use rand_core::CryptoRngCore;
use zeroize::Zeroize;

use crate::consts::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::crypto::{hkdf_derive, KEY_SIZE_32, KEY_SIZE_64};
use crate::error::Result;
use crate::keys::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey};
use crate::state::SessionState;

const TEXT_INFO: &[u8] = b"WhisperText";
const DISCONTINUITY: [u8; KEY_SIZE_32] = [0xFF; KEY_SIZE_32];

/// Inputs for the initiating side.
#[derive(Clone, Debug)]
pub struct AliceParameters {
    pub our_identity_key: IdentityKeyPair,
    pub our_base_key: KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_signed_pre_key: PublicKey,
    pub their_one_time_pre_key: Option<PublicKey>,
    pub their_ratchet_key: PublicKey,
}

/// Inputs for the responding side.
#[derive(Clone, Debug)]
pub struct BobParameters {
    pub our_identity_key: IdentityKeyPair,
    pub our_signed_pre_key: KeyPair,
    pub our_one_time_pre_key: Option<KeyPair>,
    pub our_ratchet_key: KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_base_key: PublicKey,
}

/// Inputs for a legacy key exchange, where roles are decided by key order.
#[derive(Clone, Debug)]
pub struct SymmetricParameters {
    pub our_identity_key: IdentityKeyPair,
    pub our_base_key: KeyPair,
    pub our_ratchet_key: KeyPair,
    pub their_identity_key: IdentityKey,
    pub their_base_key: PublicKey,
    pub their_ratchet_key: PublicKey,
}

/// Decides the Alice role between two base keys.
///
/// The raw keys are compared as signed big-endian integers; the smaller one
/// plays Alice. Both sides reach opposite answers for the same pair.
#[must_use]
pub fn is_alice(ours: &PublicKey, theirs: &PublicKey) -> bool {
    compare_signed(ours.as_bytes(), theirs.as_bytes()) == Ordering::Less
}

#[allow(clippy::cast_possible_wrap)]
fn compare_signed(a: &[u8; KEY_SIZE_32], b: &[u8; KEY_SIZE_32]) -> Ordering {
    // Equal-width two's complement: sign byte compares signed, the rest unsigned.
    let head = (a[0] as i8).cmp(&(b[0] as i8));
    head.then_with(|| a[1..].cmp(&b[1..]))
}

fn derive_keys(secret: &[u8]) -> (RootKey, ChainKey) {
    let mut okm = [0u8; KEY_SIZE_64];
    hkdf_derive(None, secret, TEXT_INFO, &mut okm);
    let derived = keys::split_root_and_chain(&okm);
    okm.zeroize();
    derived
}

struct MasterSecret(Vec<u8>);

impl MasterSecret {
    fn new() -> Self {
        let mut buffer = Vec::with_capacity(KEY_SIZE_32 * 5);
        buffer.extend_from_slice(&DISCONTINUITY);
        Self(buffer)
    }

    fn push(&mut self, our_key: &KeyPair, their_key: &PublicKey) -> Result<()> {
        let shared = our_key.calculate_agreement(their_key)?;
        self.0.extend_from_slice(shared.as_bytes());
        Ok(())
    }
}

impl Drop for MasterSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Initializes `state` as the initiator.
///
/// # Errors
/// Returns `Error::InvalidKey` if any agreement is non-contributory.
pub fn initialize_alice_session<R: CryptoRngCore>(
    state: &mut SessionState,
    parameters: &AliceParameters,
    rng: &mut R,
) -> Result<()> {
    let our_identity = parameters.our_identity_key.to_key_pair();
    let sending_ratchet_key = KeyPair::generate(rng);

    let mut secret = MasterSecret::new();
    secret.push(&our_identity, &parameters.their_signed_pre_key)?;
    secret.push(&parameters.our_base_key, parameters.their_identity_key.public_key())?;
    secret.push(&parameters.our_base_key, &parameters.their_signed_pre_key)?;
    if let Some(one_time) = &parameters.their_one_time_pre_key {
        secret.push(&parameters.our_base_key, one_time)?;
    }

    let (root_key, chain_key) = derive_keys(&secret.0);
    let (sending_root, sending_chain) =
        root_key.create_chain(&parameters.their_ratchet_key, &sending_ratchet_key)?;

    state.set_session_version(CIPHERTEXT_MESSAGE_CURRENT_VERSION);
    state.set_remote_identity_key(parameters.their_identity_key);
    state.set_local_identity_key(*parameters.our_identity_key.identity_key());
    state.add_receiver_chain(parameters.their_ratchet_key, chain_key);
    state.set_sender_chain(sending_ratchet_key, sending_chain);
    state.set_root_key(sending_root);
    Ok(())
}

/// Initializes `state` as the responder.
///
/// # Errors
/// Returns `Error::InvalidKey` if any agreement is non-contributory.
pub fn initialize_bob_session(state: &mut SessionState, parameters: &BobParameters) -> Result<()> {
    let our_identity = parameters.our_identity_key.to_key_pair();

    let mut secret = MasterSecret::new();
    secret.push(&parameters.our_signed_pre_key, parameters.their_identity_key.public_key())?;
    secret.push(&our_identity, &parameters.their_base_key)?;
    secret.push(&parameters.our_signed_pre_key, &parameters.their_base_key)?;
    if let Some(one_time) = &parameters.our_one_time_pre_key {
        secret.push(one_time, &parameters.their_base_key)?;
    }

    let (root_key, chain_key) = derive_keys(&secret.0);

    state.set_session_version(CIPHERTEXT_MESSAGE_CURRENT_VERSION);
    state.set_remote_identity_key(parameters.their_identity_key);
    state.set_local_identity_key(*parameters.our_identity_key.identity_key());
    state.set_sender_chain(parameters.our_ratchet_key.clone(), chain_key);
    state.set_root_key(root_key);
    Ok(())
}

/// Initializes `state` from a legacy key exchange, taking whichever role the
/// base key order assigns.
pub fn initialize_symmetric_session<R: CryptoRngCore>(
    state: &mut SessionState,
    parameters: &SymmetricParameters,
    rng: &mut R,
) -> Result<()> {
    if is_alice(&parameters.our_base_key.public_key, &parameters.their_base_key) {
        let alice = AliceParameters {
            our_identity_key: parameters.our_identity_key.clone(),
            our_base_key: parameters.our_base_key.clone(),
            their_identity_key: parameters.their_identity_key,
            their_signed_pre_key: parameters.their_base_key,
            their_one_time_pre_key: None,
            their_ratchet_key: parameters.their_ratchet_key,
        };
        initialize_alice_session(state, &alice, rng)
    } else {
        let bob = BobParameters {
            our_identity_key: parameters.our_identity_key.clone(),
            our_signed_pre_key: parameters.our_base_key.clone(),
            our_one_time_pre_key: None,
            our_ratchet_key: parameters.our_ratchet_key.clone(),
            their_identity_key: parameters.their_identity_key,
            their_base_key: parameters.their_base_key,
        };
        initialize_bob_session(state, &bob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn key_with_prefix(first: u8, second: u8) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[0] = first;
        bytes[1] = second;
        PublicKey::from_bytes(bytes)
    }

    #[test]
    fn test_is_alice_signed_order() {
        // 0x80 is negative as a signed leading byte
        assert!(is_alice(&key_with_prefix(0x80, 0), &key_with_prefix(0x7F, 0)));
        assert!(!is_alice(&key_with_prefix(0x7F, 0), &key_with_prefix(0x80, 0)));
        assert!(is_alice(&key_with_prefix(0x01, 0x10), &key_with_prefix(0x01, 0xF0)));
        assert!(is_alice(&key_with_prefix(0xFF, 0x10), &key_with_prefix(0x00, 0x00)));
        let same = key_with_prefix(3, 3);
        assert!(!is_alice(&same, &same));
    }

    #[test]
    fn test_is_alice_antisymmetric() {
        for _ in 0..64 {
            let a = KeyPair::generate(&mut OsRng).public_key;
            let b = KeyPair::generate(&mut OsRng).public_key;
            assert_ne!(is_alice(&a, &b), is_alice(&b, &a));
        }
    }

    fn alice_and_bob(with_one_time: bool) -> (SessionState, SessionState) {
        let alice_identity = IdentityKeyPair::generate(&mut OsRng);
        let bob_identity = IdentityKeyPair::generate(&mut OsRng);
        let alice_base = KeyPair::generate(&mut OsRng);
        let bob_signed = KeyPair::generate(&mut OsRng);
        let bob_one_time = with_one_time.then(|| KeyPair::generate(&mut OsRng));

        let mut alice = SessionState::new();
        initialize_alice_session(
            &mut alice,
            &AliceParameters {
                our_identity_key: alice_identity.clone(),
                our_base_key: alice_base.clone(),
                their_identity_key: *bob_identity.identity_key(),
                their_signed_pre_key: bob_signed.public_key,
                their_one_time_pre_key: bob_one_time.as_ref().map(|k| k.public_key),
                their_ratchet_key: bob_signed.public_key,
            },
            &mut OsRng,
        )
        .unwrap();

        let mut bob = SessionState::new();
        initialize_bob_session(
            &mut bob,
            &BobParameters {
                our_identity_key: bob_identity,
                our_signed_pre_key: bob_signed.clone(),
                our_one_time_pre_key: bob_one_time,
                our_ratchet_key: bob_signed,
                their_identity_key: *alice_identity.identity_key(),
                their_base_key: alice_base.public_key,
            },
        )
        .unwrap();
        (alice, bob)
    }

    #[test]
    fn test_alice_and_bob_chains_line_up() {
        for with_one_time in [false, true] {
            let (alice, bob) = alice_and_bob(with_one_time);

            let bob_ratchet = bob.sender_ratchet_key().unwrap();
            assert_eq!(
                alice.receiver_chain_key(bob_ratchet).unwrap().key(),
                bob.sender_chain_key().unwrap().key()
            );

            // Bob derives Alice's sending chain once her ratchet key arrives.
            let alice_ratchet = alice.sender_ratchet_key().unwrap();
            let (_, bob_receiving) = bob
                .root_key()
                .unwrap()
                .create_chain(alice_ratchet, bob.sender_ratchet_key_pair().unwrap())
                .unwrap();
            assert_eq!(bob_receiving.key(), alice.sender_chain_key().unwrap().key());
            assert_eq!(alice.session_version(), CIPHERTEXT_MESSAGE_CURRENT_VERSION);
        }
    }
}
