//! Shared fixtures: devices with published prekeys.

#![allow(dead_code)]

use axolotl_ratchet::storage::{PreKeyStore, SignedPreKeyStore};
use axolotl_ratchet::{
    CiphertextMessage, IdentityKeyPair, InMemoryProtocolStore, PreKeyBundle, PreKeyRecord,
    ProtocolAddress, SessionBuilder, SessionCipher, SignedPreKeyRecord,
};
use rand_core::{CryptoRngCore, OsRng};

pub const SIGNED_PRE_KEY_ID: u32 = 22;
pub const FIRST_PRE_KEY_ID: u32 = 100;

/// One device: its store, address and registration id.
pub struct Device {
    pub store: InMemoryProtocolStore,
    pub address: ProtocolAddress,
    pub registration_id: u32,
    identity: IdentityKeyPair,
    signed_pre_key: SignedPreKeyRecord,
    pre_keys: Vec<PreKeyRecord>,
}

impl Device {
    pub fn new(name: &str, registration_id: u32) -> Self {
        Self::with_rng(name, registration_id, &mut OsRng)
    }

    pub fn with_rng<R: CryptoRngCore>(name: &str, registration_id: u32, rng: &mut R) -> Self {
        let identity = IdentityKeyPair::generate(rng);
        let signed_pre_key = SignedPreKeyRecord::generate(rng, &identity, SIGNED_PRE_KEY_ID, 0);
        let pre_keys = PreKeyRecord::generate_range(rng, FIRST_PRE_KEY_ID, 5);

        let mut store = InMemoryProtocolStore::new(identity.clone(), registration_id);
        store
            .store_signed_pre_key(SIGNED_PRE_KEY_ID, signed_pre_key.clone())
            .unwrap();
        for record in &pre_keys {
            store.store_pre_key(record.id(), record.clone()).unwrap();
        }

        Self {
            store,
            address: ProtocolAddress::new(name, 1),
            registration_id,
            identity,
            signed_pre_key,
            pre_keys,
        }
    }

    /// Bundle offering the `index`th one-time prekey, or none.
    pub fn bundle(&self, index: Option<usize>) -> PreKeyBundle {
        PreKeyBundle::new(
            self.registration_id,
            self.address.device_id(),
            index.map(|i| &self.pre_keys[i]),
            &self.signed_pre_key,
            *self.identity.identity_key(),
        )
    }

    pub fn identity(&self) -> &IdentityKeyPair {
        &self.identity
    }

    pub fn process_bundle(&mut self, peer: &ProtocolAddress, bundle: &PreKeyBundle) {
        SessionBuilder::new(&mut self.store, peer.clone())
            .process_pre_key_bundle(bundle, &mut OsRng)
            .unwrap();
    }

    pub fn encrypt(&mut self, peer: &ProtocolAddress, plaintext: &[u8]) -> CiphertextMessage {
        SessionCipher::new(&mut self.store, peer.clone())
            .encrypt(plaintext)
            .unwrap()
    }

    pub fn decrypt(
        &mut self,
        peer: &ProtocolAddress,
        message: &CiphertextMessage,
    ) -> axolotl_ratchet::Result<Vec<u8>> {
        SessionCipher::new(&mut self.store, peer.clone()).decrypt(message, &mut OsRng)
    }
}

/// Alice and Bob after Alice's first message has been decrypted by Bob.
pub fn established_pair() -> (Device, Device) {
    let mut alice = Device::new("alice", 1111);
    let mut bob = Device::new("bob", 2222);

    let bundle = bob.bundle(Some(0));
    alice.process_bundle(&bob.address.clone(), &bundle);
    let first = alice.encrypt(&bob.address.clone(), b"first");
    assert_eq!(bob.decrypt(&alice.address.clone(), &first).unwrap(), b"first");
    (alice, bob)
}

/// Sends across the wire: serialize, then parse by type.
pub fn transmit(message: &CiphertextMessage) -> CiphertextMessage {
    CiphertextMessage::parse(message.message_type() as u8, message.serialize()).unwrap()
}
