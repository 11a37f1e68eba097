//! Fuzz target for decrypting untrusted messages on a live session
//!
//! Every input must be rejected cleanly and leave the stored session usable

#![no_main]

use axolotl_ratchet::storage::{PreKeyStore, SignedPreKeyStore};
use axolotl_ratchet::{
    IdentityKeyPair, InMemoryProtocolStore, KeyPair, PreKeyBundle, PreKeyRecord,
    PreKeySignalMessage, ProtocolAddress, SessionBuilder, SessionCipher, SignalMessage,
    SignedPreKeyRecord,
};
use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;

fuzz_target!(|data: &[u8]| {
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let signed = SignedPreKeyRecord::generate(&mut OsRng, &bob_identity, 1, 0);
    let pre_key = PreKeyRecord::new(1, KeyPair::generate(&mut OsRng));
    let bundle = PreKeyBundle::new(2, 1, Some(&pre_key), &signed, *bob_identity.identity_key());

    let mut bob = InMemoryProtocolStore::new(bob_identity, 2);
    bob.store_signed_pre_key(1, signed).unwrap();
    bob.store_pre_key(1, pre_key).unwrap();

    let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
    let alice_address = ProtocolAddress::new("alice", 1);
    let bob_address = ProtocolAddress::new("bob", 1);
    SessionBuilder::new(&mut alice, bob_address.clone())
        .process_pre_key_bundle(&bundle, &mut OsRng)
        .unwrap();
    let first = SessionCipher::new(&mut alice, bob_address)
        .encrypt(b"first")
        .unwrap();
    SessionCipher::new(&mut bob, alice_address.clone())
        .decrypt(&first, &mut OsRng)
        .unwrap();

    let mut cipher = SessionCipher::new(&mut bob, alice_address);
    if let Ok(message) = SignalMessage::deserialize(data) {
        assert!(cipher.decrypt_signal_message(&message, &mut OsRng).is_err());
    }
    if let Ok(message) = PreKeySignalMessage::deserialize(data) {
        let _ = cipher.decrypt_pre_key_message(&message, &mut OsRng);
    }
    assert_eq!(cipher.session_version().unwrap(), 3);
});
