//! Property-based tests for pairwise and group sessions
//!
//! Uses proptest to check protocol invariants across random inputs

mod common;

use axolotl_ratchet::ratchet::is_alice;
use axolotl_ratchet::storage::{InMemorySenderKeyStore, SessionStore};
use axolotl_ratchet::{
    CiphertextMessage, Error, GroupCipher, GroupSessionBuilder, ProtocolAddress, PublicKey,
    SenderKeyName, SignalMessage,
};
use common::{established_pair, Device};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_core::OsRng;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_roundtrip_any_plaintext(
        message in prop::collection::vec(any::<u8>(), 0..2000)
    ) {
        let (mut alice, mut bob) = established_pair();
        let (a, b) = (alice.address.clone(), bob.address.clone());

        let encrypted = alice.encrypt(&b, &message);
        prop_assert_eq!(bob.decrypt(&a, &encrypted).unwrap(), message.clone());

        let encrypted = bob.encrypt(&a, &message);
        prop_assert_eq!(alice.decrypt(&b, &encrypted).unwrap(), message);
    }

    #[test]
    fn test_any_delivery_order(order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle()) {
        let (mut alice, mut bob) = established_pair();
        let (a, b) = (alice.address.clone(), bob.address.clone());

        let messages: Vec<_> = (0..12)
            .map(|i| alice.encrypt(&b, &[i as u8]))
            .collect();
        for &i in &order {
            prop_assert_eq!(bob.decrypt(&a, &messages[i]).unwrap(), vec![i as u8]);
        }
        for &i in &order {
            let replay = bob.decrypt(&a, &messages[i]);
            prop_assert!(
                matches!(replay, Err(Error::DuplicateMessage { .. })),
                "replay was accepted"
            );
        }
    }

    #[test]
    fn test_any_bit_flip_rejected(position in any::<prop::sample::Index>(), bit in 0u8..8) {
        let (mut alice, mut bob) = established_pair();
        let (a, b) = (alice.address.clone(), bob.address.clone());
        let reply = bob.encrypt(&a, b"ack");
        alice.decrypt(&b, &reply).unwrap();

        let CiphertextMessage::SignalMessage(message) = alice.encrypt(&b, b"payload") else {
            panic!("expected a signal message");
        };
        let mut bytes = message.serialized().to_vec();
        let index = position.index(bytes.len());
        bytes[index] ^= 1 << bit;

        let before = bob.store.load_session(&a).unwrap().unwrap().serialize();
        if let Ok(tampered) = SignalMessage::deserialize(&bytes) {
            let result = bob.decrypt(&a, &CiphertextMessage::SignalMessage(tampered));
            prop_assert!(result.is_err(), "flipped bit {} of byte {} went unnoticed", bit, index);
        }
        prop_assert_eq!(before, bob.store.load_session(&a).unwrap().unwrap().serialize());
    }

    #[test]
    fn test_conversation_with_random_turns(turns in prop::collection::vec(any::<bool>(), 1..40)) {
        let (mut alice, mut bob) = established_pair();
        let (a, b) = (alice.address.clone(), bob.address.clone());

        for (i, alice_speaks) in turns.into_iter().enumerate() {
            let text = format!("turn {i}");
            if alice_speaks {
                let m = alice.encrypt(&b, text.as_bytes());
                prop_assert_eq!(bob.decrypt(&a, &m).unwrap(), text.into_bytes());
            } else {
                let m = bob.encrypt(&a, text.as_bytes());
                prop_assert_eq!(alice.decrypt(&b, &m).unwrap(), text.into_bytes());
            }
        }
    }

    #[test]
    fn test_seeded_devices_interoperate(seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut alice = Device::with_rng("alice", 1, &mut rng);
        let mut bob = Device::with_rng("bob", 2, &mut rng);
        let (a, b) = (alice.address.clone(), bob.address.clone());

        let bundle = bob.bundle(Some(3));
        alice.process_bundle(&b, &bundle);
        let m = alice.encrypt(&b, b"seeded");
        prop_assert_eq!(bob.decrypt(&a, &m).unwrap(), b"seeded".to_vec());
    }

    #[test]
    fn test_role_order_is_antisymmetric(x in any::<[u8; 32]>(), y in any::<[u8; 32]>()) {
        prop_assume!(x != y);
        let (x, y) = (PublicKey::from_bytes(x), PublicKey::from_bytes(y));
        prop_assert!(is_alice(&x, &y) != is_alice(&y, &x));
    }

    #[test]
    fn test_parsing_never_panics(
        message_type in 0u8..8,
        bytes in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let _ = CiphertextMessage::parse(message_type, &bytes);
    }

    #[test]
    fn test_group_any_delivery_order(order in Just((0..10usize).collect::<Vec<_>>()).prop_shuffle()) {
        let name = SenderKeyName::new("group", ProtocolAddress::new("alice", 1));
        let mut sender = InMemorySenderKeyStore::new();
        let mut receiver = InMemorySenderKeyStore::new();

        let distribution = GroupSessionBuilder::new(&mut sender)
            .create(&name, &mut OsRng)
            .unwrap();
        GroupSessionBuilder::new(&mut receiver)
            .process(&name, &distribution)
            .unwrap();

        let messages: Vec<_> = (0..10)
            .map(|i| GroupCipher::new(&mut sender, name.clone()).encrypt(&[i as u8]).unwrap())
            .collect();
        let mut cipher = GroupCipher::new(&mut receiver, name);
        for &i in &order {
            prop_assert_eq!(cipher.decrypt(&messages[i]).unwrap(), vec![i as u8]);
        }
    }
}
