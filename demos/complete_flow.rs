//! Complete example of session setup, messaging and a group
//!
//! Two devices build a session from a published prekey bundle, talk for a
//! few turns, then Alice hands Bob her group sender key over that session.
//! Run with `RUST_LOG=axolotl_ratchet=debug` to watch the ratchet work.

use axolotl_ratchet::storage::{PreKeyStore, SignedPreKeyStore};
use axolotl_ratchet::{
    CiphertextMessage, GroupCipher, GroupSessionBuilder, IdentityKeyPair, InMemoryProtocolStore,
    PreKeyBundle, PreKeyRecord, ProtocolAddress, Result, SenderKeyName, SessionBuilder,
    SessionCipher, SignedPreKeyRecord,
};
use axolotl_ratchet::state::generate_registration_id;
use rand_core::OsRng;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    println!("=== Axolotl Session Example ===\n");

    // Bob installs and publishes his keys
    println!("1. Bob generates identity and prekeys...");
    let bob_identity = IdentityKeyPair::generate(&mut OsRng);
    let bob_registration_id = generate_registration_id(&mut OsRng);
    let signed_pre_key = SignedPreKeyRecord::generate(&mut OsRng, &bob_identity, 1, 0);
    let pre_keys = PreKeyRecord::generate_range(&mut OsRng, 1, 100);

    let bundle = PreKeyBundle::new(
        bob_registration_id,
        1,
        pre_keys.first(),
        &signed_pre_key,
        *bob_identity.identity_key(),
    );
    let mut bob = InMemoryProtocolStore::new(bob_identity, bob_registration_id);
    bob.store_signed_pre_key(signed_pre_key.id(), signed_pre_key)?;
    for record in pre_keys {
        bob.store_pre_key(record.id(), record)?;
    }
    println!("   ✓ Bundle published (identity {:?})\n", bundle.identity_key);

    // Alice starts a session from the bundle
    println!("2. Alice processes Bob's bundle...");
    let mut alice = InMemoryProtocolStore::new(
        IdentityKeyPair::generate(&mut OsRng),
        generate_registration_id(&mut OsRng),
    );
    let alice_address = ProtocolAddress::new("alice", 1);
    let bob_address = ProtocolAddress::new("bob", 1);
    SessionBuilder::new(&mut alice, bob_address.clone()).process_pre_key_bundle(&bundle, &mut OsRng)?;
    println!("   ✓ Session ready, Bob is offline\n");

    println!("3. Alice sends her first message...");
    let first = SessionCipher::new(&mut alice, bob_address.clone()).encrypt(b"Hi Bob!")?;
    println!("   ✓ Sent as {:?} ({} bytes)\n", first.message_type(), first.serialize().len());

    // Bob receives the bytes and the type tag from the transport
    println!("4. Bob comes online and decrypts...");
    let received = CiphertextMessage::parse(first.message_type() as u8, first.serialize())?;
    let plaintext = SessionCipher::new(&mut bob, alice_address.clone()).decrypt(&received, &mut OsRng)?;
    println!("   ✓ \"{}\"", String::from_utf8_lossy(&plaintext));
    println!("   ✓ One-time prekey consumed: {}\n", !bob.contains_pre_key(1)?);

    println!("5. Conversation...");
    for (speaker, text) in [
        ("bob", "Hello Alice!"),
        ("alice", "How are you?"),
        ("alice", "Still there?"),
        ("bob", "Yes, sorry."),
    ] {
        let (from, from_peer, to, to_peer) = if speaker == "alice" {
            (&mut alice, &bob_address, &mut bob, &alice_address)
        } else {
            (&mut bob, &alice_address, &mut alice, &bob_address)
        };
        let message = SessionCipher::new(from, from_peer.clone()).encrypt(text.as_bytes())?;
        let plaintext = SessionCipher::new(to, to_peer.clone()).decrypt(&message, &mut OsRng)?;
        println!("   {speaker}: {}", String::from_utf8_lossy(&plaintext));
    }
    println!();

    println!("6. Alice shares her group sender key...");
    let group = SenderKeyName::new("friends", alice_address.clone());
    let distribution = GroupSessionBuilder::new(&mut alice).create(&group, &mut OsRng)?;
    let envelope = SessionCipher::new(&mut alice, bob_address).encrypt(distribution.serialized())?;
    let opened = SessionCipher::new(&mut bob, alice_address).decrypt(&envelope, &mut OsRng)?;
    if let CiphertextMessage::SenderKeyDistributionMessage(distribution) =
        CiphertextMessage::parse(5, &opened)?
    {
        GroupSessionBuilder::new(&mut bob).process(&group, &distribution)?;
    }

    let group_message = GroupCipher::new(&mut alice, group.clone()).encrypt(b"Hello, friends!")?;
    let plaintext = GroupCipher::new(&mut bob, group).decrypt(&group_message)?;
    println!("   ✓ Group message: \"{}\"\n", String::from_utf8_lossy(&plaintext));

    println!("=== Done ===");
    Ok(())
}
