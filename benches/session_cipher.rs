use axolotl_ratchet::storage::{PreKeyStore, SignedPreKeyStore};
use axolotl_ratchet::{
    GroupCipher, GroupSessionBuilder, IdentityKeyPair, InMemoryProtocolStore, KeyPair,
    PreKeyBundle, PreKeyRecord, ProtocolAddress, SenderKeyName, SessionBuilder, SessionCipher,
    SignedPreKeyRecord,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand_core::OsRng;

fn bob_with_bundle() -> (InMemoryProtocolStore, PreKeyBundle) {
    let identity = IdentityKeyPair::generate(&mut OsRng);
    let signed = SignedPreKeyRecord::generate(&mut OsRng, &identity, 1, 0);
    let pre_key = PreKeyRecord::new(1, KeyPair::generate(&mut OsRng));
    let bundle = PreKeyBundle::new(2, 1, Some(&pre_key), &signed, *identity.identity_key());

    let mut store = InMemoryProtocolStore::new(identity, 2);
    store.store_signed_pre_key(1, signed).unwrap();
    store.store_pre_key(1, pre_key).unwrap();
    (store, bundle)
}

fn alice() -> ProtocolAddress {
    ProtocolAddress::new("alice", 1)
}

fn bob() -> ProtocolAddress {
    ProtocolAddress::new("bob", 1)
}

/// Both sides after Bob has answered, so neither sends prekey messages.
fn setup_session() -> (InMemoryProtocolStore, InMemoryProtocolStore) {
    let (mut bob_store, bundle) = bob_with_bundle();
    let mut alice_store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);

    SessionBuilder::new(&mut alice_store, bob())
        .process_pre_key_bundle(&bundle, &mut OsRng)
        .unwrap();
    let first = SessionCipher::new(&mut alice_store, bob()).encrypt(b"hi").unwrap();
    SessionCipher::new(&mut bob_store, alice())
        .decrypt(&first, &mut OsRng)
        .unwrap();
    let reply = SessionCipher::new(&mut bob_store, alice()).encrypt(b"hi").unwrap();
    SessionCipher::new(&mut alice_store, bob())
        .decrypt(&reply, &mut OsRng)
        .unwrap();

    (alice_store, bob_store)
}

fn bench_session_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_setup");

    group.bench_function("process_pre_key_bundle", |b| {
        let (_, bundle) = bob_with_bundle();
        b.iter(|| {
            let mut store = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
            SessionBuilder::new(&mut store, bob())
                .process_pre_key_bundle(black_box(&bundle), &mut OsRng)
                .unwrap();
        });
    });

    group.bench_function("full_handshake", |b| {
        b.iter(|| black_box(setup_session()));
    });

    group.finish();
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput");

    for size in [128, 1024, 4096, 16384] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encrypt", size), &size, |b, &size| {
            let (mut alice_store, _) = setup_session();
            let message = vec![0u8; size];

            b.iter(|| {
                black_box(
                    SessionCipher::new(&mut alice_store, bob())
                        .encrypt(&message)
                        .unwrap(),
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("decrypt", size), &size, |b, &size| {
            let (mut alice_store, mut bob_store) = setup_session();
            let message = vec![0u8; size];

            b.iter(|| {
                let encrypted = SessionCipher::new(&mut alice_store, bob())
                    .encrypt(&message)
                    .unwrap();
                black_box(
                    SessionCipher::new(&mut bob_store, alice())
                        .decrypt(&encrypted, &mut OsRng)
                        .unwrap(),
                )
            });
        });
    }

    group.finish();
}

fn bench_ratchet_steps(c: &mut Criterion) {
    let mut group = c.benchmark_group("ratchet_steps");

    group.bench_function("ping_pong_10", |b| {
        let (mut alice_store, mut bob_store) = setup_session();
        let message = vec![0u8; 256];

        b.iter(|| {
            for _ in 0..5 {
                let enc = SessionCipher::new(&mut alice_store, bob()).encrypt(&message).unwrap();
                SessionCipher::new(&mut bob_store, alice())
                    .decrypt(&enc, &mut OsRng)
                    .unwrap();
                let enc = SessionCipher::new(&mut bob_store, alice()).encrypt(&message).unwrap();
                SessionCipher::new(&mut alice_store, bob())
                    .decrypt(&enc, &mut OsRng)
                    .unwrap();
            }
        });
    });

    group.bench_function("skip_100_messages", |b| {
        b.iter(|| {
            let (mut alice_store, mut bob_store) = setup_session();
            let encrypted: Vec<_> = (0..101)
                .map(|_| SessionCipher::new(&mut alice_store, bob()).encrypt(b"x").unwrap())
                .collect();

            let mut cipher = SessionCipher::new(&mut bob_store, alice());
            cipher.decrypt(&encrypted[100], &mut OsRng).unwrap();
            for message in encrypted.iter().take(100) {
                cipher.decrypt(message, &mut OsRng).unwrap();
            }
        });
    });

    group.finish();
}

fn bench_group(c: &mut Criterion) {
    let mut group = c.benchmark_group("group");
    let name = SenderKeyName::new("bench", alice());

    group.bench_function("encrypt_decrypt_1kb", |b| {
        let mut sender = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
        let mut receiver = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 2);
        let distribution = GroupSessionBuilder::new(&mut sender)
            .create(&name, &mut OsRng)
            .unwrap();
        GroupSessionBuilder::new(&mut receiver)
            .process(&name, &distribution)
            .unwrap();
        let message = vec![0u8; 1024];

        b.iter(|| {
            let encrypted = GroupCipher::new(&mut sender, name.clone())
                .encrypt(&message)
                .unwrap();
            black_box(
                GroupCipher::new(&mut receiver, name.clone())
                    .decrypt(&encrypted)
                    .unwrap(),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_session_setup,
    bench_throughput,
    bench_ratchet_steps,
    bench_group
);

criterion_main!(benches);
