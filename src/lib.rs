//! Pairwise Axolotl sessions with the Double Ratchet, plus sender-key groups.
//!
//! This crate implements the session layer of the Axolotl protocol: X3DH
//! agreement from published prekey bundles, a legacy interactive key
//! exchange, the Double Ratchet for steady-state messages, and the one-way
//! sender-key ratchet used for groups. All state lives behind the storage
//! traits in [`storage`]; nothing is kept in memory between calls.
//!
//! # Security Properties
//!
//! ## Forward Secrecy
//! Every message is encrypted under a key derived once from a hash chain and
//! then discarded. Compromising current state reveals nothing about messages
//! already decrypted.
//!
//! ## Post-Compromise Security
//! Each change of speaker performs a fresh Diffie-Hellman ratchet step, so an
//! attacker who copied session state loses access once both sides have
//! spoken again.
//!
//! ## Asynchronous Operation
//! An initiator can encrypt to an offline peer using the peer's prekey bundle.
//! Messages are wrapped as prekey messages until the peer's first reply
//! arrives.
//!
//! # Threat Model
//!
//! **Assumed adversary capabilities:**
//! - Active network attacker (inject, modify, reorder, replay, drop)
//! - Compromise of session state at a single point in time
//!
//! **Security assumptions:**
//! - X25519 ECDH provides computational security
//! - HKDF-SHA256 and HMAC-SHA256 are secure
//! - The random number generator is cryptographically secure
//! - Identity keys are verified out of band; the bundled identity store
//!   trusts a name's first identity only
//!
//! # Protocol Flow
//!
//! ```rust
//! use axolotl_ratchet::{
//!     IdentityKeyPair, InMemoryProtocolStore, KeyPair, PreKeyBundle, PreKeyRecord,
//!     ProtocolAddress, SessionBuilder, SessionCipher, SignedPreKeyRecord,
//! };
//! use axolotl_ratchet::storage::{PreKeyStore, SignedPreKeyStore};
//! use rand_core::OsRng;
//!
//! # fn main() -> axolotl_ratchet::Result<()> {
//! // Bob publishes a bundle
//! let bob_identity = IdentityKeyPair::generate(&mut OsRng);
//! let signed = SignedPreKeyRecord::generate(&mut OsRng, &bob_identity, 1, 0);
//! let one_time = PreKeyRecord::new(1, KeyPair::generate(&mut OsRng));
//! let bundle = PreKeyBundle::new(2, 1, Some(&one_time), &signed, *bob_identity.identity_key());
//!
//! let mut bob = InMemoryProtocolStore::new(bob_identity, 2);
//! bob.store_signed_pre_key(1, signed)?;
//! bob.store_pre_key(1, one_time)?;
//!
//! // Alice builds a session from it and encrypts
//! let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 1);
//! let bob_address = ProtocolAddress::new("bob", 1);
//! SessionBuilder::new(&mut alice, bob_address.clone()).process_pre_key_bundle(&bundle, &mut OsRng)?;
//! let message = SessionCipher::new(&mut alice, bob_address.clone()).encrypt(b"Hello Bob!")?;
//!
//! // Bob decrypts, which also builds his side of the session
//! let alice_address = ProtocolAddress::new("alice", 1);
//! let plaintext = SessionCipher::new(&mut bob, alice_address.clone()).decrypt(&message, &mut OsRng)?;
//! assert_eq!(plaintext, b"Hello Bob!");
//!
//! // and can reply at once
//! let reply = SessionCipher::new(&mut bob, alice_address).encrypt(b"Hello Alice!")?;
//! let plaintext = SessionCipher::new(&mut alice, bob_address).decrypt(&reply, &mut OsRng)?;
//! assert_eq!(plaintext, b"Hello Alice!");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`session_builder`]: Session setup from bundles, prekey messages and key exchanges
//! - [`session_cipher`]: Double Ratchet encryption and decryption
//! - [`group_cipher`]: Sender-key group sessions
//! - [`ratchet`]: Root, chain and message key derivation
//! - [`protocol`]: Wire messages
//! - [`state`]: Session records, prekeys and sender key records
//! - [`storage`]: Storage traits and in-memory backends
//! - [`keys`]: Curve25519 key types with automatic zeroization
//! - [`error`]: Error types

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, unreachable_pub)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(
    missing_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::missing_fields_in_debug,
    clippy::module_name_repetitions
)]

pub mod address;
pub mod consts;
pub mod crypto;
pub mod error;
pub mod group_cipher;
pub mod keys;
pub mod proto;
pub mod protocol;
pub mod ratchet;
pub mod session_builder;
pub mod session_cipher;
pub mod state;
pub mod storage;
pub mod xeddsa;

// Re-export main types
pub use address::{ProtocolAddress, SenderKeyName};
pub use error::{Error, Result};
pub use group_cipher::{GroupCipher, GroupSessionBuilder};
pub use keys::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey, SecretKey};
pub use protocol::{
    CiphertextMessage, CiphertextMessageType, KeyExchangeMessage, PreKeySignalMessage,
    SenderKeyDistributionMessage, SenderKeyMessage, SignalMessage,
};
pub use session_builder::SessionBuilder;
pub use session_cipher::SessionCipher;
pub use state::{
    PreKeyBundle, PreKeyRecord, SenderKeyRecord, SessionRecord, SessionState, SignedPreKeyRecord,
};
pub use storage::{InMemoryProtocolStore, ProtocolStore};
