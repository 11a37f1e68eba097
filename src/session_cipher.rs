//! Steady-state encryption and decryption for one remote device.
//!
//! Decryption runs on copies of the stored states and the record is written
//! back only when a message decrypts, so failures never advance a chain or
//! consume a prekey.

use rand_core::CryptoRngCore;

use crate::address::ProtocolAddress;
use crate::consts::MAX_FORWARD_JUMPS;
use crate::crypto::{apply_keystream, generate_nonce};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, KeyPair, PublicKey};
use crate::protocol::{CiphertextMessage, PreKeySignalMessage, SignalMessage};
use crate::ratchet::{ChainKey, MessageKeys};
use crate::session_builder::SessionBuilder;
use crate::state::{SessionRecord, SessionState};
use crate::storage::ProtocolStore;

/// Encrypts and decrypts messages for one remote device.
pub struct SessionCipher<'a, S: ProtocolStore> {
    store: &'a mut S,
    remote_address: ProtocolAddress,
}

impl<'a, S: ProtocolStore> SessionCipher<'a, S> {
    pub fn new(store: &'a mut S, remote_address: ProtocolAddress) -> Self {
        Self {
            store,
            remote_address,
        }
    }

    /// Encrypts `plaintext` and advances the sending chain.
    ///
    /// Produces a `PreKeySignalMessage` while the peer has not yet replied to
    /// a session we initiated, a `SignalMessage` otherwise.
    ///
    /// # Errors
    /// `NoSession` if there is no initialized session for the address.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<CiphertextMessage> {
        let mut record = self
            .store
            .load_session(&self.remote_address)?
            .ok_or(Error::NoSession)?;
        let state = record.session_state_mut();

        let chain_key = state.sender_chain_key().ok_or(Error::NoSession)?.clone();
        let sender_ratchet_key = *state
            .sender_ratchet_key()
            .expect("sender chain carries a ratchet key");
        let (local_identity, remote_identity) = identities(state)?;
        let message_keys = chain_key.message_keys();

        let mut ciphertext = plaintext.to_vec();
        apply_keystream(
            message_keys.cipher_key(),
            &generate_nonce(message_keys.counter(), message_keys.iv()),
            &mut ciphertext,
        );

        let signal_message = SignalMessage::new(
            state.session_version(),
            message_keys.mac_key(),
            sender_ratchet_key,
            chain_key.index(),
            state.previous_counter(),
            ciphertext,
            &local_identity,
            &remote_identity,
        );

        let message = match state.unacknowledged_pre_key_message_items() {
            Some(pending) => CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
                state.session_version(),
                state.local_registration_id(),
                pending.pre_key_id,
                pending.signed_pre_key_id,
                pending.base_key,
                local_identity,
                signal_message,
            )),
            None => CiphertextMessage::SignalMessage(signal_message),
        };

        state.set_sender_chain_key(chain_key.next_chain_key()?);
        self.store.store_session(&self.remote_address, &record)?;
        Ok(message)
    }

    /// Decrypts a pairwise message of either kind.
    pub fn decrypt<R: CryptoRngCore>(
        &mut self,
        message: &CiphertextMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        match message {
            CiphertextMessage::SignalMessage(m) => self.decrypt_signal_message(m, rng),
            CiphertextMessage::PreKeySignalMessage(m) => self.decrypt_pre_key_message(m, rng),
            _ => Err(Error::InvalidMessage("not a session message")),
        }
    }

    /// Decrypts a session-opening message, building the session first.
    ///
    /// On success the session is stored, the sender's identity is saved and
    /// the one-time prekey it used is deleted.
    pub fn decrypt_pre_key_message<R: CryptoRngCore>(
        &mut self,
        message: &PreKeySignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_session(&self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh);

        let used_pre_key = SessionBuilder::new(&mut *self.store, self.remote_address.clone())
            .process_pre_key_message(&mut record, message)?;
        let plaintext = decrypt_pre_key_body(&mut record, message, rng)?;

        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;
        if let Some(id) = used_pre_key {
            self.store.remove_pre_key(id)?;
        }
        Ok(plaintext)
    }

    /// Decrypts a message on an existing session.
    ///
    /// # Errors
    /// `NoSession` without a stored record; `DuplicateMessage` for a replayed
    /// counter; `NoValidSessions`, carrying each state's error, if no state
    /// decrypts.
    pub fn decrypt_signal_message<R: CryptoRngCore>(
        &mut self,
        message: &SignalMessage,
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        let mut record = self
            .store
            .load_session(&self.remote_address)?
            .ok_or(Error::NoSession)?;
        let plaintext = decrypt_with_record(&mut record, message, rng)?;
        self.store.store_session(&self.remote_address, &record)?;
        Ok(plaintext)
    }

    pub fn remote_registration_id(&self) -> Result<u32> {
        self.current_state(|state| state.remote_registration_id())
    }

    pub fn session_version(&self) -> Result<u8> {
        self.current_state(SessionState::session_version)
    }

    fn current_state<T>(&self, read: impl FnOnce(&SessionState) -> T) -> Result<T> {
        let record = self
            .store
            .load_session(&self.remote_address)?
            .ok_or(Error::NoSession)?;
        if !record.session_state().has_sender_chain() {
            return Err(Error::NoSession);
        }
        Ok(read(record.session_state()))
    }
}

fn identities(state: &SessionState) -> Result<(IdentityKey, IdentityKey)> {
    let local = state
        .local_identity_key()
        .ok_or(Error::InvalidSessionState("missing local identity"))?;
    let remote = state
        .remote_identity_key()
        .ok_or(Error::InvalidSessionState("missing remote identity"))?;
    Ok((*local, *remote))
}

/// Decrypts a prekey message under the state its base key set up. The
/// builder has already decided where that state lives, so an archived one
/// stays archived.
fn decrypt_pre_key_body<R: CryptoRngCore>(
    record: &mut SessionRecord,
    message: &PreKeySignalMessage,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let set_up_by_message = |state: &SessionState| {
        state.session_version() == message.message_version()
            && state.alice_base_key() == Some(message.base_key())
    };
    if set_up_by_message(record.session_state()) {
        return decrypt_with_record(record, message.message(), rng);
    }

    let archived = record
        .previous_session_states()
        .enumerate()
        .find(|(_, state)| set_up_by_message(*state))
        .map(|(index, state)| (index, state.clone()));
    let Some((index, mut state)) = archived else {
        return decrypt_with_record(record, message.message(), rng);
    };

    match decrypt_with_state(&mut state, message.message(), rng) {
        Ok(plaintext) => {
            if let Some(slot) = record.previous_session_state_mut(index) {
                *slot = state;
            }
            Ok(plaintext)
        }
        Err(e) if e.is_invalid_message() => Err(Error::NoValidSessions(vec![e])),
        Err(e) => Err(e),
    }
}

/// Tries the current state, then archived states most recent first. An
/// archived state that decrypts becomes current again.
///
/// A counter one state has already consumed may belong to another state's
/// chain, so `DuplicateMessage` is only reported when no state decrypts.
fn decrypt_with_record<R: CryptoRngCore>(
    record: &mut SessionRecord,
    message: &SignalMessage,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut errors = Vec::new();
    let mut duplicate = None;

    let mut state = record.session_state().clone();
    match decrypt_with_state(&mut state, message, rng) {
        Ok(plaintext) => {
            record.set_state(state);
            return Ok(plaintext);
        }
        Err(e @ Error::DuplicateMessage { .. }) => duplicate = Some(e),
        Err(e) if e.is_invalid_message() => errors.push(e),
        Err(e) => return Err(e),
    }

    for index in 0..record.previous_session_state_count() {
        let Some(archived) = record.previous_session_state(index) else {
            break;
        };
        let mut state = archived.clone();
        match decrypt_with_state(&mut state, message, rng) {
            Ok(plaintext) => {
                tracing::debug!(index, "decrypted with archived session state, promoting it");
                record.take_previous_session_state(index);
                record.promote_state(state);
                return Ok(plaintext);
            }
            Err(e @ Error::DuplicateMessage { .. }) => {
                duplicate.get_or_insert(e);
            }
            Err(e) if e.is_invalid_message() => errors.push(e),
            Err(e) => return Err(e),
        }
    }

    if let Some(duplicate) = duplicate {
        return Err(duplicate);
    }
    tracing::warn!(states = errors.len(), "no session state could decrypt message");
    Err(Error::NoValidSessions(errors))
}

fn decrypt_with_state<R: CryptoRngCore>(
    state: &mut SessionState,
    message: &SignalMessage,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if !state.has_sender_chain() {
        return Err(Error::InvalidMessage("uninitialized session"));
    }
    if message.message_version() != state.session_version() {
        return Err(Error::InvalidMessage("message version mismatch"));
    }

    let their_ephemeral = message.sender_ratchet_key();
    let chain_key = get_or_create_chain_key(state, their_ephemeral, rng)?;
    let message_keys =
        get_or_create_message_keys(state, their_ephemeral, &chain_key, message.counter())?;

    let (local_identity, remote_identity) = identities(state)?;
    if !message.verify_mac(&remote_identity, &local_identity, message_keys.mac_key()) {
        return Err(Error::InvalidMessage("bad mac"));
    }

    let mut plaintext = message.body().to_vec();
    apply_keystream(
        message_keys.cipher_key(),
        &generate_nonce(message_keys.counter(), message_keys.iv()),
        &mut plaintext,
    );

    state.clear_unacknowledged_pre_key_message();
    Ok(plaintext)
}

/// Receiving chain for `their_ephemeral`, taking a DH ratchet step if the
/// key is new.
fn get_or_create_chain_key<R: CryptoRngCore>(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    rng: &mut R,
) -> Result<ChainKey> {
    if let Some(chain_key) = state.receiver_chain_key(their_ephemeral) {
        return Ok(chain_key.clone());
    }

    let root_key = state
        .root_key()
        .expect("session with a sender chain has a root key")
        .clone();
    let our_ephemeral = state
        .sender_ratchet_key_pair()
        .expect("checked by caller")
        .clone();

    // A ratchet key this state cannot agree with may still suit an archived one
    let (receiver_root, receiver_chain) = root_key
        .create_chain(their_ephemeral, &our_ephemeral)
        .map_err(|_| Error::InvalidMessage("unusable ratchet key"))?;
    let our_new_ephemeral = KeyPair::generate(rng);
    let (sender_root, sender_chain) = receiver_root
        .create_chain(their_ephemeral, &our_new_ephemeral)
        .map_err(|_| Error::InvalidMessage("unusable ratchet key"))?;

    let current_index = state.sender_chain_key().map_or(0, ChainKey::index);
    state.set_root_key(sender_root);
    state.add_receiver_chain(*their_ephemeral, receiver_chain.clone());
    state.set_previous_counter(current_index.saturating_sub(1));
    state.set_sender_chain(our_new_ephemeral, sender_chain);

    Ok(receiver_chain)
}

/// Message keys for `counter`, caching keys for any counters skipped over.
fn get_or_create_message_keys(
    state: &mut SessionState,
    their_ephemeral: &PublicKey,
    chain_key: &ChainKey,
    counter: u32,
) -> Result<MessageKeys> {
    if chain_key.index() > counter {
        return state
            .remove_message_keys(their_ephemeral, counter)
            .ok_or(Error::DuplicateMessage {
                index: chain_key.index(),
                counter,
            });
    }

    if (counter - chain_key.index()) as usize > MAX_FORWARD_JUMPS {
        return Err(Error::InvalidMessage("over 2000 messages into the future"));
    }

    let mut chain_key = chain_key.clone();
    while chain_key.index() < counter {
        state.set_message_keys(their_ephemeral, chain_key.message_keys());
        chain_key = chain_key.next_chain_key()?;
    }
    state.set_receiver_chain_key(their_ephemeral, chain_key.next_chain_key()?);
    Ok(chain_key.message_keys())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;
    use crate::state::{PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
    use crate::storage::{InMemoryProtocolStore, PreKeyStore, SessionStore, SignedPreKeyStore};
    use rand_core::OsRng;

    fn store_with_bundle() -> (InMemoryProtocolStore, PreKeyBundle) {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let signed = SignedPreKeyRecord::generate(&mut OsRng, &identity, 7, 0);
        let pre_key = PreKeyRecord::new(31, KeyPair::generate(&mut OsRng));
        let bundle = PreKeyBundle::new(
            42,
            1,
            Some(&pre_key),
            &signed,
            *identity.identity_key(),
        );

        let mut store = InMemoryProtocolStore::new(identity, 42);
        store.store_signed_pre_key(7, signed).unwrap();
        store.store_pre_key(31, pre_key).unwrap();
        (store, bundle)
    }

    fn established() -> (InMemoryProtocolStore, InMemoryProtocolStore) {
        let (mut bob, bundle) = store_with_bundle();
        let mut alice = InMemoryProtocolStore::new(IdentityKeyPair::generate(&mut OsRng), 17);

        SessionBuilder::new(&mut alice, ProtocolAddress::new("bob", 1))
            .process_pre_key_bundle(&bundle, &mut OsRng)
            .unwrap();
        let first = SessionCipher::new(&mut alice, ProtocolAddress::new("bob", 1))
            .encrypt(b"hello")
            .unwrap();
        SessionCipher::new(&mut bob, ProtocolAddress::new("alice", 1))
            .decrypt(&first, &mut OsRng)
            .unwrap();
        (alice, bob)
    }

    #[test]
    fn first_message_is_prekey_message_until_acknowledged() {
        let (mut alice, mut bob) = established();
        let bob_addr = ProtocolAddress::new("bob", 1);
        let alice_addr = ProtocolAddress::new("alice", 1);

        let second = SessionCipher::new(&mut alice, bob_addr.clone())
            .encrypt(b"again")
            .unwrap();
        assert!(matches!(second, CiphertextMessage::PreKeySignalMessage(_)));

        let reply = SessionCipher::new(&mut bob, alice_addr)
            .encrypt(b"hi")
            .unwrap();
        assert!(matches!(reply, CiphertextMessage::SignalMessage(_)));

        let plaintext = SessionCipher::new(&mut alice, bob_addr.clone())
            .decrypt(&reply, &mut OsRng)
            .unwrap();
        assert_eq!(plaintext, b"hi");

        let third = SessionCipher::new(&mut alice, bob_addr)
            .encrypt(b"acked")
            .unwrap();
        assert!(matches!(third, CiphertextMessage::SignalMessage(_)));
    }

    #[test]
    fn prekey_consumed_after_decrypt() {
        let (_alice, bob) = established();
        assert!(!bob.contains_pre_key(31).unwrap());
        assert!(bob.contains_signed_pre_key(7).unwrap());
    }

    #[test]
    fn failed_decrypt_leaves_record_untouched() {
        let (mut alice, mut bob) = established();
        let bob_addr = ProtocolAddress::new("bob", 1);
        let alice_addr = ProtocolAddress::new("alice", 1);

        let reply = SessionCipher::new(&mut bob, alice_addr)
            .encrypt(b"hi")
            .unwrap();
        let CiphertextMessage::SignalMessage(reply) = reply else {
            panic!("expected a signal message");
        };
        let mut tampered = reply.serialized().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let tampered = SignalMessage::deserialize(&tampered).unwrap();

        let before = alice.load_session(&bob_addr).unwrap().unwrap().serialize();
        let err = SessionCipher::new(&mut alice, bob_addr.clone())
            .decrypt_signal_message(&tampered, &mut OsRng)
            .unwrap_err();
        assert!(err.is_invalid_message());
        let after = alice.load_session(&bob_addr).unwrap().unwrap().serialize();
        assert_eq!(before, after);

        let plaintext = SessionCipher::new(&mut alice, bob_addr)
            .decrypt_signal_message(&reply, &mut OsRng)
            .unwrap();
        assert_eq!(plaintext, b"hi");
    }

    #[test]
    fn encrypt_without_session() {
        let (mut store, _) = store_with_bundle();
        let err = SessionCipher::new(&mut store, ProtocolAddress::new("nobody", 1))
            .encrypt(b"x")
            .unwrap_err();
        assert_eq!(err, Error::NoSession);
    }

    #[test]
    fn session_metadata() {
        let (mut alice, _bob) = established();
        let cipher = SessionCipher::new(&mut alice, ProtocolAddress::new("bob", 1));
        assert_eq!(cipher.remote_registration_id().unwrap(), 42);
        assert_eq!(cipher.session_version().unwrap(), 3);
    }

    #[test]
    fn previous_counter_tracks_sending_chain() {
        let (mut alice, mut bob) = established();
        let bob_addr = ProtocolAddress::new("bob", 1);
        let alice_addr = ProtocolAddress::new("alice", 1);

        for _ in 0..3 {
            let m = SessionCipher::new(&mut bob, alice_addr.clone())
                .encrypt(b"x")
                .unwrap();
            SessionCipher::new(&mut alice, bob_addr.clone())
                .decrypt(&m, &mut OsRng)
                .unwrap();
        }
        let m = SessionCipher::new(&mut alice, bob_addr).encrypt(b"y").unwrap();
        SessionCipher::new(&mut bob, alice_addr.clone())
            .decrypt(&m, &mut OsRng)
            .unwrap();

        // Bob's fresh sending chain after the ratchet step records the 3
        // messages sent on the previous one.
        let m = SessionCipher::new(&mut bob, alice_addr).encrypt(b"z").unwrap();
        let CiphertextMessage::SignalMessage(m) = m else {
            panic!("expected a signal message");
        };
        assert_eq!(m.counter(), 0);
        assert_eq!(m.previous_counter(), 2);
    }
}
