//! Session establishment.
//!
//! A session starts from one of three events: fetching a peer's prekey
//! bundle (we become Alice), receiving a prekey message (we become Bob), or
//! a legacy key exchange (roles decided by base key order). Whenever both
//! sides initiate at once, the states involved are archived rather than
//! discarded and the side that yields is flagged with `needs_refresh`.

use rand_core::CryptoRngCore;

use crate::address::ProtocolAddress;
use crate::consts::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, KeyPair};
use crate::protocol::{
    KeyExchangeMessage, PreKeySignalMessage, INITIATE_FLAG, RESPONSE_FLAG,
    SIMULTANEOUS_INITIATE_FLAG,
};
use crate::ratchet::{
    initialize_alice_session, initialize_bob_session, initialize_symmetric_session, is_alice,
    AliceParameters, BobParameters, SymmetricParameters,
};
use crate::state::{PendingKeyExchange, PreKeyBundle, SessionRecord, SessionState};
use crate::storage::ProtocolStore;

/// Key exchange sequence numbers are drawn from `[1, 65534]`.
const MAX_SEQUENCE: u32 = 65534;

/// Builds sessions with one remote device.
pub struct SessionBuilder<'a, S: ProtocolStore> {
    store: &'a mut S,
    remote_address: ProtocolAddress,
}

impl<'a, S: ProtocolStore> SessionBuilder<'a, S> {
    pub fn new(store: &'a mut S, remote_address: ProtocolAddress) -> Self {
        Self {
            store,
            remote_address,
        }
    }

    fn check_trusted(&self, identity: &IdentityKey) -> Result<()> {
        if self
            .store
            .is_trusted_identity(self.remote_address.name(), identity)?
        {
            Ok(())
        } else {
            tracing::warn!(address = %self.remote_address, "untrusted identity key");
            Err(Error::UntrustedIdentity)
        }
    }

    fn load_record(&self) -> Result<SessionRecord> {
        Ok(self
            .store
            .load_session(&self.remote_address)?
            .unwrap_or_else(SessionRecord::new_fresh))
    }

    /// Starts a session from a peer's published bundle.
    ///
    /// Outgoing messages are wrapped as prekey messages until the peer's
    /// first reply is decrypted.
    ///
    /// # Errors
    /// `UntrustedIdentity` for a changed identity, `InvalidKey` for a missing
    /// or bad signed prekey signature.
    pub fn process_pre_key_bundle<R: CryptoRngCore>(
        &mut self,
        bundle: &PreKeyBundle,
        rng: &mut R,
    ) -> Result<()> {
        self.check_trusted(&bundle.identity_key)?;
        bundle.verify_signature()?;

        let mut record = self.load_record()?;
        let our_base_key = KeyPair::generate(rng);

        let parameters = AliceParameters {
            our_identity_key: self.store.identity_key_pair()?,
            our_base_key: our_base_key.clone(),
            their_identity_key: bundle.identity_key,
            their_signed_pre_key: bundle.signed_pre_key,
            their_one_time_pre_key: bundle.pre_key.map(|(_, key)| key),
            their_ratchet_key: bundle.signed_pre_key,
        };

        let mut state = SessionState::new();
        initialize_alice_session(&mut state, &parameters, rng)?;
        state.set_unacknowledged_pre_key_message(
            bundle.pre_key.map(|(id, _)| id),
            bundle.signed_pre_key_id,
            our_base_key.public_key,
        );
        state.set_local_registration_id(self.store.local_registration_id()?);
        state.set_remote_registration_id(bundle.registration_id);
        state.set_alice_base_key(our_base_key.public_key);

        install(&mut record, state);

        self.store
            .save_identity(self.remote_address.name(), &bundle.identity_key)?;
        self.store.store_session(&self.remote_address, &record)
    }

    /// Sets up the responder side for an incoming prekey message.
    ///
    /// Works on the caller's record, which is committed only after the
    /// embedded message decrypts. Returns the one-time prekey id to delete on
    /// commit, or `None` if no prekey was used or the message repeats one
    /// already processed.
    pub(crate) fn process_pre_key_message(
        &mut self,
        record: &mut SessionRecord,
        message: &PreKeySignalMessage,
    ) -> Result<Option<u32>> {
        self.check_trusted(message.identity_key())?;

        if record.has_session_state(message.message_version(), message.base_key()) {
            tracing::debug!(address = %self.remote_address, "prekey message already processed");
            return Ok(None);
        }

        let signed_pre_key_id = message.signed_pre_key_id();
        let our_signed_pre_key = self
            .store
            .load_signed_pre_key(signed_pre_key_id)?
            .ok_or(Error::InvalidKeyId(signed_pre_key_id))?;

        let our_one_time_pre_key = match message.pre_key_id() {
            Some(id) => Some(
                self.store
                    .load_pre_key(id)?
                    .ok_or(Error::InvalidKeyId(id))?
                    .key_pair()
                    .clone(),
            ),
            None => None,
        };

        let parameters = BobParameters {
            our_identity_key: self.store.identity_key_pair()?,
            our_signed_pre_key: our_signed_pre_key.key_pair().clone(),
            our_one_time_pre_key,
            our_ratchet_key: our_signed_pre_key.key_pair().clone(),
            their_identity_key: *message.identity_key(),
            their_base_key: *message.base_key(),
        };

        let mut state = SessionState::new();
        initialize_bob_session(&mut state, &parameters)?;
        state.set_local_registration_id(self.store.local_registration_id()?);
        state.set_remote_registration_id(message.registration_id());
        state.set_alice_base_key(*message.base_key());

        let our_pending_base = record
            .session_state()
            .unacknowledged_pre_key_message_items()
            .map(|pending| pending.base_key);

        match our_pending_base {
            Some(our_base) if is_alice(&our_base, message.base_key()) => {
                tracing::info!(
                    address = %self.remote_address,
                    "simultaneous initiate: keeping our session"
                );
                record.archive_state(state);
            }
            Some(_) => {
                tracing::info!(
                    address = %self.remote_address,
                    "simultaneous initiate: adopting peer session"
                );
                state.set_needs_refresh(true);
                record.promote_state(state);
            }
            None => install(record, state),
        }

        Ok(message.pre_key_id())
    }

    /// Starts a legacy key exchange and remembers our half of it.
    pub fn initiate_key_exchange<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
    ) -> Result<KeyExchangeMessage> {
        let sequence = rng.next_u32() % MAX_SEQUENCE + 1;
        let base_key = KeyPair::generate(rng);
        let ratchet_key = KeyPair::generate(rng);
        let identity_key = self.store.identity_key_pair()?;
        let base_key_signature = identity_key.sign(rng, &base_key.public_key.serialize());

        let message = KeyExchangeMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            sequence,
            INITIATE_FLAG,
            base_key.public_key,
            base_key_signature,
            ratchet_key.public_key,
            *identity_key.identity_key(),
        );

        let mut record = self.load_record()?;
        record
            .session_state_mut()
            .set_pending_key_exchange(PendingKeyExchange {
                sequence,
                base_key,
                ratchet_key,
                identity_key,
            });
        self.store.store_session(&self.remote_address, &record)?;
        Ok(message)
    }

    /// Handles either half of a legacy key exchange.
    ///
    /// Returns the response to send for an initiate, `None` for a response.
    ///
    /// # Errors
    /// `StaleKeyExchange` for a response that matches no pending exchange.
    pub fn process_key_exchange_message<R: CryptoRngCore>(
        &mut self,
        message: &KeyExchangeMessage,
        rng: &mut R,
    ) -> Result<Option<KeyExchangeMessage>> {
        self.check_trusted(message.identity_key())?;
        message
            .identity_key()
            .public_key()
            .verify_signature(&message.base_key().serialize(), message.base_key_signature())
            .map_err(|_| Error::InvalidKey("bad base key signature"))?;

        if message.is_initiate() {
            self.process_initiate(message, rng).map(Some)
        } else {
            self.process_response(message, rng).map(|()| None)
        }
    }

    fn process_initiate<R: CryptoRngCore>(
        &mut self,
        message: &KeyExchangeMessage,
        rng: &mut R,
    ) -> Result<KeyExchangeMessage> {
        let mut record = self.load_record()?;
        let pending = record.session_state().pending_key_exchange().cloned();
        let simultaneous = pending.is_some();

        let (flags, base_key, ratchet_key, identity_key) = match pending {
            Some(pending) => {
                tracing::info!(address = %self.remote_address, "simultaneous key exchange");
                (
                    RESPONSE_FLAG | SIMULTANEOUS_INITIATE_FLAG,
                    pending.base_key,
                    pending.ratchet_key,
                    pending.identity_key,
                )
            }
            None => (
                RESPONSE_FLAG,
                KeyPair::generate(rng),
                KeyPair::generate(rng),
                self.store.identity_key_pair()?,
            ),
        };

        let parameters = SymmetricParameters {
            our_identity_key: identity_key.clone(),
            our_base_key: base_key.clone(),
            our_ratchet_key: ratchet_key.clone(),
            their_identity_key: *message.identity_key(),
            their_base_key: *message.base_key(),
            their_ratchet_key: *message.ratchet_key(),
        };
        let mut state = self.symmetric_state(&parameters, rng)?;

        if simultaneous && !is_alice(&base_key.public_key, message.base_key()) {
            state.set_needs_refresh(true);
        }
        install(&mut record, state);

        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)?;

        let base_key_signature = identity_key.sign(rng, &base_key.public_key.serialize());
        Ok(KeyExchangeMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            message.sequence(),
            flags,
            base_key.public_key,
            base_key_signature,
            ratchet_key.public_key,
            *identity_key.identity_key(),
        ))
    }

    fn process_response<R: CryptoRngCore>(
        &mut self,
        message: &KeyExchangeMessage,
        rng: &mut R,
    ) -> Result<()> {
        let mut record = self.load_record()?;
        let pending = match record.session_state().pending_key_exchange() {
            Some(pending) if pending.sequence == message.sequence() => pending.clone(),
            _ if message.is_response_for_simultaneous_initiate() => {
                tracing::debug!(address = %self.remote_address, "ignoring simultaneous response");
                return Ok(());
            }
            _ => {
                tracing::warn!(address = %self.remote_address, "stale key exchange response");
                return Err(Error::StaleKeyExchange);
            }
        };

        let parameters = SymmetricParameters {
            our_identity_key: pending.identity_key,
            our_base_key: pending.base_key,
            our_ratchet_key: pending.ratchet_key,
            their_identity_key: *message.identity_key(),
            their_base_key: *message.base_key(),
            their_ratchet_key: *message.ratchet_key(),
        };
        let state = self.symmetric_state(&parameters, rng)?;
        install(&mut record, state);

        self.store
            .save_identity(self.remote_address.name(), message.identity_key())?;
        self.store.store_session(&self.remote_address, &record)
    }

    fn symmetric_state<R: CryptoRngCore>(
        &self,
        parameters: &SymmetricParameters,
        rng: &mut R,
    ) -> Result<SessionState> {
        let mut state = SessionState::new();
        initialize_symmetric_session(&mut state, parameters, rng)?;

        let ours = parameters.our_base_key.public_key;
        let theirs = parameters.their_base_key;
        state.set_alice_base_key(if is_alice(&ours, &theirs) { ours } else { theirs });
        state.set_local_registration_id(self.store.local_registration_id()?);
        Ok(state)
    }
}

/// Makes `state` current, archiving the state it replaces if that one was
/// ever usable.
fn install(record: &mut SessionRecord, state: SessionState) {
    if record.session_state().has_sender_chain() {
        record.promote_state(state);
    } else {
        record.set_state(state);
    }
}
