//! Sender-key group messaging.
//!
//! A sender creates one chain per group and hands its starting point to every
//! member over pairwise sessions as a distribution message. Group messages
//! are then encrypted once and signed with the sender's Ed25519 key.

use ed25519_dalek::SigningKey;
use rand_core::CryptoRngCore;

use crate::address::SenderKeyName;
use crate::consts::{CIPHERTEXT_MESSAGE_CURRENT_VERSION, MAX_FORWARD_JUMPS, MEDIUM_MAX_VALUE};
use crate::crypto::{apply_keystream, KEY_SIZE_32, NONCE_SIZE};
use crate::error::{Error, Result};
use crate::protocol::{SenderKeyDistributionMessage, SenderKeyMessage};
use crate::state::{SenderKeyRecord, SenderKeyState, SenderMessageKey};
use crate::storage::SenderKeyStore;

/// Creates our sending chain and installs chains received from others.
pub struct GroupSessionBuilder<'a, S: SenderKeyStore> {
    store: &'a mut S,
}

impl<'a, S: SenderKeyStore> GroupSessionBuilder<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Installs a sender's chain from their distribution message.
    pub fn process(
        &mut self,
        name: &SenderKeyName,
        message: &SenderKeyDistributionMessage,
    ) -> Result<()> {
        let mut record = self.store.load_sender_key(name)?.unwrap_or_default();
        record.add_sender_key_state(
            message.key_id(),
            message.iteration(),
            *message.chain_key(),
            *message.signing_key(),
        );
        tracing::debug!(%name, key_id = message.key_id(), "installed sender key");
        self.store.store_sender_key(name, &record)
    }

    /// Returns the distribution message for our own chain in a group,
    /// generating the chain on first use.
    pub fn create<R: CryptoRngCore>(
        &mut self,
        name: &SenderKeyName,
        rng: &mut R,
    ) -> Result<SenderKeyDistributionMessage> {
        let mut record = self.store.load_sender_key(name)?.unwrap_or_default();

        if record.is_empty() {
            let key_id = rng.next_u32() % MEDIUM_MAX_VALUE;
            let mut chain_key = [0u8; KEY_SIZE_32];
            rng.fill_bytes(&mut chain_key);
            record.set_sender_key_state(key_id, 0, chain_key, SigningKey::generate(rng));
            tracing::info!(%name, key_id, "generated sender key");
            self.store.store_sender_key(name, &record)?;
        }

        let state = record.sender_key_state()?;
        Ok(SenderKeyDistributionMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            state.key_id(),
            state.sender_chain_key().iteration(),
            *state.sender_chain_key().seed(),
            *state.signing_key_public(),
        ))
    }
}

/// Encrypts to and decrypts from one (group, sender) pair.
pub struct GroupCipher<'a, S: SenderKeyStore> {
    store: &'a mut S,
    name: SenderKeyName,
}

impl<'a, S: SenderKeyStore> GroupCipher<'a, S> {
    pub fn new(store: &'a mut S, name: SenderKeyName) -> Self {
        Self { store, name }
    }

    /// Encrypts with our own chain for the group.
    ///
    /// # Errors
    /// `NoSession` if no chain was created, `InvalidSessionState` if the
    /// stored chain belongs to another sender.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<SenderKeyMessage> {
        let mut record = self.load_record()?;
        let state = record.sender_key_state_mut()?;
        let signing_key = state
            .signing_key_private()
            .ok_or(Error::InvalidSessionState("no signing key for sender key"))?
            .clone();

        let chain_key = state.sender_chain_key().clone();
        let message_key = chain_key.sender_message_key();
        let mut ciphertext = plaintext.to_vec();
        apply_keystream(message_key.cipher_key(), &nonce(&message_key), &mut ciphertext);

        let message = SenderKeyMessage::new(
            CIPHERTEXT_MESSAGE_CURRENT_VERSION,
            state.key_id(),
            message_key.iteration(),
            ciphertext,
            &signing_key,
        );
        state.set_sender_chain_key(chain_key.next()?);

        self.store.store_sender_key(&self.name, &record)?;
        Ok(message)
    }

    /// Verifies and decrypts a group message from the sender.
    ///
    /// # Errors
    /// `NoSession` for an unknown key id, `InvalidMessage` for a bad
    /// signature or a jump past the skip bound, `DuplicateMessage` for an
    /// iteration already consumed.
    pub fn decrypt(&mut self, message: &SenderKeyMessage) -> Result<Vec<u8>> {
        let mut record = self.load_record()?;
        let state = record
            .sender_key_state_by_id(message.key_id())
            .ok_or(Error::NoSession)?;

        message.verify_signature(state.signing_key_public())?;
        let message_key = sender_message_key(state, message.iteration())?;

        let mut plaintext = message.ciphertext().to_vec();
        apply_keystream(message_key.cipher_key(), &nonce(&message_key), &mut plaintext);

        self.store.store_sender_key(&self.name, &record)?;
        Ok(plaintext)
    }

    fn load_record(&self) -> Result<SenderKeyRecord> {
        self.store.load_sender_key(&self.name)?.ok_or_else(|| {
            tracing::warn!(name = %self.name, "no sender key record");
            Error::NoSession
        })
    }
}

fn nonce(key: &SenderMessageKey) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&key.iv()[..NONCE_SIZE]);
    nonce
}

/// Key for `iteration`, caching keys for any iterations skipped over.
fn sender_message_key(state: &mut SenderKeyState, iteration: u32) -> Result<SenderMessageKey> {
    let chain_key = state.sender_chain_key().clone();

    if chain_key.iteration() > iteration {
        return state
            .remove_sender_message_key(iteration)
            .ok_or(Error::DuplicateMessage {
                index: chain_key.iteration(),
                counter: iteration,
            });
    }

    if (iteration - chain_key.iteration()) as usize > MAX_FORWARD_JUMPS {
        return Err(Error::InvalidMessage("over 2000 messages into the future"));
    }

    let mut chain_key = chain_key;
    while chain_key.iteration() < iteration {
        state.add_sender_message_key(chain_key.sender_message_key());
        chain_key = chain_key.next()?;
    }
    state.set_sender_chain_key(chain_key.next()?);
    Ok(chain_key.sender_message_key())
}
