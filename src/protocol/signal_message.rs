use prost::Message;

use crate::consts::MAC_LENGTH;
use crate::crypto::{macs_equal, message_mac, KEY_SIZE_32};
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, PublicKey};
use crate::proto;
use crate::protocol::{required, required_key, split_version, version_byte};

/// Steady-state ratchet message (type 2).
#[derive(Clone, Debug)]
pub struct SignalMessage {
    message_version: u8,
    sender_ratchet_key: PublicKey,
    counter: u32,
    previous_counter: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SignalMessage {
    /// Builds and MACs a message.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        message_version: u8,
        mac_key: &[u8; KEY_SIZE_32],
        sender_ratchet_key: PublicKey,
        counter: u32,
        previous_counter: u32,
        ciphertext: Vec<u8>,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
    ) -> Self {
        let body = proto::SignalMessage {
            ratchet_key: Some(sender_ratchet_key.serialize().to_vec()),
            counter: Some(counter),
            previous_counter: Some(previous_counter),
            ciphertext: Some(ciphertext.clone()),
        };
        let mut serialized = Vec::with_capacity(1 + body.encoded_len() + MAC_LENGTH);
        serialized.push(version_byte(message_version));
        body.encode(&mut serialized)
            .expect("Vec<u8> grows to fit the encoded message");
        let mac = message_mac(mac_key, sender_identity, receiver_identity, &serialized);
        serialized.extend_from_slice(&mac);

        Self {
            message_version,
            sender_ratchet_key,
            counter,
            previous_counter,
            ciphertext,
            serialized,
        }
    }

    /// # Errors
    /// `LegacyMessage` / `InvalidVersion` for other versions, `InvalidMessage`
    /// for truncated or incomplete bodies, `InvalidKey` for a bad ratchet key.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 1 + MAC_LENGTH {
            return Err(Error::InvalidMessage("message too short"));
        }
        let (message_version, rest) = split_version(bytes)?;
        let body = proto::SignalMessage::decode(&rest[..rest.len() - MAC_LENGTH])?;

        Ok(Self {
            message_version,
            sender_ratchet_key: required_key(body.ratchet_key)?,
            counter: required(body.counter)?,
            previous_counter: body.previous_counter.unwrap_or(0),
            ciphertext: required(body.ciphertext)?,
            serialized: bytes.to_vec(),
        })
    }

    /// Checks the trailing MAC in constant time.
    #[must_use]
    pub fn verify_mac(
        &self,
        sender_identity: &IdentityKey,
        receiver_identity: &IdentityKey,
        mac_key: &[u8; KEY_SIZE_32],
    ) -> bool {
        let (body, their_mac) = self.serialized.split_at(self.serialized.len() - MAC_LENGTH);
        let our_mac = message_mac(mac_key, sender_identity, receiver_identity, body);
        macs_equal(&our_mac, their_mac)
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn sender_ratchet_key(&self) -> &PublicKey {
        &self.sender_ratchet_key
    }

    #[must_use]
    pub fn counter(&self) -> u32 {
        self.counter
    }

    #[must_use]
    pub fn previous_counter(&self) -> u32 {
        self.previous_counter
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.ciphertext
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// First messages of a session, carrying what the responder needs to run
/// X3DH (type 3).
#[derive(Clone, Debug)]
pub struct PreKeySignalMessage {
    message_version: u8,
    registration_id: u32,
    pre_key_id: Option<u32>,
    signed_pre_key_id: u32,
    base_key: PublicKey,
    identity_key: IdentityKey,
    message: SignalMessage,
    serialized: Vec<u8>,
}

impl PreKeySignalMessage {
    #[must_use]
    pub fn new(
        message_version: u8,
        registration_id: u32,
        pre_key_id: Option<u32>,
        signed_pre_key_id: u32,
        base_key: PublicKey,
        identity_key: IdentityKey,
        message: SignalMessage,
    ) -> Self {
        let body = proto::PreKeySignalMessage {
            pre_key_id,
            base_key: Some(base_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            message: Some(message.serialized().to_vec()),
            registration_id: Some(registration_id),
            signed_pre_key_id: Some(signed_pre_key_id),
        };
        let mut serialized = Vec::with_capacity(1 + body.encoded_len());
        serialized.push(version_byte(message_version));
        body.encode(&mut serialized)
            .expect("Vec<u8> grows to fit the encoded message");

        Self {
            message_version,
            registration_id,
            pre_key_id,
            signed_pre_key_id,
            base_key,
            identity_key,
            message,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (message_version, rest) = split_version(bytes)?;
        let body = proto::PreKeySignalMessage::decode(rest)?;

        Ok(Self {
            message_version,
            registration_id: body.registration_id.unwrap_or(0),
            pre_key_id: body.pre_key_id,
            signed_pre_key_id: required(body.signed_pre_key_id)?,
            base_key: required_key(body.base_key)?,
            identity_key: IdentityKey::decode(&required(body.identity_key)?)?,
            message: SignalMessage::deserialize(&required(body.message)?)?,
            serialized: bytes.to_vec(),
        })
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    #[must_use]
    pub fn pre_key_id(&self) -> Option<u32> {
        self.pre_key_id
    }

    #[must_use]
    pub fn signed_pre_key_id(&self) -> u32 {
        self.signed_pre_key_id
    }

    #[must_use]
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    #[must_use]
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    #[must_use]
    pub fn message(&self) -> &SignalMessage {
        &self.message
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{IdentityKeyPair, KeyPair};
    use rand_core::OsRng;

    fn sample(mac_key: &[u8; 32]) -> (SignalMessage, IdentityKey, IdentityKey) {
        let sender = *IdentityKeyPair::generate(&mut OsRng).identity_key();
        let receiver = *IdentityKeyPair::generate(&mut OsRng).identity_key();
        let ratchet = KeyPair::generate(&mut OsRng).public_key;
        let message = SignalMessage::new(3, mac_key, ratchet, 7, 2, b"ciphertext".to_vec(), &sender, &receiver);
        (message, sender, receiver)
    }

    #[test]
    fn test_signal_message_parse() {
        let mac_key = [4u8; 32];
        let (message, sender, receiver) = sample(&mac_key);
        assert_eq!(message.serialized()[0], 0x33);

        let parsed = SignalMessage::deserialize(message.serialized()).unwrap();
        assert_eq!(parsed.counter(), 7);
        assert_eq!(parsed.previous_counter(), 2);
        assert_eq!(parsed.body(), b"ciphertext");
        assert_eq!(parsed.sender_ratchet_key(), message.sender_ratchet_key());
        assert!(parsed.verify_mac(&sender, &receiver, &mac_key));
        assert!(!parsed.verify_mac(&receiver, &sender, &mac_key));
        assert!(!parsed.verify_mac(&sender, &receiver, &[5u8; 32]));
    }

    #[test]
    fn test_tampered_mac_detected() {
        let mac_key = [4u8; 32];
        let (message, sender, receiver) = sample(&mac_key);
        let mut bytes = message.serialized().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let parsed = SignalMessage::deserialize(&bytes).unwrap();
        assert!(!parsed.verify_mac(&sender, &receiver, &mac_key));
    }

    #[test]
    fn test_short_and_legacy_rejected() {
        assert!(matches!(
            SignalMessage::deserialize(&[0x33, 0, 0]),
            Err(Error::InvalidMessage(_))
        ));
        let mut legacy = vec![0x22];
        legacy.extend_from_slice(&[0u8; 16]);
        assert_eq!(SignalMessage::deserialize(&legacy).unwrap_err(), Error::LegacyMessage(2));
    }

    #[test]
    fn test_prekey_message_parse() {
        let mac_key = [4u8; 32];
        let (inner, sender, _) = sample(&mac_key);
        let base = KeyPair::generate(&mut OsRng).public_key;
        let message = PreKeySignalMessage::new(3, 1234, Some(31337), 22, base, sender, inner);

        let parsed = PreKeySignalMessage::deserialize(message.serialized()).unwrap();
        assert_eq!(parsed.registration_id(), 1234);
        assert_eq!(parsed.pre_key_id(), Some(31337));
        assert_eq!(parsed.signed_pre_key_id(), 22);
        assert_eq!(parsed.base_key(), &base);
        assert_eq!(parsed.identity_key(), &sender);
        assert_eq!(parsed.message().counter(), 7);
    }

    #[test]
    fn test_prekey_message_missing_fields() {
        let body = proto::PreKeySignalMessage {
            registration_id: Some(1),
            ..Default::default()
        };
        let mut bytes = vec![0x33];
        bytes.extend_from_slice(&body.encode_to_vec());
        assert_eq!(
            PreKeySignalMessage::deserialize(&bytes).unwrap_err(),
            Error::InvalidMessage("incomplete message")
        );
    }
}
