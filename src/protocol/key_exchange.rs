use prost::Message;

use crate::error::{Error, Result};
use crate::keys::{IdentityKey, PublicKey};
use crate::proto;
use crate::protocol::{required, required_key, split_version, version_byte};
use crate::xeddsa::SIGNATURE_LENGTH;

pub const INITIATE_FLAG: u32 = 0x01;
pub const RESPONSE_FLAG: u32 = 0x02;
pub const SIMULTANEOUS_INITIATE_FLAG: u32 = 0x04;

const FLAG_BITS: u32 = 5;

/// Legacy interactive key exchange (type 1).
///
/// The protobuf `id` packs `(sequence << 5) | flags`.
#[derive(Clone, Debug)]
pub struct KeyExchangeMessage {
    version: u8,
    sequence: u32,
    flags: u32,
    base_key: PublicKey,
    base_key_signature: [u8; SIGNATURE_LENGTH],
    ratchet_key: PublicKey,
    identity_key: IdentityKey,
    serialized: Vec<u8>,
}

impl KeyExchangeMessage {
    #[must_use]
    pub fn new(
        version: u8,
        sequence: u32,
        flags: u32,
        base_key: PublicKey,
        base_key_signature: [u8; SIGNATURE_LENGTH],
        ratchet_key: PublicKey,
        identity_key: IdentityKey,
    ) -> Self {
        let body = proto::KeyExchangeMessage {
            id: Some((sequence << FLAG_BITS) | flags),
            base_key: Some(base_key.serialize().to_vec()),
            ratchet_key: Some(ratchet_key.serialize().to_vec()),
            identity_key: Some(identity_key.serialize().to_vec()),
            base_key_signature: Some(base_key_signature.to_vec()),
        };
        let mut serialized = Vec::with_capacity(1 + body.encoded_len());
        serialized.push(version_byte(version));
        body.encode(&mut serialized)
            .expect("Vec<u8> grows to fit the encoded message");

        Self {
            version,
            sequence,
            flags,
            base_key,
            base_key_signature,
            ratchet_key,
            identity_key,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (version, rest) = split_version(bytes)?;
        let body = proto::KeyExchangeMessage::decode(rest)?;

        let id = required(body.id)?;
        let base_key_signature: [u8; SIGNATURE_LENGTH] = required(body.base_key_signature)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidMessage("bad base key signature length"))?;

        Ok(Self {
            version,
            sequence: id >> FLAG_BITS,
            flags: id & ((1 << FLAG_BITS) - 1),
            base_key: required_key(body.base_key)?,
            base_key_signature,
            ratchet_key: required_key(body.ratchet_key)?,
            identity_key: IdentityKey::decode(&required(body.identity_key)?)?,
            serialized: bytes.to_vec(),
        })
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[must_use]
    pub fn is_initiate(&self) -> bool {
        self.flags & INITIATE_FLAG != 0
    }

    #[must_use]
    pub fn is_response(&self) -> bool {
        self.flags & RESPONSE_FLAG != 0
    }

    #[must_use]
    pub fn is_response_for_simultaneous_initiate(&self) -> bool {
        self.flags & SIMULTANEOUS_INITIATE_FLAG != 0
    }

    #[must_use]
    pub fn base_key(&self) -> &PublicKey {
        &self.base_key
    }

    #[must_use]
    pub fn base_key_signature(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.base_key_signature
    }

    #[must_use]
    pub fn ratchet_key(&self) -> &PublicKey {
        &self.ratchet_key
    }

    #[must_use]
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
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

    #[test]
    fn test_id_packing() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let base = KeyPair::generate(&mut OsRng);
        let ratchet = KeyPair::generate(&mut OsRng).public_key;
        let signature = identity.sign(&mut OsRng, &base.public_key.serialize());

        let message = KeyExchangeMessage::new(
            3,
            65_533,
            RESPONSE_FLAG | SIMULTANEOUS_INITIATE_FLAG,
            base.public_key,
            signature,
            ratchet,
            *identity.identity_key(),
        );
        let parsed = KeyExchangeMessage::deserialize(message.serialized()).unwrap();

        assert_eq!(parsed.sequence(), 65_533);
        assert!(parsed.is_response());
        assert!(parsed.is_response_for_simultaneous_initiate());
        assert!(!parsed.is_initiate());
        assert_eq!(parsed.base_key(), &base.public_key);
        assert_eq!(parsed.ratchet_key(), &ratchet);
        assert_eq!(parsed.base_key_signature(), &signature);
    }

    #[test]
    fn test_missing_signature_rejected() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let key = KeyPair::generate(&mut OsRng).public_key.serialize().to_vec();
        let body = proto::KeyExchangeMessage {
            id: Some((7 << FLAG_BITS) | INITIATE_FLAG),
            base_key: Some(key.clone()),
            ratchet_key: Some(key),
            identity_key: Some(identity.identity_key().serialize().to_vec()),
            base_key_signature: None,
        };
        let mut bytes = vec![0x33];
        bytes.extend_from_slice(&body.encode_to_vec());

        assert_eq!(
            KeyExchangeMessage::deserialize(&bytes).unwrap_err(),
            Error::InvalidMessage("incomplete message")
        );
    }
}
