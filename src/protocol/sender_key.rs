use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use prost::Message;

use crate::crypto::KEY_SIZE_32;
use crate::error::{Error, Result};
use crate::proto;
use crate::protocol::{required, split_version, version_byte};

const SIGNATURE_LENGTH: usize = 64;

/// Group message encrypted under a sender key and signed by the sender (type 4).
#[derive(Clone, Debug)]
pub struct SenderKeyMessage {
    message_version: u8,
    key_id: u32,
    iteration: u32,
    ciphertext: Vec<u8>,
    serialized: Vec<u8>,
}

impl SenderKeyMessage {
    #[must_use]
    pub fn new(
        message_version: u8,
        key_id: u32,
        iteration: u32,
        ciphertext: Vec<u8>,
        signing_key: &SigningKey,
    ) -> Self {
        let body = proto::SenderKeyMessage {
            id: Some(key_id),
            iteration: Some(iteration),
            ciphertext: Some(ciphertext.clone()),
        };
        let mut serialized = Vec::with_capacity(1 + body.encoded_len() + SIGNATURE_LENGTH);
        serialized.push(version_byte(message_version));
        body.encode(&mut serialized)
            .expect("Vec<u8> grows to fit the encoded message");
        let signature = signing_key.sign(&serialized);
        serialized.extend_from_slice(&signature.to_bytes());

        Self {
            message_version,
            key_id,
            iteration,
            ciphertext,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 1 + SIGNATURE_LENGTH {
            return Err(Error::InvalidMessage("message too short"));
        }
        let (message_version, rest) = split_version(bytes)?;
        let body = proto::SenderKeyMessage::decode(&rest[..rest.len() - SIGNATURE_LENGTH])?;

        Ok(Self {
            message_version,
            key_id: required(body.id)?,
            iteration: required(body.iteration)?,
            ciphertext: required(body.ciphertext)?,
            serialized: bytes.to_vec(),
        })
    }

    /// Checks the trailing Ed25519 signature.
    pub fn verify_signature(&self, signing_key: &VerifyingKey) -> Result<()> {
        let (body, signature) = self
            .serialized
            .split_at(self.serialized.len() - SIGNATURE_LENGTH);
        let signature = Signature::from_slice(signature)?;
        signing_key
            .verify(body, &signature)
            .map_err(|_| Error::InvalidMessage("invalid sender key signature"))
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

/// Hands a sender's current chain and public signing key to a group member
/// (type 5).
#[derive(Clone, Debug)]
pub struct SenderKeyDistributionMessage {
    message_version: u8,
    key_id: u32,
    iteration: u32,
    chain_key: [u8; KEY_SIZE_32],
    signing_key: VerifyingKey,
    serialized: Vec<u8>,
}

impl SenderKeyDistributionMessage {
    #[must_use]
    pub fn new(
        message_version: u8,
        key_id: u32,
        iteration: u32,
        chain_key: [u8; KEY_SIZE_32],
        signing_key: VerifyingKey,
    ) -> Self {
        let body = proto::SenderKeyDistributionMessage {
            id: Some(key_id),
            iteration: Some(iteration),
            chain_key: Some(chain_key.to_vec()),
            signing_key: Some(signing_key.to_bytes().to_vec()),
        };
        let mut serialized = Vec::with_capacity(1 + body.encoded_len());
        serialized.push(version_byte(message_version));
        body.encode(&mut serialized)
            .expect("Vec<u8> grows to fit the encoded message");

        Self {
            message_version,
            key_id,
            iteration,
            chain_key,
            signing_key,
            serialized,
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let (message_version, rest) = split_version(bytes)?;
        let body = proto::SenderKeyDistributionMessage::decode(rest)?;

        let chain_key: [u8; KEY_SIZE_32] = required(body.chain_key)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidMessage("bad chain key length"))?;
        let signing_bytes: [u8; KEY_SIZE_32] = required(body.signing_key)?
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKey("bad signing key length"))?;
        let signing_key = VerifyingKey::from_bytes(&signing_bytes)
            .map_err(|_| Error::InvalidKey("bad signing key"))?;

        Ok(Self {
            message_version,
            key_id: required(body.id)?,
            iteration: required(body.iteration)?,
            chain_key,
            signing_key,
            serialized: bytes.to_vec(),
        })
    }

    #[must_use]
    pub fn message_version(&self) -> u8 {
        self.message_version
    }

    #[must_use]
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    #[must_use]
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    #[must_use]
    pub fn chain_key(&self) -> &[u8; KEY_SIZE_32] {
        &self.chain_key
    }

    #[must_use]
    pub fn signing_key(&self) -> &VerifyingKey {
        &self.signing_key
    }

    #[must_use]
    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_sender_key_message_signature() {
        let signing = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let message = SenderKeyMessage::new(3, 42, 7, b"group body".to_vec(), &signing);

        let parsed = SenderKeyMessage::deserialize(message.serialized()).unwrap();
        assert_eq!(parsed.key_id(), 42);
        assert_eq!(parsed.iteration(), 7);
        assert_eq!(parsed.ciphertext(), b"group body");
        parsed.verify_signature(&signing.verifying_key()).unwrap();
        assert!(parsed.verify_signature(&other.verifying_key()).is_err());

        let mut tampered = message.serialized().to_vec();
        tampered[3] ^= 0x01;
        if let Ok(parsed) = SenderKeyMessage::deserialize(&tampered) {
            assert!(parsed.verify_signature(&signing.verifying_key()).is_err());
        }
    }

    #[test]
    fn test_distribution_message_parse() {
        let signing = SigningKey::generate(&mut OsRng);
        let message = SenderKeyDistributionMessage::new(3, 11, 4, [9u8; 32], signing.verifying_key());

        let parsed = SenderKeyDistributionMessage::deserialize(message.serialized()).unwrap();
        assert_eq!(parsed.key_id(), 11);
        assert_eq!(parsed.iteration(), 4);
        assert_eq!(parsed.chain_key(), &[9u8; 32]);
        assert_eq!(parsed.signing_key(), &signing.verifying_key());
    }
}
