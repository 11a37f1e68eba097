//! Prekeys, signed prekeys and the published prekey bundle.

use rand_core::CryptoRngCore;

use crate::consts::MEDIUM_MAX_VALUE;
use crate::error::{Error, Result};
use crate::keys::{IdentityKey, IdentityKeyPair, KeyPair, PublicKey};
use crate::xeddsa::SIGNATURE_LENGTH;

/// Registration ids are drawn from `[1, 16380]`.
const REGISTRATION_ID_RANGE: u32 = 16380;

/// Draws a random registration id for this install.
pub fn generate_registration_id<R: CryptoRngCore>(rng: &mut R) -> u32 {
    rng.next_u32() % REGISTRATION_ID_RANGE + 1
}

/// One-time prekey with its id.
#[derive(Clone, Debug)]
pub struct PreKeyRecord {
    id: u32,
    key_pair: KeyPair,
}

impl PreKeyRecord {
    #[must_use]
    pub fn new(id: u32, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }

    /// Generates `count` prekeys with consecutive ids starting at `start`.
    ///
    /// Ids wrap inside the Medium range and never take the value 0.
    pub fn generate_range<R: CryptoRngCore>(rng: &mut R, start: u32, count: u32) -> Vec<Self> {
        let start = start.wrapping_sub(1);
        (0..count)
            .map(|i| {
                let id = start.wrapping_add(i) % (MEDIUM_MAX_VALUE - 1) + 1;
                Self::new(id, KeyPair::generate(rng))
            })
            .collect()
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }
}

/// Medium-term prekey signed by the identity key.
#[derive(Clone, Debug)]
pub struct SignedPreKeyRecord {
    id: u32,
    timestamp: u64,
    key_pair: KeyPair,
    signature: [u8; SIGNATURE_LENGTH],
}

impl SignedPreKeyRecord {
    #[must_use]
    pub fn new(id: u32, timestamp: u64, key_pair: KeyPair, signature: [u8; SIGNATURE_LENGTH]) -> Self {
        Self {
            id,
            timestamp,
            key_pair,
            signature,
        }
    }

    /// Generates a signed prekey; the signature covers the serialized public key.
    pub fn generate<R: CryptoRngCore>(
        rng: &mut R,
        identity: &IdentityKeyPair,
        id: u32,
        timestamp: u64,
    ) -> Self {
        let key_pair = KeyPair::generate(rng);
        let signature = identity.sign(rng, &key_pair.public_key.serialize());
        Self::new(id % MEDIUM_MAX_VALUE, timestamp, key_pair, signature)
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    #[must_use]
    pub fn signature(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.signature
    }
}

/// Public keys a device publishes so that peers can start sessions offline.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(u32, PublicKey)>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key: PublicKey,
    pub signed_pre_key_signature: Option<Vec<u8>>,
    pub identity_key: IdentityKey,
}

impl PreKeyBundle {
    /// Builds the bundle for a local identity and prekey set.
    #[must_use]
    pub fn new(
        registration_id: u32,
        device_id: u32,
        pre_key: Option<&PreKeyRecord>,
        signed_pre_key: &SignedPreKeyRecord,
        identity_key: IdentityKey,
    ) -> Self {
        Self {
            registration_id,
            device_id,
            pre_key: pre_key.map(|k| (k.id(), k.key_pair().public_key)),
            signed_pre_key_id: signed_pre_key.id(),
            signed_pre_key: signed_pre_key.key_pair().public_key,
            signed_pre_key_signature: Some(signed_pre_key.signature().to_vec()),
            identity_key,
        }
    }

    /// Checks the signed prekey signature against the bundle identity.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` when the signature is missing or wrong.
    pub fn verify_signature(&self) -> Result<()> {
        let signature = self
            .signed_pre_key_signature
            .as_deref()
            .ok_or(Error::InvalidKey("no signed prekey signature"))?;
        self.identity_key
            .public_key()
            .verify_signature(&self.signed_pre_key.serialize(), signature)
            .map_err(|_| Error::InvalidKey("invalid signature on signed prekey"))
    }
}
