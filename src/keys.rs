//! Curve25519 key types with memory safety guarantees.
//!
//! Public keys travel in the 33-byte DJB encoding (type byte `0x05` followed
//! by the Montgomery u-coordinate). Identity keys double as signing keys via
//! XEdDSA, so a single X25519 keypair both agrees and signs.

use crate::{
    consts::DJB_TYPE,
    crypto::KEY_SIZE_32,
    error::{Error, Result},
    xeddsa::{self, SIGNATURE_LENGTH},
};
use rand_core::CryptoRngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 public key (32 bytes, 33 when serialized)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE_32]);

impl PublicKey {
    /// Size of the raw u-coordinate in bytes
    pub const SIZE: usize = KEY_SIZE_32;
    /// Size of the type-prefixed encoding in bytes
    pub const SERIALIZED_SIZE: usize = KEY_SIZE_32 + 1;

    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }

    /// Encodes the key with its DJB type prefix.
    #[must_use]
    pub fn serialize(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut out = [0u8; Self::SERIALIZED_SIZE];
        out[0] = DJB_TYPE;
        out[1..].copy_from_slice(&self.0);
        out
    }

    /// Decodes a type-prefixed public key.
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` for an empty buffer, an unknown type byte,
    /// or a wrong length.
    pub fn decode_point(bytes: &[u8]) -> Result<Self> {
        let (&key_type, point) = bytes.split_first().ok_or(Error::InvalidKey("no key type"))?;
        if key_type != DJB_TYPE {
            return Err(Error::InvalidKey("unknown key type"));
        }
        let point: [u8; KEY_SIZE_32] = point
            .try_into()
            .map_err(|_| Error::InvalidKey("bad key length"))?;
        Ok(Self(point))
    }

    /// Verifies an XEdDSA signature made by the matching secret key.
    pub fn verify_signature(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature: &[u8; SIGNATURE_LENGTH] = signature
            .try_into()
            .map_err(|_| Error::InvalidSignature)?;
        xeddsa::verify(self, message, signature)
    }

    /// Convert to X25519 public key
    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..4]))
    }
}

impl From<X25519PublicKey> for PublicKey {
    fn from(pk: X25519PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

impl From<&StaticSecret> for PublicKey {
    fn from(secret: &StaticSecret) -> Self {
        PublicKey::from(X25519PublicKey::from(secret))
    }
}

/// X25519 secret key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret key
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self(StaticSecret::random_from_rng(rng))
    }

    /// Create from raw bytes (must be 32 bytes)
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE_32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Get the corresponding public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.0)
    }

    /// Perform Diffie-Hellman key agreement
    ///
    /// # Errors
    /// Returns `Error::InvalidKey` when the peer key is a low-order point and
    /// the shared secret would be all zeros.
    pub fn diffie_hellman(&self, public: &PublicKey) -> Result<DhOutput> {
        let shared = self.0.diffie_hellman(&public.to_x25519());
        if !shared.was_contributory() {
            return Err(Error::InvalidKey("non-contributory agreement"));
        }
        Ok(DhOutput(*shared.as_bytes()))
    }

    /// Signs `message` with XEdDSA.
    pub fn sign<R: CryptoRngCore>(&self, rng: &mut R, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        let mut random = [0u8; 64];
        rng.fill_bytes(&mut random);
        let signature = xeddsa::sign(self.as_bytes(), message, &random);
        random.zeroize();
        signature
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        self.0.as_bytes()
    }

    /// Raw secret bytes, for callers that persist keys themselves.
    #[cfg(feature = "expose-secrets")]
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_SIZE_32] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// Output of Diffie-Hellman operation (32 bytes)
/// Automatically zeroized on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DhOutput([u8; KEY_SIZE_32]);

impl DhOutput {
    /// Returns a byte slice of the Diffie-Hellman operation output
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE_32] {
        &self.0
    }
}

impl std::fmt::Debug for DhOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DhOutput([REDACTED])")
    }
}

/// Ephemeral or medium-term Curve25519 keypair
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub public_key: PublicKey,
    pub secret_key: SecretKey,
}

impl KeyPair {
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self::from_secret(SecretKey::generate(rng))
    }

    #[must_use]
    pub fn from_secret(secret_key: SecretKey) -> Self {
        Self {
            public_key: secret_key.public_key(),
            secret_key,
        }
    }

    /// Agreement between our secret half and `their_key`.
    pub fn calculate_agreement(&self, their_key: &PublicKey) -> Result<DhOutput> {
        self.secret_key.diffie_hellman(their_key)
    }
}

/// Long-term public identity of a device
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IdentityKey(PublicKey);

impl IdentityKey {
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self(public_key)
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.0
    }

    #[must_use]
    pub fn serialize(&self) -> [u8; PublicKey::SERIALIZED_SIZE] {
        self.0.serialize()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        PublicKey::decode_point(bytes).map(Self)
    }
}

impl From<PublicKey> for IdentityKey {
    fn from(public_key: PublicKey) -> Self {
        Self(public_key)
    }
}

/// Identity keypair: agrees in X3DH and signs prekeys via XEdDSA
#[derive(Clone)]
pub struct IdentityKeyPair {
    identity_key: IdentityKey,
    secret_key: SecretKey,
}

impl IdentityKeyPair {
    /// Generate a new identity key pair
    pub fn generate<R: CryptoRngCore>(rng: &mut R) -> Self {
        Self::from_secret(SecretKey::generate(rng))
    }

    #[must_use]
    pub fn from_secret(secret_key: SecretKey) -> Self {
        Self {
            identity_key: IdentityKey(secret_key.public_key()),
            secret_key,
        }
    }

    /// Get the public identity key
    #[must_use]
    pub fn identity_key(&self) -> &IdentityKey {
        &self.identity_key
    }

    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.identity_key.public_key()
    }

    #[must_use]
    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn sign<R: CryptoRngCore>(&self, rng: &mut R, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.secret_key.sign(rng, message)
    }

    /// View as a plain keypair for agreement.
    #[must_use]
    pub fn to_key_pair(&self) -> KeyPair {
        KeyPair {
            public_key: *self.public_key(),
            secret_key: self.secret_key.clone(),
        }
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityKeyPair {{ identity_key: {:?} }}", self.identity_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_diffie_hellman() {
        let alice = KeyPair::generate(&mut OsRng);
        let bob = KeyPair::generate(&mut OsRng);

        let shared1 = alice.calculate_agreement(&bob.public_key).unwrap();
        let shared2 = bob.calculate_agreement(&alice.public_key).unwrap();

        assert_eq!(shared1.as_bytes(), shared2.as_bytes());
    }

    #[test]
    fn test_low_order_point_rejected() {
        let alice = SecretKey::generate(&mut OsRng);
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert_eq!(
            alice.diffie_hellman(&zero).unwrap_err(),
            Error::InvalidKey("non-contributory agreement")
        );
    }

    #[test]
    fn test_serialize_decode_point() {
        let key = SecretKey::generate(&mut OsRng).public_key();
        let encoded = key.serialize();
        assert_eq!(encoded[0], DJB_TYPE);
        assert_eq!(PublicKey::decode_point(&encoded).unwrap(), key);
    }

    #[test]
    fn test_decode_point_rejects_bad_input() {
        let key = SecretKey::generate(&mut OsRng).public_key();
        let mut encoded = key.serialize();

        assert!(PublicKey::decode_point(&[]).is_err());
        assert!(PublicKey::decode_point(&encoded[..32]).is_err());

        encoded[0] = 0x04;
        assert_eq!(
            PublicKey::decode_point(&encoded).unwrap_err(),
            Error::InvalidKey("unknown key type")
        );
    }

    #[test]
    fn test_identity_signing() {
        let identity = IdentityKeyPair::generate(&mut OsRng);
        let message = b"signed prekey bytes";
        let signature = identity.sign(&mut OsRng, message);

        identity
            .public_key()
            .verify_signature(message, &signature)
            .expect("signature should verify");
        assert!(identity
            .public_key()
            .verify_signature(b"wrong message", &signature)
            .is_err());
        assert!(identity
            .public_key()
            .verify_signature(message, &signature[..63])
            .is_err());
    }
}
