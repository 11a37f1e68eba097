//! XEdDSA signatures over Curve25519 identity keys.
//!
//! Lets an X25519 identity key sign signed prekeys and key exchange base keys
//! without a second Ed25519 keypair. Follows "The XEdDSA and VXEdDSA Signature
//! Schemes" (Perrin, 2016): the Edwards public key is always taken with sign
//! bit zero, and the private scalar is negated when needed to match it.

use crate::error::{Error, Result};
use crate::keys::PublicKey;
use curve25519_dalek::{
    constants::ED25519_BASEPOINT_TABLE,
    edwards::{CompressedEdwardsY, EdwardsPoint},
    montgomery::MontgomeryPoint,
    scalar::Scalar,
};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XEdDSA signature: 64 bytes (R point + s scalar)
pub const SIGNATURE_LENGTH: usize = 64;

#[derive(Zeroize, ZeroizeOnDrop)]
struct SigningScalar {
    /// Ed25519 private scalar, sign-adjusted so that A has sign bit 0
    a: Scalar,
    #[zeroize(skip)]
    public: CompressedEdwardsY,
}

impl SigningScalar {
    fn from_x25519(k_bytes: &[u8; 32]) -> Self {
        let mut clamped = *k_bytes;
        clamped[0] &= 248;
        clamped[31] &= 127;
        clamped[31] |= 64;
        let k = Scalar::from_bytes_mod_order(clamped);
        clamped.zeroize();

        let e = (&k * ED25519_BASEPOINT_TABLE).compress();
        let a = if e.as_bytes()[31] & 0x80 == 0 { k } else { -k };
        let public = (&a * ED25519_BASEPOINT_TABLE).compress();
        Self { a, public }
    }
}

fn wide_scalar(hasher: Sha512) -> Scalar {
    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hasher.finalize());
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    scalar
}

/// h = hash(R || A || M) mod q
fn challenge(r: &CompressedEdwardsY, a: &CompressedEdwardsY, message: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(r.as_bytes());
    hasher.update(a.as_bytes());
    hasher.update(message);
    wide_scalar(hasher)
}

/// Maps a Montgomery u-coordinate to the Edwards point with sign bit 0.
fn edwards_from_montgomery(public: &PublicKey) -> Result<CompressedEdwardsY> {
    let mut u = *public.as_bytes();
    u[31] &= 0x7F;
    let edwards = MontgomeryPoint(u)
        .to_edwards(0)
        .ok_or(Error::InvalidKey("not a curve point"))?;
    Ok(edwards.compress())
}

/// Signs `message` with the X25519 private key `k_bytes`.
///
/// `random` must be 64 fresh random bytes.
pub(crate) fn sign(k_bytes: &[u8; 32], message: &[u8], random: &[u8; 64]) -> [u8; SIGNATURE_LENGTH] {
    let key = SigningScalar::from_x25519(k_bytes);

    // r = hash1(a || M || Z) mod q, hash1 prefixed with 0xFE || 0xFF^31
    let mut hasher = Sha512::new();
    hasher.update([0xFE]);
    hasher.update([0xFF; 31]);
    hasher.update(key.a.as_bytes());
    hasher.update(message);
    hasher.update(random);
    let r = wide_scalar(hasher);

    let r_point = (&r * ED25519_BASEPOINT_TABLE).compress();
    let h = challenge(&r_point, &key.public, message);
    let s = r + h * key.a;

    let mut signature = [0u8; SIGNATURE_LENGTH];
    signature[..32].copy_from_slice(r_point.as_bytes());
    signature[32..].copy_from_slice(s.as_bytes());
    signature
}

/// Verifies an XEdDSA signature against an X25519 public key.
pub(crate) fn verify(
    public: &PublicKey,
    message: &[u8],
    signature: &[u8; SIGNATURE_LENGTH],
) -> Result<()> {
    let a_compressed = edwards_from_montgomery(public)?;
    let a_point = a_compressed
        .decompress()
        .ok_or(Error::InvalidKey("not a curve point"))?;
    if !a_point.is_torsion_free() {
        return Err(Error::InvalidKey("small order identity key"));
    }

    let mut r_bytes = [0u8; 32];
    let mut s_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&signature[..32]);
    s_bytes.copy_from_slice(&signature[32..]);

    // s must be below 2^253
    if s_bytes[31] & 0xE0 != 0 {
        return Err(Error::InvalidSignature);
    }
    let r_compressed = CompressedEdwardsY(r_bytes);
    r_compressed.decompress().ok_or(Error::InvalidSignature)?;

    let s = Scalar::from_bytes_mod_order(s_bytes);
    let h = challenge(&r_compressed, &a_compressed, message);

    // R' = sB - hA
    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &-a_point, &s);
    if r_check.compress().as_bytes().ct_eq(&r_bytes).into() {
        Ok(())
    } else {
        Err(Error::InvalidSignature)
    }
}
