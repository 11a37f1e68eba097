//! Symmetric primitives: HKDF, HMAC-SHA256 and the ChaCha20 keystream.
//!
//! Message bodies are encrypted with a bare ChaCha20 stream and authenticated
//! by a separate truncated HMAC computed over the serialized message, so the
//! MAC also binds both identity keys and the version byte.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::consts::MAC_LENGTH;
use crate::keys::IdentityKey;

pub const KEY_SIZE_32: usize = 32;
pub const KEY_SIZE_64: usize = 64;
pub const IV_SIZE: usize = 16;
pub const NONCE_SIZE: usize = 12;

type HmacSha256 = Hmac<Sha256>;

/// HKDF-SHA256 extract-and-expand into `output`.
///
/// A missing salt means 32 zero bytes.
///
/// # Panics
///
/// Never panics in practice: callers request at most 80 bytes, far below the
/// 255 * 32 byte HKDF-SHA256 limit.
pub fn hkdf_derive(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], output: &mut [u8]) {
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);
    // SAFETY: output lengths used by this crate are always valid for HKDF-SHA256
    hkdf.expand(info, output)
        .expect("HKDF output length is always valid");
}

/// HMAC-SHA256 of `data` under `key`.
///
/// # Panics
///
/// Never panics in practice. HMAC-SHA256 accepts keys of any size.
#[must_use]
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; KEY_SIZE_32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Builds the 12-byte ChaCha20 nonce for a message.
///
/// Format: `nonce = counter (4 bytes, BE) || iv[0..8]`
///
/// Every message key is used once, so the nonce only needs to be unique
/// per key.
#[must_use]
pub fn generate_nonce(counter: u32, iv: &[u8; IV_SIZE]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..4].copy_from_slice(&counter.to_be_bytes());
    nonce[4..].copy_from_slice(&iv[..8]);
    nonce
}

/// XORs the ChaCha20 keystream into `buffer`. Encrypts and decrypts.
pub fn apply_keystream(key: &[u8; KEY_SIZE_32], nonce: &[u8; NONCE_SIZE], buffer: &mut [u8]) {
    let mut cipher = ChaCha20::new(Key::from_slice(key), Nonce::from_slice(nonce));
    cipher.apply_keystream(buffer);
}

/// Truncated MAC over `sender identity || receiver identity || serialized`.
#[must_use]
pub fn message_mac(
    mac_key: &[u8; KEY_SIZE_32],
    sender_identity: &IdentityKey,
    receiver_identity: &IdentityKey,
    serialized: &[u8],
) -> [u8; MAC_LENGTH] {
    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC-SHA256 accepts any key size");
    mac.update(&sender_identity.serialize());
    mac.update(&receiver_identity.serialize());
    mac.update(serialized);
    let full = mac.finalize().into_bytes();

    let mut truncated = [0u8; MAC_LENGTH];
    truncated.copy_from_slice(&full[..MAC_LENGTH]);
    truncated
}

/// Constant-time MAC comparison.
#[must_use]
pub fn macs_equal(expected: &[u8], received: &[u8]) -> bool {
    expected.len() == received.len() && bool::from(expected.ct_eq(received))
}
