#![no_main]

use axolotl_ratchet::keys::PublicKey;
use libfuzzer_sys::fuzz_target;

const SIGNATURE_LENGTH: usize = 64;

fuzz_target!(|data: &[u8]| {
    // Arbitrary keys and signatures must verify or fail, never panic
    if data.len() >= 32 + SIGNATURE_LENGTH {
        let public_bytes: [u8; 32] = data[0..32].try_into().unwrap();
        let signature = &data[32..32 + SIGNATURE_LENGTH];
        let message = &data[32 + SIGNATURE_LENGTH..];

        let public = PublicKey::from_bytes(public_bytes);
        let _ = public.verify_signature(message, signature);
    }

    // Serialized key decoding
    if data.len() >= 33 {
        let _ = PublicKey::decode_point(&data[..33]);
    }
});
