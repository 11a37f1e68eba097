//! Fuzz target for wire message parsing
//!
//! Arbitrary bytes under every type tag must parse or fail, never panic

#![no_main]

use axolotl_ratchet::CiphertextMessage;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&tag, body)) = data.split_first() else {
        return;
    };

    if let Ok(message) = CiphertextMessage::parse(tag % 6, body) {
        // Parsed messages keep their exact bytes
        assert_eq!(message.serialize(), body);
        assert_eq!(message.message_type() as u8, tag % 6);
    }
});
