//! Fuzz target for persisted record decoding
//!
//! Corrupt storage must surface as an error, never as a panic later on

#![no_main]

use axolotl_ratchet::{SenderKeyRecord, SessionRecord};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = SessionRecord::deserialize(data) {
        let reencoded = record.serialize();
        SessionRecord::deserialize(&reencoded).expect("re-encoded record should decode");
    }

    if let Ok(record) = SenderKeyRecord::deserialize(data) {
        let _ = record.sender_key_state();
        SenderKeyRecord::deserialize(&record.serialize()).expect("re-encoded record should decode");
    }
});
