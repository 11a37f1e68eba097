//! Protocol limits and version constants.

/// Message format version produced and accepted by this crate.
pub const CIPHERTEXT_MESSAGE_CURRENT_VERSION: u8 = 3;

/// Skipped message keys kept per receiving chain.
pub const MAX_MESSAGE_KEYS: usize = 2000;

/// Largest counter gap a single message may skip ahead.
pub const MAX_FORWARD_JUMPS: usize = 2000;

/// Receiving chains kept per session state.
pub const MAX_RECEIVER_CHAINS: usize = 5;

/// Superseded session states kept per record.
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;

/// Sender key states kept per group sender.
pub const MAX_SENDER_KEY_STATES: usize = 5;

/// Prekey and signed prekey ids live in `[0, MEDIUM_MAX_VALUE]`.
pub const MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;

/// Type byte prefixed to serialized Curve25519 public keys.
pub const DJB_TYPE: u8 = 0x05;

/// Length of the truncated HMAC appended to a `SignalMessage`.
pub const MAC_LENGTH: usize = 8;
