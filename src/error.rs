//! Error types for the Axolotl session protocol.

use thiserror::Error;

/// Result type alias for session protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed or non-contributory curve point, or a bad key signature
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Referenced prekey or signed prekey is not in the store
    #[error("no prekey with id {0}")]
    InvalidKeyId(u32),

    /// Message failed to parse, authenticate or decrypt
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Message key for this counter was already consumed
    #[error("duplicate message: chain index {index}, counter {counter}")]
    DuplicateMessage {
        /// Current index of the receiving chain
        index: u32,
        /// Counter carried by the message
        counter: u32,
    },

    /// Message was produced by a pre-v3 implementation
    #[error("legacy message version {0}")]
    LegacyMessage(u8),

    /// Message version is newer than this implementation
    #[error("unknown message version {0}")]
    InvalidVersion(u8),

    /// No session exists for the remote address
    #[error("no session")]
    NoSession,

    /// Decryption failed under every stored session state
    #[error("no valid sessions ({} states tried)", .0.len())]
    NoValidSessions(Vec<Error>),

    /// Remote identity differs from the one previously trusted
    #[error("untrusted identity")]
    UntrustedIdentity,

    /// Key exchange response does not match any pending exchange
    #[error("stale key exchange")]
    StaleKeyExchange,

    /// Invalid signature detected
    #[error("invalid signature")]
    InvalidSignature,

    /// Persisted state could not be decoded or violates an invariant
    #[error("invalid session state: {0}")]
    InvalidSessionState(&'static str),

    /// Storage operation failed
    #[error("storage error")]
    StorageError,
}

impl Error {
    /// Returns true for errors in the invalid-message family.
    ///
    /// These are the failures that let decryption fall through to an older
    /// session state.
    #[must_use]
    pub fn is_invalid_message(&self) -> bool {
        matches!(self, Error::InvalidMessage(_) | Error::NoValidSessions(_))
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidSignature
    }
}

impl From<prost::DecodeError> for Error {
    fn from(_: prost::DecodeError) -> Self {
        Error::InvalidMessage("malformed protobuf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_message_family() {
        assert!(Error::InvalidMessage("bad mac").is_invalid_message());
        assert!(Error::NoValidSessions(vec![]).is_invalid_message());
        assert!(!Error::DuplicateMessage { index: 3, counter: 1 }.is_invalid_message());
        assert!(!Error::NoSession.is_invalid_message());
    }

    #[test]
    fn test_aggregate_display() {
        let err = Error::NoValidSessions(vec![
            Error::InvalidMessage("bad mac"),
            Error::InvalidMessage("bad mac"),
        ]);
        assert_eq!(err.to_string(), "no valid sessions (2 states tried)");
    }
}
