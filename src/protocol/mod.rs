//! Wire message codecs.
//!
//! Every message starts with a version byte, `(version << 4) | current`, and
//! continues with a protobuf body. `SignalMessage` appends an 8-byte truncated
//! MAC and `SenderKeyMessage` a 64-byte signature.

mod key_exchange;
mod sender_key;
mod signal_message;

pub use key_exchange::{KeyExchangeMessage, INITIATE_FLAG, RESPONSE_FLAG, SIMULTANEOUS_INITIATE_FLAG};
pub use sender_key::{SenderKeyDistributionMessage, SenderKeyMessage};
pub use signal_message::{PreKeySignalMessage, SignalMessage};

use crate::consts::CIPHERTEXT_MESSAGE_CURRENT_VERSION;
use crate::error::{Error, Result};
use crate::keys::PublicKey;

/// Type tags carried next to the ciphertext by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CiphertextMessageType {
    KeyExchange = 1,
    Whisper = 2,
    PreKey = 3,
    SenderKey = 4,
    SenderKeyDistribution = 5,
}

impl TryFrom<u8> for CiphertextMessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::KeyExchange),
            2 => Ok(Self::Whisper),
            3 => Ok(Self::PreKey),
            4 => Ok(Self::SenderKey),
            5 => Ok(Self::SenderKeyDistribution),
            _ => Err(Error::InvalidMessage("unknown message type")),
        }
    }
}

/// Any message this crate produces or consumes.
#[derive(Clone, Debug)]
pub enum CiphertextMessage {
    SignalMessage(SignalMessage),
    PreKeySignalMessage(PreKeySignalMessage),
    KeyExchangeMessage(KeyExchangeMessage),
    SenderKeyMessage(SenderKeyMessage),
    SenderKeyDistributionMessage(SenderKeyDistributionMessage),
}

impl CiphertextMessage {
    /// Parses `bytes` as the message kind named by `message_type`.
    pub fn parse(message_type: u8, bytes: &[u8]) -> Result<Self> {
        Ok(match CiphertextMessageType::try_from(message_type)? {
            CiphertextMessageType::KeyExchange => {
                Self::KeyExchangeMessage(KeyExchangeMessage::deserialize(bytes)?)
            }
            CiphertextMessageType::Whisper => Self::SignalMessage(SignalMessage::deserialize(bytes)?),
            CiphertextMessageType::PreKey => {
                Self::PreKeySignalMessage(PreKeySignalMessage::deserialize(bytes)?)
            }
            CiphertextMessageType::SenderKey => {
                Self::SenderKeyMessage(SenderKeyMessage::deserialize(bytes)?)
            }
            CiphertextMessageType::SenderKeyDistribution => {
                Self::SenderKeyDistributionMessage(SenderKeyDistributionMessage::deserialize(bytes)?)
            }
        })
    }

    #[must_use]
    pub fn message_type(&self) -> CiphertextMessageType {
        match self {
            Self::SignalMessage(_) => CiphertextMessageType::Whisper,
            Self::PreKeySignalMessage(_) => CiphertextMessageType::PreKey,
            Self::KeyExchangeMessage(_) => CiphertextMessageType::KeyExchange,
            Self::SenderKeyMessage(_) => CiphertextMessageType::SenderKey,
            Self::SenderKeyDistributionMessage(_) => CiphertextMessageType::SenderKeyDistribution,
        }
    }

    #[must_use]
    pub fn serialize(&self) -> &[u8] {
        match self {
            Self::SignalMessage(m) => m.serialized(),
            Self::PreKeySignalMessage(m) => m.serialized(),
            Self::KeyExchangeMessage(m) => m.serialized(),
            Self::SenderKeyMessage(m) => m.serialized(),
            Self::SenderKeyDistributionMessage(m) => m.serialized(),
        }
    }
}

pub(crate) fn version_byte(version: u8) -> u8 {
    (version << 4) | CIPHERTEXT_MESSAGE_CURRENT_VERSION
}

/// Splits off and checks the leading version byte.
pub(crate) fn split_version(bytes: &[u8]) -> Result<(u8, &[u8])> {
    let (&first, rest) = bytes
        .split_first()
        .ok_or(Error::InvalidMessage("empty message"))?;
    let version = first >> 4;
    if version < CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(Error::LegacyMessage(version));
    }
    if version > CIPHERTEXT_MESSAGE_CURRENT_VERSION {
        return Err(Error::InvalidVersion(version));
    }
    Ok((version, rest))
}

pub(crate) fn required<T>(field: Option<T>) -> Result<T> {
    field.ok_or(Error::InvalidMessage("incomplete message"))
}

pub(crate) fn required_key(field: Option<Vec<u8>>) -> Result<PublicKey> {
    PublicKey::decode_point(&required(field)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_checks() {
        assert_eq!(version_byte(3), 0x33);
        assert_eq!(split_version(&[0x33, 1, 2]).unwrap(), (3, &[1u8, 2][..]));
        assert_eq!(split_version(&[0x23, 1]), Err(Error::LegacyMessage(2)));
        assert_eq!(split_version(&[0x43, 1]), Err(Error::InvalidVersion(4)));
        assert!(matches!(split_version(&[]), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert_eq!(
            CiphertextMessage::parse(9, &[0x33]).unwrap_err(),
            Error::InvalidMessage("unknown message type")
        );
    }
}
