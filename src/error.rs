use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that can go wrong between the first received byte and a
/// validated command. None of these are fatal: the codec resynchronizes and
/// the control cycle keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ProtocolError {
    #[error("byte 0x{found:02x} at end position, expected end sentinel")]
    BadEndSentinel { found: u8 },
    #[error("declared payload length {0} exceeds frame capacity")]
    LengthTooLarge(u8),
    #[error("checksum mismatch: computed 0x{computed:02x}, received 0x{received:02x}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("inter-byte timeout, partial frame discarded")]
    Timeout,
    #[error("receive buffer overflow")]
    Overflow,
    #[error("malformed text record")]
    Malformed,
    #[error("unknown command code 0x{0:02x}")]
    UnknownCommand(u8),
    #[error("command 0x{command:02x} expects {expected} payload bytes, got {received}")]
    PayloadLength {
        command: u8,
        expected: u8,
        received: u8,
    },
    #[error("command 0x{0:02x} carries an out-of-range value")]
    InvalidValue(u8),
    #[error("command 0x{0:02x} rejected while emergency stop is latched")]
    EmergencyLatched(u8),
    #[error("command 0x{0:02x} is not a legal transition from the current state")]
    IllegalTransition(u8),
}

/// Coarse buckets used by the link counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    Framing,
    Checksum,
    Schema,
    Rejected,
}

impl ProtocolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::BadEndSentinel { .. }
            | ProtocolError::LengthTooLarge(_)
            | ProtocolError::Timeout
            | ProtocolError::Overflow
            | ProtocolError::Malformed => ErrorClass::Framing,
            ProtocolError::ChecksumMismatch { .. } => ErrorClass::Checksum,
            ProtocolError::UnknownCommand(_)
            | ProtocolError::PayloadLength { .. }
            | ProtocolError::InvalidValue(_) => ErrorClass::Schema,
            ProtocolError::EmergencyLatched(_) | ProtocolError::IllegalTransition(_) => {
                ErrorClass::Rejected
            }
        }
    }

    /// Whether the sender gets a NACK for this error.
    ///
    /// A frame whose boundary is untrustworthy is dropped silently; answering
    /// it could interleave a reply with the one for the next good frame.
    pub fn warrants_nack(&self) -> bool {
        !matches!(
            self,
            ProtocolError::BadEndSentinel { .. }
                | ProtocolError::LengthTooLarge(_)
                | ProtocolError::Timeout
                | ProtocolError::Overflow
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link producer disconnected")]
    Disconnected,
}

/// Top-level error for the binaries.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
