use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong in the codec, the configuration decoder or
/// the entry point itself. Collisions and cleared collisions are not errors;
/// they are [`crate::hal::PollEvent`] variants looped on during protocol
/// activation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unsupported transaction type {0:#04x}")]
    UnsupportedTransactionType(u8),

    #[error("unsupported currency code {:02X}{:02X}", .0[0], .0[1])]
    UnsupportedCurrencyCode([u8; 2]),

    /// Transmission, protocol or timeout failure reported by the RF layer.
    #[error("RF communication error")]
    RfCommunication,

    #[error("card protocol error: {0}")]
    CardProtocol(&'static str),

    #[error("buffer overflow")]
    Overflow,

    #[error("configuration syntax error: {0}")]
    Syntax(&'static str),

    #[error("no kernel registered for id {0}")]
    NoKernel(String),

    #[error("invalid argument: {0}")]
    InvalidArg(&'static str),

    #[error("tag number too large")]
    TagNumberTooLarge,

    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("indefinite lengths are not supported")]
    IndefiniteLengthNotSupported,

    #[error("value length too large for this platform")]
    ValueLengthTooLarge,

    #[error("value out of range")]
    ValueOutOfRange,
}
