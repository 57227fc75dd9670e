//! Error types for codec operations.

use common::DeserializeError;

/// Error type for stream encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O failure while reading or writing a stream.
    Io(String),

    /// The stream does not start with the expected magic bytes.
    BadMagic,

    /// The stream version is outside the supported range.
    UnsupportedVersion(u8),

    /// Well-delimited but invalid data (bad discriminant, reserved bits set,
    /// malformed field).
    InvalidData(String),

    /// The input ended in the middle of an entry.
    UnexpectedEof(String),

    /// An entry that cannot be represented on the wire (for example a line
    /// without text).
    InvalidEntry(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::BadMagic => write!(f, "not a log stream: bad magic bytes"),
            Error::UnsupportedVersion(v) => write!(f, "unsupported stream version: {}", v),
            Error::InvalidData(msg) => write!(f, "invalid stream data: {}", msg),
            Error::UnexpectedEof(msg) => write!(f, "unexpected end of stream: {}", msg),
            Error::InvalidEntry(msg) => write!(f, "invalid entry: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEof(err.to_string())
        } else {
            Error::Io(err.to_string())
        }
    }
}

impl From<DeserializeError> for Error {
    fn from(err: DeserializeError) -> Self {
        if err.incomplete {
            Error::UnexpectedEof(err.message)
        } else {
            Error::InvalidData(err.message)
        }
    }
}

/// Result type alias for codec operations.
pub type Result<T> = std::result::Result<T, Error>;
