//! Error types for index operations.

/// Error type for index operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Filesystem failure (missing file, permission).
    Io(String),

    /// The underlying stream reader failed.
    Stream(String),

    /// A read that must land on a valid entry ran off the stream.
    InvalidData(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Stream(msg) => write!(f, "stream error: {}", msg),
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<ckmon::Error> for Error {
    fn from(err: ckmon::Error) -> Self {
        Error::Stream(err.to_string())
    }
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, Error>;
