//! Serialization utilities shared by the stream codec.

pub mod string;
pub mod varint;

/// Error type for deserialization failures.
///
/// `incomplete` distinguishes input that ended inside a value (truncation)
/// from input that is well-delimited but invalid (corruption). Stream readers
/// use the distinction to tell a torn file tail apart from bad data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeserializeError {
    pub message: String,
    pub incomplete: bool,
}

impl DeserializeError {
    /// Invalid but complete input.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            incomplete: false,
        }
    }

    /// Input ended inside a value.
    pub fn incomplete(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            incomplete: true,
        }
    }
}

impl std::error::Error for DeserializeError {}

impl std::fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for DeserializeError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            DeserializeError::incomplete("unexpected end of input")
        } else {
            DeserializeError::new(format!("read failure: {}", err))
        }
    }
}
