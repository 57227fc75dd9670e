//! Error types for pump operations.

/// Error type for operations on the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The pump is stopping or stopped; the operation was not performed.
    Stopped,

    /// No factory is registered for a handler configuration type.
    UnknownHandlerType(String),

    /// A registered factory rejected the configuration value.
    InvalidConfiguration(String),
}

impl std::error::Error for SinkError {}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Stopped => write!(f, "the sink is stopped"),
            SinkError::UnknownHandlerType(name) => {
                write!(f, "unknown handler configuration type: {}", name)
            }
            SinkError::InvalidConfiguration(msg) => {
                write!(f, "invalid handler configuration: {}", msg)
            }
        }
    }
}

/// Result type alias for pump operations.
pub type Result<T> = std::result::Result<T, SinkError>;
