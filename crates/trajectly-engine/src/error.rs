use std::fmt;

/// Result type for trajectly-engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the engine layer. Rule evaluators return
/// findings rather than erroring; only precondition violations land here.
#[derive(Debug)]
pub enum Error {
    /// A caller-supplied argument violated a documented precondition
    InvalidArgument(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
