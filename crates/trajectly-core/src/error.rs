use std::fmt;

/// Result type for trajectly-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the core I/O layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// JSON encode/decode failed
    Json(serde_json::Error),

    /// Schema validation failed (types layer)
    Types(trajectly_types::Error),

    /// Event stream violated an ordering invariant
    Sequence(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Types(err) => write!(f, "{}", err),
            Error::Sequence(msg) => write!(f, "Sequence error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Types(err) => Some(err),
            Error::Sequence(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<trajectly_types::Error> for Error {
    fn from(err: trajectly_types::Error) -> Self {
        Error::Types(err)
    }
}
