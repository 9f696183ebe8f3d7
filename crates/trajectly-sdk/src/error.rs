use std::fmt;

use trajectly_core::FixtureError;

use crate::sandbox::DeterminismViolation;

/// Result type for trajectly-sdk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the SDK layer
#[derive(Debug)]
pub enum Error {
    /// IO operation failed
    Io(std::io::Error),

    /// JSON encode/decode failed
    Json(serde_json::Error),

    /// Core trace/fixture layer error
    Core(trajectly_core::Error),

    /// Fixture replay failed (exhaustion or strict mismatch)
    Fixture(FixtureError),

    /// A determinism guard rejected a nondeterministic operation
    Determinism(DeterminismViolation),

    /// The network guard blocked an outbound connection
    NetworkBlocked(String),

    /// In-process contract quick-check rejected a call
    ContractRejected(String),

    /// Tool or LLM callable failed during record/permissive execution
    CallFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Core(err) => write!(f, "{}", err),
            Error::Fixture(err) => write!(f, "{}", err),
            Error::Determinism(violation) => write!(f, "{}", violation),
            Error::NetworkBlocked(msg) => write!(f, "{}", msg),
            Error::ContractRejected(msg) => write!(f, "{}", msg),
            Error::CallFailed(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Core(err) => Some(err),
            Error::Fixture(err) => Some(err),
            _ => None,
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

impl From<trajectly_core::Error> for Error {
    fn from(err: trajectly_core::Error) -> Self {
        Error::Core(err)
    }
}

impl From<FixtureError> for Error {
    fn from(err: FixtureError) -> Self {
        Error::Fixture(err)
    }
}

impl From<DeterminismViolation> for Error {
    fn from(err: DeterminismViolation) -> Self {
        Error::Determinism(err)
    }
}
