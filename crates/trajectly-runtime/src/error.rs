use std::fmt;

/// Result type for trajectly-runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the runtime layer
#[derive(Debug)]
pub enum Error {
    /// Core trace/fixture layer error
    Core(trajectly_core::Error),

    /// Engine precondition error
    Engine(trajectly_engine::Error),

    /// Types/schema validation error
    Types(trajectly_types::Error),

    /// IO operation failed
    Io(std::io::Error),

    /// JSON encode/decode failed
    Json(serde_json::Error),

    /// Workspace configuration error
    Config(String),

    /// Spec resolution failed (missing target, bad extends chain)
    Spec(String),

    /// Invalid operation or state
    InvalidOperation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Core(err) => write!(f, "{}", err),
            Error::Engine(err) => write!(f, "{}", err),
            Error::Types(err) => write!(f, "{}", err),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
            Error::Spec(msg) => write!(f, "Spec error: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Core(err) => Some(err),
            Error::Engine(err) => Some(err),
            Error::Types(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Config(_) | Error::Spec(_) | Error::InvalidOperation(_) => None,
        }
    }
}

impl From<trajectly_core::Error> for Error {
    fn from(err: trajectly_core::Error) -> Self {
        Error::Core(err)
    }
}

impl From<trajectly_engine::Error> for Error {
    fn from(err: trajectly_engine::Error) -> Self {
        Error::Engine(err)
    }
}

impl From<trajectly_types::Error> for Error {
    fn from(err: trajectly_types::Error) -> Self {
        Error::Types(err)
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

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
