//! Error types for tcert parsing, fetching, and persistence

/// Errors from tcert collaborators.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tcert parse error: {0}")]
    Parse(String),

    #[error("authority fetch failed: {0}")]
    Fetch(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("tcert store error: {0}")]
    Persistence(String),
}

/// Result alias for tcert operations.
pub type Result<T> = std::result::Result<T, Error>;
