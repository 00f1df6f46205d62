//! Error types for pool operations

/// Errors from pool operations.
///
/// Collaborator failures (parse, fetch, persistence) never surface here: the
/// pool logs them and heals on the next refill cycle.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tcert pool empty: no tcert available after {attempts} attempts ({waited_secs}s)")]
    EmptyPool { attempts: u32, waited_secs: u64 },

    #[error("tcert pool already running")]
    AlreadyRunning,

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
