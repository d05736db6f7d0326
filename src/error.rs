//! Error types for StripedMap.

use thiserror::Error;

/// Result type alias for map operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the map.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The requested key is not stored in its target bucket.
    ///
    /// Returned by `delete` and `search`; `insert` never fails.
    #[error("key \"{0}\" not found")]
    KeyNotFound(String),

    /// A `MapConfig` violates the construction rules.
    #[error("invalid map configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns true if this is a `KeyNotFound` error.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }
}
