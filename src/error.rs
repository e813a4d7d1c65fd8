use thiserror::Error;

/// Failures reported by a tag reader.
#[derive(Error, Debug)]
pub enum ReaderError {
    /// No reader at the requested location, or it is held by another process
    #[error("no reader found at {location}: {reason}")]
    DeviceNotFound { location: String, reason: String },

    /// A single scan failed; the next poll may succeed
    #[error("tag read failed: {0}")]
    Read(String),

    /// The reader's input ended and no further scans will arrive
    #[error("reader input closed")]
    Closed,
}

impl ReaderError {
    pub fn not_found(location: impl Into<String>, reason: impl Into<String>) -> Self {
        ReaderError::DeviceNotFound {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by the tag registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("invalid registry entry: {0}")]
    InvalidEntry(String),
}
