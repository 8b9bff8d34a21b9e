use thiserror::Error;

/// Failure taxonomy for engine operations.
///
/// Recoverable variants (`SourceUnreachable`, `CatalogMalformed`) leave the
/// previous cached state intact; install-aborting variants discard temp
/// artifacts for the current port only and never touch other ports.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source `{prefix}` unreachable: {reason}")]
    SourceUnreachable { prefix: String, reason: String },

    #[error("catalog from `{prefix}` is malformed: {reason}")]
    CatalogMalformed { prefix: String, reason: String },

    #[error("port `{0}` not found in any source")]
    PortNotFound(String),

    #[error("required runtime `{0}` is unavailable")]
    RuntimeUnavailable(String),

    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("checksum mismatch for {name} (expected {expected}, got {actual})")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("extraction of {name} failed: {reason}")]
    ExtractFailed { name: String, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl EngineError {
    /// Whether the caller may keep serving from previously cached state.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::SourceUnreachable { .. } | EngineError::CatalogMalformed { .. }
        )
    }
}
