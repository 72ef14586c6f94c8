use std::path::PathBuf;

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// Error taxonomy for the core. Everything except [`CoreError::SyncFatal`]
/// is contained to the file it happened on: the sync pass records it and
/// keeps going.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The file could not be read as a knowledge document, or its
    /// frontmatter is structurally invalid.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// An I/O operation failed.
    #[error("file operation failed on {path}")]
    FileOperation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A caller asked for an identifier that does not resolve. Never
    /// recorded as a sync failure.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// An invariant that would corrupt the index was violated. Aborts the
    /// whole sync pass and bypasses the circuit breaker.
    #[error("sync aborted: {0}")]
    SyncFatal(String),
}

impl CoreError {
    pub fn parse(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CoreError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn file_op(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::FileOperation {
            path: path.into(),
            source,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        CoreError::SyncFatal(reason.into())
    }

    /// Whether this error must abort the sync pass instead of being
    /// recorded against the file that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::SyncFatal(_))
    }
}
