//! Error types for `binsync-core`.

use thiserror::Error;

/// Errors produced by the binsync domain layer (State, Client, Controller).
#[derive(Debug, Error)]
pub enum CoreError {
    /// The project's binary fingerprint on disk does not match the one
    /// the caller opened the client with.
    #[error("fingerprint mismatch: repo was initialized for `{on_disk}`, got `{requested}`")]
    FingerprintMismatch {
        /// Fingerprint recorded in the repo's root metadata commit.
        on_disk: String,
        /// Fingerprint the caller supplied.
        requested: String,
    },

    /// A branch has no root metadata commit (`metadata.toml` missing).
    #[error("metadata not found for branch `{branch}`")]
    MetadataNotFound {
        /// The branch that was missing metadata.
        branch: String,
    },

    /// The requested user/branch does not exist in the repository.
    #[error("unknown user `{0}`")]
    UnknownUser(String),

    /// The repo has never been initialized for binsync (no fingerprint
    /// commit) and the caller did not ask to create one.
    #[error("repository not initialized for binsync")]
    NotInitialized,

    /// A state file failed to decode (malformed hex, missing field, etc.).
    #[error("malformed state file `{path}`: {reason}")]
    MalformedState {
        /// Path within the branch tree (e.g., `functions/00401000.toml`).
        path: String,
        /// What went wrong.
        reason: String,
    },

    /// A (de)serialization failure not tied to a specific file path.
    #[error("serialization error: {0}")]
    Serde(String),

    /// The underlying git layer failed.
    #[error("git error: {0}")]
    Git(#[from] binsync_git::GitError),

    /// A scheduled job's worker thread is gone (channel disconnected).
    #[error("scheduler is shut down")]
    SchedulerShutdown,

    /// A job explicitly failed; carries the job's own error message.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// An artifact dependency (e.g., a struct member's type) could not be
    /// resolved during import.
    #[error("unresolved dependency: {0}")]
    UnresolvedDependency(String),

    /// A pull or push round-trip with the remote failed.
    #[error("network failure talking to `{remote}`: {message}")]
    NetworkFailure {
        /// The remote name.
        remote: String,
        /// Details about the failure.
        message: String,
    },

    /// A setter/getter was called for an artifact kind or key the store
    /// has no record of. Not fatal — callers treat this as a miss.
    #[error("unsupported artifact: {0}")]
    UnsupportedArtifact(String),
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

impl From<toml::ser::Error> for CoreError {
    fn from(e: toml::ser::Error) -> Self {
        Self::Serde(e.to_string())
    }
}
