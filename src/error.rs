//! Workspace error types for binsync.
//!
//! Defines [`BinSyncError`], the unified error type for the CLI and
//! `Controller` layer. Wraps [`binsync_core::CoreError`] for anything that
//! originates below the Controller, and adds the Controller-level error
//! kinds from the collaborator/config surface.

use thiserror::Error;

/// Unified error type for binsync's Controller and CLI layer.
#[derive(Debug, Error)]
pub enum BinSyncError {
    /// A store operation was attempted before `connect` succeeded.
    #[error("not connected to a binsync repository")]
    NotConnected,

    /// A referenced user-defined type could not be imported (struct absent
    /// everywhere it was looked for). Non-fatal — the caller proceeds
    /// without the import.
    #[error("failed to import type `{type_name}`: {reason}")]
    TypeImportFailure {
        /// The type name that failed to resolve.
        type_name: String,
        /// Why it failed.
        reason: String,
    },

    /// An exception was raised inside the locked decompiler-write block
    /// during a fill. The fill itself returns `false`; this variant exists
    /// for callers that want the underlying reason.
    #[error("fill failed for artifact `{artifact}`: {reason}")]
    FillException {
        /// A description of the artifact being filled.
        artifact: String,
        /// Why the fill failed.
        reason: String,
    },

    /// `ProjectConfig` could not be loaded. Per §7, this is non-fatal at
    /// the call site (defaults are used and a warning logged), but is
    /// still surfaced as a typed error for callers that want to know.
    #[error("config error: {0}")]
    Config(String),

    /// Everything below the Controller: git plumbing, state (de)serialization,
    /// the scheduler, fingerprinting.
    #[error(transparent)]
    Core(#[from] binsync_core::CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_connected_message() {
        assert_eq!(
            BinSyncError::NotConnected.to_string(),
            "not connected to a binsync repository"
        );
    }

    #[test]
    fn core_error_wraps_transparently() {
        let core = binsync_core::CoreError::UnknownUser("alice".to_owned());
        let err: BinSyncError = core.into();
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn type_import_failure_message() {
        let err = BinSyncError::TypeImportFailure {
            type_name: "my_struct_t".to_owned(),
            reason: "not found on any branch".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("my_struct_t"));
        assert!(msg.contains("not found on any branch"));
    }
}
