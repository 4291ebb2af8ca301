//! Core domain logic for binsync: the artifact model, per-user state,
//! the git-backed client, and the background job scheduler.
//!
//! This crate knows nothing about any particular decompiler. It depends
//! only on [`binsync_git`] for repository access; the decompiler-facing
//! collaborator types (`DecompilerInterface`, `Controller`, the CLI) live
//! in the top-level `binsync` crate.

pub mod artifact;
pub mod client;
pub mod error;
pub mod format;
pub mod lift;
pub mod scheduler;
pub mod state;

pub use artifact::{Artifact, ArtifactKey, ArtifactType};
pub use client::Client;
pub use error::CoreError;
pub use lift::{ArtLifter, NullLifter};
pub use scheduler::{Job, Priority, Scheduler};
pub use state::State;
