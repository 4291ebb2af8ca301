//! binsync library crate — the Controller, decompiler collaborator
//! boundary, config, error, and telemetry layers shared by the CLI binary
//! and integration tests.
//!
//! Artifact modeling, the git-backed store, and the scheduler live in the
//! `binsync-core`/`binsync-git` workspace members; this crate is the
//! decompiler-facing layer built on top of them.

pub mod config;
pub mod controller;
pub mod decompiler;
pub mod error;
pub mod telemetry;

pub use controller::{Controller, FillOptions, PushOptions, SyncControlStatus};
pub use decompiler::{DecompilerInterface, MemoryDecompiler};
pub use error::BinSyncError;
