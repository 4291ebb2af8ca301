//! Git abstraction layer for binsync.
//!
//! This crate defines the [`GitRepo`] trait — the single interface through
//! which the rest of binsync interacts with git. No other binsync crate
//! should import gix directly; instead, they depend on `binsync-git` and
//! program against the trait.
//!
//! BinSync never checks out a working tree: every operation reads or writes
//! trees, blobs, commits, and refs directly, the way a user's branch
//! (`refs/heads/binsync/<user>`) is built and read without ever touching a
//! working directory. The trait reflects that — there is no
//! `checkout_tree`, `status`, or `stash` here.
//!
//! # Crate layout
//!
//! - [`repo`] — the [`GitRepo`] trait definition.
//! - [`types`] — value types used in trait signatures ([`GitOid`], [`RefName`],
//!   [`TreeEntry`], etc.).
//! - [`error`] — the [`GitError`] enum returned by all trait methods.
//! - [`gix_repo`] — the `gix`-backed implementation, [`GixRepo`].

mod config_impl;
pub mod error;
pub mod gix_repo;
mod objects_impl;
mod push_impl;
mod refs_impl;
pub mod repo;
pub mod types;

pub use error::GitError;
pub use gix_repo::GixRepo;
pub use repo::GitRepo;
pub use types::{
    CommitInfo, EntryMode, GitOid, OidParseError, RefEdit, RefName, RefNameError, TreeEdit,
    TreeEntry,
};
