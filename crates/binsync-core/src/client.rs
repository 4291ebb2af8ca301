//! The git-backed store (§4.B): per-user branches, a `(branch, commit)`
//! keyed state cache, and the pull → commit → push update cycle.
//!
//! binsync never checks out a working tree. Each user's state lives
//! entirely as commits on `refs/heads/binsync/<user>`; `Client` builds and
//! reads those commits directly through [`GitRepo`] blob/tree/commit
//! primitives.
//!
//! `Client` itself is synchronous — every method here blocks the calling
//! thread on git I/O. Scheduling onto a background worker (so pulls and
//! pushes don't block the decompiler's UI thread) is the Controller's job,
//! not the store's: the Controller owns the [`Scheduler`](crate::scheduler::Scheduler)
//! instances and wraps calls into `Client` as jobs at the priority the
//! caller asked for. `priority` is still threaded through the read methods
//! below so a `Client` used directly (e.g. in tests) logs it, and so the
//! signature matches what callers actually submit to their own scheduler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use binsync_git::{EntryMode, GitOid, GitRepo, RefName, TreeEdit, TreeEntry};
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::scheduler::Priority;
use crate::state::State;

const FINGERPRINT_REF_NAME: &str = "refs/binsync/fingerprint";
const FINGERPRINT_FILE: &str = "fingerprint.toml";

fn branch_ref(user: &str) -> RefName {
    RefName::new(&format!("refs/heads/binsync/{user}")).expect("branch ref names are well-formed")
}

fn fingerprint_ref() -> RefName {
    RefName::new(FINGERPRINT_REF_NAME).expect("well-formed ref name")
}

/// Summary of one user known to the repository, as exposed by
/// [`Client::users`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    /// The user's branch suffix (`binsync/<name>`).
    pub name: String,
    /// The last time this user successfully pushed, per their own
    /// `metadata.toml`.
    pub last_push_time: Option<DateTime<Utc>>,
}

/// The per-repo git-backed store.
pub struct Client {
    user: String,
    fingerprint: String,
    repo: Mutex<Box<dyn GitRepo + Send>>,
    remote: Option<String>,
    cache: Mutex<HashMap<(String, GitOid), Arc<State>>>,
    last_pull_attempt_time: Mutex<Option<DateTime<Utc>>>,
    last_push_attempt_time: Mutex<Option<DateTime<Utc>>>,
}

impl Client {
    /// Open (or initialize) a binsync store.
    ///
    /// On the very first connection to a repo, `init_if_empty` must be
    /// `true` — `Client` writes a root commit on [`FINGERPRINT_REF_NAME`]
    /// binding the repo to `fingerprint`. Every later connection, from any
    /// user, must supply the same fingerprint or the open fails.
    ///
    /// # Errors
    /// Returns [`CoreError::NotInitialized`] if the repo has never been
    /// bound to a fingerprint and `init_if_empty` is `false`, or
    /// [`CoreError::FingerprintMismatch`] if it was bound to a different
    /// one.
    pub fn connect(
        user: impl Into<String>,
        repo: Box<dyn GitRepo + Send>,
        fingerprint: impl Into<String>,
        remote: Option<String>,
        init_if_empty: bool,
    ) -> Result<Self, CoreError> {
        let user = user.into();
        let fingerprint = fingerprint.into();

        match Self::read_fingerprint(repo.as_ref())? {
            Some(existing) if existing == fingerprint => {}
            Some(existing) => {
                return Err(CoreError::FingerprintMismatch {
                    on_disk: existing,
                    requested: fingerprint,
                });
            }
            None if init_if_empty => {
                Self::init_fingerprint(repo.as_ref(), &fingerprint)?;
            }
            None => return Err(CoreError::NotInitialized),
        }

        Ok(Self {
            user,
            fingerprint,
            repo: Mutex::new(repo),
            remote,
            cache: Mutex::new(HashMap::new()),
            last_pull_attempt_time: Mutex::new(None),
            last_push_attempt_time: Mutex::new(None),
        })
    }

    fn read_fingerprint(repo: &(dyn GitRepo + Send)) -> Result<Option<String>, CoreError> {
        let Some(oid) = repo.read_ref(&fingerprint_ref())? else {
            return Ok(None);
        };
        let commit = repo.read_commit(oid)?;
        let entries = repo.read_tree(commit.tree_oid)?;
        let Some(entry) = entries.iter().find(|e| e.name == FINGERPRINT_FILE) else {
            return Ok(None);
        };
        let bytes = repo.read_blob(entry.oid)?;
        Ok(Some(String::from_utf8_lossy(&bytes).trim().to_owned()))
    }

    fn init_fingerprint(repo: &(dyn GitRepo + Send), fingerprint: &str) -> Result<(), CoreError> {
        let blob = repo.write_blob(fingerprint.as_bytes())?;
        let tree = repo.write_tree(&[TreeEntry {
            name: FINGERPRINT_FILE.to_owned(),
            mode: EntryMode::Blob,
            oid: blob,
        }])?;
        repo.create_commit(
            tree,
            &[],
            "binsync: initialize repository fingerprint",
            Some(&fingerprint_ref()),
        )?;
        Ok(())
    }

    /// The local user this client writes as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The fingerprint this repo was (or is being) initialized for.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `true` if this client was opened with a remote configured.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    // -- Commit / read --------------------------------------------------------

    /// Commit `state` as a new tip of the local user's branch and mark it
    /// clean.
    ///
    /// # Errors
    /// Propagates any [`GitError`](binsync_git::GitError) from the
    /// underlying write, wrapped in [`CoreError::Git`].
    pub fn commit_state(&self, state: &mut State, message: &str) -> Result<GitOid, CoreError> {
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let branch = branch_ref(&self.user);
        let parent = repo.read_ref(&branch)?;
        let base_tree = match parent {
            Some(oid) => repo.read_commit(oid)?.tree_oid,
            None => repo.write_tree(&[])?,
        };

        state.last_commit_msg = message.to_owned();
        let edits = state
            .dump()
            .into_iter()
            .map(|(path, content)| -> Result<TreeEdit, CoreError> {
                let oid = repo.write_blob(content.as_bytes())?;
                Ok(TreeEdit::Upsert {
                    path,
                    mode: EntryMode::Blob,
                    oid,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let tree = repo.edit_tree(base_tree, &edits)?;
        let parents: Vec<GitOid> = parent.into_iter().collect();
        let commit = repo.create_commit(tree, &parents, message, Some(&branch))?;

        state.mark_clean();
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .insert((self.user.clone(), commit), Arc::new(state.clone()));
        Ok(commit)
    }

    /// Fetch the state for `user` (defaulting to the local user) at
    /// `version` (defaulting to that user's branch tip).
    ///
    /// Results are cached by `(branch, commit)`; pass `no_cache: true` to
    /// force a fresh read from the object store. `priority` is accepted
    /// for signature parity with callers that submit this method as a
    /// scheduled job (see module docs) — `Client` itself always runs the
    /// read on the calling thread.
    ///
    /// # Errors
    /// [`CoreError::UnknownUser`] if the requested user has no branch at
    /// all; [`CoreError::MalformedState`] or
    /// [`CoreError::MetadataNotFound`] if the branch's tip commit fails to
    /// parse.
    pub fn get_state(
        &self,
        user: Option<&str>,
        version: Option<GitOid>,
        priority: Priority,
        no_cache: bool,
    ) -> Result<Arc<State>, CoreError> {
        tracing::trace!(?priority, "get_state");
        let user = user.unwrap_or(&self.user);
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let branch = branch_ref(user);
        let commit = match version {
            Some(oid) => oid,
            None => repo
                .read_ref(&branch)?
                .ok_or_else(|| CoreError::UnknownUser(user.to_owned()))?,
        };

        if !no_cache {
            if let Some(cached) = self
                .cache
                .lock()
                .expect("cache mutex poisoned")
                .get(&(user.to_owned(), commit))
            {
                return Ok(Arc::clone(cached));
            }
        }

        let files = self.list_files_in_tree_locked(&repo, commit)?;
        drop(repo);
        let state = Arc::new(State::parse(user, &files)?);
        self.cache
            .lock()
            .expect("cache mutex poisoned")
            .insert((user.to_owned(), commit), Arc::clone(&state));
        Ok(state)
    }

    /// List every user with a `binsync/*` branch, and when they last
    /// pushed according to their own `metadata.toml`.
    ///
    /// A user whose tip commit fails to parse (missing or malformed
    /// metadata) is skipped, not propagated as an error (§7 kind 2).
    pub fn users(&self, priority: Priority, no_cache: bool) -> Result<Vec<UserInfo>, CoreError> {
        let branches = {
            let repo = self.repo.lock().expect("repo mutex poisoned");
            repo.list_refs("refs/heads/binsync/")?
        };
        let mut out = Vec::with_capacity(branches.len());
        for (name, _oid) in branches {
            let user = name
                .as_str()
                .trim_start_matches("refs/heads/binsync/")
                .to_owned();
            match self.get_state(Some(&user), None, priority, no_cache) {
                Ok(state) => out.push(UserInfo {
                    name: user,
                    last_push_time: state.last_push_time,
                }),
                Err(error) => {
                    tracing::info!(%user, %error, "skipping user with unreadable state");
                }
            }
        }
        Ok(out)
    }

    /// Fetch every known user's state in one pass.
    pub fn all_states(&self, priority: Priority) -> Result<Vec<Arc<State>>, CoreError> {
        let users = self.users(priority, false)?;
        let mut out = Vec::with_capacity(users.len());
        for user in users {
            if let Ok(state) = self.get_state(Some(&user.name), None, priority, false) {
                out.push(state);
            }
        }
        Ok(out)
    }

    /// Pull the local user's remote branch, commit `state` if it's dirty
    /// (stamping `commit_msg`, defaulting to `"User updated"`), and push if
    /// a remote is configured.
    ///
    /// Never raises to the caller on network failure (§7 kind 3): pull and
    /// push failures are logged and `last_pull_attempt_time` /
    /// `last_push_attempt_time` are stamped regardless of outcome.
    pub fn update(&self, state: &mut State, commit_msg: Option<&str>) -> Result<(), CoreError> {
        *self.last_pull_attempt_time.lock().expect("mutex poisoned") = Some(Utc::now());
        if let Some(remote) = &self.remote {
            let branch = branch_ref(&self.user);
            let repo = self.repo.lock().expect("repo mutex poisoned");
            if let Err(error) = repo.fetch_ref(remote, branch.as_str(), branch.as_str()) {
                tracing::warn!(%error, user = %self.user, "pull failed, continuing with local state");
            }
        }

        if state.dirty() {
            let msg = commit_msg.unwrap_or("User updated").to_owned();
            self.commit_state(state, &msg)?;
        }

        *self.last_push_attempt_time.lock().expect("mutex poisoned") = Some(Utc::now());
        if let Some(remote) = &self.remote {
            let branch = branch_ref(&self.user);
            let repo = self.repo.lock().expect("repo mutex poisoned");
            if let Err(error) = repo.push_branch(remote, branch.as_str(), branch.as_str(), false) {
                tracing::warn!(%error, user = %self.user, "push failed");
            }
        }
        Ok(())
    }

    // -- Raw tree access (§4.B: list_files_in_tree / load_file_from_tree / add_data) --

    /// List every file path and its blob content under `commit`'s tree.
    pub fn list_files_in_tree(&self, commit: GitOid) -> Result<Vec<(String, String)>, CoreError> {
        let repo = self.repo.lock().expect("repo mutex poisoned");
        self.list_files_in_tree_locked(&repo, commit)
    }

    fn list_files_in_tree_locked(
        &self,
        repo: &dyn GitRepo,
        commit: GitOid,
    ) -> Result<Vec<(String, String)>, CoreError> {
        let tree = repo.read_commit(commit)?.tree_oid;
        let mut out = Vec::new();
        Self::walk_tree(repo, tree, &String::new(), &mut out)?;
        Ok(out)
    }

    fn walk_tree(
        repo: &dyn GitRepo,
        tree: GitOid,
        prefix: &str,
        out: &mut Vec<(String, String)>,
    ) -> Result<(), CoreError> {
        for entry in repo.read_tree(tree)? {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            if entry.mode == EntryMode::Tree {
                Self::walk_tree(repo, entry.oid, &path, out)?;
            } else {
                let bytes = repo.read_blob(entry.oid)?;
                out.push((path, String::from_utf8_lossy(&bytes).into_owned()));
            }
        }
        Ok(())
    }

    /// Load a single file's content from `commit`'s tree by path, if it
    /// exists.
    pub fn load_file_from_tree(
        &self,
        commit: GitOid,
        path: &str,
    ) -> Result<Option<String>, CoreError> {
        Ok(self
            .list_files_in_tree(commit)?
            .into_iter()
            .find(|(p, _)| p == path)
            .map(|(_, content)| content))
    }

    /// Add an arbitrary blob of data to the local user's branch at `path`,
    /// outside of the structured artifact containers (used for opaque
    /// decompiler-specific sidecar data).
    pub fn add_data(&self, path: &str, data: &[u8], message: &str) -> Result<GitOid, CoreError> {
        let repo = self.repo.lock().expect("repo mutex poisoned");
        let branch = branch_ref(&self.user);
        let parent = repo.read_ref(&branch)?;
        let base_tree = match parent {
            Some(oid) => repo.read_commit(oid)?.tree_oid,
            None => repo.write_tree(&[])?,
        };
        let blob = repo.write_blob(data)?;
        let tree = repo.edit_tree(
            base_tree,
            &[TreeEdit::Upsert {
                path: path.to_owned(),
                mode: EntryMode::Blob,
                oid: blob,
            }],
        )?;
        let parents: Vec<GitOid> = parent.into_iter().collect();
        Ok(repo.create_commit(tree, &parents, message, Some(&branch))?)
    }

    /// The wall-clock time of the most recent pull attempt (successful or
    /// not).
    #[must_use]
    pub fn last_pull_attempt_time(&self) -> Option<DateTime<Utc>> {
        *self.last_pull_attempt_time.lock().expect("mutex poisoned")
    }

    /// The wall-clock time of the most recent push attempt (successful or
    /// not).
    #[must_use]
    pub fn last_push_attempt_time(&self) -> Option<DateTime<Utc>> {
        *self.last_push_attempt_time.lock().expect("mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsync_git::GixRepo;
    use std::process::Command;

    fn init_repo() -> (tempfile::TempDir, Box<dyn GitRepo + Send>) {
        let dir = tempfile::tempdir().unwrap();
        let status = Command::new("git")
            .args(["init", "--quiet"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
        let repo = GixRepo::open_at(dir.path()).unwrap();
        (dir, Box::new(repo))
    }

    #[test]
    fn connect_initializes_fingerprint_on_first_open() {
        let (_dir, repo) = init_repo();
        let client = Client::connect("alice", repo, "abc123", None, true).unwrap();
        assert_eq!(client.fingerprint(), "abc123");
    }

    #[test]
    fn connect_without_init_on_empty_repo_fails() {
        let (_dir, repo) = init_repo();
        let err = Client::connect("alice", repo, "abc123", None, false).unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized));
    }

    #[test]
    fn reconnect_with_wrong_fingerprint_fails() {
        let (dir, repo) = init_repo();
        let _client = Client::connect("alice", repo, "abc123", None, true).unwrap();

        let repo2 = GixRepo::open_at(dir.path()).unwrap();
        let err = Client::connect("bob", Box::new(repo2), "different", None, false).unwrap_err();
        assert!(matches!(err, CoreError::FingerprintMismatch { .. }));
    }

    #[test]
    fn commit_then_get_state_roundtrips() {
        let (_dir, repo) = init_repo();
        let client = Client::connect("alice", repo, "fp", None, true).unwrap();

        let mut state = State::new("alice");
        state.set_function_header(crate::artifact::FunctionHeader::new(0x401000), Utc::now());
        client.commit_state(&mut state, "first push").unwrap();

        let fetched = client.get_state(None, None, Priority::Fast, false).unwrap();
        assert!(fetched.get_function(0x401000).is_some());
    }

    #[test]
    fn users_lists_every_branch() {
        let (dir, repo) = init_repo();
        let alice = Client::connect("alice", repo, "fp", None, true).unwrap();
        let mut alice_state = State::new("alice");
        alice_state.set_function_header(crate::artifact::FunctionHeader::new(0x1000), Utc::now());
        alice.commit_state(&mut alice_state, "alice push").unwrap();

        let bob_repo = GixRepo::open_at(dir.path()).unwrap();
        let bob = Client::connect("bob", Box::new(bob_repo), "fp", None, false).unwrap();
        let mut bob_state = State::new("bob");
        bob_state.set_function_header(crate::artifact::FunctionHeader::new(0x2000), Utc::now());
        bob.commit_state(&mut bob_state, "bob push").unwrap();

        let users = alice.users(Priority::Fast, true).unwrap();
        let names: Vec<_> = users.iter().map(|u| u.name.clone()).collect();
        assert!(names.contains(&"alice".to_owned()));
        assert!(names.contains(&"bob".to_owned()));
    }
}
