//! The merge/fill/push pipeline (§4.E).
//!
//! `Controller` is the one object a decompiler plugin or CLI command talks
//! to. It owns the [`Client`](binsync_core::Client), the local user's
//! [`State`], two [`Scheduler`]s (outgoing pushes, UI refreshes), and the
//! sync-lock that serializes decompiler writes against each other.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use binsync_core::artifact::{Function, Struct};
use binsync_core::{Artifact, ArtifactKey, ArtifactType, Client, CoreError, Priority, Scheduler, State};
use binsync_git::GitRepo;
use chrono::{DateTime, Utc};

use crate::config::{MergeLevel, ProjectConfig};
use crate::decompiler::{DecompilerInterface, ProgressReporter};
use crate::error::BinSyncError;

const BUSY_LOOP_COOLDOWN: Duration = Duration::from_millis(500);

/// Connection state exposed by [`Controller::status`] (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncControlStatus {
    /// Connected to a repo with a remote configured.
    Connected,
    /// Connected to a local-only repo (no remote push/pull).
    ConnectedNoRemote,
    /// `connect` has not been called, or failed.
    Disconnected,
}

/// Options for [`Controller::push_artifact`].
#[derive(Clone, Debug)]
pub struct PushOptions {
    /// Commit message; defaults to `"User edit"`.
    pub commit_msg: Option<String>,
    /// Stamp `last_change` on the stored artifact. `false` for artifacts
    /// arriving via a fill/merge, so they never look like a fresh local
    /// edit.
    pub set_last_change: bool,
    /// Create a placeholder containing `Function` first when one of
    /// `FunctionHeader`/`StackVariable`/`Comment` references an address
    /// with no `Function` yet.
    pub make_func: bool,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            commit_msg: None,
            set_last_change: true,
            make_func: true,
        }
    }
}

/// Options for [`Controller::fill_artifact`].
#[derive(Clone, Debug)]
pub struct FillOptions {
    /// The remote user whose artifact is being pulled in.
    pub user: String,
    /// Merge policy to apply between the master and the user's artifact.
    pub merge_level: MergeLevel,
    /// Run the resulting push on the calling thread instead of scheduling
    /// it on the push scheduler.
    pub blocking: bool,
    /// Commit message for the resulting push.
    pub commit_msg: Option<String>,
}

/// Drives pull/push, merge, and fill for one decompiler session.
pub struct Controller {
    decompiler: Arc<dyn DecompilerInterface>,
    client: Mutex<Option<Arc<Client>>>,
    master_state: Mutex<Option<Arc<Mutex<State>>>>,
    config: Mutex<ProjectConfig>,
    push_scheduler: Arc<Scheduler>,
    ui_scheduler: Arc<Scheduler>,
    sync_lock: Arc<Mutex<()>>,
    stop: Arc<AtomicBool>,
    ui_callback: Mutex<Option<Box<dyn Fn(&[Arc<State>]) + Send + Sync>>>,
    ctx_change_callback: Mutex<Option<Box<dyn Fn(&[Arc<State>]) + Send + Sync>>>,
    reload_time: Duration,
    headless: bool,
    updater_handle: Mutex<Option<JoinHandle<()>>>,
    last_pull_attempt: Mutex<Option<DateTime<Utc>>>,
}

impl Controller {
    /// Construct a disconnected controller around `decompiler`.
    #[must_use]
    pub fn new(decompiler: Arc<dyn DecompilerInterface>) -> Arc<Self> {
        Arc::new(Self {
            decompiler,
            client: Mutex::new(None),
            master_state: Mutex::new(None),
            config: Mutex::new(ProjectConfig::default()),
            push_scheduler: Scheduler::new(),
            ui_scheduler: Scheduler::new(),
            sync_lock: Arc::new(Mutex::new(())),
            stop: Arc::new(AtomicBool::new(false)),
            ui_callback: Mutex::new(None),
            ctx_change_callback: Mutex::new(None),
            reload_time: Duration::from_secs(10),
            headless: false,
            updater_handle: Mutex::new(None),
            last_pull_attempt: Mutex::new(None),
        })
    }

    /// Run headless (no UI callbacks are ever fired by the updater loop).
    #[must_use]
    pub fn headless(mut self: Arc<Self>, headless: bool) -> Arc<Self> {
        Arc::get_mut(&mut self).expect("set before sharing").headless = headless;
        self
    }

    /// Install the UI-refresh callback, fired from the UI scheduler with
    /// every known user's latest state.
    pub fn set_ui_callback(&self, callback: impl Fn(&[Arc<State>]) + Send + Sync + 'static) {
        *self.ui_callback.lock().expect("mutex poisoned") = Some(Box::new(callback));
    }

    /// Install the context-change callback, fired alongside the UI
    /// callback when new remote activity is observed.
    pub fn set_context_change_callback(&self, callback: impl Fn(&[Arc<State>]) + Send + Sync + 'static) {
        *self.ctx_change_callback.lock().expect("mutex poisoned") = Some(Box::new(callback));
    }

    /// Open (or initialize) the binsync store for `user` over `repo`, and
    /// load `<binary_path>.toml`/`binsync.toml`.
    ///
    /// Returns any non-fatal warnings collected along the way (§6:
    /// `connect` "returns a list of warning strings").
    ///
    /// # Errors
    /// [`BinSyncError::Core`] wrapping [`CoreError::FingerprintMismatch`]
    /// or a git failure — both fatal per §7 kind 8.
    pub fn connect(
        self: &Arc<Self>,
        user: &str,
        repo: Box<dyn GitRepo + Send>,
        remote: Option<String>,
        init_repo: bool,
    ) -> Result<Vec<String>, BinSyncError> {
        let mut warnings = Vec::new();
        let fingerprint = self.decompiler.binary_hash();
        let client = Client::connect(user, repo, fingerprint, remote, init_repo)?;

        let state = match client.get_state(None, None, Priority::Fast, false) {
            Ok(state) => (*state).clone(),
            Err(CoreError::UnknownUser(_)) => State::new(user),
            Err(error) => return Err(error.into()),
        };

        let config = crate::config::ProjectConfig::load_for_binary(&self.decompiler.binary_path())
            .unwrap_or_else(|error| {
                warnings.push(format!("config error, using defaults: {error}"));
                ProjectConfig::default()
            });

        *self.client.lock().expect("mutex poisoned") = Some(Arc::new(client));
        *self.master_state.lock().expect("mutex poisoned") = Some(Arc::new(Mutex::new(state)));
        *self.config.lock().expect("mutex poisoned") = config;
        self.decompiler.start_artifact_watchers();
        Ok(warnings)
    }

    /// Re-read `<binary_path>.toml`/`binsync.toml` and apply it, logging a
    /// warning instead of failing on a parse error (§7 kind 7).
    pub fn load_saved_config(&self) -> ProjectConfig {
        match crate::config::ProjectConfig::load_for_binary(&self.decompiler.binary_path()) {
            Ok(config) => {
                *self.config.lock().expect("mutex poisoned") = config.clone();
                config
            }
            Err(error) => {
                tracing::warn!(%error, "failed to reload config, keeping previous values");
                self.config.lock().expect("mutex poisoned").clone()
            }
        }
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> SyncControlStatus {
        match self.client.lock().expect("mutex poisoned").as_deref() {
            None => SyncControlStatus::Disconnected,
            Some(client) if client.has_remote() => SyncControlStatus::Connected,
            Some(_) => SyncControlStatus::ConnectedNoRemote,
        }
    }

    /// Every user known to the repository.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`] if `connect` has not succeeded.
    pub fn users(&self) -> Result<Vec<binsync_core::client::UserInfo>, BinSyncError> {
        Ok(self.require_client()?.users(Priority::Medium, false)?)
    }

    /// The local user's current state and `user`'s latest known state.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`] if disconnected, or a store error
    /// resolving `user`'s branch.
    pub fn get_master_and_user_state(&self, user: &str) -> Result<(Arc<State>, Arc<State>), BinSyncError> {
        let client = self.require_client()?;
        let master_state = self.require_master_state()?;
        let master = Arc::new(master_state.lock().expect("mutex poisoned").clone());
        let theirs = client.get_state(Some(user), None, Priority::Medium, false)?;
        Ok((master, theirs))
    }

    fn require_client(&self) -> Result<Arc<Client>, BinSyncError> {
        self.client
            .lock()
            .expect("mutex poisoned")
            .clone()
            .ok_or(BinSyncError::NotConnected)
    }

    fn require_master_state(&self) -> Result<Arc<Mutex<State>>, BinSyncError> {
        self.master_state
            .lock()
            .expect("mutex poisoned")
            .clone()
            .ok_or(BinSyncError::NotConnected)
    }

    // -- Push path (§4.E) ---------------------------------------------------

    /// Commit a locally-edited artifact into the local user's state and
    /// (via the updater loop) forward it to the remote.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`], or a propagated store error from
    /// the commit.
    pub fn push_artifact(&self, artifact: Artifact, opts: PushOptions) -> Result<bool, BinSyncError> {
        let client = self.require_client()?;
        let master_state = self.require_master_state()?;

        let was_set = {
            let mut state = master_state.lock().expect("mutex poisoned");
            apply_push(&self.decompiler, &mut state, artifact, &opts)
        };

        if was_set {
            let msg = opts.commit_msg.unwrap_or_else(|| "User edit".to_owned());
            let mut state = master_state.lock().expect("mutex poisoned");
            client.commit_state(&mut state, &msg)?;
        }
        Ok(was_set)
    }

    // -- Fill path (§4.E) ----------------------------------------------------

    /// Pull another user's artifact in, merge with the local master, write
    /// it into the decompiler, and commit the merged result locally.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`], or a propagated store error. A
    /// failure inside the locked decompiler-write block (§7 kind 6) is
    /// caught and logged, not returned — the merged artifact is still
    /// pushed.
    pub fn fill_artifact(
        &self,
        kind: ArtifactType,
        key: ArtifactKey,
        opts: FillOptions,
    ) -> Result<bool, BinSyncError> {
        let client = self.require_client()?;
        let master_state = self.require_master_state()?;
        let user_state = client.get_state(Some(&opts.user), None, Priority::Medium, false)?;

        let master_artifact = {
            let master = master_state.lock().expect("mutex poisoned");
            master.get_artifact(kind, &key)
        };
        let user_artifact = user_state.get_artifact(kind, &key);

        let Some(mut merged) = merge_artifacts(master_artifact.as_ref(), user_artifact.as_ref(), opts.merge_level)
        else {
            return Ok(false);
        };
        merged.clear_last_change();

        self.apply_merged(kind, merged, &user_state, &master_state, &client, opts.blocking, opts.commit_msg)?;
        Ok(true)
    }

    /// Shared tail of `fill_artifact` and `magic_fill`: import dependent
    /// types, write into the decompiler under the sync-lock, propagate
    /// function comments, and push the merged artifact back.
    fn apply_merged(
        &self,
        kind: ArtifactType,
        merged: Artifact,
        source_state: &State,
        master_state: &Arc<Mutex<State>>,
        client: &Arc<Client>,
        blocking: bool,
        commit_msg: Option<String>,
    ) -> Result<(), BinSyncError> {
        // Non-reentrant sync-lock emulating `FakeSyncLock` (§5): if a
        // nested fill (type import) tries to acquire this again on the
        // same thread, `try_lock` fails and we proceed without a new
        // guard, relying on the outer call's held guard.
        let _guard = self.sync_lock.try_lock();

        let write_result: Result<(), BinSyncError> = (|| {
            self.discover_and_import_user_defined_types(&merged, source_state, master_state)?;
            let lowered = self.decompiler.art_lowerer().lower(&merged);
            self.decompiler
                .write_artifact(&lowered)
                .map_err(|reason| BinSyncError::FillException {
                    artifact: format!("{kind:?}:{}", merged.key()),
                    reason,
                })?;
            if kind == ArtifactType::Function {
                propagate_function_comments(&self.decompiler, &merged, source_state);
            }
            Ok(())
        })();

        if let Err(error) = write_result {
            tracing::warn!(%error, "fill failed inside locked decompiler-write block");
        }

        let push_opts = PushOptions {
            commit_msg,
            set_last_change: false,
            make_func: true,
        };
        if blocking {
            push_into(&self.decompiler, client, master_state, merged, push_opts)?;
        } else {
            let decompiler = Arc::clone(&self.decompiler);
            let client = Arc::clone(client);
            let master_state = Arc::clone(master_state);
            self.push_scheduler.schedule_job(
                Box::new(move || {
                    push_into(&decompiler, &client, &master_state, merged, push_opts)
                        .map_err(|e| CoreError::JobFailed(e.to_string()))
                }),
                Priority::Medium,
            )?;
        }
        Ok(())
    }

    fn discover_and_import_user_defined_types(
        &self,
        merged: &Artifact,
        source_state: &State,
        master_state: &Arc<Mutex<State>>,
    ) -> Result<(), BinSyncError> {
        for type_str in referenced_type_strings(merged) {
            let parsed = self.decompiler.type_parser().parse_type(&type_str);
            if !parsed.is_unknown {
                continue;
            }
            let already_present = master_state
                .lock()
                .expect("mutex poisoned")
                .get_struct(&parsed.base_type)
                .is_some();
            if already_present {
                continue;
            }
            if let Err(error) = self.import_user_defined_type(&parsed.base_type, source_state, master_state) {
                tracing::info!(type_name = %parsed.base_type, %error, "type import failed, proceeding without it");
            }
        }
        Ok(())
    }

    /// Header-first, members-second struct import with a bulk fallback
    /// when a member references a struct not yet known anywhere (§4.E,
    /// §9), grounded on `discover_and_importer_user_defined_types`/
    /// `import_user_defined_type` in the original controller.
    fn import_user_defined_type(
        &self,
        name: &str,
        source_state: &State,
        master_state: &Arc<Mutex<State>>,
    ) -> Result<(), BinSyncError> {
        let Some(source_struct) = source_state.get_struct(name).cloned() else {
            return Err(BinSyncError::TypeImportFailure {
                type_name: name.to_owned(),
                reason: "not found in source user's state".to_owned(),
            });
        };

        {
            let mut master = master_state.lock().expect("mutex poisoned");
            master.set_struct(Struct::header_only(source_struct.name.clone(), source_struct.size), Utc::now());
        }

        let mut needs_bulk_import = false;
        for member in source_struct.members.values() {
            let parsed = self.decompiler.type_parser().parse_type(&member.type_);
            if !parsed.is_unknown {
                continue;
            }
            let master = master_state.lock().expect("mutex poisoned");
            if master.get_struct(&parsed.base_type).is_some() {
                continue;
            }
            drop(master);
            if source_state.get_struct(&parsed.base_type).is_some() {
                needs_bulk_import = true;
                break;
            }
        }

        let mut master = master_state.lock().expect("mutex poisoned");
        if needs_bulk_import {
            for s in source_state.structs().values() {
                master.set_struct(s.clone(), Utc::now());
            }
        } else {
            master.set_struct(source_struct, Utc::now());
        }
        Ok(())
    }

    /// Pull every function from `user` into the local master, one
    /// `fill_artifact` call per address (§4.E supplement).
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`], or a store error reading `user`'s
    /// state.
    pub fn fill_functions(&self, user: &str) -> Result<(), BinSyncError> {
        self.fill_all_of_type(ArtifactType::Function, user)
    }

    /// Pull every struct from `user` into the local master.
    ///
    /// # Errors
    /// See [`Controller::fill_functions`].
    pub fn fill_structs(&self, user: &str) -> Result<(), BinSyncError> {
        self.fill_all_of_type(ArtifactType::Struct, user)
    }

    /// Pull every enum from `user` into the local master.
    ///
    /// # Errors
    /// See [`Controller::fill_functions`].
    pub fn fill_enums(&self, user: &str) -> Result<(), BinSyncError> {
        self.fill_all_of_type(ArtifactType::Enum, user)
    }

    /// Pull every global variable from `user` into the local master.
    ///
    /// # Errors
    /// See [`Controller::fill_functions`].
    pub fn fill_global_vars(&self, user: &str) -> Result<(), BinSyncError> {
        self.fill_all_of_type(ArtifactType::GlobalVariable, user)
    }

    /// Pull every artifact of every kind from `user` into the local
    /// master.
    ///
    /// # Errors
    /// See [`Controller::fill_functions`].
    pub fn fill_all(&self, user: &str) -> Result<(), BinSyncError> {
        for kind in [
            ArtifactType::Function,
            ArtifactType::Struct,
            ArtifactType::Enum,
            ArtifactType::GlobalVariable,
            ArtifactType::Comment,
            ArtifactType::Patch,
        ] {
            self.fill_all_of_type(kind, user)?;
        }
        Ok(())
    }

    fn fill_all_of_type(&self, kind: ArtifactType, user: &str) -> Result<(), BinSyncError> {
        let client = self.require_client()?;
        let state = client.get_state(Some(user), None, Priority::Slow, false)?;
        let merge_level = self.config.lock().expect("mutex poisoned").merge_level;
        for key in keys_of_type(&state, kind) {
            if let Err(error) = self.fill_artifact(
                kind,
                key,
                FillOptions {
                    user: user.to_owned(),
                    merge_level,
                    blocking: false,
                    commit_msg: None,
                },
            ) {
                tracing::warn!(%error, ?kind, user, "fill failed for one artifact, continuing");
            }
        }
        Ok(())
    }

    /// Multi-user convergence: union every user's identifiers of the
    /// supported types, fold them with sequential non-conflict merges
    /// starting from `preference_user`'s value, and fill the result into
    /// the local master. `Struct` and `Comment` are intentionally excluded
    /// (§4.E, §9 Open Question (b)).
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`].
    pub fn magic_fill(&self, preference_user: Option<&str>, requested_level: MergeLevel) -> Result<(), BinSyncError> {
        let level = if matches!(requested_level, MergeLevel::Overwrite) {
            MergeLevel::NonConflicting
        } else {
            requested_level
        };
        let client = self.require_client()?;
        let master_state = self.require_master_state()?;

        let mut user_states = Vec::new();
        for user in client.users(Priority::Slow, false)? {
            if let Ok(state) = client.get_state(Some(&user.name), None, Priority::Slow, false) {
                user_states.push((user.name, state));
            }
        }
        if let Some(pref) = preference_user {
            if let Some(pos) = user_states.iter().position(|(name, _)| name == pref) {
                let item = user_states.remove(pos);
                user_states.insert(0, item);
            }
        }

        for kind in [ArtifactType::Function, ArtifactType::GlobalVariable, ArtifactType::Enum] {
            let mut keys = BTreeSet::new();
            for (_, state) in &user_states {
                keys.extend(keys_of_type(state, kind));
            }
            for key in keys {
                let result = self.magic_fill_one(kind, &key, &user_states, level, &master_state, &client);
                if let Err(error) = result {
                    tracing::warn!(%error, ?kind, %key, "magic fill failed for one artifact, continuing");
                }
            }
        }
        Ok(())
    }

    fn magic_fill_one(
        &self,
        kind: ArtifactType,
        key: &ArtifactKey,
        user_states: &[(String, Arc<State>)],
        level: MergeLevel,
        master_state: &Arc<Mutex<State>>,
        client: &Arc<Client>,
    ) -> Result<(), BinSyncError> {
        let mut merged: Option<Artifact> = None;
        let mut first_source: Option<&State> = None;
        for (_, state) in user_states {
            let Some(candidate) = state.get_artifact(kind, key) else {
                continue;
            };
            first_source.get_or_insert(state);
            merged = Some(match merged {
                None => candidate,
                Some(existing) => match merge_artifacts(Some(&existing), Some(&candidate), level) {
                    Some(m) => m,
                    None => existing,
                },
            });
        }
        let (Some(mut merged), Some(source_state)) = (merged, first_source) else {
            return Ok(());
        };
        merged.clear_last_change();
        self.apply_merged(
            kind,
            merged,
            source_state,
            master_state,
            client,
            false,
            Some(format!("Magic Synced {kind:?}")),
        )
    }

    /// Bulk force-push: read each address directly from the decompiler
    /// (not from state) and schedule a push at FAST priority, reporting
    /// progress via [`ProgressReporter`].
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`].
    pub fn force_push_functions(&self, addrs: impl IntoIterator<Item = u64>) -> Result<(), BinSyncError> {
        self.require_client()?;
        for addr in addrs.into_iter().with_progress("force-pushing functions") {
            let Some(size) = self.decompiler.get_func_size(addr) else {
                continue;
            };
            let artifact = self
                .decompiler
                .read_artifact(ArtifactType::Function, &ArtifactKey::Addr(addr))
                .unwrap_or_else(|| Artifact::Function(Function::placeholder(addr, size)));
            if let Err(error) = self.push_artifact(artifact, PushOptions::default()) {
                tracing::warn!(%error, addr, "force-push failed for function");
            }
        }
        Ok(())
    }

    /// Bulk force-push of non-function artifacts (globals, structs,
    /// enums, patches), reading each directly from the decompiler.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`].
    pub fn force_push_global_artifacts(
        &self,
        kind: ArtifactType,
        keys: impl IntoIterator<Item = ArtifactKey>,
    ) -> Result<(), BinSyncError> {
        self.require_client()?;
        for key in keys.into_iter().with_progress("force-pushing artifacts") {
            let Some(artifact) = self.decompiler.read_artifact(kind, &key) else {
                continue;
            };
            if let Err(error) = self.push_artifact(artifact, PushOptions::default()) {
                tracing::warn!(%error, %key, ?kind, "force-push failed");
            }
        }
        Ok(())
    }

    /// Identifiers of `kind` in the local master whose `last_change` is
    /// set — i.e. locally edited since the last parse.
    ///
    /// # Errors
    /// [`BinSyncError::NotConnected`].
    pub fn changed_artifacts_of_type(&self, kind: ArtifactType) -> Result<Vec<ArtifactKey>, BinSyncError> {
        let master_state = self.require_master_state()?;
        let state = master_state.lock().expect("mutex poisoned");
        Ok(keys_of_type(&state, kind)
            .into_iter()
            .filter(|key| {
                state
                    .get_artifact(kind, key)
                    .is_some_and(|a| a.last_change().is_some())
            })
            .collect())
    }

    // -- Updater routine (§4.E, §5) ------------------------------------------

    /// Start the updater thread (pull/push loop) and both schedulers'
    /// worker threads.
    pub fn start_worker_routines(self: &Arc<Self>) {
        self.push_scheduler.start_worker_thread();
        self.ui_scheduler.start_worker_thread();
        self.stop.store(false, Ordering::SeqCst);
        let controller = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("binsync-updater".into())
            .spawn(move || controller.updater_loop())
            .expect("failed to spawn updater thread");
        *self.updater_handle.lock().expect("mutex poisoned") = Some(handle);
    }

    /// Signal all worker threads to stop and join them.
    pub fn stop_worker_routines(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.updater_handle.lock().expect("mutex poisoned").take() {
            let _ = handle.join();
        }
        self.push_scheduler.stop_worker_thread();
        self.ui_scheduler.stop_worker_thread();
    }

    /// Block until every push job submitted before this call has been
    /// drained, by submitting a sentinel SLOW job and waiting on it — SLOW
    /// only runs once FAST and MEDIUM are both empty.
    ///
    /// # Errors
    /// Propagates [`CoreError::SchedulerShutdown`] if the scheduler was
    /// torn down first.
    pub fn wait_for_next_push(&self) -> Result<(), BinSyncError> {
        self.push_scheduler.schedule_and_wait_job(|| Ok(()), Priority::Slow)?;
        Ok(())
    }

    fn updater_loop(&self) {
        while !self.stop.load(Ordering::SeqCst) {
            thread::sleep(BUSY_LOOP_COOLDOWN);

            let (Some(client), Some(master_state)) = (
                self.client.lock().expect("mutex poisoned").clone(),
                self.master_state.lock().expect("mutex poisoned").clone(),
            ) else {
                continue;
            };

            let had_prior_pull = self.last_pull_attempt.lock().expect("mutex poisoned").is_some();
            let reload_due = match *self.last_pull_attempt.lock().expect("mutex poisoned") {
                None => true,
                Some(last) => {
                    Utc::now().signed_duration_since(last)
                        >= chrono::Duration::from_std(self.reload_time).unwrap_or(chrono::Duration::seconds(10))
                }
            };
            if !had_prior_pull || reload_due {
                let commit_msg = if had_prior_pull { None } else { Some("User created") };
                {
                    let mut state = master_state.lock().expect("mutex poisoned");
                    if let Err(error) = client.update(&mut state, commit_msg) {
                        tracing::warn!(%error, "updater pull/push cycle failed");
                    }
                }
                *self.last_pull_attempt.lock().expect("mutex poisoned") = Some(Utc::now());

                if !self.headless {
                    if let Ok(states) = client.all_states(Priority::Slow) {
                        if !states.is_empty() {
                            if let Some(cb) = self.ctx_change_callback.lock().expect("mutex poisoned").as_ref() {
                                cb(&states);
                            }
                            if let Some(cb) = self.ui_callback.lock().expect("mutex poisoned").as_ref() {
                                cb(&states);
                            }
                        }
                    }
                }
            }
        }
    }
}

fn apply_push(
    decompiler: &Arc<dyn DecompilerInterface>,
    state: &mut State,
    artifact: Artifact,
    opts: &PushOptions,
) -> bool {
    let lifted = decompiler.art_lifter().lift(&artifact);
    ensure_containing_function(decompiler, state, &lifted, opts.make_func);

    let now = Utc::now();
    let key = lifted.key();
    let kind = lifted.artifact_type();
    let was_set = state.set_artifact(lifted, now);
    if was_set {
        if !opts.set_last_change {
            state.clear_artifact_last_change(kind, &key);
        }
        state.note_push(key, kind, now);
    }
    was_set
}

fn ensure_containing_function(
    decompiler: &Arc<dyn DecompilerInterface>,
    state: &mut State,
    artifact: &Artifact,
    make_func: bool,
) {
    if !make_func {
        return;
    }
    let addr = match artifact {
        Artifact::Comment(c) => c.addr,
        Artifact::FunctionHeader(h) => h.addr,
        Artifact::StackVariable(v) => v.addr,
        _ => return,
    };
    if state.find_func_for_addr(addr).is_some() {
        return;
    }
    if let Some(size) = decompiler.get_func_size(addr) {
        state.set_function(Function::placeholder(addr, size), Utc::now());
    }
}

fn push_into(
    decompiler: &Arc<dyn DecompilerInterface>,
    client: &Client,
    master_state: &Arc<Mutex<State>>,
    artifact: Artifact,
    opts: PushOptions,
) -> Result<(), BinSyncError> {
    let was_set = {
        let mut state = master_state.lock().expect("mutex poisoned");
        apply_push(decompiler, &mut state, artifact, &opts)
    };
    if was_set {
        let msg = opts.commit_msg.unwrap_or_else(|| "User edit".to_owned());
        let mut state = master_state.lock().expect("mutex poisoned");
        client.commit_state(&mut state, &msg)?;
    }
    Ok(())
}

fn propagate_function_comments(decompiler: &Arc<dyn DecompilerInterface>, merged: &Artifact, source_state: &State) {
    let Artifact::Function(f) = merged else {
        return;
    };
    for comment in source_state.comments().values() {
        if !f.contains_addr(comment.addr) {
            continue;
        }
        let lowered = decompiler.art_lowerer().lower(&Artifact::Comment(comment.clone()));
        if let Err(reason) = decompiler.write_artifact(&lowered) {
            tracing::warn!(%reason, addr = comment.addr, "failed to propagate function comment");
        }
    }
}

/// `merge_artifacts(a, b, level)` (§4.E).
#[must_use]
pub fn merge_artifacts(a: Option<&Artifact>, b: Option<&Artifact>, level: MergeLevel) -> Option<Artifact> {
    match (a, b) {
        (_, None) => a.cloned(),
        (None, Some(b)) => Some(b.clone()),
        (Some(a), Some(b)) if a == b => Some(b.clone()),
        (Some(_), Some(b)) if matches!(level, MergeLevel::Overwrite) => Some(b.clone()),
        (Some(a), Some(b)) => {
            if matches!(level, MergeLevel::Merge) {
                tracing::warn!("interactive merge not currently supported, falling back to non-conflicting merge");
            }
            a.nonconflict_merge(b)
        }
    }
}

fn keys_of_type(state: &State, kind: ArtifactType) -> Vec<ArtifactKey> {
    match kind {
        ArtifactType::Function => state.functions().keys().map(|a| ArtifactKey::Addr(*a)).collect(),
        ArtifactType::GlobalVariable => state.global_vars().keys().map(|a| ArtifactKey::Addr(*a)).collect(),
        ArtifactType::Enum => state.enums().keys().map(|n| ArtifactKey::Name(n.clone())).collect(),
        ArtifactType::Struct => state.structs().keys().map(|n| ArtifactKey::Name(n.clone())).collect(),
        ArtifactType::Comment => state.comments().keys().map(|a| ArtifactKey::Addr(*a)).collect(),
        ArtifactType::Patch => state.patches().keys().map(|a| ArtifactKey::Addr(*a)).collect(),
        ArtifactType::FunctionHeader | ArtifactType::StackVariable => Vec::new(),
    }
}

/// Every type string an artifact references, for
/// `discover_and_import_user_defined_types` to walk.
fn referenced_type_strings(artifact: &Artifact) -> Vec<String> {
    match artifact {
        Artifact::FunctionHeader(h) => {
            let mut types = vec![h.return_type.clone()];
            types.extend(h.args.values().map(|a| a.type_.clone()));
            types
        }
        Artifact::Function(f) => {
            let mut types = f
                .header
                .as_ref()
                .map(|h| referenced_type_strings(&Artifact::FunctionHeader(h.clone())))
                .unwrap_or_default();
            types.extend(f.stack_vars.values().map(|v| v.type_.clone()));
            types
        }
        Artifact::StackVariable(v) => vec![v.type_.clone()],
        Artifact::GlobalVariable(g) => vec![g.type_.clone()],
        Artifact::Struct(s) => s.members.values().map(|m| m.type_.clone()).collect(),
        Artifact::Comment(_) | Artifact::Enum(_) | Artifact::Patch(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binsync_core::artifact::{FunctionArgument, FunctionHeader, GlobalVariable};
    use std::collections::BTreeMap;

    fn header(addr: u64, name: &str) -> Artifact {
        Artifact::FunctionHeader(FunctionHeader {
            addr,
            name: name.to_owned(),
            return_type: String::new(),
            args: BTreeMap::new(),
            last_change: None,
        })
    }

    #[test]
    fn merge_overwrite_prefers_b() {
        let a = header(0x1000, "foo");
        let b = header(0x1000, "bar");
        let merged = merge_artifacts(Some(&a), Some(&b), MergeLevel::Overwrite).unwrap();
        assert_eq!(merged, b);
    }

    #[test]
    fn merge_missing_b_returns_a() {
        let a = header(0x1000, "foo");
        let merged = merge_artifacts(Some(&a), None, MergeLevel::NonConflicting).unwrap();
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_missing_a_returns_b() {
        let b = header(0x1000, "bar");
        let merged = merge_artifacts(None, Some(&b), MergeLevel::NonConflicting).unwrap();
        assert_eq!(merged, b);
    }

    #[test]
    fn merge_nonconflicting_unions_args() {
        let mut a_args = BTreeMap::new();
        a_args.insert(0, FunctionArgument { index: 0, name: "a".into(), type_: "int".into() });
        let a = Artifact::FunctionHeader(FunctionHeader {
            addr: 0x1000,
            name: "foo".into(),
            return_type: String::new(),
            args: a_args,
            last_change: None,
        });
        let mut b_args = BTreeMap::new();
        b_args.insert(1, FunctionArgument { index: 1, name: "b".into(), type_: "char*".into() });
        let b = Artifact::FunctionHeader(FunctionHeader {
            addr: 0x1000,
            name: String::new(),
            return_type: "void".into(),
            args: b_args,
            last_change: None,
        });
        let merged = merge_artifacts(Some(&a), Some(&b), MergeLevel::NonConflicting).unwrap();
        let Artifact::FunctionHeader(h) = merged else { panic!("wrong variant") };
        assert_eq!(h.name, "foo");
        assert_eq!(h.return_type, "void");
        assert_eq!(h.args.len(), 2);
    }

    #[test]
    fn referenced_type_strings_walks_function_header_and_stack_vars() {
        let mut args = BTreeMap::new();
        args.insert(0, FunctionArgument { index: 0, name: "s".into(), type_: "my_struct_t".into() });
        let f = Artifact::Function(Function {
            addr: 0x1000,
            size: 0x20,
            header: Some(FunctionHeader {
                addr: 0x1000,
                name: "foo".into(),
                return_type: "int".into(),
                args,
                last_change: None,
            }),
            stack_vars: BTreeMap::new(),
            last_change: None,
        });
        let types = referenced_type_strings(&f);
        assert!(types.contains(&"int".to_owned()));
        assert!(types.contains(&"my_struct_t".to_owned()));
    }

    #[test]
    fn keys_of_type_collects_global_vars() {
        let mut state = State::new("alice");
        state.set_global_var(
            GlobalVariable {
                addr: 0x4000,
                name: "g".into(),
                type_: "int".into(),
                last_change: None,
            },
            Utc::now(),
        );
        let keys = keys_of_type(&state, ArtifactType::GlobalVariable);
        assert_eq!(keys, vec![ArtifactKey::Addr(0x4000)]);
    }
}
