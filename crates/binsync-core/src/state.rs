//! A single user's view of the shared annotation database (§3, §6).
//!
//! `State` is the in-memory form; [`State::dump`]/[`State::parse`] convert
//! to and from the on-disk TOML layout stored per-branch. All setters apply
//! the §3 invariants: a function-scoped artifact pushed for an address with
//! no existing `Function` creates a zero-size placeholder first, and
//! setting an artifact that's already structurally identical is a no-op —
//! no dirty bump, no `last_change` stamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::{
    Artifact, ArtifactKey, ArtifactType, Comment, Enum, Function, FunctionHeader, GlobalVariable,
    Patch, Struct, StructMember,
};
use crate::error::CoreError;
use crate::format::{self, HexI64, HexU64};

/// Current on-disk schema version. Bumped when the wire format changes in
/// a way old readers can't tolerate.
pub const SCHEMA_VERSION: u64 = 1;

/// One user's full set of pushed annotations.
#[derive(Clone, Debug, Default)]
pub struct State {
    /// The user this state belongs to (matches the `binsync/<user>` branch).
    pub user: String,
    /// Schema version this state was parsed under (or [`SCHEMA_VERSION`] for
    /// freshly created states).
    pub version: u64,
    /// Wall-clock time of the last successful push from this state, if any.
    pub last_push_time: Option<DateTime<Utc>>,
    /// Identifier and type of the artifact most recently pushed.
    pub last_push_artifact: Option<(ArtifactKey, ArtifactType)>,
    /// The message attached to the commit that produced this state.
    pub last_commit_msg: String,
    dirty: bool,
    functions: BTreeMap<u64, Function>,
    comments: BTreeMap<u64, Comment>,
    structs: BTreeMap<String, Struct>,
    patches: BTreeMap<u64, Patch>,
    global_vars: BTreeMap<u64, GlobalVariable>,
    enums: BTreeMap<String, Enum>,
}

impl State {
    /// Construct a fresh, empty state for `user`.
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            version: SCHEMA_VERSION,
            last_push_time: None,
            last_push_artifact: None,
            last_commit_msg: String::new(),
            dirty: false,
            functions: BTreeMap::new(),
            comments: BTreeMap::new(),
            structs: BTreeMap::new(),
            patches: BTreeMap::new(),
            global_vars: BTreeMap::new(),
            enums: BTreeMap::new(),
        }
    }

    /// `true` if any setter has changed this state since it was parsed or
    /// constructed.
    #[must_use]
    pub const fn dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag — called by [`crate::client::Client`] right
    /// after a successful commit.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Record that `key`/`kind` was just pushed, stamping `last_push_time`
    /// to `now`.
    pub fn note_push(&mut self, key: ArtifactKey, kind: ArtifactType, now: DateTime<Utc>) {
        self.last_push_artifact = Some((key, kind));
        self.last_push_time = Some(now);
    }

    // -- Functions --------------------------------------------------------

    /// Look up a function by its exact entry address.
    #[must_use]
    pub fn get_function(&self, addr: u64) -> Option<&Function> {
        self.functions.get(&addr)
    }

    /// Find the function whose `[addr, addr + size)` range contains `addr`.
    ///
    /// `O(n)` over the function table; acceptable at binsync's scale (a few
    /// thousand functions per binary) and matches the original's linear
    /// scan (§3 invariant: a function-scoped artifact belongs to exactly
    /// one function, chosen by address containment).
    #[must_use]
    pub fn find_func_for_addr(&self, addr: u64) -> Option<&Function> {
        self.functions.values().find(|f| f.contains_addr(addr))
    }

    /// Insert or overwrite a function wholesale. Returns `true` if the
    /// stored value changed.
    pub fn set_function(&mut self, func: Function, now: DateTime<Utc>) -> bool {
        let addr = func.addr;
        if self.functions.get(&addr) == Some(&func) {
            return false;
        }
        let mut stamped = func;
        stamped.last_change = Some(now);
        self.functions.insert(addr, stamped);
        self.dirty = true;
        true
    }

    /// Set a function's header, creating a placeholder `Function` first if
    /// none exists at `header.addr`.
    pub fn set_function_header(&mut self, header: FunctionHeader, now: DateTime<Utc>) -> bool {
        let addr = header.addr;
        self.ensure_function_placeholder(addr);
        let func = self.functions.get_mut(&addr).expect("just ensured");
        if func.header.as_ref() == Some(&header) {
            return false;
        }
        func.header = Some(header);
        func.last_change = Some(now);
        self.dirty = true;
        true
    }

    /// Set a stack variable, creating a placeholder `Function` first if
    /// none exists at `var.addr`.
    pub fn set_stack_variable(
        &mut self,
        var: crate::artifact::StackVariable,
        now: DateTime<Utc>,
    ) -> bool {
        let addr = var.addr;
        let offset = var.offset;
        self.ensure_function_placeholder(addr);
        let func = self.functions.get_mut(&addr).expect("just ensured");
        if func.stack_vars.get(&offset) == Some(&var) {
            return false;
        }
        func.stack_vars.insert(offset, var);
        func.last_change = Some(now);
        self.dirty = true;
        true
    }

    fn ensure_function_placeholder(&mut self, addr: u64) {
        self.functions
            .entry(addr)
            .or_insert_with(|| Function::placeholder(addr, 0));
    }

    /// All functions, keyed by entry address.
    #[must_use]
    pub const fn functions(&self) -> &BTreeMap<u64, Function> {
        &self.functions
    }

    // -- Comments -----------------------------------------------------------

    /// Look up a comment by address.
    #[must_use]
    pub fn get_comment(&self, addr: u64) -> Option<&Comment> {
        self.comments.get(&addr)
    }

    /// Set a comment. Returns `true` if changed.
    pub fn set_comment(&mut self, comment: Comment, now: DateTime<Utc>) -> bool {
        let addr = comment.addr;
        if self.comments.get(&addr) == Some(&comment) {
            return false;
        }
        let mut stamped = comment;
        stamped.last_change = Some(now);
        self.comments.insert(addr, stamped);
        self.dirty = true;
        true
    }

    /// All comments, keyed by address.
    #[must_use]
    pub const fn comments(&self) -> &BTreeMap<u64, Comment> {
        &self.comments
    }

    // -- Global variables -----------------------------------------------------

    /// Look up a global variable by address.
    #[must_use]
    pub fn get_global_var(&self, addr: u64) -> Option<&GlobalVariable> {
        self.global_vars.get(&addr)
    }

    /// Set a global variable. Returns `true` if changed.
    pub fn set_global_var(&mut self, var: GlobalVariable, now: DateTime<Utc>) -> bool {
        let addr = var.addr;
        if self.global_vars.get(&addr) == Some(&var) {
            return false;
        }
        let mut stamped = var;
        stamped.last_change = Some(now);
        self.global_vars.insert(addr, stamped);
        self.dirty = true;
        true
    }

    /// All global variables, keyed by address.
    #[must_use]
    pub const fn global_vars(&self) -> &BTreeMap<u64, GlobalVariable> {
        &self.global_vars
    }

    // -- Structs --------------------------------------------------------------

    /// Look up a struct by name.
    #[must_use]
    pub fn get_struct(&self, name: &str) -> Option<&Struct> {
        self.structs.get(name)
    }

    /// Set a struct. Returns `true` if changed.
    pub fn set_struct(&mut self, s: Struct, now: DateTime<Utc>) -> bool {
        let name = s.name.clone();
        if self.structs.get(&name) == Some(&s) {
            return false;
        }
        let mut stamped = s;
        stamped.last_change = Some(now);
        self.structs.insert(name, stamped);
        self.dirty = true;
        true
    }

    /// All structs, keyed by name.
    #[must_use]
    pub const fn structs(&self) -> &BTreeMap<String, Struct> {
        &self.structs
    }

    // -- Enums ------------------------------------------------------------

    /// Look up an enum by name.
    #[must_use]
    pub fn get_enum(&self, name: &str) -> Option<&Enum> {
        self.enums.get(name)
    }

    /// Set an enum. Returns `true` if changed.
    pub fn set_enum(&mut self, e: Enum, now: DateTime<Utc>) -> bool {
        let name = e.name.clone();
        if self.enums.get(&name) == Some(&e) {
            return false;
        }
        let mut stamped = e;
        stamped.last_change = Some(now);
        self.enums.insert(name, stamped);
        self.dirty = true;
        true
    }

    /// All enums, keyed by name.
    #[must_use]
    pub const fn enums(&self) -> &BTreeMap<String, Enum> {
        &self.enums
    }

    // -- Patches ------------------------------------------------------------

    /// Look up a patch by offset.
    #[must_use]
    pub fn get_patch(&self, offset: u64) -> Option<&Patch> {
        self.patches.get(&offset)
    }

    /// Set a patch. Returns `true` if changed.
    pub fn set_patch(&mut self, patch: Patch, now: DateTime<Utc>) -> bool {
        let offset = patch.offset;
        if self.patches.get(&offset) == Some(&patch) {
            return false;
        }
        let mut stamped = patch;
        stamped.last_change = Some(now);
        self.patches.insert(offset, stamped);
        self.dirty = true;
        true
    }

    /// All patches, ordered by offset.
    #[must_use]
    pub const fn patches(&self) -> &BTreeMap<u64, Patch> {
        &self.patches
    }

    // -- Generic dispatch over Artifact (§9) -----------------------------

    /// Route `artifact` to its matching typed setter. Returns `true` if
    /// the stored value changed. `StackVariable` is not addressable here
    /// (it needs both the owning function's address and its own offset);
    /// use [`State::set_stack_variable`] directly for that variant.
    pub fn set_artifact(&mut self, artifact: Artifact, now: DateTime<Utc>) -> bool {
        match artifact {
            Artifact::Function(f) => self.set_function(f, now),
            Artifact::FunctionHeader(h) => self.set_function_header(h, now),
            Artifact::StackVariable(v) => self.set_stack_variable(v, now),
            Artifact::Comment(c) => self.set_comment(c, now),
            Artifact::GlobalVariable(g) => self.set_global_var(g, now),
            Artifact::Struct(s) => self.set_struct(s, now),
            Artifact::Enum(e) => self.set_enum(e, now),
            Artifact::Patch(p) => self.set_patch(p, now),
        }
    }

    /// Generic getter dispatch over [`ArtifactType`]/[`ArtifactKey`].
    /// Returns `None` for `StackVariable` — look it up via the owning
    /// `Function`'s `stack_vars` map instead.
    #[must_use]
    pub fn get_artifact(&self, kind: ArtifactType, key: &ArtifactKey) -> Option<Artifact> {
        match (kind, key) {
            (ArtifactType::Function, ArtifactKey::Addr(a)) => {
                self.get_function(*a).cloned().map(Artifact::Function)
            }
            (ArtifactType::FunctionHeader, ArtifactKey::Addr(a)) => self
                .get_function(*a)
                .and_then(|f| f.header.clone())
                .map(Artifact::FunctionHeader),
            (ArtifactType::Comment, ArtifactKey::Addr(a)) => {
                self.get_comment(*a).cloned().map(Artifact::Comment)
            }
            (ArtifactType::GlobalVariable, ArtifactKey::Addr(a)) => {
                self.get_global_var(*a).cloned().map(Artifact::GlobalVariable)
            }
            (ArtifactType::Struct, ArtifactKey::Name(n)) => {
                self.get_struct(n).cloned().map(Artifact::Struct)
            }
            (ArtifactType::Enum, ArtifactKey::Name(n)) => {
                self.get_enum(n).cloned().map(Artifact::Enum)
            }
            (ArtifactType::Patch, ArtifactKey::Addr(a)) => {
                self.get_patch(*a).cloned().map(Artifact::Patch)
            }
            _ => None,
        }
    }

    /// Clear the `last_change` stamp of the artifact at `kind`/`key`, in
    /// place, if one is stored. Used after committing a merged (rather
    /// than locally-edited) artifact so it never looks like a fresh local
    /// edit (§9: `last_change` as a semantic flag, not a timestamp to sort
    /// by).
    pub fn clear_artifact_last_change(&mut self, kind: ArtifactType, key: &ArtifactKey) {
        match (kind, key) {
            (ArtifactType::Function, ArtifactKey::Addr(a)) => {
                if let Some(f) = self.functions.get_mut(a) {
                    f.last_change = None;
                }
            }
            (ArtifactType::FunctionHeader, ArtifactKey::Addr(a)) => {
                if let Some(f) = self.functions.get_mut(a) {
                    if let Some(h) = &mut f.header {
                        h.last_change = None;
                    }
                }
            }
            (ArtifactType::Comment, ArtifactKey::Addr(a)) => {
                if let Some(c) = self.comments.get_mut(a) {
                    c.last_change = None;
                }
            }
            (ArtifactType::GlobalVariable, ArtifactKey::Addr(a)) => {
                if let Some(g) = self.global_vars.get_mut(a) {
                    g.last_change = None;
                }
            }
            (ArtifactType::Struct, ArtifactKey::Name(n)) => {
                if let Some(s) = self.structs.get_mut(n) {
                    s.last_change = None;
                }
            }
            (ArtifactType::Enum, ArtifactKey::Name(n)) => {
                if let Some(e) = self.enums.get_mut(n) {
                    e.last_change = None;
                }
            }
            (ArtifactType::Patch, ArtifactKey::Addr(a)) => {
                if let Some(p) = self.patches.get_mut(a) {
                    p.last_change = None;
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// On-disk wire format (§6)
// ---------------------------------------------------------------------------

/// A path within a branch's tree, paired with its serialized TOML content.
pub type StateFile = (String, String);

#[derive(Serialize, Deserialize)]
struct MetadataWire {
    user: String,
    version: u64,
    last_push_time: Option<DateTime<Utc>>,
    last_push_artifact_addr: Option<HexU64>,
    last_push_artifact_name: Option<String>,
    last_push_artifact_type: Option<String>,
    last_commit_msg: String,
}

#[derive(Serialize, Deserialize)]
struct FunctionArgWire {
    index: u64,
    name: String,
    #[serde(rename = "type")]
    type_: String,
}

#[derive(Serialize, Deserialize, Default)]
struct FunctionHeaderWire {
    name: String,
    return_type: String,
    #[serde(default)]
    args: Vec<FunctionArgWire>,
}

#[derive(Serialize, Deserialize)]
struct StackVarWire {
    offset: HexI64,
    name: String,
    #[serde(rename = "type")]
    type_: String,
}

#[derive(Serialize, Deserialize)]
struct FunctionWire {
    addr: HexU64,
    size: HexU64,
    #[serde(default)]
    header: Option<FunctionHeaderWire>,
    #[serde(default)]
    stack_vars: Vec<StackVarWire>,
}

#[derive(Serialize, Deserialize)]
struct StructMemberWire {
    offset: HexU64,
    name: String,
    #[serde(rename = "type")]
    type_: String,
    size: HexU64,
}

#[derive(Serialize, Deserialize)]
struct StructWire {
    name: String,
    size: HexU64,
    #[serde(default)]
    members: Vec<StructMemberWire>,
}

#[derive(Serialize, Deserialize)]
struct CommentWire {
    addr: HexU64,
    comment: String,
    #[serde(default)]
    decompiled: bool,
}

#[derive(Serialize, Deserialize)]
struct GlobalVarWire {
    addr: HexU64,
    name: String,
    #[serde(rename = "type")]
    type_: String,
}

#[derive(Serialize, Deserialize)]
struct PatchWire {
    offset: HexU64,
    bytes: String, // lowercase hex
}

#[derive(Serialize, Deserialize)]
struct EnumWire {
    name: String,
    members: BTreeMap<String, i64>,
}

#[derive(Serialize, Deserialize, Default)]
struct CommentsFileWire {
    #[serde(default)]
    comment: Vec<CommentWire>,
}

#[derive(Serialize, Deserialize, Default)]
struct PatchesFileWire {
    #[serde(default)]
    patch: Vec<PatchWire>,
}

#[derive(Serialize, Deserialize, Default)]
struct GlobalVarsFileWire {
    #[serde(default)]
    global_var: Vec<GlobalVarWire>,
}

#[derive(Serialize, Deserialize, Default)]
struct EnumsFileWire {
    #[serde(default)]
    r#enum: Vec<EnumWire>,
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn bytes_from_hex(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err(format!("odd-length hex byte string: {s:?}"));
    }
    s.as_bytes()
        .chunks(2)
        .map(|c| {
            let pair = std::str::from_utf8(c).map_err(|e| e.to_string())?;
            u8::from_str_radix(pair, 16).map_err(|e| e.to_string())
        })
        .collect()
}

impl State {
    /// Serialize this state into the per-branch file set described in §6:
    /// `metadata.toml`, one `functions/<addr>.toml` per function, one
    /// `structs/<name>.toml` per struct, and single `comments.toml` /
    /// `patches.toml` / `global_vars.toml` / `enums.toml` tables.
    #[must_use]
    pub fn dump(&self) -> Vec<StateFile> {
        let mut files = Vec::new();

        let (last_push_artifact_addr, last_push_artifact_name, last_push_artifact_type) =
            match &self.last_push_artifact {
                Some((ArtifactKey::Addr(a), kind)) => {
                    (Some(HexU64(*a)), None, Some(format!("{kind:?}")))
                }
                Some((ArtifactKey::Name(n), kind)) => {
                    (None, Some(n.clone()), Some(format!("{kind:?}")))
                }
                None => (None, None, None),
            };
        let metadata = MetadataWire {
            user: self.user.clone(),
            version: self.version,
            last_push_time: self.last_push_time,
            last_push_artifact_addr,
            last_push_artifact_name,
            last_push_artifact_type,
            last_commit_msg: self.last_commit_msg.clone(),
        };
        files.push((
            "metadata.toml".to_owned(),
            toml::to_string_pretty(&metadata).unwrap_or_default(),
        ));

        for func in self.functions.values() {
            let wire = FunctionWire {
                addr: HexU64(func.addr),
                size: HexU64(func.size),
                header: func.header.as_ref().map(|h| FunctionHeaderWire {
                    name: h.name.clone(),
                    return_type: h.return_type.clone(),
                    args: h
                        .args
                        .values()
                        .map(|a| FunctionArgWire {
                            index: a.index,
                            name: a.name.clone(),
                            type_: a.type_.clone(),
                        })
                        .collect(),
                }),
                stack_vars: func
                    .stack_vars
                    .values()
                    .map(|v| StackVarWire {
                        offset: HexI64(v.offset),
                        name: v.name.clone(),
                        type_: v.type_.clone(),
                    })
                    .collect(),
            };
            files.push((
                format!("functions/{}", format::addr_filename(func.addr)),
                toml::to_string_pretty(&wire).unwrap_or_default(),
            ));
        }

        for s in self.structs.values() {
            let wire = StructWire {
                name: s.name.clone(),
                size: HexU64(s.size),
                members: s
                    .members
                    .values()
                    .map(|m| StructMemberWire {
                        offset: HexU64(m.offset),
                        name: m.name.clone(),
                        type_: m.type_.clone(),
                        size: HexU64(m.size),
                    })
                    .collect(),
            };
            files.push((
                format!("structs/{}", format::struct_filename(&s.name)),
                toml::to_string_pretty(&wire).unwrap_or_default(),
            ));
        }

        let comments_wire = CommentsFileWire {
            comment: self
                .comments
                .values()
                .map(|c| CommentWire {
                    addr: HexU64(c.addr),
                    comment: c.comment.clone(),
                    decompiled: c.decompiled,
                })
                .collect(),
        };
        files.push((
            "comments.toml".to_owned(),
            toml::to_string_pretty(&comments_wire).unwrap_or_default(),
        ));

        let patches_wire = PatchesFileWire {
            patch: self
                .patches
                .values()
                .map(|p| PatchWire {
                    offset: HexU64(p.offset),
                    bytes: bytes_to_hex(&p.bytes),
                })
                .collect(),
        };
        files.push((
            "patches.toml".to_owned(),
            toml::to_string_pretty(&patches_wire).unwrap_or_default(),
        ));

        let global_vars_wire = GlobalVarsFileWire {
            global_var: self
                .global_vars
                .values()
                .map(|g| GlobalVarWire {
                    addr: HexU64(g.addr),
                    name: g.name.clone(),
                    type_: g.type_.clone(),
                })
                .collect(),
        };
        files.push((
            "global_vars.toml".to_owned(),
            toml::to_string_pretty(&global_vars_wire).unwrap_or_default(),
        ));

        let enums_wire = EnumsFileWire {
            r#enum: self
                .enums
                .values()
                .map(|e| EnumWire {
                    name: e.name.clone(),
                    members: e.members.clone(),
                })
                .collect(),
        };
        files.push((
            "enums.toml".to_owned(),
            toml::to_string_pretty(&enums_wire).unwrap_or_default(),
        ));

        files
    }

    /// Parse a state back from the file set produced by [`State::dump`].
    ///
    /// # Errors
    /// Returns [`CoreError::MetadataNotFound`] if `metadata.toml` is absent
    /// (§6: the branch is skipped entirely by callers in that case), or
    /// [`CoreError::MalformedState`] if any file fails to decode.
    pub fn parse(user: &str, files: &[StateFile]) -> Result<Self, CoreError> {
        let lookup = |path: &str| files.iter().find(|(p, _)| p == path).map(|(_, c)| c.as_str());

        let metadata_raw = lookup("metadata.toml").ok_or_else(|| CoreError::MetadataNotFound {
            branch: format!("binsync/{user}"),
        })?;
        let metadata: MetadataWire =
            toml::from_str(metadata_raw).map_err(|e| CoreError::MalformedState {
                path: "metadata.toml".to_owned(),
                reason: e.to_string(),
            })?;

        let last_push_artifact = match (
            metadata.last_push_artifact_addr,
            &metadata.last_push_artifact_name,
            &metadata.last_push_artifact_type,
        ) {
            (Some(addr), _, Some(kind)) => Some((ArtifactKey::Addr(addr.0), parse_kind(kind)?)),
            (None, Some(name), Some(kind)) => {
                Some((ArtifactKey::Name(name.clone()), parse_kind(kind)?))
            }
            _ => None,
        };

        let mut state = Self {
            user: metadata.user,
            version: metadata.version,
            last_push_time: metadata.last_push_time,
            last_push_artifact,
            last_commit_msg: metadata.last_commit_msg,
            dirty: false,
            functions: BTreeMap::new(),
            comments: BTreeMap::new(),
            structs: BTreeMap::new(),
            patches: BTreeMap::new(),
            global_vars: BTreeMap::new(),
            enums: BTreeMap::new(),
        };

        for (path, content) in files {
            if let Some(rest) = path.strip_prefix("functions/") {
                let wire: FunctionWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                let addr = format::parse_addr_filename(rest).map_err(|reason| {
                    CoreError::MalformedState {
                        path: path.clone(),
                        reason,
                    }
                })?;
                let header = wire.header.map(|h| FunctionHeader {
                    addr,
                    name: h.name,
                    return_type: h.return_type,
                    args: h
                        .args
                        .into_iter()
                        .map(|a| {
                            (
                                a.index,
                                crate::artifact::FunctionArgument {
                                    index: a.index,
                                    name: a.name,
                                    type_: a.type_,
                                },
                            )
                        })
                        .collect(),
                    last_change: None,
                });
                let stack_vars = wire
                    .stack_vars
                    .into_iter()
                    .map(|v| {
                        (
                            v.offset.0,
                            crate::artifact::StackVariable {
                                addr,
                                offset: v.offset.0,
                                name: v.name,
                                type_: v.type_,
                                last_change: None,
                            },
                        )
                    })
                    .collect();
                state.functions.insert(
                    addr,
                    Function {
                        addr,
                        size: wire.size.0,
                        header,
                        stack_vars,
                        last_change: None,
                    },
                );
            } else if let Some(rest) = path.strip_prefix("structs/") {
                let wire: StructWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                let _ = rest;
                let members = wire
                    .members
                    .into_iter()
                    .map(|m| {
                        (
                            m.offset.0,
                            StructMember {
                                offset: m.offset.0,
                                name: m.name,
                                type_: m.type_,
                                size: m.size.0,
                            },
                        )
                    })
                    .collect();
                state.structs.insert(
                    wire.name.clone(),
                    Struct {
                        name: wire.name,
                        size: wire.size.0,
                        members,
                        last_change: None,
                    },
                );
            } else if path == "comments.toml" {
                let wire: CommentsFileWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                for c in wire.comment {
                    state.comments.insert(
                        c.addr.0,
                        Comment {
                            addr: c.addr.0,
                            comment: c.comment,
                            decompiled: c.decompiled,
                            last_change: None,
                        },
                    );
                }
            } else if path == "patches.toml" {
                let wire: PatchesFileWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                for p in wire.patch {
                    let bytes = bytes_from_hex(&p.bytes).map_err(|reason| {
                        CoreError::MalformedState {
                            path: path.clone(),
                            reason,
                        }
                    })?;
                    state.patches.insert(
                        p.offset.0,
                        Patch {
                            offset: p.offset.0,
                            bytes,
                            last_change: None,
                        },
                    );
                }
            } else if path == "global_vars.toml" {
                let wire: GlobalVarsFileWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                for g in wire.global_var {
                    state.global_vars.insert(
                        g.addr.0,
                        GlobalVariable {
                            addr: g.addr.0,
                            name: g.name,
                            type_: g.type_,
                            last_change: None,
                        },
                    );
                }
            } else if path == "enums.toml" {
                let wire: EnumsFileWire =
                    toml::from_str(content).map_err(|e| CoreError::MalformedState {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                for e in wire.r#enum {
                    state.enums.insert(
                        e.name.clone(),
                        Enum {
                            name: e.name,
                            members: e.members,
                            last_change: None,
                        },
                    );
                }
            }
        }

        Ok(state)
    }
}

fn parse_kind(s: &str) -> Result<ArtifactType, CoreError> {
    match s {
        "Function" => Ok(ArtifactType::Function),
        "FunctionHeader" => Ok(ArtifactType::FunctionHeader),
        "StackVariable" => Ok(ArtifactType::StackVariable),
        "Comment" => Ok(ArtifactType::Comment),
        "GlobalVariable" => Ok(ArtifactType::GlobalVariable),
        "Struct" => Ok(ArtifactType::Struct),
        "Enum" => Ok(ArtifactType::Enum),
        "Patch" => Ok(ArtifactType::Patch),
        other => Err(CoreError::MalformedState {
            path: "metadata.toml".to_owned(),
            reason: format!("unknown artifact type {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::StackVariable;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn set_function_header_creates_placeholder() {
        let mut state = State::new("alice");
        assert!(state.get_function(0x401000).is_none());
        let changed = state.set_function_header(FunctionHeader::new(0x401000), now());
        assert!(changed);
        assert!(state.dirty());
        let func = state.get_function(0x401000).unwrap();
        assert_eq!(func.size, 0);
        assert!(func.header.is_some());
    }

    #[test]
    fn setting_identical_value_is_noop() {
        let mut state = State::new("alice");
        let header = FunctionHeader::new(0x401000);
        assert!(state.set_function_header(header.clone(), now()));
        state.mark_clean();
        assert!(!state.set_function_header(header, now()));
        assert!(!state.dirty());
    }

    #[test]
    fn set_stack_variable_creates_placeholder() {
        let mut state = State::new("alice");
        let var = StackVariable {
            addr: 0x402000,
            offset: -8,
            name: "local".into(),
            type_: "int".into(),
            last_change: None,
        };
        assert!(state.set_stack_variable(var, now()));
        let func = state.get_function(0x402000).unwrap();
        assert_eq!(func.stack_vars.len(), 1);
    }

    #[test]
    fn find_func_for_addr_uses_containment() {
        let mut state = State::new("alice");
        state.set_function(Function::placeholder(0x401000, 0x20), now());
        let found = state.find_func_for_addr(0x401010).unwrap();
        assert_eq!(found.addr, 0x401000);
        assert!(state.find_func_for_addr(0x403000).is_none());
    }

    #[test]
    fn dump_then_parse_roundtrips_structurally() {
        let mut state = State::new("alice");
        state.set_function_header(
            FunctionHeader {
                addr: 0x401000,
                name: "main".into(),
                return_type: "int".into(),
                args: BTreeMap::new(),
                last_change: None,
            },
            now(),
        );
        state.set_struct(
            Struct {
                name: "S1".into(),
                size: 8,
                members: BTreeMap::new(),
                last_change: None,
            },
            now(),
        );
        state.set_comment(
            Comment {
                addr: 0x401000,
                comment: "entry point".into(),
                decompiled: false,
                last_change: None,
            },
            now(),
        );
        state.set_patch(
            Patch {
                offset: 0x10,
                bytes: vec![0x90, 0x90],
                last_change: None,
            },
            now(),
        );

        let files = state.dump();
        let parsed = State::parse("alice", &files).unwrap();

        assert_eq!(parsed.get_function(0x401000).unwrap().header.as_ref().unwrap().name, "main");
        assert_eq!(parsed.get_struct("S1").unwrap().size, 8);
        assert_eq!(parsed.get_comment(0x401000).unwrap().comment, "entry point");
        assert_eq!(parsed.get_patch(0x10).unwrap().bytes, vec![0x90, 0x90]);
    }

    #[test]
    fn parse_missing_metadata_errors() {
        let err = State::parse("alice", &[]).unwrap_err();
        assert!(matches!(err, CoreError::MetadataNotFound { .. }));
    }

    #[test]
    fn set_artifact_dispatches_by_variant() {
        let mut state = State::new("alice");
        let changed = state.set_artifact(
            Artifact::GlobalVariable(GlobalVariable {
                addr: 0x4000,
                name: "g_count".into(),
                type_: "int".into(),
                last_change: None,
            }),
            now(),
        );
        assert!(changed);
        assert_eq!(state.get_global_var(0x4000).unwrap().name, "g_count");
    }

    #[test]
    fn get_artifact_dispatches_by_kind_and_key() {
        let mut state = State::new("alice");
        state.set_struct(
            Struct {
                name: "S1".into(),
                size: 4,
                members: BTreeMap::new(),
                last_change: None,
            },
            now(),
        );
        let fetched = state.get_artifact(ArtifactType::Struct, &ArtifactKey::Name("S1".into()));
        assert!(matches!(fetched, Some(Artifact::Struct(s)) if s.name == "S1"));
        assert!(state
            .get_artifact(ArtifactType::Struct, &ArtifactKey::Name("missing".into()))
            .is_none());
    }

    #[test]
    fn clear_artifact_last_change_clears_in_place() {
        let mut state = State::new("alice");
        state.set_global_var(
            GlobalVariable {
                addr: 0x4000,
                name: "g".into(),
                type_: "int".into(),
                last_change: None,
            },
            now(),
        );
        assert!(state.get_global_var(0x4000).unwrap().last_change.is_some());
        state.clear_artifact_last_change(ArtifactType::GlobalVariable, &ArtifactKey::Addr(0x4000));
        assert!(state.get_global_var(0x4000).unwrap().last_change.is_none());
    }
}
