//! The artifact model — typed reverse-engineering annotations.
//!
//! [`Artifact`] is a tagged union over every kind of thing a user can
//! annotate. Each payload struct implements [`ArtifactKind`] (key + change
//! stamp) and [`NonConflictMerge`] (field-wise union, preferring `self`).
//! Dispatch is by `match`, not by a lookup table — the equivalent of the
//! original's `ARTIFACT_SET_MAP`/`ARTIFACT_GET_MAP` collapses into pattern
//! matching here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key used to look up an artifact within its container.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKey {
    /// A function entry address, struct member offset, or similar.
    Addr(u64),
    /// A struct or enum name.
    Name(String),
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Addr(a) => write!(f, "{a:#010x}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

/// Behavior shared by every artifact payload type.
pub trait ArtifactKind {
    /// The canonical identifier for this artifact within its container.
    fn key(&self) -> ArtifactKey;

    /// The wall-clock time this artifact was last set, or `None` if it has
    /// never been stamped, or if it arrived via a merge (§9 design note:
    /// `last_change` is a semantic flag, modeled as `Option`, never a magic
    /// sentinel value).
    fn last_change(&self) -> Option<DateTime<Utc>>;

    /// Clear the change stamp (used before merged artifacts are committed —
    /// a merged-in artifact must never appear "newer" than a local edit).
    fn clear_last_change(&mut self);

    /// Stamp the change time to `now`.
    fn set_last_change(&mut self, now: DateTime<Utc>);
}

/// Field-wise non-conflicting merge: overlay every non-empty field and
/// container entry of `other` onto `self`, preferring `self` wherever both
/// define a value.
pub trait NonConflictMerge: Sized {
    /// Merge options understood by the struct filler (`members`, `header`)
    /// to break circular struct-import dependencies (§4.A).
    type Options: Default;

    /// Produce a new artifact equal to `self` overlaid by `other`.
    fn nonconflict_merge(&self, other: &Self, opts: &Self::Options) -> Self;
}

fn merge_scalar<T: Clone>(a: &Option<T>, b: &Option<T>) -> Option<T> {
    a.clone().or_else(|| b.clone())
}

fn merge_string(a: &str, b: &str) -> String {
    if a.is_empty() { b.to_owned() } else { a.to_owned() }
}

fn merge_map<K: Clone + Ord, V: Clone + NonConflictMerge>(
    a: &BTreeMap<K, V>,
    b: &BTreeMap<K, V>,
    opts: &V::Options,
) -> BTreeMap<K, V> {
    let mut out = a.clone();
    for (k, bv) in b {
        out.entry(k.clone())
            .and_modify(|av| *av = av.nonconflict_merge(bv, opts))
            .or_insert_with(|| bv.clone());
    }
    out
}

// ---------------------------------------------------------------------------
// FunctionArgument
// ---------------------------------------------------------------------------

/// A single argument in a [`FunctionHeader`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionArgument {
    /// Positional index of the argument.
    pub index: u64,
    /// Argument name, empty if unknown.
    pub name: String,
    /// Argument type string, empty if unknown.
    pub type_: String,
}

impl PartialEq for FunctionArgument {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.name == other.name && self.type_ == other.type_
    }
}

impl NonConflictMerge for FunctionArgument {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            index: self.index,
            name: merge_string(&self.name, &other.name),
            type_: merge_string(&self.type_, &other.type_),
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionHeader
// ---------------------------------------------------------------------------

/// A function's prototype: name, return type, and argument list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FunctionHeader {
    /// Entry address of the owning function.
    pub addr: u64,
    /// Function name, empty if not renamed.
    pub name: String,
    /// Return type string, empty if unknown.
    pub return_type: String,
    /// Arguments keyed by positional index.
    pub args: BTreeMap<u64, FunctionArgument>,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl FunctionHeader {
    /// Construct an empty header for `addr`.
    #[must_use]
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            name: String::new(),
            return_type: String::new(),
            args: BTreeMap::new(),
            last_change: None,
        }
    }
}

impl PartialEq for FunctionHeader {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.name == other.name
            && self.return_type == other.return_type
            && self.args == other.args
    }
}

impl ArtifactKind for FunctionHeader {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(self.addr)
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for FunctionHeader {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, opts: &()) -> Self {
        Self {
            addr: self.addr,
            name: merge_string(&self.name, &other.name),
            return_type: merge_string(&self.return_type, &other.return_type),
            args: merge_map(&self.args, &other.args, opts),
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// StackVariable
// ---------------------------------------------------------------------------

/// A named, typed stack slot belonging to a function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StackVariable {
    /// Entry address of the owning function.
    pub addr: u64,
    /// Signed stack offset from the frame base.
    pub offset: i64,
    /// Variable name, empty if unknown.
    pub name: String,
    /// Variable type string, empty if unknown.
    pub type_: String,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl PartialEq for StackVariable {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.offset == other.offset
            && self.name == other.name
            && self.type_ == other.type_
    }
}

impl ArtifactKind for StackVariable {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(u64::from_ne_bytes(self.offset.to_ne_bytes()))
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for StackVariable {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            addr: self.addr,
            offset: self.offset,
            name: merge_string(&self.name, &other.name),
            type_: merge_string(&self.type_, &other.type_),
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

/// A function: its address range, optional prototype, and stack variables.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    /// Entry address.
    pub addr: u64,
    /// Size in bytes, as reported by the decompiler.
    pub size: u64,
    /// Prototype, if one has been attached.
    pub header: Option<FunctionHeader>,
    /// Stack variables keyed by signed offset.
    pub stack_vars: BTreeMap<i64, StackVariable>,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl Function {
    /// Construct a placeholder function with no header or stack variables.
    ///
    /// Used when a `FunctionHeader`, `StackVariable`, or in-function
    /// `Comment` is pushed for an address that has no `Function` yet
    /// (§3 invariants).
    #[must_use]
    pub fn placeholder(addr: u64, size: u64) -> Self {
        Self {
            addr,
            size,
            header: None,
            stack_vars: BTreeMap::new(),
            last_change: None,
        }
    }

    /// Returns `true` if `addr` falls within `[self.addr, self.addr + self.size)`.
    #[must_use]
    pub fn contains_addr(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.addr + self.size
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.size == other.size
            && self.header == other.header
            && self.stack_vars == other.stack_vars
    }
}

impl ArtifactKind for Function {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(self.addr)
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

/// Options for [`Function::nonconflict_merge`]: skip the header or
/// stack-variable subtree to break circular struct-import dependencies.
#[derive(Clone, Copy, Debug)]
pub struct FunctionMergeOptions {
    /// Merge the `header` field when `true` (default).
    pub header: bool,
    /// Merge the `stack_vars` map when `true` (default).
    pub stack_vars: bool,
}

impl Default for FunctionMergeOptions {
    fn default() -> Self {
        Self {
            header: true,
            stack_vars: true,
        }
    }
}

impl NonConflictMerge for Function {
    type Options = FunctionMergeOptions;

    fn nonconflict_merge(&self, other: &Self, opts: &FunctionMergeOptions) -> Self {
        let header = if opts.header {
            match (&self.header, &other.header) {
                (Some(a), Some(b)) => Some(a.nonconflict_merge(b, &())),
                (Some(a), None) => Some(a.clone()),
                (None, Some(b)) => Some(b.clone()),
                (None, None) => None,
            }
        } else {
            self.header.clone()
        };

        let stack_vars = if opts.stack_vars {
            merge_map(&self.stack_vars, &other.stack_vars, &())
        } else {
            self.stack_vars.clone()
        };

        Self {
            addr: self.addr,
            size: if self.size != 0 { self.size } else { other.size },
            header,
            stack_vars,
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// Comment
// ---------------------------------------------------------------------------

/// A free-text annotation attached to an address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Comment {
    /// Address the comment is attached to.
    pub addr: u64,
    /// Comment text.
    pub comment: String,
    /// `true` if this comment was copied from decompiler-generated pseudocode.
    ///
    /// Per §9 Open Question (c): retained for fidelity with the source
    /// format but never consulted by merge logic.
    pub decompiled: bool,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl PartialEq for Comment {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
            && self.comment == other.comment
            && self.decompiled == other.decompiled
    }
}

impl ArtifactKind for Comment {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(self.addr)
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for Comment {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            addr: self.addr,
            comment: merge_string(&self.comment, &other.comment),
            decompiled: self.decompiled,
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// GlobalVariable
// ---------------------------------------------------------------------------

/// A named, typed global variable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalVariable {
    /// Address of the variable.
    pub addr: u64,
    /// Variable name, empty if unknown.
    pub name: String,
    /// Variable type string, empty if unknown.
    pub type_: String,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl PartialEq for GlobalVariable {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr && self.name == other.name && self.type_ == other.type_
    }
}

impl ArtifactKind for GlobalVariable {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(self.addr)
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for GlobalVariable {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            addr: self.addr,
            name: merge_string(&self.name, &other.name),
            type_: merge_string(&self.type_, &other.type_),
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// StructMember / Struct
// ---------------------------------------------------------------------------

/// A single field within a [`Struct`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructMember {
    /// Byte offset within the struct.
    pub offset: u64,
    /// Member name.
    pub name: String,
    /// Member type string.
    pub type_: String,
    /// Member size in bytes.
    pub size: u64,
}

impl PartialEq for StructMember {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
            && self.name == other.name
            && self.type_ == other.type_
            && self.size == other.size
    }
}

impl NonConflictMerge for StructMember {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            offset: self.offset,
            name: merge_string(&self.name, &other.name),
            type_: merge_string(&self.type_, &other.type_),
            size: if self.size != 0 { self.size } else { other.size },
        }
    }
}

/// A user-defined structure: a name, total size, and members by offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Struct {
    /// Struct name.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Members keyed by byte offset.
    pub members: BTreeMap<u64, StructMember>,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl Struct {
    /// A struct with `name`/`size` but no members — used for the
    /// header-first phase of `discover_and_import_user_defined_types`
    /// (§4.E, §9) to break cyclic struct references.
    #[must_use]
    pub fn header_only(name: String, size: u64) -> Self {
        Self {
            name,
            size,
            members: BTreeMap::new(),
            last_change: None,
        }
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.size == other.size && self.members == other.members
    }
}

impl ArtifactKind for Struct {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Name(self.name.clone())
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

/// Options for [`Struct::nonconflict_merge`]: skip the `members` subtree
/// (§4.A, §9 — used to import struct headers before members to break
/// cyclic references).
#[derive(Clone, Copy, Debug)]
pub struct StructMergeOptions {
    /// Merge the `members` map when `true` (default).
    pub members: bool,
}

impl Default for StructMergeOptions {
    fn default() -> Self {
        Self { members: true }
    }
}

impl NonConflictMerge for Struct {
    type Options = StructMergeOptions;

    fn nonconflict_merge(&self, other: &Self, opts: &StructMergeOptions) -> Self {
        let members = if opts.members {
            merge_map(&self.members, &other.members, &())
        } else {
            self.members.clone()
        };
        Self {
            name: self.name.clone(),
            size: if self.size != 0 { self.size } else { other.size },
            members,
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// Enum
// ---------------------------------------------------------------------------

/// A user-defined enumeration: members by name with integer values.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Enum {
    /// Enum name.
    pub name: String,
    /// Members, keyed by member name, value is the underlying integer.
    pub members: BTreeMap<String, i64>,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl PartialEq for Enum {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.members == other.members
    }
}

impl ArtifactKind for Enum {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Name(self.name.clone())
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for Enum {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        let mut members = self.members.clone();
        for (k, v) in &other.members {
            members.entry(k.clone()).or_insert(*v);
        }
        Self {
            name: self.name.clone(),
            members,
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A raw binary patch at a file offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Patch {
    /// File offset the patch applies to.
    pub offset: u64,
    /// Replacement bytes.
    pub bytes: Vec<u8>,
    /// Last local-edit timestamp.
    #[serde(skip)]
    pub last_change: Option<DateTime<Utc>>,
}

impl PartialEq for Patch {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.bytes == other.bytes
    }
}

impl ArtifactKind for Patch {
    fn key(&self) -> ArtifactKey {
        ArtifactKey::Addr(self.offset)
    }

    fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change
    }

    fn clear_last_change(&mut self) {
        self.last_change = None;
    }

    fn set_last_change(&mut self, now: DateTime<Utc>) {
        self.last_change = Some(now);
    }
}

impl NonConflictMerge for Patch {
    type Options = ();

    fn nonconflict_merge(&self, other: &Self, _opts: &()) -> Self {
        Self {
            offset: self.offset,
            bytes: if self.bytes.is_empty() {
                other.bytes.clone()
            } else {
                self.bytes.clone()
            },
            last_change: self.last_change,
        }
    }
}

// ---------------------------------------------------------------------------
// Artifact — the tagged union
// ---------------------------------------------------------------------------

/// Any kind of thing a user can annotate and synchronize.
#[derive(Clone, Debug, PartialEq)]
pub enum Artifact {
    /// See [`Function`].
    Function(Function),
    /// See [`FunctionHeader`].
    FunctionHeader(FunctionHeader),
    /// See [`StackVariable`].
    StackVariable(StackVariable),
    /// See [`Comment`].
    Comment(Comment),
    /// See [`GlobalVariable`].
    GlobalVariable(GlobalVariable),
    /// See [`Struct`].
    Struct(Struct),
    /// See [`Enum`].
    Enum(Enum),
    /// See [`Patch`].
    Patch(Patch),
}

/// The kind of an [`Artifact`], independent of its payload.
///
/// The Rust replacement for `ARTIFACT_SET_MAP`/`ARTIFACT_GET_MAP` (§9):
/// dispatch on this enum is a compile-time `match`, not a runtime lookup
/// table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    /// See [`Function`].
    Function,
    /// See [`FunctionHeader`].
    FunctionHeader,
    /// See [`StackVariable`].
    StackVariable,
    /// See [`Comment`].
    Comment,
    /// See [`GlobalVariable`].
    GlobalVariable,
    /// See [`Struct`].
    Struct,
    /// See [`Enum`].
    Enum,
    /// See [`Patch`].
    Patch,
}

impl Artifact {
    /// The variant tag of this artifact.
    #[must_use]
    pub const fn artifact_type(&self) -> ArtifactType {
        match self {
            Self::Function(_) => ArtifactType::Function,
            Self::FunctionHeader(_) => ArtifactType::FunctionHeader,
            Self::StackVariable(_) => ArtifactType::StackVariable,
            Self::Comment(_) => ArtifactType::Comment,
            Self::GlobalVariable(_) => ArtifactType::GlobalVariable,
            Self::Struct(_) => ArtifactType::Struct,
            Self::Enum(_) => ArtifactType::Enum,
            Self::Patch(_) => ArtifactType::Patch,
        }
    }

    /// The canonical key of this artifact within its container.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        match self {
            Self::Function(a) => a.key(),
            Self::FunctionHeader(a) => a.key(),
            Self::StackVariable(a) => a.key(),
            Self::Comment(a) => a.key(),
            Self::GlobalVariable(a) => a.key(),
            Self::Struct(a) => a.key(),
            Self::Enum(a) => a.key(),
            Self::Patch(a) => a.key(),
        }
    }

    /// The last-change stamp of this artifact.
    #[must_use]
    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Function(a) => a.last_change(),
            Self::FunctionHeader(a) => a.last_change(),
            Self::StackVariable(a) => a.last_change(),
            Self::Comment(a) => a.last_change(),
            Self::GlobalVariable(a) => a.last_change(),
            Self::Struct(a) => a.last_change(),
            Self::Enum(a) => a.last_change(),
            Self::Patch(a) => a.last_change(),
        }
    }

    /// Clear the last-change stamp (used on merged artifacts before they are
    /// committed back — see §4.E step 4 and §9).
    pub fn clear_last_change(&mut self) {
        match self {
            Self::Function(a) => a.clear_last_change(),
            Self::FunctionHeader(a) => a.clear_last_change(),
            Self::StackVariable(a) => a.clear_last_change(),
            Self::Comment(a) => a.clear_last_change(),
            Self::GlobalVariable(a) => a.clear_last_change(),
            Self::Struct(a) => a.clear_last_change(),
            Self::Enum(a) => a.clear_last_change(),
            Self::Patch(a) => a.clear_last_change(),
        }
    }

    /// Stamp the last-change time to `now`.
    pub fn set_last_change(&mut self, now: DateTime<Utc>) {
        match self {
            Self::Function(a) => a.set_last_change(now),
            Self::FunctionHeader(a) => a.set_last_change(now),
            Self::StackVariable(a) => a.set_last_change(now),
            Self::Comment(a) => a.set_last_change(now),
            Self::GlobalVariable(a) => a.set_last_change(now),
            Self::Struct(a) => a.set_last_change(now),
            Self::Enum(a) => a.set_last_change(now),
            Self::Patch(a) => a.set_last_change(now),
        }
    }

    /// Non-conflicting merge of two artifacts of the *same* variant.
    ///
    /// Returns `None` if `self` and `other` are different variants — a
    /// caller error the Controller never makes, since fills always compare
    /// artifacts fetched for the same `ArtifactType`.
    #[must_use]
    pub fn nonconflict_merge(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Function(a), Self::Function(b)) => Some(Self::Function(
                a.nonconflict_merge(b, &FunctionMergeOptions::default()),
            )),
            (Self::FunctionHeader(a), Self::FunctionHeader(b)) => {
                Some(Self::FunctionHeader(a.nonconflict_merge(b, &())))
            }
            (Self::StackVariable(a), Self::StackVariable(b)) => {
                Some(Self::StackVariable(a.nonconflict_merge(b, &())))
            }
            (Self::Comment(a), Self::Comment(b)) => {
                Some(Self::Comment(a.nonconflict_merge(b, &())))
            }
            (Self::GlobalVariable(a), Self::GlobalVariable(b)) => {
                Some(Self::GlobalVariable(a.nonconflict_merge(b, &())))
            }
            (Self::Struct(a), Self::Struct(b)) => {
                Some(Self::Struct(a.nonconflict_merge(b, &StructMergeOptions::default())))
            }
            (Self::Enum(a), Self::Enum(b)) => Some(Self::Enum(a.nonconflict_merge(b, &()))),
            (Self::Patch(a), Self::Patch(b)) => Some(Self::Patch(a.nonconflict_merge(b, &()))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg(index: u64, name: &str, ty: &str) -> FunctionArgument {
        FunctionArgument {
            index,
            name: name.to_owned(),
            type_: ty.to_owned(),
        }
    }

    #[test]
    fn header_merge_prefers_self_non_empty_fields() {
        let a = FunctionHeader {
            addr: 0x1000,
            name: "foo".into(),
            return_type: String::new(),
            args: BTreeMap::from([(0, arg(0, "a", "int"))]),
            last_change: None,
        };
        let b = FunctionHeader {
            addr: 0x1000,
            name: String::new(),
            return_type: "void".into(),
            args: BTreeMap::from([(1, arg(1, "b", "char*"))]),
            last_change: None,
        };
        let merged = a.nonconflict_merge(&b, &());
        assert_eq!(merged.name, "foo");
        assert_eq!(merged.return_type, "void");
        assert_eq!(merged.args.len(), 2);
    }

    #[test]
    fn merge_with_self_is_identity() {
        let a = FunctionHeader::new(0x2000);
        let merged = a.nonconflict_merge(&a, &());
        assert_eq!(merged, a);
    }

    #[test]
    fn merge_is_idempotent() {
        let a = FunctionHeader {
            addr: 0x3000,
            name: "a".into(),
            return_type: String::new(),
            args: BTreeMap::new(),
            last_change: None,
        };
        let b = FunctionHeader {
            addr: 0x3000,
            name: String::new(),
            return_type: "int".into(),
            args: BTreeMap::new(),
            last_change: None,
        };
        let once = a.nonconflict_merge(&b, &());
        let twice = once.nonconflict_merge(&b, &());
        assert_eq!(once, twice);
    }

    #[test]
    fn enum_merge_keeps_self_value_on_conflict() {
        let a = Enum {
            name: "Color".into(),
            members: BTreeMap::from([("RED".to_owned(), 1)]),
            last_change: None,
        };
        let b = Enum {
            name: "Color".into(),
            members: BTreeMap::from([("RED".to_owned(), 99), ("BLUE".to_owned(), 2)]),
            last_change: None,
        };
        let merged = a.nonconflict_merge(&b, &());
        assert_eq!(merged.members["RED"], 1);
        assert_eq!(merged.members["BLUE"], 2);
    }

    #[test]
    fn function_contains_addr() {
        let f = Function::placeholder(0x1000, 0x20);
        assert!(f.contains_addr(0x1000));
        assert!(f.contains_addr(0x101f));
        assert!(!f.contains_addr(0x1020));
    }

    #[test]
    fn artifact_dispatch_roundtrips_key() {
        let artifact = Artifact::Struct(Struct::header_only("S1".into(), 8));
        assert_eq!(artifact.key(), ArtifactKey::Name("S1".into()));
        assert_eq!(artifact.artifact_type(), ArtifactType::Struct);
    }
}
