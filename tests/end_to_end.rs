//! End-to-end scenarios against a real on-disk git repository: round-trip
//! push, two-user non-conflicting merge, struct dependency resolution, and
//! magic-fill convergence (spec §8).

use std::sync::Arc;

use binsync::config::MergeLevel;
use binsync::controller::{Controller, FillOptions, PushOptions};
use binsync::decompiler::MemoryDecompiler;
use binsync_core::artifact::{FunctionArgument, FunctionHeader, Struct, StructMember};
use binsync_core::{Artifact, ArtifactKey, ArtifactType};
use binsync_git::GixRepo;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn setup_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::process::Command::new("git")
        .args(["init", dir.path().to_str().unwrap()])
        .output()
        .unwrap();
    std::process::Command::new("git")
        .args(["config", "user.email", "test@test.com"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    std::process::Command::new("git")
        .args(["config", "user.name", "Test User"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    dir
}

fn connected_controller(dir: &TempDir, user: &str, init: bool) -> Arc<Controller> {
    let repo = Box::new(GixRepo::open(dir.path()).unwrap());
    let decompiler = Arc::new(MemoryDecompiler::new("fingerprint-123", dir.path().join("target.bin")));
    let controller = Controller::new(decompiler);
    controller.connect(user, repo, None, init).unwrap();
    controller
}

#[test]
fn round_trip_single_artifact() {
    let dir = setup_repo();
    let alice = connected_controller(&dir, "alice", true);

    let pushed = alice
        .push_artifact(
            Artifact::FunctionHeader(FunctionHeader {
                addr: 0x401000,
                name: "main".into(),
                return_type: "int".into(),
                args: BTreeMap::new(),
                last_change: None,
            }),
            PushOptions::default(),
        )
        .unwrap();
    assert!(pushed);

    let (master, _) = alice.get_master_and_user_state("alice").unwrap();
    let roundtripped = master.get_artifact(ArtifactType::FunctionHeader, &ArtifactKey::Addr(0x401000));
    assert!(matches!(roundtripped, Some(Artifact::FunctionHeader(h)) if h.name == "main"));
}

#[test]
fn two_user_nonconflicting_merge() {
    let dir = setup_repo();
    let alice = connected_controller(&dir, "alice", true);
    alice
        .push_artifact(
            Artifact::FunctionHeader(FunctionHeader {
                addr: 0x401000,
                name: "main".into(),
                return_type: String::new(),
                args: BTreeMap::new(),
                last_change: None,
            }),
            PushOptions::default(),
        )
        .unwrap();

    let bob = connected_controller(&dir, "bob", false);
    bob.push_artifact(
        Artifact::FunctionHeader(FunctionHeader {
            addr: 0x401000,
            name: String::new(),
            return_type: "int".into(),
            args: BTreeMap::new(),
            last_change: None,
        }),
        PushOptions::default(),
    )
    .unwrap();

    let filled = bob
        .fill_artifact(
            ArtifactType::FunctionHeader,
            ArtifactKey::Addr(0x401000),
            FillOptions {
                user: "alice".into(),
                merge_level: MergeLevel::NonConflicting,
                blocking: true,
                commit_msg: Some("merge alice's header".into()),
            },
        )
        .unwrap();
    assert!(filled);

    let (bob_master, _) = bob.get_master_and_user_state("bob").unwrap();
    let merged = bob_master
        .get_artifact(ArtifactType::FunctionHeader, &ArtifactKey::Addr(0x401000))
        .unwrap();
    let Artifact::FunctionHeader(header) = merged else {
        panic!("wrong variant")
    };
    assert_eq!(header.name, "main");
    assert_eq!(header.return_type, "int");
    assert!(header.last_change.is_none(), "a merged fill never looks like a local edit");
}

#[test]
fn struct_dependency_resolution_imports_nested_struct() {
    let dir = setup_repo();
    let alice = connected_controller(&dir, "alice", true);

    let mut inner_members = BTreeMap::new();
    inner_members.insert(
        0,
        StructMember {
            offset: 0,
            name: "x".into(),
            type_: "int".into(),
            size: 4,
        },
    );
    alice
        .push_artifact(
            Artifact::Struct(Struct {
                name: "point_t".into(),
                size: 4,
                members: inner_members,
                last_change: None,
            }),
            PushOptions::default(),
        )
        .unwrap();

    let mut outer_members = BTreeMap::new();
    outer_members.insert(
        0,
        FunctionArgument {
            index: 0,
            name: "p".into(),
            type_: "point_t".into(),
        },
    );
    alice
        .push_artifact(
            Artifact::FunctionHeader(FunctionHeader {
                addr: 0x402000,
                name: "move_point".into(),
                return_type: "void".into(),
                args: outer_members,
                last_change: None,
            }),
            PushOptions::default(),
        )
        .unwrap();

    let bob = connected_controller(&dir, "bob", false);
    bob.fill_artifact(
        ArtifactType::FunctionHeader,
        ArtifactKey::Addr(0x402000),
        FillOptions {
            user: "alice".into(),
            merge_level: MergeLevel::NonConflicting,
            blocking: true,
            commit_msg: None,
        },
    )
    .unwrap();

    let (bob_master, _) = bob.get_master_and_user_state("bob").unwrap();
    let imported = bob_master.get_artifact(ArtifactType::Struct, &ArtifactKey::Name("point_t".into()));
    assert!(
        matches!(imported, Some(Artifact::Struct(s)) if s.name == "point_t" && !s.members.is_empty()),
        "fill should have pulled in the struct the function header depends on"
    );
}

#[test]
fn magic_fill_converges_global_across_users() {
    let dir = setup_repo();
    let alice = connected_controller(&dir, "alice", true);
    alice
        .push_artifact(
            Artifact::GlobalVariable(binsync_core::artifact::GlobalVariable {
                addr: 0x5000,
                name: "g_flag".into(),
                type_: String::new(),
                last_change: None,
            }),
            PushOptions::default(),
        )
        .unwrap();

    let bob = connected_controller(&dir, "bob", false);
    bob.push_artifact(
        Artifact::GlobalVariable(binsync_core::artifact::GlobalVariable {
            addr: 0x5000,
            name: String::new(),
            type_: "bool".into(),
            last_change: None,
        }),
        PushOptions::default(),
    )
    .unwrap();

    let carol = connected_controller(&dir, "carol", false);
    carol.start_worker_routines();
    carol.magic_fill(Some("alice"), MergeLevel::NonConflicting).unwrap();
    carol.wait_for_next_push().unwrap();
    carol.stop_worker_routines();

    let (carol_master, _) = carol.get_master_and_user_state("carol").unwrap();
    let converged = carol_master
        .get_artifact(ArtifactType::GlobalVariable, &ArtifactKey::Addr(0x5000))
        .unwrap();
    let Artifact::GlobalVariable(g) = converged else {
        panic!("wrong variant")
    };
    assert_eq!(g.name, "g_flag");
    assert_eq!(g.type_, "bool");
}
