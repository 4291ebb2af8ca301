//! Address and offset lifting between decompiler-native and binary-relative
//! coordinate spaces.
//!
//! A decompiler may report addresses relative to a load base, a rebased
//! image, or some other internal numbering. [`ArtLifter`] converts between
//! that native space and the canonical space stored in the repo, so two
//! users running decompilers with different base addresses still agree on
//! what `0x401000` means on disk.

use crate::artifact::Artifact;

/// Converts addresses, stack offsets, and whole artifacts between a
/// decompiler's native coordinate space and the canonical space used in
/// stored state.
pub trait ArtLifter {
    /// Convert a native address to canonical form.
    fn lift_addr(&self, addr: u64) -> u64;

    /// Convert a canonical address back to native form.
    fn lower_addr(&self, addr: u64) -> u64;

    /// Convert a native stack offset to canonical form.
    fn lift_stack_offset(&self, offset: i64) -> i64;

    /// Convert a canonical stack offset back to native form.
    fn lower_stack_offset(&self, offset: i64) -> i64;

    /// Convert every address/offset field of `artifact` to canonical form.
    fn lift(&self, artifact: &Artifact) -> Artifact {
        let mut out = artifact.clone();
        lift_in_place(&mut out, |a| self.lift_addr(a), |o| self.lift_stack_offset(o));
        out
    }

    /// Convert every address/offset field of `artifact` back to native form.
    fn lower(&self, artifact: &Artifact) -> Artifact {
        let mut out = artifact.clone();
        lift_in_place(&mut out, |a| self.lower_addr(a), |o| self.lower_stack_offset(o));
        out
    }
}

fn lift_in_place(artifact: &mut Artifact, addr_fn: impl Fn(u64) -> u64, off_fn: impl Fn(i64) -> i64) {
    match artifact {
        Artifact::Function(f) => {
            f.addr = addr_fn(f.addr);
            if let Some(h) = &mut f.header {
                h.addr = addr_fn(h.addr);
            }
            f.stack_vars = std::mem::take(&mut f.stack_vars)
                .into_iter()
                .map(|(offset, mut v)| {
                    v.addr = addr_fn(v.addr);
                    v.offset = off_fn(v.offset);
                    (off_fn(offset), v)
                })
                .collect();
        }
        Artifact::FunctionHeader(h) => h.addr = addr_fn(h.addr),
        Artifact::StackVariable(v) => {
            v.addr = addr_fn(v.addr);
            v.offset = off_fn(v.offset);
        }
        Artifact::Comment(c) => c.addr = addr_fn(c.addr),
        Artifact::GlobalVariable(g) => g.addr = addr_fn(g.addr),
        Artifact::Patch(p) => p.offset = addr_fn(p.offset),
        Artifact::Struct(_) | Artifact::Enum(_) => {}
    }
}

/// Identity lifter: native space and canonical space coincide.
///
/// The default for any decompiler that reports addresses already relative
/// to the binary's base (most do — the design note in §9 only requires
/// lifting to exist, not that it ever be non-trivial).
#[derive(Clone, Copy, Debug, Default)]
pub struct NullLifter;

impl ArtLifter for NullLifter {
    fn lift_addr(&self, addr: u64) -> u64 {
        addr
    }

    fn lower_addr(&self, addr: u64) -> u64 {
        addr
    }

    fn lift_stack_offset(&self, offset: i64) -> i64 {
        offset
    }

    fn lower_stack_offset(&self, offset: i64) -> i64 {
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::GlobalVariable;

    #[test]
    fn null_lifter_is_identity() {
        let lifter = NullLifter;
        let g = Artifact::GlobalVariable(GlobalVariable {
            addr: 0x4000,
            name: "g_count".into(),
            type_: "int".into(),
            last_change: None,
        });
        assert_eq!(lifter.lift(&g), g);
        assert_eq!(lifter.lower(&g), g);
    }

    struct OffsetLifter(u64);

    impl ArtLifter for OffsetLifter {
        fn lift_addr(&self, addr: u64) -> u64 {
            addr - self.0
        }
        fn lower_addr(&self, addr: u64) -> u64 {
            addr + self.0
        }
        fn lift_stack_offset(&self, offset: i64) -> i64 {
            offset
        }
        fn lower_stack_offset(&self, offset: i64) -> i64 {
            offset
        }
    }

    #[test]
    fn lift_then_lower_roundtrips() {
        let lifter = OffsetLifter(0x1000);
        let g = Artifact::GlobalVariable(GlobalVariable {
            addr: 0x5000,
            name: "g".into(),
            type_: "int".into(),
            last_change: None,
        });
        let lifted = lifter.lift(&g);
        let lowered = lifter.lower(&lifted);
        assert_eq!(lowered, g);
    }
}
