//! Register variables: the runtime handle attached to a declaration (§3).

use crate::entities::{DeclId, RegVarId};

/// A physical location assigned by the allocator or dictated by the ABI.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhysicalAssignment {
    pub grf: u32,
    pub sub_reg_word: u32,
}

/// What kind of transient this register variable is, if any. Transient register
/// variables remember the parent declaration and the region that induced them so the
/// spill manager can size and place them correctly (§3, §4.5).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransientKind {
    None,
    SpillTemp,
    FillTemp,
    Tmp,
}

bitflags::bitflags! {
    /// Register variable flags (§3).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct RegVarFlags: u8 {
        const PRE_ASSIGNED = 1 << 0;
        const SPILLED      = 1 << 1;
        const INPUT        = 1 << 2;
        const OUTPUT       = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct RegisterVariable {
    pub id: RegVarId,
    pub decl: DeclId,
    pub assignment: Option<PhysicalAssignment>,
    pub flags: RegVarFlags,
    pub transient_kind: TransientKind,
    /// For a transient register variable, the parent declaration whose spill/fill it
    /// was created to service.
    pub transient_parent: Option<DeclId>,
}

impl RegisterVariable {
    pub fn new(id: RegVarId, decl: DeclId) -> Self {
        RegisterVariable {
            id,
            decl,
            assignment: None,
            flags: RegVarFlags::empty(),
            transient_kind: TransientKind::None,
            transient_parent: None,
        }
    }

    pub fn is_pre_assigned(&self) -> bool {
        self.flags.contains(RegVarFlags::PRE_ASSIGNED)
    }

    pub fn is_spilled(&self) -> bool {
        self.flags.contains(RegVarFlags::SPILLED)
    }
}
