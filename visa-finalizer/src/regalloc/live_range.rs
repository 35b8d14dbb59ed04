//! Live ranges and the allocator's per-range state machine (§3 "Live range (linear
//! scan)", §4.6 "Allocator per live-range state").

use crate::entities::{CallSiteId, DeclId};

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct LiveRangeFlags: u16 {
        const GLOBAL            = 1 << 0;
        const PRE_ASSIGNED      = 1 << 1;
        const END_OF_THREAD     = 1 << 2;
        const INDIRECT_ACCESSED = 1 << 3;
        const CALL_SITE_SYNTH   = 1 << 4;
        const SPILLED           = 1 << 5;
        const ACTIVE            = 1 << 6;
        /// Pseudo caller-save / callee-save range attached to a call site (§4.4
        /// step 4c).
        const CALL_PSEUDO       = 1 << 7;
        const TRANSIENT         = 1 << 8;
        const STACK_CALL_INPUT  = 1 << 9;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocState {
    Unvisited,
    PreAssigned,
    Assigned,
    Active,
    Expired,
    Spilled,
}

#[derive(Debug, Clone)]
pub struct LiveRange {
    pub decl: DeclId,
    pub first: u32,
    pub last: u32,
    pub reference_count: u32,
    pub size_words: u32,
    pub align: crate::ty::GrfAlign,
    pub assigned: Option<(u32, u32)>,
    /// Registers this range may never use: platform-reserved, stack-call ABI
    /// registers, caller/callee-save regions near a call, the EOT tail.
    pub forbidden: Vec<bool>,
    pub flags: LiveRangeFlags,
    pub state: AllocState,
    pub call_site: Option<CallSiteId>,
}

impl LiveRange {
    pub fn new(decl: DeclId, first: u32, last: u32, size_words: u32) -> Self {
        LiveRange {
            decl,
            first,
            last,
            reference_count: 0,
            size_words,
            align: crate::ty::GrfAlign::Any,
            assigned: None,
            forbidden: Vec::new(),
            flags: LiveRangeFlags::empty(),
            state: AllocState::Unvisited,
            call_site: None,
        }
    }

    pub fn is_eligible_for_eviction(&self) -> bool {
        !self.flags.intersects(
            LiveRangeFlags::PRE_ASSIGNED
                | LiveRangeFlags::END_OF_THREAD
                | LiveRangeFlags::CALL_SITE_SYNTH
                | LiveRangeFlags::STACK_CALL_INPUT
                | LiveRangeFlags::TRANSIENT,
        )
    }

    /// Reference count divided by remaining extent, per GRF row touched — the
    /// spill-cost heuristic of §4.4 step 5. Lower is cheaper to spill.
    pub fn spill_cost(&self) -> f64 {
        let extent = (self.last.saturating_sub(self.first)).max(1) as f64;
        let rows = self.size_words.div_ceil(crate::ty::GRF_WIDTH_BYTES / 2)
            .max(1) as f64;
        (self.reference_count as f64 / extent) * rows
    }
}
