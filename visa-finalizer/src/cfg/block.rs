//! Basic block bookkeeping (§3 "Basic block").

use crate::entities::BlockId;
use bitflags::bitflags;

bitflags! {
    /// Block classification bitmask (§3).
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const CALL   = 1 << 0;
        const RETURN = 1 << 1;
        const INIT   = 1 << 2;
        const EXIT   = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct BasicBlockInfo {
    pub id: BlockId,
    pub preorder: u32,
    pub rpo: u32,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Physical (layout) predecessor/successor, recomputed whenever block order
    /// changes (§4.2).
    pub phys_pred: Vec<BlockId>,
    pub phys_succ: Vec<BlockId>,
    pub idom: Option<BlockId>,
    pub flags: BlockFlags,
    pub loop_nest_level: u32,
    pub in_natural_loop: bool,
    pub contains_send: bool,
}

impl BasicBlockInfo {
    pub fn new(id: BlockId) -> Self {
        BasicBlockInfo {
            id,
            preorder: 0,
            rpo: 0,
            preds: Vec::new(),
            succs: Vec::new(),
            phys_pred: Vec::new(),
            phys_succ: Vec::new(),
            idom: None,
            flags: BlockFlags::empty(),
            loop_nest_level: 0,
            in_natural_loop: false,
            contains_send: false,
        }
    }

    /// Invariant (§3): a block's fall-through successor, if any, is first in its
    /// successor list.
    pub fn fallthrough_succ(&self) -> Option<BlockId> {
        self.succs.first().copied()
    }
}
