//! Instructions (§3 "Instruction").

use crate::entities::LabelId;
use crate::operand::{Operand, Predicate};
use smallvec::SmallVec;

/// Opcode families. Each instruction belongs to exactly one; the family determines
/// how many source operands are meaningful and how the byte-code reader dispatches
/// decoding (§4.1, §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Opcode {
    Arithmetic(ArithOp),
    Logical(LogicOp),
    DataMovement(MovOp),
    Compare,
    AddrAdd,
    Send { split: bool },
    ControlFlow(ControlFlowOp),
    Sync(SyncOp),
    Label,
    LifetimeMarker { start: bool },
    Intrinsic(IntrinsicOp),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    MulHigh,
    Div,
    Mod,
    MinMax,
    Madd,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Asr,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MovOp {
    Mov,
    Sel,
    Cmov,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlFlowOp {
    Jump,
    Goto,
    Call,
    Return,
    SwitchJump,
    FuncCall,
    FuncReturn,
    SymbolMaterialize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncOp {
    Fence,
    Wait,
    Barrier,
}

/// Pseudo-instructions consumed/produced by the spill manager (§4.5) and liveness
/// (pseudo-kill).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IntrinsicOp {
    PseudoKill,
    Spill,
    Fill,
    Use,
}

bitflags::bitflags! {
    /// Instruction option flags (§3).
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct InstOptions: u16 {
        const NO_MASK          = 1 << 0;
        const WRITE_ENABLE     = 1 << 1;
        const COMPACTION_HINT  = 1 << 2;
        const MASKED_OFFSET    = 1 << 3;
        /// Set by the stitcher on a function-call/return being rewritten into a real
        /// call/return (§4.1), so un-stitching can recognize and revert it.
        const STITCHED         = 1 << 4;
    }
}

/// Up to three source operands, inline for cache locality per the design notes
/// ("keep opcode-specific payload inline").
pub type Sources = SmallVec<[Operand; 3]>;

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    /// SIMD execution width: a power of two in `1..=32`.
    pub exec_size: u8,
    pub predicate: Option<Predicate>,
    pub dst: Option<Operand>,
    pub srcs: Sources,
    pub options: InstOptions,
    /// Monotonic lexical id within the function, used by liveness and the allocator
    /// as the interval coordinate (§3, §4.4).
    pub lexical_id: u32,
    /// Source-line / cisa-offset id for debug-info bookkeeping (§7, §6).
    pub src_line_id: u32,
    /// Generated binary offset, filled in after code generation (external to the
    /// core, but the field is reserved here per §3).
    pub gen_offset: Option<u32>,
    /// Call-ending blocks reference their target via a label until stitched.
    pub call_label: Option<LabelId>,
    /// Terminal send requiring its payload in the last sixteen GRFs (§4.4 "End-of-
    /// thread tail"). Kept as its own field rather than an `InstOptions` bit because
    /// it drives allocator placement and must survive legalization option resets.
    pub eot_flag: bool,
}

impl Instruction {
    pub fn new(opcode: Opcode, exec_size: u8) -> Self {
        debug_assert!(exec_size.is_power_of_two() && exec_size <= 32);
        Instruction {
            opcode,
            exec_size,
            predicate: None,
            dst: None,
            srcs: SmallVec::new(),
            options: InstOptions::empty(),
            lexical_id: 0,
            src_line_id: 0,
            gen_offset: None,
            call_label: None,
            eot_flag: false,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::ControlFlow(ControlFlowOp::Call) | Opcode::ControlFlow(ControlFlowOp::FuncCall)
        )
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::ControlFlow(ControlFlowOp::Return)
                | Opcode::ControlFlow(ControlFlowOp::FuncReturn)
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::ControlFlow(ControlFlowOp::Jump)
                | Opcode::ControlFlow(ControlFlowOp::Goto)
                | Opcode::ControlFlow(ControlFlowOp::SwitchJump)
        )
    }

    pub fn is_send(&self) -> bool {
        matches!(self.opcode, Opcode::Send { .. })
    }

    pub fn is_eot(&self) -> bool {
        self.is_send() && self.eot_flag
    }

    pub fn writes_enable(&self) -> bool {
        self.options.contains(InstOptions::WRITE_ENABLE)
    }

    pub fn with_eot(mut self, eot: bool) -> Self {
        self.eot_flag = eot;
        self
    }
}
