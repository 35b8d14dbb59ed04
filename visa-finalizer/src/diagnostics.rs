//! Error kinds and the critical-message stream (§7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("byte-code version mismatch: reader supports up to ({max_major}, {max_minor}), got ({major}, {minor})")]
    VersionMismatch {
        major: u16,
        minor: u16,
        max_major: u16,
        max_minor: u16,
    },

    #[error("unknown opcode byte 0x{opcode:02x} at byte offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("operand class {class} out of range at byte offset {offset}")]
    OperandClassOutOfRange { class: u8, offset: usize },

    #[error("undefined variable id {id} referenced at byte offset {offset}")]
    UndefinedVariable { id: u32, offset: usize },

    #[error("type mismatch on redeclaration of '{name}'")]
    TypeMismatchOnRedeclaration { name: String },

    #[error("append after finalize on function '{function}'")]
    AppendAfterFinalize { function: String },

    #[error("builder already has a compile in progress")]
    ConcurrentCompile,

    #[error("builder destroyed while still owning {owned} kernel(s)")]
    DestroyWhileOwningKernels { owned: usize },

    #[error("pre-assigned register conflict: GRF {grf} requested by '{requested_by}', already held by '{held_by}'")]
    PreAssignedConflict {
        grf: u32,
        requested_by: String,
        held_by: String,
    },

    #[error("insufficient physical registers for kernel '{kernel}': still-spilled variables: {still_spilled:?}")]
    InsufficientRegisters {
        kernel: String,
        still_spilled: Vec<String>,
    },

    #[error("allocator iteration bound ({bound}) exceeded for kernel '{kernel}'")]
    IterationBoundExceeded { bound: u32, kernel: String },

    #[error("compile aborted early: spill ratio {ratio:.3} exceeds threshold {threshold:.3} for kernel '{kernel}'")]
    AbortOnSpill {
        kernel: String,
        ratio: f32,
        threshold: f32,
    },

    #[error("no GRF window of {rows} row(s) remains free for spill/fill mechanics under the reduced debug-info GRF budget")]
    NoRoomForSpillFillWindow { rows: u32 },
}

/// A builder-owned stream of diagnostics, read by the embedder after `compile`
/// returns (§7 "Propagation policy").
#[derive(Debug, Default)]
pub struct Diagnostics {
    messages: Vec<String>,
    first_error: Option<FinalizeError>,
}

impl Diagnostics {
    pub fn record(&mut self, err: FinalizeError) {
        self.messages.push(err.to_string());
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    pub fn first_error(&self) -> Option<&FinalizeError> {
        self.first_error.as_ref()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        self.first_error.is_some()
    }
}
