//! A GPU shader compiler back-end finalizer: vISA IR builder, control-flow graph,
//! linear-scan register allocator over a GRF file, and spill manager.
//!
//! Grounded on `cranelift-entity` and `cranelift-codegen` for the arena-of-handles IR
//! style and CFG/dominator machinery, and on `original_source/visa/` for the
//! domain-specific builder, allocator and spill-manager semantics. See `DESIGN.md` at
//! the workspace root for the full grounding ledger.

pub mod arena;
pub mod builder;
pub mod cfg;
pub mod declaration;
pub mod diagnostics;
pub mod entities;
pub mod function;
pub mod instruction;
pub mod jit_metadata;
pub mod liveness;
pub mod operand;
pub mod options;
pub mod pipeline;
pub mod points_to;
pub mod regalloc;
pub mod regvar;
pub mod spill;
pub mod ty;

pub use builder::{Builder, CompileResult};
pub use diagnostics::FinalizeError;
pub use options::CompileOptions;
