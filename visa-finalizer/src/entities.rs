//! Entity references into a [`Function`](crate::function::Function)'s arenas.
//!
//! Declarations, register variables, instructions, basic blocks, labels and called
//! functions are never referenced by pointer. Every reference is a `u32`-wrapping
//! handle indexing into a [`visa_entity::PrimaryMap`] owned by the `Function` (or, for
//! `FuncId`, by the [`Builder`](crate::builder::Builder)). This is the arena-of-handles
//! scheme the design notes call for in place of the source's intrusive pointer graph.

use visa_entity::entity_impl;

/// A declaration: named storage for N elements of one scalar type (§3 "Declaration").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(u32);
entity_impl!(DeclId, "decl");

/// The runtime handle attached to a declaration (§3 "Register variable").
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegVarId(u32);
entity_impl!(RegVarId, "rv");

/// A single instruction within a function's instruction arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);
entity_impl!(InstId, "inst");

/// A basic block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "bb");

/// A label: a named jump target, created either as a plain block label or as a
/// subroutine/function-call label (§4.1).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);
entity_impl!(LabelId, "lbl");

/// A kernel or (non-kernel) function within one compilation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(u32);
entity_impl!(FuncId, "func");

/// A call site: the block id of a call-ending block, used to key call-graph edges
/// and the per-call-site synthetic live ranges the allocator needs (§4.4).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(u32);
entity_impl!(CallSiteId, "call");
