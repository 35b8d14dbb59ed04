//! The spill manager (§4.5), grounded on
//! `original_source/visa/SpillManagerGMRF.cpp`.

pub mod expand;

use crate::entities::{DeclId, InstId, RegVarId};
use crate::function::Function;
use crate::instruction::{Instruction, IntrinsicOp, MovOp, Opcode};
use crate::operand::Operand;
use crate::regvar::{RegisterVariable, TransientKind};
use std::collections::HashMap;

pub const HWORD_BYTES: u32 = 32;
pub const OWORD_BYTES: u32 = 16;

/// Per-declaration byte offset into the spill area (§3 "Spill slot").
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    offsets: HashMap<DeclId, u32>,
    next_offset: u32,
}

impl SlotMap {
    pub fn offset_of(&self, decl: DeclId) -> Option<u32> {
        self.offsets.get(&decl).copied()
    }
}

/// Assign spill slots to every declaration in `spilled`, sweeping in ascending
/// declaration-id order and placing each new range at the lowest GRF-aligned address
/// that does not overlap a conflicting (interfering) occupant (§4.5 "Slot
/// assignment"). Alias declarations inherit their root's slot plus the alias byte
/// offset. When `compression` is false, slots are simply appended with no reuse.
pub fn assign_slots(
    func: &Function,
    spilled: &[DeclId],
    base_offset: i32,
    compression: bool,
    liveness: &crate::liveness::Liveness,
) -> SlotMap {
    let mut map = SlotMap {
        offsets: HashMap::new(),
        next_offset: base_offset.max(0) as u32,
    };

    let mut sorted = spilled.to_vec();
    sorted.sort_by_key(|d| d.as_u32());

    // Declaration -> the register variable that represents it, for interference
    // lookups (the first one found; declarations spill as a unit).
    let rv_of: HashMap<DeclId, RegVarId> = func
        .regvars
        .iter()
        .map(|(id, rv)| (rv.decl, id))
        .collect();

    let mut placed: Vec<(DeclId, u32, u32)> = Vec::new(); // (decl, offset, size)

    for &decl_id in &sorted {
        let decl = &func.decls[decl_id];
        if let Some((root, alias_off)) = decl.alias {
            if let Some(&root_off) = map.offsets.get(&root) {
                map.offsets.insert(decl_id, root_off + alias_off);
                continue;
            }
        }

        let size = decl.size_bytes().max(1);
        let grf_aligned = |x: u32| x.div_ceil(crate::ty::GRF_WIDTH_BYTES)
            * crate::ty::GRF_WIDTH_BYTES;

        let offset = if !compression {
            let off = grf_aligned(map.next_offset);
            map.next_offset = off + size;
            off
        } else {
            let mut candidate = grf_aligned(base_offset.max(0) as u32);
            loop {
                let conflicts = placed.iter().any(|&(other_decl, other_off, other_size)| {
                    let overlap = candidate < other_off + other_size && other_off < candidate + size;
                    if !overlap {
                        return false;
                    }
                    match (rv_of.get(&decl_id), rv_of.get(&other_decl)) {
                        (Some(&a), Some(&b)) => liveness.interferes(a, b),
                        _ => true, // unknown: conservatively treat as conflicting
                    }
                });
                if !conflicts {
                    break;
                }
                candidate += crate::ty::GRF_WIDTH_BYTES;
            }
            map.next_offset = map.next_offset.max(candidate + size);
            candidate
        };

        placed.push((decl_id, offset, size));
        map.offsets.insert(decl_id, offset);
    }

    map
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RegionClass {
    AlignedWhole,
    Partial,
}

fn classify(byte_offset: u32, size: u32, transport: u32) -> RegionClass {
    if byte_offset.is_multiple_of(transport) && size.is_multiple_of(transport) && size / transport <= 8 {
        RegionClass::AlignedWhole
    } else {
        RegionClass::Partial
    }
}

pub(crate) fn transport_for(func: &Function, has_stack_calls: bool) -> u32 {
    let _ = func;
    if has_stack_calls {
        OWORD_BYTES
    } else {
        HWORD_BYTES
    }
}

struct RematCandidate {
    #[allow(dead_code)] // documents which declaration this candidate was found for
    decl: DeclId,
    def_inst: InstId,
    imm_bits: u64,
    imm_ty: crate::ty::ScalarType,
}

/// Is `decl` a single-element scalar defined exactly once by an unpredicated,
/// unsaturated move from an immediate? If so, §4.5 "Scalar-immediate
/// rematerialization" applies instead of memory traffic.
fn find_remat_candidate(func: &Function, decl_id: DeclId) -> Option<RematCandidate> {
    let decl = &func.decls[decl_id];
    if decl.num_elements != 1 {
        return None;
    }
    let rv_ids: Vec<RegVarId> = func
        .regvars
        .iter()
        .filter(|(_, rv)| rv.decl == decl_id)
        .map(|(id, _)| id)
        .collect();

    let mut defs: Vec<(InstId, u64, crate::ty::ScalarType)> = Vec::new();
    for (inst_id, inst) in func.insts.iter() {
        if let Some(Operand::Dst { region, .. }) = &inst.dst {
            if rv_ids.contains(&region.base) {
                if inst.predicate.is_some() {
                    return None;
                }
                match (&inst.opcode, inst.srcs.first()) {
                    (Opcode::DataMovement(MovOp::Mov), Some(Operand::Immediate { bits, ty })) => {
                        defs.push((inst_id, *bits, *ty));
                    }
                    _ => return None,
                }
            }
        }
    }
    if defs.len() != 1 {
        return None;
    }
    let (def_inst, bits, ty) = defs[0];
    Some(RematCandidate {
        decl: decl_id,
        def_inst,
        imm_bits: bits,
        imm_ty: ty,
    })
}

/// The outcome of rewriting one function's spilled declarations.
#[derive(Debug, Default)]
pub struct SpillReport {
    pub slots: HashMap<DeclId, u32>,
    pub num_spill_sends: u32,
    pub num_fill_sends: u32,
    pub rematerialized: Vec<DeclId>,
}

/// Rewrite `func` so every spilled declaration's uses read from scratch memory and
/// definitions write to it, introducing spill/fill temporaries the next allocator
/// iteration can color (§4.5).
pub fn rewrite(
    func: &mut Function,
    spilled: &[DeclId],
    options: &crate::options::CompileOptions,
    liveness: &crate::liveness::Liveness,
) -> SpillReport {
    let slot_map = assign_slots(
        func,
        spilled,
        options.spill_mem_offset,
        options.spill_space_compression,
        liveness,
    );
    let transport = transport_for(func, options.has_stack_calls);

    let mut report = SpillReport {
        slots: slot_map.offsets.clone(),
        ..Default::default()
    };

    // Scalar-immediate rematerialization candidates are handled first: they produce
    // zero memory traffic and remove the declaration from further consideration.
    let mut handled: Vec<DeclId> = Vec::new();
    for &decl_id in spilled {
        if let Some(candidate) = find_remat_candidate(func, decl_id) {
            rematerialize(func, &candidate);
            report.rematerialized.push(decl_id);
            handled.push(decl_id);
        }
    }

    for &decl_id in spilled {
        if handled.contains(&decl_id) {
            continue;
        }
        let offset = slot_map.offset_of(decl_id).unwrap_or(0);
        rewrite_declaration_accesses(func, decl_id, offset, transport, &mut report);
    }

    func.renumber_lexical_ids();
    report
}

fn rematerialize(func: &mut Function, candidate: &RematCandidate) {
    let def_rv = {
        let inst = &func.insts[candidate.def_inst];
        match &inst.dst {
            Some(Operand::Dst { region, .. }) => region.base,
            _ => return,
        }
    };

    // Find every use of the defining register variable (and any alias of it) after
    // the definition, and rematerialize a fresh move before each.
    let uses: Vec<InstId> = func
        .stream
        .iter()
        .copied()
        .filter(|&id| id != candidate.def_inst)
        .filter(|&id| {
            func.insts[id]
                .srcs
                .iter()
                .any(|s| s.base_var() == Some(def_rv))
        })
        .collect();

    for use_id in uses {
        let pos = match func.stream_position(use_id) {
            Some(p) => p,
            None => continue,
        };
        let temp_decl = func.decls[func.regvars[def_rv].decl].clone();
        let temp_decl_id = {
            let id = DeclId::from_u32(func.decls.len() as u32);
            func.decls.push(crate::declaration::Declaration::new(
                id,
                format!("{}.remat", temp_decl.name),
                temp_decl.elem_type,
                1,
                temp_decl.file,
            ))
        };
        let mut rv = RegisterVariable::new(RegVarId::from_u32(func.regvars.len() as u32), temp_decl_id);
        rv.transient_kind = TransientKind::Tmp;
        rv.transient_parent = Some(temp_decl.id);
        let temp_rv = func.push_regvar(rv);

        let mut mov = Instruction::new(Opcode::DataMovement(MovOp::Mov), 1);
        mov.dst = Some(Operand::Dst {
            region: crate::operand::DirectRegion {
                base: temp_rv,
                row_offset: 0,
                sub_reg_offset: 0,
                elem_type: candidate.imm_ty,
            },
            hstride: 1,
        });
        mov.srcs.push(Operand::Immediate {
            bits: candidate.imm_bits,
            ty: candidate.imm_ty,
        });
        func.insert_at(pos, mov);

        for src in func.insts[use_id].srcs.iter_mut() {
            if src.base_var() == Some(def_rv) {
                if let Operand::Src { region, region_desc } = src {
                    region.base = temp_rv;
                    let _ = region_desc;
                }
            }
        }
    }

    // Delete the original definition: no memory traffic for a rematerialized value.
    if let Some(pos) = func.stream_position(candidate.def_inst) {
        func.stream.remove(pos);
    }
}

fn rewrite_declaration_accesses(
    func: &mut Function,
    decl_id: DeclId,
    slot_offset: u32,
    transport: u32,
    report: &mut SpillReport,
) {
    let rv_ids: Vec<RegVarId> = func
        .regvars
        .iter()
        .filter(|(_, rv)| rv.decl == decl_id)
        .map(|(id, _)| id)
        .collect();

    // Walk the stream by index so we can keep splicing as we go.
    let mut i = 0;
    while i < func.stream.len() {
        let inst_id = func.stream[i];
        let uses_as_dst = matches!(&func.insts[inst_id].dst, Some(d) if d.base_var().map(|v| rv_ids.contains(&v)).unwrap_or(false));
        let uses_as_src = func.insts[inst_id]
            .srcs
            .iter()
            .any(|s| s.base_var().map(|v| rv_ids.contains(&v)).unwrap_or(false));

        if !uses_as_dst && !uses_as_src {
            i += 1;
            continue;
        }

        let decl = func.decls[decl_id].clone();
        let size = decl.size_bytes().max(transport);
        let class = classify(slot_offset, size, transport);

        if uses_as_src {
            let temp_decl_id = {
                let id = DeclId::from_u32(func.decls.len() as u32);
                func.decls.push(crate::declaration::Declaration::new(
                    id,
                    format!("{}.fill", decl.name),
                    decl.elem_type,
                    decl.num_elements,
                    decl.file,
                ))
            };
            let mut rv = RegisterVariable::new(RegVarId::from_u32(func.regvars.len() as u32), temp_decl_id);
            rv.transient_kind = TransientKind::FillTemp;
            rv.transient_parent = Some(decl_id);
            let temp_rv = func.push_regvar(rv);

            let fill = make_fill_intrinsic(temp_rv, decl.num_rows.max(1), slot_offset);
            func.insert_at(i, fill);
            i += 1;
            report.num_fill_sends += 1;

            for src in func.insts[inst_id].srcs.iter_mut() {
                if src.base_var().map(|v| rv_ids.contains(&v)).unwrap_or(false) {
                    if let Operand::Src { region, .. } = src {
                        region.base = temp_rv;
                    }
                }
            }
        }

        if uses_as_dst {
            let temp_decl_id = {
                let id = DeclId::from_u32(func.decls.len() as u32);
                func.decls.push(crate::declaration::Declaration::new(
                    id,
                    format!("{}.spill", decl.name),
                    decl.elem_type,
                    decl.num_elements,
                    decl.file,
                ))
            };
            let mut rv = RegisterVariable::new(RegVarId::from_u32(func.regvars.len() as u32), temp_decl_id);
            rv.transient_kind = TransientKind::SpillTemp;
            rv.transient_parent = Some(decl_id);
            let temp_rv = func.push_regvar(rv);

            let needs_preload = class == RegionClass::Partial
                || func.insts[inst_id].predicate.is_some();
            if needs_preload {
                let fill = make_fill_intrinsic(temp_rv, decl.num_rows.max(1), slot_offset);
                func.insert_at(i, fill);
                i += 1;
                report.num_fill_sends += 1;
            }

            if let Some(dst) = func.insts[inst_id].dst.as_mut() {
                if let Operand::Dst { region, .. } = dst {
                    region.base = temp_rv;
                }
            }

            let spill = make_spill_intrinsic(temp_rv, decl.num_rows.max(1), slot_offset);
            func.insert_at(i + 1, spill);
            report.num_spill_sends += 1;
            i += 1;
        }

        i += 1;
    }
}

fn make_fill_intrinsic(dst: RegVarId, num_rows: u32, slot_offset: u32) -> Instruction {
    let mut inst = Instruction::new(Opcode::Intrinsic(IntrinsicOp::Fill), 8);
    inst.dst = Some(Operand::Raw {
        base: dst,
        num_rows: num_rows as u16,
    });
    inst.srcs.push(Operand::Immediate {
        bits: slot_offset as u64,
        ty: crate::ty::ScalarType::UDword,
    });
    inst.options |= crate::instruction::InstOptions::WRITE_ENABLE;
    inst
}

fn make_spill_intrinsic(payload: RegVarId, num_rows: u32, slot_offset: u32) -> Instruction {
    let mut inst = Instruction::new(Opcode::Intrinsic(IntrinsicOp::Spill), 8);
    inst.srcs.push(Operand::Raw {
        base: payload,
        num_rows: num_rows as u16,
    });
    inst.srcs.push(Operand::Immediate {
        bits: slot_offset as u64,
        ty: crate::ty::ScalarType::UDword,
    });
    inst.options |= crate::instruction::InstOptions::WRITE_ENABLE;
    inst
}

/// Pre-allocate a dedicated spill/fill GRF range for an address-taken spilled
/// declaration and bracket every instruction with an indirect operand that may
/// reference it (§4.5 "Indirect (address-taken) spills"). `points_to` maps each
/// instruction with an indirect operand to the set of declarations its address
/// variable may currently refer to; entries for `decl_id` are pruned after rewrite so
/// later analyses don't re-add stale interference.
pub fn rewrite_indirect(
    func: &mut Function,
    decl_id: DeclId,
    points_to: &mut HashMap<InstId, Vec<DeclId>>,
    slot_offset: u32,
) {
    let decl = func.decls[decl_id].clone();
    let dedicated_decl_id = {
        let id = DeclId::from_u32(func.decls.len() as u32);
        func.decls.push(crate::declaration::Declaration::new(
            id,
            format!("{}.indirect_spill", decl.name),
            decl.elem_type,
            decl.num_elements,
            decl.file,
        ))
    };
    let mut rv = RegisterVariable::new(RegVarId::from_u32(func.regvars.len() as u32), dedicated_decl_id);
    rv.transient_kind = TransientKind::Tmp;
    rv.transient_parent = Some(decl_id);
    let dedicated_rv = func.push_regvar(rv);

    let affected: Vec<InstId> = points_to
        .iter()
        .filter(|(_, set)| set.contains(&decl_id))
        .map(|(inst, _)| *inst)
        .collect();

    for inst_id in affected {
        let pos = match func.stream_position(inst_id) {
            Some(p) => p,
            None => continue,
        };
        let may_define = func.insts[inst_id]
            .dst
            .as_ref()
            .map(|d| d.is_indirect())
            .unwrap_or(false);

        let fill = make_fill_intrinsic(dedicated_rv, decl.num_rows.max(1), slot_offset);
        func.insert_at(pos, fill);

        if may_define {
            let spill = make_spill_intrinsic(dedicated_rv, decl.num_rows.max(1), slot_offset);
            func.insert_at(pos + 2, spill);
        }

        if let Some(set) = points_to.get_mut(&inst_id) {
            set.retain(|d| *d != decl_id);
        }
    }
    func.renumber_lexical_ids();
}
