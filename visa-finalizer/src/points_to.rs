//! Points-to analysis for indirect operands (§4.3, GLOSSARY "points-to set"): which
//! declarations an address variable may currently refer to. Flow-insensitive, built
//! from `AddrAdd` instructions the way `original_source/visa/ByteCodeReaderNG.cpp`'s
//! address-register decode builds an address variable's backing set — by chasing
//! `AddrAdd` defs back to the `AddrExpr`(s) they ultimately take the address of.

use crate::entities::{DeclId, InstId, RegVarId};
use crate::function::Function;
use crate::instruction::Opcode;
use crate::operand::Operand;
use std::collections::{HashMap, HashSet};

/// For every address-file register variable ever defined by an `AddrAdd`, the set of
/// declarations it may point at. Pointer arithmetic (`AddrAdd` from another address
/// variable) inherits that variable's set; iterated to a fixpoint so chains of any
/// length resolve.
pub fn compute(func: &Function) -> HashMap<RegVarId, HashSet<DeclId>> {
    let mut sets: HashMap<RegVarId, HashSet<DeclId>> = HashMap::new();

    let mut changed = true;
    while changed {
        changed = false;
        for inst in func.insts.values() {
            if !matches!(inst.opcode, Opcode::AddrAdd) {
                continue;
            }
            let Some(dst_var) = inst.dst.as_ref().and_then(Operand::base_var) else {
                continue;
            };
            for src in &inst.srcs {
                match src {
                    Operand::AddrExpr { decl, .. } => {
                        if sets.entry(dst_var).or_default().insert(*decl) {
                            changed = true;
                        }
                    }
                    _ => {
                        let Some(src_var) = src.base_var() else { continue };
                        if src_var == dst_var {
                            continue;
                        }
                        let inherited: Vec<DeclId> =
                            sets.get(&src_var).into_iter().flatten().copied().collect();
                        let entry = sets.entry(dst_var).or_default();
                        for d in inherited {
                            changed |= entry.insert(d);
                        }
                    }
                }
            }
        }
    }

    sets
}

/// Every instruction with an indirect operand, mapped to the declarations its
/// address variable's points-to set names — the same shape `spill::rewrite_indirect`
/// consumes.
pub fn instruction_targets(func: &Function) -> HashMap<InstId, Vec<DeclId>> {
    let addr_sets = compute(func);
    let mut out = HashMap::new();

    for &inst_id in &func.stream {
        let inst = &func.insts[inst_id];
        let mut targets: HashSet<DeclId> = HashSet::new();

        for src in &inst.srcs {
            if let Operand::Indirect { addr_var, .. } = src {
                if let Some(set) = addr_sets.get(addr_var) {
                    targets.extend(set.iter().copied());
                }
            }
        }
        if let Some(Operand::Indirect { addr_var, .. }) = &inst.dst {
            if let Some(set) = addr_sets.get(addr_var) {
                targets.extend(set.iter().copied());
            }
        }

        if !targets.is_empty() {
            out.insert(inst_id, targets.into_iter().collect());
        }
    }

    out
}

/// Declarations reachable through any indirect operand anywhere in `func` — the
/// regvars backing these are the ones liveness must mark address-taken (§4.3), since
/// a later indirect access through an aliasing address variable might touch them.
pub fn address_taken_decls(func: &Function) -> HashSet<DeclId> {
    instruction_targets(func).into_values().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Declaration;
    use crate::entities::DeclId;
    use crate::function::{Function, FunctionKind};
    use crate::instruction::Instruction;
    use crate::operand::DirectRegion;
    use crate::regvar::RegisterVariable;
    use crate::ty::{RegFile, ScalarType};

    #[test]
    fn addr_add_from_addr_expr_points_to_its_declaration() {
        let mut func = Function::new("f", FunctionKind::Kernel);
        let target = DeclId::from_u32(func.decls.len() as u32);
        func.decls.push(Declaration::new(
            target,
            "target",
            ScalarType::Dword,
            1,
            RegFile::Grf,
        ));
        let addr_decl = DeclId::from_u32(func.decls.len() as u32);
        func.decls.push(Declaration::new(
            addr_decl,
            "a0",
            ScalarType::UDword,
            1,
            RegFile::Address,
        ));
        let addr_var = RegVarId::from_u32(func.regvars.len() as u32);
        func.push_regvar(RegisterVariable::new(addr_var, addr_decl));

        let mut add = Instruction::new(Opcode::AddrAdd, 1);
        add.dst = Some(Operand::Dst {
            region: DirectRegion {
                base: addr_var,
                row_offset: 0,
                sub_reg_offset: 0,
                elem_type: ScalarType::UDword,
            },
            hstride: 1,
        });
        add.srcs.push(Operand::AddrExpr {
            decl: target,
            byte_offset: 0,
        });
        func.append_inst(add).unwrap();

        let sets = compute(&func);
        assert_eq!(sets[&addr_var], HashSet::from([target]));
    }
}
