//! Per-block live-in/live-out sets and a sparse interference oracle (§4.3).

use crate::cfg::ControlFlowGraph;
use crate::entities::{BlockId, RegVarId};
use crate::function::Function;
use std::collections::{HashMap, HashSet};
use visa_entity::SecondaryMap;

#[derive(Debug, Clone, Default)]
struct BlockLiveSets {
    live_in: HashSet<RegVarId>,
    live_out: HashSet<RegVarId>,
    def: HashSet<RegVarId>,
    used: HashSet<RegVarId>,
}

#[derive(Debug, Clone)]
pub struct Liveness {
    sets: SecondaryMap<BlockId, BlockLiveSets>,
    /// Declarations conservatively considered live across every block containing an
    /// indirect operand whose points-to set might include them (§4.3).
    address_taken: HashSet<RegVarId>,
}

impl Liveness {
    pub fn live_in(&self, b: BlockId) -> impl Iterator<Item = RegVarId> + '_ {
        self.sets[b].live_in.iter().copied()
    }

    pub fn live_out(&self, b: BlockId) -> impl Iterator<Item = RegVarId> + '_ {
        self.sets[b].live_out.iter().copied()
    }

    pub fn is_live_in(&self, b: BlockId, v: RegVarId) -> bool {
        self.sets[b].live_in.contains(&v)
    }

    pub fn is_live_out(&self, b: BlockId, v: RegVarId) -> bool {
        self.sets[b].live_out.contains(&v)
    }

    /// Is `v` ever read or written through an indirect (address-taken) operand?
    /// Such variables are treated as live everywhere a points-to analysis can't rule
    /// them out (§4.3).
    pub fn is_address_taken(&self, v: RegVarId) -> bool {
        self.address_taken.contains(&v)
    }

    /// Do `a` and `b` ever appear live simultaneously in any block? A coarse but
    /// sound oracle: true if there exists a block where both are in the live-in /
    /// live-out / def-use closure, or either is address-taken (in which case we
    /// cannot rule out aliasing and conservatively report interference).
    pub fn interferes(&self, a: RegVarId, b: RegVarId) -> bool {
        if a == b {
            return false;
        }
        if self.is_address_taken(a) || self.is_address_taken(b) {
            return true;
        }
        for set in self.sets.values() {
            let live_here = |v: RegVarId| {
                set.live_in.contains(&v) || set.live_out.contains(&v) || set.def.contains(&v)
            };
            if live_here(a) && live_here(b) {
                return true;
            }
        }
        false
    }
}

/// Recompute liveness for `func`. Must be re-run whenever the spill manager rewrites
/// the IR (§4.3).
pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Liveness {
    let mut sets: SecondaryMap<BlockId, BlockLiveSets> = SecondaryMap::new();

    for &b in &cfg.order {
        let insts = &func.blocks[b];
        let mut def = HashSet::new();
        let mut used = HashSet::new();
        for &inst_id in insts {
            let inst = &func.insts[inst_id];
            for src in &inst.srcs {
                if let Some(v) = src.base_var() {
                    if !def.contains(&v) {
                        used.insert(v);
                    }
                }
            }
            if let Some(p) = &inst.predicate {
                if !def.contains(&p.var) {
                    used.insert(p.var);
                }
            }
            if let Some(dst) = &inst.dst {
                if let Some(v) = dst.base_var() {
                    def.insert(v);
                }
            }
        }
        sets[b].def = def;
        sets[b].used = used;
    }

    // Address-taken variables: every declaration the points-to analysis says some
    // indirect operand's address variable may currently refer to (§4.3), not the
    // address variable itself — the address register is just the vehicle, the
    // declarations it may alias are what must conflict with anything else live.
    let targeted_decls = crate::points_to::address_taken_decls(func);
    let mut address_taken = HashSet::new();
    for (rv_id, rv) in func.regvars.iter() {
        if targeted_decls.contains(&rv.decl) {
            address_taken.insert(rv_id);
        }
    }

    // Classic iterative backward dataflow: live_in = used ∪ (live_out - def).
    let mut changed = true;
    while changed {
        changed = false;
        for &b in cfg.order.iter().rev() {
            let mut live_out: HashSet<RegVarId> = HashSet::new();
            for &s in &cfg.blocks[b].succs {
                live_out.extend(sets[s].live_in.iter().copied());
            }
            let mut live_in = sets[b].used.clone();
            for v in live_out.iter() {
                if !sets[b].def.contains(v) {
                    live_in.insert(*v);
                }
            }
            if live_in != sets[b].live_in || live_out != sets[b].live_out {
                sets[b].live_in = live_in;
                sets[b].live_out = live_out;
                changed = true;
            }
        }
    }

    Liveness {
        sets,
        address_taken,
    }
}

/// Flattened map of how many instructions reference each declaration, used by the
/// allocator's spill-cost heuristic (§4.4 step 5).
pub fn reference_counts(func: &Function) -> HashMap<RegVarId, u32> {
    let mut counts = HashMap::new();
    for inst in func.insts.values() {
        for src in &inst.srcs {
            if let Some(v) = src.base_var() {
                *counts.entry(v).or_insert(0) += 1;
            }
        }
        if let Some(dst) = &inst.dst {
            if let Some(v) = dst.base_var() {
                *counts.entry(v).or_insert(0) += 1;
            }
        }
    }
    counts
}
