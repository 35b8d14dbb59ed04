//! Linear-scan register allocation over the GRF file (§4.4).

pub mod linear_scan;
pub mod live_range;
pub mod physical_file;

pub use linear_scan::{allocate, AllocationOutcome, InputInterval, EOT_TAIL_GRFS};
pub use live_range::{AllocState, LiveRange, LiveRangeFlags};
pub use physical_file::PhysicalRegisterFile;

/// Build one [`LiveRange`] per declaration in `func`, deriving `first`/`last` from the
/// lexical ids of instructions that reference it and `reference_count` from
/// [`crate::liveness::reference_counts`].
pub fn build_live_ranges(
    func: &crate::function::Function,
) -> Vec<LiveRange> {
    use crate::entities::DeclId;
    use std::collections::HashMap;

    let ref_counts = crate::liveness::reference_counts(func);
    let mut extents: HashMap<DeclId, (u32, u32)> = HashMap::new();

    let touch = |decl: DeclId, lex: u32, extents: &mut HashMap<DeclId, (u32, u32)>| {
        let e = extents.entry(decl).or_insert((lex, lex));
        e.0 = e.0.min(lex);
        e.1 = e.1.max(lex);
    };

    for inst in func.insts.values() {
        let lex = inst.lexical_id;
        for src in &inst.srcs {
            if let Some(rv) = src.base_var() {
                touch(func.regvars[rv].decl, lex, &mut extents);
            }
        }
        if let Some(p) = &inst.predicate {
            touch(func.regvars[p.var].decl, lex, &mut extents);
        }
        if let Some(dst) = &inst.dst {
            if let Some(rv) = dst.base_var() {
                touch(func.regvars[rv].decl, lex, &mut extents);
            }
        }
    }

    let mut ranges = Vec::new();
    for (decl_id, decl) in func.decls.iter() {
        let (first, last) = match extents.get(&decl_id) {
            Some(&(f, l)) => (f, l),
            None => continue, // unreferenced declaration: no live range needed
        };
        let size_words = decl.num_words.max(1);
        let mut lr = LiveRange::new(decl_id, first, last, size_words);
        lr.align = decl.align;
        // Sum reference counts of every register variable backed by this declaration.
        lr.reference_count = func
            .regvars
            .iter()
            .filter(|(_, rv)| rv.decl == decl_id)
            .map(|(rv_id, _)| ref_counts.get(&rv_id).copied().unwrap_or(0))
            .sum();
        ranges.push(lr);
    }
    ranges
}
