//! Per-function info and the call graph's reverse-topological function table
//! (§3 "Control-flow graph", §4.2 "Call graph").

use crate::entities::{BlockId, CallSiteId, FuncId};
use crate::function::Function;
use std::collections::{HashMap, HashSet};

/// Bookkeeping for one function within a compilation (§3 "per-function FuncInfo").
#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub id: FuncId,
    pub init_block: BlockId,
    pub exit_block: BlockId,
    pub call_sites: Vec<CallSiteId>,
    pub scope_id: u32,
}

/// Build `func`'s `FuncInfo` from its own (unstitched, normalized) control-flow
/// graph: the unique entry block, the unique exit block (the one `build` tagged
/// `BlockFlags::EXIT`, or `init_block` itself if the function never returns), and one
/// call site per call-ending block.
pub fn build_func_info(id: FuncId, func: &Function, cfg: &super::ControlFlowGraph) -> FuncInfo {
    let exit_block = cfg
        .order
        .iter()
        .copied()
        .find(|&b| cfg.blocks[b].flags.contains(super::block::BlockFlags::EXIT))
        .unwrap_or(cfg.entry);

    let call_sites = cfg
        .order
        .iter()
        .copied()
        .filter(|&b| cfg.blocks[b].flags.contains(super::block::BlockFlags::CALL))
        .map(|b| CallSiteId::from_u32(b.as_u32()))
        .collect();

    let _ = func;
    FuncInfo {
        id,
        init_block: cfg.entry,
        exit_block,
        call_sites,
        scope_id: 0,
    }
}

/// One call-graph edge: a call-ending block in `caller` targeting `callee`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CallEdge {
    pub caller: FuncId,
    pub callee: FuncId,
    pub call_site: CallSiteId,
}

/// Sort functions into reverse topological order of the call graph so leaves are
/// processed first (§2 item 3, §4.2). Falls back to appending any function left
/// unordered by a cycle (recursive calls) in its original relative order, since the
/// core does not need to reject recursion to stitch non-recursive callers correctly.
pub fn reverse_topo_order(funcs: &[FuncId], edges: &[CallEdge]) -> Vec<FuncId> {
    let mut callees: HashMap<FuncId, HashSet<FuncId>> = HashMap::new();
    for f in funcs {
        callees.entry(*f).or_default();
    }
    for e in edges {
        callees.entry(e.caller).or_default().insert(e.callee);
    }

    let mut order = Vec::new();
    let mut visited: HashSet<FuncId> = HashSet::new();
    let mut on_stack: HashSet<FuncId> = HashSet::new();

    fn visit(
        f: FuncId,
        callees: &HashMap<FuncId, HashSet<FuncId>>,
        visited: &mut HashSet<FuncId>,
        on_stack: &mut HashSet<FuncId>,
        order: &mut Vec<FuncId>,
    ) {
        if visited.contains(&f) || on_stack.contains(&f) {
            return;
        }
        on_stack.insert(f);
        if let Some(cs) = callees.get(&f) {
            for &c in cs {
                visit(c, callees, visited, on_stack, order);
            }
        }
        on_stack.remove(&f);
        visited.insert(f);
        order.push(f); // leaves (no callees left unvisited) land first
    }

    for f in funcs {
        visit(*f, &callees, &mut visited, &mut on_stack, &mut order);
    }
    order
}
