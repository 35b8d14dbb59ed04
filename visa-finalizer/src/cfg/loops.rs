//! Back-edge discovery and natural-loop membership (§4.2 "Structural analyses").

use crate::cfg::block::BasicBlockInfo;
use crate::entities::BlockId;
use std::collections::HashSet;
use visa_entity::PrimaryMap;

/// A back edge `tail -> head`, where `head` dominates `tail`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BackEdge {
    pub tail: BlockId,
    pub head: BlockId,
}

fn dominates(blocks: &PrimaryMap<BlockId, BasicBlockInfo>, head: BlockId, mut node: BlockId) -> bool {
    loop {
        if node == head {
            return true;
        }
        match blocks[node].idom {
            Some(idom) if idom != node => node = idom,
            _ => return node == head,
        }
    }
}

/// Find all back edges: `u -> v` where `v` dominates `u`.
pub fn find_back_edges(blocks: &PrimaryMap<BlockId, BasicBlockInfo>) -> Vec<BackEdge> {
    let mut out = Vec::new();
    for (id, info) in blocks.iter() {
        for &succ in &info.succs {
            if dominates(blocks, succ, id) {
                out.push(BackEdge {
                    tail: id,
                    head: succ,
                });
            }
        }
    }
    out
}

/// For one back edge, the set of blocks that can reach `tail` without going through
/// `head` — the natural loop body, including `head` and `tail`.
pub fn natural_loop_body(
    blocks: &PrimaryMap<BlockId, BasicBlockInfo>,
    edge: BackEdge,
) -> HashSet<BlockId> {
    let mut body = HashSet::new();
    body.insert(edge.head);
    body.insert(edge.tail);
    let mut worklist = vec![edge.tail];
    while let Some(b) = worklist.pop() {
        for &p in &blocks[b].preds {
            if body.insert(p) {
                worklist.push(p);
            }
        }
    }
    body
}

/// Compute natural loops for every back edge and annotate each block's
/// `loop_nest_level` and `in_natural_loop` flag with the count/union of loops it
/// belongs to.
pub fn annotate_loops(blocks: &mut PrimaryMap<BlockId, BasicBlockInfo>) -> Vec<(BackEdge, HashSet<BlockId>)> {
    let edges = find_back_edges(blocks);
    let mut loops = Vec::new();
    for edge in edges {
        let body = natural_loop_body(blocks, edge);
        loops.push((edge, body));
    }
    for id in blocks.keys().collect::<Vec<_>>() {
        let depth = loops.iter().filter(|(_, body)| body.contains(&id)).count() as u32;
        blocks[id].loop_nest_level = depth;
        blocks[id].in_natural_loop = depth > 0;
    }
    loops
}
