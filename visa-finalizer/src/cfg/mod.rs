//! Control-flow graph construction, dominators, back edges and natural loops
//! (§4.2), grounded on `cranelift-codegen/src/flowgraph.rs`.

pub mod block;
pub mod callgraph;
pub mod dominators;
pub mod loops;

use crate::entities::{BlockId, InstId};
use crate::function::{Function, LabelKind};
use crate::instruction::{ControlFlowOp, Instruction, Opcode};
use block::{BasicBlockInfo, BlockFlags};
use std::collections::HashSet;
use visa_entity::PrimaryMap;

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub entry: BlockId,
    /// Ordered block list (layout order).
    pub order: Vec<BlockId>,
    pub blocks: PrimaryMap<BlockId, BasicBlockInfo>,
    pub back_edges: Vec<loops::BackEdge>,
    pub natural_loops: Vec<(loops::BackEdge, HashSet<BlockId>)>,
}

impl ControlFlowGraph {
    pub fn block_of(&self, func: &Function, inst: InstId) -> Option<BlockId> {
        func.blocks
            .iter()
            .find(|(_, insts)| insts.contains(&inst))
            .map(|(id, _)| id)
    }
}

/// Construction rules (§4.2):
/// - a block begins at program start, every label target, and every instruction
///   following a branch, call, return or end-of-thread send.
/// - a block ends at a branch, call, return, end-of-thread send, or the instruction
///   before a new label.
fn split_into_blocks(func: &Function) -> Vec<Vec<InstId>> {
    let mut label_targets: HashSet<InstId> = HashSet::new();
    // A label instruction (Opcode::Label) marks the start of a new block at the next
    // non-label instruction; we treat the label's own stream position as a split
    // point so the label stays attached to the block it names.
    for (i, &inst_id) in func.stream.iter().enumerate() {
        let inst = &func.insts[inst_id];
        if matches!(inst.opcode, crate::instruction::Opcode::Label) {
            label_targets.insert(inst_id);
            let _ = i;
        }
    }

    let mut blocks: Vec<Vec<InstId>> = Vec::new();
    let mut cur: Vec<InstId> = Vec::new();
    let mut prev_terminated = true; // program start begins a block

    for &inst_id in &func.stream {
        let starts_new = prev_terminated || label_targets.contains(&inst_id);
        if starts_new && !cur.is_empty() {
            blocks.push(std::mem::take(&mut cur));
        }
        let inst = &func.insts[inst_id];
        cur.push(inst_id);
        prev_terminated = terminates_block(inst);
    }
    if !cur.is_empty() {
        blocks.push(cur);
    }
    blocks
}

fn terminates_block(inst: &Instruction) -> bool {
    inst.is_branch() || inst.is_call() || inst.is_return() || inst.is_eot()
}

/// Give a subroutine a unique entry and exit block before it is ever stitched into a
/// caller (§4.2, the call/return-edge-uniqueness invariant §8 tests). Must run on the
/// function's own, unstitched stream — applying it to a post-splice clone would merge
/// a spliced callee's return with the caller's own trailing return, which are not the
/// same control-flow point.
pub fn normalize_subroutine(func: &mut Function) {
    if func.stream.is_empty() {
        return;
    }
    normalize_entry(func);
    normalize_exit(func);
}

/// If the function's first instruction is a label some other instruction in the body
/// branches back to, the entry block has an in-function predecessor — split a fresh,
/// unreferenced header block in front of it so the call/layout entry point is unique.
fn normalize_entry(func: &mut Function) {
    let first_id = func.stream[0];
    let entry_label = match func.insts[first_id].opcode {
        Opcode::Label => func.insts[first_id].call_label,
        _ => None,
    };
    let Some(entry_label) = entry_label else {
        return;
    };
    let targeted = func
        .stream
        .iter()
        .any(|&id| id != first_id && func.insts[id].call_label == Some(entry_label));
    if !targeted {
        return;
    }

    let header_label = func.new_label(format!("{}.entry", func.name), LabelKind::Block);
    let mut header = Instruction::new(Opcode::Label, 1);
    header.call_label = Some(header_label);
    func.insert_at(0, header);
    func.renumber_lexical_ids();
}

/// If more than one instruction returns, rewrite every one of them into a jump to a
/// single fresh exit block containing the only real return.
fn normalize_exit(func: &mut Function) {
    let return_positions: Vec<usize> = func
        .stream
        .iter()
        .enumerate()
        .filter(|&(_, &id)| func.insts[id].is_return())
        .map(|(i, _)| i)
        .collect();
    if return_positions.len() <= 1 {
        return;
    }

    let ret_opcode = func.insts[func.stream[return_positions[0]]].opcode;
    let exit_label = func.new_label(format!("{}.exit", func.name), LabelKind::Block);
    for &pos in &return_positions {
        let id = func.stream[pos];
        let inst = &mut func.insts[id];
        inst.opcode = Opcode::ControlFlow(ControlFlowOp::Jump);
        inst.call_label = Some(exit_label);
    }

    let mut label_inst = Instruction::new(Opcode::Label, 1);
    label_inst.call_label = Some(exit_label);
    func.append_inst(label_inst);

    let mut ret_inst = Instruction::new(ret_opcode, 1);
    ret_inst.eot_flag = false;
    func.append_inst(ret_inst);
    func.renumber_lexical_ids();
}

/// Build the control-flow graph for `func`, populating `func.blocks` and returning
/// the graph. Unreachable blocks are dropped per §4.2.
pub fn build(func: &mut Function) -> ControlFlowGraph {
    let raw_blocks = split_into_blocks(func);

    func.blocks = PrimaryMap::new();
    let mut label_to_block: std::collections::HashMap<crate::entities::LabelId, BlockId> =
        std::collections::HashMap::new();
    let mut block_ids = Vec::with_capacity(raw_blocks.len());
    for insts in &raw_blocks {
        let id = func.blocks.push(insts.clone());
        block_ids.push(id);
        if let Some(&first) = insts.first() {
            if let crate::instruction::Opcode::Label = func.insts[first].opcode {
                // Labels carry their target through the `call_label` field set by
                // the builder when the label instruction is appended.
                if let Some(lbl) = func.insts[first].call_label {
                    label_to_block.insert(lbl, id);
                }
            }
        }
    }

    let mut blocks: PrimaryMap<BlockId, BasicBlockInfo> = PrimaryMap::new();
    for &id in &block_ids {
        blocks.push(BasicBlockInfo::new(id));
    }

    // Wire edges: fall-through first, then explicit branch/call/return targets.
    for (idx, &id) in block_ids.iter().enumerate() {
        let insts = &raw_blocks[idx];
        let last = *insts.last().unwrap();
        let last_inst = &func.insts[last];
        let contains_send = insts.iter().any(|i| func.insts[*i].is_send());
        blocks[id].contains_send = contains_send;

        let fallthrough = block_ids.get(idx + 1).copied();
        let mut succs: Vec<BlockId> = Vec::new();

        if last_inst.is_return() {
            blocks[id].flags |= BlockFlags::RETURN;
            // Return edges are wired by the stitcher once callers are known; locally
            // a subroutine's return block has no intra-function successor.
        } else if last_inst.is_call() {
            blocks[id].flags |= BlockFlags::CALL;
            if let Some(lbl) = last_inst.call_label {
                if let Some(&target) = label_to_block.get(&lbl) {
                    succs.push(target);
                }
            }
            if let Some(ft) = fallthrough {
                succs.push(ft);
            }
        } else if last_inst.is_branch() {
            if let Some(lbl) = last_inst.call_label {
                if let Some(&target) = label_to_block.get(&lbl) {
                    succs.push(target);
                }
            }
            if !matches!(
                last_inst.opcode,
                crate::instruction::Opcode::ControlFlow(crate::instruction::ControlFlowOp::Jump)
            ) {
                if let Some(ft) = fallthrough {
                    succs.push(ft);
                }
            }
        } else if last_inst.is_eot() {
            // end-of-thread: no successors.
        } else if let Some(ft) = fallthrough {
            succs.push(ft);
        }

        blocks[id].succs = succs;
    }
    for &id in &block_ids {
        let succs = blocks[id].succs.clone();
        for s in succs {
            blocks[s].preds.push(id);
        }
    }

    let entry = block_ids.first().copied().unwrap_or_else(|| {
        // An empty function still needs a well-defined (unused) entry id.
        func.blocks.push(Vec::new())
    });
    for &id in &block_ids {
        blocks[id].flags.insert(if id == entry {
            BlockFlags::INIT
        } else {
            BlockFlags::empty()
        });
        if blocks[id].flags.contains(BlockFlags::RETURN) {
            blocks[id].flags |= BlockFlags::EXIT;
        }
    }

    // Drop unreachable blocks (no predecessor and not the entry).
    let reachable = reachable_from(&blocks, entry);
    let mut order: Vec<BlockId> = block_ids
        .into_iter()
        .filter(|b| reachable.contains(b))
        .collect();
    for id in order.clone() {
        blocks[id]
            .preds
            .retain(|p| reachable.contains(p));
    }

    // Preorder / reverse-post-order numbering via DFS from entry.
    let (preorder, rpo) = number_blocks(&blocks, entry, &order);
    for (i, &id) in preorder.iter().enumerate() {
        blocks[id].preorder = i as u32;
    }
    for (i, &id) in rpo.iter().enumerate() {
        blocks[id].rpo = i as u32;
    }
    order.sort_by_key(|b| blocks[*b].rpo);

    // Physical predecessor/successor mirrors layout order.
    for w in 0..order.len() {
        blocks[order[w]].phys_pred = if w > 0 { vec![order[w - 1]] } else { vec![] };
        blocks[order[w]].phys_succ = if w + 1 < order.len() {
            vec![order[w + 1]]
        } else {
            vec![]
        };
    }

    dominators::compute(&mut blocks, entry, &rpo);
    let natural_loops = loops::annotate_loops(&mut blocks);
    let back_edges = natural_loops.iter().map(|(e, _)| *e).collect();

    ControlFlowGraph {
        entry,
        order,
        blocks,
        back_edges,
        natural_loops,
    }
}

fn reachable_from(blocks: &PrimaryMap<BlockId, BasicBlockInfo>, entry: BlockId) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut stack = vec![entry];
    seen.insert(entry);
    while let Some(b) = stack.pop() {
        for &s in &blocks[b].succs {
            if seen.insert(s) {
                stack.push(s);
            }
        }
    }
    seen
}

fn number_blocks(
    blocks: &PrimaryMap<BlockId, BasicBlockInfo>,
    entry: BlockId,
    all: &[BlockId],
) -> (Vec<BlockId>, Vec<BlockId>) {
    let mut preorder = Vec::new();
    let mut postorder = Vec::new();
    let mut visited = HashSet::new();

    fn dfs(
        b: BlockId,
        blocks: &PrimaryMap<BlockId, BasicBlockInfo>,
        visited: &mut HashSet<BlockId>,
        preorder: &mut Vec<BlockId>,
        postorder: &mut Vec<BlockId>,
    ) {
        if !visited.insert(b) {
            return;
        }
        preorder.push(b);
        for &s in &blocks[b].succs {
            dfs(s, blocks, visited, preorder, postorder);
        }
        postorder.push(b);
    }
    dfs(entry, blocks, &mut visited, &mut preorder, &mut postorder);
    // Blocks unreachable by DFS (shouldn't happen post-pruning) still get a slot.
    for &b in all {
        if visited.insert(b) {
            preorder.push(b);
            postorder.push(b);
        }
    }
    let mut rpo = postorder.clone();
    rpo.reverse();
    (preorder, rpo)
}
