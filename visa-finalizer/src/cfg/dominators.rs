//! Dominator computation by iterative intersection on the reverse post order
//! (§4.2 "Structural analyses").

use crate::cfg::block::BasicBlockInfo;
use crate::entities::BlockId;
use visa_entity::PrimaryMap;

/// Compute immediate dominators for every block reachable from `entry`, writing the
/// result into each block's `idom` field. `rpo_order` must list blocks in reverse
/// post order with `entry` first.
pub fn compute(
    blocks: &mut PrimaryMap<BlockId, BasicBlockInfo>,
    entry: BlockId,
    rpo_order: &[BlockId],
) {
    for &b in rpo_order {
        blocks[b].idom = None;
    }
    blocks[entry].idom = Some(entry);

    let mut rpo_index = visa_entity::SecondaryMap::<BlockId, u32>::new();
    for (i, &b) in rpo_order.iter().enumerate() {
        rpo_index[b] = i as u32;
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo_order.iter() {
            if b == entry {
                continue;
            }
            let preds: Vec<BlockId> = blocks[b].preds.clone();
            let mut new_idom: Option<BlockId> = None;
            for p in preds {
                if blocks[p].idom.is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(blocks, &rpo_index, cur, p),
                });
            }
            if new_idom != blocks[b].idom {
                blocks[b].idom = new_idom;
                changed = true;
            }
        }
    }
}

fn intersect(
    blocks: &PrimaryMap<BlockId, BasicBlockInfo>,
    rpo_index: &visa_entity::SecondaryMap<BlockId, u32>,
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = blocks[a].idom.expect("idom computed for a finger walk");
        }
        while rpo_index[b] > rpo_index[a] {
            b = blocks[b].idom.expect("idom computed for a finger walk");
        }
    }
    a
}
