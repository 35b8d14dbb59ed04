//! Late expansion of spill/fill intrinsics into concrete send message descriptors
//! (§4.5 "Spill/fill intrinsics", §6 "Spill/fill send encoding — bit-exact").

/// Block-size code for the fixed GRF-count mapping `{1->0, 2->1, 4->2, 8->3}`.
pub fn block_size_code(num_grfs: u32) -> Option<u32> {
    match num_grfs {
        1 => Some(0),
        2 => Some(1),
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

/// Execution size of the expanded send: 8 for a one-GRF payload, 16 otherwise (§6).
pub fn exec_size_for(num_grfs: u32) -> u8 {
    if num_grfs <= 1 {
        8
    } else {
        16
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// hword scratch-block message.
    HwordScratch { byte_offset: u32 },
    /// oword block message through the data cache (stateless surface 0xFF).
    OwordStateless { byte_offset: u32 },
    /// oword message relative to the frame pointer (stack-call path).
    OwordFramePointer { byte_offset: u32 },
}

/// Encode a non-stack-call hword-scratch-variant message descriptor (§6).
///
/// Bit layout: header-present @19; category @18=1; operation @17 (1=write); channel
/// mode @16=1 (dword); invalidate-after-read @15; block-size @12-13; offset (hword
/// units) in the low 12 bits.
pub fn encode_hword_scratch(num_grfs: u32, byte_offset: u32, is_write: bool) -> u32 {
    let block = block_size_code(num_grfs).expect("scratch payload must be 1/2/4/8 GRFs");
    let hword_offset = byte_offset / 32;
    debug_assert!(hword_offset < (1 << 12), "hword offset exceeds 12 bits");

    let mut desc = 0u32;
    desc |= 1 << 19; // header present
    desc |= 1 << 18; // category: scratch block
    desc |= (is_write as u32) << 17;
    desc |= 1 << 16; // dword channel mode
    desc |= (block & 0x3) << 12;
    desc |= hword_offset & 0xFFF;
    desc
}

/// Encode an oword-variant message descriptor (stateless or frame-pointer relative;
/// both share the same bit layout, differing only in which header the embedder
/// builds). Oword-read = 0, oword-write = 8 at bit 14; low byte holds the surface
/// index (0xFF for stateless).
pub fn encode_oword(num_grfs: u32, is_write: bool, surface_index: u8) -> u32 {
    let block = oword_block_size_code(num_grfs).expect("oword payload must be 1/2/4/8 GRFs");
    let mut desc = 0u32;
    desc |= 1 << 19; // header present
    desc |= (if is_write { 8u32 } else { 0u32 }) << 14;
    desc |= (block & 0x3) << 8;
    desc |= surface_index as u32;
    desc
}

fn oword_block_size_code(num_grfs: u32) -> Option<u32> {
    block_size_code(num_grfs)
}

pub const STATELESS_SURFACE_INDEX: u8 = 0xFF;

/// Round a row count up to the nearest block-size code vISA actually supports,
/// capping at 8 (larger payloads are sent as a single split message rather than
/// being decomposed here).
fn rounded_block(num_rows: u32) -> u32 {
    match num_rows {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        _ => 8,
    }
}

/// Replace every `Spill`/`Fill` intrinsic still in `func`'s instruction stream with a
/// concrete `Send`, encoding the message descriptor from its payload row count and
/// slot offset (§4.5, §6). Returns the number of intrinsics expanded.
///
/// Must run after the allocator has converged with no further spills, once row
/// counts and slot offsets are final — re-running it on an already-expanded stream is
/// a no-op since no `Intrinsic(Spill|Fill)` remain to match.
pub fn run(func: &mut crate::function::Function, options: &crate::options::CompileOptions) -> u32 {
    use crate::instruction::{IntrinsicOp, Opcode};
    use crate::operand::Operand;

    let transport = super::transport_for(func, options.has_stack_calls);
    let ids: Vec<crate::entities::InstId> = func.stream.clone();
    let mut count = 0u32;

    for id in ids {
        let is_fill = matches!(func.insts[id].opcode, Opcode::Intrinsic(IntrinsicOp::Fill));
        let is_spill = matches!(func.insts[id].opcode, Opcode::Intrinsic(IntrinsicOp::Spill));
        if !is_fill && !is_spill {
            continue;
        }

        let num_rows = if is_fill {
            match &func.insts[id].dst {
                Some(Operand::Raw { num_rows, .. }) => *num_rows as u32,
                _ => 1,
            }
        } else {
            match func.insts[id].srcs.first() {
                Some(Operand::Raw { num_rows, .. }) => *num_rows as u32,
                _ => 1,
            }
        };
        let slot_offset = func.insts[id]
            .srcs
            .iter()
            .find_map(|s| match s {
                Operand::Immediate { bits, .. } => Some(*bits as u32),
                _ => None,
            })
            .unwrap_or(0);

        let block_rows = rounded_block(num_rows);
        let desc = if transport == super::HWORD_BYTES {
            encode_hword_scratch(block_rows, slot_offset, is_spill)
        } else {
            encode_oword(block_rows, is_spill, STATELESS_SURFACE_INDEX)
        };

        let inst = &mut func.insts[id];
        inst.opcode = Opcode::Send { split: num_rows > 8 };
        inst.srcs.push(Operand::Immediate {
            bits: desc as u64,
            ty: crate::ty::ScalarType::UDword,
        });
        count += 1;
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hword_descriptor_bit_layout() {
        let desc = encode_hword_scratch(2, 64, true);
        assert_eq!((desc >> 19) & 1, 1);
        assert_eq!((desc >> 18) & 1, 1);
        assert_eq!((desc >> 17) & 1, 1);
        assert_eq!((desc >> 16) & 1, 1);
        assert_eq!((desc >> 12) & 0x3, 1); // 2 GRFs -> code 1
        assert_eq!(desc & 0xFFF, 2); // 64 bytes / 32 = 2 hwords
    }

    #[test]
    fn oword_descriptor_stateless_surface() {
        let desc = encode_oword(1, false, STATELESS_SURFACE_INDEX);
        assert_eq!(desc & 0xFF, 0xFF);
        assert_eq!((desc >> 14) & 0xF, 0);
    }
}
