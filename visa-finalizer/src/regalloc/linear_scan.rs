//! The linear-scan allocator driver (§4.4), grounded on
//! `original_source/visa/LinearScanRA.{h,cpp}` and
//! `cranelift-codegen/src/regalloc/context.rs`'s iterate-to-fixpoint driver shape.

use super::live_range::{AllocState, LiveRange, LiveRangeFlags};
use super::physical_file::PhysicalRegisterFile;
use crate::entities::DeclId;
use std::collections::HashSet;

/// A kernel input value's half-open `[word_offset, end_lexical_id)` interval,
/// occupying GRFs from program start (§4.4 "Inputs").
#[derive(Debug, Clone, Copy)]
pub struct InputInterval {
    pub word_offset: u32,
    pub end: u32,
}

/// Registers the last sixteen GRFs of the file are reserved for EOT payloads
/// (§4.4 "End-of-thread tail", GLOSSARY).
pub const EOT_TAIL_GRFS: u32 = 16;

#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    pub spilled: Vec<DeclId>,
}

#[derive(Debug)]
struct ActiveEntry {
    idx: usize,
    end: u32,
    grf: u32,
    word: u32,
    size_words: u32,
}

/// Run one allocation pass over `ranges`, honoring `inputs` and the forbidden/EOT/
/// pre-assignment rules of §4.4. Returns the set of declarations that must be handed
/// to the spill manager; on success this is empty and every non-pre-assigned range in
/// `ranges` has `assigned` filled in.
pub fn allocate(
    ranges: &mut [LiveRange],
    inputs: &[InputInterval],
    file: &mut PhysicalRegisterFile,
) -> AllocationOutcome {
    // EOT ranges are placed first, in program order, into the last EOT_TAIL_GRFS
    // rows, then that window is masked off from everyone else (§4.4).
    let eot_first_grf = file.num_grfs().saturating_sub(EOT_TAIL_GRFS);
    let mut eot_indices: Vec<usize> = ranges
        .iter()
        .enumerate()
        .filter(|(_, r)| r.flags.contains(LiveRangeFlags::END_OF_THREAD))
        .map(|(i, _)| i)
        .collect();
    eot_indices.sort_by_key(|&i| ranges[i].first);
    let mut eot_cursor = eot_first_grf;
    for i in eot_indices {
        let rows = rows_for(ranges[i].size_words);
        ranges[i].assigned = Some((eot_cursor, 0));
        ranges[i].state = AllocState::Assigned;
        file.take(eot_cursor, 0, ranges[i].size_words.max(rows * WORDS_PER_GRF_HALF()));
        eot_cursor += rows;
    }
    for grf in eot_first_grf..file.num_grfs() {
        // Anything left in the tail after EOT placement is unavailable to others.
        if file_row_is_free(file, grf) {
            file.mark_unavailable(grf);
        }
    }

    let mut order: Vec<usize> = (0..ranges.len()).collect();
    order.sort_by_key(|&i| ranges[i].first);

    let mut active: Vec<ActiveEntry> = Vec::new();
    let mut pre_assigned_active: Vec<ActiveEntry> = Vec::new();
    let mut input_cursor = 0usize;
    let mut sorted_inputs: Vec<InputInterval> = inputs.to_vec();
    sorted_inputs.sort_by_key(|iv| iv.end);

    let mut spilled: HashSet<DeclId> = HashSet::new();

    let mut oi = 0;
    while oi < order.len() {
        let i = order[oi];
        if ranges[i].flags.contains(LiveRangeFlags::END_OF_THREAD) {
            oi += 1;
            continue;
        }
        let start = ranges[i].first;

        // Step 2/3: expire active ranges (and input intervals) whose end <= start.
        expire(&mut active, start, file);
        expire(&mut pre_assigned_active, start, file);
        while input_cursor < sorted_inputs.len() && sorted_inputs[input_cursor].end <= start {
            input_cursor += 1;
        }

        if ranges[i].flags.contains(LiveRangeFlags::PRE_ASSIGNED) {
            if let Some((grf, word)) = ranges[i].assigned {
                file.take(grf, word, ranges[i].size_words);
                ranges[i].state = AllocState::PreAssigned;
                pre_assigned_active.push(ActiveEntry {
                    idx: i,
                    end: ranges[i].last,
                    grf,
                    word,
                    size_words: ranges[i].size_words,
                });
            }
            oi += 1;
            continue;
        }

        if ranges[i].flags.contains(LiveRangeFlags::CALL_SITE_SYNTH) {
            // Extend every active range's end to the call-site end, pinning
            // caller-save decisions across the call (§4.4 step 4b).
            for e in active.iter_mut() {
                if e.end < ranges[i].last {
                    e.end = ranges[i].last;
                    ranges[e.idx].last = ranges[e.idx].last.max(ranges[i].last);
                }
            }
            oi += 1;
            continue;
        }

        if ranges[i]
            .flags
            .intersects(LiveRangeFlags::CALL_PSEUDO | LiveRangeFlags::STACK_CALL_INPUT)
        {
            // Forbidden/return-register sets were precomputed by the builder's call
            // lowering; nothing further to allocate here (§4.4 step 4c).
            oi += 1;
            continue;
        }

        let window = file.find_window(ranges[i].size_words, ranges[i].align, |grf| {
            ranges[i]
                .forbidden
                .get(grf as usize)
                .copied()
                .unwrap_or(false)
        });

        match window {
            Some((grf, word)) => {
                file.take(grf, word, ranges[i].size_words);
                ranges[i].assigned = Some((grf, word));
                ranges[i].state = AllocState::Active;
                active.push(ActiveEntry {
                    idx: i,
                    end: ranges[i].last,
                    grf,
                    word,
                    size_words: ranges[i].size_words,
                });
                active.sort_by_key(|e| e.end);
                oi += 1;
            }
            None => {
                // Step 5: try evicting active ranges by spill-cost heuristic.
                let mut candidates: Vec<usize> = active
                    .iter()
                    .map(|e| e.idx)
                    .filter(|&idx| ranges[idx].is_eligible_for_eviction())
                    .collect();
                candidates.sort_by(|&a, &b| {
                    ranges[a]
                        .spill_cost()
                        .partial_cmp(&ranges[b].spill_cost())
                        .unwrap()
                        .then(ranges[a].decl.as_u32().cmp(&ranges[b].decl.as_u32()))
                });

                let mut evicted_any = false;
                for cand in candidates {
                    if let Some(pos) = active.iter().position(|e| e.idx == cand) {
                        let e = active.remove(pos);
                        file.free(e.grf, e.word, e.size_words);
                        ranges[cand].assigned = None;
                        ranges[cand].state = AllocState::Spilled;
                        ranges[cand].flags |= LiveRangeFlags::SPILLED;
                        spilled.insert(ranges[cand].decl);
                        evicted_any = true;
                        if let Some((grf, word)) = file.find_window(
                            ranges[i].size_words,
                            ranges[i].align,
                            |grf| ranges[i].forbidden.get(grf as usize).copied().unwrap_or(false),
                        ) {
                            file.take(grf, word, ranges[i].size_words);
                            ranges[i].assigned = Some((grf, word));
                            ranges[i].state = AllocState::Active;
                            active.push(ActiveEntry {
                                idx: i,
                                end: ranges[i].last,
                                grf,
                                word,
                                size_words: ranges[i].size_words,
                            });
                            active.sort_by_key(|e| e.end);
                            break;
                        }
                    }
                }

                if ranges[i].assigned.is_none() {
                    ranges[i].state = AllocState::Spilled;
                    ranges[i].flags |= LiveRangeFlags::SPILLED;
                    spilled.insert(ranges[i].decl);
                }
                let _ = evicted_any;
                oi += 1;
            }
        }
    }

    AllocationOutcome {
        spilled: spilled.into_iter().collect(),
    }
}

fn rows_for(size_words: u32) -> u32 {
    let wpg = crate::ty::GRF_WIDTH_BYTES / 2;
    size_words.div_ceil(wpg)
}

#[allow(non_snake_case)]
fn WORDS_PER_GRF_HALF() -> u32 {
    crate::ty::GRF_WIDTH_BYTES / 2
}

fn file_row_is_free(file: &PhysicalRegisterFile, grf: u32) -> bool {
    !(0..WORDS_PER_GRF_HALF()).any(|w| file.is_busy(grf, w))
}

fn expire(active: &mut Vec<ActiveEntry>, start: u32, file: &mut PhysicalRegisterFile) {
    let mut i = 0;
    while i < active.len() {
        if active[i].end <= start {
            let e = active.remove(i);
            file.free(e.grf, e.word, e.size_words);
        } else {
            i += 1;
        }
    }
}
