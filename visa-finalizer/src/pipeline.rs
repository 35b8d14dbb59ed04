//! The finalizer's top-level data flow (§2 "Data flow"): builder → IR+CFG →
//! liveness → allocator → (if spills) spill manager → builder (next iteration), then
//! JIT metadata.

use crate::diagnostics::{Diagnostics, FinalizeError};
use crate::function::Function;
use crate::jit_metadata::JitMetadata;
use crate::options::CompileOptions;
use crate::regalloc::{LiveRangeFlags, EOT_TAIL_GRFS};

pub fn run(
    func: &mut Function,
    options: &CompileOptions,
    diagnostics: &mut Diagnostics,
) -> Result<super::builder::CompileResult, FinalizeError> {
    let total_insts_at_start = func.insts.len().max(1) as f32;
    let mut metadata = JitMetadata {
        num_grf_total: options.effective_grf_num(),
        has_stackcalls: options.has_stack_calls,
        num_threads: 1,
        ..Default::default()
    };

    let mut iterations = 0u32;
    let mut total_spilled_weighted: f64 = 0.0;

    loop {
        let cfg = crate::cfg::build(func);
        let liveness = crate::liveness::compute(func, &cfg);
        let mut ranges = crate::regalloc::build_live_ranges(func);

        if let Err(err) = apply_forbidden_and_eot(&mut ranges, func, options) {
            diagnostics.record(err);
            metadata.is_spill = false;
            return Ok(super::builder::CompileResult {
                metadata,
                success: false,
            });
        }

        let mut file = crate::regalloc::PhysicalRegisterFile::new(options.effective_grf_num());
        if options.reserve_r0 {
            file.mark_unavailable(0);
        }

        let inputs: Vec<crate::regalloc::InputInterval> = func
            .inputs
            .iter()
            .map(|ib| crate::regalloc::InputInterval {
                word_offset: ib.byte_offset / 2,
                end: func
                    .insts
                    .values()
                    .filter(|i| {
                        i.srcs
                            .iter()
                            .any(|s| s.base_var().map(|v| func.regvars[v].decl == ib.decl).unwrap_or(false))
                    })
                    .map(|i| i.lexical_id)
                    .max()
                    .unwrap_or(0),
            })
            .collect();

        let outcome = crate::regalloc::allocate(&mut ranges, &inputs, &mut file);

        if outcome.spilled.is_empty() {
            crate::spill::expand::run(func, options);
            metadata.num_grf_used = count_used_grfs(&ranges, options.effective_grf_num());
            metadata.is_spill = false;
            metadata.num_asm_count = func.insts.len() as u32;
            metadata.per_block_stats = cfg
                .order
                .iter()
                .map(|&b| crate::jit_metadata::PerBlockStats {
                    id: b.as_u32(),
                    static_cycle_estimate: func.blocks[b].len() as u32,
                    send_stall_cycle_estimate: if cfg.blocks[b].contains_send { 20 } else { 0 },
                    loop_nest_level: cfg.blocks[b].loop_nest_level,
                })
                .collect();
            write_back_assignments(func, &ranges);
            return Ok(super::builder::CompileResult {
                metadata,
                success: true,
            });
        }

        iterations += 1;
        let weighted: f64 = outcome
            .spilled
            .iter()
            .map(|_| 1.0)
            .sum();
        total_spilled_weighted += weighted;

        if options.abort_on_spill {
            let ratio = (total_spilled_weighted as f32) / total_insts_at_start;
            if ratio > options.abort_on_spill_threshold {
                metadata.is_spill = true;
                metadata.avoid_retry = true;
                let err = FinalizeError::AbortOnSpill {
                    kernel: func.name.clone(),
                    ratio,
                    threshold: options.abort_on_spill_threshold,
                };
                diagnostics.record(err);
                return Ok(super::builder::CompileResult {
                    metadata,
                    success: false,
                });
            }
        }

        if iterations > options.max_allocator_iterations {
            let err = FinalizeError::IterationBoundExceeded {
                bound: options.max_allocator_iterations,
                kernel: func.name.clone(),
            };
            diagnostics.record(err);
            metadata.is_spill = true;
            return Ok(super::builder::CompileResult {
                metadata,
                success: false,
            });
        }

        let min_window_rows = 8u32; // widest send payload considered by this core
        if options.generate_debug_info
            && options.effective_grf_num() < EOT_TAIL_GRFS + min_window_rows
        {
            diagnostics.record(FinalizeError::NoRoomForSpillFillWindow {
                rows: min_window_rows,
            });
            metadata.is_spill = true;
            return Ok(super::builder::CompileResult {
                metadata,
                success: false,
            });
        }

        metadata.num_grf_spill_fill += outcome.spilled.len() as u32 * (iterations + 1);
        let report = crate::spill::rewrite(func, &outcome.spilled, options, &liveness);
        metadata.spill_mem_used = metadata
            .spill_mem_used
            .max(report.slots.values().copied().max().unwrap_or(0) + crate::ty::GRF_WIDTH_BYTES);
        metadata.is_spill = true;
    }
}

fn apply_forbidden_and_eot(
    ranges: &mut [crate::regalloc::LiveRange],
    func: &Function,
    options: &CompileOptions,
) -> Result<(), FinalizeError> {
    let num_grfs = options.effective_grf_num() as usize;
    // Rows already claimed by an earlier pre-assigned range this pass, so a second
    // declaration pinned to an overlapping GRF range is rejected instead of silently
    // accepted (§8 "Pre-assigned conflict").
    let mut held: Vec<(u32, u32, String)> = Vec::new();
    for r in ranges.iter_mut() {
        r.forbidden = vec![false; num_grfs];
        if options.reserve_r0 {
            r.forbidden[0] = true;
        }
        // Mark pre-assigned ranges from any register variable already carrying a
        // physical assignment (predefined vars, ABI-bound inputs).
        if let Some(rv) = func
            .regvars
            .iter()
            .find(|(_, rv)| rv.decl == r.decl && rv.is_pre_assigned())
        {
            if let Some(a) = rv.1.assignment {
                let rows = func.decls[r.decl].num_rows.max(1);
                let start = a.grf;
                let end = start + rows;
                if let Some((_, _, holder)) = held
                    .iter()
                    .find(|(held_start, held_end, _)| start < *held_end && *held_start < end)
                {
                    return Err(FinalizeError::PreAssignedConflict {
                        grf: start,
                        requested_by: func.decls[r.decl].name.clone(),
                        held_by: holder.clone(),
                    });
                }
                held.push((start, end, func.decls[r.decl].name.clone()));
                r.assigned = Some((a.grf, a.sub_reg_word));
                r.flags |= LiveRangeFlags::PRE_ASSIGNED;
            }
        }
        // EOT: any register variable backing this declaration that is the payload
        // of an instruction with `eot_flag` set.
        let is_eot = func.insts.values().any(|i| {
            i.is_eot()
                && i.srcs.iter().any(|s| {
                    s.base_var()
                        .map(|v| func.regvars[v].decl == r.decl)
                        .unwrap_or(false)
                })
        });
        if is_eot {
            r.flags |= LiveRangeFlags::END_OF_THREAD;
        }
    }
    Ok(())
}

fn count_used_grfs(ranges: &[crate::regalloc::LiveRange], _total: u32) -> u32 {
    ranges
        .iter()
        .filter_map(|r| r.assigned.map(|(grf, _)| grf + 1))
        .max()
        .unwrap_or(0)
}

fn write_back_assignments(func: &mut Function, ranges: &[crate::regalloc::LiveRange]) {
    use std::collections::HashMap;
    let by_decl: HashMap<_, _> = ranges.iter().map(|r| (r.decl, r.assigned)).collect();
    for rv in func.regvars.values_mut() {
        if let Some(Some((grf, word))) = by_decl.get(&rv.decl) {
            rv.assignment = Some(crate::regvar::PhysicalAssignment {
                grf: *grf,
                sub_reg_word: *word,
            });
        }
    }
}
