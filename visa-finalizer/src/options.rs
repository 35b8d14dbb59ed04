//! The command-line/option surface recognized by the builder (§6).

/// How functions are stitched into callers (§6 `noStitchExternFunc`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StitchPolicy {
    /// Stitch every callee into every kernel that (transitively) calls it.
    StitchAll,
    /// Treat `extern` functions as roots; stitch only non-extern callees.
    RootsAreExterns,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub total_grf_num: u32,
    pub grf_num_to_use: u32,
    pub reserved_grf_num: u32,
    pub reserve_r0: bool,
    pub enable_preemption: bool,
    pub stitch_policy: StitchPolicy,
    /// Base offset of the spill area within the scratch surface.
    pub spill_mem_offset: i32,
    pub sw_sb_token_num: u32,
    pub num_general_acc: u32,
    pub gtpin_scratch_area_size: u32,
    pub abort_on_spill: bool,
    pub abort_on_spill_threshold: f32,
    pub spill_space_compression: bool,
    pub generate_debug_info: bool,
    pub has_stack_calls: bool,
    /// Hard bound on allocator retry iterations (§4.4 "Iteration control").
    pub max_allocator_iterations: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            total_grf_num: 128,
            grf_num_to_use: 128,
            reserved_grf_num: 0,
            reserve_r0: true,
            enable_preemption: false,
            stitch_policy: StitchPolicy::StitchAll,
            spill_mem_offset: 0,
            sw_sb_token_num: 32,
            num_general_acc: 1,
            gtpin_scratch_area_size: 0,
            abort_on_spill: false,
            abort_on_spill_threshold: 0.5,
            spill_space_compression: true,
            generate_debug_info: false,
            has_stack_calls: false,
            max_allocator_iterations: 32,
        }
    }
}

impl CompileOptions {
    /// The allocator ceiling, bounded by `total_grf_num` (§6).
    pub fn effective_grf_num(&self) -> u32 {
        self.grf_num_to_use
            .min(self.total_grf_num)
            .saturating_sub(self.reserved_grf_num)
    }
}
