//! Persisted JIT metadata populated by the core and consumed by the runtime (§6).

#[derive(Debug, Clone, Default)]
pub struct PerBlockStats {
    pub id: u32,
    pub static_cycle_estimate: u32,
    pub send_stall_cycle_estimate: u32,
    pub loop_nest_level: u32,
}

#[derive(Debug, Clone, Default)]
pub struct JitMetadata {
    pub is_spill: bool,
    pub num_grf_used: u32,
    pub num_asm_count: u32,
    /// Bytes of scratch memory used by spill/fill.
    pub spill_mem_used: u32,
    pub gen_debug_info: Vec<u8>,
    pub num_flag_spill_store: u32,
    pub num_flag_spill_load: u32,
    pub uses_barrier: u32,
    pub per_block_stats: Vec<PerBlockStats>,
    /// Weighted by loop nesting depth (§6).
    pub num_grf_spill_fill: u32,
    pub avoid_retry: bool,
    pub free_grf_info: Vec<u8>,
    pub num_bytes_scratch_gtpin: u32,
    pub offset_to_skip_per_thread_data_load: u32,
    pub offset_to_skip_cross_thread_data_load: u32,
    pub offset_to_skip_set_ffid_gp: u32,
    pub offset_to_skip_set_ffid_gp1: u32,
    pub has_stackcalls: bool,
    pub num_grf_total: u32,
    pub num_threads: u32,
}

impl JitMetadata {
    /// Serialize every integer field little-endian, per §6 ("All integer fields are
    /// little-endian"). Blob fields are appended as-is, length-prefixed.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.is_spill as u8);
        out.extend_from_slice(&self.num_grf_used.to_le_bytes());
        out.extend_from_slice(&self.num_asm_count.to_le_bytes());
        out.extend_from_slice(&self.spill_mem_used.to_le_bytes());
        out.extend_from_slice(&(self.gen_debug_info.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.gen_debug_info);
        out.extend_from_slice(&self.num_flag_spill_store.to_le_bytes());
        out.extend_from_slice(&self.num_flag_spill_load.to_le_bytes());
        out.extend_from_slice(&self.uses_barrier.to_le_bytes());
        out.extend_from_slice(&self.num_grf_spill_fill.to_le_bytes());
        out.push(self.avoid_retry as u8);
        out.extend_from_slice(&(self.free_grf_info.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.free_grf_info);
        out.extend_from_slice(&self.num_bytes_scratch_gtpin.to_le_bytes());
        out.extend_from_slice(&self.offset_to_skip_per_thread_data_load.to_le_bytes());
        out.extend_from_slice(&self.offset_to_skip_cross_thread_data_load.to_le_bytes());
        out.extend_from_slice(&self.offset_to_skip_set_ffid_gp.to_le_bytes());
        out.extend_from_slice(&self.offset_to_skip_set_ffid_gp1.to_le_bytes());
        out.push(self.has_stackcalls as u8);
        out.extend_from_slice(&self.num_grf_total.to_le_bytes());
        out.extend_from_slice(&self.num_threads.to_le_bytes());
        out
    }
}
