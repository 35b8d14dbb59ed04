//! A region allocator scoping transient byte buffers to one compilation (§2.1),
//! grounded on `cranelift-codegen`'s use of `bumpalo` for its own per-compilation
//! scratch allocations.
//!
//! The builder's byte-code string pool ([`crate::builder::bytecode::read_routine_header`])
//! and the spill manager's scratch descriptors are candidates for arena allocation;
//! this type gives them a single place to live bounded by the compile call, instead of
//! scattering individually heap-allocated `Vec<u8>`/`String` buffers that outlive their
//! usefulness.

use bumpalo::Bump;

/// Owns one `bumpalo::Bump` per compilation. Dropping the arena frees every byte
/// buffer allocated from it in one shot.
#[derive(Default)]
pub struct CompileArena {
    bump: Bump,
}

impl CompileArena {
    pub fn new() -> Self {
        CompileArena { bump: Bump::new() }
    }

    /// Copy `bytes` into the arena and return a slice borrowed from it.
    pub fn alloc_bytes<'a>(&'a self, bytes: &[u8]) -> &'a [u8] {
        self.bump.alloc_slice_copy(bytes)
    }

    /// Copy `s` into the arena and return a `&str` borrowed from it.
    pub fn alloc_str<'a>(&'a self, s: &str) -> &'a str {
        self.bump.alloc_str(s)
    }

    /// Total bytes currently allocated from the arena's chunks.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }

    /// Drop every allocation made so far, reusing the underlying chunks for the next
    /// compile (§2.1: scoped to one compilation, not one process).
    pub fn reset(&mut self) {
        self.bump.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_bytes_and_strings() {
        let arena = CompileArena::new();
        let bytes = arena.alloc_bytes(&[1, 2, 3]);
        assert_eq!(bytes, &[1, 2, 3]);
        let s = arena.alloc_str("kernel_main");
        assert_eq!(s, "kernel_main");
    }

    #[test]
    fn reset_reuses_chunk_capacity_instead_of_growing() {
        let mut arena = CompileArena::new();
        arena.alloc_bytes(&[0u8; 64]);
        let after_first = arena.allocated_bytes();
        assert!(after_first > 0);
        arena.reset();
        arena.alloc_bytes(&[0u8; 64]);
        // Reset reclaims the chunk for reuse rather than freeing it, so a second
        // allocation of the same size doesn't grow total chunk capacity.
        assert_eq!(arena.allocated_bytes(), after_first);
    }
}
