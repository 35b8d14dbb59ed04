//! The physical GRF file: bit-per-word availability plus per-GRF busy counters,
//! grounded on `cranelift-codegen/src/regalloc/register_set.rs`'s bitset-of-units
//! design, generalized from fixed register classes to a parametric word-per-GRF file.

const WORDS_PER_GRF: u32 = crate::ty::GRF_WIDTH_BYTES / 2;

#[derive(Debug, Clone)]
pub struct PhysicalRegisterFile {
    num_grfs: u32,
    /// `true` where a word is busy.
    busy: Vec<bool>,
    /// Per-GRF count of words currently marked busy, kept in sync with `busy` for
    /// O(1) "whole GRF free" queries.
    busy_counters: Vec<u32>,
}

impl PhysicalRegisterFile {
    pub fn new(num_grfs: u32) -> Self {
        PhysicalRegisterFile {
            num_grfs,
            busy: vec![false; (num_grfs * WORDS_PER_GRF) as usize],
            busy_counters: vec![0; num_grfs as usize],
        }
    }

    pub fn num_grfs(&self) -> u32 {
        self.num_grfs
    }

    fn word_index(&self, grf: u32, word: u32) -> usize {
        (grf * WORDS_PER_GRF + word) as usize
    }

    pub fn mark_unavailable(&mut self, grf: u32) {
        for w in 0..WORDS_PER_GRF {
            let idx = self.word_index(grf, w);
            if !self.busy[idx] {
                self.busy[idx] = true;
                self.busy_counters[grf as usize] += 1;
            }
        }
    }

    /// Find the first aligned window of `size_words` free words not excluded by
    /// `forbidden(grf)`, honoring `align` (§4.4 step 4d, "Alignment and banking").
    pub fn find_window(
        &self,
        size_words: u32,
        align: crate::ty::GrfAlign,
        forbidden: impl Fn(u32) -> bool,
    ) -> Option<(u32, u32)> {
        let rows_needed = size_words.div_ceil(WORDS_PER_GRF);
        let step = match align {
            crate::ty::GrfAlign::Even | crate::ty::GrfAlign::Even2Grf => 2,
            crate::ty::GrfAlign::Odd | crate::ty::GrfAlign::Odd2Grf => 1,
            crate::ty::GrfAlign::Any => 1,
        };
        let start_parity = matches!(align, crate::ty::GrfAlign::Odd | crate::ty::GrfAlign::Odd2Grf);

        let mut grf = if start_parity { 1 } else { 0 };
        while grf + rows_needed <= self.num_grfs {
            if (0..rows_needed).all(|r| !forbidden(grf + r)) {
                if size_words <= WORDS_PER_GRF {
                    // Sub-GRF declaration: search word offsets within one row.
                    if let Some(word) = self.find_sub_grf_slot(grf, size_words) {
                        return Some((grf, word));
                    }
                } else if (0..rows_needed)
                    .all(|r| self.busy_counters[(grf + r) as usize] == 0)
                {
                    return Some((grf, 0));
                }
            }
            grf += step;
        }
        None
    }

    fn find_sub_grf_slot(&self, grf: u32, size_words: u32) -> Option<u32> {
        let mut word = 0;
        while word + size_words <= WORDS_PER_GRF {
            if (0..size_words).all(|w| !self.busy[self.word_index(grf, word + w)]) {
                return Some(word);
            }
            word += 1;
        }
        None
    }

    pub fn take(&mut self, grf: u32, word: u32, size_words: u32) {
        for w in 0..size_words {
            let abs_word = word + w;
            let g = grf + abs_word / WORDS_PER_GRF;
            let idx = self.word_index(g, abs_word % WORDS_PER_GRF);
            debug_assert!(!self.busy[idx], "double-allocation of grf {} word {}", g, abs_word % WORDS_PER_GRF);
            self.busy[idx] = true;
            self.busy_counters[g as usize] += 1;
        }
    }

    pub fn free(&mut self, grf: u32, word: u32, size_words: u32) {
        for w in 0..size_words {
            let abs_word = word + w;
            let g = grf + abs_word / WORDS_PER_GRF;
            let idx = self.word_index(g, abs_word % WORDS_PER_GRF);
            if self.busy[idx] {
                self.busy[idx] = false;
                self.busy_counters[g as usize] -= 1;
            }
        }
    }

    pub fn is_busy(&self, grf: u32, word: u32) -> bool {
        self.busy[self.word_index(grf, word)]
    }
}
