//! Declarations and their alias tree (§3 "Declaration").

use crate::entities::DeclId;
use crate::ty::{GrfAlign, RegFile, ScalarType};

/// Named storage for `num_elements` elements of `elem_type` (§3).
#[derive(Debug, Clone)]
pub struct Declaration {
    pub id: DeclId,
    pub name: String,
    pub elem_type: ScalarType,
    pub num_elements: u32,
    pub file: RegFile,
    /// Row count, in multiples of one GRF width.
    pub num_rows: u32,
    /// Word count, used for sub-GRF declarations that don't occupy a whole row.
    pub num_words: u32,
    pub align: GrfAlign,
    pub sub_align_words: u32,
    /// `(parent, byte_offset)` if this declaration aliases another. Aliasing forms a
    /// tree whose root is the backing storage.
    pub alias: Option<(DeclId, u32)>,
}

impl Declaration {
    pub fn new(
        id: DeclId,
        name: impl Into<String>,
        elem_type: ScalarType,
        num_elements: u32,
        file: RegFile,
    ) -> Self {
        let total_bytes = elem_type.size_bytes() * num_elements;
        let grf_bytes = crate::ty::GRF_WIDTH_BYTES;
        let num_rows = total_bytes.div_ceil(grf_bytes);
        let num_words = total_bytes.div_ceil(2);
        Declaration {
            id,
            name: name.into(),
            elem_type,
            num_elements,
            file,
            num_rows: num_rows.max(1),
            num_words,
            align: GrfAlign::default(),
            sub_align_words: 1,
            alias: None,
        }
    }

    pub fn size_bytes(&self) -> u32 {
        self.elem_type.size_bytes() * self.num_elements
    }

    /// Resolve the root of this declaration's alias tree and the cumulative byte
    /// offset from that root to `self`.
    pub fn resolve_root(
        &self,
        decls: &visa_entity::PrimaryMap<DeclId, Declaration>,
    ) -> (DeclId, u32) {
        let mut cur = self.id;
        let mut offset = 0u32;
        loop {
            let d = &decls[cur];
            match d.alias {
                Some((parent, off)) => {
                    offset += off;
                    cur = parent;
                }
                None => return (cur, offset),
            }
        }
    }
}
