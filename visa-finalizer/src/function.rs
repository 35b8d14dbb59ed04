//! `Function`: one kernel or subroutine's IR (declarations, register variables,
//! instructions and labels), grounded on `cranelift-codegen/src/ir/function.rs`.

use crate::cfg::ControlFlowGraph;
use crate::declaration::Declaration;
use crate::entities::{BlockId, DeclId, InstId, LabelId, RegVarId};
use crate::instruction::Instruction;
use crate::regvar::RegisterVariable;
use visa_entity::PrimaryMap;

/// Why a label was created (§4.1 "label creation").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LabelKind {
    Block,
    Subroutine,
    FunctionCall,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub id: LabelId,
    pub name: String,
    pub kind: LabelKind,
    /// The block this label marks the entry of, once layout is known.
    pub target_block: Option<BlockId>,
}

/// An attribute attached to a kernel or function (§4.1, §6). The payload is one of
/// three shapes selected by a name table, per `original_source/visa/BuildCISAIRImpl.cpp`.
#[derive(Debug, Clone)]
pub enum AttributeValue {
    Bool(bool),
    Int32(i32),
    Str(String),
}

#[derive(Debug, Clone)]
pub struct KernelAttribute {
    pub name: String,
    pub value: AttributeValue,
}

/// An input-argument binding (§4.1 "input-argument binding").
#[derive(Debug, Clone)]
pub struct InputBinding {
    pub decl: DeclId,
    pub byte_offset: u32,
    pub byte_size: u32,
    pub implicit_kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Kernel,
    Subroutine,
}

/// One kernel or subroutine's IR. Owns its declarations, register variables,
/// instructions, labels and (once built) its control-flow graph.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub decls: PrimaryMap<DeclId, Declaration>,
    pub regvars: PrimaryMap<RegVarId, RegisterVariable>,
    pub insts: PrimaryMap<InstId, Instruction>,
    pub labels: PrimaryMap<LabelId, Label>,
    /// Instruction ids grouped into basic blocks, in layout order. Populated by
    /// [`crate::cfg::build`].
    pub blocks: PrimaryMap<BlockId, Vec<InstId>>,
    pub inputs: Vec<InputBinding>,
    pub attributes: Vec<KernelAttribute>,
    pub cfg: Option<ControlFlowGraph>,
    /// `true` once [`Builder::finalize`](crate::builder::Builder::finalize) has run;
    /// forbids further appends (§4.6 "Builder per compilation state").
    pub finalized: bool,
    next_lexical_id: u32,
    /// The linear instruction stream as appended, before block splitting. `cfg::build`
    /// consumes this to construct `blocks`.
    pub stream: Vec<InstId>,
}

impl Function {
    pub fn new(name: impl Into<String>, kind: FunctionKind) -> Self {
        Function {
            name: name.into(),
            kind,
            decls: PrimaryMap::new(),
            regvars: PrimaryMap::new(),
            insts: PrimaryMap::new(),
            labels: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            inputs: Vec::new(),
            attributes: Vec::new(),
            cfg: None,
            finalized: false,
            next_lexical_id: 0,
            stream: Vec::new(),
        }
    }

    /// Append an instruction to the end of the linear stream, assigning it the next
    /// lexical id. Returns `None` if the function has already been finalized
    /// (§4.6, §7 "Builder misuse").
    pub fn append_inst(&mut self, mut inst: Instruction) -> Option<InstId> {
        if self.finalized {
            return None;
        }
        inst.lexical_id = self.next_lexical_id;
        self.next_lexical_id += 1;
        let id = self.insts.push(inst);
        self.stream.push(id);
        Some(id)
    }

    pub fn new_label(&mut self, name: impl Into<String>, kind: LabelKind) -> LabelId {
        self.labels.push(Label {
            id: LabelId::from_u32(self.labels.len() as u32),
            name: name.into(),
            kind,
            target_block: None,
        })
    }

    pub fn declaration_count(&self) -> usize {
        self.decls.len()
    }

    /// Position of `inst` in the linear stream, used by the spill manager to splice
    /// in new fill/spill instructions (§4.5).
    pub fn stream_position(&self, inst: InstId) -> Option<usize> {
        self.stream.iter().position(|&i| i == inst)
    }

    /// Insert a freshly allocated instruction at stream position `pos`. Does not
    /// assign a final lexical id; call [`Function::renumber_lexical_ids`] after a
    /// batch of edits.
    pub fn insert_at(&mut self, pos: usize, inst: Instruction) -> InstId {
        let id = self.insts.push(inst);
        self.stream.insert(pos, id);
        id
    }

    pub fn push_regvar(&mut self, rv: crate::regvar::RegisterVariable) -> RegVarId {
        self.regvars.push(rv)
    }

    /// Renumber every instruction's `lexical_id` to match its current stream
    /// position. Must be called after the spill manager rewrites the stream, since
    /// the allocator and liveness both key off lexical id order (§4.3, §4.4).
    pub fn renumber_lexical_ids(&mut self) {
        for (i, &inst_id) in self.stream.iter().enumerate() {
            self.insts[inst_id].lexical_id = i as u32;
        }
        self.next_lexical_id = self.stream.len() as u32;
    }
}
