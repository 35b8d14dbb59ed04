//! The vISA IR builder (§4.1), grounded on
//! `original_source/visa/BuildCISAIRImpl.cpp`.
//!
//! Supports both construction modes named in §4.1: a direct API (operand factories
//! then instruction constructors) and byte-code reconstruction ([`bytecode`]).

pub mod bytecode;
pub mod predefined;
pub mod stitch;

use crate::cfg::callgraph::FuncInfo;
use crate::diagnostics::{Diagnostics, FinalizeError};
use crate::entities::FuncId;
use crate::function::{Function, FunctionKind};
use crate::jit_metadata::JitMetadata;
use crate::options::CompileOptions;
use predefined::PredefinedTable;
use visa_entity::{PrimaryMap, SecondaryMap};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BuilderState {
    Building,
    Finalized,
    EmittingBinary,
}

/// Per-kernel compile result (§6 "Compile").
#[derive(Debug, Clone)]
pub struct CompileResult {
    pub metadata: JitMetadata,
    pub success: bool,
}

pub struct Builder {
    pub options: CompileOptions,
    pub funcs: PrimaryMap<FuncId, Function>,
    pub predefined: visa_entity::SecondaryMap<FuncId, PredefinedTable>,
    /// Populated by `finalize`, once every function's own (pre-stitch) entry/exit
    /// normalization and call-graph bookkeeping has run (§3, §4.2).
    pub func_infos: SecondaryMap<FuncId, Option<FuncInfo>>,
    kernels: Vec<FuncId>,
    functions: Vec<FuncId>,
    pub diagnostics: Diagnostics,
    state: BuilderState,
}

impl Builder {
    /// `CreateBuilder` (§6).
    pub fn new(options: CompileOptions) -> Self {
        Builder {
            options,
            funcs: PrimaryMap::new(),
            predefined: visa_entity::SecondaryMap::with_default(PredefinedTable::default()),
            func_infos: SecondaryMap::new(),
            kernels: Vec::new(),
            functions: Vec::new(),
            diagnostics: Diagnostics::default(),
            state: BuilderState::Building,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    /// `AddKernel(name)` (§6).
    pub fn add_kernel(&mut self, name: impl Into<String>) -> Result<FuncId, FinalizeError> {
        if self.state != BuilderState::Building {
            return Err(FinalizeError::AppendAfterFinalize {
                function: name.into(),
            });
        }
        let mut func = Function::new(name, FunctionKind::Kernel);
        let table = predefined::install(&mut func);
        let id = self.funcs.push(func);
        self.predefined[id] = table;
        self.kernels.push(id);
        Ok(id)
    }

    /// `AddFunction(name)` (§6).
    pub fn add_function(&mut self, name: impl Into<String>) -> Result<FuncId, FinalizeError> {
        if self.state != BuilderState::Building {
            return Err(FinalizeError::AppendAfterFinalize {
                function: name.into(),
            });
        }
        let mut func = Function::new(name, FunctionKind::Subroutine);
        let table = predefined::install(&mut func);
        let id = self.funcs.push(func);
        self.predefined[id] = table;
        self.functions.push(id);
        Ok(id)
    }

    /// Byte-code reconstruction mode (§4.1): read the common header, then decode
    /// every kernel and every function's local header and instruction stream into a
    /// fresh `Builder`, ready for `finalize`/`compile` the same as one built through
    /// the direct API.
    pub fn from_bytecode(options: CompileOptions, buf: &[u8]) -> Result<Builder, FinalizeError> {
        let (header, r) = bytecode::read_common_header(buf)?;
        let mut builder = Builder::new(options);

        for entry in &header.kernel_table {
            let name = format!("kernel{}", entry.name_index);
            let id = builder.add_kernel(name)?;
            let mut routine_r = bytecode::ByteReader::at(buf, entry.offset as usize, header.version);
            let routine_header =
                bytecode::read_routine_header(&mut routine_r, FunctionKind::Kernel)?;
            if !routine_header.name.is_empty() {
                builder.funcs[id].name = routine_header.name.clone();
            }
            bytecode::decode_routine(&mut builder.funcs[id], &routine_header, &mut routine_r)?;
        }

        for entry in &header.function_table {
            let name = format!("func{}", entry.name_index);
            let id = builder.add_function(name)?;
            let mut routine_r = bytecode::ByteReader::at(buf, entry.offset as usize, header.version);
            let routine_header =
                bytecode::read_routine_header(&mut routine_r, FunctionKind::Subroutine)?;
            if !routine_header.name.is_empty() {
                builder.funcs[id].name = routine_header.name.clone();
            }
            bytecode::decode_routine(&mut builder.funcs[id], &routine_header, &mut routine_r)?;
        }

        let _ = r;
        Ok(builder)
    }

    pub fn kernels(&self) -> &[FuncId] {
        &self.kernels
    }

    pub fn functions(&self) -> &[FuncId] {
        &self.functions
    }

    /// Forbid further appends and compute per-kernel/per-function attributes
    /// (§4.6 "Builder per compilation state").
    pub fn finalize(&mut self) -> Result<(), FinalizeError> {
        if self.state != BuilderState::Building {
            return Err(FinalizeError::ConcurrentCompile);
        }
        let ids: Vec<FuncId> = self.funcs.keys().collect();
        for id in ids {
            let func = &mut self.funcs[id];
            // Must run on the function's own pre-stitch stream: a stitched callee's
            // body keeps its own real return once spliced into a caller, and merging
            // that with the caller's trailing return would be wrong (§4.2).
            crate::cfg::normalize_subroutine(func);
            let cfg = crate::cfg::build(func);
            let info = crate::cfg::callgraph::build_func_info(id, func, &cfg);
            self.func_infos[id] = Some(info);
            func.finalized = true;
        }
        self.state = BuilderState::Finalized;
        Ok(())
    }

    /// `Compile(name, ...)` (§6): run the finalizer pipeline on one kernel, stitching
    /// in any non-extern callees first.
    pub fn compile(&mut self, kernel: FuncId) -> Result<CompileResult, FinalizeError> {
        if self.state == BuilderState::Building {
            self.finalize()?;
        }
        self.state = BuilderState::EmittingBinary;

        let stitch_plan = stitch::plan(self, kernel);
        let mut working = stitch::splice(self, kernel, &stitch_plan);

        let result = crate::pipeline::run(&mut working, &self.options, &mut self.diagnostics);

        // Restore pre-stitch form so the callee can be re-stitched into the next
        // caller (§4.1 "Kernel/function composition and stitching").
        stitch::unsplice(self, kernel, working);

        result
    }
}
