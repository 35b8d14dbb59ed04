//! Predefined register variables, materialized before user declarations so that
//! byte-code references to them survive across versions (§4.1).

use crate::declaration::Declaration;
use crate::entities::{DeclId, RegVarId};
use crate::function::Function;
use crate::regvar::{RegVarFlags, RegisterVariable};
use crate::ty::{RegFile, ScalarType};

/// A stable enumeration addressing predefined variables, independent of platform
/// (§4.1 "Predefined register variables").
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PredefinedVar {
    /// `r0`: the per-thread header GRF.
    R0,
    Null,
    /// Implicit argument register for stack calls.
    Arg,
    /// Implicit return-value register for stack calls.
    Ret,
    FramePointer,
    StackPointer,
}

impl PredefinedVar {
    pub const ALL: [PredefinedVar; 6] = [
        PredefinedVar::R0,
        PredefinedVar::Null,
        PredefinedVar::Arg,
        PredefinedVar::Ret,
        PredefinedVar::FramePointer,
        PredefinedVar::StackPointer,
    ];

    fn name(self) -> &'static str {
        match self {
            PredefinedVar::R0 => "r0",
            PredefinedVar::Null => "null",
            PredefinedVar::Arg => "arg",
            PredefinedVar::Ret => "ret",
            PredefinedVar::FramePointer => "fp",
            PredefinedVar::StackPointer => "sp",
        }
    }

    /// Predefined variables that carry a fixed physical location before allocation
    /// even begins (r0 always lives at GRF 0; fp/sp are ABI-fixed for stack calls).
    fn fixed_grf(self) -> Option<u32> {
        match self {
            PredefinedVar::R0 => Some(0),
            PredefinedVar::FramePointer => Some(125),
            PredefinedVar::StackPointer => Some(126),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PredefinedTable {
    entries: Vec<(PredefinedVar, DeclId, RegVarId)>,
}

impl PredefinedTable {
    pub fn get(&self, v: PredefinedVar) -> Option<(DeclId, RegVarId)> {
        self.entries
            .iter()
            .find(|(p, ..)| *p == v)
            .map(|(_, d, r)| (*d, *r))
    }
}

/// Install the fixed set of predefined surfaces, samplers and general variables into
/// `func`, ahead of any user declaration.
pub fn install(func: &mut Function) -> PredefinedTable {
    let mut table = PredefinedTable::default();
    for &pv in &PredefinedVar::ALL {
        let decl_id = DeclId::from_u32(func.decls.len() as u32);
        let decl = Declaration::new(decl_id, pv.name(), ScalarType::UDword, 8, RegFile::Grf);
        let decl_id = func.decls.push(decl);

        let rv_id = RegVarId::from_u32(func.regvars.len() as u32);
        let mut rv = RegisterVariable::new(rv_id, decl_id);
        if let Some(grf) = pv.fixed_grf() {
            rv.assignment = Some(crate::regvar::PhysicalAssignment {
                grf,
                sub_reg_word: 0,
            });
            rv.flags |= RegVarFlags::PRE_ASSIGNED;
        }
        let rv_id = func.regvars.push(rv);

        table.entries.push((pv, decl_id, rv_id));
    }
    table
}
