//! Byte-code reconstruction: the second construction mode named in §4.1, grounded on
//! `original_source/visa/ByteCodeReaderNG.cpp`.
//!
//! Implements the common header, per-routine header and the version-gated field
//! widths of §6. Opcode decoding dispatches on a one-byte family tag per instruction,
//! matching the "table of function handles keyed by opcode family" design note.

use crate::declaration::Declaration;
use crate::diagnostics::FinalizeError;
use crate::entities::{DeclId, LabelId, RegVarId};
use crate::function::{AttributeValue, FunctionKind, LabelKind};
use crate::instruction::{
    ArithOp, ControlFlowOp, InstOptions, Instruction, IntrinsicOp, LogicOp, MovOp, Opcode, SyncOp,
};
use crate::operand::{DirectRegion, Operand, Predicate, PredicateControl, RegionDesc};
use crate::regvar::RegisterVariable;
use crate::ty::{RegFile, ScalarType};

pub const MAGIC: u32 = 0x4153_4956; // "VISA" little-endian

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    pub fn at_least(self, major: u16, minor: u16) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

/// A little-endian cursor over a byte-code buffer, with the version-gated width
/// helpers named in §4.1 ("a small set of generic 'read little-endian' helpers
/// parameterized by the version-gated width").
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    pub version: Version,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader {
            buf,
            pos: 0,
            version: Version { major: 0, minor: 0 },
        }
    }

    /// A reader positioned at `pos` in `buf`, inheriting an already-parsed version.
    /// Used to jump to a routine-table entry's offset once the common header has been
    /// read (§6).
    pub fn at(buf: &'a [u8], pos: usize, version: Version) -> Self {
        ByteReader { buf, pos, version }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FinalizeError> {
        if self.pos + n > self.buf.len() {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: 0xFF,
                offset: self.pos,
            });
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn u8(&mut self) -> Result<u8, FinalizeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FinalizeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, FinalizeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, FinalizeError> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }

    pub fn i16(&mut self) -> Result<i16, FinalizeError> {
        Ok(self.u16()? as i16)
    }

    /// A NUL-terminated string, per the per-routine string pool format.
    pub fn c_string(&mut self) -> Result<String, FinalizeError> {
        let start = self.pos;
        while self.pos < self.buf.len() && self.buf[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.buf.len() {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: 0xFE,
                offset: start,
            });
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
        self.pos += 1; // skip the NUL
        Ok(s)
    }

    /// Declaration/label/address/predicate ids: 16-bit pre-(3,4), 32-bit from (3,4)
    /// (§4.1, §6).
    pub fn id(&mut self) -> Result<u32, FinalizeError> {
        if self.version.at_least(3, 4) {
            self.u32()
        } else {
            Ok(self.u16()? as u32)
        }
    }

    /// Input count: 8-bit pre-(3,5), 32-bit from (3,5) (§6).
    pub fn input_count(&mut self) -> Result<u32, FinalizeError> {
        if self.version.at_least(3, 5) {
            self.u32()
        } else {
            Ok(self.u8()? as u32)
        }
    }

    /// File-name index: 16-bit pre-(3,4), unchanged after (§6 notes only the
    /// pre-(3,4) width; later versions keep the widened `id()` width).
    pub fn file_name_index(&mut self) -> Result<u32, FinalizeError> {
        if self.version.at_least(3, 4) {
            self.u32()
        } else {
            Ok(self.u16()? as u32)
        }
    }
}

/// Execute-mask encoding has two schemes selected by (3,0) vs (3,1)+ (§4.1, §6). The
/// table maps a raw 3-bit field to `(exec_size, no_mask)`.
pub fn decode_exec_mask(raw: u8, version: Version) -> (u8, bool) {
    const TABLE_V3_0: [(u8, bool); 8] = [
        (1, false),
        (2, false),
        (4, false),
        (8, false),
        (16, false),
        (32, false),
        (1, true),
        (16, true),
    ];
    const TABLE_V3_1_PLUS: [(u8, bool); 8] = [
        (1, false),
        (2, false),
        (4, false),
        (8, false),
        (16, false),
        (32, false),
        (8, true),
        (16, true),
    ];
    let table = if version == (Version { major: 3, minor: 0 }) {
        TABLE_V3_0
    } else {
        TABLE_V3_1_PLUS
    };
    table[(raw & 0x7) as usize]
}

#[derive(Debug, Clone)]
pub struct RoutineTableEntry {
    pub name_index: u32,
    pub offset: u32,
    pub size: u32,
}

#[derive(Debug, Clone)]
pub struct CommonHeader {
    pub version: Version,
    pub kernel_table: Vec<RoutineTableEntry>,
    pub function_table: Vec<RoutineTableEntry>,
}

/// Parse the top-level layout: magic, (major, minor), kernel count, function count,
/// and the kernel/function tables (§6).
pub fn read_common_header(buf: &[u8]) -> Result<(CommonHeader, ByteReader<'_>), FinalizeError> {
    let mut r = ByteReader::new(buf);
    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(FinalizeError::VersionMismatch {
            major: 0,
            minor: 0,
            max_major: 3,
            max_minor: 7,
        });
    }
    let major = r.u16()?;
    let minor = r.u16()?;
    let version = Version { major, minor };
    if version > (Version { major: 3, minor: 7 }) {
        return Err(FinalizeError::VersionMismatch {
            major,
            minor,
            max_major: 3,
            max_minor: 7,
        });
    }
    r.version = version;

    let kernel_count = r.u32()?;
    let function_count = r.u32()?;

    let mut kernel_table = Vec::with_capacity(kernel_count as usize);
    for _ in 0..kernel_count {
        kernel_table.push(RoutineTableEntry {
            name_index: r.id()?,
            offset: r.u32()?,
            size: r.u32()?,
        });
    }
    let mut function_table = Vec::with_capacity(function_count as usize);
    for _ in 0..function_count {
        function_table.push(RoutineTableEntry {
            name_index: r.id()?,
            offset: r.u32()?,
            size: r.u32()?,
        });
    }

    Ok((
        CommonHeader {
            version,
            kernel_table,
            function_table,
        },
        r,
    ))
}

/// A general-variable table entry: element type, element count and, for an alias,
/// the local index of the entry it aliases plus a byte offset (§4.1 "alias tree",
/// §9 "Declarations and aliasing").
#[derive(Debug, Clone)]
pub struct GeneralVarEntry {
    pub ty: ScalarType,
    pub num_elements: u32,
    pub alias: Option<(u32, u32)>,
}

/// An address or predicate variable table entry: just an element count (§6).
#[derive(Debug, Clone, Copy)]
pub struct SimpleVarEntry {
    pub num_elements: u32,
}

/// A sampler or surface table entry: a name-pool index (§6).
#[derive(Debug, Clone, Copy)]
pub struct NamedEntry {
    pub name_index: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct LabelEntry {
    pub name_index: u32,
    pub kind: crate::function::LabelKind,
}

/// One input-argument binding, read back as a declaration index into the combined
/// predefined-then-user general-variable space (§4.1 "input-argument binding").
#[derive(Debug, Clone)]
pub struct InputEntry {
    pub decl_index: u32,
    pub byte_offset: u32,
    pub byte_size: u32,
    pub implicit_name_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AttributeEntry {
    pub name_index: u32,
    pub value: crate::function::AttributeValue,
}

/// Per-routine header: string pool, name index, then the sequential tables named in
/// §6 (general/address/predicate variables, labels, samplers, surfaces, inputs,
/// attributes).
#[derive(Debug, Clone)]
pub struct RoutineHeader {
    pub strings: Vec<String>,
    pub name: String,
    pub general_vars: Vec<GeneralVarEntry>,
    pub address_vars: Vec<SimpleVarEntry>,
    pub predicate_vars: Vec<SimpleVarEntry>,
    pub labels: Vec<LabelEntry>,
    pub samplers: Vec<NamedEntry>,
    pub surfaces: Vec<NamedEntry>,
    pub inputs: Vec<InputEntry>,
    pub body_size: u32,
    pub entry_offset: u32,
    /// Function-only (§6 "input/return sizes (functions only)"); zero for kernels.
    pub input_size: u32,
    pub return_size: u32,
    pub attributes: Vec<AttributeEntry>,
}

/// Decode a 4-bit type tag into a [`ScalarType`], matching the `bit_properties & 0xF`
/// extraction `original_source/visa/ByteCodeReaderNG.cpp` performs against
/// `ISA_TYPE_*`; the concrete numeric constants live in a header outside the
/// retrieved pack, so the tag values here are assigned in `ScalarType`'s own
/// declaration order rather than copied from `Common_ISA.h`.
fn decode_type(tag: u8) -> Result<ScalarType, FinalizeError> {
    Ok(match tag {
        0 => ScalarType::UByte,
        1 => ScalarType::Byte,
        2 => ScalarType::UWord,
        3 => ScalarType::Word,
        4 => ScalarType::UDword,
        5 => ScalarType::Dword,
        6 => ScalarType::UQword,
        7 => ScalarType::Qword,
        8 => ScalarType::HalfFloat,
        9 => ScalarType::Float,
        10 => ScalarType::Double,
        _ => {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: tag,
                offset: 0,
            })
        }
    })
}

fn decode_label_kind(tag: u8) -> Result<LabelKind, FinalizeError> {
    Ok(match tag {
        0 => LabelKind::Block,
        1 => LabelKind::Subroutine,
        2 => LabelKind::FunctionCall,
        _ => {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: tag,
                offset: 0,
            })
        }
    })
}

fn read_general_var(r: &mut ByteReader) -> Result<GeneralVarEntry, FinalizeError> {
    let ty = decode_type(r.u8()?)?;
    let num_elements = r.u32()?;
    let has_alias = r.u8()? != 0;
    let alias = if has_alias {
        Some((r.id()?, r.u32()?))
    } else {
        None
    };
    Ok(GeneralVarEntry {
        ty,
        num_elements,
        alias,
    })
}

fn read_simple_var(r: &mut ByteReader) -> Result<SimpleVarEntry, FinalizeError> {
    Ok(SimpleVarEntry {
        num_elements: r.u32()?,
    })
}

fn read_named_entry(r: &mut ByteReader) -> Result<NamedEntry, FinalizeError> {
    Ok(NamedEntry {
        name_index: r.id()?,
    })
}

fn read_label_entry(r: &mut ByteReader) -> Result<LabelEntry, FinalizeError> {
    let name_index = r.id()?;
    let kind = decode_label_kind(r.u8()?)?;
    Ok(LabelEntry { name_index, kind })
}

fn read_input_entry(r: &mut ByteReader) -> Result<InputEntry, FinalizeError> {
    let decl_index = r.id()?;
    let byte_offset = r.u32()?;
    let byte_size = r.u32()?;
    let has_implicit = r.u8()? != 0;
    let implicit_name_index = if has_implicit { Some(r.id()?) } else { None };
    Ok(InputEntry {
        decl_index,
        byte_offset,
        byte_size,
        implicit_name_index,
    })
}

fn read_attribute_entry(r: &mut ByteReader, strings: &[String]) -> Result<AttributeEntry, FinalizeError> {
    let name_index = r.id()?;
    let tag = r.u8()?;
    let value = match tag {
        0 => AttributeValue::Bool(r.u8()? != 0),
        1 => AttributeValue::Int32(r.u32()? as i32),
        2 => {
            let idx = r.id()?;
            AttributeValue::Str(strings.get(idx as usize).cloned().unwrap_or_default())
        }
        _ => {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: tag,
                offset: r.offset(),
            })
        }
    };
    Ok(AttributeEntry { name_index, value })
}

/// Read one routine's local header. `kind` selects the function-only fields (input
/// and return size) that only appear for non-kernel routines (§6).
pub fn read_routine_header(
    r: &mut ByteReader,
    kind: FunctionKind,
) -> Result<RoutineHeader, FinalizeError> {
    let string_count = r.u32()?;
    let mut strings = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        strings.push(r.c_string()?);
    }
    let name_index = r.id()?;
    let name = strings
        .get(name_index as usize)
        .cloned()
        .unwrap_or_default();

    let num_general_vars = r.id()?;
    let num_address_vars = r.id()?;
    let num_predicate_vars = r.id()?;
    let num_labels = r.id()?;
    let num_samplers = r.id()?;

    // "preceded by an unused vme-count byte whose value must be zero" (§6).
    let vme_count = r.u8()?;
    if vme_count != 0 {
        return Err(FinalizeError::OperandClassOutOfRange {
            class: vme_count,
            offset: r.offset(),
        });
    }
    let num_surfaces = r.id()?;

    let mut general_vars = Vec::with_capacity(num_general_vars as usize);
    for _ in 0..num_general_vars {
        general_vars.push(read_general_var(r)?);
    }
    let mut address_vars = Vec::with_capacity(num_address_vars as usize);
    for _ in 0..num_address_vars {
        address_vars.push(read_simple_var(r)?);
    }
    let mut predicate_vars = Vec::with_capacity(num_predicate_vars as usize);
    for _ in 0..num_predicate_vars {
        predicate_vars.push(read_simple_var(r)?);
    }
    let mut labels = Vec::with_capacity(num_labels as usize);
    for _ in 0..num_labels {
        labels.push(read_label_entry(r)?);
    }
    let mut samplers = Vec::with_capacity(num_samplers as usize);
    for _ in 0..num_samplers {
        samplers.push(read_named_entry(r)?);
    }
    let mut surfaces = Vec::with_capacity(num_surfaces as usize);
    for _ in 0..num_surfaces {
        surfaces.push(read_named_entry(r)?);
    }

    let mut inputs = Vec::new();
    if kind == FunctionKind::Kernel {
        let input_count = r.input_count()?;
        for _ in 0..input_count {
            inputs.push(read_input_entry(r)?);
        }
    }

    let body_size = r.u32()?;
    let entry_offset = r.u32()?;

    let (input_size, return_size) = if kind == FunctionKind::Subroutine {
        (r.u32()?, r.u32()?)
    } else {
        (0, 0)
    };

    let attribute_count = r.u32()?;
    let mut attributes = Vec::with_capacity(attribute_count as usize);
    for _ in 0..attribute_count {
        attributes.push(read_attribute_entry(r, &strings)?);
    }

    Ok(RoutineHeader {
        strings,
        name,
        general_vars,
        address_vars,
        predicate_vars,
        labels,
        samplers,
        surfaces,
        inputs,
        body_size,
        entry_offset,
        input_size,
        return_size,
        attributes,
    })
}

/// Maps a byte-code-local variable/label index to the entity id it was materialized
/// as in the destination [`Function`], so instruction decoding can resolve operands
/// without threading the whole builder through every reader call.
#[derive(Debug, Default)]
struct IdMaps {
    general: Vec<RegVarId>,
    general_decl: Vec<DeclId>,
    address: Vec<RegVarId>,
    predicate: Vec<RegVarId>,
    surfaces: Vec<DeclId>,
    samplers: Vec<DeclId>,
    labels: Vec<LabelId>,
}

impl IdMaps {
    fn general(&self, idx: u32) -> Result<RegVarId, FinalizeError> {
        self.general
            .get(idx as usize)
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
    fn general_decl(&self, idx: u32) -> Result<DeclId, FinalizeError> {
        self.general_decl
            .get(idx as usize)
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
    fn address(&self, idx: u32) -> Result<RegVarId, FinalizeError> {
        self.address
            .get(idx as usize)
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
    fn predicate(&self, idx: u32) -> Result<RegVarId, FinalizeError> {
        self.predicate
            .get(idx as usize)
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
    fn state_handle(&self, idx: u32) -> Result<DeclId, FinalizeError> {
        self.surfaces
            .get(idx as usize)
            .or_else(|| self.samplers.get(idx as usize))
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
    fn label(&self, idx: u32) -> Result<LabelId, FinalizeError> {
        self.labels
            .get(idx as usize)
            .copied()
            .ok_or(FinalizeError::UndefinedVariable { id: idx, offset: 0 })
    }
}

fn decode_region_desc(r: &mut ByteReader) -> Result<RegionDesc, FinalizeError> {
    Ok(RegionDesc {
        vstride: r.u16()?,
        width: r.u16()?,
        hstride: r.u16()?,
    })
}

fn decode_direct_region(r: &mut ByteReader, maps: &IdMaps) -> Result<DirectRegion, FinalizeError> {
    let base = maps.general(r.id()?)?;
    let row_offset = r.u16()?;
    let sub_reg_offset = r.u16()?;
    let elem_type = decode_type(r.u8()?)?;
    Ok(DirectRegion {
        base,
        row_offset,
        sub_reg_offset,
        elem_type,
    })
}

fn decode_predicate_control(tag: u8) -> Result<PredicateControl, FinalizeError> {
    Ok(match tag {
        0 => PredicateControl::None,
        1 => PredicateControl::Normal,
        2 => PredicateControl::AnyH,
        3 => PredicateControl::AllH,
        _ => {
            return Err(FinalizeError::OperandClassOutOfRange {
                class: tag,
                offset: 0,
            })
        }
    })
}

fn decode_predicate(r: &mut ByteReader, maps: &IdMaps) -> Result<Predicate, FinalizeError> {
    let var = maps.predicate(r.id()?)?;
    let control = decode_predicate_control(r.u8()?)?;
    let inverse = r.u8()? != 0;
    Ok(Predicate {
        var,
        control,
        inverse,
    })
}

/// Decode one operand by its one-byte class tag, dispatching the same way
/// `readOtherOperandNG` switches on `CISA_OPERAND_CLASS` (§4.1, §9 operand variants).
fn decode_operand(r: &mut ByteReader, maps: &IdMaps) -> Result<Operand, FinalizeError> {
    let class = r.u8()?;
    Ok(match class {
        0 => Operand::Dst {
            region: decode_direct_region(r, maps)?,
            hstride: r.u16()?,
        },
        1 => Operand::Src {
            region: decode_direct_region(r, maps)?,
            region_desc: decode_region_desc(r)?,
        },
        2 => Operand::Indirect {
            addr_var: maps.address(r.id()?)?,
            imm_byte_offset: r.i16()?,
            elem_type: decode_type(r.u8()?)?,
            region_desc: decode_region_desc(r)?,
        },
        3 => Operand::Immediate {
            bits: r.u64()?,
            ty: decode_type(r.u8()?)?,
        },
        4 => Operand::Label(maps.label(r.id()?)?),
        5 => Operand::Predicate(decode_predicate(r, maps)?),
        6 => Operand::Raw {
            base: maps.general(r.id()?)?,
            num_rows: r.u16()?,
        },
        7 => Operand::AddrExpr {
            decl: maps.general_decl(r.id()?)?,
            byte_offset: r.u32()?,
        },
        8 => Operand::StateHandle {
            decl: maps.state_handle(r.id()?)?,
            index: r.u32()?,
        },
        _ => {
            return Err(FinalizeError::OperandClassOutOfRange {
                class,
                offset: r.offset(),
            })
        }
    })
}

fn decode_arith_op(tag: u8) -> Result<ArithOp, FinalizeError> {
    Ok(match tag {
        0 => ArithOp::Add,
        1 => ArithOp::Sub,
        2 => ArithOp::Mul,
        3 => ArithOp::MulHigh,
        4 => ArithOp::Div,
        5 => ArithOp::Mod,
        6 => ArithOp::MinMax,
        7 => ArithOp::Madd,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

fn decode_logic_op(tag: u8) -> Result<LogicOp, FinalizeError> {
    Ok(match tag {
        0 => LogicOp::And,
        1 => LogicOp::Or,
        2 => LogicOp::Xor,
        3 => LogicOp::Not,
        4 => LogicOp::Shl,
        5 => LogicOp::Shr,
        6 => LogicOp::Asr,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

fn decode_mov_op(tag: u8) -> Result<MovOp, FinalizeError> {
    Ok(match tag {
        0 => MovOp::Mov,
        1 => MovOp::Sel,
        2 => MovOp::Cmov,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

fn decode_cf_op(tag: u8) -> Result<ControlFlowOp, FinalizeError> {
    Ok(match tag {
        0 => ControlFlowOp::Jump,
        1 => ControlFlowOp::Goto,
        2 => ControlFlowOp::Call,
        3 => ControlFlowOp::Return,
        4 => ControlFlowOp::SwitchJump,
        5 => ControlFlowOp::FuncCall,
        6 => ControlFlowOp::FuncReturn,
        7 => ControlFlowOp::SymbolMaterialize,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

fn decode_sync_op(tag: u8) -> Result<SyncOp, FinalizeError> {
    Ok(match tag {
        0 => SyncOp::Fence,
        1 => SyncOp::Wait,
        2 => SyncOp::Barrier,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

fn decode_intrinsic_op(tag: u8) -> Result<IntrinsicOp, FinalizeError> {
    Ok(match tag {
        0 => IntrinsicOp::PseudoKill,
        1 => IntrinsicOp::Spill,
        2 => IntrinsicOp::Fill,
        3 => IntrinsicOp::Use,
        _ => return Err(FinalizeError::UnknownOpcode { opcode: tag, offset: 0 }),
    })
}

/// Decode one instruction: a one-byte opcode-family tag, a family-specific sub-op
/// byte, then the common predicate/destination/source/label fields every family
/// shares (§4.1 "one append-instruction entry point per opcode family", mirroring
/// `readInstructionNG`'s dispatch table in
/// `original_source/visa/ByteCodeReaderNG.cpp`).
fn decode_instruction(r: &mut ByteReader, maps: &IdMaps) -> Result<Instruction, FinalizeError> {
    let family = r.u8()?;
    let opcode = match family {
        0x01 => Opcode::Arithmetic(decode_arith_op(r.u8()?)?),
        0x02 => Opcode::Logical(decode_logic_op(r.u8()?)?),
        0x03 => Opcode::DataMovement(decode_mov_op(r.u8()?)?),
        0x04 => {
            r.u8()?; // unused sub-op byte, kept for family-header symmetry
            Opcode::Compare
        }
        0x05 => {
            r.u8()?;
            Opcode::AddrAdd
        }
        0x06 => Opcode::Send {
            split: r.u8()? != 0,
        },
        0x07 => Opcode::ControlFlow(decode_cf_op(r.u8()?)?),
        0x08 => Opcode::Sync(decode_sync_op(r.u8()?)?),
        0x09 => {
            r.u8()?;
            Opcode::Label
        }
        0x0A => Opcode::LifetimeMarker {
            start: r.u8()? != 0,
        },
        0x0B => Opcode::Intrinsic(decode_intrinsic_op(r.u8()?)?),
        other => {
            return Err(FinalizeError::UnknownOpcode {
                opcode: other,
                offset: r.offset(),
            })
        }
    };

    let exec_raw = r.u8()?;
    let (exec_size, no_mask) = decode_exec_mask(exec_raw, r.version);
    let mut inst = Instruction::new(opcode, exec_size);
    if no_mask {
        inst.options |= InstOptions::NO_MASK;
    }
    inst.options |= InstOptions::from_bits_truncate(r.u16()?);
    inst.eot_flag = r.u8()? != 0;

    if r.u8()? != 0 {
        inst.predicate = Some(decode_predicate(r, maps)?);
    }
    if r.u8()? != 0 {
        inst.dst = Some(decode_operand(r, maps)?);
    }
    let src_count = r.u8()?;
    for _ in 0..src_count {
        inst.srcs.push(decode_operand(r, maps)?);
    }

    if matches!(opcode, Opcode::ControlFlow(_) | Opcode::Label) && r.u8()? != 0 {
        inst.call_label = Some(maps.label(r.id()?)?);
    }

    Ok(inst)
}

/// Materialize one routine's declarations, register variables and labels into `func`
/// (ahead of its already-installed predefined table), then decode its instruction
/// stream. Declaration/variable byte-code indices address the combined
/// predefined-then-user space, per §4.1 "Predefined register variables".
pub fn decode_routine(
    func: &mut crate::function::Function,
    header: &RoutineHeader,
    r: &mut ByteReader,
) -> Result<(), FinalizeError> {
    let mut maps = IdMaps::default();
    for (decl_id, rv_id) in predefined_entries() {
        maps.general.push(rv_id);
        maps.general_decl.push(decl_id);
    }

    for entry in &header.general_vars {
        let decl_id = if let Some((parent, byte_offset)) = entry.alias {
            let parent_decl = maps.general_decl(parent)?;
            let mut decl = Declaration::new(
                DeclId::from_u32(func.decls.len() as u32),
                format!("V{}", func.decls.len()),
                entry.ty,
                entry.num_elements,
                RegFile::Grf,
            );
            decl.alias = Some((parent_decl, byte_offset));
            func.decls.push(decl)
        } else {
            func.decls.push(Declaration::new(
                DeclId::from_u32(func.decls.len() as u32),
                format!("V{}", func.decls.len()),
                entry.ty,
                entry.num_elements,
                RegFile::Grf,
            ))
        };
        let rv_id = func.push_regvar(RegisterVariable::new(
            RegVarId::from_u32(func.regvars.len() as u32),
            decl_id,
        ));
        maps.general.push(rv_id);
        maps.general_decl.push(decl_id);
    }

    for entry in &header.address_vars {
        let decl_id = func.decls.push(Declaration::new(
            DeclId::from_u32(func.decls.len() as u32),
            format!("A{}", maps.address.len()),
            ScalarType::UWord,
            entry.num_elements,
            RegFile::Address,
        ));
        let rv_id = func.push_regvar(RegisterVariable::new(
            RegVarId::from_u32(func.regvars.len() as u32),
            decl_id,
        ));
        maps.address.push(rv_id);
    }

    for entry in &header.predicate_vars {
        let decl_id = func.decls.push(Declaration::new(
            DeclId::from_u32(func.decls.len() as u32),
            format!("P{}", maps.predicate.len()),
            ScalarType::UWord,
            entry.num_elements,
            RegFile::Flag,
        ));
        let rv_id = func.push_regvar(RegisterVariable::new(
            RegVarId::from_u32(func.regvars.len() as u32),
            decl_id,
        ));
        maps.predicate.push(rv_id);
    }

    for entry in &header.samplers {
        let name = header
            .strings
            .get(entry.name_index as usize)
            .cloned()
            .unwrap_or_default();
        let decl_id = func.decls.push(Declaration::new(
            DeclId::from_u32(func.decls.len() as u32),
            name,
            ScalarType::UDword,
            1,
            RegFile::State,
        ));
        maps.samplers.push(decl_id);
    }
    for entry in &header.surfaces {
        let name = header
            .strings
            .get(entry.name_index as usize)
            .cloned()
            .unwrap_or_default();
        let decl_id = func.decls.push(Declaration::new(
            DeclId::from_u32(func.decls.len() as u32),
            name,
            ScalarType::UDword,
            1,
            RegFile::State,
        ));
        maps.surfaces.push(decl_id);
    }

    for entry in &header.labels {
        let name = header
            .strings
            .get(entry.name_index as usize)
            .cloned()
            .unwrap_or_default();
        maps.labels.push(func.new_label(name, entry.kind));
    }

    for entry in &header.inputs {
        let decl = maps.general_decl(entry.decl_index)?;
        func.inputs.push(crate::function::InputBinding {
            decl,
            byte_offset: entry.byte_offset,
            byte_size: entry.byte_size,
            implicit_kind: entry.implicit_name_index.map(|i| {
                header
                    .strings
                    .get(i as usize)
                    .cloned()
                    .unwrap_or_default()
            }),
        });
    }

    for entry in &header.attributes {
        let name = header
            .strings
            .get(entry.name_index as usize)
            .cloned()
            .unwrap_or_default();
        func.attributes.push(crate::function::KernelAttribute {
            name,
            value: entry.value.clone(),
        });
    }

    let body_start = r.offset();
    while (r.offset() - body_start) < header.body_size as usize {
        let inst = decode_instruction(r, &maps)?;
        func.append_inst(inst);
    }

    Ok(())
}

fn predefined_entries() -> Vec<(DeclId, RegVarId)> {
    // The predefined table is installed before any byte-code var, always at
    // declaration/regvar indices `0..PredefinedVar::ALL.len()` (§4.1).
    (0..super::predefined::PredefinedVar::ALL.len())
        .map(|i| (DeclId::from_u32(i as u32), RegVarId::from_u32(i as u32)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_common_header(major: u16, minor: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&major.to_le_bytes());
        buf.extend_from_slice(&minor.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // kernel_count
        buf.extend_from_slice(&0u32.to_le_bytes()); // function_count
        buf
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = encode_common_header(3, 6);
        buf[0] ^= 0xFF;
        assert!(read_common_header(&buf).is_err());
    }

    #[test]
    fn parses_empty_module_header() {
        let buf = encode_common_header(3, 6);
        let (header, _r) = read_common_header(&buf).unwrap();
        assert_eq!(header.version, Version { major: 3, minor: 6 });
        assert!(header.kernel_table.is_empty());
    }

    #[test]
    fn id_width_switches_at_3_4() {
        let mut r = ByteReader::new(&[0x34, 0x12, 0x00, 0x00]);
        r.version = Version { major: 3, minor: 3 };
        assert_eq!(r.id().unwrap(), 0x1234);

        let mut r = ByteReader::new(&[0x78, 0x56, 0x34, 0x12]);
        r.version = Version { major: 3, minor: 4 };
        assert_eq!(r.id().unwrap(), 0x1234_5678);
    }

    #[test]
    fn exec_mask_table_differs_at_3_0() {
        let v30 = Version { major: 3, minor: 0 };
        let v31 = Version { major: 3, minor: 1 };
        assert_eq!(decode_exec_mask(6, v30), (1, true));
        assert_eq!(decode_exec_mask(6, v31), (8, true));
    }

    use crate::builder::Builder;

    fn u32le(v: u32) -> [u8; 4] {
        v.to_le_bytes()
    }

    /// One `mov var0, 42` then `ret`, in the instruction-stream encoding
    /// `decode_instruction` reads.
    fn encode_mov_then_return() -> Vec<u8> {
        let mut body = Vec::new();
        // mov
        body.push(0x03); // DataMovement
        body.push(0); // Mov
        body.push(3); // exec_raw -> 8, unmasked (v3.1+ table)
        body.extend_from_slice(&0u16.to_le_bytes()); // options
        body.push(0); // eot_flag
        body.push(0); // has_predicate
        body.push(1); // has_dst
        body.push(0); // Dst operand class
        body.extend_from_slice(&u32le(6)); // base var id (first user general var)
        body.extend_from_slice(&0u16.to_le_bytes()); // row_offset
        body.extend_from_slice(&0u16.to_le_bytes()); // sub_reg_offset
        body.push(5); // elem_type: Dword
        body.extend_from_slice(&1u16.to_le_bytes()); // dst hstride
        body.push(1); // src_count
        body.push(3); // Immediate operand class
        body.extend_from_slice(&42u64.to_le_bytes());
        body.push(5); // ty: Dword

        // ret
        body.push(0x07); // ControlFlow
        body.push(3); // Return
        body.push(0); // exec_raw -> 1
        body.extend_from_slice(&0u16.to_le_bytes());
        body.push(0); // eot_flag
        body.push(0); // has_predicate
        body.push(0); // has_dst
        body.push(0); // src_count
        body.push(0); // has_call_label

        body
    }

    fn encode_kernel_routine(instructions: &[u8]) -> Vec<u8> {
        let mut r = Vec::new();
        r.extend_from_slice(&u32le(1)); // string_count
        r.extend_from_slice(b"k\0");
        r.extend_from_slice(&u32le(0)); // name_index
        r.extend_from_slice(&u32le(1)); // num_general_vars
        r.extend_from_slice(&u32le(0)); // num_address_vars
        r.extend_from_slice(&u32le(0)); // num_predicate_vars
        r.extend_from_slice(&u32le(0)); // num_labels
        r.extend_from_slice(&u32le(0)); // num_samplers
        r.push(0); // vme_count
        r.extend_from_slice(&u32le(0)); // num_surfaces

        // general_vars[0]
        r.push(5); // ty: Dword
        r.extend_from_slice(&u32le(1)); // num_elements
        r.push(0); // has_alias

        r.extend_from_slice(&u32le(0)); // input_count (kernel)
        r.extend_from_slice(&u32le(instructions.len() as u32)); // body_size
        r.extend_from_slice(&u32le(0)); // entry_offset
        r.extend_from_slice(&u32le(0)); // attribute_count

        r.extend_from_slice(instructions);
        r
    }

    fn encode_module_with_one_kernel() -> Vec<u8> {
        let instructions = encode_mov_then_return();
        let routine = encode_kernel_routine(&instructions);

        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf.extend_from_slice(&u32le(1)); // kernel_count
        buf.extend_from_slice(&u32le(0)); // function_count
        let routine_offset = buf.len() as u32 + 12; // past this one kernel-table entry
        buf.extend_from_slice(&u32le(0)); // name_index
        buf.extend_from_slice(&u32le(routine_offset));
        buf.extend_from_slice(&u32le(routine.len() as u32));
        buf.extend_from_slice(&routine);
        buf
    }

    #[test]
    fn decodes_a_one_kernel_module_end_to_end() {
        let buf = encode_module_with_one_kernel();
        let options = crate::options::CompileOptions::default();
        let builder = Builder::from_bytecode(options, &buf).unwrap();

        assert_eq!(builder.kernels().len(), 1);
        let kernel = builder.kernels()[0];
        let func = &builder.funcs[kernel];
        assert_eq!(func.name, "k");
        // 6 predefined vars + 1 user var.
        assert_eq!(func.decls.len(), 7);

        let mov = func
            .insts
            .values()
            .find(|i| matches!(i.opcode, Opcode::DataMovement(MovOp::Mov)))
            .expect("mov decoded");
        assert_eq!(mov.exec_size, 8);
        assert!(matches!(
            mov.srcs[0],
            Operand::Immediate { bits: 42, ty: ScalarType::Dword }
        ));

        assert!(func.insts.values().any(|i| i.is_return()));
    }

    #[test]
    fn decoded_kernel_compiles_through_the_full_pipeline() {
        let buf = encode_module_with_one_kernel();
        let options = crate::options::CompileOptions::default();
        let mut builder = Builder::from_bytecode(options, &buf).unwrap();
        let kernel = builder.kernels()[0];

        let result = builder.compile(kernel).unwrap();
        assert!(result.success);
        assert!(!builder.diagnostics.has_errors());
    }

    #[test]
    fn rejects_unknown_opcode_family() {
        let body = vec![0xEE]; // not a recognized family
        let routine = encode_kernel_routine(&body);
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&3u16.to_le_bytes());
        buf.extend_from_slice(&6u16.to_le_bytes());
        buf.extend_from_slice(&u32le(1));
        buf.extend_from_slice(&u32le(0));
        let routine_offset = buf.len() as u32 + 12;
        buf.extend_from_slice(&u32le(0));
        buf.extend_from_slice(&u32le(routine_offset));
        buf.extend_from_slice(&u32le(routine.len() as u32));
        buf.extend_from_slice(&routine);

        let options = crate::options::CompileOptions::default();
        assert!(Builder::from_bytecode(options, &buf).is_err());
    }
}
