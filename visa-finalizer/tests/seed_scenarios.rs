//! End-to-end scenarios exercising the builder, CFG, liveness, allocator and spill
//! manager together, grounded on `original_source/visa/` test fixtures for each
//! mechanism named in the module docs (stitching, rematerialization, indirect spill).

use visa_finalizer::builder::{stitch, Builder};
use visa_finalizer::cfg;
use visa_finalizer::declaration::Declaration;
use visa_finalizer::entities::{DeclId, RegVarId};
use visa_finalizer::function::{Function, FunctionKind, LabelKind};
use visa_finalizer::instruction::{ControlFlowOp, Instruction, IntrinsicOp, MovOp, Opcode};
use visa_finalizer::liveness;
use visa_finalizer::operand::{DirectRegion, Operand, RegionDesc};
use visa_finalizer::options::CompileOptions;
use visa_finalizer::regalloc;
use visa_finalizer::regvar::{RegVarFlags, RegisterVariable};
use visa_finalizer::spill;
use visa_finalizer::ty::{RegFile, ScalarType};

fn push_decl(func: &mut Function, name: &str, num_elements: u32, file: RegFile) -> DeclId {
    let id = DeclId::from_u32(func.decls.len() as u32);
    func.decls
        .push(Declaration::new(id, name, ScalarType::Dword, num_elements, file))
}

fn push_rv(func: &mut Function, decl: DeclId) -> RegVarId {
    let id = RegVarId::from_u32(func.regvars.len() as u32);
    func.push_regvar(RegisterVariable::new(id, decl))
}

fn mov_imm(dst: RegVarId, bits: u64) -> Instruction {
    let mut inst = Instruction::new(Opcode::DataMovement(MovOp::Mov), 1);
    inst.dst = Some(Operand::Dst {
        region: DirectRegion {
            base: dst,
            row_offset: 0,
            sub_reg_offset: 0,
            elem_type: ScalarType::Dword,
        },
        hstride: 1,
    });
    inst.srcs.push(Operand::Immediate {
        bits,
        ty: ScalarType::Dword,
    });
    inst
}

fn add(dst: RegVarId, a: RegVarId, b: RegVarId) -> Instruction {
    use visa_finalizer::instruction::ArithOp;
    let mut inst = Instruction::new(Opcode::Arithmetic(ArithOp::Add), 1);
    let region = |base| DirectRegion {
        base,
        row_offset: 0,
        sub_reg_offset: 0,
        elem_type: ScalarType::Dword,
    };
    inst.dst = Some(Operand::Dst {
        region: region(dst),
        hstride: 1,
    });
    inst.srcs.push(Operand::Src {
        region: region(a),
        region_desc: RegionDesc::SCALAR,
    });
    inst.srcs.push(Operand::Src {
        region: region(b),
        region_desc: RegionDesc::SCALAR,
    });
    inst
}

/// Seed scenario 1 (one-kernel identity): a straight-line function with no
/// interference compiles without any spill, and every declaration gets a distinct
/// physical assignment.
#[test]
fn one_kernel_identity_compiles_without_spill() {
    let mut func = Function::new("identity", FunctionKind::Kernel);
    let a = push_decl(&mut func, "a", 1, RegFile::Grf);
    let a_rv = push_rv(&mut func, a);
    let b = push_decl(&mut func, "b", 1, RegFile::Grf);
    let b_rv = push_rv(&mut func, b);
    let c = push_decl(&mut func, "c", 1, RegFile::Grf);
    let c_rv = push_rv(&mut func, c);

    func.append_inst(mov_imm(a_rv, 1)).unwrap();
    func.append_inst(mov_imm(b_rv, 2)).unwrap();
    func.append_inst(add(c_rv, a_rv, b_rv)).unwrap();

    let options = CompileOptions::default();
    let mut diagnostics = visa_finalizer::diagnostics::Diagnostics::default();
    let result = visa_finalizer::pipeline::run(&mut func, &options, &mut diagnostics).unwrap();

    assert!(result.success);
    assert!(!result.metadata.is_spill);
    assert!(!diagnostics.has_errors());
    for rv in [a_rv, b_rv, c_rv] {
        assert!(func.regvars[rv].assignment.is_some());
    }
}

/// Seed scenario 2 (pre-assigned conflict): a declaration pre-assigned to a fixed GRF
/// keeps that exact location through allocation, and no other range is placed on top
/// of it.
#[test]
fn pre_assigned_declaration_keeps_its_grf() {
    let mut func = Function::new("preassigned", FunctionKind::Kernel);
    let fixed = push_decl(&mut func, "fixed", 1, RegFile::Grf);
    let fixed_rv = push_rv(&mut func, fixed);
    func.regvars[fixed_rv].flags |= RegVarFlags::PRE_ASSIGNED;
    func.regvars[fixed_rv].assignment = Some(visa_finalizer::regvar::PhysicalAssignment {
        grf: 3,
        sub_reg_word: 0,
    });

    let movable = push_decl(&mut func, "movable", 1, RegFile::Grf);
    let movable_rv = push_rv(&mut func, movable);

    func.append_inst(mov_imm(fixed_rv, 7)).unwrap();
    func.append_inst(mov_imm(movable_rv, 9)).unwrap();
    func.append_inst(add(movable_rv, movable_rv, fixed_rv)).unwrap();

    let mut options = CompileOptions::default();
    options.reserve_r0 = false;
    let mut diagnostics = visa_finalizer::diagnostics::Diagnostics::default();
    let result = visa_finalizer::pipeline::run(&mut func, &options, &mut diagnostics).unwrap();

    assert!(result.success);
    assert_eq!(
        func.regvars[fixed_rv].assignment,
        Some(visa_finalizer::regvar::PhysicalAssignment {
            grf: 3,
            sub_reg_word: 0
        })
    );
    assert_ne!(func.regvars[movable_rv].assignment.unwrap().grf, 3);
}

/// Seed scenario 2 (pre-assigned conflict): two declarations pinned to the same GRF
/// are rejected with `PreAssignedConflict` rather than one silently overwriting the
/// other's live range.
#[test]
fn two_declarations_pinned_to_the_same_grf_conflict() {
    let mut func = Function::new("preassigned_conflict", FunctionKind::Kernel);
    let first = push_decl(&mut func, "first", 1, RegFile::Grf);
    let first_rv = push_rv(&mut func, first);
    func.regvars[first_rv].flags |= RegVarFlags::PRE_ASSIGNED;
    func.regvars[first_rv].assignment = Some(visa_finalizer::regvar::PhysicalAssignment {
        grf: 3,
        sub_reg_word: 0,
    });

    let second = push_decl(&mut func, "second", 1, RegFile::Grf);
    let second_rv = push_rv(&mut func, second);
    func.regvars[second_rv].flags |= RegVarFlags::PRE_ASSIGNED;
    func.regvars[second_rv].assignment = Some(visa_finalizer::regvar::PhysicalAssignment {
        grf: 3,
        sub_reg_word: 0,
    });

    func.append_inst(mov_imm(first_rv, 7)).unwrap();
    func.append_inst(mov_imm(second_rv, 9)).unwrap();

    let mut options = CompileOptions::default();
    options.reserve_r0 = false;
    let mut diagnostics = visa_finalizer::diagnostics::Diagnostics::default();
    let result = visa_finalizer::pipeline::run(&mut func, &options, &mut diagnostics).unwrap();

    assert!(!result.success);
    assert!(diagnostics.has_errors());
    assert!(matches!(
        diagnostics.first_error(),
        Some(visa_finalizer::diagnostics::FinalizeError::PreAssignedConflict { .. })
    ));
}

/// Seed scenario 3 (forced spill): a GRF file too small to hold every simultaneously
/// live range forces the allocator to report spills instead of silently
/// overwriting a live value.
#[test]
fn insufficient_grfs_forces_a_spill() {
    let mut func = Function::new("tiny", FunctionKind::Kernel);
    let mut rvs = Vec::new();
    for i in 0..6 {
        let d = push_decl(&mut func, &format!("v{i}"), 8, RegFile::Grf);
        rvs.push(push_rv(&mut func, d));
    }
    for &rv in &rvs {
        func.append_inst(mov_imm(rv, 1)).unwrap();
    }
    // One instruction referencing every variable at once keeps them all live
    // simultaneously (extents overlap end-to-end).
    let mut keep_alive = Instruction::new(Opcode::Intrinsic(IntrinsicOp::Use), 1);
    for &rv in &rvs {
        keep_alive.srcs.push(Operand::Src {
            region: DirectRegion {
                base: rv,
                row_offset: 0,
                sub_reg_offset: 0,
                elem_type: ScalarType::Dword,
            },
            region_desc: RegionDesc::SCALAR,
        });
    }
    func.append_inst(keep_alive).unwrap();

    let ranges = regalloc::build_live_ranges(&func);
    let mut file = regalloc::PhysicalRegisterFile::new(2); // 2 GRFs can't hold six 1-row ranges
    let outcome = regalloc::allocate(&mut ranges.clone(), &[], &mut file);
    assert!(!outcome.spilled.is_empty());
}

/// Seed scenario 4 (scalar-immediate rematerialization): a spilled scalar defined
/// exactly once by a move from an immediate is rematerialized at each use instead of
/// going through scratch memory.
#[test]
fn scalar_immediate_is_rematerialized_instead_of_spilled_to_memory() {
    let mut func = Function::new("remat", FunctionKind::Kernel);
    let k = push_decl(&mut func, "k", 1, RegFile::Grf);
    let k_rv = push_rv(&mut func, k);
    let acc = push_decl(&mut func, "acc", 1, RegFile::Grf);
    let acc_rv = push_rv(&mut func, acc);

    func.append_inst(mov_imm(k_rv, 42)).unwrap();
    func.append_inst(mov_imm(acc_rv, 0)).unwrap();
    func.append_inst(add(acc_rv, acc_rv, k_rv)).unwrap();
    func.append_inst(add(acc_rv, acc_rv, k_rv)).unwrap();

    let cfg = cfg::build(&mut func);
    let liveness = liveness::compute(&func, &cfg);
    let report = spill::rewrite(&mut func, &[k], &CompileOptions::default(), &liveness);

    assert_eq!(report.rematerialized, vec![k]);
    assert_eq!(report.num_fill_sends, 0);
    assert_eq!(report.num_spill_sends, 0);

    // Every use of `k` now reads a per-use rematerialized temporary, not `k_rv`.
    let still_reads_k = func.insts.values().any(|inst| {
        inst.srcs
            .iter()
            .any(|s| s.base_var() == Some(k_rv))
    });
    assert!(!still_reads_k);
}

/// Seed scenario 5 (stack-call stitching): splicing a callee into a kernel rewrites
/// the pseudo call/return in the spliced copy but never mutates the builder's stored
/// kernel or callee.
#[test]
fn stitching_splices_callee_without_mutating_stored_functions() {
    let mut builder = Builder::new(CompileOptions::default());
    let kernel = builder.add_kernel("main").unwrap();
    let callee = builder.add_function("callee").unwrap();

    {
        let callee_func = &mut builder.funcs[callee];
        let d = push_decl(callee_func, "tmp", 1, RegFile::Grf);
        let rv = push_rv(callee_func, d);
        callee_func.append_inst(mov_imm(rv, 1)).unwrap();
        let mut ret = Instruction::new(Opcode::ControlFlow(ControlFlowOp::FuncReturn), 1);
        ret.exec_size = 1;
        callee_func.append_inst(ret).unwrap();
    }

    let call_label = builder.funcs[kernel].new_label("callee", LabelKind::FunctionCall);
    let mut call_inst = Instruction::new(Opcode::ControlFlow(ControlFlowOp::FuncCall), 1);
    call_inst.call_label = Some(call_label);
    let call_id = builder.funcs[kernel].append_inst(call_inst).unwrap();
    let mut tail = Instruction::new(Opcode::ControlFlow(ControlFlowOp::Return), 1);
    tail.exec_size = 1;
    builder.funcs[kernel].append_inst(tail).unwrap();

    let plan = stitch::plan(&builder, kernel);
    assert_eq!(plan.callees, vec![callee]);

    let spliced = stitch::splice(&builder, kernel, &plan);
    assert!(spliced.insts.len() > builder.funcs[kernel].insts.len());
    assert!(spliced
        .insts
        .values()
        .any(|i| matches!(i.opcode, Opcode::ControlFlow(ControlFlowOp::Return))
            && i.options.contains(visa_finalizer::instruction::InstOptions::STITCHED)));

    // The stored kernel is untouched: its call instruction is still the pseudo
    // FuncCall, not a real Call.
    assert!(matches!(
        builder.funcs[kernel].insts[call_id].opcode,
        Opcode::ControlFlow(ControlFlowOp::FuncCall)
    ));
}

/// Seed scenario 6 (indirect spill): bracketing an address-taken spilled declaration
/// inserts a fill (and, where the instruction may redefine it, a spill) around every
/// instruction whose points-to set includes it.
#[test]
fn indirect_spill_brackets_every_aliasing_instruction() {
    let mut func = Function::new("indirect", FunctionKind::Kernel);
    let addr_decl = push_decl(&mut func, "addr", 1, RegFile::Address);
    let addr_rv = push_rv(&mut func, addr_decl);
    let target = push_decl(&mut func, "target", 8, RegFile::Grf);

    let mut inst = Instruction::new(Opcode::DataMovement(MovOp::Mov), 1);
    inst.dst = Some(Operand::Indirect {
        addr_var: addr_rv,
        imm_byte_offset: 0,
        elem_type: ScalarType::Dword,
        region_desc: RegionDesc::SCALAR,
    });
    inst.srcs.push(Operand::Immediate {
        bits: 5,
        ty: ScalarType::Dword,
    });
    let inst_id = func.append_inst(inst).unwrap();

    let mut points_to = std::collections::HashMap::new();
    points_to.insert(inst_id, vec![target]);

    let before = func.stream.len();
    spill::rewrite_indirect(&mut func, target, &mut points_to, 0);
    assert!(func.stream.len() > before);
    assert!(func
        .insts
        .values()
        .any(|i| matches!(i.opcode, Opcode::Intrinsic(IntrinsicOp::Fill))));
    assert!(func
        .insts
        .values()
        .any(|i| matches!(i.opcode, Opcode::Intrinsic(IntrinsicOp::Spill))));
    assert!(points_to[&inst_id].is_empty());
}

#[test]
fn finalize_normalizes_a_two_return_subroutine_to_a_unique_exit() {
    let mut builder = Builder::new(CompileOptions::default());
    let callee = builder.add_function("branchy").unwrap();

    {
        let func = &mut builder.funcs[callee];
        let else_label = func.new_label("branchy.else", LabelKind::Block);

        let mut goto = Instruction::new(Opcode::ControlFlow(ControlFlowOp::Goto), 1);
        goto.call_label = Some(else_label);
        func.append_inst(goto).unwrap();

        let mut ret_then = Instruction::new(Opcode::ControlFlow(ControlFlowOp::FuncReturn), 1);
        ret_then.exec_size = 1;
        func.append_inst(ret_then).unwrap();

        let mut label = Instruction::new(Opcode::Label, 1);
        label.call_label = Some(else_label);
        func.append_inst(label).unwrap();

        let mut ret_else = Instruction::new(Opcode::ControlFlow(ControlFlowOp::FuncReturn), 1);
        ret_else.exec_size = 1;
        func.append_inst(ret_else).unwrap();
    }

    let returns_before = builder.funcs[callee]
        .stream
        .iter()
        .filter(|&&id| builder.funcs[callee].insts[id].is_return())
        .count();
    assert_eq!(returns_before, 2);

    builder.finalize().unwrap();

    let returns_after = builder.funcs[callee]
        .stream
        .iter()
        .filter(|&&id| builder.funcs[callee].insts[id].is_return())
        .count();
    assert_eq!(returns_after, 1, "both returns should funnel into one exit");

    let info = builder.func_infos[callee]
        .as_ref()
        .expect("finalize must populate FuncInfo for every function");
    let func = &builder.funcs[callee];
    let cfg = cfg::build(&mut func.clone());
    assert!(cfg.blocks[info.exit_block].flags.contains(cfg::block::BlockFlags::EXIT));
}
