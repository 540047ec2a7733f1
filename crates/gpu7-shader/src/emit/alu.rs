//! ALU clause emission.
//!
//! Instructions of one group execute in parallel on the hardware but are emitted one after
//! another. Two pieces of state bridge that gap:
//!
//! * PV/PS aliases: what each unit produced in the previous group, either a GPR channel or one
//!   of the `PV`/`PS` temporaries.
//! * Backups: GPR channels read by an instruction after an earlier instruction of the same group
//!   already overwrote them. Their pre-group value is copied into `backupReg{n}` up front.

use gpu7_isa::{AluCfKind, AluSrc, Op2, Op3};

use super::Emitter;
use crate::analyze::{DataType, UniformMode, UniformSource};
use crate::decode::{
    AluClause, AluInstruction, AluOp, AluOperand, CfInstruction, CfKind, DecodedProgram, KCacheBank, UNIT_TRANS,
};

/// Number of backup temporaries declared even when no group needs them.
pub(crate) const MIN_BACKUP_REGISTERS: usize = 5;

const FLT_MAX: &str = "3.40282347E+38F";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alias {
    None,
    Gpr { gpr: u32, chan: u8 },
    /// Value lives in the `PV`/`PS` temporary of the previous group.
    Temp { unit: u8 },
}

/// Per clause tracking state.
struct ClauseState {
    kind: AluCfKind,
    kcache: [KCacheBank; 2],
    depth: i64,
    pvps: [Alias; 5],
    backups: Vec<(u32, u8)>,
}

impl ClauseState {
    fn backup_index(&self, gpr: u32, chan: u8) -> Option<usize> {
        self.backups.iter().position(|&entry| entry == (gpr, chan))
    }
}

/// PV/PS aliases produced by `group`.
fn track_pvps(group: &[AluInstruction]) -> [Alias; 5] {
    let mut pvps = [Alias::None; 5];
    for inst in group.iter().filter(|inst| !inst.op.is_nop()) {
        let slot = &mut pvps[usize::from(inst.unit.min(UNIT_TRANS))];
        if !inst.write_mask {
            *slot = Alias::Temp { unit: inst.unit };
        } else if !inst.dst_rel {
            *slot = Alias::Gpr {
                gpr: inst.dst_gpr,
                chan: inst.dst_elem,
            };
        }
    }
    pvps
}

/// GPR channel read by `operand`, looking through PV/PS aliases.
fn gpr_read(operand: &AluOperand, pvps: &[Alias; 5]) -> Option<(u32, u8)> {
    let alias = match operand.sel {
        AluSrc::Gpr(gpr) if !operand.rel => return Some((gpr, operand.chan)),
        AluSrc::PreviousVector => pvps[usize::from(operand.chan & 3)],
        AluSrc::PreviousScalar => pvps[usize::from(UNIT_TRANS)],
        _ => return None,
    };
    match alias {
        Alias::Gpr { gpr, chan } => Some((gpr, chan)),
        _ => None,
    }
}

/// GPR channels that need a pre-group copy, in order of first hazard.
fn group_backups(group: &[AluInstruction], pvps: &[Alias; 5]) -> Vec<(u32, u8)> {
    let mut written: Vec<(u32, u8)> = Vec::new();
    let mut backups = Vec::new();
    for inst in group.iter().filter(|inst| !inst.op.is_nop()) {
        for operand in inst.operands() {
            if let Some(read) = gpr_read(operand, pvps) {
                if written.contains(&read) && !backups.contains(&read) {
                    backups.push(read);
                }
            }
        }
        if inst.write_mask && !inst.dst_rel {
            written.push((inst.dst_gpr, inst.dst_elem));
        }
    }
    backups
}

/// Largest number of backup temporaries any group of the program needs.
pub(crate) fn max_backup_count(program: &DecodedProgram) -> usize {
    let mut max = 0;
    for cf in program.all_cf() {
        let CfKind::Alu { clause, .. } = &cf.kind else {
            continue;
        };
        let mut pvps = [Alias::None; 5];
        for group in clause.groups() {
            max = max.max(group_backups(group, &pvps).len());
            pvps = track_pvps(group);
        }
    }
    max
}

/// Emits the body of an ALU clause. Gating on the active mask is done by the caller.
pub(super) fn emit_alu_clause(e: &mut Emitter<'_>, cf: &CfInstruction, kind: AluCfKind, clause: &AluClause) {
    let mut state = ClauseState {
        kind,
        kcache: clause.kcache,
        depth: i64::from(cf.active_stack_depth),
        pvps: [Alias::None; 5],
        backups: Vec::new(),
    };
    let mut previous: Option<&[AluInstruction]> = None;
    for group in clause.groups() {
        if let Some(first) = group.first() {
            e.w.line(&format!("// {}", first.group_index));
        }
        if let Some(previous) = previous {
            state.pvps = track_pvps(previous);
        }
        state.backups = group_backups(group, &state.pvps);
        for (index, &(gpr, chan)) in state.backups.iter().enumerate() {
            let line = format!(
                "backupReg{index}{} = {}.{};",
                e.ty().suffix(),
                e.reg(gpr),
                gpu7_isa::channel_name(chan.into())
            );
            e.w.line(&line);
        }
        emit_group(e, &state, group);
        previous = Some(group);
    }
}

fn emit_group(e: &mut Emitter<'_>, state: &ClauseState, group: &[AluInstruction]) {
    let mut i = 0;
    while i < group.len() {
        let inst = &group[i];
        if inst.op.is_nop() {
            i += 1;
            continue;
        }
        if inst.op.is_reduction() {
            let Some(slots) = group.get(i..i + 4) else {
                e.unsupported(Some(inst.word_index), "reduction with fewer than four slots");
                return;
            };
            let consistent = slots
                .iter()
                .all(|slot| slot.op == inst.op && slot.omod == inst.omod && slot.clamp == inst.clamp);
            if !consistent {
                e.assumption(
                    Some(inst.word_index),
                    "reduction slots disagree on opcode, output modifier or clamp",
                );
            }
            emit_reduction(e, state, slots);
            emit_output_modifiers(e, inst);
            broadcast_reduction(e, slots);
            i += 4;
            continue;
        }
        match inst.op {
            AluOp::Op2(op) => emit_op2(e, state, inst, op),
            AluOp::Op3(op) => emit_op3(e, state, inst, op),
        }
        emit_output_modifiers(e, inst);
        i += 1;
    }
}

/// Name of the PV/PS temporary `unit` writes in `group_index`.
fn pvps_name(e: &Emitter<'_>, group_index: u32, unit: u8) -> String {
    let suffix = e.ty().suffix();
    if unit >= UNIT_TRANS {
        format!("PS{}{suffix}", group_index & 1)
    } else {
        format!("PV{}{suffix}.{}", group_index & 1, gpu7_isa::channel_name(unit.into()))
    }
}

/// Destination of `inst`: a GPR channel, a PV/PS temporary, or `temp` for masked reduction slots.
fn output_name(e: &Emitter<'_>, inst: &AluInstruction) -> String {
    if !inst.write_mask {
        if inst.op.is_reduction() {
            return format!("temp{}.{}", e.ty().suffix(), gpu7_isa::channel_name(inst.unit.into()));
        }
        return pvps_name(e, inst.group_index, inst.unit);
    }
    let reg = if inst.dst_rel {
        e.reg_rel(inst.dst_gpr, inst.index_mode)
    } else {
        e.reg(inst.dst_gpr)
    };
    format!("{reg}.{}", gpu7_isa::channel_name(inst.dst_elem.into()))
}

/// `dst = expr;` converting from `from` to the register type.
fn assign(e: &mut Emitter<'_>, inst: &AluInstruction, expr: &str, from: DataType) {
    let value = e.cast(expr, from, e.ty(), 1);
    let line = format!("{} = {value};", output_name(e, inst));
    e.w.line(&line);
}

fn is_constant(operand: &AluOperand) -> bool {
    matches!(
        operand.sel,
        AluSrc::Literal
            | AluSrc::ConstFloat0
            | AluSrc::ConstFloat1
            | AluSrc::ConstInt1
            | AluSrc::ConstIntMinus1
            | AluSrc::ConstFloatHalf
    )
}

/// Reads source operand `index` of `inst` as `required`.
fn read(e: &mut Emitter<'_>, state: &ClauseState, inst: &AluInstruction, index: usize, required: DataType) -> String {
    let operand = inst.src[index];
    if required != DataType::Float && operand.has_modifiers() {
        let value = read(e, state, inst, index, DataType::Float);
        return e.cast(&value, DataType::Float, required, 1);
    }
    let mut value = read_source(e, state, inst, &operand, required);
    if operand.abs {
        value = format!("abs({value})");
    }
    if operand.neg {
        value = format!("-({value})");
    }
    value
}

fn read_source(
    e: &mut Emitter<'_>,
    state: &ClauseState,
    inst: &AluInstruction,
    operand: &AluOperand,
    required: DataType,
) -> String {
    let ty = e.ty();
    let chan = gpu7_isa::channel_name(operand.chan.into());
    match operand.sel {
        AluSrc::Gpr(gpr) if operand.rel => {
            if inst.index_mode > 3 {
                e.assumption(Some(inst.word_index), "loop relative register index");
            }
            let ar = super::address_register(inst.index_mode);
            let value = if e.analysis().use_array_gprs {
                format!("{}.{chan}", e.reg_rel(gpr, inst.index_mode))
            } else {
                let zero = if ty == DataType::Float { "0.0" } else { "0" };
                let mut chain = String::from("(");
                for candidate in e.analysis().used_gprs().filter(|&candidate| candidate >= gpr) {
                    chain.push_str(&format!("({ar}=={})?{}.{chan}:", candidate - gpr, e.reg(candidate)));
                }
                chain.push_str(zero);
                chain.push(')');
                chain
            };
            e.cast(&value, ty, required, 1)
        }
        AluSrc::Gpr(gpr) => {
            let value = match state.backup_index(gpr, operand.chan) {
                Some(backup) => format!("backupReg{backup}{}", ty.suffix()),
                None => format!("{}.{chan}", e.reg(gpr)),
            };
            e.cast(&value, ty, required, 1)
        }
        AluSrc::ConstFloat0 => match required {
            DataType::Float => "0.0".to_string(),
            _ => "0".to_string(),
        },
        AluSrc::ConstFloat1 => e.cast("1.0", DataType::Float, required, 1),
        AluSrc::ConstFloatHalf => e.cast("0.5", DataType::Float, required, 1),
        AluSrc::ConstInt1 => match required {
            DataType::UnsignedInt => "uint(1)".to_string(),
            _ => e.cast("int(1)", DataType::SignedInt, required, 1),
        },
        AluSrc::ConstIntMinus1 => e.cast("int(-1)", DataType::SignedInt, required, 1),
        AluSrc::Literal => {
            let bits = inst.literal[usize::from(operand.chan & 3)];
            match required {
                DataType::SignedInt => e.syntax.int_literal(bits),
                DataType::UnsignedInt => e.syntax.uint_literal(bits),
                DataType::Float => {
                    let exponent = ((bits >> 23) & 0xFF) as i32 - 127;
                    if bits & 0xFF == 0 && (-10..=10).contains(&exponent) {
                        e.float_const(f32::from_bits(bits))
                    } else {
                        e.syntax.float_from_bits(bits)
                    }
                }
            }
        }
        AluSrc::KCache0(index) => read_uniform(e, inst, operand, required, Some(state.kcache[0]), index),
        AluSrc::KCache1(index) => read_uniform(e, inst, operand, required, Some(state.kcache[1]), index),
        AluSrc::CFile(index) => read_uniform(e, inst, operand, required, None, index),
        AluSrc::PreviousVector | AluSrc::PreviousScalar => {
            let unit = if operand.sel == AluSrc::PreviousScalar {
                UNIT_TRANS
            } else {
                operand.chan & 3
            };
            let value = match state.pvps[usize::from(unit)] {
                Alias::Gpr { gpr, chan } => match state.backup_index(gpr, chan) {
                    Some(backup) => format!("backupReg{backup}{}", ty.suffix()),
                    None => format!("{}.{}", e.reg(gpr), gpu7_isa::channel_name(chan.into())),
                },
                Alias::Temp { unit } => pvps_name(e, inst.group_index.wrapping_sub(1), unit),
                Alias::None => {
                    e.assumption(Some(inst.word_index), "read of PV/PS that the previous group did not write");
                    return e.cast(if ty == DataType::Float { "0.0" } else { "0" }, ty, required, 1);
                }
            };
            e.cast(&value, ty, required, 1)
        }
        AluSrc::Unknown(sel) => {
            e.unsupported(Some(inst.word_index), format!("ALU source selector {sel}"));
            "0".to_string()
        }
    }
}

fn read_uniform(
    e: &mut Emitter<'_>,
    inst: &AluInstruction,
    operand: &AluOperand,
    required: DataType,
    bank: Option<KCacheBank>,
    index: u32,
) -> String {
    let stage = e.stage();
    let chan = gpu7_isa::channel_name(operand.chan.into());
    let offset = index + bank.map_or(0, |bank| bank.base);
    let slot = if operand.rel {
        format!("{}+{offset}", super::address_register(inst.index_mode))
    } else {
        offset.to_string()
    };
    let source = match bank {
        Some(bank) => UniformSource::Buffer(bank.bank & 15),
        None => UniformSource::Register,
    };
    match (e.analysis().uniform_mode, source) {
        (UniformMode::Remapped, _) if !operand.rel => match e.analysis().remapped_index(source, offset) {
            Some(mapped) => {
                let value = format!("{}.{chan}", e.syntax.remapped_uniform(stage, &mapped.to_string()));
                e.cast(&value, DataType::SignedInt, required, 1)
            }
            None => {
                e.unsupported(Some(inst.word_index), format!("uniform {offset} has no remapped slot"));
                "0".to_string()
            }
        },
        (UniformMode::FullCFile, UniformSource::Register) => {
            let value = format!("{}.{chan}", e.syntax.register_uniform(stage, &slot));
            e.cast(&value, DataType::SignedInt, required, 1)
        }
        (UniformMode::FullCBank, UniformSource::Buffer(buffer)) => {
            let value = format!("{}.{chan}", e.syntax.buffer_uniform(stage, buffer, &slot));
            e.cast(&value, DataType::Float, required, 1)
        }
        (mode, source) => {
            e.unsupported(
                Some(inst.word_index),
                format!("uniform access {source:?} in mode {mode:?}"),
            );
            "0".to_string()
        }
    }
}

fn compare_op(op: Op2) -> &'static str {
    use Op2::*;
    match op {
        SetE | SetEDx10 | SetEInt | PredSetE | PredSetEInt | KillE | KillEInt => "==",
        SetGt | SetGtDx10 | SetGtInt | SetGtUint | PredSetGt | PredSetGtInt | KillGt | KillGtInt => ">",
        SetGe | SetGeDx10 | SetGeInt | SetGeUint | PredSetGe | PredSetGeInt | KillGe | KillGeInt => ">=",
        _ => "!=",
    }
}

fn emit_op2(e: &mut Emitter<'_>, state: &ClauseState, inst: &AluInstruction, op: Op2) {
    use DataType::{Float, SignedInt, UnsignedInt};
    let ty = e.ty();
    match op {
        Op2::Mov => {
            if inst.src[0].has_modifiers() {
                let value = read(e, state, inst, 0, Float);
                assign(e, inst, &value, Float);
            } else {
                let value = read(e, state, inst, 0, ty);
                assign(e, inst, &value, ty);
            }
        }
        Op2::MovaFloor => {
            let value = read(e, state, inst, 0, Float);
            e.w.line(&format!("tempResultf = {value};"));
            e.w.line("tempResultf = floor(tempResultf);");
            e.w.line("tempResultf = clamp(tempResultf, -256.0, 255.0);");
            e.w.line(&format!("ARi.{} = int(tempResultf);", gpu7_isa::channel_name(inst.dst_elem.into())));
            assign(e, inst, "tempResultf", Float);
        }
        Op2::MovaInt => {
            let value = read(e, state, inst, 0, SignedInt);
            e.w.line(&format!("tempResulti = {value};"));
            e.w.line("tempResulti = clamp(tempResulti, -256, 255);");
            e.w.line(&format!("ARi.{} = tempResulti;", gpu7_isa::channel_name(inst.dst_elem.into())));
            assign(e, inst, "tempResulti", SignedInt);
        }
        Op2::Add | Op2::MulIeee => {
            let symbol = if op == Op2::Add { "+" } else { "*" };
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            assign(e, inst, &format!("{a} {symbol} {b}"), Float);
        }
        Op2::Mul => {
            if inst.src[0].sel == AluSrc::ConstFloat0 || inst.src[1].sel == AluSrc::ConstFloat0 {
                assign(e, inst, "0.0", Float);
                return;
            }
            let plain = is_constant(&inst.src[0]) || is_constant(&inst.src[1]);
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            let expr = if e.input.options.strict_mul && !plain {
                format!("mul_nonIEEE({a}, {b})")
            } else {
                format!("{a} * {b}")
            };
            assign(e, inst, &expr, Float);
        }
        Op2::RecipIeee => {
            let a = read(e, state, inst, 0, Float);
            assign(e, inst, &format!("1.0 / {a}"), Float);
        }
        // Signed zero substitution for infinite RECIP_FF/RECIPSQRT_FF results is unverified on
        // hardware.
        Op2::RecipFf => {
            let a = read(e, state, inst, 0, Float);
            e.w.line(&format!("tempResultf = 1.0 / ({a});"));
            emit_infinity_fixup(e, "-0.0", "0.0");
            assign(e, inst, "tempResultf", Float);
        }
        Op2::RecipsqrtIeee | Op2::RecipsqrtClamped | Op2::RecipsqrtFf => {
            let a = read(e, state, inst, 0, Float);
            e.w.line(&format!("tempResultf = 1.0 / sqrt({a});"));
            match op {
                Op2::RecipsqrtClamped => emit_infinity_fixup(e, &format!("-{FLT_MAX}"), FLT_MAX),
                Op2::RecipsqrtFf => emit_infinity_fixup(e, "-0.0", "0.0"),
                _ => {}
            }
            assign(e, inst, "tempResultf", Float);
        }
        Op2::Max | Op2::Min | Op2::MaxDx10 | Op2::MinDx10 => {
            let function = if matches!(op, Op2::Max | Op2::MaxDx10) { "max" } else { "min" };
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            assign(e, inst, &format!("{function}({a}, {b})"), Float);
        }
        Op2::Floor | Op2::Fract | Op2::Trunc | Op2::Ceil | Op2::ExpIeee | Op2::SqrtIeee | Op2::Rndne => {
            let function = match op {
                Op2::Floor => "floor",
                Op2::Fract => "fract",
                Op2::Trunc => "trunc",
                Op2::Ceil => "ceil",
                Op2::ExpIeee => "exp2",
                Op2::SqrtIeee => "sqrt",
                _ => e.syntax.round_even(),
            };
            let a = read(e, state, inst, 0, Float);
            assign(e, inst, &format!("{function}({a})"), Float);
        }
        Op2::LogClamped | Op2::LogIeee => {
            let a = read(e, state, inst, 0, Float);
            e.w.line(&format!("tempResultf = max(0.0, {a});"));
            e.w.line("tempResultf = log2(tempResultf);");
            if op == Op2::LogClamped {
                e.w.line(&format!("if( isinf(tempResultf) == true ) tempResultf = -{FLT_MAX};"));
            }
            assign(e, inst, "tempResultf", Float);
        }
        Op2::Sin | Op2::Cos => {
            let function = if op == Op2::Sin { "sin" } else { "cos" };
            let a = read(e, state, inst, 0, Float);
            assign(e, inst, &format!("{function}(({a})/0.1591549367)"), Float);
        }
        Op2::FltToInt => {
            let a = read(e, state, inst, 0, Float);
            assign(e, inst, &format!("int({a})"), SignedInt);
        }
        Op2::FltToUint => {
            let a = read(e, state, inst, 0, Float);
            assign(e, inst, &format!("uint({a})"), UnsignedInt);
        }
        Op2::IntToFloat => {
            let a = read(e, state, inst, 0, SignedInt);
            assign(e, inst, &format!("float({a})"), Float);
        }
        Op2::UintToFloat => {
            let a = read(e, state, inst, 0, UnsignedInt);
            assign(e, inst, &format!("float({a})"), Float);
        }
        Op2::AndInt
        | Op2::OrInt
        | Op2::XorInt
        | Op2::AddInt
        | Op2::SubInt
        | Op2::MulloInt
        | Op2::LshlInt
        | Op2::LshrInt
        | Op2::AshrInt => {
            let symbol = match op {
                Op2::AndInt => "&",
                Op2::OrInt => "|",
                Op2::XorInt => "^",
                Op2::AddInt => "+",
                Op2::SubInt => "-",
                Op2::MulloInt => "*",
                Op2::LshlInt => "<<",
                _ => ">>",
            };
            let a = read(e, state, inst, 0, SignedInt);
            let b = read(e, state, inst, 1, SignedInt);
            assign(e, inst, &format!("{a} {symbol} {b}"), SignedInt);
        }
        Op2::MulloUint => {
            let a = read(e, state, inst, 0, UnsignedInt);
            let b = read(e, state, inst, 1, UnsignedInt);
            assign(e, inst, &format!("{a} * {b}"), UnsignedInt);
        }
        Op2::NotInt => {
            let a = read(e, state, inst, 0, SignedInt);
            assign(e, inst, &format!("~({a})"), SignedInt);
        }
        Op2::MaxInt | Op2::MinInt | Op2::MaxUint | Op2::MinUint => {
            let function = if matches!(op, Op2::MaxInt | Op2::MaxUint) { "max" } else { "min" };
            let operand_ty = if matches!(op, Op2::MaxUint | Op2::MinUint) {
                UnsignedInt
            } else {
                SignedInt
            };
            let a = read(e, state, inst, 0, operand_ty);
            let b = read(e, state, inst, 1, operand_ty);
            assign(e, inst, &format!("{function}({a}, {b})"), operand_ty);
        }
        Op2::SetE | Op2::SetGt | Op2::SetGe | Op2::SetNe => {
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            assign(e, inst, &format!("({a} {} {b})?1.0:0.0", compare_op(op)), Float);
        }
        Op2::SetEDx10 | Op2::SetGtDx10 | Op2::SetGeDx10 | Op2::SetNeDx10 => {
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            assign(e, inst, &format!("(({a} {} {b})?-1:0)", compare_op(op)), SignedInt);
        }
        Op2::SetEInt | Op2::SetGtInt | Op2::SetGeInt | Op2::SetNeInt => {
            let a = read(e, state, inst, 0, SignedInt);
            let b = read(e, state, inst, 1, SignedInt);
            assign(e, inst, &format!("({a} {} {b})?-1:0", compare_op(op)), SignedInt);
        }
        // Operands compare unsigned. Whether the result mask should be typed unsigned is
        // unverified; it is written as a signed all-ones mask like the other SET*_INT forms.
        Op2::SetGtUint | Op2::SetGeUint => {
            let a = read(e, state, inst, 0, UnsignedInt);
            let b = read(e, state, inst, 1, UnsignedInt);
            assign(
                e,
                inst,
                &format!("({a} {} {b})?int(0xFFFFFFFF):int(0x0)", compare_op(op)),
                SignedInt,
            );
        }
        Op2::PredSetE
        | Op2::PredSetGt
        | Op2::PredSetGe
        | Op2::PredSetNe
        | Op2::PredSetEInt
        | Op2::PredSetGtInt
        | Op2::PredSetGeInt
        | Op2::PredSetNeInt => {
            let operand_ty = if op.uses_integer_values() { SignedInt } else { Float };
            let a = read(e, state, inst, 0, operand_ty);
            let b = read(e, state, inst, 1, operand_ty);
            e.w.line(&format!("predResult = ({a} {} {b});", compare_op(op)));
            match state.kind {
                AluCfKind::PushBefore => {
                    let line = format!("{} = predResult;", e.mask(state.depth));
                    e.w.line(&line);
                    let line = format!(
                        "{} = predResult == true && {} == true;",
                        e.mask_c(state.depth + 1),
                        e.mask_c(state.depth)
                    );
                    e.w.line(&line);
                }
                AluCfKind::Break => e.w.line("if( predResult == false ) break;"),
                kind => e.assumption(
                    Some(inst.word_index),
                    format!("predicate instruction in {kind:?} clause"),
                ),
            }
        }
        Op2::KillE
        | Op2::KillGt
        | Op2::KillGe
        | Op2::KillNe
        | Op2::KillEInt
        | Op2::KillGtInt
        | Op2::KillGeInt
        | Op2::KillNeInt => {
            let operand_ty = if op.uses_integer_values() { SignedInt } else { Float };
            let a = read(e, state, inst, 0, operand_ty);
            let b = read(e, state, inst, 1, operand_ty);
            let line = format!("if(  ({a} {} {b})) {}", compare_op(op), e.syntax.discard());
            e.w.line(&line);
        }
        Op2::Nop => {}
        Op2::Dot4 | Op2::Dot4Ieee | Op2::Cube => {
            e.unsupported(Some(inst.word_index), "reduction outside of a reduction group");
        }
        Op2::Unknown(code) => {
            e.unsupported(Some(inst.word_index), format!("ALU OP2 0x{code:x}"));
        }
    }
}

/// Replaces an infinite `tempResultf` by a signed constant.
fn emit_infinity_fixup(e: &mut Emitter<'_>, negative: &str, positive: &str) {
    let bits = e.cast("tempResultf", DataType::Float, DataType::SignedInt, 1);
    e.w.line(&format!(
        "if( isinf(tempResultf) == true && ({bits}&0x80000000) != 0 ) tempResultf = {negative};"
    ));
    e.w.line(&format!(
        "else if( isinf(tempResultf) == true && ({bits}&0x80000000) == 0 ) tempResultf = {positive};"
    ));
}

fn same_gpr_operand(a: &AluOperand, b: &AluOperand) -> bool {
    matches!(a.sel, AluSrc::Gpr(_))
        && a.sel == b.sel
        && a.chan == b.chan
        && a.abs == b.abs
        && a.neg == b.neg
        && a.rel == b.rel
}

fn emit_op3(e: &mut Emitter<'_>, state: &ClauseState, inst: &AluInstruction, op: Op3) {
    use DataType::{Float, SignedInt};
    let ty = e.ty();
    let is_select = matches!(
        op,
        Op3::CmovE | Op3::CmovGe | Op3::CmovGt | Op3::CndEInt | Op3::CndGtInt | Op3::CmovGeInt
    );
    if is_select && same_gpr_operand(&inst.src[1], &inst.src[2]) && !inst.src[1].has_modifiers() {
        let value = read(e, state, inst, 1, ty);
        assign(e, inst, &value, ty);
        return;
    }
    match op {
        Op3::MulAdd | Op3::MulAddM2 | Op3::MulAddM4 | Op3::MulAddD2 | Op3::MulAddIeee => {
            let plain = op == Op3::MulAddIeee || is_constant(&inst.src[0]) || is_constant(&inst.src[1]);
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, Float);
            let c = read(e, state, inst, 2, Float);
            let product = if e.input.options.strict_mul && !plain {
                format!("mul_nonIEEE({a},{b})")
            } else {
                format!("{a} * {b}")
            };
            let expr = match op {
                Op3::MulAdd => format!("{product} + {c}"),
                Op3::MulAddD2 => format!("({product} + {c})/2.0"),
                Op3::MulAddM2 => format!("({product} + {c})*2.0"),
                Op3::MulAddM4 => format!("({product} + {c})*4.0"),
                _ => format!("({product} + {c})"),
            };
            assign(e, inst, &expr, Float);
        }
        Op3::CndEInt | Op3::CndGtInt | Op3::CmovGeInt => {
            let result_ty = if inst.src[1].neg || inst.src[2].neg { Float } else { SignedInt };
            let symbol = match op {
                Op3::CndEInt => "==",
                Op3::CndGtInt => ">",
                _ => ">=",
            };
            let a = read(e, state, inst, 0, SignedInt);
            let b = read(e, state, inst, 1, result_ty);
            let c = read(e, state, inst, 2, result_ty);
            assign(e, inst, &format!("(({a} {symbol} 0)?({b}):({c}))"), result_ty);
        }
        Op3::CmovE | Op3::CmovGe | Op3::CmovGt => {
            let symbol = match op {
                Op3::CmovE => "==",
                Op3::CmovGe => ">=",
                _ => ">",
            };
            let a = read(e, state, inst, 0, Float);
            let b = read(e, state, inst, 1, SignedInt);
            let c = read(e, state, inst, 2, SignedInt);
            assign(e, inst, &format!("(({a} {symbol} 0.0)?({b}):({c}))"), SignedInt);
        }
        Op3::Unknown(code) => {
            e.unsupported(Some(inst.word_index), format!("ALU OP3 0x{code:x}"));
        }
    }
}

fn emit_reduction(e: &mut Emitter<'_>, state: &ClauseState, slots: &[AluInstruction]) {
    let mut first = Vec::with_capacity(4);
    let mut second = Vec::with_capacity(4);
    for slot in slots {
        first.push(read(e, state, slot, 0, DataType::Float));
        second.push(read(e, state, slot, 1, DataType::Float));
    }
    let vec4 = e.vector(DataType::Float, 4);
    let a = format!("{vec4}({})", first.join(","));
    let b = format!("{vec4}({})", second.join(","));
    if slots[0].op == AluOp::Op2(Op2::Cube) {
        e.w.line(&format!("redcCUBE({a},{b},cubeMapSTM,cubeMapFaceId);"));
        for (slot, component) in slots.iter().zip(["cubeMapSTM.x", "cubeMapSTM.y", "cubeMapSTM.z"]) {
            assign(e, slot, component, DataType::Float);
        }
        assign(e, &slots[3], "cubeMapFaceId", DataType::SignedInt);
    } else {
        assign(e, &slots[0], &format!("dot({a},{b})"), DataType::Float);
    }
}

/// Copies the reduction result into the remaining slots.
fn broadcast_reduction(e: &mut Emitter<'_>, slots: &[AluInstruction]) {
    let result = output_name(e, &slots[0]);
    let is_cube = slots[0].op == AluOp::Op2(Op2::Cube);
    for (index, slot) in slots.iter().enumerate() {
        let target = if !slot.write_mask {
            pvps_name(e, slot.group_index, slot.unit)
        } else if is_cube || index == 0 {
            continue;
        } else {
            output_name(e, slot)
        };
        e.w.line(&format!("{target} = {result};"));
    }
}

fn emit_output_modifiers(e: &mut Emitter<'_>, inst: &AluInstruction) {
    if matches!(inst.op, AluOp::Op2(op) if op.is_predicate_set() || op.is_kill()) {
        return;
    }
    let ty = e.ty();
    let out = output_name(e, inst);
    if inst.omod != 0 {
        let scale = match inst.omod {
            1 => "* 2.0",
            2 => "* 4.0",
            _ => "/ 2.0",
        };
        if ty == DataType::Float {
            let symbol = &scale[..1];
            let factor = &scale[2..];
            e.w.line(&format!("{out} {symbol}= {factor};"));
        } else {
            let as_float = e.cast(&out, ty, DataType::Float, 1);
            let scaled = e.cast(&format!("{as_float} {scale}"), DataType::Float, ty, 1);
            e.w.line(&format!("{out} = {scaled};"));
        }
    }
    if inst.clamp {
        if ty == DataType::Float {
            e.w.line(&format!("{out} = clamp({out}, 0.0, 1.0);"));
        } else {
            e.w.line(&format!("{out} = clampFI32({out});"));
        }
    }
}
