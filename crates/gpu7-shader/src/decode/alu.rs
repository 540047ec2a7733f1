use gpu7_isa::{AluSrc, AluWord, CfWord, Op2, Op3};

use super::{AluClause, AluInstruction, AluOp, AluOperand, KCacheBank, UNIT_TRANS};
use crate::error::{CompileError, Diagnostics};
use crate::program::Program;

/// Tracks state that resets at every instruction group boundary.
#[derive(Debug, Default)]
struct GroupState {
    group_index: u32,
    index_in_group: u32,
    /// Units (`x y z w t`) already claimed by the current group.
    units_used: u8,
    /// Literal channels referenced by the current group.
    literal_mask: u8,
    first_instruction: usize,
}

pub(super) fn decode_clause(
    program: &Program<'_>,
    cf: &CfWord,
    diagnostics: &mut Diagnostics,
) -> Result<AluClause, CompileError> {
    let addr = cf.alu_addr() as usize;
    let count = cf.alu_count() as usize;
    let mut clause = AluClause {
        kcache: [
            KCacheBank {
                bank: cf.kcache_bank0(),
                base: cf.kcache_addr0(),
            },
            KCacheBank {
                bank: cf.kcache_bank1(),
                base: cf.kcache_addr1(),
            },
        ],
        instructions: Vec::with_capacity(count),
    };

    let mut group = GroupState::default();
    let mut slot = 0usize;
    while slot < count {
        let word_index = (addr + slot) * 2;
        let word = program.alu_word(addr + slot)?;
        slot += 1;

        if word.pred_sel() != 0 {
            diagnostics.assumption(Some(word_index), "predicated ALU instruction");
        }

        let instruction = decode_instruction(&word, word_index, &mut group);
        clause.instructions.push(instruction);
        group.index_in_group += 1;

        if word.last_in_group() {
            if group.literal_mask != 0 {
                let literal = read_literals(program, addr + slot, group.literal_mask)?;
                slot += if group.literal_mask & 0b1100 != 0 { 2 } else { 1 };
                for instruction in &mut clause.instructions[group.first_instruction..] {
                    instruction.literal = literal;
                }
            }
            group = GroupState {
                group_index: group.group_index + 1,
                first_instruction: clause.instructions.len(),
                ..GroupState::default()
            };
        }
    }
    tracing::trace!(
        addr,
        count,
        instructions = clause.instructions.len(),
        "decoded ALU clause"
    );
    Ok(clause)
}

fn decode_instruction(word: &AluWord, word_index: usize, group: &mut GroupState) -> AluInstruction {
    let mut src = [AluOperand::UNUSED; 3];
    for (index, operand) in src.iter_mut().take(2).enumerate() {
        let (sel, rel, chan, neg) = word.src01(index);
        *operand = AluOperand {
            sel: AluSrc::from_sel(sel),
            rel,
            abs: false,
            neg,
            chan,
        };
    }

    let dst_elem = word.dst_elem();
    let mut unit = dst_elem;
    let mut instruction = AluInstruction {
        word_index,
        op: AluOp::Op2(Op2::Nop),
        group_index: group.group_index,
        index_in_group: group.index_in_group,
        unit: 0,
        index_mode: word.index_mode(),
        dst_gpr: word.dst_gpr(),
        dst_rel: word.dst_rel(),
        dst_elem,
        write_mask: true,
        omod: 0,
        clamp: word.dst_clamp(),
        update_exec_mask: false,
        update_pred: false,
        src,
        literal: [0; 4],
    };

    if word.is_op3() {
        let (sel, rel, chan, neg) = word.src2();
        instruction.op = AluOp::Op3(Op3::from_raw(word.op3_code()));
        instruction.src[2] = AluOperand {
            sel: AluSrc::from_sel(sel),
            rel,
            abs: false,
            neg,
            chan,
        };
    } else {
        let op = Op2::from_raw(word.op2_code());
        instruction.op = AluOp::Op2(op);
        instruction.src[0].abs = word.src_abs(0);
        instruction.src[1].abs = word.src_abs(1);
        instruction.update_exec_mask = word.update_exec_mask();
        instruction.update_pred = word.update_pred();
        instruction.write_mask = word.op2_write_mask();
        instruction.omod = word.op2_omod();
        if op.is_trans_only() {
            unit = UNIT_TRANS;
        }
    }

    for operand in instruction.operands() {
        if operand.sel == AluSrc::Literal {
            group.literal_mask |= 1 << operand.chan;
        }
    }

    // A second write to the same vector unit within a group goes to the trans unit.
    if unit < UNIT_TRANS && group.units_used & (1 << unit) != 0 {
        unit = UNIT_TRANS;
    }
    group.units_used |= 1 << unit;
    instruction.unit = unit;
    instruction
}

fn read_literals(
    program: &Program<'_>,
    slot: usize,
    literal_mask: u8,
) -> Result<[u32; 4], CompileError> {
    let xy = program.alu_word(slot)?;
    let mut literal = [xy.word0, xy.word1, 0, 0];
    if literal_mask & 0b1100 != 0 {
        let zw = program.alu_word(slot + 1)?;
        literal[2] = zw.word0;
        literal[3] = zw.word1;
    }
    Ok(literal)
}
