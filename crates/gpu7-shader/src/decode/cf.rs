use gpu7_isa::{CfOpcode, CfWord, ChannelMask, ExportType};

use super::{alu, tex, CfInstruction, CfKind, ExportInfo, MemWrite};
use crate::error::{CompileError, Diagnostics};
use crate::limits::MAX_CF_INSTRUCTIONS;
use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkMode {
    /// Top-level program: runs until end-of-program or the end of the buffer.
    Main,
    /// `CALL` target: runs until `RETURN`.
    Subroutine,
}

#[derive(Debug, Default)]
pub(crate) struct CfWalk {
    pub instructions: Vec<CfInstruction>,
    /// Unique `CALL` targets in first-seen order.
    pub call_targets: Vec<u32>,
}

pub(crate) fn walk_cf(
    program: &Program<'_>,
    start: u32,
    mode: WalkMode,
    diagnostics: &mut Diagnostics,
) -> Result<CfWalk, CompileError> {
    let cf_count = program.word_count() / 2;
    let mut walk = CfWalk::default();
    let mut cf_addr = start as usize;
    loop {
        if cf_addr >= cf_count || cf_addr - start as usize >= MAX_CF_INSTRUCTIONS {
            if mode == WalkMode::Subroutine {
                diagnostics.assumption(
                    Some(start as usize * 2),
                    format!("subroutine at {start:#x} has no RETURN"),
                );
            }
            break;
        }
        let word = program.cf_word(cf_addr)?;
        let addr = cf_addr as u32;
        let opcode = word.opcode();
        let word_index = cf_addr * 2;

        if let Some(kind) = decode_one(program, &word, opcode, word_index, diagnostics)? {
            if let CfKind::Call { addr: target, .. } = kind {
                if !walk.call_targets.contains(&target) {
                    walk.call_targets.push(target);
                }
            }
            let cond = match opcode {
                CfOpcode::Alu(_) => 0,
                _ => word.cond(),
            };
            walk.instructions.push(CfInstruction::new(addr, cond, kind));
        }

        if opcode == CfOpcode::Return && mode == WalkMode::Subroutine {
            break;
        }
        if !opcode.is_alu() && word.end_of_program() {
            if mode == WalkMode::Subroutine {
                diagnostics.assumption(
                    Some(word_index),
                    format!("end of program inside subroutine at {start:#x}"),
                );
            }
            break;
        }
        cf_addr += 1;
    }
    Ok(walk)
}

fn decode_one(
    program: &Program<'_>,
    word: &CfWord,
    opcode: CfOpcode,
    word_index: usize,
    diagnostics: &mut Diagnostics,
) -> Result<Option<CfKind>, CompileError> {
    let kind = match opcode {
        CfOpcode::Alu(kind) => CfKind::Alu {
            kind,
            clause: alu::decode_clause(program, word, diagnostics)?,
        },
        CfOpcode::Tex | CfOpcode::Vtx | CfOpcode::VtxTc => CfKind::Tex {
            instructions: tex::decode_clause(program, word.addr(), word.count(), diagnostics)?,
        },
        CfOpcode::Export | CfOpcode::ExportDone => {
            if word.export_rw_rel() || word.export_index_gpr() != 0 {
                diagnostics.assumption(Some(word_index), "indexed export");
            }
            CfKind::Export(ExportInfo {
                done: opcode == CfOpcode::ExportDone,
                export_type: ExportType::from_raw(word.export_type()),
                array_base: word.export_array_base(),
                burst_count: word.export_burst_count(),
                src_gpr: word.export_source_gpr(),
                comp_sel: word.export_component_sel(),
            })
        }
        CfOpcode::MemStream(buffer) => CfKind::MemStream {
            buffer,
            write: mem_write(word),
        },
        CfOpcode::MemRing => CfKind::MemRing(mem_write(word)),
        CfOpcode::LoopStart | CfOpcode::LoopStartDx10 | CfOpcode::LoopStartNoAl => {
            CfKind::LoopStart {
                pop_count: word.pop_count(),
            }
        }
        CfOpcode::LoopEnd => CfKind::LoopEnd {
            pop_count: word.pop_count(),
        },
        CfOpcode::LoopBreak => CfKind::LoopBreak {
            pop_count: word.pop_count(),
        },
        CfOpcode::Else => CfKind::Else {
            pop_count: word.pop_count(),
        },
        CfOpcode::Pop => CfKind::Pop {
            pop_count: word.pop_count(),
        },
        CfOpcode::Call => CfKind::Call {
            addr: word.addr(),
            count: word.call_count(),
        },
        CfOpcode::Return => CfKind::Return,
        CfOpcode::EmitVertex => CfKind::EmitVertex,
        CfOpcode::Nop => {
            if word.pop_count() != 0 {
                diagnostics.assumption(Some(word_index), "NOP with non-zero pop count");
            }
            return Ok(None);
        }
        CfOpcode::CallFs | CfOpcode::Jump => {
            tracing::debug!(?opcode, word_index, "ignoring CF instruction");
            return Ok(None);
        }
        CfOpcode::Unknown(raw) => {
            tracing::debug!(raw, word_index, "unknown CF opcode");
            diagnostics.unsupported(Some(word_index), format!("CF opcode {raw:#x}"));
            return Ok(None);
        }
    };
    Ok(Some(kind))
}

fn mem_write(word: &CfWord) -> MemWrite {
    MemWrite {
        array_base: word.export_array_base(),
        array_size: word.mem_array_size(),
        comp_mask: ChannelMask::from_bits_truncate(word.mem_comp_mask()),
        src_gpr: word.export_source_gpr(),
        elem_size: word.export_elem_size(),
        burst_count: word.export_burst_count(),
    }
}
