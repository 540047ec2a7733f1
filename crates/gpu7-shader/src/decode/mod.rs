//! Control-flow and clause decoding.
//!
//! The decoder turns raw microcode into an owned instruction tree: a flat list of CF
//! instructions (plus any subroutines reached through `CALL`), with ALU and TEX clauses already
//! expanded into their individual instructions. Nothing here knows about output languages.

mod alu;
mod cf;
mod tex;

use gpu7_isa::{AluCfKind, AluSrc, ChannelMask, ExportType, Op2, Op3, ShaderStage, TexOpcode};

use crate::error::{CompileError, Diagnostics};
use crate::limits;
use crate::program::Program;

pub(crate) use cf::walk_cf;

/// Fully decoded shader program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedProgram {
    pub cf: Vec<CfInstruction>,
    pub subroutines: Vec<Subroutine>,
}

impl DecodedProgram {
    pub fn subroutine(&self, addr: u32) -> Option<&Subroutine> {
        self.subroutines.iter().find(|sub| sub.addr == addr)
    }

    /// Every CF instruction, main program first, then subroutine bodies.
    pub fn all_cf(&self) -> impl Iterator<Item = &CfInstruction> {
        self.cf
            .iter()
            .chain(self.subroutines.iter().flat_map(|sub| sub.cf.iter()))
    }
}

/// Body of a `CALL` target, from its CF address up to and including `RETURN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Subroutine {
    pub addr: u32,
    pub cf: Vec<CfInstruction>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CfInstruction {
    /// Index of the CF word pair (8-byte units).
    pub cf_addr: u32,
    pub cond: u32,
    /// Depth in the active-mask stack at this instruction, filled in by the analyzer.
    pub active_stack_depth: u32,
    pub kind: CfKind,
}

impl CfInstruction {
    pub(crate) fn new(cf_addr: u32, cond: u32, kind: CfKind) -> Self {
        Self {
            cf_addr,
            cond,
            active_stack_depth: 0,
            kind,
        }
    }

    pub fn word_index(&self) -> usize {
        self.cf_addr as usize * 2
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CfKind {
    Alu {
        kind: AluCfKind,
        clause: AluClause,
    },
    Tex {
        instructions: Vec<TexInstruction>,
    },
    Export(ExportInfo),
    MemStream {
        buffer: u8,
        write: MemWrite,
    },
    MemRing(MemWrite),
    LoopStart {
        pop_count: u32,
    },
    LoopEnd {
        pop_count: u32,
    },
    LoopBreak {
        pop_count: u32,
    },
    Else {
        pop_count: u32,
    },
    Pop {
        pop_count: u32,
    },
    Call {
        addr: u32,
        count: u32,
    },
    Return,
    EmitVertex,
}

impl CfKind {
    pub fn alu_kind(&self) -> Option<AluCfKind> {
        match self {
            CfKind::Alu { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Export directive (`EXPORT` / `EXPORT_DONE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportInfo {
    pub done: bool,
    pub export_type: ExportType,
    pub array_base: u32,
    /// Number of consecutive registers exported, minus one.
    pub burst_count: u32,
    pub src_gpr: u32,
    pub comp_sel: [u8; 4],
}

/// Stream-out or ring buffer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemWrite {
    /// Destination offset in dwords.
    pub array_base: u32,
    pub array_size: u32,
    pub comp_mask: ChannelMask,
    pub src_gpr: u32,
    pub elem_size: u32,
    pub burst_count: u32,
}

/// Uniform buffer window of an ALU clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KCacheBank {
    pub bank: u32,
    /// First vec4 index of the window.
    pub base: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AluClause {
    pub kcache: [KCacheBank; 2],
    pub instructions: Vec<AluInstruction>,
}

impl AluClause {
    /// Instructions grouped by instruction group, in program order.
    pub fn groups(&self) -> impl Iterator<Item = &[AluInstruction]> {
        self.instructions
            .chunk_by(|a, b| a.group_index == b.group_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Op2(Op2),
    Op3(Op3),
}

impl AluOp {
    pub fn is_nop(self) -> bool {
        self == AluOp::Op2(Op2::Nop)
    }

    pub fn op2(self) -> Option<Op2> {
        match self {
            AluOp::Op2(op) => Some(op),
            AluOp::Op3(_) => None,
        }
    }

    pub fn is_reduction(self) -> bool {
        matches!(self, AluOp::Op2(op) if op.is_reduction())
    }

    pub fn uses_integer_values(self) -> bool {
        match self {
            AluOp::Op2(op) => op.uses_integer_values(),
            AluOp::Op3(op) => op.uses_integer_values(),
        }
    }
}

/// Unit index of the scalar (transcendental) ALU.
pub const UNIT_TRANS: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluOperand {
    pub sel: AluSrc,
    pub rel: bool,
    pub abs: bool,
    pub neg: bool,
    pub chan: u8,
}

impl AluOperand {
    pub(crate) const UNUSED: AluOperand = AluOperand {
        sel: AluSrc::Unknown(u32::MAX),
        rel: false,
        abs: false,
        neg: false,
        chan: 0,
    };

    pub fn is_used(&self) -> bool {
        self.sel != AluSrc::Unknown(u32::MAX)
    }

    pub fn has_modifiers(&self) -> bool {
        self.abs || self.neg
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AluInstruction {
    pub word_index: usize,
    pub op: AluOp,
    pub group_index: u32,
    pub index_in_group: u32,
    /// 0..=3 vector units `x..w`, 4 = trans.
    pub unit: u8,
    pub index_mode: u32,
    pub dst_gpr: u32,
    pub dst_rel: bool,
    pub dst_elem: u8,
    pub write_mask: bool,
    pub omod: u8,
    pub clamp: bool,
    pub update_exec_mask: bool,
    pub update_pred: bool,
    pub src: [AluOperand; 3],
    /// Literal constants of the instruction group.
    pub literal: [u32; 4],
}

impl AluInstruction {
    pub fn operands(&self) -> impl Iterator<Item = &AluOperand> {
        self.src.iter().filter(|operand| operand.is_used())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TexInstruction {
    pub word_index: usize,
    pub opcode: TexOpcode,
    pub src_gpr: u32,
    /// `None` for instructions without a destination (gradient setup).
    pub dst_gpr: Option<u32>,
    pub dst_sel: [u8; 4],
    pub payload: TexPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexPayload {
    Fetch(TextureFetch),
    VertexFetch(VertexFetch),
    MemRead(MemRead),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureFetch {
    pub texture: u32,
    pub sampler: u32,
    pub src_sel: [u8; 4],
    pub offsets: [i8; 3],
    pub unnormalized: [bool; 4],
    pub lod_bias: i8,
}

impl TextureFetch {
    pub fn has_offsets(&self) -> bool {
        self.offsets != [0; 3]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexFetch {
    pub buffer: u32,
    pub offset: u32,
    pub src_sel_x: u8,
    pub format: u32,
    pub num_format: u32,
    pub signed: bool,
    pub endian: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRead {
    pub array_base: u32,
    pub src_sel_x: u8,
    pub format: u32,
    pub num_format: u32,
    pub signed: bool,
}

/// Decodes a vertex, pixel or geometry shader program.
pub fn decode_program(
    program: &Program<'_>,
    stage: ShaderStage,
    diagnostics: &mut Diagnostics,
) -> Result<DecodedProgram, CompileError> {
    let walk = walk_cf(program, 0, cf::WalkMode::Main, diagnostics)?;
    let mut decoded = DecodedProgram {
        cf: walk.instructions,
        subroutines: Vec::new(),
    };
    let mut pending: Vec<(u32, usize)> = walk
        .call_targets
        .into_iter()
        .map(|addr| (addr, 1))
        .collect();
    pending.reverse();
    while let Some((addr, depth)) = pending.pop() {
        if decoded.subroutine(addr).is_some() {
            continue;
        }
        let body = walk_cf(program, addr, cf::WalkMode::Subroutine, diagnostics)?;
        if !body.call_targets.is_empty() {
            if depth >= limits::MAX_CALL_DEPTH {
                diagnostics.assumption(
                    Some(addr as usize * 2),
                    "nested subroutine calls are not supported",
                );
            } else {
                pending.extend(
                    body.call_targets
                        .iter()
                        .rev()
                        .map(|&target| (target, depth + 1)),
                );
            }
        }
        decoded.subroutines.push(Subroutine {
            addr,
            cf: body.instructions,
        });
    }
    tracing::trace!(
        %stage,
        cf = decoded.cf.len(),
        subroutines = decoded.subroutines.len(),
        "decoded program"
    );
    Ok(decoded)
}

#[cfg(test)]
mod tests;
