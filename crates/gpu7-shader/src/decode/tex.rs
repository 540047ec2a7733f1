use gpu7_isa::{TexOpcode, TexWord};

use super::{MemRead, TexInstruction, TexPayload, TextureFetch, VertexFetch};
use crate::error::{CompileError, Diagnostics};
use crate::program::Program;

/// `MEM_RD` operation reading from the scatter buffer.
const MEM_OP_READ_SCATTER: u32 = 2;

/// Decodes a TEX or VTX clause of `count` 16-byte instructions starting at `addr` (8-byte units).
pub(super) fn decode_clause(
    program: &Program<'_>,
    addr: u32,
    count: u32,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<TexInstruction>, CompileError> {
    let mut instructions = Vec::with_capacity(count as usize);
    for i in 0..count as usize {
        let word_index = addr as usize * 2 + i * 4;
        let word = program.tex_word(word_index)?;
        let opcode = word.opcode();
        if word.src_rel() || word.dst_rel() {
            diagnostics.assumption(Some(word_index), "relative TEX register addressing");
        }
        let instruction = match opcode {
            TexOpcode::VFetch => TexInstruction {
                word_index,
                opcode,
                src_gpr: word.src_gpr(),
                dst_gpr: Some(word.dst_gpr()),
                dst_sel: word.dst_sel(),
                payload: TexPayload::VertexFetch(VertexFetch {
                    buffer: word.resource_id(),
                    offset: word.vtx_offset(),
                    src_sel_x: word.vtx_src_sel_x(),
                    format: word.vtx_format(),
                    num_format: word.vtx_num_format(),
                    signed: word.vtx_signed(),
                    endian: word.vtx_endian(),
                }),
            },
            TexOpcode::Mem => {
                if word.mem_op() != MEM_OP_READ_SCATTER {
                    diagnostics.unsupported(
                        Some(word_index),
                        format!("memory operation {}", word.mem_op()),
                    );
                    continue;
                }
                TexInstruction {
                    word_index,
                    opcode,
                    src_gpr: word.src_gpr(),
                    dst_gpr: Some(word.dst_gpr()),
                    dst_sel: word.dst_sel(),
                    payload: TexPayload::MemRead(MemRead {
                        array_base: word.mem_array_base(),
                        src_sel_x: word.vtx_src_sel_x(),
                        format: word.vtx_format(),
                        num_format: word.vtx_num_format(),
                        signed: word.vtx_signed(),
                    }),
                }
            }
            TexOpcode::SetGradientsH | TexOpcode::SetGradientsV => TexInstruction {
                word_index,
                opcode,
                src_gpr: word.src_gpr(),
                dst_gpr: None,
                dst_sel: [7; 4],
                payload: TexPayload::Fetch(TextureFetch {
                    texture: word.resource_id(),
                    sampler: word.sampler_id(),
                    src_sel: word.src_sel(),
                    ..TextureFetch::default()
                }),
            },
            TexOpcode::GetGradientsH | TexOpcode::GetGradientsV | TexOpcode::SetCubemapIndex => {
                TexInstruction {
                    word_index,
                    opcode,
                    src_gpr: word.src_gpr(),
                    dst_gpr: Some(word.dst_gpr()),
                    dst_sel: word.dst_sel(),
                    payload: TexPayload::Fetch(TextureFetch {
                        texture: word.resource_id(),
                        sampler: word.sampler_id(),
                        src_sel: word.src_sel(),
                        ..TextureFetch::default()
                    }),
                }
            }
            op if op.is_sample_like() => TexInstruction {
                word_index,
                opcode,
                src_gpr: word.src_gpr(),
                dst_gpr: Some(word.dst_gpr()),
                dst_sel: word.dst_sel(),
                payload: TexPayload::Fetch(sample_fetch(&word)),
            },
            _ => {
                diagnostics.unsupported(Some(word_index), format!("TEX opcode {opcode:?}"));
                break;
            }
        };
        instructions.push(instruction);
    }
    tracing::trace!(addr, count, "decoded TEX clause");
    Ok(instructions)
}

fn sample_fetch(word: &TexWord) -> TextureFetch {
    TextureFetch {
        texture: word.resource_id(),
        sampler: word.sampler_id(),
        src_sel: word.src_sel(),
        offsets: word.offsets(),
        unnormalized: word.unnormalized(),
        lod_bias: word.lod_bias(),
    }
}
