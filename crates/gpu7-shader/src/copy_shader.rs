//! Geometry shader copy-shader parser.
//!
//! The copy shader runs after the geometry shader on hardware and moves each emitted vertex from
//! the GS ring buffer into parameter exports and stream-out buffers. It is always compiler
//! generated and contains only ring fetches, exports and stream writes, so the parser accepts
//! exactly that shape and rejects everything else.

use gpu7_isa::{CfOpcode, ChannelMask, ExportType, TexOpcode, EXPORT_BASE_POSITION, FETCH_BUFFER_GS_RING};

use crate::error::CompileError;
use crate::limits::MAX_COPY_SHADER_PARAMS;
use crate::program::Program;

/// Export slot a ring parameter ends up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamExport {
    pub export_type: ExportType,
    pub index: u32,
}

/// A parameter fetched from the GS ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyShaderParam {
    /// Byte offset within the ring item.
    pub offset: u32,
    pub gpr: u32,
    pub export: ParamExport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamWrite {
    pub buffer: u8,
    /// Ring offset of the parameter being written.
    pub offset: u32,
    /// Destination offset in dwords.
    pub array_base: u32,
    pub array_size: u32,
    pub comp_mask: ChannelMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CopyShader {
    pub params: Vec<CopyShaderParam>,
    pub stream_writes: Vec<StreamWrite>,
}

impl CopyShader {
    pub fn export_for_offset(&self, offset: u32) -> Option<ParamExport> {
        self.params
            .iter()
            .find(|param| param.offset == offset)
            .map(|param| param.export)
    }

    pub fn stream_writes_for_offset(&self, offset: u32) -> impl Iterator<Item = &StreamWrite> {
        self.stream_writes
            .iter()
            .filter(move |write| write.offset == offset)
    }
}

#[derive(Debug)]
struct PendingParam {
    offset: u32,
    gpr: u32,
    export: Option<ParamExport>,
}

/// Parses copy-shader microcode.
pub fn parse_copy_shader(program: &Program<'_>) -> Result<CopyShader, CompileError> {
    let mut params: Vec<PendingParam> = Vec::new();
    let mut stream_writes = Vec::new();

    for cf_addr in 0..program.word_count() / 2 {
        let word = program.cf_word(cf_addr)?;
        let word_index = cf_addr * 2;
        let opcode = word.opcode();
        match opcode {
            CfOpcode::Nop => {
                if word.pop_count() != 0 {
                    return Err(CompileError::AssumptionViolation {
                        word_index,
                        message: "copy shader NOP with non-zero pop count".to_string(),
                    });
                }
            }
            CfOpcode::CallFs => {}
            CfOpcode::Vtx | CfOpcode::VtxTc => {
                parse_vtx_clause(program, word.addr(), word.count(), &mut params)?;
            }
            CfOpcode::Export | CfOpcode::ExportDone => {
                if word.export_rw_rel() || word.export_index_gpr() != 0 {
                    return Err(CompileError::AssumptionViolation {
                        word_index,
                        message: "indexed export in copy shader".to_string(),
                    });
                }
                let comp_sel = word.export_component_sel();
                let array_base = word.export_array_base();
                if array_base == EXPORT_BASE_POSITION && comp_sel == [4; 4] {
                    tracing::debug!(word_index, "skipping copy shader position clear");
                } else if comp_sel != [0, 1, 2, 3] {
                    return Err(CompileError::AssumptionViolation {
                        word_index,
                        message: format!("copy shader export with swizzle {comp_sel:?}"),
                    });
                } else {
                    let export_type = ExportType::from_raw(word.export_type());
                    for i in 0..=word.export_burst_count() {
                        let gpr = word.export_source_gpr() + i;
                        let param = params
                            .iter_mut()
                            .rev()
                            .find(|param| param.gpr == gpr)
                            .ok_or_else(|| {
                                CompileError::structural(
                                    word_index,
                                    format!("copy shader exports R{gpr} which was never fetched"),
                                )
                            })?;
                        param.export = Some(ParamExport {
                            export_type,
                            index: array_base + i,
                        });
                    }
                }
            }
            CfOpcode::MemStream(buffer) => {
                let gpr = word.export_source_gpr();
                let param = params.iter().rev().find(|param| param.gpr == gpr).ok_or_else(|| {
                    CompileError::structural(
                        word_index,
                        format!("copy shader stream write of R{gpr} which was never fetched"),
                    )
                })?;
                stream_writes.push(StreamWrite {
                    buffer,
                    offset: param.offset,
                    array_base: word.export_array_base(),
                    array_size: word.mem_array_size(),
                    comp_mask: ChannelMask::from_bits_truncate(word.mem_comp_mask()),
                });
            }
            CfOpcode::Alu(_) => {
                return Err(CompileError::structural(word_index, "ALU clause in copy shader"));
            }
            other => {
                return Err(CompileError::structural(
                    word_index,
                    format!("unexpected CF instruction {other:?} in copy shader"),
                ));
            }
        }
        if word.end_of_program() {
            break;
        }
    }

    let params = params
        .into_iter()
        .map(|param| match param.export {
            Some(export) => Ok(CopyShaderParam {
                offset: param.offset,
                gpr: param.gpr,
                export,
            }),
            None => Err(CompileError::unresolved(
                param.offset,
                format!("ring parameter fetched into R{} is never exported", param.gpr),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CopyShader {
        params,
        stream_writes,
    })
}

fn parse_vtx_clause(
    program: &Program<'_>,
    addr: u32,
    count: u32,
    params: &mut Vec<PendingParam>,
) -> Result<(), CompileError> {
    for i in 0..count as usize {
        let word_index = addr as usize * 2 + i * 4;
        let word = program.tex_word(word_index)?;
        if word.opcode() != TexOpcode::VFetch {
            return Err(CompileError::structural(
                word_index,
                format!("copy shader fetch clause contains {:?}", word.opcode()),
            ));
        }
        if word.resource_id() != FETCH_BUFFER_GS_RING {
            return Err(CompileError::structural(
                word_index,
                format!("copy shader fetches from buffer {:#x}", word.resource_id()),
            ));
        }
        let canonical = word.vtx_endian() == 0
            && word.fetch_type() == 2
            && word.vtx_src_sel_x() == 0
            && word.src_gpr() == 0
            && !word.src_rel()
            && !word.dst_rel()
            && word.dst_sel() == [0, 1, 2, 3];
        if !canonical {
            return Err(CompileError::structural(
                word_index,
                "copy shader ring fetch has a non-canonical layout",
            ));
        }
        if params.len() >= MAX_COPY_SHADER_PARAMS {
            return Err(CompileError::structural(
                word_index,
                format!("copy shader fetches more than {MAX_COPY_SHADER_PARAMS} parameters"),
            ));
        }
        params.push(PendingParam {
            offset: word.vtx_offset(),
            gpr: word.dst_gpr(),
            export: None,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{cf_inst, cf_mem_write, cf_op, vfetch, Export, ProgramBuilder};

    use super::*;

    fn ring_fetch(offset: u32, dst_gpr: u32) -> [u32; 4] {
        let mut words = vfetch(FETCH_BUFFER_GS_RING, 0, dst_gpr, [0, 1, 2, 3], offset, 0x23, 2, false);
        // NO_INDEX_OFFSET fetch type.
        words[0] |= 2 << 5;
        words
    }

    fn parse(builder: &ProgramBuilder) -> Result<CopyShader, CompileError> {
        let bytes = builder.to_bytes();
        parse_copy_shader(&Program::new(&bytes).unwrap())
    }

    #[test]
    fn maps_ring_offsets_to_exports_and_stream_writes() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::VTX, 8, 2, false))
            .cf(1, Export::new(1, 60, 1).encode())
            .cf(2, Export::new(2, 0, 2).encode())
            .cf(3, cf_mem_write(cf_op::MEM_STREAM0, 4, 0b0111, 2, 0))
            .cf(4, cf_inst(cf_op::NOP, 0, 1, true))
            .tex(8, &[ring_fetch(0, 1), ring_fetch(16, 2)]);
        let shader = parse(&builder).unwrap();
        assert_eq!(
            shader.export_for_offset(16),
            Some(ParamExport {
                export_type: ExportType::Parameter,
                index: 0
            })
        );
        assert_eq!(shader.export_for_offset(0).unwrap().export_type, ExportType::Position);
        let writes: Vec<&StreamWrite> = shader.stream_writes_for_offset(16).collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].array_base, 4);
        assert_eq!(writes[0].comp_mask, ChannelMask::X | ChannelMask::Y | ChannelMask::Z);
    }

    #[test]
    fn unexported_parameter_is_unresolved() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::VTX, 4, 2, false))
            .cf(1, Export::new(2, 0, 1).done().end().encode())
            .tex(4, &[ring_fetch(0, 1), ring_fetch(32, 2)]);
        let err = parse(&builder).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { offset: 32, .. }));
    }

    #[test]
    fn alu_clause_is_rejected() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, gpu7_isa::asm::cf_alu(cf_op::ALU, 2, 1));
        builder.cf(1, cf_inst(cf_op::NOP, 0, 1, true));
        assert!(matches!(
            parse(&builder).unwrap_err(),
            CompileError::StructuralDecode { word_index: 0, .. }
        ));
    }

    #[test]
    fn position_clear_idiom_is_skipped() {
        let mut clear = Export::new(1, 60, 0);
        clear.comp_sel = [4; 4];
        let mut builder = ProgramBuilder::new();
        builder.cf(0, clear.done().end().encode());
        assert_eq!(parse(&builder).unwrap(), CopyShader::default());
    }

    #[test]
    fn fetch_from_other_buffer_is_rejected() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::VTX, 2, 1, true))
            .tex(2, &[vfetch(0x80, 0, 1, [0, 1, 2, 3], 0, 0x23, 2, false)]);
        assert!(matches!(
            parse(&builder).unwrap_err(),
            CompileError::StructuralDecode { .. }
        ));
    }
}
