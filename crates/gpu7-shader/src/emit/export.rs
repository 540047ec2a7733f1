//! Exports, GS ring writes and stream-out writes.

use gpu7_isa::{
    channel_name, ChannelMask, ColorFormat, CompareFunc, ExportType, ShaderStage, EXPORT_BASE_POINT_SIZE_OR_DEPTH,
    EXPORT_BASE_POSITION,
};

use super::{mask_letters, Dialect, Emitter};
use crate::analyze::DataType;
use crate::decode::{CfInstruction, ExportInfo, MemWrite};
use crate::error::CompileError;

/// Export parameters above this index are not routed to the next stage.
const MAX_PARAMETER_EXPORTS: u32 = 32;
/// Geometry shader outputs are limited to 16 parameters.
const MAX_GS_PARAMETERS: u32 = 16;

fn one(ty: DataType) -> &'static str {
    match ty {
        DataType::Float => "1.0",
        DataType::SignedInt | DataType::UnsignedInt => "1",
    }
}

fn zero(ty: DataType) -> &'static str {
    match ty {
        DataType::Float => "0.0",
        DataType::SignedInt | DataType::UnsignedInt => "0",
    }
}

/// `vec4(R1f.x, R1f.y, ...)` built from export component selects. Selects 4 and 7 are zero, 5
/// is one.
fn export_read(e: &Emitter<'_>, gpr: u32, sels: &[u8], required: DataType) -> String {
    let parts: Vec<String> = sels
        .iter()
        .map(|&sel| match sel {
            0..=3 => e.cast(&format!("{}.{}", e.reg(gpr), channel_name(sel as usize)), e.ty(), required, 1),
            5 => one(required).to_string(),
            _ => zero(required).to_string(),
        })
        .collect();
    format!("{}({})", e.vector(required, sels.len()), parts.join(", "))
}

/// The channels of `mask`, read as a vector of `required`.
fn masked_read(e: &Emitter<'_>, gpr: u32, mask: ChannelMask, required: DataType) -> String {
    let sels: Vec<u8> = (0..4u8)
        .filter(|&i| mask.contains(ChannelMask::channel(i as usize)))
        .collect();
    export_read(e, gpr, &sels, required)
}

pub(super) fn emit_export(e: &mut Emitter<'_>, cf: &CfInstruction, export: &ExportInfo) {
    e.w.line("// export");
    match e.stage() {
        ShaderStage::Vertex | ShaderStage::Geometry => emit_vertex_export(e, cf, export),
        ShaderStage::Pixel => emit_pixel_export(e, cf, export),
    }
}

fn emit_vertex_export(e: &mut Emitter<'_>, cf: &CfInstruction, export: &ExportInfo) {
    if e.dialect == Dialect::Msl && !e.regs().rasterization_enabled {
        e.w.line("// Rasterization disabled");
        return;
    }
    match (export.export_type, export.array_base) {
        (ExportType::Position, EXPORT_BASE_POSITION) => {
            let value = export_read(e, export.src_gpr, &export.comp_sel, DataType::Float);
            if e.regs().any_viewport_scale_disabled() {
                let vec2 = e.vector(DataType::Float, 2);
                let vec4 = e.vector(DataType::Float, 4);
                let transform = e.uniform_var("windowSpaceToClipSpaceTransform");
                e.w.open("");
                e.w.line(&format!("{vec4} finalPos = {value};"));
                e.w.line(&format!(
                    "finalPos.xy = finalPos.xy * {transform} - {vec2}(1.0,1.0);"
                ));
                e.w.line("SET_POSITION(finalPos);");
                e.w.close("");
            } else {
                e.w.line(&format!("SET_POSITION({value});"));
            }
        }
        (ExportType::Position, EXPORT_BASE_POINT_SIZE_OR_DEPTH) => {
            if e.analysis().output_point_size {
                let value = export_read(e, export.src_gpr, &export.comp_sel, DataType::Float);
                let target = e.syntax.point_size_output();
                e.w.line(&format!("{target} = ({value}).x;"));
            }
        }
        (ExportType::Parameter, base) if base < MAX_PARAMETER_EXPORTS => {
            for burst in 0..=export.burst_count {
                let semantic = e.regs().vs_output_semantic_id(base + burst);
                if semantic == 0xFF {
                    e.w.line("// skipped export to semanticId 255");
                    continue;
                }
                let value = export_read(e, export.src_gpr + burst, &export.comp_sel, DataType::Float);
                let target = e.syntax.output(&format!("passParameterSem{semantic}"));
                e.w.line(&format!("{target} = {value};"));
            }
        }
        (export_type, base) => e.unsupported(
            Some(cf.word_index()),
            format!("{export_type:?} export to array base {base}"),
        ),
    }
}

fn emit_pixel_export(e: &mut Emitter<'_>, cf: &CfInstruction, export: &ExportInfo) {
    match (export.export_type, export.array_base) {
        (ExportType::Pixel, base) if base < 8 => {
            for burst in 0..=export.burst_count {
                let gpr = export.src_gpr + burst;
                let Some(target) = e.regs().color_target_for_export(base + burst) else {
                    tracing::debug!(export_index = base + burst, "color export without a render target");
                    continue;
                };
                if target == 0 && e.regs().alpha_test.enable {
                    emit_alpha_test(e, gpr, &export.comp_sel);
                }
                let target_type = match e.regs().color_target_formats[target] {
                    ColorFormat::None => continue,
                    ColorFormat::Float => DataType::Float,
                    ColorFormat::Int => DataType::SignedInt,
                    ColorFormat::Uint => DataType::UnsignedInt,
                };
                let value = export_read(e, gpr, &export.comp_sel, DataType::Float);
                let value = e.cast(&value, DataType::Float, target_type, 4);
                let output = e.syntax.output(&format!("passPixelColor{target}"));
                e.w.line(&format!("{output} = {value};"));
            }
        }
        (ExportType::Pixel, EXPORT_BASE_POINT_SIZE_OR_DEPTH) => {
            if e.dialect == Dialect::Msl && !e.regs().depth_write {
                return;
            }
            let value = export_read(e, export.src_gpr, &export.comp_sel, DataType::Float);
            let target = match e.dialect {
                Dialect::Glsl => "gl_FragDepth".to_string(),
                Dialect::Msl => e.syntax.output("passDepth"),
            };
            e.w.line(&format!("{target} = {value}.x;"));
        }
        (export_type, base) => e.unsupported(
            Some(cf.word_index()),
            format!("{export_type:?} export to array base {base}"),
        ),
    }
}

fn emit_alpha_test(e: &mut Emitter<'_>, gpr: u32, comp_sel: &[u8; 4]) {
    let func = e.regs().alpha_test.func;
    if func == CompareFunc::Never {
        e.w.line(e.syntax.discard());
        return;
    }
    let Some(operator) = func.operator() else {
        return;
    };
    let value = export_read(e, gpr, comp_sel, DataType::Float);
    let reference = e.uniform_var("alphaTestRef");
    e.w.line(&format!(
        "if( (({value}).a {operator} {reference}) == false) {}",
        e.syntax.discard()
    ));
}

/// Bytes one vertex occupies in the GS ring.
fn ring_bytes_per_vertex(e: &Emitter<'_>) -> u32 {
    (e.regs().gs_vert_itemsize * 4).max(1)
}

/// `MEM_RING` writes: vertex shader outputs for the geometry shader, or geometry shader outputs
/// resolved through the copy shader.
pub(super) fn emit_ring_write(e: &mut Emitter<'_>, cf: &CfInstruction, write: &MemWrite) -> Result<(), CompileError> {
    match e.stage() {
        ShaderStage::Vertex => {
            emit_vs_ring_write(e, cf, write);
            Ok(())
        }
        ShaderStage::Geometry => emit_gs_ring_write(e, cf, write),
        ShaderStage::Pixel => {
            e.unsupported(Some(cf.word_index()), "ring write in pixel shader");
            Ok(())
        }
    }
}

fn emit_vs_ring_write(e: &mut Emitter<'_>, cf: &CfInstruction, write: &MemWrite) {
    if write.elem_size != 3 || write.array_base & 3 != 0 {
        e.unsupported(
            Some(cf.word_index()),
            format!(
                "ring write with element size {} at dword {}",
                write.elem_size, write.array_base
            ),
        );
        return;
    }
    let letters = mask_letters(write.comp_mask);
    if letters.is_empty() {
        return;
    }
    for burst in 0..=write.burst_count {
        let parameter = write.array_base / 4 + burst;
        let value = masked_read(e, write.src_gpr + burst, write.comp_mask, DataType::SignedInt);
        let target = match e.dialect {
            Dialect::Glsl => format!("v2g.passV2GParameter{parameter}"),
            Dialect::Msl => format!("out.passParameter{parameter}"),
        };
        e.w.line(&format!("{target}.{letters} = {value};"));
    }
}

fn emit_gs_ring_write(e: &mut Emitter<'_>, cf: &CfInstruction, write: &MemWrite) -> Result<(), CompileError> {
    let Some(copy_shader) = e.input.copy_shader else {
        return Err(CompileError::unresolved(
            write.array_base * 4,
            "geometry shader ring write without a copy shader",
        ));
    };
    let bytes_per_vertex = ring_bytes_per_vertex(e);
    let analysis = e.analysis();

    // `has_streamout_write` is set from the copy shader's stream writes, so this gate is the
    // register enable whenever the copy shader streams anything.
    if analysis.has_streamout_enable && analysis.has_streamout_write {
        // Stream-out replaces the regular outputs.
        let via_ssbo = analysis.use_ssbo_for_streamout;
        for burst in 0..=write.burst_count {
            let offset = (write.array_base * 4 + burst * 16) % bytes_per_vertex;
            let mut matched = false;
            for stream_write in copy_shader.stream_writes_for_offset(offset) {
                matched = true;
                for i in 0..4 {
                    if !write.comp_mask.contains(ChannelMask::channel(i)) {
                        continue;
                    }
                    let slot = e.syntax.stream_out_slot(
                        u32::from(stream_write.buffer),
                        stream_write.array_base + i as u32,
                        via_ssbo,
                    );
                    let source = format!("{}.{}", e.reg(write.src_gpr + burst), channel_name(i));
                    let value = e.cast(&source, e.ty(), DataType::SignedInt, 1);
                    e.w.line(&format!("{slot} = {value};"));
                }
            }
            if !matched {
                return Err(CompileError::unresolved(
                    offset,
                    "ring write does not match any copy shader stream write",
                ));
            }
        }
        return Ok(());
    }

    let letters = mask_letters(write.comp_mask);
    if letters.is_empty() {
        return Ok(());
    }
    let base_offset = (write.array_base * 4) % bytes_per_vertex;
    for burst in 0..=write.burst_count {
        let offset = base_offset + burst * (write.elem_size + 1) * 4;
        let Some(export) = copy_shader.export_for_offset(offset) else {
            return Err(CompileError::unresolved(
                offset,
                "ring write does not match any copy shader export",
            ));
        };
        let value = masked_read(e, write.src_gpr + burst, write.comp_mask, DataType::Float);
        match (export.export_type, export.index) {
            (ExportType::Position, EXPORT_BASE_POSITION) => {
                let vec4 = e.vector(DataType::Float, 4);
                e.w.open("");
                e.w.line(&format!("{vec4} pos = {vec4}(0.0,0.0,0.0,1.0);"));
                e.w.line(&format!("pos.{letters} = {value};"));
                e.w.line("SET_POSITION(pos);");
                e.w.close("");
            }
            (ExportType::Parameter, index) if index < MAX_GS_PARAMETERS => {
                let target = match e.dialect {
                    Dialect::Glsl => format!("passG2PParameter{index}"),
                    Dialect::Msl => format!("out.passParameterSem{index}"),
                };
                e.w.line(&format!("{target}.{letters} = {value};"));
            }
            (export_type, index) => e.unsupported(
                Some(cf.word_index()),
                format!("ring write to {export_type:?} export {index}"),
            ),
        }
    }
    Ok(())
}

/// `MEM_STREAM*` writes from a vertex shader.
pub(super) fn emit_stream_write(e: &mut Emitter<'_>, buffer: u8, write: &MemWrite) {
    if !e.analysis().has_streamout_enable {
        tracing::trace!(buffer, "stream-out disabled, dropping stream write");
        return;
    }
    let via_ssbo = e.analysis().use_ssbo_for_streamout;
    let count = (write.array_size + 1).min(4) as usize;
    for i in 0..count {
        if !write.comp_mask.contains(ChannelMask::channel(i)) {
            continue;
        }
        let slot = e
            .syntax
            .stream_out_slot(u32::from(buffer), write.array_base + i as u32, via_ssbo);
        let source = format!("{}.{}", e.reg(write.src_gpr), channel_name(i));
        let value = e.cast(&source, e.ty(), DataType::SignedInt, 1);
        e.w.line(&format!("{slot} = {value};"));
    }
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{cf_inst, cf_mem_write, cf_op, Export, ProgramBuilder};
    use gpu7_isa::{ChannelMask, ColorFormat, CompareFunc, ExportType, RegisterState, ShaderStage};

    use crate::compile::CompileOptions;
    use crate::copy_shader::{CopyShader, CopyShaderParam, ParamExport, StreamWrite};
    use crate::emit::test_support::Fixture;
    use crate::emit::Dialect;
    use crate::error::CompileError;

    fn exporting(export: Export) -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, export.done().end().encode());
        builder
    }

    fn pixel(regs: RegisterState) -> Fixture {
        Fixture::build(
            &exporting(Export::new(0, 0, 0)),
            ShaderStage::Pixel,
            regs,
            CompileOptions::default(),
            None,
            None,
        )
    }

    #[test]
    fn color_export_without_alpha_test() {
        let glsl = pixel(RegisterState::default()).glsl().source;
        assert!(glsl.contains("// export"));
        assert!(glsl.contains("passPixelColor0 = vec4(R0f.x, R0f.y, R0f.z, R0f.w);"), "{glsl}");
        let color_writes = glsl
            .lines()
            .filter(|line| line.trim_start().starts_with("passPixelColor") && line.contains(" = "))
            .count();
        assert_eq!(color_writes, 1, "{glsl}");
        assert!(!glsl.contains("discard"));
    }

    #[test]
    fn alpha_test_discards_failing_fragments() {
        let mut regs = RegisterState::default();
        regs.alpha_test.enable = true;
        regs.alpha_test.func = CompareFunc::Greater;
        let fixture = pixel(regs.clone());
        let glsl = fixture.glsl().source;
        assert!(glsl.contains(
            "if( ((vec4(R0f.x, R0f.y, R0f.z, R0f.w)).a > uf_alphaTestRef) == false) discard;"
        ));
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("> supportBuffer.alphaTestRef) == false) discard_fragment();"));

        regs.alpha_test.func = CompareFunc::Never;
        let never = pixel(regs).glsl().source;
        assert!(never.contains("discard;"));
        assert!(!never.contains("uf_alphaTestRef) == false"));
    }

    #[test]
    fn integer_render_target_gets_a_cast() {
        let mut regs = RegisterState::default();
        regs.color_target_formats[0] = ColorFormat::Uint;
        let glsl = pixel(regs).glsl().source;
        assert!(glsl.contains("passPixelColor0 = floatBitsToUint(vec4(R0f.x, R0f.y, R0f.z, R0f.w));"));
    }

    #[test]
    fn position_with_disabled_viewport_scale() {
        let mut regs = RegisterState::default();
        regs.viewport_scale_enable = [false, false, true];
        let fixture = Fixture::build(
            &exporting(Export::new(1, 60, 0)),
            ShaderStage::Vertex,
            regs,
            CompileOptions::default(),
            None,
            None,
        );
        let glsl = fixture.glsl().source;
        assert!(glsl.contains("vec4 finalPos = vec4(R0f.x, R0f.y, R0f.z, R0f.w);"));
        assert!(glsl.contains("finalPos.xy = finalPos.xy * uf_windowSpaceToClipSpaceTransform - vec2(1.0,1.0);"));
        assert!(glsl.contains("SET_POSITION(finalPos);"));
    }

    #[test]
    fn parameter_without_semantic_is_skipped() {
        let mut regs = RegisterState::default();
        regs.vs_output_semantic[0] = 0xFF;
        regs.vs_output_semantic[1] = 7;
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, Export::new(2, 0, 1).burst(1).encode())
            .cf(1, Export::new(1, 60, 0).done().end().encode());
        let fixture = Fixture::build(&builder, ShaderStage::Vertex, regs, CompileOptions::default(), None, None);
        let glsl = fixture.glsl().source;
        assert!(glsl.contains("// skipped export to semanticId 255"));
        assert!(glsl.contains("passParameterSem7 = vec4(R2f.x, R2f.y, R2f.z, R2f.w);"));
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("out.passParameterSem7 = float4(R2f.x, R2f.y, R2f.z, R2f.w);"));
    }

    fn gs_ring_program() -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_mem_write(cf_op::MEM_RING, 4, 0xF, 1, 0))
            .cf(1, cf_inst(cf_op::EMIT_VERTEX, 0, 1, false))
            .cf(2, cf_inst(cf_op::NOP, 0, 1, true));
        builder
    }

    fn gs_fixture(regs: RegisterState, copy_shader: CopyShader) -> Fixture {
        let options = CompileOptions {
            uses_geometry_shader: true,
            ..CompileOptions::default()
        };
        Fixture::build(&gs_ring_program(), ShaderStage::Geometry, regs, options, None, Some(copy_shader))
    }

    #[test]
    fn gs_ring_write_resolves_copy_shader_parameter() {
        let regs = RegisterState {
            gs_vert_itemsize: 8,
            ..RegisterState::default()
        };
        let copy_shader = CopyShader {
            params: vec![CopyShaderParam {
                offset: 16,
                gpr: 2,
                export: ParamExport {
                    export_type: ExportType::Parameter,
                    index: 3,
                },
            }],
            stream_writes: Vec::new(),
        };
        let glsl = gs_fixture(regs, copy_shader).glsl().source;
        assert!(glsl.contains("passG2PParameter3.xyzw = vec4(R1f.x, R1f.y, R1f.z, R1f.w);"), "{glsl}");
    }

    #[test]
    fn gs_streamout_with_unmatched_offset_fails() {
        let regs = RegisterState {
            gs_vert_itemsize: 8,
            streamout_enable: true,
            ..RegisterState::default()
        };
        let copy_shader = CopyShader {
            params: Vec::new(),
            stream_writes: vec![StreamWrite {
                buffer: 0,
                offset: 0,
                array_base: 0,
                array_size: 3,
                comp_mask: ChannelMask::all(),
            }],
        };
        let err = gs_fixture(regs, copy_shader).emit(Dialect::Glsl).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedReference { offset: 16, .. }), "{err:?}");
    }

    fn streaming_copy_shader() -> CopyShader {
        CopyShader {
            params: vec![CopyShaderParam {
                offset: 16,
                gpr: 2,
                export: ParamExport {
                    export_type: ExportType::Parameter,
                    index: 3,
                },
            }],
            stream_writes: vec![StreamWrite {
                buffer: 1,
                offset: 16,
                array_base: 2,
                array_size: 4,
                comp_mask: ChannelMask::all(),
            }],
        }
    }

    fn slot_writes<'s>(source: &'s str, prefix: &str) -> Vec<&'s str> {
        source
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with(prefix) && line.contains("] = "))
            .collect()
    }

    #[test]
    fn gs_streamout_with_matched_offset_writes_the_buffer() {
        let regs = RegisterState {
            gs_vert_itemsize: 8,
            streamout_enable: true,
            ..RegisterState::default()
        };
        let fixture = gs_fixture(regs, streaming_copy_shader());
        let glsl = fixture.glsl().source;
        assert_eq!(
            slot_writes(&glsl, "sb"),
            vec![
                "sb1[2] = floatBitsToInt(R1f.x);",
                "sb1[3] = floatBitsToInt(R1f.y);",
                "sb1[4] = floatBitsToInt(R1f.z);",
                "sb1[5] = floatBitsToInt(R1f.w);",
            ],
            "{glsl}"
        );
        assert!(!glsl.contains("passG2PParameter3.xyzw ="));

        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert_eq!(
            slot_writes(&msl, "sb["),
            vec![
                "sb[sbBase1 + 2] = as_type<int>(R1f.x);",
                "sb[sbBase1 + 3] = as_type<int>(R1f.y);",
                "sb[sbBase1 + 4] = as_type<int>(R1f.z);",
                "sb[sbBase1 + 5] = as_type<int>(R1f.w);",
            ],
            "{msl}"
        );
    }

    #[test]
    fn gs_streamout_through_storage_buffer() {
        let regs = RegisterState {
            gs_vert_itemsize: 8,
            streamout_enable: true,
            ..RegisterState::default()
        };
        let options = CompileOptions {
            uses_geometry_shader: true,
            tf_via_ssbo: true,
            ..CompileOptions::default()
        };
        let fixture = Fixture::build(
            &gs_ring_program(),
            ShaderStage::Geometry,
            regs,
            options,
            None,
            Some(streaming_copy_shader()),
        );
        let glsl = fixture.glsl().source;
        let writes = slot_writes(&glsl, "sb_buffer[");
        assert_eq!(writes.len(), 4, "{glsl}");
        assert_eq!(writes[0], "sb_buffer[sbBase1 + 2] = floatBitsToInt(R1f.x);");
        assert!(writes.iter().all(|line| line.starts_with("sb_buffer[sbBase1 + ")));
    }

    #[test]
    fn gs_stream_writes_are_ignored_while_streamout_is_disabled() {
        let regs = RegisterState {
            gs_vert_itemsize: 8,
            ..RegisterState::default()
        };
        let glsl = gs_fixture(regs, streaming_copy_shader()).glsl().source;
        assert!(glsl.contains("passG2PParameter3.xyzw = vec4(R1f.x, R1f.y, R1f.z, R1f.w);"), "{glsl}");
        assert!(slot_writes(&glsl, "sb").is_empty(), "{glsl}");
    }

    #[test]
    fn vertex_stream_write_targets_the_buffer() {
        let regs = RegisterState {
            streamout_enable: true,
            streamout_vertex_stride: [4, 0, 0, 0],
            ..RegisterState::default()
        };
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_mem_write(cf_op::MEM_STREAM0, 0, 0x3, 1, 0))
            .cf(1, Export::new(1, 60, 0).done().end().encode());
        let glsl = Fixture::build(&builder, ShaderStage::Vertex, regs, CompileOptions::default(), None, None)
            .glsl()
            .source;
        assert!(glsl.contains("sb0[0] = floatBitsToInt(R1f.x);"), "{glsl}");
        assert!(!glsl.contains("sb0[1]"));
    }
}
