//! GLSL program shell. One source serves OpenGL and Vulkan: everything that differs is routed
//! through macros defined under `#ifdef VULKAN`.

use gpu7_isa::{
    ColorFormat, ExportType, GsOutputPrimitive, PrimitiveMode, PsInputSemantic, ShaderStage, TextureDim,
    NUM_STREAMOUT_BUFFERS,
};

use super::{attr, cf, helpers, locals, uniform_layout, Emitter, FieldType, LayoutFlavor, UniformField};
use crate::analyze::UniformMode;
use crate::binding::outputs_final_vertices;
use crate::error::CompileError;

/// `SPV_ExecutionModeRoundingModeRTE`.
const SPIRV_ROUNDING_MODE_RTE: u32 = 4462;

pub(super) fn emit_program(e: &mut Emitter<'_>) -> Result<(), CompileError> {
    let analysis = e.analysis();
    let stage = e.stage();

    e.w.line("#version 430");
    e.w.line("#extension GL_ARB_texture_gather : enable");
    e.w.line("#extension GL_ARB_separate_shader_objects : enable");
    if analysis.has_streamout_write || e.uses_gs() {
        e.w.line("#extension GL_ARB_enhanced_layouts : enable");
    }
    e.w.line(&format!("// shader {:016x}", e.input.hash));

    emit_macros(e);
    if stage == ShaderStage::Geometry {
        emit_gs_primitives(e);
    }
    emit_uniform_vars(e);
    emit_uniform_buffers(e);
    emit_textures(e);
    emit_attributes(e);
    emit_per_vertex(e);
    emit_stage_io(e);
    emit_stream_out_outputs(e);
    helpers::emit_helper_functions(e);

    e.w.line("void main()");
    e.w.line("{");
    e.w.indent();
    locals::emit_locals(e);
    attr::emit_stage_inputs(e);
    let program = e.input.program;
    cf::emit_cf_list(e, &program.cf)?;
    if stage == ShaderStage::Geometry {
        e.w.line("EndPrimitive();");
    }
    if stage == ShaderStage::Vertex
        && !e.uses_gs()
        && analysis.output_point_size
        && !analysis.writes_point_size
    {
        let line = format!("gl_PointSize = {};", e.uniform_var("pointSize"));
        e.w.line(&line);
    }
    e.w.close("");
    Ok(())
}

fn emit_macros(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    let stage = e.stage();
    let gs = e.uses_gs();
    let emits_vertices = stage != ShaderStage::Pixel;

    e.w.line("#ifdef VULKAN");
    e.w.line("#define ATTR_LAYOUT(__vkSet, __location) layout(location = __location)");
    e.w.line("#define UNIFORM_BUFFER_LAYOUT(__glLocation, __vkSet, __vkLocation) layout(set = __vkSet, binding = __vkLocation, std140)");
    e.w.line("#define TEXTURE_LAYOUT(__glLocation, __vkSet, __vkLocation) layout(set = __vkSet, binding = __vkLocation)");
    if emits_vertices {
        if stage == ShaderStage::Vertex {
            e.w.line("#define gl_VertexID gl_VertexIndex");
            e.w.line("#define gl_InstanceID gl_InstanceIndex");
        }
        if analysis.has_streamout_write {
            e.w.line("#define XFB_BLOCK_LAYOUT(__bufferIndex, __stride, __location) layout(xfb_buffer = __bufferIndex, xfb_stride = __stride, location = __location)");
        }
        if e.regs().dx_clip_space {
            e.w.line("#define SET_POSITION(_v) gl_Position = _v");
        } else {
            e.w.line("#define SET_POSITION(_v) gl_Position = _v; gl_Position.z = (gl_Position.z + gl_Position.w) / 2.0");
        }
        if gs {
            e.w.line("#define V2G_LAYOUT layout(location = 0)");
        }
    } else {
        e.w.line("#define GET_FRAGCOORD() vec4(gl_FragCoord.xy*uf_fragCoordScale.xy,gl_FragCoord.z, 1.0/gl_FragCoord.w)");
    }
    if let Some(widths) = e.input.options.spirv_rounding_mode_rte {
        e.w.line("#extension GL_EXT_spirv_intrinsics: enable");
        for width in widths.bit_widths() {
            e.w.line(&format!("spirv_execution_mode({SPIRV_ROUNDING_MODE_RTE}, {width});"));
        }
    }

    e.w.line("#else");
    e.w.line("#define ATTR_LAYOUT(__vkSet, __location) layout(location = __location)");
    e.w.line("#define UNIFORM_BUFFER_LAYOUT(__glLocation, __vkSet, __vkLocation) layout(binding = __glLocation, std140)");
    e.w.line("#define TEXTURE_LAYOUT(__glLocation, __vkSet, __vkLocation) layout(binding = __glLocation)");
    if emits_vertices {
        if analysis.has_streamout_write {
            e.w.line("#define XFB_BLOCK_LAYOUT(__bufferIndex, __stride, __location) layout(xfb_buffer = __bufferIndex, xfb_stride = __stride)");
        }
        e.w.line("#define SET_POSITION(_v) gl_Position = _v");
        if gs {
            e.w.line("#define V2G_LAYOUT");
        }
    } else {
        e.w.line("#define GET_FRAGCOORD() vec4(gl_FragCoord.xy*uf_fragCoordScale,gl_FragCoord.zw)");
    }
    e.w.line("#endif");
}

fn emit_gs_primitives(e: &mut Emitter<'_>) {
    let input = match e.regs().primitive_mode {
        PrimitiveMode::Points => "points",
        PrimitiveMode::Triangles => "triangles",
        PrimitiveMode::LineStrip => "lines_adjacency",
        other => {
            e.assumption(None, format!("geometry shader input primitive {other:?}"));
            "triangles"
        }
    };
    e.w.line(&format!("layout({input}) in;"));
    let output = match e.regs().gs_output_primitive {
        GsOutputPrimitive::Points => "points",
        GsOutputPrimitive::LineStrip => "line_strip",
        GsOutputPrimitive::TriangleStrip => "triangle_strip",
        GsOutputPrimitive::Other(raw) => {
            e.assumption(None, format!("geometry shader output primitive {raw}"));
            "triangle_strip"
        }
    };
    let max_vertices = e.gs_max_vertices();
    e.w.line(&format!("layout ({output}, max_vertices = {max_vertices}) out;"));
}

fn field_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::IVec4 => "ivec4",
        FieldType::Vec4 => "vec4",
        FieldType::Vec2 => "vec2",
        FieldType::Float => "float",
        FieldType::Int => "int",
    }
}

fn field_declaration(stage: ShaderStage, field: &UniformField) -> String {
    let stage_suffix = if field.per_stage { stage.suffix() } else { "" };
    let array = field.array_len.map(|len| format!("[{len}]")).unwrap_or_default();
    format!("{} uf_{}{stage_suffix}{array};", field_type(field.ty), field.name)
}

/// Special uniforms. A `ufBlock` uniform block for Vulkan, loose uniforms for OpenGL.
fn emit_uniform_vars(e: &mut Emitter<'_>) {
    let stage = e.stage();
    let vk_layout = uniform_layout(e.input, LayoutFlavor::Vk);
    let gl_layout = uniform_layout(e.input, LayoutFlavor::Gl);
    let vk = &e.input.bindings.vk;
    if vk_layout.fields.is_empty() && gl_layout.fields.is_empty() {
        return;
    }
    e.w.line("#ifdef VULKAN");
    if let (Some(set), Some(binding)) = (vk.set_index, vk.uniform_vars) {
        if !vk_layout.fields.is_empty() {
            e.w.line(&format!("layout(set = {set}, binding = {binding}) uniform ufBlock"));
            e.w.line("{");
            for field in &vk_layout.fields {
                e.w.line(&field_declaration(stage, field));
            }
            e.w.line("};");
        }
    }
    e.w.line("#else");
    for field in &gl_layout.fields {
        e.w.line(&format!("uniform {}", field_declaration(stage, field)));
    }
    e.w.line("#endif");
}

/// Uniform buffers, declared only when a bank is indexed dynamically.
fn emit_uniform_buffers(e: &mut Emitter<'_>) {
    if e.analysis().uniform_mode != UniformMode::FullCBank {
        return;
    }
    let suffix = e.stage().suffix();
    let bindings = e.input.bindings;
    let set = bindings.vk.set_index.unwrap_or(0);
    for buffer in 0..bindings.gl.uniform_buffers.len() {
        let (Some(gl), Some(vk)) = (bindings.gl.uniform_buffers[buffer], bindings.vk.uniform_buffers[buffer]) else {
            continue;
        };
        let size = e.input.sizes.uniform_buffers[buffer];
        e.w.line(&format!("UNIFORM_BUFFER_LAYOUT({gl}, {set}, {vk}) uniform uniformBlock{suffix}{buffer}"));
        e.w.line("{");
        e.w.line(&format!("vec4 uf_block{suffix}{buffer}[{size}];"));
        e.w.line("};");
    }
}

fn sampler_type(dim: TextureDim, integer: bool, shadow: bool) -> String {
    let prefix = if integer { "u" } else { "" };
    let base = match dim {
        TextureDim::Dim1D => "sampler1D",
        TextureDim::Dim2D | TextureDim::Dim2DMsaa => "sampler2D",
        TextureDim::Dim1DArray => "sampler1DArray",
        TextureDim::Dim2DArray | TextureDim::Dim2DArrayMsaa => "sampler2DArray",
        TextureDim::Cubemap => "samplerCubeArray",
        TextureDim::Dim3D => "sampler3D",
    };
    let shadow = if shadow { "Shadow" } else { "" };
    format!("{prefix}{base}{shadow}")
}

fn emit_textures(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    let suffix = e.stage().suffix();
    let bindings = e.input.bindings;
    let set = bindings.vk.set_index.unwrap_or(0);
    for unit in analysis.used_texture_units() {
        let (Some(gl), Some(vk)) = (bindings.gl.textures[unit], bindings.vk.textures[unit]) else {
            continue;
        };
        let usage = &analysis.textures[unit];
        let ty = sampler_type(usage.dim, usage.integer_format, usage.depth_compare);
        e.w.line(&format!("TEXTURE_LAYOUT({gl}, {set}, {vk}) uniform {ty} textureUnit{suffix}{unit};"));
    }
}

fn emit_attributes(e: &mut Emitter<'_>) {
    if e.stage() != ShaderStage::Vertex {
        return;
    }
    let bindings = e.input.bindings;
    let set = bindings.vk.set_index.unwrap_or(0);
    for attribute in &bindings.gl.attributes {
        e.w.line(&format!(
            "ATTR_LAYOUT({set}, {}) in uvec4 attrDataSem{};",
            attribute.location, attribute.semantic_id
        ));
    }
}

fn emit_per_vertex(e: &mut Emitter<'_>) {
    if !outputs_final_vertices(e.stage(), e.input.options) {
        return;
    }
    e.w.line("out gl_PerVertex");
    e.w.line("{");
    e.w.line("vec4 gl_Position;");
    if e.analysis().output_point_size {
        e.w.line("float gl_PointSize;");
    }
    e.w.line("};");
}

fn interpolation(flat: bool, no_perspective: bool) -> String {
    let mut qualifiers = String::new();
    if flat {
        qualifiers.push_str("flat ");
    }
    if no_perspective {
        qualifiers.push_str("noperspective ");
    }
    qualifiers
}

fn emit_stage_io(e: &mut Emitter<'_>) {
    match (e.stage(), e.uses_gs()) {
        (ShaderStage::Vertex, false) => emit_vs_parameter_outputs(e),
        (ShaderStage::Vertex, true) => {
            let count = e.analysis().ring_parameter_count;
            emit_v2g_block(e, "out", count, "v2g;");
        }
        (ShaderStage::Geometry, _) => {
            let count = e.input.vs_ring_parameter_count;
            emit_v2g_block(e, "in", count, "v2g[];");
            emit_gs_parameter_outputs(e);
        }
        (ShaderStage::Pixel, gs) => {
            emit_ps_parameter_inputs(e, gs);
            emit_ps_color_outputs(e);
        }
    }
}

/// Parameters without a matching pixel shader input still get declared, past the input table.
fn emit_vs_parameter_outputs(e: &mut Emitter<'_>) {
    let regs = e.regs();
    let mask = e.analysis().output_parameter_mask;
    let mut next_free = regs.ps_inputs.inputs.len();
    let mut declared = Vec::new();
    for index in 0..32u32 {
        if mask & (1 << index) == 0 {
            continue;
        }
        let semantic = regs.vs_output_semantic_id(index);
        if semantic == 0xFF || declared.contains(&semantic) {
            continue;
        }
        declared.push(semantic);
        let line = match regs.ps_inputs.find_parameter(semantic) {
            Some(location) => {
                let input = &regs.ps_inputs.inputs[location];
                format!(
                    "layout(location = {location}) {}out vec4 passParameterSem{semantic};",
                    interpolation(input.flat, input.no_perspective)
                )
            }
            None => {
                let location = next_free;
                next_free += 1;
                format!("layout(location = {location}) out vec4 passParameterSem{semantic};")
            }
        };
        e.w.line(&line);
    }
}

fn emit_v2g_block(e: &mut Emitter<'_>, direction: &str, count: u32, instance: &str) {
    e.w.line(&format!("V2G_LAYOUT {direction} Vertex"));
    e.w.line("{");
    for parameter in 0..count {
        e.w.line(&format!("ivec4 passV2GParameter{parameter};"));
    }
    e.w.line(&format!("}}{instance}"));
}

fn emit_gs_parameter_outputs(e: &mut Emitter<'_>) {
    let Some(copy_shader) = e.input.copy_shader else {
        return;
    };
    let mut declared = Vec::new();
    for param in &copy_shader.params {
        if param.export.export_type != ExportType::Parameter || declared.contains(&param.export.index) {
            continue;
        }
        declared.push(param.export.index);
        let index = param.export.index;
        e.w.line(&format!("layout(location = {}) out vec4 passG2PParameter{index};", index & 0x7F));
    }
}

fn emit_ps_parameter_inputs(e: &mut Emitter<'_>, gs: bool) {
    let regs = e.regs();
    for (location, input) in regs.ps_inputs.inputs.iter().enumerate() {
        let PsInputSemantic::Parameter(semantic) = input.semantic else {
            continue;
        };
        let qualifiers = interpolation(input.flat, input.no_perspective);
        let line = if gs {
            let index = semantic & 0x7F;
            format!("layout(location = {index}) {qualifiers}in vec4 passG2PParameter{index};")
        } else {
            format!("layout(location = {location}) {qualifiers}in vec4 passParameterSem{semantic};")
        };
        e.w.line(&line);
    }
}

fn emit_ps_color_outputs(e: &mut Emitter<'_>) {
    let mask = e.analysis().color_output_mask;
    for target in 0..e.regs().color_target_formats.len() {
        if mask & (1 << target) == 0 {
            continue;
        }
        let ty = match e.regs().color_target_formats[target] {
            ColorFormat::Int => "ivec4",
            ColorFormat::Uint => "uvec4",
            ColorFormat::Float | ColorFormat::None => "vec4",
        };
        e.w.line(&format!("layout(location = {target}) out {ty} passPixelColor{target};"));
    }
}

/// Transform feedback targets: a storage buffer when stream-out goes through memory, xfb
/// blocks otherwise.
fn emit_stream_out_outputs(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    if !outputs_final_vertices(e.stage(), e.input.options)
        || !analysis.has_streamout_enable
        || !analysis.has_streamout_write
    {
        return;
    }
    if analysis.use_ssbo_for_streamout {
        let vk = &e.input.bindings.vk;
        if let (Some(set), Some(binding)) = (vk.set_index, vk.tf_storage) {
            e.w.line(&format!("layout(set = {set}, binding = {binding}) buffer StreamoutBuffer"));
            e.w.line("{");
            e.w.line("int sb_buffer[];");
            e.w.line("};");
        }
        return;
    }
    let mut location = 0u32;
    for buffer in 0..NUM_STREAMOUT_BUFFERS {
        if analysis.streamout_write_mask & (1 << buffer) == 0 {
            continue;
        }
        let stride = analysis.streamout_buffer_stride[buffer];
        e.w.line(&format!("XFB_BLOCK_LAYOUT({buffer}, {stride}, {location}) out XfbBlock{buffer}"));
        e.w.line("{");
        e.w.line(&format!(
            "layout(xfb_buffer = {buffer}, xfb_offset = 0) int sb{buffer}[{}];",
            stride / 4
        ));
        e.w.line("};");
        location += stride / 4;
    }
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{alu_op, cf_alu, cf_inst, cf_op, sel, Alu, Export, ProgramBuilder, Sample};
    use gpu7_isa::{PsInput, PsInputTable, RegisterState};

    use super::*;
    use crate::compile::{CompileOptions, RteWidths};
    use crate::emit::test_support::Fixture;

    fn balanced(source: &str) -> bool {
        source.matches('{').count() == source.matches('}').count()
    }

    fn pixel_passthrough() -> ProgramBuilder {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).done().end().encode());
        builder
    }

    #[test]
    fn pixel_shell_layout() {
        let mut regs = RegisterState::default();
        regs.ps_inputs = PsInputTable {
            inputs: vec![PsInput {
                semantic: PsInputSemantic::Parameter(5),
                flat: true,
                no_perspective: false,
            }],
            point_sprite_gpr: None,
        };
        let fixture = Fixture::build(&pixel_passthrough(), ShaderStage::Pixel, regs, CompileOptions::default(), None, None);
        let glsl = fixture.glsl().source;
        assert!(glsl.starts_with("#version 430\r\n"));
        assert!(glsl.contains("// shader 0000000000001234\r\n"));
        assert!(glsl.contains("#define GET_FRAGCOORD() vec4(gl_FragCoord.xy*uf_fragCoordScale,gl_FragCoord.zw)"));
        assert!(glsl.contains("layout(set = 1, binding = 0) uniform ufBlock\r\n{\r\nvec4 uf_fragCoordScale;\r\n};"));
        assert!(glsl.contains("uniform vec2 uf_fragCoordScale;"));
        assert!(glsl.contains("layout(location = 0) flat in vec4 passParameterSem5;"));
        assert!(glsl.contains("layout(location = 0) out vec4 passPixelColor0;"));
        assert!(glsl.contains("R0f = passParameterSem5;"));
        assert!(glsl.contains("passPixelColor0 = vec4(R0f.x, R0f.y, R0f.z, R0f.w);"));
        assert!(!glsl.contains("gl_PerVertex"));
        assert!(balanced(&glsl));
    }

    #[test]
    fn vertex_shell_declares_uniforms_and_outputs() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 1))
            .cf(1, Export::new(1, 60, 0).done().encode())
            .cf(2, Export::new(2, 0, 1).done().end().encode())
            .alu(4, &[Alu::op2(alu_op::MOV).src(0, sel::cfile(3), 0).dst(1, 0).last().encode()]);
        let mut regs = RegisterState::default();
        regs.primitive_mode = PrimitiveMode::Points;
        let fixture = Fixture::build(&builder, ShaderStage::Vertex, regs, CompileOptions::default(), None, None);
        let glsl = fixture.glsl().source;
        assert!(glsl.contains("#define gl_VertexID gl_VertexIndex"));
        assert!(glsl.contains("#define SET_POSITION(_v) gl_Position = _v; gl_Position.z = (gl_Position.z + gl_Position.w) / 2.0"));
        assert!(glsl.contains("uniform ivec4 uf_remappedVS[1];"));
        assert!(glsl.contains("uniform float uf_pointSize;"));
        assert!(glsl.contains("out gl_PerVertex\r\n{\r\nvec4 gl_Position;\r\nfloat gl_PointSize;\r\n};"));
        assert!(glsl.contains("layout(location = 0) out vec4 passParameterSem0;"));
        assert!(glsl.contains("gl_PointSize = uf_pointSize;"));
        assert!(balanced(&glsl));
    }

    #[test]
    fn textures_use_stage_binding_bases() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::TEX, 4, 1, false))
            .cf(1, Export::new(0, 0, 1).done().end().encode())
            .tex(4, &[Sample::new(0x10, 2, 0, 1).encode()]);
        let glsl = Fixture::simple(&builder, ShaderStage::Pixel).glsl().source;
        assert!(glsl.contains("TEXTURE_LAYOUT(34, 1, 0) uniform sampler2D textureUnitPS2;"));
    }

    #[test]
    fn rounding_mode_goes_to_the_vulkan_branch() {
        let options = CompileOptions {
            spirv_rounding_mode_rte: Some(RteWidths::F32 | RteWidths::F64),
            ..CompileOptions::default()
        };
        let fixture = Fixture::build(&pixel_passthrough(), ShaderStage::Pixel, RegisterState::default(), options, None, None);
        let glsl = fixture.glsl().source;
        let vulkan = &glsl[glsl.find("#ifdef VULKAN").unwrap()..glsl.find("#else").unwrap()];
        assert!(vulkan.contains("spirv_execution_mode(4462, 32);\r\nspirv_execution_mode(4462, 64);"));
    }
}
