//! Metal program shell. Geometry shaders become a mesh pipeline: the vertex shader runs as the
//! object stage (pulling its own vertices and handing ring parameters over in the payload) and
//! the geometry shader runs as the mesh stage.

use gpu7_isa::{ColorFormat, ExportType, GsOutputPrimitive, PrimitiveMode, PsInputSemantic, ShaderStage, TextureDim};

use super::{attr, cf, helpers, locals, uniform_layout, Emitter, FieldType, LayoutFlavor};
use crate::analyze::{TextureUnitUsage, UniformMode};
use crate::binding::{mtl_vertex_buffer_slot, outputs_final_vertices};
use crate::error::CompileError;

/// Upper bound on vertices of one Metal mesh.
const MAX_MESH_VERTICES: u32 = 256;

pub(super) fn emit_program(e: &mut Emitter<'_>) -> Result<(), CompileError> {
    let stage = e.stage();
    let gs = e.uses_gs();

    e.w.line("#include <metal_stdlib>");
    e.w.line("using namespace metal;");
    e.w.line(&format!("// shader {:016x}", e.input.hash));

    emit_macros(e);
    emit_support_buffer(e);
    emit_uniform_buffers(e);
    match (stage, gs) {
        (ShaderStage::Vertex, false) => {
            emit_vertex_in(e, true);
            emit_vertex_out(e);
        }
        (ShaderStage::Vertex, true) => {
            emit_vertex_in(e, false);
            emit_object_payload(e);
        }
        (ShaderStage::Geometry, _) => {
            emit_object_payload(e);
            emit_geometry_out(e);
        }
        (ShaderStage::Pixel, _) => {
            emit_fragment_in(e, gs);
            emit_fragment_out(e);
        }
    }
    helpers::emit_helper_functions(e);

    emit_entry_point(e);
    e.w.line("{");
    e.w.indent();
    emit_prologue(e);
    locals::emit_locals(e);
    attr::emit_stage_inputs(e);
    let program = e.input.program;
    cf::emit_cf_list(e, &program.cf)?;
    emit_epilogue(e);
    e.w.close("");
    Ok(())
}

fn rasterizes(e: &Emitter<'_>) -> bool {
    e.regs().rasterization_enabled
}

fn vertices_per_primitive(mode: PrimitiveMode) -> u32 {
    match mode {
        PrimitiveMode::Points => 1,
        PrimitiveMode::Lines | PrimitiveMode::LineStrip => 2,
        _ => 3,
    }
}

/// Strip and fan topologies share vertices between consecutive primitives.
fn primitive_is_connected(mode: PrimitiveMode) -> bool {
    matches!(
        mode,
        PrimitiveMode::LineStrip | PrimitiveMode::TriangleStrip | PrimitiveMode::TriangleFan | PrimitiveMode::QuadStrip
    )
}

fn emit_macros(e: &mut Emitter<'_>) {
    let stage = e.stage();
    if e.uses_gs() && stage != ShaderStage::Pixel {
        let count = vertices_per_primitive(e.regs().primitive_mode);
        e.w.line(&format!("#define VERTICES_PER_VERTEX_PRIMITIVE {count}"));
    }
    if stage == ShaderStage::Geometry {
        let (topology, primitives) = match e.regs().gs_output_primitive {
            GsOutputPrimitive::Points => ("point", "(vertexCount / 1)"),
            GsOutputPrimitive::LineStrip => ("line", "(vertexCount - 1)"),
            GsOutputPrimitive::TriangleStrip => ("triangle", "(vertexCount - 2)"),
            GsOutputPrimitive::Other(raw) => {
                e.assumption(None, format!("geometry shader output primitive {raw}"));
                ("triangle", "(vertexCount - 2)")
            }
        };
        e.w.line(&format!("#define MTL_PRIMITIVE_TYPE {topology}"));
        e.w.line(&format!("#define GET_PRIMITIVE_COUNT(vertexCount) {primitives}"));
    }
    if outputs_final_vertices(stage, e.input.options) {
        if e.regs().dx_clip_space {
            e.w.line("#define SET_POSITION(_v) out.position = _v");
        } else {
            e.w.line("#define SET_POSITION(_v) out.position = _v; out.position.z = (out.position.z + out.position.w) / 2.0");
        }
    }
    if stage == ShaderStage::Pixel {
        e.w.line("#define GET_FRAGCOORD() float4(in.position.xy * supportBuffer.fragCoordScale.xy, in.position.z, 1.0 / in.position.w)");
    }
}

fn field_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::IVec4 => "int4",
        FieldType::Vec4 => "float4",
        FieldType::Vec2 => "float2",
        FieldType::Float => "float",
        FieldType::Int => "int",
    }
}

fn emit_support_buffer(e: &mut Emitter<'_>) {
    if e.input.bindings.mtl.uniform_vars.is_none() {
        return;
    }
    let layout = uniform_layout(e.input, LayoutFlavor::Mtl);
    e.w.line("struct SupportBuffer {");
    for field in &layout.fields {
        let array = field.array_len.map(|len| format!("[{len}]")).unwrap_or_default();
        e.w.line(&format!("{} {}{array};", field_type(field.ty), field.name));
    }
    e.w.line("};");
}

fn emit_uniform_buffers(e: &mut Emitter<'_>) {
    if e.analysis().uniform_mode != UniformMode::FullCBank {
        return;
    }
    let mtl = &e.input.bindings.mtl;
    for buffer in 0..mtl.uniform_buffers.len() {
        if mtl.uniform_buffers[buffer].is_none() {
            continue;
        }
        let size = e.input.sizes.uniform_buffers[buffer];
        e.w.line(&format!("struct UBuff{buffer} {{"));
        e.w.line(&format!("float4 d[{size}];"));
        e.w.line("};");
    }
}

/// Raw attribute words. With a vertex descriptor they carry attribute locations; the object
/// stage fills them by hand.
fn emit_vertex_in(e: &mut Emitter<'_>, descriptor: bool) {
    let attributes = &e.input.bindings.mtl.attributes;
    if attributes.is_empty() && descriptor {
        return;
    }
    e.w.line("struct VertexIn {");
    for attribute in attributes {
        let location = if descriptor {
            format!(" [[attribute({})]]", attribute.location)
        } else {
            String::new()
        };
        e.w.line(&format!("uint4 attrDataSem{}{location};", attribute.semantic_id));
    }
    e.w.line("};");
}

fn interpolation(flat: bool, no_perspective: bool) -> String {
    let mut attributes = String::new();
    if flat {
        attributes.push_str(" [[flat]]");
    }
    if no_perspective {
        attributes.push_str(" [[center_no_perspective]]");
    }
    attributes
}

/// Parameters without a matching pixel shader input are placed past the input table.
fn emit_vertex_out(e: &mut Emitter<'_>) {
    if !rasterizes(e) {
        return;
    }
    let regs = e.regs();
    let analysis = e.analysis();
    e.w.line("struct VertexOut {");
    e.w.line("float4 position [[position]];");
    if analysis.output_point_size {
        e.w.line("float pointSize [[point_size]];");
    }
    let mut next_free = regs.ps_inputs.inputs.len();
    let mut declared = Vec::new();
    for index in 0..32u32 {
        if analysis.output_parameter_mask & (1 << index) == 0 {
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
                    "float4 passParameterSem{semantic} [[user(locn{location})]]{};",
                    interpolation(input.flat, input.no_perspective)
                )
            }
            None => {
                let location = next_free;
                next_free += 1;
                format!("float4 passParameterSem{semantic} [[user(locn{location})]];")
            }
        };
        e.w.line(&line);
    }
    e.w.line("};");
}

/// Ring parameters handed from the object stage to the mesh stage.
fn emit_object_payload(e: &mut Emitter<'_>) {
    let count = match e.stage() {
        ShaderStage::Geometry => e.input.vs_ring_parameter_count,
        _ => e.analysis().ring_parameter_count,
    };
    e.w.line("struct VertexOut {");
    for parameter in 0..count {
        e.w.line(&format!("int4 passParameter{parameter};"));
    }
    e.w.line("};");
    e.w.line("struct ObjectPayload {");
    e.w.line("VertexOut vertexOut[VERTICES_PER_VERTEX_PRIMITIVE];");
    e.w.line("};");
}

fn emit_geometry_out(e: &mut Emitter<'_>) {
    e.w.line("struct GeometryOut {");
    e.w.line("float4 position [[position]];");
    if e.analysis().output_point_size {
        e.w.line("float pointSize [[point_size]];");
    }
    if let Some(copy_shader) = e.input.copy_shader {
        let mut declared = Vec::new();
        for param in &copy_shader.params {
            let index = param.export.index;
            if param.export.export_type != ExportType::Parameter || declared.contains(&index) {
                continue;
            }
            declared.push(index);
            e.w.line(&format!("float4 passParameterSem{index} [[user(locn{})]];", index & 0x7F));
        }
    }
    e.w.line("};");
    let vertices = e.gs_max_vertices().clamp(3, MAX_MESH_VERTICES);
    e.w.line(&format!(
        "using MeshType = mesh<GeometryOut, void, {vertices}, GET_PRIMITIVE_COUNT({vertices}), topology::MTL_PRIMITIVE_TYPE>;"
    ));
}

fn emit_fragment_in(e: &mut Emitter<'_>, gs: bool) {
    let regs = e.regs();
    e.w.line("struct FragmentIn {");
    e.w.line("float4 position [[position]];");
    for (location, input) in regs.ps_inputs.inputs.iter().enumerate() {
        let PsInputSemantic::Parameter(semantic) = input.semantic else {
            continue;
        };
        let line = if gs {
            let index = semantic & 0x7F;
            format!("float4 passParameterSem{index} [[user(locn{index})]];")
        } else {
            format!(
                "float4 passParameterSem{semantic} [[user(locn{location})]]{};",
                interpolation(input.flat, input.no_perspective)
            )
        };
        e.w.line(&line);
    }
    e.w.line("};");
}

fn emit_fragment_out(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    e.w.line("struct FragmentOut {");
    for target in 0..e.regs().color_target_formats.len() {
        if analysis.color_output_mask & (1 << target) == 0 {
            continue;
        }
        let ty = match e.regs().color_target_formats[target] {
            ColorFormat::None => continue,
            ColorFormat::Int => "int4",
            ColorFormat::Uint => "uint4",
            ColorFormat::Float => "float4",
        };
        e.w.line(&format!("{ty} passPixelColor{target} [[color({target})]];"));
    }
    if analysis.writes_depth && e.regs().depth_write {
        e.w.line("float passDepth [[depth(any)]];");
    }
    e.w.line("};");
}

fn texture_type(usage: &TextureUnitUsage) -> String {
    if usage.depth_compare {
        let base = match usage.dim {
            TextureDim::Dim2DArray | TextureDim::Dim2DArrayMsaa => "depth2d_array",
            TextureDim::Cubemap => "depthcube_array",
            _ => "depth2d",
        };
        return format!("{base}<float>");
    }
    let base = match usage.dim {
        TextureDim::Dim1D => "texture1d",
        TextureDim::Dim1DArray => "texture1d_array",
        TextureDim::Dim2D | TextureDim::Dim2DMsaa => "texture2d",
        TextureDim::Dim2DArray | TextureDim::Dim2DArrayMsaa => "texture2d_array",
        TextureDim::Cubemap => "texturecube_array",
        TextureDim::Dim3D => "texture3d",
    };
    let component = if usage.integer_format { "uint" } else { "float" };
    format!("{base}<{component}>")
}

/// Resource arguments shared by every entry point.
fn resource_arguments(e: &Emitter<'_>) -> Vec<String> {
    let mtl = &e.input.bindings.mtl;
    let analysis = e.analysis();
    let mut args = Vec::new();
    if let Some(slot) = mtl.uniform_vars {
        args.push(format!("constant SupportBuffer& supportBuffer [[buffer({slot})]]"));
    }
    if let Some(slot) = mtl.tf_storage {
        args.push(format!("device int* sb [[buffer({slot})]]"));
    }
    if analysis.uniform_mode == UniformMode::FullCBank {
        for (buffer, slot) in mtl.uniform_buffers.iter().enumerate() {
            if let Some(slot) = slot {
                args.push(format!("constant UBuff{buffer}& ubuff{buffer} [[buffer({slot})]]"));
            }
        }
    }
    for unit in analysis.used_texture_units() {
        let Some(slot) = mtl.textures[unit] else {
            continue;
        };
        let ty = texture_type(&analysis.textures[unit]);
        args.push(format!("{ty} tex{unit} [[texture({slot})]]"));
        args.push(format!("sampler samplr{unit} [[sampler({slot})]]"));
    }
    args
}

fn emit_entry_point(e: &mut Emitter<'_>) {
    let mtl = &e.input.bindings.mtl;
    let (header, mut args) = match (e.stage(), e.uses_gs()) {
        (ShaderStage::Vertex, false) => {
            let mut args = Vec::new();
            if !mtl.attributes.is_empty() {
                args.push("VertexIn in [[stage_in]]".to_string());
            }
            args.push("uint vid [[vertex_id]]".into());
            args.push("uint iid [[instance_id]]".into());
            let ret = if rasterizes(e) { "VertexOut" } else { "void" };
            (format!("vertex {ret} main0"), args)
        }
        (ShaderStage::Vertex, true) => {
            let mut args = vec![
                "object_data ObjectPayload& objectPayload [[payload]]".to_string(),
                "mesh_grid_properties meshGridProperties".into(),
                "uint tig [[threadgroup_position_in_grid]]".into(),
                "uint tid [[thread_index_in_threadgroup]]".into(),
            ];
            if let Some(slot) = mtl.vertices_per_instance {
                args.push(format!("constant uint& verticesPerInstance [[buffer({slot})]]"));
            }
            if let Some(slot) = mtl.index_buffer {
                args.push(format!("device uint* indexBuffer [[buffer({slot})]]"));
            }
            if let Some(slot) = mtl.index_type {
                args.push(format!("constant uchar& indexType [[buffer({slot})]]"));
            }
            for buffer in attr::pulled_vertex_buffers(e) {
                let slot = mtl_vertex_buffer_slot(buffer);
                args.push(format!("device uchar* vertexBuffer{buffer} [[buffer({slot})]]"));
            }
            (
                "[[object, max_total_threads_per_threadgroup(VERTICES_PER_VERTEX_PRIMITIVE), max_total_threadgroups_per_mesh_grid(1)]]\r\nvoid main0".to_string(),
                args,
            )
        }
        (ShaderStage::Geometry, _) => (
            "[[mesh, max_total_threads_per_threadgroup(1)]]\r\nvoid main0".to_string(),
            vec![
                "MeshType mesh".to_string(),
                "const object_data ObjectPayload& objectPayload [[payload]]".into(),
                "uint primitiveId [[threadgroup_position_in_grid]]".into(),
            ],
        ),
        (ShaderStage::Pixel, _) => {
            let mut args = vec![
                "FragmentIn in [[stage_in]]".to_string(),
                "bool frontFacing [[front_facing]]".into(),
            ];
            if e.regs().ps_inputs.point_sprite_gpr.is_some() {
                args.push("float2 pointCoord [[point_coord]]".into());
            }
            ("fragment FragmentOut main0".to_string(), args)
        }
    };
    args.extend(resource_arguments(e));
    for line in format!("{header}({})", args.join(", ")).split("\r\n") {
        e.w.line(line);
    }
}

fn emit_prologue(e: &mut Emitter<'_>) {
    match (e.stage(), e.uses_gs()) {
        (ShaderStage::Vertex, false) => {
            if rasterizes(e) {
                e.w.line("VertexOut out;");
            }
        }
        (ShaderStage::Vertex, true) => {
            if primitive_is_connected(e.regs().primitive_mode) {
                e.w.line("uint vid = tig + tid;");
            } else {
                e.w.line("uint vid = tig * VERTICES_PER_VERTEX_PRIMITIVE + tid;");
            }
            e.w.line("uint iid = vid / verticesPerInstance;");
            e.w.line("vid %= verticesPerInstance;");
            e.w.line("if (indexType == 1) vid = ((device ushort*)indexBuffer)[vid];");
            e.w.line("else if (indexType == 2) vid = indexBuffer[vid];");
            attr::emit_vertex_pulling(e);
            e.w.line("object_data VertexOut& out = objectPayload.vertexOut[tid];");
        }
        (ShaderStage::Geometry, _) => {
            e.w.line("GeometryOut out;");
            e.w.line("uint vertexIndex = 0;");
        }
        (ShaderStage::Pixel, _) => e.w.line("FragmentOut out;"),
    }
}

fn emit_epilogue(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    match (e.stage(), e.uses_gs()) {
        (ShaderStage::Vertex, false) => {
            if !rasterizes(e) {
                return;
            }
            if analysis.output_point_size && !analysis.writes_point_size {
                let line = format!("out.pointSize = {};", e.uniform_var("pointSize"));
                e.w.line(&line);
            }
            e.w.line("return out;");
        }
        (ShaderStage::Vertex, true) => {
            e.w.open("if (tid == 0)");
            e.w.line("meshGridProperties.set_threadgroups_per_grid(uint3(1, 1, 1));");
            e.w.close("");
        }
        (ShaderStage::Geometry, _) => {
            e.w.line("mesh.set_primitive_count(GET_PRIMITIVE_COUNT(vertexIndex));");
            let (indices, index) = match e.regs().gs_output_primitive {
                GsOutputPrimitive::Points => ("vertexIndex", "i"),
                GsOutputPrimitive::LineStrip => ("(vertexIndex - 1) * 2", "(i / 2) + i % 2"),
                GsOutputPrimitive::TriangleStrip | GsOutputPrimitive::Other(_) => {
                    ("(vertexIndex - 2) * 3", "(i / 3) + i % 3")
                }
            };
            e.w.open(&format!("for (uint i = 0; i < {indices}; i++)"));
            e.w.line(&format!("mesh.set_index(i, {index});"));
            e.w.close("");
        }
        (ShaderStage::Pixel, _) => e.w.line("return out;"),
    }
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{cf_inst, cf_mem_write, cf_op, Export, ProgramBuilder};
    use gpu7_isa::{
        AttributeBufferGroup, FetchShader, PsInput, PsInputTable, RegisterState, VertexAttribute, VertexFormat,
    };

    use super::*;
    use crate::compile::CompileOptions;
    use crate::copy_shader::{CopyShader, CopyShaderParam, ParamExport};
    use crate::emit::test_support::Fixture;
    use crate::emit::Dialect;

    fn balanced(source: &str) -> bool {
        source.matches('{').count() == source.matches('}').count()
    }

    fn gs_options() -> CompileOptions {
        CompileOptions {
            uses_geometry_shader: true,
            ..CompileOptions::default()
        }
    }

    #[test]
    fn fragment_shell() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).done().end().encode());
        let mut regs = RegisterState::default();
        regs.ps_inputs = PsInputTable {
            inputs: vec![PsInput {
                semantic: PsInputSemantic::Parameter(2),
                flat: false,
                no_perspective: true,
            }],
            point_sprite_gpr: None,
        };
        let fixture = Fixture::build(&builder, ShaderStage::Pixel, regs, CompileOptions::default(), None, None);
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.starts_with("#include <metal_stdlib>\r\nusing namespace metal;\r\n"));
        assert!(msl.contains("struct SupportBuffer {\r\nfloat2 fragCoordScale;\r\n};"));
        assert!(msl.contains("float4 passParameterSem2 [[user(locn0)]] [[center_no_perspective]];"));
        assert!(msl.contains("float4 passPixelColor0 [[color(0)]];"));
        assert!(msl.contains(
            "fragment FragmentOut main0(FragmentIn in [[stage_in]], bool frontFacing [[front_facing]], constant SupportBuffer& supportBuffer [[buffer(0)]])"
        ));
        assert!(msl.contains("R0f = in.passParameterSem2;"));
        assert!(msl.contains("return out;"));
        assert!(balanced(&msl));
    }

    #[test]
    fn vertex_shell_uses_stage_in_attributes() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, Export::new(1, 60, 1).done().encode())
            .cf(1, Export::new(2, 0, 1).done().end().encode());
        let mut regs = RegisterState::default();
        regs.vertex_semantic[0] = 4;
        regs.dx_clip_space = true;
        let mut attribute = VertexAttribute::new(4, 0, VertexFormat::Fmt32_32_32_32Float);
        attribute.dst_sel = [0, 1, 2, 3];
        let fetch_shader = FetchShader {
            groups: vec![AttributeBufferGroup {
                buffer_index: 0,
                stride: 16,
                attributes: vec![attribute],
            }],
            invalid_groups: Vec::new(),
        };
        let fixture = Fixture::build(
            &builder,
            ShaderStage::Vertex,
            regs,
            CompileOptions::default(),
            Some(fetch_shader),
            None,
        );
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("#define SET_POSITION(_v) out.position = _v\r\n"));
        assert!(msl.contains("uint4 attrDataSem4 [[attribute(0)]];"));
        assert!(msl.contains("vertex VertexOut main0(VertexIn in [[stage_in]], uint vid [[vertex_id]], uint iid [[instance_id]]"));
        assert!(msl.contains("float4 passParameterSem0 [[user(locn0)]];"));
        assert!(msl.contains("attrDecoder = in.attrDataSem4;"));
        assert!(balanced(&msl));
    }

    #[test]
    fn disabled_rasterization_returns_nothing() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(1, 60, 0).done().end().encode());
        let mut regs = RegisterState::default();
        regs.rasterization_enabled = false;
        let fixture = Fixture::build(&builder, ShaderStage::Vertex, regs, CompileOptions::default(), None, None);
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("vertex void main0("));
        assert!(!msl.contains("VertexOut out;"));
        assert!(!msl.contains("return out;"));
    }

    #[test]
    fn object_stage_pulls_vertices() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_mem_write(cf_op::MEM_RING, 1, 0xF, 0, 0))
            .cf(1, cf_inst(cf_op::NOP, 0, 1, true));
        let mut regs = RegisterState::default();
        regs.vertex_semantic[0] = 1;
        regs.primitive_mode = PrimitiveMode::Triangles;
        let mut attribute = VertexAttribute::new(1, 2, VertexFormat::Fmt16_16);
        attribute.offset = 4;
        let fetch_shader = FetchShader {
            groups: vec![AttributeBufferGroup {
                buffer_index: 2,
                stride: 12,
                attributes: vec![attribute],
            }],
            invalid_groups: Vec::new(),
        };
        let fixture = Fixture::build(&builder, ShaderStage::Vertex, regs, gs_options(), Some(fetch_shader), None);
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("#define VERTICES_PER_VERTEX_PRIMITIVE 3"));
        assert!(msl.contains("struct ObjectPayload {\r\nVertexOut vertexOut[VERTICES_PER_VERTEX_PRIMITIVE];\r\n};"));
        assert!(msl.contains("device uchar* vertexBuffer2 [[buffer(28)]]"));
        assert!(msl.contains("uint vid = tig * VERTICES_PER_VERTEX_PRIMITIVE + tid;"));
        assert!(msl.contains(
            "in.attrDataSem1 = uint4(uint(*(device ushort*)(vertexBuffer2 + vid * 12 + 4 + 0)), uint(*(device ushort*)(vertexBuffer2 + vid * 12 + 4 + 2)), 0, 0);"
        ));
        assert!(msl.contains("object_data VertexOut& out = objectPayload.vertexOut[tid];"));
        assert!(msl.contains("meshGridProperties.set_threadgroups_per_grid(uint3(1, 1, 1));"));
        assert!(!msl.contains("return out;"));
        assert!(balanced(&msl));
    }

    #[test]
    fn geometry_stage_is_a_mesh_shader() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_mem_write(cf_op::MEM_RING, 4, 0xF, 1, 0))
            .cf(1, cf_inst(cf_op::EMIT_VERTEX, 0, 1, false))
            .cf(2, cf_inst(cf_op::NOP, 0, 1, true));
        let copy_shader = CopyShader {
            params: vec![CopyShaderParam {
                offset: 16,
                gpr: 1,
                export: ParamExport {
                    export_type: ExportType::Parameter,
                    index: 3,
                },
            }],
            stream_writes: Vec::new(),
        };
        let fixture = Fixture::build(
            &builder,
            ShaderStage::Geometry,
            RegisterState {
                gs_vert_itemsize: 8,
                ..RegisterState::default()
            },
            gs_options(),
            None,
            Some(copy_shader),
        );
        let msl = fixture.emit(Dialect::Msl).unwrap().source;
        assert!(msl.contains("#define MTL_PRIMITIVE_TYPE triangle"));
        assert!(msl.contains("float4 passParameterSem3 [[user(locn3)]];"));
        assert!(msl.contains("using MeshType = mesh<GeometryOut, void, "));
        assert!(msl.contains("[[mesh, max_total_threads_per_threadgroup(1)]]\r\nvoid main0(MeshType mesh, "));
        assert!(msl.contains("mesh.set_vertex(vertexIndex, out);"));
        assert!(msl.contains("mesh.set_primitive_count(GET_PRIMITIVE_COUNT(vertexIndex));"));
        assert!(msl.contains("mesh.set_index(i, (i / 3) + i % 3);"));
        assert!(balanced(&msl));
    }
}
