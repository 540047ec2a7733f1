//! Vertex, geometry and pixel stages compiled as one pipeline.

use gpu7_decompiler::isa::asm::{cf_inst, cf_mem_write, cf_op, vfetch, Export, ProgramBuilder};
use gpu7_decompiler::isa::{PsInput, PsInputTable, FETCH_BUFFER_GS_RING};
use gpu7_decompiler::{compile_shader, CompileOptions, Dialects, RegisterState, ShaderInput, ShaderStage};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn pipeline_options() -> CompileOptions {
    CompileOptions {
        uses_geometry_shader: true,
        dialects: Dialects::GLSL | Dialects::MSL,
        ..CompileOptions::default()
    }
}

fn regs() -> RegisterState {
    let mut regs = RegisterState {
        gs_vert_itemsize: 8,
        gsvs_ring_itemsize: 32,
        ..RegisterState::default()
    };
    regs.ps_inputs = PsInputTable {
        inputs: vec![PsInput::parameter(3)],
        point_sprite_gpr: None,
    };
    regs
}

/// Writes `R1` into ring parameter 0.
fn vertex_program() -> Vec<u8> {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_mem_write(cf_op::MEM_RING, 0, 0xF, 1, 0))
        .cf(1, cf_inst(cf_op::NOP, 0, 1, true));
    builder.to_bytes()
}

fn ring_fetch(offset: u32) -> [u32; 4] {
    vfetch(FETCH_BUFFER_GS_RING, 0, 1, [0, 1, 2, 3], offset, 0x23, 2, false)
}

/// Reads the vertex ring into `R1`, writes it to the GS ring and emits one vertex.
fn geometry_program() -> Vec<u8> {
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_inst(cf_op::VTX, 8, 1, false))
        .cf(1, cf_mem_write(cf_op::MEM_RING, 4, 0xF, 1, 0))
        .cf(2, cf_inst(cf_op::EMIT_VERTEX, 0, 1, false))
        .cf(3, cf_inst(cf_op::NOP, 0, 1, true))
        .tex(8, &[ring_fetch(0)]);
    builder.to_bytes()
}

/// Copies ring offset 16 into parameter export 3.
fn copy_shader_program() -> Vec<u8> {
    let mut fetch = ring_fetch(16);
    // NO_INDEX_OFFSET fetch type.
    fetch[0] |= 2 << 5;
    let mut builder = ProgramBuilder::new();
    builder
        .cf(0, cf_inst(cf_op::VTX, 8, 1, false))
        .cf(1, Export::new(2, 3, 1).end().encode())
        .tex(8, &[fetch]);
    builder.to_bytes()
}

#[test]
fn vertex_stage_writes_the_ring() -> anyhow::Result<()> {
    init_tracing();
    let regs = regs();
    let bytes = vertex_program();
    let input = ShaderInput::new(ShaderStage::Vertex, &bytes, &regs);
    let shader = compile_shader(&input, &pipeline_options())?;

    let glsl = shader.glsl.unwrap_or_default();
    assert!(glsl.contains("V2G_LAYOUT out Vertex"), "{glsl}");
    assert!(glsl.contains("v2g.passV2GParameter0.xyzw = "));
    assert!(!glsl.contains("gl_PerVertex"));

    let msl = shader.msl.unwrap_or_default();
    assert!(msl.contains("object_data VertexOut& out = objectPayload.vertexOut[tid];"), "{msl}");
    assert!(msl.contains("out.passParameter0.xyzw = "));
    Ok(())
}

#[test]
fn geometry_stage_emits_vertices() -> anyhow::Result<()> {
    init_tracing();
    let regs = regs();
    let bytes = geometry_program();
    let copy_shader = copy_shader_program();
    let mut input = ShaderInput::new(ShaderStage::Geometry, &bytes, &regs);
    input.copy_shader = Some(copy_shader.as_slice());
    input.vs_ring_parameter_count = 1;
    let shader = compile_shader(&input, &pipeline_options())?;
    assert!(!shader.has_error, "{:?}", shader.diagnostics);

    let glsl = shader.glsl.unwrap_or_default();
    assert!(glsl.contains("layout(triangles) in;"), "{glsl}");
    assert!(glsl.contains("layout (triangle_strip, max_vertices = 1) out;"));
    assert!(glsl.contains("layout(location = 3) out vec4 passG2PParameter3;"));
    assert!(glsl.contains("v2g[0].passV2GParameter0.xyzw"), "{glsl}");
    assert!(glsl.contains("EmitVertex();"));

    let msl = shader.msl.unwrap_or_default();
    assert!(msl.contains("mesh.set_vertex(vertexIndex, out);"), "{msl}");
    assert_eq!(shader.bindings.vk.set_index, Some(2));
    Ok(())
}

#[test]
fn pixel_stage_reads_geometry_outputs() -> anyhow::Result<()> {
    init_tracing();
    let regs = regs();
    let mut builder = ProgramBuilder::new();
    builder.cf(0, Export::new(0, 0, 0).done().end().encode());
    let bytes = builder.to_bytes();
    let input = ShaderInput::new(ShaderStage::Pixel, &bytes, &regs);
    let shader = compile_shader(&input, &pipeline_options())?;

    let glsl = shader.glsl.unwrap_or_default();
    assert!(glsl.contains("layout(location = 3) in vec4 passG2PParameter3;"), "{glsl}");
    assert!(glsl.contains("R0f = passG2PParameter3;"));

    let msl = shader.msl.unwrap_or_default();
    assert!(msl.contains("float4 passParameterSem3 [[user(locn3)]];"), "{msl}");
    assert!(msl.contains("R0f = in.passParameterSem3;"));
    Ok(())
}
