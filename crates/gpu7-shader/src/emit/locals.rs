//! Local variables declared at the top of `main`. Spelled through the dialect syntax so both
//! program shells share them.

use gpu7_isa::{ShaderStage, TextureDim, NUM_GPR, NUM_STREAMOUT_BUFFERS};

use super::alu::{max_backup_count, MIN_BACKUP_REGISTERS};
use super::{Dialect, Emitter};
use crate::analyze::DataType;

fn zero(ty: DataType) -> &'static str {
    match ty {
        DataType::Float => "0.0",
        DataType::SignedInt | DataType::UnsignedInt => "0",
    }
}

pub(super) fn emit_locals(e: &mut Emitter<'_>) {
    emit_registers(e);
    emit_scratch(e);
    emit_mask_stacks(e);
    emit_cube_state(e);
    emit_stream_out_bases(e);
}

fn emit_registers(e: &mut Emitter<'_>) {
    let ty = e.ty();
    let vec4 = e.vector(ty, 4);
    let suffix = ty.suffix();
    let zero = zero(ty);
    if e.analysis().use_array_gprs {
        e.w.line(&format!("{vec4} R{suffix}[{NUM_GPR}];"));
        e.w.line(&format!(
            "for(int i = 0; i < {NUM_GPR}; i++) R{suffix}[i] = {vec4}({zero});"
        ));
        return;
    }
    let lines: Vec<String> = e
        .analysis()
        .used_gprs()
        .map(|gpr| format!("{vec4} {} = {vec4}({zero});", e.reg(gpr)))
        .collect();
    for line in &lines {
        e.w.line(line);
    }
}

fn emit_scratch(e: &mut Emitter<'_>) {
    let ty = e.ty();
    let suffix = ty.suffix();
    let scalar = e.vector(ty, 1);
    let vec4 = e.vector(ty, 4);
    let zero = zero(ty);
    let analysis = e.analysis();

    if e.stage() == ShaderStage::Vertex {
        let uvec4 = e.vector(DataType::UnsignedInt, 4);
        e.w.line(&format!("{uvec4} attrDecoder;"));
    }
    let backups = max_backup_count(e.input.program).max(MIN_BACKUP_REGISTERS);
    let names: Vec<String> = (0..backups).map(|i| format!("backupReg{i}{suffix}")).collect();
    e.w.line(&format!("{scalar} {};", names.join(", ")));
    e.w.line(&format!("{vec4} PV0{suffix} = {vec4}({zero}), PV1{suffix} = {vec4}({zero});"));
    e.w.line(&format!("{scalar} PS0{suffix} = {zero}, PS1{suffix} = {zero};"));
    e.w.line(&format!("{vec4} temp{suffix} = {vec4}({zero});"));
    if analysis.has_gradient_lookup {
        let vec4f = e.vector(DataType::Float, 4);
        e.w.line(&format!("{vec4f} gradH = {vec4f}(0.0);"));
        e.w.line(&format!("{vec4f} gradV = {vec4f}(0.0);"));
    }
    e.w.line("float tempResultf;");
    e.w.line("int tempResulti;");
    let ivec4 = e.vector(DataType::SignedInt, 4);
    e.w.line(&format!("{ivec4} ARi = {ivec4}(0);"));
    e.w.line("bool predResult = true;");
}

/// Main stack plus one private copy per subroutine. Entry `0` of both stacks and entry `1` of
/// the `C` stack start active.
fn emit_mask_stacks(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    let program = e.input.program;
    if !analysis.modifies_pixel_active_state && program.subroutines.is_empty() {
        return;
    }
    let depth = analysis.max_stack_depth as usize + 1;
    let mut suffixes = vec![String::new()];
    suffixes.extend(program.subroutines.iter().map(|sub| format!("Sub{:04x}", sub.addr)));
    for suffix in &suffixes {
        e.w.line(&format!("bool activeMaskStack{suffix}[{depth}];"));
        e.w.line(&format!("bool activeMaskStackC{suffix}[{}];", depth + 1));
    }
    for i in 0..depth {
        e.w.line(&format!("activeMaskStack[{i}] = {};", i == 0));
    }
    for i in 0..depth + 1 {
        e.w.line(&format!("activeMaskStackC[{i}] = {};", i <= 1));
    }
}

fn emit_cube_state(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    if analysis.has_redc_cube {
        let vec3 = e.vector(DataType::Float, 3);
        e.w.line(&format!("{vec3} cubeMapSTM;"));
        e.w.line("int cubeMapFaceId;");
    }
    let cube_units: Vec<usize> = analysis
        .used_texture_units()
        .filter(|&unit| analysis.textures[unit].dim == TextureDim::Cubemap)
        .collect();
    for unit in cube_units {
        e.w.line(&format!("float cubeMapArrayIndex{unit} = 0.0;"));
    }
}

/// Dword index of the current vertex in each stream-out buffer.
fn emit_stream_out_bases(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    let declare = match e.dialect {
        Dialect::Glsl => analysis.use_ssbo_for_streamout,
        Dialect::Msl => analysis.has_streamout_enable && analysis.streamout_write_mask != 0,
    };
    if !declare || e.stage() == ShaderStage::Pixel {
        return;
    }
    let (vertex_id, instance_id, primitive_id) = match e.dialect {
        Dialect::Glsl => ("gl_VertexID", "gl_InstanceID", "gl_PrimitiveIDIn"),
        Dialect::Msl => ("int(vid)", "int(iid)", "int(primitiveId)"),
    };
    let vertices_per_instance = e.uniform_var("verticesPerInstance");
    let max_vertices = e.regs().gs_max_vertices();
    for buffer in 0..NUM_STREAMOUT_BUFFERS {
        if analysis.streamout_write_mask & (1 << buffer) == 0 {
            continue;
        }
        let base = e.uniform_var(&format!("streamoutBufferBase{buffer}"));
        let stride = analysis.streamout_buffer_stride[buffer] / 4;
        let vertex = match e.stage() {
            ShaderStage::Geometry => format!("{primitive_id} * {max_vertices}"),
            _ => format!("{vertex_id} + {vertices_per_instance} * {instance_id}"),
        };
        e.w.line(&format!("int sbBase{buffer} = {base}/4 + ({vertex})*{stride};"));
    }
}
