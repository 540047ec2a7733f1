//! TEX and VTX clause emission: texture sampling, texture queries, gradients, uniform buffer
//! and ring fetches.

use gpu7_isa::{
    channel_name, ShaderStage, TexOpcode, TextureDim, VertexFormat, FETCH_BUFFER_GS_RING,
    FETCH_BUFFER_UNIFORM_BASE, NUM_UNIFORM_BUFFERS,
};

use super::{Dialect, Emitter};
use crate::analyze::{DataType, TextureUnitUsage};
use crate::decode::{MemRead, TexInstruction, TexPayload, TextureFetch, VertexFetch};

/// `FETCH4` returns the four texels in a different order than `textureGather`.
const GATHER_COMPONENT: [usize; 4] = [2, 0, 1, 3];

pub(super) fn emit_tex_clause(e: &mut Emitter<'_>, instructions: &[TexInstruction]) {
    for inst in instructions {
        match &inst.payload {
            TexPayload::Fetch(fetch) => match inst.opcode {
                TexOpcode::GetTextureResInfo => emit_texture_size(e, inst, fetch),
                TexOpcode::GetCompTexLod => emit_query_lod(e, inst, fetch),
                TexOpcode::SetCubemapIndex => emit_set_cubemap_index(e, inst, fetch),
                TexOpcode::GetGradientsH | TexOpcode::GetGradientsV => emit_get_gradients(e, inst, fetch),
                TexOpcode::SetGradientsH | TexOpcode::SetGradientsV => emit_set_gradients(e, inst, fetch),
                _ => emit_sample(e, inst, fetch),
            },
            TexPayload::VertexFetch(vtx) => emit_vertex_fetch(e, inst, vtx),
            TexPayload::MemRead(mem) => emit_mem_read(e, inst, mem),
        }
    }
}

/// Letters of the written destination channels and how many there are.
fn written_channels(dst_sel: [u8; 4]) -> (String, usize) {
    let letters: String = (0..4).filter(|&f| dst_sel[f] < 4).map(channel_name).collect();
    let count = letters.len();
    (letters, count)
}

/// Source letters feeding the written channels.
fn result_swizzle(dst_sel: [u8; 4]) -> String {
    dst_sel
        .iter()
        .filter(|&&sel| sel < 4)
        .map(|&sel| channel_name(sel as usize))
        .collect()
}

fn zero(ty: DataType) -> &'static str {
    match ty {
        DataType::Float => "0.0",
        DataType::SignedInt | DataType::UnsignedInt => "0",
    }
}

fn one(ty: DataType) -> &'static str {
    match ty {
        DataType::Float => "1.0",
        DataType::SignedInt | DataType::UnsignedInt => "1",
    }
}

/// One register channel selected by a TEX source select, as `ty`. Selects 4 and 5 are the
/// constants zero and one.
fn read_sel(e: &Emitter<'_>, gpr: u32, sel: u8, ty: DataType) -> String {
    match sel {
        0..=3 => e.cast(&format!("{}.{}", e.reg(gpr), channel_name(sel as usize)), e.ty(), ty, 1),
        5 => one(ty).to_string(),
        _ => zero(ty).to_string(),
    }
}

/// Several selected channels at once, as a vector of `ty`.
fn read_sels(e: &Emitter<'_>, gpr: u32, sels: &[u8], ty: DataType) -> String {
    if sels.iter().all(|&sel| sel < 4) {
        let letters: String = sels.iter().map(|&sel| channel_name(sel as usize)).collect();
        return e.cast(&format!("{}.{letters}", e.reg(gpr)), e.ty(), ty, sels.len());
    }
    let parts: Vec<String> = sels.iter().map(|&sel| read_sel(e, gpr, sel, ty)).collect();
    if parts.len() == 1 {
        return parts.concat();
    }
    format!("{}({})", e.vector(ty, sels.len()), parts.join(","))
}

fn texture_unit(e: &Emitter<'_>, unit: u32) -> String {
    match e.dialect {
        Dialect::Glsl => format!("textureUnit{}{unit}", e.stage().suffix()),
        Dialect::Msl => format!("tex{unit}"),
    }
}

fn uses_texel_fetch(opcode: TexOpcode, fetch: &TextureFetch) -> bool {
    (opcode == TexOpcode::Sample && fetch.unnormalized == [true; 4]) || opcode == TexOpcode::Ld
}

fn applies_offsets(opcode: TexOpcode, fetch: &TextureFetch) -> bool {
    fetch.has_offsets()
        && matches!(
            opcode,
            TexOpcode::Sample | TexOpcode::SampleL | TexOpcode::SampleLz | TexOpcode::SampleC | TexOpcode::SampleCLz
        )
}

fn emit_sample(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let Some(usage) = e.analysis().textures.get(fetch.texture as usize).copied() else {
        tracing::debug!(texture = fetch.texture, "skipping sample from out of range texture unit");
        return;
    };
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let mut opcode = inst.opcode;
    if e.stage() == ShaderStage::Vertex && opcode == TexOpcode::SampleCLz {
        // No implicit derivatives outside the pixel stage.
        opcode = TexOpcode::SampleC;
    }
    let target = format!("{}.{letters}", e.reg(dst));
    if opcode == TexOpcode::Fetch4 && matches!(usage.dim, TextureDim::Dim1D | TextureDim::Dim1DArray) {
        let zeros = if count == 1 {
            "0.0".to_string()
        } else {
            format!("{}(0.0)", e.vector(DataType::Float, count))
        };
        let value = e.cast(&zeros, DataType::Float, e.ty(), count);
        e.w.line(&format!("{target} = {value};"));
        return;
    }
    let call = match e.dialect {
        Dialect::Glsl => glsl_sample_call(e, inst, fetch, opcode, &usage),
        Dialect::Msl => msl_sample_call(e, inst, fetch, opcode, &usage),
    };
    let Some(call) = call else {
        e.unsupported(
            Some(inst.word_index),
            format!("{opcode:?} on {:?} texture {}", usage.dim, fetch.texture),
        );
        return;
    };
    let compare = opcode.is_depth_compare();
    let swizzle = if compare {
        "x".repeat(count)
    } else if opcode == TexOpcode::Fetch4 {
        inst.dst_sel
            .iter()
            .filter(|&&sel| sel < 4)
            .map(|&sel| channel_name(GATHER_COMPONENT[sel as usize]))
            .collect()
    } else {
        result_swizzle(inst.dst_sel)
    };
    let sampled = match (e.dialect, compare) {
        (Dialect::Glsl, true) if count == 1 => call,
        (Dialect::Glsl, true) => format!("{call}.{swizzle}"),
        (Dialect::Msl, true) => format!("float4({call}).{swizzle}"),
        (_, false) => format!("{call}.{swizzle}"),
    };
    let result_ty = if usage.integer_format {
        DataType::UnsignedInt
    } else {
        DataType::Float
    };
    let value = e.cast(&sampled, result_ty, e.ty(), count);
    e.w.line(&format!("{target} = {value};"));
}

/// Integer texel coordinates scaled by the per-unit `tex{N}Scale` uniform. `None` for
/// dimensions that never use texel fetches.
fn texel_coords(e: &Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch, opcode: TexOpcode, dim: TextureDim) -> Option<String> {
    let coord_ty = if opcode == TexOpcode::Ld {
        DataType::SignedInt
    } else {
        DataType::Float
    };
    let c0 = read_sel(e, inst.src_gpr, fetch.src_sel[0], coord_ty);
    let c1 = read_sel(e, inst.src_gpr, fetch.src_sel[1], coord_ty);
    let scale = e.uniform_var(&format!("tex{}Scale", fetch.texture));
    let coords = match (e.dialect, dim) {
        (Dialect::Glsl, TextureDim::Dim2D | TextureDim::Dim2DMsaa) => format!("ivec2(vec2({c0}, {c1})*{scale}), 0"),
        (Dialect::Glsl, TextureDim::Dim1D) => format!("int(float({c0})*{scale}.x), 0"),
        (Dialect::Msl, TextureDim::Dim2D | TextureDim::Dim2DMsaa) => format!("uint2(float2({c0}, {c1})*{scale}), 0"),
        (Dialect::Msl, TextureDim::Dim1D) => format!("uint(float({c0})*{scale}.x), 0"),
        _ => return None,
    };
    Some(coords)
}

fn glsl_sample_call(
    e: &Emitter<'_>,
    inst: &TexInstruction,
    fetch: &TextureFetch,
    opcode: TexOpcode,
    usage: &TextureUnitUsage,
) -> Option<String> {
    let unit = texture_unit(e, fetch.texture);
    let dim = usage.dim;
    if uses_texel_fetch(opcode, fetch) {
        let coords = texel_coords(e, inst, fetch, opcode, dim)?;
        return Some(format!("texelFetch({unit}, {coords})"));
    }
    let offsets = applies_offsets(opcode, fetch);
    let function = match opcode {
        TexOpcode::Fetch4 => "textureGather",
        TexOpcode::SampleG => "textureGrad",
        TexOpcode::SampleL | TexOpcode::SampleLz | TexOpcode::SampleCL | TexOpcode::SampleCLz if offsets => {
            "textureLodOffset"
        }
        TexOpcode::SampleL | TexOpcode::SampleLz | TexOpcode::SampleCL | TexOpcode::SampleCLz => "textureLod",
        _ if offsets => "textureOffset",
        _ => "texture",
    };
    let gpr = inst.src_gpr;
    let sel = fetch.src_sel;
    let c = |i: usize| read_sel(e, gpr, sel[i], DataType::Float);
    let cube = |e: &Emitter<'_>| {
        format!(
            "redcCUBEReverse({},{})",
            read_sels(e, gpr, &sel[..2], DataType::Float),
            read_sel(e, gpr, sel[2], DataType::SignedInt)
        )
    };
    let mut coords = if opcode.is_depth_compare() {
        let reference = c(3);
        match dim {
            TextureDim::Dim2DArray => format!("vec4({},{},{},{reference})", c(0), c(1), c(2)),
            TextureDim::Cubemap => format!("vec4({},cubeMapArrayIndex{}),{reference}", cube(e), fetch.texture),
            TextureDim::Dim1D => format!("vec3({},0.0,{reference})", c(0)),
            _ => format!("vec3({}, {reference})", read_sels(e, gpr, &sel[..2], DataType::Float)),
        }
    } else {
        match dim {
            TextureDim::Dim3D | TextureDim::Dim2DArray => format!("vec3({},{},{})", c(0), c(1), c(2)),
            TextureDim::Cubemap => format!("vec4({},cubeMapArrayIndex{})", cube(e), fetch.texture),
            TextureDim::Dim1D => c(0),
            _ => format!("vec2({},{})", c(0), c(1)),
        }
    };
    if opcode == TexOpcode::Fetch4 && dim == TextureDim::Dim2D {
        // Nudge off the texel center so the gathered footprint matches the hardware.
        coords = format!("vec2(0.0001) + {coords}");
    }
    let mut call = format!("{function}({unit}, {coords}");
    match opcode {
        TexOpcode::SampleL | TexOpcode::SampleCL => call.push_str(&format!(",{}", c(3))),
        TexOpcode::SampleLb => call.push_str(&format!(",{}", e.float_const(f32::from(fetch.lod_bias) / 16.0))),
        TexOpcode::SampleLz | TexOpcode::SampleCLz => call.push_str(",0.0"),
        TexOpcode::SampleG => match dim {
            TextureDim::Dim1D => call.push_str(",gradH.x,gradV.x"),
            _ => call.push_str(",gradH.xy,gradV.xy"),
        },
        _ => {}
    }
    if offsets {
        let [x, y, z] = fetch.offsets.map(|o| o / 2);
        match dim {
            TextureDim::Dim1D => call.push_str(&format!(",{x}")),
            TextureDim::Dim2D | TextureDim::Dim2DArray => call.push_str(&format!(",ivec2({x},{y})")),
            TextureDim::Dim3D => call.push_str(&format!(",ivec3({x},{y},{z})")),
            _ => return None,
        }
    }
    call.push(')');
    Some(call)
}

fn msl_sample_call(
    e: &Emitter<'_>,
    inst: &TexInstruction,
    fetch: &TextureFetch,
    opcode: TexOpcode,
    usage: &TextureUnitUsage,
) -> Option<String> {
    let unit = texture_unit(e, fetch.texture);
    let sampler = format!("samplr{}", fetch.texture);
    let dim = usage.dim;
    let compare = opcode.is_depth_compare();
    if uses_texel_fetch(opcode, fetch) {
        if fetch.has_offsets() {
            return None;
        }
        let coords = texel_coords(e, inst, fetch, opcode, dim)?;
        return Some(format!("{unit}.read({coords})"));
    }
    // Metal has no depth variant of these texture types.
    if compare && matches!(dim, TextureDim::Dim1DArray | TextureDim::Dim3D) {
        return None;
    }
    let method = match opcode {
        TexOpcode::Fetch4 => "gather",
        _ if compare => "sample_compare",
        _ => "sample",
    };
    let gpr = inst.src_gpr;
    let sel = fetch.src_sel;
    let c = |i: usize| read_sel(e, gpr, sel[i], DataType::Float);
    let cube = |e: &Emitter<'_>| {
        format!(
            "redcCUBEReverse({},{}), uint(cubeMapArrayIndex{})",
            read_sels(e, gpr, &sel[..2], DataType::Float),
            read_sel(e, gpr, sel[2], DataType::SignedInt),
            fetch.texture
        )
    };
    let mut coords = match dim {
        TextureDim::Dim2DArray => format!("float2({}, {}), uint(rint({}))", c(0), c(1), c(2)),
        TextureDim::Cubemap => cube(e),
        TextureDim::Dim1D => c(0),
        TextureDim::Dim1DArray => format!("{}, uint(rint({}))", c(0), c(1)),
        TextureDim::Dim3D => format!("float3({}, {}, {})", c(0), c(1), c(2)),
        _ if compare => format!("float2({})", read_sels(e, gpr, &sel[..2], DataType::Float)),
        _ => format!("float2({}, {})", c(0), c(1)),
    };
    if compare {
        coords.push_str(&format!(", {}", c(3)));
    }
    if opcode == TexOpcode::Fetch4 && dim == TextureDim::Dim2D {
        coords = format!("float2(0.0001) + {coords}");
    }
    let mut call = format!("{unit}.{method}({sampler}, {coords}");
    if !matches!(dim, TextureDim::Dim1D | TextureDim::Dim1DArray) {
        match opcode {
            TexOpcode::SampleL | TexOpcode::SampleCL => call.push_str(&format!(", level({})", c(3))),
            TexOpcode::SampleLb => {
                call.push_str(&format!(", bias({})", e.float_const(f32::from(fetch.lod_bias) / 16.0)))
            }
            TexOpcode::SampleLz | TexOpcode::SampleCLz => call.push_str(", level(0.0)"),
            TexOpcode::SampleG if dim == TextureDim::Dim2D => call.push_str(", gradient2d(gradH.xy, gradV.xy)"),
            _ => {}
        }
    }
    if applies_offsets(opcode, fetch) {
        let [x, y, z] = fetch.offsets.map(|o| o / 2);
        match dim {
            TextureDim::Dim2D | TextureDim::Dim2DArray => call.push_str(&format!(", int2({x}, {y})")),
            TextureDim::Dim3D => call.push_str(&format!(", int3({x}, {y}, {z})")),
            _ => return None,
        }
    }
    call.push(')');
    Some(call)
}

/// `GET_TEXTURE_RESINFO`: texture dimensions padded with ones.
fn emit_texture_size(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let Some(usage) = e.analysis().textures.get(fetch.texture as usize).copied() else {
        return;
    };
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let unit = texture_unit(e, fetch.texture);
    let size = match e.dialect {
        Dialect::Glsl => {
            let query = match usage.dim {
                TextureDim::Dim2DMsaa | TextureDim::Dim2DArrayMsaa => format!("textureSize({unit})"),
                _ => format!("textureSize({unit}, 0)"),
            };
            match usage.dim {
                TextureDim::Dim1D => format!("ivec4({query},1,1,1)"),
                TextureDim::Dim3D | TextureDim::Dim2DArray | TextureDim::Cubemap | TextureDim::Dim2DArrayMsaa => {
                    format!("ivec4({query},1)")
                }
                TextureDim::Dim2D | TextureDim::Dim2DMsaa | TextureDim::Dim1DArray => format!("ivec4({query},1,1)"),
            }
        }
        Dialect::Msl => {
            let (w, h) = (format!("{unit}.get_width()"), format!("{unit}.get_height()"));
            let layers = format!("{unit}.get_array_size()");
            match usage.dim {
                TextureDim::Dim1D => format!("int4({w}, 1, 1, 1)"),
                TextureDim::Dim1DArray => format!("int4({w}, {layers}, 1, 1)"),
                TextureDim::Dim2DArray | TextureDim::Dim2DArrayMsaa => format!("int4({w}, {h}, {layers}, 1)"),
                TextureDim::Dim3D => format!("int4({w}, {h}, {unit}.get_depth(), 1)"),
                TextureDim::Dim2D | TextureDim::Dim2DMsaa | TextureDim::Cubemap => format!("int4({w}, {h}, 1, 1)"),
            }
        }
    };
    let value = e.cast(
        &format!("{size}.{}", result_swizzle(inst.dst_sel)),
        DataType::SignedInt,
        e.ty(),
        count,
    );
    let line = format!("{}.{letters} = {value};", e.reg(dst));
    e.w.line(&line);
}

/// `GET_COMP_TEX_LOD`: mip level the hardware would pick for the given coordinates.
fn emit_query_lod(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let Some(usage) = e.analysis().textures.get(fetch.texture as usize).copied() else {
        return;
    };
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let width = if usage.dim == TextureDim::Cubemap { 3 } else { 2 };
    let coords = read_sels(e, inst.src_gpr, &fetch.src_sel[..width], DataType::Float);
    let unit = texture_unit(e, fetch.texture);
    let lod = match e.dialect {
        Dialect::Glsl => format!("vec4(textureQueryLod({unit}, {coords}),0.0,0.0)"),
        Dialect::Msl => {
            let sampler = format!("samplr{}", fetch.texture);
            format!(
                "float4({unit}.calculate_clamped_lod({sampler}, {coords}), {unit}.calculate_unclamped_lod({sampler}, {coords}), 0.0, 0.0)"
            )
        }
    };
    let value = e.cast(&lod, DataType::Float, e.ty(), 4);
    let line = format!("{}.{letters} = {value}.{};", e.reg(dst), result_swizzle(inst.dst_sel));
    e.w.line(&line);
}

fn emit_set_cubemap_index(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let index = read_sel(e, inst.src_gpr, fetch.src_sel[0], DataType::Float);
    e.w.line(&format!("cubeMapArrayIndex{} = {index};", fetch.texture));
}

fn emit_get_gradients(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let derivative = e.syntax.derivative(inst.opcode == TexOpcode::GetGradientsH);
    let source = read_sels(e, inst.src_gpr, &fetch.src_sel[..count], DataType::Float);
    let value = e.cast(&format!("{derivative}({source})"), DataType::Float, e.ty(), count);
    let line = format!("{}.{letters} = {value};", e.reg(dst));
    e.w.line(&line);
}

fn emit_set_gradients(e: &mut Emitter<'_>, inst: &TexInstruction, fetch: &TextureFetch) {
    let target = if inst.opcode == TexOpcode::SetGradientsH {
        "gradH"
    } else {
        "gradV"
    };
    let value = read_sels(e, inst.src_gpr, &fetch.src_sel, DataType::Float);
    e.w.line(&format!("{target} = {value};"));
}

fn emit_vertex_fetch(e: &mut Emitter<'_>, inst: &TexInstruction, vtx: &VertexFetch) {
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let swizzle = result_swizzle(inst.dst_sel);
    let target = format!("{}.{letters}", e.reg(dst));
    if vtx.buffer == FETCH_BUFFER_GS_RING && e.stage() == ShaderStage::Geometry {
        // Parameters of the first input vertex, addressed by ring offset.
        let parameter = vtx.offset / 16;
        let input = match e.dialect {
            Dialect::Glsl => format!("v2g[0].passV2GParameter{parameter}.{swizzle}"),
            Dialect::Msl => format!("objectPayload.vertexOut[0].passParameter{parameter}.{swizzle}"),
        };
        let value = e.cast(&input, DataType::SignedInt, e.ty(), count);
        e.w.line(&format!("{target} = {value};"));
        return;
    }
    let uniform_buffers = FETCH_BUFFER_UNIFORM_BASE..FETCH_BUFFER_UNIFORM_BASE + NUM_UNIFORM_BUFFERS as u32;
    if !uniform_buffers.contains(&vtx.buffer) {
        e.unsupported(Some(inst.word_index), format!("vertex fetch from buffer {:#x}", vtx.buffer));
        return;
    }
    let index = read_sel(e, inst.src_gpr, vtx.src_sel_x, DataType::SignedInt);
    let element = e
        .syntax
        .buffer_uniform(e.stage(), vtx.buffer - FETCH_BUFFER_UNIFORM_BASE, &index);
    let value = e.cast(&format!("{element}.{swizzle}"), DataType::Float, e.ty(), count);
    e.w.line(&format!("{target} = {value};"));
}

/// Scatter buffer reads are not backed by storage yet and always return zero.
fn emit_mem_read(e: &mut Emitter<'_>, inst: &TexInstruction, mem: &MemRead) {
    let Some(dst) = inst.dst_gpr else {
        return;
    };
    let (letters, count) = written_channels(inst.dst_sel);
    if count == 0 {
        return;
    }
    let components = match VertexFormat::from_raw(mem.format) {
        VertexFormat::Fmt32Float => 1,
        VertexFormat::Fmt32_32Float => 2,
        VertexFormat::Fmt32_32_32Float => 3,
        VertexFormat::Fmt32_32_32_32Float => 4,
        other => {
            e.unsupported(Some(inst.word_index), format!("memory read with format {other:?}"));
            return;
        }
    };
    tracing::debug!(array_base = mem.array_base, components, "scatter buffer read returns zero");
    let zeros = if count == 1 {
        "0.0".to_string()
    } else {
        format!("{}(0.0)", e.vector(DataType::Float, count))
    };
    let value = e.cast(&zeros, DataType::Float, e.ty(), count);
    let line = format!("{}.{letters} = {value};", e.reg(dst));
    e.w.line(&line);
}
