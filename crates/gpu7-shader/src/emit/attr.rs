//! Stage inputs at the top of `main`: vertex attribute decoding and pixel interpolants.
//!
//! Attributes arrive as raw `uvec4` words (one component per element, undecoded). They are
//! byte swapped and converted in a scratch `attrDecoder` vector, then moved into `R{location+1}`
//! through the destination select of the fetch instruction.

use gpu7_isa::{
    channel_name, Endian, FetchType, NumFormat, PsInputSemantic, ShaderStage, VertexAttribute, VertexFormat,
    NUM_VERTEX_BUFFERS,
};

use super::{Dialect, Emitter};
use crate::analyze::DataType;

/// Storage of the components of a vertex format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lanes {
    /// One element of `bits` width per component.
    Bits(u32),
    /// 32-bit float components, nothing to convert.
    Float,
    /// 16-bit half floats.
    Half,
    /// Components packed into a single dword, as `(shift, bits)` per component.
    Packed([(u32, u32); 4]),
}

const PACKED_2_10_10_10: [(u32, u32); 4] = [(0, 10), (10, 10), (20, 10), (30, 2)];
const PACKED_10_10_10_2: [(u32, u32); 4] = [(0, 2), (2, 10), (12, 10), (22, 10)];

fn lanes(format: VertexFormat) -> Option<Lanes> {
    use VertexFormat::*;
    Some(match format {
        Fmt8 | Fmt8_8 | Fmt8_8_8_8 => Lanes::Bits(8),
        Fmt16 | Fmt16_16 | Fmt16_16_16_16 => Lanes::Bits(16),
        Fmt32 | Fmt32_32 | Fmt32_32_32 | Fmt32_32_32_32 => Lanes::Bits(32),
        Fmt32Float | Fmt32_32Float | Fmt32_32_32Float | Fmt32_32_32_32Float => Lanes::Float,
        Fmt16Float | Fmt16_16Float | Fmt16_16_16_16Float => Lanes::Half,
        Fmt2_10_10_10 => Lanes::Packed(PACKED_2_10_10_10),
        Fmt10_10_10_2 => Lanes::Packed(PACKED_10_10_10_2),
        Unknown(_) => return None,
    })
}

fn swizzle(count: usize) -> String {
    (0..count).map(channel_name).collect()
}

/// Vertex id and instance id in `R0`, then every fetched attribute.
pub(super) fn emit_vertex_inputs(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    if analysis.is_gpr_used(0) {
        let (vertex_id, instance_id) = match e.dialect {
            Dialect::Glsl => ("gl_VertexID", "gl_InstanceID"),
            Dialect::Msl => ("int(vid)", "int(iid)"),
        };
        let ids = format!(
            "{}({vertex_id}, 0, 0, {instance_id})",
            e.vector(DataType::SignedInt, 4)
        );
        let line = format!("{} = {};", e.reg(0), e.cast(&ids, DataType::SignedInt, e.ty(), 4));
        e.w.line(&line);
    }

    let Some(fetch_shader) = e.input.fetch_shader else {
        return;
    };
    for group in &fetch_shader.groups {
        let valid = (group.buffer_index as usize) < NUM_VERTEX_BUFFERS as usize;
        for attr in &group.attributes {
            emit_attribute(e, attr, valid);
        }
    }
    for group in &fetch_shader.invalid_groups {
        for attr in &group.attributes {
            emit_attribute(e, attr, false);
        }
    }
}

fn emit_attribute(e: &mut Emitter<'_>, attr: &VertexAttribute, valid: bool) {
    if attr.semantic_id == VertexAttribute::UNUSED_SEMANTIC {
        return;
    }
    let Some(location) = e.regs().vertex_attribute_location(attr.semantic_id) else {
        return;
    };
    let gpr = location as u32 + 1;
    if !e.analysis().is_gpr_used(gpr) {
        e.w.line(&format!("// skipped unused attribute for r{gpr}"));
        return;
    }

    if valid {
        decode_attribute(e, attr);
    } else {
        let zero = format!("{}(0)", e.vector(DataType::UnsignedInt, 4));
        e.w.line(&format!("attrDecoder = {zero};"));
    }

    let reg = e.reg(gpr);
    let ty = e.ty();
    let components: Vec<String> = attr
        .dst_sel
        .iter()
        .enumerate()
        .map(|(channel, &sel)| match sel {
            0..=3 => e.cast(
                &format!("int(attrDecoder.{})", channel_name(sel as usize)),
                DataType::SignedInt,
                ty,
                1,
            ),
            4 => e.cast("0", DataType::SignedInt, ty, 1),
            5 if attr.num_format == NumFormat::Int => e.cast("1", DataType::SignedInt, ty, 1),
            5 => e.cast("0x3f800000", DataType::SignedInt, ty, 1),
            _ => format!("{reg}.{}", channel_name(channel)),
        })
        .collect();
    let line = format!("{reg} = {}({});", e.vector(ty, 4), components.join(", "));
    e.w.line(&line);
}

/// Loads the raw words of one attribute into `attrDecoder` and converts them to their final
/// bit pattern.
fn decode_attribute(e: &mut Emitter<'_>, attr: &VertexAttribute) {
    let Some(lanes) = lanes(attr.format) else {
        e.unsupported(None, format!("vertex format {:#x}", attr.format.to_raw()));
        return;
    };
    let count = attr.format.component_count();
    let source = match e.dialect {
        Dialect::Glsl => format!("attrDataSem{}", attr.semantic_id),
        Dialect::Msl => format!("in.attrDataSem{}", attr.semantic_id),
    };

    // Byte order of 8-bit elements is a component reordering.
    let load_count = if matches!(lanes, Lanes::Packed(_)) { 1 } else { count };
    let mut load = swizzle(load_count);
    match (lanes, attr.endian) {
        (Lanes::Bits(8), Endian::Swap8In32) if count == 4 => load = "wzyx".into(),
        (Lanes::Bits(8), Endian::Swap8In16) if count >= 2 => {
            load = if count == 4 { "yxwz".into() } else { "yx".into() };
        }
        _ => {}
    }
    emit_load(e, &source, &load);

    let loaded = swizzle(load_count);
    match (lanes, attr.endian) {
        (_, Endian::None) | (Lanes::Bits(8), _) => {}
        (Lanes::Bits(16) | Lanes::Half, Endian::Swap8In16) => {
            e.w.line(&format!(
                "attrDecoder.{loaded} = ((attrDecoder.{loaded}>>8)&0xFF)|((attrDecoder.{loaded}<<8)&0xFF00);"
            ));
        }
        (Lanes::Bits(32) | Lanes::Float | Lanes::Packed(_), Endian::Swap8In32) => {
            e.w.line(&format!(
                "attrDecoder.{loaded} = (attrDecoder.{loaded}>>24)|((attrDecoder.{loaded}>>8)&0xFF00)|((attrDecoder.{loaded}<<8)&0xFF0000)|((attrDecoder.{loaded}<<24));"
            ));
        }
        (Lanes::Bits(32) | Lanes::Float | Lanes::Packed(_), Endian::Swap8In16) => {
            e.w.line(&format!(
                "attrDecoder.{loaded} = ((attrDecoder.{loaded}>>8)&0x00FF00FF)|((attrDecoder.{loaded}<<8)&0xFF00FF00);"
            ));
        }
        (_, endian) => {
            e.unsupported(
                None,
                format!("vertex format {:#x} with {endian:?}", attr.format.to_raw()),
            );
            return;
        }
    }

    match lanes {
        Lanes::Float => {}
        Lanes::Half => emit_half_conversion(e, count),
        Lanes::Bits(bits) => emit_integer_conversion(e, attr, &swizzle(count), bits),
        Lanes::Packed(fields) => {
            let uvec4 = e.vector(DataType::UnsignedInt, 4);
            let parts: Vec<String> = fields
                .iter()
                .map(|&(shift, bits)| format!("(attrDecoder.x>>{shift})&0x{:X}", (1u32 << bits) - 1))
                .collect();
            e.w.line(&format!("attrDecoder = {uvec4}({});", parts.join(", ")));
            // The 2-bit component never gets normalized.
            let (wide, narrow): (Vec<usize>, Vec<usize>) = (0..4).partition(|&i| fields[i].1 == 10);
            let wide: String = wide.into_iter().map(channel_name).collect();
            emit_integer_conversion(e, attr, &wide, 10);
            if attr.num_format != NumFormat::Int {
                for channel in narrow {
                    let c = channel_name(channel);
                    let value = e.cast(&format!("float(attrDecoder.{c})"), DataType::Float, DataType::UnsignedInt, 1);
                    e.w.line(&format!("attrDecoder.{c} = {value};"));
                }
            }
        }
    }
}

fn emit_load(e: &mut Emitter<'_>, source: &str, load: &str) {
    let uvec4 = e.vector(DataType::UnsignedInt, 4);
    let line = match load.len() {
        4 if load == "xyzw" => format!("attrDecoder = {source};"),
        4 => format!("attrDecoder = {source}.{load};"),
        n => {
            let zeros = vec!["0"; 4 - n].join(", ");
            format!("attrDecoder = {uvec4}({source}.{load}, {zeros});")
        }
    };
    e.w.line(&line);
}

fn unpack_half(e: &Emitter<'_>, packed: &str) -> String {
    match e.dialect {
        Dialect::Glsl => format!("unpackHalf2x16({packed})"),
        Dialect::Msl => format!("float2(as_type<half2>({packed}))"),
    }
}

fn emit_half_conversion(e: &mut Emitter<'_>, count: usize) {
    if count == 1 {
        let value = format!("{}.x", unpack_half(e, "attrDecoder.x"));
        let bits = e.cast(&value, DataType::Float, DataType::UnsignedInt, 1);
        e.w.line(&format!("attrDecoder.x = {bits};"));
        return;
    }
    for pair in [("xy", 'x', 'y'), ("zw", 'z', 'w')].into_iter().take(count / 2) {
        let (dst, lo, hi) = pair;
        let value = unpack_half(e, &format!("attrDecoder.{lo}|(attrDecoder.{hi}<<16)"));
        let bits = e.cast(&value, DataType::Float, DataType::UnsignedInt, 2);
        e.w.line(&format!("attrDecoder.{dst} = {bits};"));
    }
}

/// Sign extension and number format conversion of `lanes`, each holding `bits` wide integers.
fn emit_integer_conversion(e: &mut Emitter<'_>, attr: &VertexAttribute, lanes: &str, bits: u32) {
    let width = lanes.len();
    if attr.signed && bits < 32 {
        let sign = 1u32 << (bits - 1);
        let extend = !((1u32 << bits) - 1);
        for c in lanes.chars() {
            e.w.line(&format!(
                "if( (attrDecoder.{c}&0x{sign:X}) != 0 ) attrDecoder.{c} |= 0x{extend:X};"
            ));
        }
    }
    let vec = e.vector(DataType::Float, width);
    let ivec = e.vector(DataType::SignedInt, width);
    let raw = format!("attrDecoder.{lanes}");
    let value = match (attr.num_format, attr.signed) {
        (NumFormat::Int, _) => return,
        (NumFormat::Norm, false) => {
            let max = float_literal(((1u64 << bits) - 1) as f64);
            format!("{vec}({raw})/{max}")
        }
        (NumFormat::Norm, true) => {
            let max = float_literal(((1u64 << (bits - 1)) - 1) as f64);
            format!("max({vec}({ivec}({raw}))/{max},{vec}(-1.0))")
        }
        (NumFormat::Scaled, false) => format!("{vec}({raw})"),
        (NumFormat::Scaled, true) => format!("{vec}({ivec}({raw}))"),
    };
    let bits = e.cast(&value, DataType::Float, DataType::UnsignedInt, width);
    e.w.line(&format!("attrDecoder.{lanes} = {bits};"));
}

fn float_literal(value: f64) -> String {
    format!("{value:.1}")
}

/// Interpolants, fragment position, point sprite coordinates and the front face flag.
pub(super) fn emit_pixel_inputs(e: &mut Emitter<'_>) {
    let analysis = e.analysis();
    let regs = e.regs();
    let ty = e.ty();
    let gs = e.uses_gs();
    let point_sprite = regs.ps_inputs.point_sprite_gpr;

    for (index, input) in regs.ps_inputs.inputs.iter().enumerate() {
        let gpr = index as u32;
        if !analysis.is_gpr_used(gpr) || point_sprite == Some(gpr) {
            continue;
        }
        let value = match input.semantic {
            PsInputSemantic::Position => "GET_FRAGCOORD()".to_string(),
            PsInputSemantic::Parameter(semantic) => {
                let name = if gs {
                    match e.dialect {
                        Dialect::Glsl => format!("passG2PParameter{}", semantic & 0x7F),
                        Dialect::Msl => format!("passParameterSem{}", semantic & 0x7F),
                    }
                } else {
                    format!("passParameterSem{semantic}")
                };
                match e.dialect {
                    Dialect::Glsl => name,
                    Dialect::Msl => format!("in.{name}"),
                }
            }
        };
        let line = format!("{} = {};", e.reg(gpr), e.cast(&value, DataType::Float, ty, 4));
        e.w.line(&line);
    }

    if let Some(gpr) = point_sprite {
        let coord = match e.dialect {
            Dialect::Glsl => "gl_PointCoord.xyxy",
            Dialect::Msl => "pointCoord.xyxy",
        };
        let line = format!("{} = {};", e.reg(gpr), e.cast(coord, DataType::Float, ty, 4));
        e.w.line(&line);
    }

    if let Some(front_face) = regs.front_face {
        if analysis.is_gpr_used(front_face.gpr) {
            let flag = match e.dialect {
                Dialect::Glsl => "gl_FrontFacing",
                Dialect::Msl => "frontFacing",
            };
            let line = format!(
                "{}.{} = {};",
                e.reg(front_face.gpr),
                channel_name(front_face.channel as usize),
                e.cast(&format!("({flag}?1.0:0.0)"), DataType::Float, ty, 1)
            );
            e.w.line(&line);
        }
    }
}

/// Vertex buffers read by object stage vertex pulling.
pub(super) fn pulled_vertex_buffers(e: &Emitter<'_>) -> Vec<u32> {
    let Some(fetch_shader) = e.input.fetch_shader else {
        return Vec::new();
    };
    let mut buffers: Vec<u32> = fetch_shader
        .valid_attributes()
        .map(|(group, _)| group.buffer_index)
        .collect();
    buffers.sort_unstable();
    buffers.dedup();
    buffers
}

/// Fills `in` from the raw vertex buffers. Object stages have no vertex descriptor, so each
/// attribute's words are read at `index * stride + offset`, one element per component.
pub(super) fn emit_vertex_pulling(e: &mut Emitter<'_>) {
    e.w.line("VertexIn in;");
    let semantics: Vec<u8> = e.input.bindings.mtl.attributes.iter().map(|b| b.semantic_id).collect();
    for semantic in semantics {
        let found = e
            .input
            .fetch_shader
            .and_then(|fs| fs.valid_attributes().find(|(_, attr)| attr.semantic_id == semantic));
        let value = match found {
            Some((group, attr)) => pull_attribute(attr, group.stride),
            None => None,
        };
        let value = value.unwrap_or_else(|| "uint4(0)".to_string());
        e.w.line(&format!("in.attrDataSem{semantic} = {value};"));
    }
}

fn pull_attribute(attr: &VertexAttribute, stride: u32) -> Option<String> {
    let index = match attr.fetch_type {
        FetchType::Vertex => "vid",
        FetchType::Instance => "iid",
        FetchType::NoIndexOffset => "0",
    };
    let base = format!("vertexBuffer{} + {index} * {stride} + {}", attr.buffer_index, attr.offset);
    let (count, width) = match lanes(attr.format)? {
        Lanes::Packed(_) => (1, 4),
        Lanes::Bits(bits) => (attr.format.component_count(), bits / 8),
        Lanes::Half => (attr.format.component_count(), 2),
        Lanes::Float => (attr.format.component_count(), 4),
    };
    let mut components: Vec<String> = (0..count)
        .map(|i| {
            let at = i as u32 * width;
            match width {
                1 => format!("uint(({base})[{at}])"),
                2 => format!("uint(*(device ushort*)({base} + {at}))"),
                _ => format!("*(device uint*)({base} + {at})"),
            }
        })
        .collect();
    components.resize(4, "0".to_string());
    Some(format!("uint4({})", components.join(", ")))
}

/// Input import for the stage being emitted. Geometry shaders read their inputs from the ring.
pub(super) fn emit_stage_inputs(e: &mut Emitter<'_>) {
    match e.stage() {
        ShaderStage::Vertex => emit_vertex_inputs(e),
        ShaderStage::Pixel => emit_pixel_inputs(e),
        ShaderStage::Geometry => {}
    }
}
