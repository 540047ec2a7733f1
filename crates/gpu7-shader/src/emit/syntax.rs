//! Per-dialect spelling of types, casts, intrinsics and resource names.
//!
//! The instruction emitters are shared between both output languages. Everything that is
//! spelled differently goes through [`Syntax`].

use gpu7_isa::ShaderStage;

use crate::analyze::DataType;

pub(crate) trait Syntax: Sync {
    /// Vector (or scalar, for `width == 1`) type name.
    fn vector(&self, ty: DataType, width: usize) -> String;

    /// Opening part of a bit-preserving conversion. `None` when no conversion is needed.
    fn cast_prefix(&self, from: DataType, to: DataType, width: usize) -> Option<String>;

    /// Float constant spelled as its raw bit pattern.
    fn float_from_bits(&self, bits: u32) -> String;

    fn int_literal(&self, value: u32) -> String;

    fn uint_literal(&self, value: u32) -> String;

    /// Round to nearest even.
    fn round_even(&self) -> &'static str;

    fn derivative(&self, horizontal: bool) -> &'static str;

    fn discard(&self) -> &'static str;

    /// Special uniform living in the uniform variable block.
    fn uniform_var(&self, stage: ShaderStage, name: &str) -> String;

    fn remapped_uniform(&self, stage: ShaderStage, index: &str) -> String;

    fn register_uniform(&self, stage: ShaderStage, index: &str) -> String;

    fn buffer_uniform(&self, stage: ShaderStage, buffer: u32, index: &str) -> String;

    /// Stage output variable.
    fn output(&self, name: &str) -> String;

    fn point_size_output(&self) -> String;

    fn stream_out_slot(&self, buffer: u32, index: u32, via_ssbo: bool) -> String;
}

pub(crate) struct Glsl;

pub(crate) struct Msl;

fn glsl_vector(ty: DataType, width: usize) -> String {
    match (ty, width) {
        (DataType::Float, 1) => "float".to_string(),
        (DataType::SignedInt, 1) => "int".to_string(),
        (DataType::UnsignedInt, 1) => "uint".to_string(),
        (DataType::Float, n) => format!("vec{n}"),
        (DataType::SignedInt, n) => format!("ivec{n}"),
        (DataType::UnsignedInt, n) => format!("uvec{n}"),
    }
}

fn msl_vector(ty: DataType, width: usize) -> String {
    let scalar = match ty {
        DataType::Float => "float",
        DataType::SignedInt => "int",
        DataType::UnsignedInt => "uint",
    };
    if width == 1 {
        scalar.to_string()
    } else {
        format!("{scalar}{width}")
    }
}

impl Syntax for Glsl {
    fn vector(&self, ty: DataType, width: usize) -> String {
        glsl_vector(ty, width)
    }

    fn cast_prefix(&self, from: DataType, to: DataType, width: usize) -> Option<String> {
        use DataType::*;
        let prefix = match (from, to) {
            (Float, SignedInt) => "floatBitsToInt(".to_string(),
            (Float, UnsignedInt) => "floatBitsToUint(".to_string(),
            (SignedInt, Float) => "intBitsToFloat(".to_string(),
            (UnsignedInt, Float) => "uintBitsToFloat(".to_string(),
            (UnsignedInt, SignedInt) | (SignedInt, UnsignedInt) => format!("{}(", glsl_vector(to, width)),
            _ => return None,
        };
        Some(prefix)
    }

    fn float_from_bits(&self, bits: u32) -> String {
        format!("intBitsToFloat(0x{bits:08x})")
    }

    fn int_literal(&self, value: u32) -> String {
        format!("0x{value:x}")
    }

    fn uint_literal(&self, value: u32) -> String {
        format!("uint(0x{value:x})")
    }

    fn round_even(&self) -> &'static str {
        "roundEven"
    }

    fn derivative(&self, horizontal: bool) -> &'static str {
        if horizontal {
            "dFdx"
        } else {
            "dFdy"
        }
    }

    fn discard(&self) -> &'static str {
        "discard;"
    }

    fn uniform_var(&self, _stage: ShaderStage, name: &str) -> String {
        format!("uf_{name}")
    }

    fn remapped_uniform(&self, stage: ShaderStage, index: &str) -> String {
        format!("uf_remapped{}[{index}]", stage.suffix())
    }

    fn register_uniform(&self, stage: ShaderStage, index: &str) -> String {
        format!("uf_uniformRegister{}[{index}]", stage.suffix())
    }

    fn buffer_uniform(&self, stage: ShaderStage, buffer: u32, index: &str) -> String {
        format!("uf_block{}{buffer}[{index}]", stage.suffix())
    }

    fn output(&self, name: &str) -> String {
        name.to_string()
    }

    fn point_size_output(&self) -> String {
        "gl_PointSize".to_string()
    }

    fn stream_out_slot(&self, buffer: u32, index: u32, via_ssbo: bool) -> String {
        if via_ssbo {
            format!("sb_buffer[sbBase{buffer} + {index}]")
        } else {
            format!("sb{buffer}[{index}]")
        }
    }
}

impl Syntax for Msl {
    fn vector(&self, ty: DataType, width: usize) -> String {
        msl_vector(ty, width)
    }

    fn cast_prefix(&self, from: DataType, to: DataType, width: usize) -> Option<String> {
        use DataType::*;
        let prefix = match (from, to) {
            (Float, SignedInt) | (Float, UnsignedInt) | (SignedInt, Float) | (UnsignedInt, Float) => {
                format!("as_type<{}>(", msl_vector(to, width))
            }
            (UnsignedInt, SignedInt) | (SignedInt, UnsignedInt) => format!("{}(", msl_vector(to, width)),
            _ => return None,
        };
        Some(prefix)
    }

    fn float_from_bits(&self, bits: u32) -> String {
        format!("as_type<float>(0x{bits:08x})")
    }

    fn int_literal(&self, value: u32) -> String {
        format!("int(0x{value:x})")
    }

    fn uint_literal(&self, value: u32) -> String {
        format!("uint(0x{value:x})")
    }

    fn round_even(&self) -> &'static str {
        "rint"
    }

    fn derivative(&self, horizontal: bool) -> &'static str {
        if horizontal {
            "dfdx"
        } else {
            "dfdy"
        }
    }

    fn discard(&self) -> &'static str {
        "discard_fragment();"
    }

    fn uniform_var(&self, _stage: ShaderStage, name: &str) -> String {
        format!("supportBuffer.{name}")
    }

    fn remapped_uniform(&self, _stage: ShaderStage, index: &str) -> String {
        format!("supportBuffer.remapped[{index}]")
    }

    fn register_uniform(&self, _stage: ShaderStage, index: &str) -> String {
        format!("supportBuffer.uniformRegister[{index}]")
    }

    fn buffer_uniform(&self, _stage: ShaderStage, buffer: u32, index: &str) -> String {
        format!("ubuff{buffer}.d[{index}]")
    }

    fn output(&self, name: &str) -> String {
        format!("out.{name}")
    }

    fn point_size_output(&self) -> String {
        "out.pointSize".to_string()
    }

    fn stream_out_slot(&self, buffer: u32, index: u32, _via_ssbo: bool) -> String {
        format!("sb[sbBase{buffer} + {index}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn casts_pick_bit_preserving_intrinsics() {
        assert_eq!(
            Glsl.cast_prefix(DataType::Float, DataType::SignedInt, 4).as_deref(),
            Some("floatBitsToInt(")
        );
        assert_eq!(
            Glsl.cast_prefix(DataType::UnsignedInt, DataType::SignedInt, 2).as_deref(),
            Some("ivec2(")
        );
        assert_eq!(
            Msl.cast_prefix(DataType::SignedInt, DataType::Float, 3).as_deref(),
            Some("as_type<float3>(")
        );
        assert_eq!(Glsl.cast_prefix(DataType::Float, DataType::Float, 1), None);
    }

    #[test]
    fn uniform_names_follow_dialect() {
        assert_eq!(
            Glsl.buffer_uniform(ShaderStage::Pixel, 3, "ARi.x+2"),
            "uf_blockPS3[ARi.x+2]"
        );
        assert_eq!(Msl.buffer_uniform(ShaderStage::Pixel, 3, "7"), "ubuff3.d[7]");
        assert_eq!(
            Msl.uniform_var(ShaderStage::Vertex, "pointSize"),
            "supportBuffer.pointSize"
        );
    }
}
