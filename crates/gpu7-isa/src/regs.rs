//! Typed snapshot of the fixed-function register state read while decompiling a shader.
//!
//! The caller fills this from the GPU context registers at draw time. Only the fields the
//! decompiler consults are represented; everything else about the pipeline is irrelevant to
//! code generation.

use crate::{NUM_COLOR_TARGETS, NUM_STREAMOUT_BUFFERS, NUM_TEXTURE_UNITS};

/// `VGT_PRIMITIVE_TYPE.PRIMITIVE_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineStrip,
    #[default]
    Triangles,
    TriangleFan,
    TriangleStrip,
    Quads,
    QuadStrip,
    Other(u32),
}

impl PrimitiveMode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x01 => Self::Points,
            0x02 => Self::Lines,
            0x03 => Self::LineStrip,
            0x04 => Self::Triangles,
            0x05 => Self::TriangleFan,
            0x06 => Self::TriangleStrip,
            0x13 => Self::Quads,
            0x14 => Self::QuadStrip,
            other => Self::Other(other),
        }
    }
}

/// `VGT_GS_OUT_PRIM_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GsOutputPrimitive {
    Points,
    LineStrip,
    #[default]
    TriangleStrip,
    Other(u32),
}

impl GsOutputPrimitive {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Points,
            1 => Self::LineStrip,
            2 => Self::TriangleStrip,
            other => Self::Other(other),
        }
    }
}

/// Alpha test and depth compare function (`REF_NEVER` .. `REF_ALWAYS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

impl CompareFunc {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 7 {
            0 => Self::Never,
            1 => Self::Less,
            2 => Self::Equal,
            3 => Self::LessEqual,
            4 => Self::Greater,
            5 => Self::NotEqual,
            6 => Self::GreaterEqual,
            _ => Self::Always,
        }
    }

    /// Operator that keeps a fragment, or `None` for `Never`/`Always`.
    pub fn operator(self) -> Option<&'static str> {
        match self {
            Self::Less => Some("<"),
            Self::Equal => Some("=="),
            Self::LessEqual => Some("<="),
            Self::Greater => Some(">"),
            Self::NotEqual => Some("!="),
            Self::GreaterEqual => Some(">="),
            Self::Never | Self::Always => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlphaTest {
    pub enable: bool,
    pub func: CompareFunc,
}

/// Component type of a bound color render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorFormat {
    #[default]
    None,
    Float,
    Int,
    Uint,
}

/// `SQ_TEX_RESOURCE_WORD0.DIM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDim {
    Dim1D,
    #[default]
    Dim2D,
    Dim3D,
    Cubemap,
    Dim1DArray,
    Dim2DArray,
    Dim2DMsaa,
    Dim2DArrayMsaa,
}

impl TextureDim {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 7 {
            0 => Self::Dim1D,
            1 => Self::Dim2D,
            2 => Self::Dim3D,
            3 => Self::Cubemap,
            4 => Self::Dim1DArray,
            5 => Self::Dim2DArray,
            6 => Self::Dim2DMsaa,
            _ => Self::Dim2DArrayMsaa,
        }
    }
}

/// Per-unit texture resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureUnitState {
    pub dim: TextureDim,
    /// `NUM_FORMAT_ALL == NUM_FORMAT_INT`.
    pub integer_format: bool,
}

/// Pixel shader input semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PsInputSemantic {
    /// Interpolated parameter with the given semantic id (`0..=0xFF`).
    Parameter(u8),
    /// Fragment position (`SPI_PS_IN_CONTROL_0.POSITION_ENA`).
    Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PsInput {
    pub semantic: PsInputSemantic,
    pub flat: bool,
    pub no_perspective: bool,
}

impl PsInput {
    pub fn parameter(semantic_id: u8) -> Self {
        Self { semantic: PsInputSemantic::Parameter(semantic_id), flat: false, no_perspective: false }
    }
}

/// Pixel shader inputs in GPR order: input `i` lands in `R{i}`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PsInputTable {
    pub inputs: Vec<PsInput>,
    /// Point sprite coordinate generation (`SPI_INTERP_CONTROL_0.PNT_SPRITE_ENA`).
    pub point_sprite_gpr: Option<u32>,
}

impl PsInputTable {
    /// Index of the input carrying `semantic_id`.
    pub fn find_parameter(&self, semantic_id: u8) -> Option<usize> {
        self.inputs.iter().position(|input| input.semantic == PsInputSemantic::Parameter(semantic_id))
    }
}

/// Front face import (`SPI_PS_IN_CONTROL_1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrontFaceImport {
    pub gpr: u32,
    pub channel: u8,
    /// `FRONT_FACE_ALL_BITS`; the full-bit-pattern variant is not modeled.
    pub all_bits: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterState {
    pub primitive_mode: PrimitiveMode,
    pub gs_output_primitive: GsOutputPrimitive,
    /// `SQ_GS_VERT_ITEMSIZE` in dwords.
    pub gs_vert_itemsize: u32,
    /// `SQ_GSVS_RING_ITEMSIZE` in dwords.
    pub gsvs_ring_itemsize: u32,

    /// `VGT_STRMOUT_EN`.
    pub streamout_enable: bool,
    /// `VGT_STRMOUT_VTX_STRIDE_*` in dwords.
    pub streamout_vertex_stride: [u32; NUM_STREAMOUT_BUFFERS],

    /// `PA_CL_VTE_CNTL.VPORT_{X,Y,Z}_SCALE_ENA`.
    pub viewport_scale_enable: [bool; 3],
    /// `PA_CL_CLIP_CNTL.DX_CLIP_SPACE_DEF`.
    pub dx_clip_space: bool,
    /// Inverse of `PA_CL_CLIP_CNTL.DX_RASTERIZATION_KILL`.
    pub rasterization_enabled: bool,

    pub alpha_test: AlphaTest,
    /// `CB_SHADER_MASK`, four bits per color target.
    pub cb_shader_mask: u32,
    pub color_target_formats: [ColorFormat; NUM_COLOR_TARGETS],
    pub depth_write: bool,

    /// `SPI_VS_OUT_ID_*` flattened: parameter export index to semantic id.
    pub vs_output_semantic: [u8; 40],
    /// `SQ_VTX_SEMANTIC_*`: vertex shader attribute location to semantic id.
    pub vertex_semantic: [u32; 32],

    pub textures: [TextureUnitState; NUM_TEXTURE_UNITS],

    pub ps_inputs: PsInputTable,
    pub front_face: Option<FrontFaceImport>,
}

impl Default for RegisterState {
    fn default() -> Self {
        Self {
            primitive_mode: PrimitiveMode::Triangles,
            gs_output_primitive: GsOutputPrimitive::TriangleStrip,
            gs_vert_itemsize: 0,
            gsvs_ring_itemsize: 0,
            streamout_enable: false,
            streamout_vertex_stride: [0; NUM_STREAMOUT_BUFFERS],
            viewport_scale_enable: [true; 3],
            dx_clip_space: false,
            rasterization_enabled: true,
            alpha_test: AlphaTest::default(),
            cb_shader_mask: 0xF,
            color_target_formats: {
                let mut formats = [ColorFormat::None; NUM_COLOR_TARGETS];
                formats[0] = ColorFormat::Float;
                formats
            },
            depth_write: false,
            vs_output_semantic: std::array::from_fn(|i| i as u8),
            vertex_semantic: [0xFF; 32],
            textures: [TextureUnitState::default(); NUM_TEXTURE_UNITS],
            ps_inputs: PsInputTable::default(),
            front_face: None,
        }
    }
}

impl RegisterState {
    pub fn any_viewport_scale_disabled(&self) -> bool {
        self.viewport_scale_enable.iter().any(|enabled| !enabled)
    }

    /// Color target written by the `export_index`-th enabled pixel export.
    pub fn color_target_for_export(&self, export_index: u32) -> Option<usize> {
        (0..NUM_COLOR_TARGETS)
            .filter(|&target| (self.cb_shader_mask >> (target * 4)) & 0xF != 0)
            .nth(export_index as usize)
    }

    /// Semantic id of a vertex shader parameter export.
    pub fn vs_output_semantic_id(&self, export_index: u32) -> u8 {
        self.vs_output_semantic
            .get(export_index as usize)
            .copied()
            .unwrap_or(0xFF)
    }

    /// Attribute location for a fetch shader semantic id.
    pub fn vertex_attribute_location(&self, semantic_id: u8) -> Option<usize> {
        self.vertex_semantic
            .iter()
            .position(|&semantic| semantic == u32::from(semantic_id))
    }

    /// Maximum vertex count a geometry shader may emit according to its ring item sizes.
    pub fn gs_max_vertices(&self) -> u32 {
        let bytes_per_vertex = self.gs_vert_itemsize * 4;
        if bytes_per_vertex == 0 {
            return 0;
        }
        ((self.gsvs_ring_itemsize & 0x7FFF) * 4) / bytes_per_vertex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_targets_skip_masked_outputs() {
        let regs = RegisterState { cb_shader_mask: 0xF0F, ..RegisterState::default() };
        assert_eq!(regs.color_target_for_export(0), Some(0));
        assert_eq!(regs.color_target_for_export(1), Some(2));
        assert_eq!(regs.color_target_for_export(2), None);
    }

    #[test]
    fn gs_max_vertices_uses_item_sizes() {
        let regs = RegisterState { gs_vert_itemsize: 4, gsvs_ring_itemsize: 16 * 3, ..RegisterState::default() };
        assert_eq!(regs.gs_max_vertices(), 12);
    }
}
