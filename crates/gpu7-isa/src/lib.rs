//! Instruction encodings for the GPU7 ("Latte", R600/R700 family) shader ISA.
//!
//! This crate only describes the raw machine words: control-flow (CF) word pairs, ALU
//! instruction words, TEX/VTX fetch words, and the vertex fetch formats referenced by
//! fetch shaders. It also carries the typed snapshot of fixed-function register state the
//! decompiler consumes. Nothing in here allocates beyond owned lists or performs I/O.

#![forbid(unsafe_code)]

pub mod alu;
pub mod asm;
pub mod cf;
pub mod fetch;
pub mod regs;
pub mod tex;

pub use alu::{AluSrc, AluWord, Op2, Op3};
pub use cf::{AluCfKind, CfOpcode, CfWord, ExportType};
pub use fetch::{AttributeBufferGroup, Endian, FetchShader, FetchType, NumFormat, VertexAttribute, VertexFormat};
pub use regs::{
    AlphaTest, ColorFormat, CompareFunc, FrontFaceImport, GsOutputPrimitive, PrimitiveMode, PsInput,
    PsInputSemantic, PsInputTable, RegisterState, TextureDim, TextureUnitState,
};
pub use tex::{TexOpcode, TexWord};

/// Size of one CF instruction in bytes (two 32-bit words).
pub const CF_INSTRUCTION_BYTES: usize = 8;
/// Size of one TEX/VTX clause instruction in bytes (four 32-bit words).
pub const TEX_INSTRUCTION_BYTES: usize = 16;

/// Number of general purpose registers addressable by a shader.
pub const NUM_GPR: usize = 128;
/// Number of texture units per shader stage.
pub const NUM_TEXTURE_UNITS: usize = 18;
/// Number of uniform (kcache) buffers per shader stage.
pub const NUM_UNIFORM_BUFFERS: usize = 16;
/// Number of transform feedback (stream out) buffers.
pub const NUM_STREAMOUT_BUFFERS: usize = 4;
/// Number of color render targets.
pub const NUM_COLOR_TARGETS: usize = 8;
/// Number of vertex buffers a fetch shader can read from.
pub const NUM_VERTEX_BUFFERS: u32 = 16;

/// Export array base used for `gl_Position`.
pub const EXPORT_BASE_POSITION: u32 = 60;
/// Export array base used for the point size (vertex) or depth (pixel) output.
pub const EXPORT_BASE_POINT_SIZE_OR_DEPTH: u32 = 61;

/// Vertex fetch buffer id of the first uniform buffer (`0x80..=0x8F`).
pub const FETCH_BUFFER_UNIFORM_BASE: u32 = 0x80;
/// Vertex fetch buffer id of the geometry shader input ring.
pub const FETCH_BUFFER_GS_RING: u32 = 0x9F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
}

impl ShaderStage {
    /// Suffix appended to stage-local identifiers (`uf_remappedVS`, `textureUnitPS0`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "VS",
            ShaderStage::Pixel => "PS",
            ShaderStage::Geometry => "GS",
        }
    }

    pub fn all() -> [ShaderStage; 3] {
        [ShaderStage::Vertex, ShaderStage::Pixel, ShaderStage::Geometry]
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Geometry => "geometry",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Per-channel mask in `xyzw` order.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelMask: u8 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const W = 1 << 3;
    }
}

impl ChannelMask {
    pub fn channel(index: usize) -> Self {
        Self::from_bits_truncate(1u8 << (index & 3))
    }

    /// Index of the highest set channel plus one (0 for an empty mask).
    pub fn width(self) -> usize {
        8 - self.bits().leading_zeros() as usize
    }
}

/// Component name for a channel index.
pub fn channel_name(index: usize) -> char {
    ['x', 'y', 'z', 'w'][index & 3]
}
