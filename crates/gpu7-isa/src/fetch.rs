//! Vertex fetch formats and the pre-parsed fetch shader description.
//!
//! The fetch shader is parsed by the caller (it runs as a subroutine of the vertex shader on
//! hardware); the decompiler only needs the attribute list grouped by vertex buffer.

/// Data format of a fetched vertex element (`FMT_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Fmt8,
    Fmt16,
    Fmt16Float,
    Fmt8_8,
    Fmt32,
    Fmt32Float,
    Fmt16_16,
    Fmt16_16Float,
    Fmt2_10_10_10,
    Fmt8_8_8_8,
    Fmt10_10_10_2,
    Fmt32_32,
    Fmt32_32Float,
    Fmt16_16_16_16,
    Fmt16_16_16_16Float,
    Fmt32_32_32_32,
    Fmt32_32_32_32Float,
    Fmt32_32_32,
    Fmt32_32_32Float,
    Unknown(u32),
}

impl VertexFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x01 => Self::Fmt8,
            0x05 => Self::Fmt16,
            0x06 => Self::Fmt16Float,
            0x07 => Self::Fmt8_8,
            0x0D => Self::Fmt32,
            0x0E => Self::Fmt32Float,
            0x0F => Self::Fmt16_16,
            0x10 => Self::Fmt16_16Float,
            0x19 => Self::Fmt2_10_10_10,
            0x1A => Self::Fmt8_8_8_8,
            0x1B => Self::Fmt10_10_10_2,
            0x1D => Self::Fmt32_32,
            0x1E => Self::Fmt32_32Float,
            0x1F => Self::Fmt16_16_16_16,
            0x20 => Self::Fmt16_16_16_16Float,
            0x22 => Self::Fmt32_32_32_32,
            0x23 => Self::Fmt32_32_32_32Float,
            0x2F => Self::Fmt32_32_32,
            0x30 => Self::Fmt32_32_32Float,
            other => Self::Unknown(other),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Fmt8 => 0x01,
            Self::Fmt16 => 0x05,
            Self::Fmt16Float => 0x06,
            Self::Fmt8_8 => 0x07,
            Self::Fmt32 => 0x0D,
            Self::Fmt32Float => 0x0E,
            Self::Fmt16_16 => 0x0F,
            Self::Fmt16_16Float => 0x10,
            Self::Fmt2_10_10_10 => 0x19,
            Self::Fmt8_8_8_8 => 0x1A,
            Self::Fmt10_10_10_2 => 0x1B,
            Self::Fmt32_32 => 0x1D,
            Self::Fmt32_32Float => 0x1E,
            Self::Fmt16_16_16_16 => 0x1F,
            Self::Fmt16_16_16_16Float => 0x20,
            Self::Fmt32_32_32_32 => 0x22,
            Self::Fmt32_32_32_32Float => 0x23,
            Self::Fmt32_32_32 => 0x2F,
            Self::Fmt32_32_32Float => 0x30,
            Self::Unknown(raw) => raw,
        }
    }

    /// Number of components the format produces.
    pub fn component_count(self) -> usize {
        match self {
            Self::Fmt8 | Self::Fmt16 | Self::Fmt16Float | Self::Fmt32 | Self::Fmt32Float => 1,
            Self::Fmt8_8 | Self::Fmt16_16 | Self::Fmt16_16Float | Self::Fmt32_32 | Self::Fmt32_32Float => 2,
            Self::Fmt32_32_32 | Self::Fmt32_32_32Float => 3,
            Self::Fmt2_10_10_10
            | Self::Fmt8_8_8_8
            | Self::Fmt10_10_10_2
            | Self::Fmt16_16_16_16
            | Self::Fmt16_16_16_16Float
            | Self::Fmt32_32_32_32
            | Self::Fmt32_32_32_32Float => 4,
            Self::Unknown(_) => 0,
        }
    }
}

/// Number interpretation (`NUM_FORMAT_ALL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumFormat {
    /// Normalized to `[0, 1]` or `[-1, 1]`.
    Norm,
    Int,
    /// Converted to float without normalization.
    Scaled,
}

impl NumFormat {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Norm,
            1 => Self::Int,
            _ => Self::Scaled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    None,
    Swap8In16,
    Swap8In32,
}

impl Endian {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            1 => Self::Swap8In16,
            2 => Self::Swap8In32,
            _ => Self::None,
        }
    }
}

/// Vertex buffer index source (`VTX_FETCH_TYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchType {
    /// Indexed by vertex id.
    #[default]
    Vertex,
    /// Indexed by instance id.
    Instance,
    /// Always reads element zero.
    NoIndexOffset,
}

impl FetchType {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            1 => Self::Instance,
            2 => Self::NoIndexOffset,
            _ => Self::Vertex,
        }
    }
}

/// One vertex attribute read by the fetch shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Semantic id the vertex shader matches against `SQ_VTX_SEMANTIC_*`; `0xFF` is unused.
    pub semantic_id: u8,
    pub buffer_index: u32,
    /// Byte offset within the vertex.
    pub offset: u32,
    pub format: VertexFormat,
    pub num_format: NumFormat,
    pub signed: bool,
    pub endian: Endian,
    pub fetch_type: FetchType,
    /// Destination select per register channel (`0..=3` component, 4 = 0, 5 = 1).
    pub dst_sel: [u8; 4],
}

impl VertexAttribute {
    pub const UNUSED_SEMANTIC: u8 = 0xFF;

    pub fn new(semantic_id: u8, buffer_index: u32, format: VertexFormat) -> Self {
        Self {
            semantic_id,
            buffer_index,
            offset: 0,
            format,
            num_format: NumFormat::Norm,
            signed: false,
            endian: Endian::None,
            fetch_type: FetchType::Vertex,
            dst_sel: [0, 1, 2, 3],
        }
    }
}

/// Attributes sharing one vertex buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeBufferGroup {
    pub buffer_index: u32,
    /// Vertex stride in bytes (`SQ_VTX_CONSTANT_WORD2`).
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchShader {
    pub groups: Vec<AttributeBufferGroup>,
    /// Groups referring to vertex buffers that do not exist; their attributes read as zero.
    pub invalid_groups: Vec<AttributeBufferGroup>,
}

impl FetchShader {
    pub fn attributes(&self) -> impl Iterator<Item = &VertexAttribute> {
        self.groups
            .iter()
            .chain(self.invalid_groups.iter())
            .flat_map(|group| group.attributes.iter())
    }

    pub fn valid_attributes(&self) -> impl Iterator<Item = (&AttributeBufferGroup, &VertexAttribute)> {
        self.groups
            .iter()
            .flat_map(|group| group.attributes.iter().map(move |attr| (group, attr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_raw_values_round_trip_for_known_formats() {
        for raw in 0..0x40 {
            let format = VertexFormat::from_raw(raw);
            assert_eq!(format.to_raw(), raw);
        }
        assert_eq!(VertexFormat::from_raw(0x1A).component_count(), 4);
    }
}
