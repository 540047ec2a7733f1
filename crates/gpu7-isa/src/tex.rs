//! TEX and VTX clause instruction words (four 32-bit words each).

use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct TexWord {
    pub words: [u32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexOpcode {
    /// Vertex fetch (`VTX_WORD*` encoding), used for uniform buffer and ring reads.
    VFetch,
    /// Memory read (`MEM_RD_WORD*` encoding).
    Mem,
    Ld,
    GetTextureResInfo,
    GetCompTexLod,
    GetGradientsH,
    GetGradientsV,
    SetGradientsH,
    SetGradientsV,
    SetCubemapIndex,
    Fetch4,
    Sample,
    SampleL,
    SampleLb,
    SampleLz,
    SampleG,
    SampleC,
    SampleCL,
    SampleCLz,
    Unknown(u32),
}

impl TexOpcode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::VFetch,
            0x02 => Self::Mem,
            0x03 => Self::Ld,
            0x04 => Self::GetTextureResInfo,
            0x06 => Self::GetCompTexLod,
            0x07 => Self::GetGradientsH,
            0x08 => Self::GetGradientsV,
            0x0B => Self::SetGradientsH,
            0x0C => Self::SetGradientsV,
            0x0E => Self::SetCubemapIndex,
            0x0F => Self::Fetch4,
            0x10 => Self::Sample,
            0x11 => Self::SampleL,
            0x12 => Self::SampleLb,
            0x13 => Self::SampleLz,
            0x14 => Self::SampleG,
            0x18 => Self::SampleC,
            0x19 => Self::SampleCL,
            0x1B => Self::SampleCLz,
            other => Self::Unknown(other),
        }
    }

    /// Opcodes decoded with the full texture-sample field layout.
    pub fn is_sample_like(self) -> bool {
        matches!(
            self,
            Self::Sample
                | Self::SampleL
                | Self::SampleLz
                | Self::SampleLb
                | Self::SampleC
                | Self::SampleCL
                | Self::SampleCLz
                | Self::Fetch4
                | Self::SampleG
                | Self::Ld
                | Self::GetTextureResInfo
                | Self::GetCompTexLod
        )
    }

    pub fn is_depth_compare(self) -> bool {
        matches!(self, Self::SampleC | Self::SampleCL | Self::SampleCLz)
    }
}

fn sign_extend(value: u32, bits: u32) -> i8 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as i8
}

impl TexWord {
    pub fn new(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub fn opcode(&self) -> TexOpcode {
        TexOpcode::from_raw(self.words[0] & 0x1F)
    }

    // Texture fetch fields.

    pub fn resource_id(&self) -> u32 {
        (self.words[0] >> 8) & 0xFF
    }

    pub fn src_gpr(&self) -> u32 {
        (self.words[0] >> 16) & 0x7F
    }

    pub fn src_rel(&self) -> bool {
        (self.words[0] >> 23) & 1 != 0
    }

    pub fn dst_gpr(&self) -> u32 {
        self.words[1] & 0x7F
    }

    pub fn dst_rel(&self) -> bool {
        (self.words[1] >> 7) & 1 != 0
    }

    /// Destination selects (shared by TEX and VTX encodings).
    pub fn dst_sel(&self) -> [u8; 4] {
        let w = self.words[1];
        [
            ((w >> 9) & 7) as u8,
            ((w >> 12) & 7) as u8,
            ((w >> 15) & 7) as u8,
            ((w >> 18) & 7) as u8,
        ]
    }

    /// Coordinate type bits; a clear bit means texel (unnormalized) coordinates.
    pub fn unnormalized(&self) -> [bool; 4] {
        let w = self.words[1];
        [0, 1, 2, 3].map(|i| (w >> (28 + i)) & 1 == 0)
    }

    pub fn lod_bias(&self) -> i8 {
        sign_extend((self.words[2] >> 21) & 0x7F, 7)
    }

    pub fn offsets(&self) -> [i8; 3] {
        let w = self.words[2];
        [
            sign_extend(w & 0x1F, 5),
            sign_extend((w >> 5) & 0x1F, 5),
            sign_extend((w >> 10) & 0x1F, 5),
        ]
    }

    pub fn sampler_id(&self) -> u32 {
        (self.words[2] >> 15) & 0x1F
    }

    pub fn src_sel(&self) -> [u8; 4] {
        let w = self.words[2];
        [
            ((w >> 20) & 7) as u8,
            ((w >> 23) & 7) as u8,
            ((w >> 26) & 7) as u8,
            ((w >> 29) & 7) as u8,
        ]
    }

    // Vertex fetch fields.

    pub fn fetch_type(&self) -> u32 {
        (self.words[0] >> 5) & 3
    }

    pub fn vtx_src_sel_x(&self) -> u8 {
        ((self.words[0] >> 24) & 3) as u8
    }

    pub fn vtx_offset(&self) -> u32 {
        self.words[2] & 0xFFFF
    }

    pub fn vtx_endian(&self) -> u32 {
        (self.words[2] >> 16) & 3
    }

    pub fn vtx_const_no_stride(&self) -> bool {
        (self.words[2] >> 18) & 1 != 0
    }

    pub fn vtx_format(&self) -> u32 {
        (self.words[1] >> 22) & 0x3F
    }

    pub fn vtx_num_format(&self) -> u32 {
        (self.words[1] >> 28) & 3
    }

    pub fn vtx_signed(&self) -> bool {
        (self.words[1] >> 30) & 1 != 0
    }

    // Memory read fields.

    pub fn mem_op(&self) -> u32 {
        (self.words[0] >> 8) & 7
    }

    pub fn mem_array_base(&self) -> u32 {
        self.words[2] & 0x1FFF
    }
}
