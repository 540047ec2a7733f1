//! ALU clause instruction words.

use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct AluWord {
    pub word0: u32,
    pub word1: u32,
}

/// Two-operand ALU opcodes (11-bit field at bit 7 of the second word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op2 {
    Add,
    Mul,
    MulIeee,
    Max,
    Min,
    MaxDx10,
    MinDx10,
    SetE,
    SetGt,
    SetGe,
    SetNe,
    SetEDx10,
    SetGtDx10,
    SetGeDx10,
    SetNeDx10,
    Fract,
    Trunc,
    Ceil,
    Rndne,
    Floor,
    MovaFloor,
    MovaInt,
    Mov,
    Nop,
    PredSetE,
    PredSetGt,
    PredSetGe,
    PredSetNe,
    KillE,
    KillGt,
    KillGe,
    KillNe,
    AndInt,
    OrInt,
    XorInt,
    NotInt,
    AddInt,
    SubInt,
    MaxInt,
    MinInt,
    MaxUint,
    MinUint,
    SetEInt,
    SetGtInt,
    SetGeInt,
    SetNeInt,
    SetGtUint,
    SetGeUint,
    PredSetEInt,
    PredSetGtInt,
    PredSetGeInt,
    PredSetNeInt,
    KillEInt,
    KillGtInt,
    KillGeInt,
    KillNeInt,
    Dot4,
    Dot4Ieee,
    Cube,
    ExpIeee,
    LogClamped,
    LogIeee,
    RecipFf,
    RecipIeee,
    RecipsqrtClamped,
    RecipsqrtFf,
    RecipsqrtIeee,
    SqrtIeee,
    FltToInt,
    IntToFloat,
    UintToFloat,
    Sin,
    Cos,
    AshrInt,
    LshrInt,
    LshlInt,
    MulloInt,
    MulloUint,
    FltToUint,
    Unknown(u32),
}

impl Op2 {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::Add,
            0x01 => Self::Mul,
            0x02 => Self::MulIeee,
            0x03 => Self::Max,
            0x04 => Self::Min,
            0x05 => Self::MaxDx10,
            0x06 => Self::MinDx10,
            0x08 => Self::SetE,
            0x09 => Self::SetGt,
            0x0A => Self::SetGe,
            0x0B => Self::SetNe,
            0x0C => Self::SetEDx10,
            0x0D => Self::SetGtDx10,
            0x0E => Self::SetGeDx10,
            0x0F => Self::SetNeDx10,
            0x10 => Self::Fract,
            0x11 => Self::Trunc,
            0x12 => Self::Ceil,
            0x13 => Self::Rndne,
            0x14 => Self::Floor,
            0x16 => Self::MovaFloor,
            0x18 => Self::MovaInt,
            0x19 => Self::Mov,
            0x1A => Self::Nop,
            0x20 => Self::PredSetE,
            0x21 => Self::PredSetGt,
            0x22 => Self::PredSetGe,
            0x23 => Self::PredSetNe,
            0x2C => Self::KillE,
            0x2D => Self::KillGt,
            0x2E => Self::KillGe,
            0x2F => Self::KillNe,
            0x30 => Self::AndInt,
            0x31 => Self::OrInt,
            0x32 => Self::XorInt,
            0x33 => Self::NotInt,
            0x34 => Self::AddInt,
            0x35 => Self::SubInt,
            0x36 => Self::MaxInt,
            0x37 => Self::MinInt,
            0x38 => Self::MaxUint,
            0x39 => Self::MinUint,
            0x3A => Self::SetEInt,
            0x3B => Self::SetGtInt,
            0x3C => Self::SetGeInt,
            0x3D => Self::SetNeInt,
            0x3E => Self::SetGtUint,
            0x3F => Self::SetGeUint,
            0x42 => Self::PredSetEInt,
            0x43 => Self::PredSetGtInt,
            0x44 => Self::PredSetGeInt,
            0x45 => Self::PredSetNeInt,
            0x46 => Self::KillEInt,
            0x47 => Self::KillGtInt,
            0x48 => Self::KillGeInt,
            0x49 => Self::KillNeInt,
            0x50 => Self::Dot4,
            0x51 => Self::Dot4Ieee,
            0x52 => Self::Cube,
            0x61 => Self::ExpIeee,
            0x62 => Self::LogClamped,
            0x63 => Self::LogIeee,
            0x65 => Self::RecipFf,
            0x66 => Self::RecipIeee,
            0x67 => Self::RecipsqrtClamped,
            0x68 => Self::RecipsqrtFf,
            0x69 => Self::RecipsqrtIeee,
            0x6A => Self::SqrtIeee,
            0x6B => Self::FltToInt,
            0x6C => Self::IntToFloat,
            0x6D => Self::UintToFloat,
            0x6E => Self::Sin,
            0x6F => Self::Cos,
            0x70 => Self::AshrInt,
            0x71 => Self::LshrInt,
            0x72 => Self::LshlInt,
            0x73 => Self::MulloInt,
            0x75 => Self::MulloUint,
            0x79 => Self::FltToUint,
            other => Self::Unknown(other),
        }
    }

    /// Instructions that can only issue on the transcendental (scalar) unit.
    pub fn is_trans_only(self) -> bool {
        matches!(
            self,
            Self::Cos
                | Self::Sin
                | Self::RecipFf
                | Self::RecipIeee
                | Self::RecipsqrtIeee
                | Self::RecipsqrtClamped
                | Self::RecipsqrtFf
                | Self::MulloInt
                | Self::MulloUint
                | Self::FltToInt
                | Self::FltToUint
                | Self::IntToFloat
                | Self::UintToFloat
                | Self::LogClamped
                | Self::LogIeee
                | Self::ExpIeee
                | Self::SqrtIeee
        )
    }

    /// Instructions whose inputs or outputs are integer bit patterns.
    pub fn uses_integer_values(self) -> bool {
        matches!(
            self,
            Self::FltToInt
                | Self::IntToFloat
                | Self::UintToFloat
                | Self::AshrInt
                | Self::LshrInt
                | Self::LshlInt
                | Self::MulloInt
                | Self::MulloUint
                | Self::FltToUint
                | Self::AndInt
                | Self::OrInt
                | Self::XorInt
                | Self::NotInt
                | Self::AddInt
                | Self::SubInt
                | Self::MaxInt
                | Self::MinInt
                | Self::SetEInt
                | Self::SetGtInt
                | Self::SetGeInt
                | Self::SetNeInt
                | Self::SetGtUint
                | Self::SetGeUint
                | Self::PredSetEInt
                | Self::PredSetGtInt
                | Self::PredSetGeInt
                | Self::PredSetNeInt
                | Self::KillEInt
                | Self::KillGtInt
                | Self::KillGeInt
                | Self::KillNeInt
                | Self::MovaFloor
                | Self::MovaInt
                | Self::SetEDx10
                | Self::SetGtDx10
                | Self::SetGeDx10
                | Self::SetNeDx10
        )
    }

    /// Reductions consume all four vector slots of a group.
    pub fn is_reduction(self) -> bool {
        matches!(self, Self::Dot4 | Self::Dot4Ieee | Self::Cube)
    }

    pub fn is_predicate_set(self) -> bool {
        matches!(
            self,
            Self::PredSetE
                | Self::PredSetGt
                | Self::PredSetGe
                | Self::PredSetNe
                | Self::PredSetEInt
                | Self::PredSetGtInt
                | Self::PredSetGeInt
                | Self::PredSetNeInt
        )
    }

    pub fn is_kill(self) -> bool {
        matches!(
            self,
            Self::KillE
                | Self::KillGt
                | Self::KillGe
                | Self::KillNe
                | Self::KillEInt
                | Self::KillGtInt
                | Self::KillGeInt
                | Self::KillNeInt
        )
    }
}

/// Three-operand ALU opcodes (5-bit field at bit 13 of the second word, `>= 8`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op3 {
    MulAdd,
    MulAddM2,
    MulAddM4,
    MulAddD2,
    MulAddIeee,
    CmovE,
    CmovGt,
    CmovGe,
    CndEInt,
    CndGtInt,
    CmovGeInt,
    Unknown(u32),
}

impl Op3 {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x10 => Self::MulAdd,
            0x11 => Self::MulAddM2,
            0x12 => Self::MulAddM4,
            0x13 => Self::MulAddD2,
            0x14 => Self::MulAddIeee,
            0x18 => Self::CmovE,
            0x19 => Self::CmovGt,
            0x1A => Self::CmovGe,
            0x1C => Self::CndEInt,
            0x1D => Self::CndGtInt,
            0x1E => Self::CmovGeInt,
            other => Self::Unknown(other),
        }
    }

    pub fn uses_integer_values(self) -> bool {
        matches!(self, Self::CndEInt | Self::CndGtInt | Self::CmovGeInt)
    }
}

/// Classified ALU source selector (the 9-bit `SRC*_SEL` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluSrc {
    Gpr(u32),
    /// Kcache window 0, index relative to the clause's window base.
    KCache0(u32),
    KCache1(u32),
    ConstFloat0,
    ConstFloat1,
    ConstInt1,
    ConstIntMinus1,
    ConstFloatHalf,
    Literal,
    PreviousVector,
    PreviousScalar,
    /// Uniform register file (`c0..c255`).
    CFile(u32),
    Unknown(u32),
}

impl AluSrc {
    pub fn from_sel(sel: u32) -> Self {
        match sel {
            0..=127 => Self::Gpr(sel),
            128..=159 => Self::KCache0(sel - 128),
            160..=191 => Self::KCache1(sel - 160),
            248 => Self::ConstFloat0,
            249 => Self::ConstFloat1,
            250 => Self::ConstInt1,
            251 => Self::ConstIntMinus1,
            252 => Self::ConstFloatHalf,
            253 => Self::Literal,
            254 => Self::PreviousVector,
            255 => Self::PreviousScalar,
            256..=511 => Self::CFile(sel & 0xFF),
            other => Self::Unknown(other),
        }
    }

    pub fn is_uniform(self) -> bool {
        matches!(self, Self::KCache0(_) | Self::KCache1(_) | Self::CFile(_))
    }
}

/// Raw selector value of the literal source.
pub const SRC_SEL_LITERAL: u32 = 253;

impl AluWord {
    pub fn new(word0: u32, word1: u32) -> Self {
        Self { word0, word1 }
    }

    pub fn is_op3(&self) -> bool {
        (self.word1 >> 13) & 0x1F >= 8
    }

    pub fn op2_code(&self) -> u32 {
        (self.word1 >> 7) & 0x7FF
    }

    pub fn op3_code(&self) -> u32 {
        (self.word1 >> 13) & 0x1F
    }

    pub fn last_in_group(&self) -> bool {
        self.word0 & 0x8000_0000 != 0
    }

    pub fn index_mode(&self) -> u32 {
        (self.word0 >> 26) & 7
    }

    pub fn pred_sel(&self) -> u32 {
        (self.word0 >> 29) & 3
    }

    /// Source selector, relative flag, channel and negate for operand 0 or 1 (word 0).
    pub fn src01(&self, index: usize) -> (u32, bool, u8, bool) {
        let shift = if index == 0 { 0 } else { 13 };
        let bits = self.word0 >> shift;
        (
            bits & 0x1FF,
            (bits >> 9) & 1 != 0,
            ((bits >> 10) & 3) as u8,
            (bits >> 12) & 1 != 0,
        )
    }

    /// Operand 2 of the OP3 encoding (word 1).
    pub fn src2(&self) -> (u32, bool, u8, bool) {
        let bits = self.word1;
        (
            bits & 0x1FF,
            (bits >> 9) & 1 != 0,
            ((bits >> 10) & 3) as u8,
            (bits >> 12) & 1 != 0,
        )
    }

    /// Absolute-value modifiers of the OP2 encoding.
    pub fn src_abs(&self, index: usize) -> bool {
        (self.word1 >> index) & 1 != 0
    }

    pub fn update_exec_mask(&self) -> bool {
        (self.word1 >> 2) & 1 != 0
    }

    pub fn update_pred(&self) -> bool {
        (self.word1 >> 3) & 1 != 0
    }

    pub fn op2_write_mask(&self) -> bool {
        (self.word1 >> 4) & 1 != 0
    }

    pub fn op2_omod(&self) -> u8 {
        ((self.word1 >> 5) & 3) as u8
    }

    pub fn dst_gpr(&self) -> u32 {
        (self.word1 >> 21) & 0x7F
    }

    pub fn dst_rel(&self) -> bool {
        (self.word1 >> 28) & 1 != 0
    }

    pub fn dst_elem(&self) -> u8 {
        ((self.word1 >> 29) & 3) as u8
    }

    pub fn dst_clamp(&self) -> bool {
        (self.word1 >> 31) & 1 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_selector_ranges() {
        assert_eq!(AluSrc::from_sel(5), AluSrc::Gpr(5));
        assert_eq!(AluSrc::from_sel(130), AluSrc::KCache0(2));
        assert_eq!(AluSrc::from_sel(161), AluSrc::KCache1(1));
        assert_eq!(AluSrc::from_sel(253), AluSrc::Literal);
        assert_eq!(AluSrc::from_sel(300), AluSrc::CFile(44));
        assert_eq!(AluSrc::from_sel(200), AluSrc::Unknown(200));
    }

    #[test]
    fn op3_threshold() {
        let muladd = AluWord::new(0, 0x10 << 13);
        assert!(muladd.is_op3());
        assert_eq!(Op3::from_raw(muladd.op3_code()), Op3::MulAdd);

        let mov = AluWord::new(0, 0x19 << 7);
        assert!(!mov.is_op3());
        assert_eq!(Op2::from_raw(mov.op2_code()), Op2::Mov);
    }
}
