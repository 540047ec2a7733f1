//! Control-flow (CF) instruction words.
//!
//! Each CF instruction is a pair of little-endian 32-bit words. Non-ALU opcodes live in
//! bits 23..30 of the second word; once that field reaches `0x40` the bits overlap with
//! the ALU clause encoding, whose opcode is the 4-bit field at bit 26.

use bytemuck::{Pod, Zeroable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct CfWord {
    pub word0: u32,
    pub word1: u32,
}

/// ALU clause flavours; they differ only in how they touch the active-mask stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluCfKind {
    Alu,
    PushBefore,
    PopAfter,
    Pop2After,
    Break,
    ElseAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfOpcode {
    Nop,
    Tex,
    Vtx,
    VtxTc,
    LoopStart,
    LoopEnd,
    LoopStartDx10,
    LoopStartNoAl,
    LoopBreak,
    Jump,
    Else,
    Pop,
    Call,
    CallFs,
    Return,
    EmitVertex,
    /// `MEM_STREAM{n}_WRITE`, `n` selects the transform feedback buffer.
    MemStream(u8),
    MemRing,
    Export,
    ExportDone,
    Alu(AluCfKind),
    /// Opcode outside the recognized set (raw 7-bit or ALU 4-bit|0x40 value).
    Unknown(u32),
}

impl CfOpcode {
    pub const ALU_MASK: u32 = 0x40;

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0x00 => Self::Nop,
            0x01 => Self::Tex,
            0x02 => Self::Vtx,
            0x03 => Self::VtxTc,
            0x04 => Self::LoopStart,
            0x05 => Self::LoopEnd,
            0x06 => Self::LoopStartDx10,
            0x07 => Self::LoopStartNoAl,
            0x09 => Self::LoopBreak,
            0x0A => Self::Jump,
            0x0D => Self::Else,
            0x0E => Self::Pop,
            0x12 => Self::Call,
            0x13 => Self::CallFs,
            0x14 => Self::Return,
            0x15 => Self::EmitVertex,
            0x20..=0x23 => Self::MemStream((raw - 0x20) as u8),
            0x26 => Self::MemRing,
            0x27 => Self::Export,
            0x28 => Self::ExportDone,
            0x48 => Self::Alu(AluCfKind::Alu),
            0x49 => Self::Alu(AluCfKind::PushBefore),
            0x4A => Self::Alu(AluCfKind::PopAfter),
            0x4B => Self::Alu(AluCfKind::Pop2After),
            0x4E => Self::Alu(AluCfKind::Break),
            0x4F => Self::Alu(AluCfKind::ElseAfter),
            other => Self::Unknown(other),
        }
    }

    pub fn is_alu(self) -> bool {
        matches!(self, Self::Alu(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportType {
    Pixel,
    Position,
    Parameter,
    Unused,
}

impl ExportType {
    pub fn from_raw(raw: u32) -> Self {
        match raw & 3 {
            0 => Self::Pixel,
            1 => Self::Position,
            2 => Self::Parameter,
            _ => Self::Unused,
        }
    }
}

impl CfWord {
    pub fn new(word0: u32, word1: u32) -> Self {
        Self { word0, word1 }
    }

    /// The raw 7-bit opcode field; values `>= 0x40` select the ALU encoding.
    pub fn raw_opcode(&self) -> u32 {
        let cf_inst23_7 = (self.word1 >> 23) & 0x7F;
        if cf_inst23_7 < CfOpcode::ALU_MASK {
            cf_inst23_7
        } else {
            ((self.word1 >> 26) & 0xF) | CfOpcode::ALU_MASK
        }
    }

    pub fn opcode(&self) -> CfOpcode {
        CfOpcode::from_raw(self.raw_opcode())
    }

    // Fields shared by all non-ALU encodings.

    pub fn end_of_program(&self) -> bool {
        (self.word1 >> 21) & 1 != 0
    }

    /// Clause address in units of 8 bytes.
    pub fn addr(&self) -> u32 {
        self.word0
    }

    pub fn pop_count(&self) -> u32 {
        self.word1 & 7
    }

    pub fn cond(&self) -> u32 {
        (self.word1 >> 8) & 3
    }

    /// Clause instruction count. R700 adds a fourth count bit at position 19.
    pub fn count(&self) -> u32 {
        let mut count = (self.word1 >> 10) & 7;
        if (self.word1 >> 19) & 1 != 0 {
            count |= 8;
        }
        count + 1
    }

    pub fn call_count(&self) -> u32 {
        (self.word1 >> 13) & 0x3F
    }

    // Export / memory write encoding (CF_ALLOC_EXPORT).

    pub fn export_type(&self) -> u32 {
        (self.word0 >> 13) & 3
    }

    pub fn export_array_base(&self) -> u32 {
        self.word0 & 0x1FFF
    }

    pub fn export_source_gpr(&self) -> u32 {
        (self.word0 >> 15) & 0x7F
    }

    pub fn export_rw_rel(&self) -> bool {
        (self.word0 >> 22) & 1 != 0
    }

    pub fn export_index_gpr(&self) -> u32 {
        (self.word0 >> 23) & 0x7F
    }

    pub fn export_elem_size(&self) -> u32 {
        (self.word0 >> 30) & 3
    }

    /// Component selects for the swizzled export form (`0..=3` channel, 4 = 0.0, 5 = 1.0, 7 = masked).
    pub fn export_component_sel(&self) -> [u8; 4] {
        [
            (self.word1 & 7) as u8,
            ((self.word1 >> 3) & 7) as u8,
            ((self.word1 >> 6) & 7) as u8,
            ((self.word1 >> 9) & 7) as u8,
        ]
    }

    pub fn export_burst_count(&self) -> u32 {
        (self.word1 >> 17) & 0xF
    }

    pub fn mem_array_size(&self) -> u32 {
        self.word1 & 0xFFF
    }

    pub fn mem_comp_mask(&self) -> u8 {
        ((self.word1 >> 12) & 0xF) as u8
    }

    // ALU clause encoding.

    pub fn alu_addr(&self) -> u32 {
        self.word0 & 0x3F_FFFF
    }

    pub fn alu_count(&self) -> u32 {
        ((self.word1 >> 18) & 0x7F) + 1
    }

    pub fn kcache_bank0(&self) -> u32 {
        (self.word0 >> 22) & 0xF
    }

    pub fn kcache_bank1(&self) -> u32 {
        (self.word0 >> 26) & 0xF
    }

    /// First uniform index (in vec4 units) of kcache window 0.
    pub fn kcache_addr0(&self) -> u32 {
        ((self.word1 >> 2) & 0xFF) * 16
    }

    pub fn kcache_addr1(&self) -> u32 {
        ((self.word1 >> 10) & 0xFF) * 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alu_encoding_does_not_alias_non_alu_opcodes() {
        // ALU_PUSH_BEFORE: bits 26..29 = 0x9, which puts 0x4x/0x5x into bits 23..29.
        let word = CfWord::new(0, 0x9 << 26);
        assert_eq!(word.opcode(), CfOpcode::Alu(AluCfKind::PushBefore));

        let export = CfWord::new(0, 0x27 << 23);
        assert_eq!(export.opcode(), CfOpcode::Export);
    }

    #[test]
    fn count_uses_the_r700_extension_bit() {
        let word = CfWord::new(0, (3 << 10) | (1 << 19));
        assert_eq!(word.count(), 12);
    }

    #[test]
    fn kcache_fields() {
        let word = CfWord::new((2 << 22) | (5 << 26) | 0x10, (3 << 2) | (1 << 10) | (7 << 18));
        assert_eq!(word.alu_addr(), 0x10);
        assert_eq!(word.kcache_bank0(), 2);
        assert_eq!(word.kcache_bank1(), 5);
        assert_eq!(word.kcache_addr0(), 48);
        assert_eq!(word.kcache_addr1(), 16);
        assert_eq!(word.alu_count(), 8);
    }
}
