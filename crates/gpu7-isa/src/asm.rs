//! Minimal microcode encoders.
//!
//! These are the inverse of the field accessors on [`CfWord`](crate::CfWord),
//! [`AluWord`](crate::AluWord) and [`TexWord`](crate::TexWord). They exist to hand-assemble small
//! programs for tests and benchmarks; there is no parser for assembly text.

use crate::alu::SRC_SEL_LITERAL;

/// Raw ALU source selectors.
pub mod sel {
    pub const fn gpr(index: u32) -> u32 {
        index
    }
    pub const fn kcache0(index: u32) -> u32 {
        128 + index
    }
    pub const fn kcache1(index: u32) -> u32 {
        160 + index
    }
    pub const fn cfile(index: u32) -> u32 {
        256 + index
    }
    pub const CONST_0: u32 = 248;
    pub const CONST_1_F: u32 = 249;
    pub const CONST_1_I: u32 = 250;
    pub const CONST_M1_I: u32 = 251;
    pub const CONST_0_5_F: u32 = 252;
    pub const LITERAL: u32 = super::SRC_SEL_LITERAL;
    pub const PV: u32 = 254;
    pub const PS: u32 = 255;
}

/// Growable program image addressed in 32-bit words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramBuilder {
    words: Vec<u32>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a CF word pair at CF address `addr`.
    pub fn cf(&mut self, addr: usize, pair: [u32; 2]) -> &mut Self {
        self.put(addr * 2, &pair)
    }

    /// Writes ALU slots (word pairs) starting at `addr` (8-byte units).
    pub fn alu(&mut self, addr: usize, slots: &[[u32; 2]]) -> &mut Self {
        let flat: Vec<u32> = slots.iter().flatten().copied().collect();
        self.put(addr * 2, &flat)
    }

    /// Writes TEX/VTX instructions starting at `addr` (8-byte units).
    pub fn tex(&mut self, addr: usize, instructions: &[[u32; 4]]) -> &mut Self {
        let flat: Vec<u32> = instructions.iter().flatten().copied().collect();
        self.put(addr * 2, &flat)
    }

    pub fn put(&mut self, word_index: usize, words: &[u32]) -> &mut Self {
        let end = word_index + words.len();
        if self.words.len() < end {
            self.words.resize(end, 0);
        }
        self.words[word_index..end].copy_from_slice(words);
        self
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

/// Raw CF opcodes.
pub mod cf_op {
    pub const NOP: u32 = 0x00;
    pub const TEX: u32 = 0x01;
    pub const VTX: u32 = 0x02;
    pub const LOOP_START_DX10: u32 = 0x06;
    pub const LOOP_END: u32 = 0x05;
    pub const LOOP_BREAK: u32 = 0x09;
    pub const JUMP: u32 = 0x0A;
    pub const ELSE: u32 = 0x0D;
    pub const POP: u32 = 0x0E;
    pub const CALL: u32 = 0x12;
    pub const CALL_FS: u32 = 0x13;
    pub const RETURN: u32 = 0x14;
    pub const EMIT_VERTEX: u32 = 0x15;
    pub const MEM_STREAM0: u32 = 0x20;
    pub const MEM_STREAM1: u32 = 0x21;
    pub const MEM_RING: u32 = 0x26;
    pub const EXPORT: u32 = 0x27;
    pub const EXPORT_DONE: u32 = 0x28;

    /// ALU clause kinds (4-bit field at bit 26).
    pub const ALU: u32 = 0x8;
    pub const ALU_PUSH_BEFORE: u32 = 0x9;
    pub const ALU_POP_AFTER: u32 = 0xA;
    pub const ALU_POP2_AFTER: u32 = 0xB;
    pub const ALU_BREAK: u32 = 0xE;
    pub const ALU_ELSE_AFTER: u32 = 0xF;
}

/// Generic non-ALU CF instruction.
pub fn cf_inst(opcode: u32, addr: u32, count: u32, end_of_program: bool) -> [u32; 2] {
    let count = count.saturating_sub(1);
    let word1 = ((count & 7) << 10)
        | (((count >> 3) & 1) << 19)
        | (u32::from(end_of_program) << 21)
        | ((opcode & 0x7F) << 23);
    [addr, word1]
}

/// CF instruction carrying a pop count (`POP`, `ELSE`, loops).
pub fn cf_pop(opcode: u32, pop_count: u32) -> [u32; 2] {
    [0, (pop_count & 7) | ((opcode & 0x7F) << 23)]
}

pub fn cf_call(addr: u32) -> [u32; 2] {
    [addr, (cf_op::CALL & 0x7F) << 23]
}

/// ALU clause of `count` slots at `addr` with no kcache windows.
pub fn cf_alu(kind: u32, addr: u32, count: u32) -> [u32; 2] {
    cf_alu_kcache(kind, addr, count, [(0, 0), (0, 0)])
}

/// ALU clause with kcache windows given as `(bank, base / 16)`.
pub fn cf_alu_kcache(kind: u32, addr: u32, count: u32, kcache: [(u32, u32); 2]) -> [u32; 2] {
    let word0 = (addr & 0x3F_FFFF) | ((kcache[0].0 & 0xF) << 22) | ((kcache[1].0 & 0xF) << 26);
    let word1 = ((kcache[0].1 & 0xFF) << 2)
        | ((kcache[1].1 & 0xFF) << 10)
        | ((count.saturating_sub(1) & 0x7F) << 18)
        | ((kind & 0xF) << 26);
    [word0, word1]
}

/// `EXPORT` / `EXPORT_DONE` with a component swizzle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub done: bool,
    pub export_type: u32,
    pub array_base: u32,
    pub src_gpr: u32,
    pub burst_count: u32,
    pub comp_sel: [u8; 4],
    pub end_of_program: bool,
}

impl Export {
    /// Exports `R{src_gpr}.xyzw` to `array_base` of the given type (0 pixel, 1 position, 2 parameter).
    pub fn new(export_type: u32, array_base: u32, src_gpr: u32) -> Self {
        Self {
            done: false,
            export_type,
            array_base,
            src_gpr,
            burst_count: 0,
            comp_sel: [0, 1, 2, 3],
            end_of_program: false,
        }
    }

    pub fn done(mut self) -> Self {
        self.done = true;
        self
    }

    pub fn burst(mut self, burst_count: u32) -> Self {
        self.burst_count = burst_count;
        self
    }

    pub fn end(mut self) -> Self {
        self.end_of_program = true;
        self
    }

    pub fn encode(&self) -> [u32; 2] {
        let opcode = if self.done {
            cf_op::EXPORT_DONE
        } else {
            cf_op::EXPORT
        };
        let word0 = (self.array_base & 0x1FFF) | ((self.export_type & 3) << 13) | ((self.src_gpr & 0x7F) << 15);
        let sel = self.comp_sel.map(|s| u32::from(s) & 7);
        let word1 = sel[0]
            | (sel[1] << 3)
            | (sel[2] << 6)
            | (sel[3] << 9)
            | ((self.burst_count & 0xF) << 17)
            | (u32::from(self.end_of_program) << 21)
            | (opcode << 23);
        [word0, word1]
    }
}

/// `MEM_STREAM*` / `MEM_RING` write.
pub fn cf_mem_write(opcode: u32, array_base: u32, comp_mask: u8, src_gpr: u32, burst_count: u32) -> [u32; 2] {
    let word0 = (array_base & 0x1FFF) | ((src_gpr & 0x7F) << 15) | (3 << 30);
    let word1 = (u32::from(comp_mask & 0xF) << 12) | ((burst_count & 0xF) << 17) | ((opcode & 0x7F) << 23);
    [word0, word1]
}

/// Builder for one ALU instruction slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alu {
    op3: bool,
    opcode: u32,
    src: [(u32, u8, bool, bool, bool); 3],
    dst_gpr: u32,
    dst_elem: u8,
    dst_rel: bool,
    write: bool,
    omod: u8,
    clamp: bool,
    update_exec_mask: bool,
    update_pred: bool,
    last: bool,
}

impl Alu {
    pub fn op2(opcode: u32) -> Self {
        Self {
            op3: false,
            opcode,
            src: [(sel::CONST_0, 0, false, false, false); 3],
            dst_gpr: 0,
            dst_elem: 0,
            dst_rel: false,
            write: true,
            omod: 0,
            clamp: false,
            update_exec_mask: false,
            update_pred: false,
            last: false,
        }
    }

    pub fn op3(opcode: u32) -> Self {
        Self {
            op3: true,
            ..Self::op2(opcode)
        }
    }

    /// Sets operand `index` to selector `sel` reading channel `chan`.
    pub fn src(mut self, index: usize, sel: u32, chan: u8) -> Self {
        self.src[index].0 = sel;
        self.src[index].1 = chan;
        self
    }

    pub fn neg(mut self, index: usize) -> Self {
        self.src[index].2 = true;
        self
    }

    pub fn abs(mut self, index: usize) -> Self {
        self.src[index].3 = true;
        self
    }

    pub fn rel(mut self, index: usize) -> Self {
        self.src[index].4 = true;
        self
    }

    pub fn dst(mut self, gpr: u32, elem: u8) -> Self {
        self.dst_gpr = gpr;
        self.dst_elem = elem;
        self
    }

    pub fn dst_rel(mut self) -> Self {
        self.dst_rel = true;
        self
    }

    /// Clears the write mask so the result only lands in PV/PS.
    pub fn no_write(mut self) -> Self {
        self.write = false;
        self
    }

    pub fn omod(mut self, omod: u8) -> Self {
        self.omod = omod;
        self
    }

    pub fn clamp(mut self) -> Self {
        self.clamp = true;
        self
    }

    pub fn update_exec_mask(mut self) -> Self {
        self.update_exec_mask = true;
        self.update_pred = true;
        self
    }

    pub fn last(mut self) -> Self {
        self.last = true;
        self
    }

    pub fn encode(&self) -> [u32; 2] {
        let operand = |(sel, chan, neg, _abs, rel): (u32, u8, bool, bool, bool)| {
            (sel & 0x1FF) | (u32::from(rel) << 9) | ((u32::from(chan) & 3) << 10) | (u32::from(neg) << 12)
        };
        let word0 = operand(self.src[0]) | (operand(self.src[1]) << 13) | (u32::from(self.last) << 31);
        let dst = ((self.dst_gpr & 0x7F) << 21)
            | (u32::from(self.dst_rel) << 28)
            | ((u32::from(self.dst_elem) & 3) << 29)
            | (u32::from(self.clamp) << 31);
        let word1 = if self.op3 {
            operand(self.src[2]) | ((self.opcode & 0x1F) << 13) | dst
        } else {
            u32::from(self.src[0].3)
                | (u32::from(self.src[1].3) << 1)
                | (u32::from(self.update_exec_mask) << 2)
                | (u32::from(self.update_pred) << 3)
                | (u32::from(self.write) << 4)
                | ((u32::from(self.omod) & 3) << 5)
                | ((self.opcode & 0x7FF) << 7)
                | dst
        };
        [word0, word1]
    }
}

/// Raw OP2 / OP3 opcodes used by tests.
pub mod alu_op {
    pub const ADD: u32 = 0x00;
    pub const MUL: u32 = 0x01;
    pub const MUL_IEEE: u32 = 0x02;
    pub const SETGT: u32 = 0x09;
    pub const SETE_DX10: u32 = 0x0C;
    pub const MOVA_FLOOR: u32 = 0x16;
    pub const MOV: u32 = 0x19;
    pub const NOP: u32 = 0x1A;
    pub const PRED_SETGT: u32 = 0x21;
    pub const KILLGT: u32 = 0x2D;
    pub const AND_INT: u32 = 0x30;
    pub const ADD_INT: u32 = 0x34;
    pub const SETGE_UINT: u32 = 0x3F;
    pub const DOT4: u32 = 0x50;
    pub const CUBE: u32 = 0x52;
    pub const RECIP_FF: u32 = 0x65;
    pub const RECIPSQRT_FF: u32 = 0x68;
    pub const FLT_TO_INT: u32 = 0x6B;
    pub const INT_TO_FLOAT: u32 = 0x6C;

    pub const OP3_MULADD: u32 = 0x10;
    pub const OP3_CMOVE: u32 = 0x18;
    pub const OP3_CNDE_INT: u32 = 0x1C;
}

/// Raw TEX clause opcodes used by tests.
pub mod tex_op {
    pub const LD: u32 = 0x03;
    pub const GET_TEXTURE_RESINFO: u32 = 0x04;
    pub const GET_COMP_TEX_LOD: u32 = 0x06;
    pub const GET_GRADIENTS_H: u32 = 0x07;
    pub const SET_GRADIENTS_H: u32 = 0x0B;
    pub const SET_GRADIENTS_V: u32 = 0x0C;
    pub const SET_CUBEMAP_INDEX: u32 = 0x0E;
    pub const FETCH4: u32 = 0x0F;
    pub const SAMPLE: u32 = 0x10;
    pub const SAMPLE_L: u32 = 0x11;
    pub const SAMPLE_LB: u32 = 0x12;
    pub const SAMPLE_LZ: u32 = 0x13;
    pub const SAMPLE_G: u32 = 0x14;
    pub const SAMPLE_C: u32 = 0x18;
    pub const SAMPLE_C_LZ: u32 = 0x1B;
}

/// Texture sample instruction (`SAMPLE*`, `LD`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub opcode: u32,
    pub texture: u32,
    pub sampler: u32,
    pub src_gpr: u32,
    pub dst_gpr: u32,
    pub src_sel: [u8; 4],
    pub dst_sel: [u8; 4],
    /// Coordinate type bits; all clear means texel coordinates.
    pub normalized: bool,
    pub offsets: [i8; 3],
}

impl Sample {
    pub fn new(opcode: u32, texture: u32, src_gpr: u32, dst_gpr: u32) -> Self {
        Self {
            opcode,
            texture,
            sampler: texture,
            src_gpr,
            dst_gpr,
            src_sel: [0, 1, 2, 3],
            dst_sel: [0, 1, 2, 3],
            normalized: true,
            offsets: [0; 3],
        }
    }

    pub fn encode(&self) -> [u32; 4] {
        let word0 = (self.opcode & 0x1F) | ((self.texture & 0xFF) << 8) | ((self.src_gpr & 0x7F) << 16);
        let dst_sel = self.dst_sel.map(|s| u32::from(s) & 7);
        let coord_type = if self.normalized { 0xF } else { 0 };
        let word1 = (self.dst_gpr & 0x7F)
            | (dst_sel[0] << 9)
            | (dst_sel[1] << 12)
            | (dst_sel[2] << 15)
            | (dst_sel[3] << 18)
            | (coord_type << 28);
        let src_sel = self.src_sel.map(|s| u32::from(s) & 7);
        let offsets = self.offsets.map(|o| (o as u32) & 0x1F);
        let word2 = offsets[0]
            | (offsets[1] << 5)
            | (offsets[2] << 10)
            | ((self.sampler & 0x1F) << 15)
            | (src_sel[0] << 20)
            | (src_sel[1] << 23)
            | (src_sel[2] << 26)
            | (src_sel[3] << 29);
        [word0, word1, word2, 0]
    }
}

/// Vertex fetch (`VFETCH`) reading `buffer` at byte `offset`.
#[allow(clippy::too_many_arguments)]
pub fn vfetch(
    buffer: u32,
    src_gpr: u32,
    dst_gpr: u32,
    dst_sel: [u8; 4],
    offset: u32,
    format: u32,
    num_format: u32,
    signed: bool,
) -> [u32; 4] {
    let word0 = ((buffer & 0xFF) << 8) | ((src_gpr & 0x7F) << 16);
    let dst_sel = dst_sel.map(|s| u32::from(s) & 7);
    let word1 = (dst_gpr & 0x7F)
        | (dst_sel[0] << 9)
        | (dst_sel[1] << 12)
        | (dst_sel[2] << 15)
        | (dst_sel[3] << 18)
        | ((format & 0x3F) << 22)
        | ((num_format & 3) << 28)
        | (u32::from(signed) << 30);
    [word0, word1, offset & 0xFFFF, 0]
}
