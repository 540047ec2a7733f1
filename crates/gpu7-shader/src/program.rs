//! Bounds-checked view over a microcode buffer.

use gpu7_isa::{AluWord, CfWord, TexWord};

use crate::error::ProgramError;
use crate::limits::MAX_PROGRAM_BYTES;

/// Borrowed microcode, addressed in little-endian 32-bit words.
#[derive(Debug, Clone, Copy)]
pub struct Program<'a> {
    bytes: &'a [u8],
}

impl<'a> Program<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, ProgramError> {
        if bytes.len() % 4 != 0 {
            return Err(ProgramError {
                word_index: bytes.len() / 4,
                message: format!("length {} is not a multiple of 4", bytes.len()),
            });
        }
        if bytes.len() > MAX_PROGRAM_BYTES {
            return Err(ProgramError {
                word_index: 0,
                message: format!(
                    "program is too large ({} bytes, max {MAX_PROGRAM_BYTES})",
                    bytes.len()
                ),
            });
        }
        Ok(Self { bytes })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn word_count(&self) -> usize {
        self.bytes.len() / 4
    }

    pub fn word(&self, index: usize) -> Result<u32, ProgramError> {
        let chunk = index
            .checked_mul(4)
            .and_then(|start| self.bytes.get(start..start.checked_add(4)?))
            .ok_or_else(|| out_of_bounds(index))?;
        Ok(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    /// CF instruction at `addr` (in 8-byte units).
    pub fn cf_word(&self, addr: usize) -> Result<CfWord, ProgramError> {
        let index = addr * 2;
        Ok(CfWord::new(self.word(index)?, self.word(index + 1)?))
    }

    /// ALU slot at `slot` (in 8-byte units).
    pub fn alu_word(&self, slot: usize) -> Result<AluWord, ProgramError> {
        let index = slot * 2;
        Ok(AluWord::new(self.word(index)?, self.word(index + 1)?))
    }

    /// TEX/VTX instruction starting at `word_index`.
    pub fn tex_word(&self, word_index: usize) -> Result<TexWord, ProgramError> {
        Ok(TexWord::new([
            self.word(word_index)?,
            self.word(word_index + 1)?,
            self.word(word_index + 2)?,
            self.word(word_index + 3)?,
        ]))
    }
}

fn out_of_bounds(index: usize) -> ProgramError {
    ProgramError {
        word_index: index,
        message: "read past the end of the program".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_length() {
        let err = Program::new(&[0u8; 6]).unwrap_err();
        assert_eq!(err.word_index, 1);
    }

    #[test]
    fn reads_little_endian_words() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 0xEF, 0xBE, 0xAD, 0xDE];
        let program = Program::new(&bytes).unwrap();
        assert_eq!(program.word(0).unwrap(), 0x1234_5678);
        let cf = program.cf_word(0).unwrap();
        assert_eq!(cf.word1, 0xDEAD_BEEF);
    }

    #[test]
    fn out_of_bounds_reads_fail_instead_of_panicking() {
        let program = Program::new(&[0u8; 8]).unwrap();
        assert!(program.word(2).is_err());
        assert!(program.tex_word(0).is_err());
        assert!(program.word(usize::MAX).is_err());
    }
}
