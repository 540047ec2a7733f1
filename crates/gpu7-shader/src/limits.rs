//! Centralized limits for GPU7 shader decoding.
//!
//! Microcode handed to the decompiler comes straight out of guest memory and is treated as
//! untrusted. These limits bound allocations and keep the generated source at a sane size.

/// Maximum accepted microcode length in bytes.
///
/// CF addresses are 22-bit word-pair offsets, but no real program comes close. Anything above
/// this is rejected before decoding starts.
pub(crate) const MAX_PROGRAM_BYTES: usize = 1024 * 1024; // 1 MiB

/// Maximum number of parameters a GS copy shader may fetch from the ring buffer.
pub(crate) const MAX_COPY_SHADER_PARAMS: usize = 32;

/// Number of texture units per stage; fetches referencing higher units are ignored.
pub(crate) const MAX_TEXTURE_UNITS: usize = gpu7_isa::NUM_TEXTURE_UNITS;

/// Size of the uniform register file (`CFILE`) in vec4 registers.
pub(crate) const MAX_UNIFORM_REGISTERS: u32 = 256;

/// Upper bound for a uniform buffer declaration, used when the buffer is indexed dynamically.
pub(crate) const MAX_UBO_VEC4: u32 = 4096;

/// Number of general purpose registers.
pub(crate) const MAX_GPR: usize = gpu7_isa::NUM_GPR;

/// Subroutines may not call other subroutines.
pub(crate) const MAX_CALL_DEPTH: usize = 1;

/// Upper bound on CF instructions walked before the program is considered runaway.
pub(crate) const MAX_CF_INSTRUCTIONS: usize = MAX_PROGRAM_BYTES / gpu7_isa::CF_INSTRUCTION_BYTES;
