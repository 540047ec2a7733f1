//! Decompiler for GPU7 shader microcode.
//!
//! A compile runs four passes over one shader stage:
//!
//! - decode: the CF program, its ALU/TEX/VTX clauses and any subroutines are parsed into owned
//!   instruction lists (structural errors abort the compile),
//! - analyze: register usage, uniform access, texture usage and stage I/O are collected and
//!   the representation of the register file is chosen,
//! - bind: resource slots are assigned for OpenGL, Vulkan and Metal,
//! - emit: GLSL (OpenGL and Vulkan from one source) and/or MSL text is generated.
//!
//! Untranslatable constructs do not abort a compile. They leave an `Unsupported instruction`
//! sentinel in the source, set [`CompiledShader::has_error`] and record a [`Diagnostic`].

#![forbid(unsafe_code)]

pub mod analyze;
pub mod binding;
pub mod compile;
pub mod copy_shader;
pub mod decode;
mod emit;
mod error;
mod limits;
pub mod program;
mod uniform_cache;

pub use crate::binding::{AttributeBinding, ResourceBindingMap, ShaderBindings};
pub use crate::compile::{
    compile_shader, CompileOptions, CompiledShader, Dialects, RteWidths, ShaderCompiler, ShaderInput,
};
pub use crate::emit::{Dialect, UniformOffsetTables, UniformOffsets};
pub use crate::error::{CompileError, Diagnostic, DiagnosticKind, Diagnostics, ProgramError};
pub use crate::uniform_cache::{UniformSizeCache, UniformSlot};
pub use gpu7_isa::ShaderStage;
