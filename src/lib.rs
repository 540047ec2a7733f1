//! GPU7 shader decompiler.
//!
//! Facade over the workspace crates: [`isa`] holds the raw instruction encodings and register
//! state snapshot, [`shader`] the decode, analyze and emit pipeline.

#![forbid(unsafe_code)]

pub use gpu7_isa as isa;
pub use gpu7_shader as shader;

pub use gpu7_isa::{FetchShader, RegisterState, ShaderStage};
pub use gpu7_shader::{
    compile_shader, CompileError, CompileOptions, CompiledShader, Dialects, ShaderCompiler, ShaderInput,
};
