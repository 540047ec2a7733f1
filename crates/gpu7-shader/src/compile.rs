//! Compile entry point: decode → analyze → bind → emit.

use bitflags::bitflags;
use gpu7_isa::{FetchShader, RegisterState, ShaderStage, NUM_UNIFORM_BUFFERS};
use xxhash_rust::xxh3::xxh3_64;

use crate::analyze::{analyze, AnalysisContext, ShaderAnalysis, UniformMode};
use crate::binding::{assign_bindings, ShaderBindings};
use crate::copy_shader::parse_copy_shader;
use crate::decode::decode_program;
use crate::emit::{self, Dialect, EmitInput, UniformOffsetTables};
use crate::error::{CompileError, Diagnostic, Diagnostics};
use crate::limits::{MAX_UBO_VEC4, MAX_UNIFORM_REGISTERS};
use crate::program::Program;
use crate::uniform_cache::{UniformSizeCache, UniformSlot};

bitflags! {
    /// Float widths that get `RoundingModeRTE` under Vulkan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RteWidths: u8 {
        const F16 = 1 << 0;
        const F32 = 1 << 1;
        const F64 = 1 << 2;
    }
}

impl RteWidths {
    /// Bit widths in ascending order.
    pub fn bit_widths(self) -> impl Iterator<Item = u32> {
        [(Self::F16, 16), (Self::F32, 32), (Self::F64, 64)]
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, width)| width)
    }
}

bitflags! {
    /// Output languages to generate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dialects: u8 {
        /// GLSL for OpenGL and, through `#ifdef VULKAN`, Vulkan.
        const GLSL = 1 << 0;
        const MSL = 1 << 1;
    }
}

impl Default for Dialects {
    fn default() -> Self {
        Self::GLSL
    }
}

/// Per compile switches supplied by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// A geometry shader runs between the vertex and pixel stage.
    pub uses_geometry_shader: bool,
    /// Zero times anything is zero (`mul_nonIEEE`), matching the hardware `MUL`.
    pub strict_mul: bool,
    /// Transform feedback is written through a storage buffer instead of xfb outputs.
    pub tf_via_ssbo: bool,
    pub spirv_rounding_mode_rte: Option<RteWidths>,
    /// Upper bound on loop iterations, `None` for unbounded loops.
    pub loop_iteration_cap: Option<u32>,
    pub dialects: Dialects,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            uses_geometry_shader: false,
            strict_mul: false,
            tf_via_ssbo: false,
            spirv_rounding_mode_rte: None,
            loop_iteration_cap: Some(500),
            dialects: Dialects::default(),
        }
    }
}

/// One shader stage to compile.
#[derive(Debug, Clone, Copy)]
pub struct ShaderInput<'a> {
    pub stage: ShaderStage,
    pub microcode: &'a [u8],
    pub regs: &'a RegisterState,
    /// Attribute layout, vertex shaders only.
    pub fetch_shader: Option<&'a FetchShader>,
    /// Copy shader microcode, required for geometry shaders.
    pub copy_shader: Option<&'a [u8]>,
    /// Ring parameters written by the vertex shader feeding this geometry shader.
    pub vs_ring_parameter_count: u32,
    /// Caller supplied shader hash. Defaults to the xxh3 hash of the microcode.
    pub hash: Option<u64>,
}

impl<'a> ShaderInput<'a> {
    pub fn new(stage: ShaderStage, microcode: &'a [u8], regs: &'a RegisterState) -> Self {
        Self {
            stage,
            microcode,
            regs,
            fetch_shader: None,
            copy_shader: None,
            vs_ring_parameter_count: 0,
            hash: None,
        }
    }
}

/// Uniform array sizes after merging with the shared size cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedSizes {
    pub uniform_registers: u32,
    pub uniform_buffers: [u32; NUM_UNIFORM_BUFFERS],
}

/// Compiler output for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub hash: u64,
    pub glsl: Option<String>,
    pub msl: Option<String>,
    pub bindings: ShaderBindings,
    pub uniform_offsets: UniformOffsetTables,
    /// At least one construct could not be translated faithfully.
    pub has_error: bool,
    pub diagnostics: Vec<Diagnostic>,
}

/// Stateful compiler. Holds the uniform size cache shared by all compiles.
#[derive(Debug, Default)]
pub struct ShaderCompiler {
    options: CompileOptions,
    cache: UniformSizeCache,
}

impl ShaderCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            cache: UniformSizeCache::new(),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile(&self, input: &ShaderInput<'_>) -> Result<CompiledShader, CompileError> {
        let hash = input.hash.unwrap_or_else(|| xxh3_64(input.microcode));
        let program = Program::new(input.microcode)?;
        let mut diagnostics = Diagnostics::new();

        let copy_shader = match (input.stage, input.copy_shader) {
            (ShaderStage::Geometry, Some(bytes)) => Some(parse_copy_shader(&Program::new(bytes)?)?),
            (ShaderStage::Geometry, None) => {
                return Err(CompileError::structural(
                    0,
                    "geometry shader compiled without a copy shader",
                ))
            }
            _ => None,
        };

        let mut decoded = decode_program(&program, input.stage, &mut diagnostics)?;
        let ctx = AnalysisContext {
            stage: input.stage,
            regs: input.regs,
            fetch_shader: input.fetch_shader,
            copy_shader: copy_shader.as_ref(),
            options: &self.options,
        };
        let analysis = analyze(&mut decoded, &ctx, &mut diagnostics);
        let sizes = self.resolve_sizes(hash, &analysis);
        let bindings = assign_bindings(&analysis, input.regs, &self.options);

        let emit_input = EmitInput {
            hash,
            program: &decoded,
            analysis: &analysis,
            regs: input.regs,
            options: &self.options,
            fetch_shader: input.fetch_shader,
            copy_shader: copy_shader.as_ref(),
            vs_ring_parameter_count: input.vs_ring_parameter_count,
            bindings: &bindings,
            sizes,
        };
        let uniform_offsets = emit::uniform_offset_tables(&emit_input);

        let mut glsl = None;
        let mut msl = None;
        let mut has_error = false;
        for dialect in [Dialect::Glsl, Dialect::Msl] {
            if !self.options.dialects.contains(dialect.flag()) {
                continue;
            }
            let output = emit::emit_shader(dialect, &emit_input)?;
            has_error |= output.has_error;
            diagnostics.extend(output.diagnostics);
            match dialect {
                Dialect::Glsl => glsl = Some(output.source),
                Dialect::Msl => msl = Some(output.source),
            }
        }
        has_error |= !diagnostics.is_empty();

        tracing::debug!(
            stage = %input.stage,
            hash = %format_args!("{hash:016x}"),
            has_error,
            "compiled shader"
        );
        Ok(CompiledShader {
            stage: input.stage,
            hash,
            glsl,
            msl,
            bindings,
            uniform_offsets,
            has_error,
            diagnostics: diagnostics.into_vec(),
        })
    }

    fn resolve_sizes(&self, hash: u64, analysis: &ShaderAnalysis) -> ResolvedSizes {
        let mut sizes = ResolvedSizes {
            uniform_registers: 0,
            uniform_buffers: [0; NUM_UNIFORM_BUFFERS],
        };
        match analysis.uniform_mode {
            UniformMode::FullCFile => {
                let size = analysis
                    .uniform_register_access
                    .determine_size(MAX_UNIFORM_REGISTERS);
                sizes.uniform_registers =
                    self.cache
                        .resolve(hash, analysis.stage, UniformSlot::Registers, size);
            }
            UniformMode::FullCBank => {
                for (index, access) in analysis.uniform_buffer_access.iter().enumerate() {
                    if !access.has_access() {
                        continue;
                    }
                    let size = access.determine_size(MAX_UBO_VEC4);
                    sizes.uniform_buffers[index] = self.cache.resolve(
                        hash,
                        analysis.stage,
                        UniformSlot::Buffer(index as u32),
                        size,
                    );
                }
            }
            UniformMode::None | UniformMode::Remapped => {}
        }
        sizes
    }
}

/// Compiles one stage with a throwaway compiler.
pub fn compile_shader(
    input: &ShaderInput<'_>,
    options: &CompileOptions,
) -> Result<CompiledShader, CompileError> {
    ShaderCompiler::new(options.clone()).compile(input)
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{cf_inst, cf_op, ProgramBuilder};

    use super::*;

    #[test]
    fn rte_widths_are_listed_in_ascending_order() {
        let widths: Vec<u32> = (RteWidths::F64 | RteWidths::F16).bit_widths().collect();
        assert_eq!(widths, vec![16, 64]);
    }

    #[test]
    fn default_options_generate_glsl_with_capped_loops() {
        let options = CompileOptions::default();
        assert_eq!(options.dialects, Dialects::GLSL);
        assert_eq!(options.loop_iteration_cap, Some(500));
        assert!(!options.strict_mul);
    }

    #[test]
    fn geometry_shader_requires_copy_shader() {
        let regs = RegisterState::default();
        let mut builder = ProgramBuilder::new();
        builder.cf(0, cf_inst(cf_op::EMIT_VERTEX, 0, 1, true));
        let bytes = builder.to_bytes();
        let input = ShaderInput::new(ShaderStage::Geometry, &bytes, &regs);
        let err = compile_shader(&input, &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::StructuralDecode { .. }));
    }
}
