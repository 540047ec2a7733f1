//! Source generation for both output dialects.
//!
//! Instruction level emission (ALU groups, TEX clauses, exports, ring and stream writes,
//! control flow) is shared and spelled through [`syntax::Syntax`]. The dialect drivers in
//! [`glsl`] and [`msl`] only own the program shell: declarations, stage I/O and `main`.

mod alu;
mod attr;
mod cf;
mod export;
mod glsl;
mod helpers;
mod locals;
mod msl;
mod syntax;
mod tex;
mod writer;

use gpu7_isa::{FetchShader, RegisterState, ShaderStage, NUM_STREAMOUT_BUFFERS};

use crate::analyze::{DataType, ShaderAnalysis, UniformMode};
use crate::binding::{outputs_final_vertices, ShaderBindings};
use crate::compile::{CompileOptions, Dialects, ResolvedSizes};
use crate::copy_shader::CopyShader;
use crate::decode::DecodedProgram;
use crate::error::{CompileError, Diagnostics};
use crate::limits::MAX_TEXTURE_UNITS;

use self::syntax::Syntax;
use self::writer::ShaderWriter;

/// Output language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Glsl,
    Msl,
}

impl Dialect {
    pub fn flag(self) -> Dialects {
        match self {
            Dialect::Glsl => Dialects::GLSL,
            Dialect::Msl => Dialects::MSL,
        }
    }

    fn syntax(self) -> &'static dyn Syntax {
        match self {
            Dialect::Glsl => &syntax::Glsl,
            Dialect::Msl => &syntax::Msl,
        }
    }
}

/// Everything the emitters read. Built once per compile and shared by both dialects.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EmitInput<'a> {
    pub hash: u64,
    pub program: &'a DecodedProgram,
    pub analysis: &'a ShaderAnalysis,
    pub regs: &'a RegisterState,
    pub options: &'a CompileOptions,
    pub fetch_shader: Option<&'a FetchShader>,
    pub copy_shader: Option<&'a CopyShader>,
    pub vs_ring_parameter_count: u32,
    pub bindings: &'a ShaderBindings,
    pub sizes: ResolvedSizes,
}

#[derive(Debug, Clone)]
pub(crate) struct EmitOutput {
    pub source: String,
    pub has_error: bool,
    pub diagnostics: Diagnostics,
}

/// Byte offsets of the fields of the uniform variable block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UniformOffsets {
    pub remapped: Option<u32>,
    pub uniform_register: Option<u32>,
    pub uniform_register_count: u32,
    pub window_space_to_clip_space_transform: Option<u32>,
    pub alpha_test_ref: Option<u32>,
    pub point_size: Option<u32>,
    pub frag_coord_scale: Option<u32>,
    pub tex_scale: [Option<u32>; MAX_TEXTURE_UNITS],
    pub vertices_per_instance: Option<u32>,
    pub streamout_buffer_base: [Option<u32>; NUM_STREAMOUT_BUFFERS],
    pub end_of_block: u32,
}

/// Offset tables for OpenGL, Vulkan and Metal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UniformOffsetTables {
    pub gl: UniformOffsets,
    pub vk: UniformOffsets,
    pub mtl: UniformOffsets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LayoutFlavor {
    Gl,
    Vk,
    Mtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldType {
    IVec4,
    Vec4,
    Vec2,
    Float,
    Int,
}

impl FieldType {
    fn size_and_align(self) -> (u32, u32) {
        match self {
            FieldType::IVec4 | FieldType::Vec4 => (16, 16),
            FieldType::Vec2 => (8, 8),
            FieldType::Float | FieldType::Int => (4, 4),
        }
    }
}

/// One member of the uniform variable block. Array members are named per stage in GLSL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UniformField {
    pub name: String,
    pub ty: FieldType,
    pub array_len: Option<u32>,
    pub per_stage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct UniformLayout {
    pub fields: Vec<UniformField>,
    pub offsets: UniformOffsets,
}

/// Lays out the uniform variable block. The same list drives the declarations, so offsets and
/// declarations cannot drift apart.
pub(crate) fn uniform_layout(input: &EmitInput<'_>, flavor: LayoutFlavor) -> UniformLayout {
    let analysis = input.analysis;
    let stage = analysis.stage;
    let gs = input.options.uses_geometry_shader;
    let mut layout = UniformLayout::default();
    let mut cursor = 0u32;

    let mut push = |layout: &mut UniformLayout, name: String, ty: FieldType, array_len: Option<u32>, per_stage: bool| {
        let (size, align) = ty.size_and_align();
        cursor = (cursor + align - 1) & !(align - 1);
        let offset = cursor;
        cursor += size * array_len.unwrap_or(1);
        layout.fields.push(UniformField {
            name,
            ty,
            array_len,
            per_stage,
        });
        offset
    };

    match analysis.uniform_mode {
        UniformMode::Remapped => {
            let count = analysis.remapped_uniforms.len() as u32;
            layout.offsets.remapped = Some(push(&mut layout, "remapped".into(), FieldType::IVec4, Some(count), true));
        }
        UniformMode::FullCFile => {
            let count = input.sizes.uniform_registers;
            layout.offsets.uniform_register =
                Some(push(&mut layout, "uniformRegister".into(), FieldType::IVec4, Some(count), true));
            layout.offsets.uniform_register_count = count;
        }
        UniformMode::None | UniformMode::FullCBank => {}
    }
    if stage == ShaderStage::Vertex && input.regs.any_viewport_scale_disabled() {
        layout.offsets.window_space_to_clip_space_transform = Some(push(
            &mut layout,
            "windowSpaceToClipSpaceTransform".into(),
            FieldType::Vec2,
            None,
            false,
        ));
    }
    if stage == ShaderStage::Pixel && input.regs.alpha_test.enable {
        layout.offsets.alpha_test_ref = Some(push(&mut layout, "alphaTestRef".into(), FieldType::Float, None, false));
    }
    if analysis.needs_point_size_uniform(gs) {
        layout.offsets.point_size = Some(push(&mut layout, "pointSize".into(), FieldType::Float, None, false));
    }
    if stage == ShaderStage::Pixel {
        let ty = if flavor == LayoutFlavor::Vk {
            FieldType::Vec4
        } else {
            FieldType::Vec2
        };
        layout.offsets.frag_coord_scale = Some(push(&mut layout, "fragCoordScale".into(), ty, None, false));
    }
    for (unit, usage) in analysis.textures.iter().enumerate() {
        if usage.texel_coordinates {
            layout.offsets.tex_scale[unit] =
                Some(push(&mut layout, format!("tex{unit}Scale"), FieldType::Vec2, None, false));
        }
    }
    let streamout_uniforms = match flavor {
        LayoutFlavor::Gl | LayoutFlavor::Vk => analysis.needs_streamout_ssbo_uniforms(gs),
        LayoutFlavor::Mtl => outputs_final_vertices(stage, input.options),
    };
    if streamout_uniforms {
        layout.offsets.vertices_per_instance =
            Some(push(&mut layout, "verticesPerInstance".into(), FieldType::Int, None, false));
        for buffer in 0..NUM_STREAMOUT_BUFFERS {
            if analysis.streamout_write_mask & (1 << buffer) != 0 {
                layout.offsets.streamout_buffer_base[buffer] = Some(push(
                    &mut layout,
                    format!("streamoutBufferBase{buffer}"),
                    FieldType::Int,
                    None,
                    false,
                ));
            }
        }
    }
    layout.offsets.end_of_block = cursor;
    layout
}

pub(crate) fn uniform_offset_tables(input: &EmitInput<'_>) -> UniformOffsetTables {
    UniformOffsetTables {
        gl: uniform_layout(input, LayoutFlavor::Gl).offsets,
        vk: uniform_layout(input, LayoutFlavor::Vk).offsets,
        mtl: uniform_layout(input, LayoutFlavor::Mtl).offsets,
    }
}

/// Generates the program text for one dialect.
pub(crate) fn emit_shader(dialect: Dialect, input: &EmitInput<'_>) -> Result<EmitOutput, CompileError> {
    let mut emitter = Emitter::new(dialect, input);
    match dialect {
        Dialect::Glsl => glsl::emit_program(&mut emitter)?,
        Dialect::Msl => msl::emit_program(&mut emitter)?,
    }
    tracing::trace!(?dialect, bytes = emitter.w.len(), "emitted shader source");
    Ok(emitter.finish())
}

/// Per dialect emission state.
pub(crate) struct Emitter<'a> {
    pub(crate) input: &'a EmitInput<'a>,
    pub(crate) dialect: Dialect,
    pub(crate) syntax: &'static dyn Syntax,
    pub(crate) w: ShaderWriter,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) has_error: bool,
    /// Suffix of the active mask arrays. Set while a subroutine body is inlined.
    mask_suffix: String,
}

impl<'a> Emitter<'a> {
    fn new(dialect: Dialect, input: &'a EmitInput<'a>) -> Self {
        Self {
            input,
            dialect,
            syntax: dialect.syntax(),
            w: ShaderWriter::new(),
            diagnostics: Diagnostics::new(),
            has_error: false,
            mask_suffix: String::new(),
        }
    }

    fn finish(self) -> EmitOutput {
        EmitOutput {
            source: self.w.finish(),
            has_error: self.has_error,
            diagnostics: self.diagnostics,
        }
    }

    pub(crate) fn analysis(&self) -> &'a ShaderAnalysis {
        self.input.analysis
    }

    pub(crate) fn regs(&self) -> &'a RegisterState {
        self.input.regs
    }

    pub(crate) fn stage(&self) -> ShaderStage {
        self.input.analysis.stage
    }

    /// Representation of the register file.
    pub(crate) fn ty(&self) -> DataType {
        self.input.analysis.default_data_type
    }

    pub(crate) fn uses_gs(&self) -> bool {
        self.input.options.uses_geometry_shader
    }

    /// Vertex limit of a geometry shader. Loop free shaders are capped to their static
    /// `EMIT_VERTEX` count.
    pub(crate) fn gs_max_vertices(&self) -> u32 {
        let ring_limit = self.regs().gs_max_vertices();
        let analysis = self.analysis();
        if !analysis.has_loops && analysis.num_emit_vertex < ring_limit {
            analysis.num_emit_vertex
        } else {
            ring_limit
        }
    }

    /// Whole register, for example `R3f` or `Ri[3]`.
    pub(crate) fn reg(&self, gpr: u32) -> String {
        let suffix = self.ty().suffix();
        if self.analysis().use_array_gprs {
            format!("R{suffix}[{gpr}]")
        } else {
            format!("R{gpr}{suffix}")
        }
    }

    /// Register addressed relative to the address register. Only valid with array registers.
    pub(crate) fn reg_rel(&self, gpr: u32, index_mode: u32) -> String {
        format!("R{}[{gpr}+{}]", self.ty().suffix(), address_register(index_mode))
    }

    pub(crate) fn vector(&self, ty: DataType, width: usize) -> String {
        self.syntax.vector(ty, width)
    }

    /// Reinterprets `expr` from one representation to another.
    pub(crate) fn cast(&self, expr: &str, from: DataType, to: DataType, width: usize) -> String {
        match self.syntax.cast_prefix(from, to, width) {
            Some(prefix) => format!("{prefix}{expr})"),
            None => expr.to_string(),
        }
    }

    /// Float constant that parses back to exactly `value`.
    pub(crate) fn float_const(&self, value: f32) -> String {
        if !value.is_finite() {
            return self.syntax.float_from_bits(value.to_bits());
        }
        let text = format!("{value:?}");
        if text.contains('.') || text.contains('e') {
            text
        } else {
            format!("{text}.0")
        }
    }

    pub(crate) fn uniform_var(&self, name: &str) -> String {
        self.syntax.uniform_var(self.stage(), name)
    }

    pub(crate) fn set_mask_suffix(&mut self, suffix: String) {
        self.mask_suffix = suffix;
    }

    /// `activeMaskStack[depth]`. Depths below zero clamp to the bottom of the stack.
    pub(crate) fn mask(&self, depth: i64) -> String {
        format!("activeMaskStack{}[{}]", self.mask_suffix, depth.max(0))
    }

    /// `activeMaskStackC[depth]`.
    pub(crate) fn mask_c(&self, depth: i64) -> String {
        format!("activeMaskStackC{}[{}]", self.mask_suffix, depth.max(0))
    }

    /// Writes the sentinel statement for an untranslatable construct and flags the shader.
    pub(crate) fn unsupported(&mut self, word_index: Option<usize>, message: impl Into<String>) {
        let message = message.into();
        self.w.line(&format!("Unsupported instruction; // {message}"));
        self.diagnostics.unsupported(word_index, message);
        self.has_error = true;
    }

    pub(crate) fn assumption(&mut self, word_index: Option<usize>, message: impl Into<String>) {
        self.diagnostics.assumption(word_index, message);
        self.has_error = true;
    }
}

/// Address register component selected by an ALU `INDEX_MODE`. Loop index modes fall back to
/// `ARi.x`; the ALU emitter reports them.
pub(crate) fn address_register(index_mode: u32) -> &'static str {
    match index_mode {
        1 => "ARi.y",
        2 => "ARi.z",
        3 => "ARi.w",
        _ => "ARi.x",
    }
}

/// `xyzw` letters of the set channels.
pub(crate) fn mask_letters(mask: gpu7_isa::ChannelMask) -> String {
    (0..4)
        .filter(|&i| mask.contains(gpu7_isa::ChannelMask::channel(i)))
        .map(gpu7_isa::channel_name)
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use gpu7_isa::asm::ProgramBuilder;
    use gpu7_isa::{FetchShader, RegisterState, ShaderStage, NUM_UNIFORM_BUFFERS};

    use super::*;
    use crate::analyze::{analyze, AnalysisContext};
    use crate::binding::assign_bindings;
    use crate::decode::decode_program;
    use crate::program::Program;

    /// Owned inputs for driving the emitters directly from hand assembled microcode.
    pub(crate) struct Fixture {
        pub program: DecodedProgram,
        pub analysis: ShaderAnalysis,
        pub regs: RegisterState,
        pub options: CompileOptions,
        pub fetch_shader: Option<FetchShader>,
        pub copy_shader: Option<CopyShader>,
        pub bindings: ShaderBindings,
        pub decode_diagnostics: Diagnostics,
    }

    impl Fixture {
        pub(crate) fn build(
            builder: &ProgramBuilder,
            stage: ShaderStage,
            regs: RegisterState,
            options: CompileOptions,
            fetch_shader: Option<FetchShader>,
            copy_shader: Option<CopyShader>,
        ) -> Self {
            let bytes = builder.to_bytes();
            let program = Program::new(&bytes).unwrap();
            let mut diagnostics = Diagnostics::new();
            let mut decoded = decode_program(&program, stage, &mut diagnostics).unwrap();
            let ctx = AnalysisContext {
                stage,
                regs: &regs,
                fetch_shader: fetch_shader.as_ref(),
                copy_shader: copy_shader.as_ref(),
                options: &options,
            };
            let analysis = analyze(&mut decoded, &ctx, &mut diagnostics);
            let bindings = assign_bindings(&analysis, &regs, &options);
            Self {
                program: decoded,
                analysis,
                regs,
                options,
                fetch_shader,
                copy_shader,
                bindings,
                decode_diagnostics: diagnostics,
            }
        }

        pub(crate) fn simple(builder: &ProgramBuilder, stage: ShaderStage) -> Self {
            Self::build(builder, stage, RegisterState::default(), CompileOptions::default(), None, None)
        }

        pub(crate) fn input(&self) -> EmitInput<'_> {
            EmitInput {
                hash: 0x1234,
                program: &self.program,
                analysis: &self.analysis,
                regs: &self.regs,
                options: &self.options,
                fetch_shader: self.fetch_shader.as_ref(),
                copy_shader: self.copy_shader.as_ref(),
                vs_ring_parameter_count: 0,
                bindings: &self.bindings,
                sizes: ResolvedSizes {
                    uniform_registers: 256,
                    uniform_buffers: [4096; NUM_UNIFORM_BUFFERS],
                },
            }
        }

        pub(crate) fn emit(&self, dialect: Dialect) -> Result<EmitOutput, CompileError> {
            emit_shader(dialect, &self.input())
        }

        pub(crate) fn glsl(&self) -> EmitOutput {
            self.emit(Dialect::Glsl).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{alu_op, cf_alu, cf_op, sel, Alu, Export, ProgramBuilder};
    use pretty_assertions::assert_eq;

    use super::test_support::Fixture;
    use super::*;

    #[test]
    fn pixel_layout_differs_between_gl_and_vulkan() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).done().end().encode());
        let mut regs = RegisterState::default();
        regs.alpha_test.enable = true;
        let fixture = Fixture::build(
            &builder,
            ShaderStage::Pixel,
            regs,
            CompileOptions::default(),
            None,
            None,
        );
        let tables = uniform_offset_tables(&fixture.input());
        assert_eq!(tables.gl.alpha_test_ref, Some(0));
        assert_eq!(tables.gl.frag_coord_scale, Some(8));
        assert_eq!(tables.gl.end_of_block, 16);
        assert_eq!(tables.vk.frag_coord_scale, Some(16));
        assert_eq!(tables.vk.end_of_block, 32);
        assert_eq!(tables.mtl.frag_coord_scale, Some(8));
    }

    #[test]
    fn remapped_array_leads_the_block() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 1))
            .cf(1, Export::new(1, 60, 0).done().end().encode())
            .alu(4, &[Alu::op2(alu_op::MOV).src(0, sel::cfile(3), 0).dst(0, 0).last().encode()]);
        let mut regs = RegisterState::default();
        regs.viewport_scale_enable = [false; 3];
        let fixture = Fixture::build(
            &builder,
            ShaderStage::Vertex,
            regs,
            CompileOptions::default(),
            None,
            None,
        );
        let layout = uniform_layout(&fixture.input(), LayoutFlavor::Gl);
        assert_eq!(layout.offsets.remapped, Some(0));
        assert_eq!(layout.offsets.window_space_to_clip_space_transform, Some(16));
        assert_eq!(layout.offsets.end_of_block, 24);
        assert_eq!(layout.fields[0].array_len, Some(1));
    }

    #[test]
    fn float_constants_round_trip() {
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).done().end().encode());
        let fixture = Fixture::simple(&builder, ShaderStage::Pixel);
        let input = fixture.input();
        let emitter = Emitter::new(Dialect::Glsl, &input);
        assert_eq!(emitter.float_const(0.5), "0.5");
        assert_eq!(emitter.float_const(-2.0), "-2.0");
        assert_eq!(emitter.float_const(f32::INFINITY), "intBitsToFloat(0x7f800000)");
    }

    /// Scalar representation of a value while walking a cast chain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Repr {
        Float,
        Int,
        Uint,
    }

    /// Evaluates a chain of bit reinterpretations around a raw float literal. Any conversion
    /// that changes the value instead of reinterpreting its bits yields `None`.
    fn eval_cast_chain(expr: &str) -> Option<(u32, Repr)> {
        const FLOAT_LITERALS: [&str; 2] = ["intBitsToFloat(0x", "as_type<float>(0x"];
        for prefix in FLOAT_LITERALS {
            if let Some(hex) = expr.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(')')) {
                if hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return u32::from_str_radix(hex, 16).ok().map(|bits| (bits, Repr::Float));
                }
            }
        }
        const CASTS: [(&str, &[Repr], Repr); 10] = [
            ("floatBitsToInt(", &[Repr::Float], Repr::Int),
            ("floatBitsToUint(", &[Repr::Float], Repr::Uint),
            ("intBitsToFloat(", &[Repr::Int], Repr::Float),
            ("uintBitsToFloat(", &[Repr::Uint], Repr::Float),
            ("as_type<int>(", &[Repr::Float], Repr::Int),
            ("as_type<uint>(", &[Repr::Float], Repr::Uint),
            ("as_type<float>(", &[Repr::Int, Repr::Uint], Repr::Float),
            // Integer sign changes keep the two's complement pattern.
            ("int(", &[Repr::Uint], Repr::Int),
            ("uint(", &[Repr::Int], Repr::Uint),
            ("float(", &[], Repr::Float),
        ];
        for (prefix, accepts, result) in CASTS {
            if let Some(inner) = expr.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(')')) {
                let (bits, repr) = eval_cast_chain(inner)?;
                return accepts.contains(&repr).then_some((bits, result));
            }
        }
        None
    }

    proptest::proptest! {
        #[test]
        fn reinterpretation_chains_preserve_bits(bits in proptest::prelude::any::<u32>()) {
            use crate::analyze::DataType::{Float, SignedInt, UnsignedInt};

            let mut builder = ProgramBuilder::new();
            builder.cf(0, Export::new(0, 0, 0).done().end().encode());
            let fixture = Fixture::simple(&builder, ShaderStage::Pixel);
            let input = fixture.input();
            let chains = [
                vec![Float, SignedInt, Float],
                vec![Float, UnsignedInt, Float],
                vec![Float, SignedInt, UnsignedInt, Float],
                vec![Float, UnsignedInt, SignedInt, Float],
                vec![Float, Float, SignedInt, SignedInt, Float],
            ];
            for dialect in [Dialect::Glsl, Dialect::Msl] {
                let emitter = Emitter::new(dialect, &input);
                for chain in &chains {
                    let mut expr = emitter.syntax.float_from_bits(bits);
                    for pair in chain.windows(2) {
                        expr = emitter.cast(&expr, pair[0], pair[1], 1);
                    }
                    proptest::prop_assert_eq!(eval_cast_chain(&expr), Some((bits, Repr::Float)), "{}", expr);
                }
            }
        }
    }

    #[test]
    fn value_conversions_are_not_reinterpretations() {
        assert_eq!(eval_cast_chain("float(floatBitsToInt(intBitsToFloat(0x3f800000)))"), None);
        assert_eq!(eval_cast_chain("int(intBitsToFloat(0x3f800000))"), None);
        assert_eq!(
            eval_cast_chain("as_type<float>(as_type<int>(as_type<float>(0x3f800000)))"),
            Some((0x3f80_0000, Repr::Float))
        );
    }
}
