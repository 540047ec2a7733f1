//! Per-shader analysis.
//!
//! A single pass over the decoded program that collects everything the emitters need to know
//! up front: which registers, textures and uniforms are touched, how uniforms are accessed, how
//! deep the active-mask stack gets, and which stage outputs are written. The result is
//! immutable once [`analyze`] returns. The only thing written back into the program is the
//! per-instruction `active_stack_depth`.

use gpu7_isa::{
    AluCfKind, AluSrc, ChannelMask, ExportType, FetchShader, GsOutputPrimitive, PrimitiveMode, RegisterState,
    ShaderStage, TexOpcode, TextureDim, EXPORT_BASE_POINT_SIZE_OR_DEPTH, FETCH_BUFFER_GS_RING,
    FETCH_BUFFER_UNIFORM_BASE, NUM_COLOR_TARGETS, NUM_STREAMOUT_BUFFERS, NUM_UNIFORM_BUFFERS,
};
use hashbrown::HashMap;

use crate::compile::CompileOptions;
use crate::copy_shader::CopyShader;
use crate::decode::{
    AluClause, CfInstruction, CfKind, DecodedProgram, ExportInfo, KCacheBank, TexInstruction, TexPayload,
};
use crate::error::Diagnostics;
use crate::limits::{MAX_GPR, MAX_TEXTURE_UNITS, MAX_UBO_VEC4};

/// Representation a register value is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    SignedInt,
    UnsignedInt,
    Float,
}

impl DataType {
    /// Register variable suffix (`R0i`, `R0f`).
    pub fn suffix(self) -> char {
        match self {
            DataType::Float => 'f',
            _ => 'i',
        }
    }
}

/// How uniforms are exposed to the generated program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformMode {
    /// No uniform access.
    None,
    /// Only statically addressed uniforms, compacted into one array.
    Remapped,
    /// The whole uniform register file, because it is indexed dynamically.
    FullCFile,
    /// Each accessed uniform buffer as its own block, because one is indexed dynamically.
    FullCBank,
}

/// Access pattern of one uniform buffer or of the uniform register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferAccess {
    has_static: bool,
    has_dynamic: bool,
    highest_static: u32,
}

impl BufferAccess {
    fn track(&mut self, index: u32, dynamic: bool) {
        if dynamic {
            self.has_dynamic = true;
        } else {
            self.has_static = true;
            self.highest_static = self.highest_static.max(index);
        }
    }

    pub fn has_access(&self) -> bool {
        self.has_static || self.has_dynamic
    }

    pub fn has_relative_access(&self) -> bool {
        self.has_dynamic
    }

    /// Number of vec4 entries to declare. Dynamic access falls back to `max`.
    pub fn determine_size(&self, max: u32) -> u32 {
        if self.has_dynamic {
            max
        } else if self.has_static {
            self.highest_static + 1
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformSource {
    Register,
    Buffer(u32),
}

/// A statically addressed uniform and its slot in the remapped array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemappedUniform {
    pub source: UniformSource,
    pub index: u32,
    pub mapped_index: u32,
}

/// Accessed uniform buffer with its byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuickBuffer {
    pub index: u32,
    pub size: u32,
}

/// Per texture unit facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureUnitUsage {
    pub used: bool,
    pub sampler: Option<u32>,
    pub depth_compare: bool,
    pub texel_coordinates: bool,
    pub dim: TextureDim,
    pub integer_format: bool,
}

/// Everything the emitters and the binding mapper read about one shader.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderAnalysis {
    pub stage: ShaderStage,
    pub default_data_type: DataType,
    /// Registers are declared as `Ri[]`/`Rf[]` arrays instead of individual variables.
    pub use_array_gprs: bool,
    /// One bit per referenced GPR.
    pub gpr_use_mask: u128,

    pub uniform_mode: UniformMode,
    pub uniform_register_access: BufferAccess,
    pub uniform_buffer_access: [BufferAccess; NUM_UNIFORM_BUFFERS],
    /// Remapped uniforms in order of first use.
    pub remapped_uniforms: Vec<RemappedUniform>,
    remapped_lookup: HashMap<(UniformSource, u32), u32>,
    pub quick_buffers: Vec<QuickBuffer>,

    pub textures: [TextureUnitUsage; MAX_TEXTURE_UNITS],
    pub has_cube_map_texture: bool,
    pub has_gradient_lookup: bool,
    pub has_ssbo_read: bool,

    pub max_stack_depth: u32,
    pub modifies_pixel_active_state: bool,
    pub has_loops: bool,
    pub uses_integer_values: bool,
    pub uses_relative_gpr_read: bool,
    pub uses_relative_gpr_write: bool,
    pub has_redc_cube: bool,

    /// Vertex attribute semantic ids read by the fetch shader, ascending.
    pub input_semantics: Vec<u8>,
    /// One bit per color render target written by a pixel export.
    pub color_output_mask: u8,
    pub writes_depth: bool,
    /// One bit per vertex parameter export index below 32.
    pub output_parameter_mask: u32,
    pub writes_point_size: bool,
    /// `gl_PointSize` is part of the per-vertex output block.
    pub output_point_size: bool,
    pub is_points_primitive: bool,

    pub has_streamout_enable: bool,
    pub has_streamout_write: bool,
    pub use_ssbo_for_streamout: bool,
    pub streamout_write_mask: u8,
    /// Stride in bytes per stream-out buffer.
    pub streamout_buffer_stride: [u32; NUM_STREAMOUT_BUFFERS],

    /// Vec4 parameters written to the GS ring by a vertex shader.
    pub ring_parameter_count: u32,
    pub num_emit_vertex: u32,
}

impl ShaderAnalysis {
    fn new(stage: ShaderStage) -> Self {
        Self {
            stage,
            default_data_type: DataType::Float,
            use_array_gprs: false,
            gpr_use_mask: 0,
            uniform_mode: UniformMode::None,
            uniform_register_access: BufferAccess::default(),
            uniform_buffer_access: [BufferAccess::default(); NUM_UNIFORM_BUFFERS],
            remapped_uniforms: Vec::new(),
            remapped_lookup: HashMap::new(),
            quick_buffers: Vec::new(),
            textures: [TextureUnitUsage::default(); MAX_TEXTURE_UNITS],
            has_cube_map_texture: false,
            has_gradient_lookup: false,
            has_ssbo_read: false,
            max_stack_depth: 0,
            modifies_pixel_active_state: false,
            has_loops: false,
            uses_integer_values: false,
            uses_relative_gpr_read: false,
            uses_relative_gpr_write: false,
            has_redc_cube: false,
            input_semantics: Vec::new(),
            color_output_mask: 0,
            writes_depth: false,
            output_parameter_mask: 0,
            writes_point_size: false,
            output_point_size: false,
            is_points_primitive: false,
            has_streamout_enable: false,
            has_streamout_write: false,
            use_ssbo_for_streamout: false,
            streamout_write_mask: 0,
            streamout_buffer_stride: [0; NUM_STREAMOUT_BUFFERS],
            ring_parameter_count: 0,
            num_emit_vertex: 0,
        }
    }

    pub fn is_gpr_used(&self, gpr: u32) -> bool {
        (gpr as usize) < MAX_GPR && self.gpr_use_mask & (1u128 << gpr) != 0
    }

    pub fn used_gprs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_GPR as u32).filter(|&gpr| self.is_gpr_used(gpr))
    }

    fn mark_gpr(&mut self, gpr: u32) {
        if (gpr as usize) < MAX_GPR {
            self.gpr_use_mask |= 1u128 << gpr;
        }
    }

    /// Slot of a statically addressed uniform in the remapped array.
    pub fn remapped_index(&self, source: UniformSource, index: u32) -> Option<u32> {
        self.remapped_lookup.get(&(source, index)).copied()
    }

    fn remap(&mut self, source: UniformSource, index: u32) {
        let next = self.remapped_uniforms.len() as u32;
        if let hashbrown::hash_map::Entry::Vacant(entry) = self.remapped_lookup.entry((source, index)) {
            entry.insert(next);
            self.remapped_uniforms.push(RemappedUniform {
                source,
                index,
                mapped_index: next,
            });
        }
    }

    pub fn used_texture_units(&self) -> impl Iterator<Item = usize> + '_ {
        self.textures
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.used)
            .map(|(index, _)| index)
    }

    pub fn has_texel_coordinate_units(&self) -> bool {
        self.textures.iter().any(|unit| unit.texel_coordinates)
    }

    /// `verticesPerInstance` and the buffer base offsets are needed to write stream-out data
    /// through a storage buffer.
    pub fn needs_streamout_ssbo_uniforms(&self, uses_geometry_shader: bool) -> bool {
        self.use_ssbo_for_streamout
            && match self.stage {
                ShaderStage::Vertex => !uses_geometry_shader,
                ShaderStage::Geometry => true,
                ShaderStage::Pixel => false,
            }
    }

    /// Point size is an output but no export writes it, so it comes from a uniform.
    pub fn needs_point_size_uniform(&self, uses_geometry_shader: bool) -> bool {
        let stage_outputs_vertices = match self.stage {
            ShaderStage::Vertex => !uses_geometry_shader,
            ShaderStage::Geometry => true,
            ShaderStage::Pixel => false,
        };
        stage_outputs_vertices && self.output_point_size && !self.writes_point_size
    }
}

/// Collaborator data the analyzer reads besides the program itself.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisContext<'a> {
    pub stage: ShaderStage,
    pub regs: &'a RegisterState,
    pub fetch_shader: Option<&'a FetchShader>,
    pub copy_shader: Option<&'a CopyShader>,
    pub options: &'a CompileOptions,
}

/// Analyzes a decoded program and records the active-mask stack depth of every CF instruction.
pub fn analyze(
    program: &mut DecodedProgram,
    ctx: &AnalysisContext<'_>,
    diagnostics: &mut Diagnostics,
) -> ShaderAnalysis {
    let mut analysis = ShaderAnalysis::new(ctx.stage);
    let regs = ctx.regs;

    analysis.is_points_primitive = regs.primitive_mode == PrimitiveMode::Points;
    analysis.has_streamout_enable = regs.streamout_enable;
    analysis.output_point_size = match ctx.stage {
        ShaderStage::Vertex => !ctx.options.uses_geometry_shader && analysis.is_points_primitive,
        ShaderStage::Geometry => regs.gs_output_primitive == GsOutputPrimitive::Points,
        ShaderStage::Pixel => false,
    };

    if ctx.stage != ShaderStage::Pixel {
        if let Some(fetch_shader) = ctx.fetch_shader {
            let mut semantics: Vec<u8> = fetch_shader
                .attributes()
                .map(|attr| attr.semantic_id)
                .filter(|&id| id != gpu7_isa::VertexAttribute::UNUSED_SEMANTIC)
                .collect();
            semantics.sort_unstable();
            semantics.dedup();
            analysis.input_semantics = semantics;
        }
    }

    for cf in program.all_cf() {
        analyze_cf(&mut analysis, cf, ctx, diagnostics);
    }

    analysis.uniform_mode = if analysis
        .uniform_buffer_access
        .iter()
        .any(BufferAccess::has_relative_access)
    {
        UniformMode::FullCBank
    } else if analysis.uniform_register_access.has_relative_access() {
        UniformMode::FullCFile
    } else if analysis.uniform_register_access.has_access()
        || analysis.uniform_buffer_access.iter().any(BufferAccess::has_access)
    {
        UniformMode::Remapped
    } else {
        UniformMode::None
    };
    analysis.quick_buffers = analysis
        .uniform_buffer_access
        .iter()
        .enumerate()
        .filter(|(_, access)| access.has_access())
        .map(|(index, access)| QuickBuffer {
            index: index as u32,
            size: access.determine_size(MAX_UBO_VEC4) * 16,
        })
        .collect();

    for (index, unit) in analysis.textures.iter_mut().enumerate() {
        if !unit.used {
            continue;
        }
        let state = regs.textures[index];
        unit.dim = state.dim;
        unit.integer_format = state.integer_format;
    }
    analysis.has_cube_map_texture = analysis
        .textures
        .iter()
        .any(|unit| unit.used && unit.dim == TextureDim::Cubemap);

    if ctx.stage == ShaderStage::Geometry {
        if let Some(copy_shader) = ctx.copy_shader {
            if !copy_shader.stream_writes.is_empty() {
                analysis.has_streamout_write = true;
                analysis.has_streamout_enable = regs.streamout_enable;
                for write in &copy_shader.stream_writes {
                    let buffer = write.buffer as usize & (NUM_STREAMOUT_BUFFERS - 1);
                    analysis.streamout_write_mask |= 1 << buffer;
                    let write_size = vector_write_size(write.comp_mask);
                    let stride = &mut analysis.streamout_buffer_stride[buffer];
                    *stride = (*stride).max(write.array_base * 4 + write_size);
                }
            }
        }
    }

    if analysis.uses_relative_gpr_read {
        match ctx.stage {
            ShaderStage::Vertex | ShaderStage::Geometry => {
                if let Some(fetch_shader) = ctx.fetch_shader {
                    let locations: Vec<usize> = fetch_shader
                        .attributes()
                        .filter_map(|attr| regs.vertex_attribute_location(attr.semantic_id))
                        .collect();
                    for location in locations {
                        analysis.mark_gpr(location as u32 + 1);
                    }
                }
            }
            ShaderStage::Pixel => {
                for gpr in 0..regs.ps_inputs.inputs.len() {
                    analysis.mark_gpr(gpr as u32);
                }
            }
        }
    }

    analysis.max_stack_depth = assign_stack_depth(&mut program.cf, diagnostics);
    for sub in &mut program.subroutines {
        let depth = assign_stack_depth(&mut sub.cf, diagnostics);
        analysis.max_stack_depth = analysis.max_stack_depth.max(depth);
    }

    analysis.use_ssbo_for_streamout = ctx.options.tf_via_ssbo && analysis.streamout_write_mask != 0;
    analysis.default_data_type = if analysis.uses_integer_values {
        DataType::SignedInt
    } else {
        DataType::Float
    };
    analysis.use_array_gprs = analysis.uses_relative_gpr_write;

    tracing::debug!(
        stage = %ctx.stage,
        uniform_mode = ?analysis.uniform_mode,
        max_stack_depth = analysis.max_stack_depth,
        gprs = analysis.gpr_use_mask.count_ones(),
        "analyzed shader"
    );
    analysis
}

fn analyze_cf(
    analysis: &mut ShaderAnalysis,
    cf: &CfInstruction,
    ctx: &AnalysisContext<'_>,
    diagnostics: &mut Diagnostics,
) {
    match &cf.kind {
        CfKind::Alu { kind, clause } => {
            if *kind != AluCfKind::Alu {
                analysis.modifies_pixel_active_state = true;
            }
            analyze_alu_clause(analysis, clause);
        }
        CfKind::Tex { instructions } => {
            for instruction in instructions {
                analyze_tex(analysis, instruction, ctx.stage, diagnostics);
            }
        }
        CfKind::Export(export) => analyze_export(analysis, export, cf, ctx, diagnostics),
        CfKind::Else { .. } | CfKind::Pop { .. } => analysis.modifies_pixel_active_state = true,
        CfKind::LoopStart { .. } | CfKind::LoopEnd { .. } | CfKind::LoopBreak { .. } => {
            analysis.modifies_pixel_active_state = true;
            analysis.has_loops = true;
        }
        CfKind::MemStream { buffer, write } => {
            analysis.has_streamout_write = true;
            analysis.streamout_write_mask |= 1 << (*buffer as usize & (NUM_STREAMOUT_BUFFERS - 1));
            for (stride, dwords) in analysis
                .streamout_buffer_stride
                .iter_mut()
                .zip(ctx.regs.streamout_vertex_stride)
            {
                *stride = dwords * 4;
            }
            for i in 0..=write.burst_count {
                analysis.mark_gpr(write.src_gpr + i);
            }
        }
        CfKind::MemRing(write) => {
            if write.elem_size != 3 {
                diagnostics.assumption(
                    Some(cf.word_index()),
                    format!("ring write with element size {}", write.elem_size),
                );
            }
            let dword_count = (write.burst_count + 1) * 4;
            let parameters = (write.array_base + dword_count) / 4;
            analysis.ring_parameter_count = analysis.ring_parameter_count.max(parameters);
            for i in 0..=write.burst_count {
                analysis.mark_gpr(write.src_gpr + i);
            }
        }
        CfKind::EmitVertex => analysis.num_emit_vertex += 1,
        CfKind::Call { .. } | CfKind::Return => {}
    }
}

fn analyze_alu_clause(analysis: &mut ShaderAnalysis, clause: &AluClause) {
    for instruction in &clause.instructions {
        if instruction.op.is_nop() {
            continue;
        }
        if instruction.op.op2() == Some(gpu7_isa::Op2::Cube) {
            analysis.has_redc_cube = true;
        }
        if instruction.op.uses_integer_values() {
            analysis.uses_integer_values = true;
        }
        for operand in instruction.operands() {
            match operand.sel {
                AluSrc::CFile(index) => {
                    if !operand.rel {
                        analysis.remap(UniformSource::Register, index);
                    }
                    analysis.uniform_register_access.track(index, operand.rel);
                }
                AluSrc::KCache0(index) => track_kcache(analysis, clause.kcache[0], index, operand.rel),
                AluSrc::KCache1(index) => track_kcache(analysis, clause.kcache[1], index, operand.rel),
                AluSrc::Gpr(gpr) => {
                    analysis.mark_gpr(gpr);
                    if operand.rel {
                        analysis.uses_relative_gpr_read = true;
                    }
                }
                _ => {}
            }
        }
        if instruction.dst_rel {
            analysis.uses_relative_gpr_write = true;
        }
        analysis.mark_gpr(instruction.dst_gpr);
    }
}

fn track_kcache(analysis: &mut ShaderAnalysis, bank: KCacheBank, index: u32, rel: bool) {
    let buffer = bank.bank as usize & (NUM_UNIFORM_BUFFERS - 1);
    let offset = index + bank.base;
    if !rel {
        analysis.remap(UniformSource::Buffer(buffer as u32), offset);
    }
    analysis.uniform_buffer_access[buffer].track(offset, rel);
}

fn analyze_tex(
    analysis: &mut ShaderAnalysis,
    instruction: &TexInstruction,
    stage: ShaderStage,
    diagnostics: &mut Diagnostics,
) {
    match instruction.payload {
        TexPayload::Fetch(fetch) => match instruction.opcode {
            TexOpcode::GetCompTexLod | TexOpcode::GetTextureResInfo => {
                if let Some(unit) = analysis.textures.get_mut(fetch.texture as usize) {
                    unit.used = true;
                } else {
                    diagnostics.assumption(
                        Some(instruction.word_index),
                        format!("texture query on unit {}", fetch.texture),
                    );
                }
            }
            TexOpcode::SetGradientsH | TexOpcode::SetGradientsV => analysis.has_gradient_lookup = true,
            TexOpcode::GetGradientsH | TexOpcode::GetGradientsV | TexOpcode::SetCubemapIndex => {}
            opcode => {
                let Some(unit) = analysis.textures.get_mut(fetch.texture as usize) else {
                    tracing::debug!(texture = fetch.texture, "ignoring out of range texture access");
                    return;
                };
                if unit.used && unit.sampler.is_some_and(|sampler| sampler != fetch.sampler) {
                    diagnostics.assumption(
                        Some(instruction.word_index),
                        format!("texture unit {} used with more than one sampler", fetch.texture),
                    );
                }
                unit.used = true;
                unit.sampler = Some(fetch.sampler);
                if opcode.is_depth_compare() {
                    unit.depth_compare = true;
                }
                if (opcode == TexOpcode::Sample && fetch.unnormalized == [true; 4]) || opcode == TexOpcode::Ld {
                    unit.texel_coordinates = true;
                }
            }
        },
        TexPayload::VertexFetch(vtx) => {
            if (FETCH_BUFFER_UNIFORM_BASE..FETCH_BUFFER_UNIFORM_BASE + NUM_UNIFORM_BUFFERS as u32)
                .contains(&vtx.buffer)
            {
                let buffer = (vtx.buffer - FETCH_BUFFER_UNIFORM_BASE) as usize;
                analysis.uniform_buffer_access[buffer].track(0, true);
            } else if vtx.buffer == FETCH_BUFFER_GS_RING && stage == ShaderStage::Geometry {
                // GS input ring.
            } else {
                diagnostics.assumption(
                    Some(instruction.word_index),
                    format!("vertex fetch from buffer {:#x}", vtx.buffer),
                );
            }
        }
        TexPayload::MemRead(_) => analysis.has_ssbo_read = true,
    }
    if let Some(dst) = instruction.dst_gpr {
        analysis.mark_gpr(dst);
    }
    analysis.mark_gpr(instruction.src_gpr);
}

fn analyze_export(
    analysis: &mut ShaderAnalysis,
    export: &ExportInfo,
    cf: &CfInstruction,
    ctx: &AnalysisContext<'_>,
    diagnostics: &mut Diagnostics,
) {
    match ctx.stage {
        ShaderStage::Pixel => {
            if export.export_type == ExportType::Pixel && (export.array_base as usize) < NUM_COLOR_TARGETS {
                for i in 0..=export.burst_count {
                    if let Some(target) = ctx.regs.color_target_for_export(export.array_base + i) {
                        analysis.color_output_mask |= 1 << target;
                    }
                }
            } else if export.array_base == EXPORT_BASE_POINT_SIZE_OR_DEPTH {
                analysis.writes_depth = true;
            } else {
                diagnostics.assumption(
                    Some(cf.word_index()),
                    format!("pixel export to array base {}", export.array_base),
                );
            }
        }
        ShaderStage::Vertex | ShaderStage::Geometry => {
            if export.export_type == ExportType::Parameter && export.array_base < 32 {
                for i in 0..=export.burst_count {
                    let index = export.array_base + i;
                    if index < 32 {
                        analysis.output_parameter_mask |= 1 << index;
                    }
                }
            } else if export.export_type == ExportType::Position
                && export.array_base == EXPORT_BASE_POINT_SIZE_OR_DEPTH
            {
                analysis.writes_point_size = true;
            }
        }
    }
    for i in 0..=export.burst_count {
        analysis.mark_gpr(export.src_gpr + i);
    }
}

/// Assigns the active-mask stack depth to each instruction and returns the maximum depth.
fn assign_stack_depth(cf: &mut [CfInstruction], diagnostics: &mut Diagnostics) -> u32 {
    let mut current: i64 = 0;
    let mut max: i64 = 0;
    for instruction in cf.iter_mut() {
        let depth_before = current;
        match &instruction.kind {
            CfKind::Alu { kind, .. } => match kind {
                AluCfKind::PushBefore => {
                    current += 1;
                    max = max.max(current);
                }
                AluCfKind::PopAfter => current -= 1,
                AluCfKind::Pop2After => current -= 2,
                AluCfKind::Alu | AluCfKind::Break | AluCfKind::ElseAfter => {}
            },
            CfKind::Pop { pop_count } => current -= i64::from(*pop_count),
            _ => {}
        }
        let depth = match instruction.kind.alu_kind() {
            Some(AluCfKind::PushBefore) => current,
            _ => depth_before,
        };
        if current < 0 {
            diagnostics.assumption(Some(instruction.word_index()), "active mask stack underflow");
        }
        instruction.active_stack_depth = depth.max(0) as u32;
    }
    if current != 0 {
        diagnostics.assumption(
            None,
            format!("active mask stack depth is {current} at the end of the program"),
        );
    }
    max as u32
}

/// Bytes covered by a stream-out write up to its highest written component.
fn vector_write_size(mask: ChannelMask) -> u32 {
    mask.width() as u32 * 4
}

#[cfg(test)]
mod tests {
    use gpu7_isa::asm::{alu_op, cf_alu, cf_inst, cf_op, cf_pop, sel, vfetch, Alu, Export, ProgramBuilder, Sample};
    use gpu7_isa::{FetchShader, TextureUnitState, VertexAttribute, VertexFormat};

    use super::*;
    use crate::decode::decode_program;
    use crate::program::Program;

    fn run(builder: &ProgramBuilder, stage: ShaderStage, regs: &RegisterState) -> (DecodedProgram, ShaderAnalysis, Diagnostics) {
        let bytes = builder.to_bytes();
        let program = Program::new(&bytes).unwrap();
        let mut diagnostics = Diagnostics::new();
        let mut decoded = decode_program(&program, stage, &mut diagnostics).unwrap();
        let options = CompileOptions::default();
        let ctx = AnalysisContext {
            stage,
            regs,
            fetch_shader: None,
            copy_shader: None,
            options: &options,
        };
        let analysis = analyze(&mut decoded, &ctx, &mut diagnostics);
        (decoded, analysis, diagnostics)
    }

    #[test]
    fn static_uniforms_are_remapped_in_first_use_order() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 2))
            .cf(1, Export::new(1, 60, 0).done().end().encode())
            .alu(
                4,
                &[
                    Alu::op2(alu_op::MOV).src(0, sel::cfile(7), 0).dst(0, 0).last().encode(),
                    Alu::op2(alu_op::ADD)
                        .src(0, sel::cfile(2), 1)
                        .src(1, sel::cfile(7), 2)
                        .dst(0, 1)
                        .last()
                        .encode(),
                ],
            );
        let (_, analysis, diagnostics) = run(&builder, ShaderStage::Vertex, &RegisterState::default());
        assert!(diagnostics.is_empty());
        assert_eq!(analysis.uniform_mode, UniformMode::Remapped);
        assert_eq!(analysis.remapped_index(UniformSource::Register, 7), Some(0));
        assert_eq!(analysis.remapped_index(UniformSource::Register, 2), Some(1));
        assert_eq!(analysis.uniform_register_access.determine_size(256), 8);
        assert!(analysis.is_gpr_used(0));
        assert_eq!(analysis.default_data_type, DataType::Float);
    }

    #[test]
    fn relative_uniform_register_access_selects_full_cfile() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 1))
            .cf(1, Export::new(1, 60, 0).done().end().encode())
            .alu(
                4,
                &[Alu::op2(alu_op::MOV).src(0, sel::cfile(4), 0).rel(0).dst(0, 0).last().encode()],
            );
        let (_, analysis, _) = run(&builder, ShaderStage::Vertex, &RegisterState::default());
        assert_eq!(analysis.uniform_mode, UniformMode::FullCFile);
        assert_eq!(analysis.uniform_register_access.determine_size(256), 256);
    }

    #[test]
    fn uniform_buffer_vertex_fetch_selects_full_cbank() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::VTX, 2, 1, false))
            .cf(1, Export::new(1, 60, 0).done().end().encode())
            .tex(2, &[vfetch(0x82, 0, 3, [0, 1, 2, 3], 0, 0x23, 2, false)]);
        let (_, analysis, diagnostics) = run(&builder, ShaderStage::Vertex, &RegisterState::default());
        assert!(diagnostics.is_empty());
        assert_eq!(analysis.uniform_mode, UniformMode::FullCBank);
        assert_eq!(
            analysis.quick_buffers,
            vec![QuickBuffer {
                index: 2,
                size: MAX_UBO_VEC4 * 16
            }]
        );
    }

    #[test]
    fn stack_depth_follows_push_and_pop() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU_PUSH_BEFORE, 8, 1))
            .cf(1, cf_alu(cf_op::ALU, 9, 1))
            .cf(2, cf_alu(cf_op::ALU_POP_AFTER, 10, 1))
            .cf(3, Export::new(0, 0, 0).done().end().encode())
            .alu(
                8,
                &[Alu::op2(alu_op::PRED_SETGT).src(0, 0, 0).src(1, sel::CONST_0, 0).no_write().last().encode()],
            )
            .alu(9, &[Alu::op2(alu_op::MOV).src(0, 0, 1).dst(1, 0).last().encode()])
            .alu(10, &[Alu::op2(alu_op::MOV).src(0, 0, 2).dst(1, 1).last().encode()]);
        let (decoded, analysis, diagnostics) = run(&builder, ShaderStage::Pixel, &RegisterState::default());
        assert!(diagnostics.is_empty());
        let depths: Vec<u32> = decoded.cf.iter().map(|cf| cf.active_stack_depth).collect();
        assert_eq!(depths, vec![1, 1, 1, 0]);
        assert_eq!(analysis.max_stack_depth, 1);
        assert!(analysis.modifies_pixel_active_state);
    }

    #[test]
    fn unbalanced_stack_is_an_assumption_violation() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_pop(cf_op::POP, 1))
            .cf(1, Export::new(0, 0, 0).done().end().encode());
        let (_, _, diagnostics) = run(&builder, ShaderStage::Pixel, &RegisterState::default());
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn pixel_exports_map_through_shader_mask() {
        let regs = RegisterState {
            cb_shader_mask: 0xF0F,
            ..RegisterState::default()
        };
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(0, 0, 0).burst(1).done().end().encode());
        let (_, analysis, _) = run(&builder, ShaderStage::Pixel, &regs);
        assert_eq!(analysis.color_output_mask, 0b101);
        assert!(analysis.is_gpr_used(0) && analysis.is_gpr_used(1));
    }

    #[test]
    fn samples_record_units_and_texel_coordinates() {
        let mut regs = RegisterState::default();
        regs.textures[3] = TextureUnitState {
            dim: TextureDim::Cubemap,
            integer_format: false,
        };
        let mut unnormalized = Sample::new(0x10, 1, 0, 2);
        unnormalized.normalized = false;
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_inst(cf_op::TEX, 4, 3, false))
            .cf(1, Export::new(0, 0, 0).done().end().encode())
            .tex(
                4,
                &[
                    Sample::new(0x10, 3, 0, 1).encode(),
                    unnormalized.encode(),
                    Sample::new(0x10, 40, 0, 1).encode(),
                ],
            );
        let (_, analysis, diagnostics) = run(&builder, ShaderStage::Pixel, &regs);
        assert!(diagnostics.is_empty());
        assert_eq!(analysis.used_texture_units().collect::<Vec<_>>(), vec![1, 3]);
        assert!(analysis.has_cube_map_texture);
        assert!(analysis.textures[1].texel_coordinates);
        assert!(!analysis.textures[3].texel_coordinates);
    }

    #[test]
    fn integer_ops_switch_default_type() {
        let mut builder = ProgramBuilder::new();
        builder
            .cf(0, cf_alu(cf_op::ALU, 4, 1))
            .cf(1, Export::new(1, 60, 0).done().end().encode())
            .alu(
                4,
                &[Alu::op2(alu_op::ADD_INT).src(0, 0, 0).src(1, 0, 1).dst(0, 2).last().encode()],
            );
        let (_, analysis, _) = run(&builder, ShaderStage::Vertex, &RegisterState::default());
        assert_eq!(analysis.default_data_type, DataType::SignedInt);
    }

    #[test]
    fn input_semantics_skip_unused_attributes() {
        let fetch_shader = FetchShader {
            groups: vec![gpu7_isa::AttributeBufferGroup {
                buffer_index: 0,
                stride: 16,
                attributes: vec![
                    VertexAttribute::new(4, 0, VertexFormat::Fmt32Float),
                    VertexAttribute::new(VertexAttribute::UNUSED_SEMANTIC, 0, VertexFormat::Fmt32Float),
                    VertexAttribute::new(1, 0, VertexFormat::Fmt32Float),
                ],
            }],
            invalid_groups: Vec::new(),
        };
        let mut builder = ProgramBuilder::new();
        builder.cf(0, Export::new(1, 60, 0).done().end().encode());
        let bytes = builder.to_bytes();
        let program = Program::new(&bytes).unwrap();
        let mut diagnostics = Diagnostics::new();
        let mut decoded = decode_program(&program, ShaderStage::Vertex, &mut diagnostics).unwrap();
        let options = CompileOptions::default();
        let regs = RegisterState::default();
        let ctx = AnalysisContext {
            stage: ShaderStage::Vertex,
            regs: &regs,
            fetch_shader: Some(&fetch_shader),
            copy_shader: None,
            options: &options,
        };
        let analysis = analyze(&mut decoded, &ctx, &mut diagnostics);
        assert_eq!(analysis.input_semantics, vec![1, 4]);
    }
}
