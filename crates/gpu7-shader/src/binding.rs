//! Resource slot assignment per output dialect.
//!
//! OpenGL partitions the binding space by stage (fixed bases per stage), Vulkan uses one
//! descriptor set per stage with consecutive bindings, and Metal hands out consecutive texture
//! and buffer argument indices.

use gpu7_isa::{RegisterState, ShaderStage, NUM_UNIFORM_BUFFERS};

use crate::analyze::{ShaderAnalysis, UniformMode};
use crate::compile::CompileOptions;
use crate::limits::MAX_TEXTURE_UNITS;

/// First GL texture binding point of each stage.
const GL_TEXTURE_BASE_VS: u32 = 0;
const GL_TEXTURE_BASE_PS: u32 = 32;
const GL_TEXTURE_BASE_GS: u32 = 64;

/// First GL uniform buffer binding point of each stage.
const GL_UBO_BASE_VS: u32 = 0;
const GL_UBO_BASE_PS: u32 = 32;
const GL_UBO_BASE_GS: u32 = 64;

/// Metal buffer argument table size. Vertex buffers are bound from the top down.
const MTL_MAX_BUFFERS: u32 = 31;

/// Binding of one vertex attribute semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeBinding {
    pub semantic_id: u8,
    pub location: u32,
}

/// Slot assignment for one dialect.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceBindingMap {
    /// Vulkan descriptor set of the stage.
    pub set_index: Option<u32>,
    pub textures: [Option<u32>; MAX_TEXTURE_UNITS],
    pub uniform_buffers: [Option<u32>; NUM_UNIFORM_BUFFERS],
    /// Block holding the special uniforms and the remapped/register arrays.
    pub uniform_vars: Option<u32>,
    /// Storage buffer used for stream-out when transform feedback goes through memory.
    pub tf_storage: Option<u32>,
    pub attributes: Vec<AttributeBinding>,
    /// Metal object-stage vertex pulling inputs.
    pub vertices_per_instance: Option<u32>,
    pub index_buffer: Option<u32>,
    /// `0` for non-indexed draws, `1` for 16-bit and `2` for 32-bit indices.
    pub index_type: Option<u32>,
}

impl ResourceBindingMap {
    pub fn attribute_location(&self, semantic_id: u8) -> Option<u32> {
        self.attributes
            .iter()
            .find(|binding| binding.semantic_id == semantic_id)
            .map(|binding| binding.location)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderBindings {
    pub gl: ResourceBindingMap,
    pub vk: ResourceBindingMap,
    pub mtl: ResourceBindingMap,
}

/// Vulkan descriptor set index of a stage.
pub fn vk_set_index(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Pixel => 1,
        ShaderStage::Geometry => 2,
    }
}

/// Metal buffer slot of a pulled vertex buffer.
pub fn mtl_vertex_buffer_slot(buffer_index: u32) -> u32 {
    MTL_MAX_BUFFERS - 1 - buffer_index
}

fn gl_texture_base(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => GL_TEXTURE_BASE_VS,
        ShaderStage::Pixel => GL_TEXTURE_BASE_PS,
        ShaderStage::Geometry => GL_TEXTURE_BASE_GS,
    }
}

fn gl_ubo_base(stage: ShaderStage) -> u32 {
    match stage {
        ShaderStage::Vertex => GL_UBO_BASE_VS,
        ShaderStage::Pixel => GL_UBO_BASE_PS,
        ShaderStage::Geometry => GL_UBO_BASE_GS,
    }
}

/// Whether the stage feeds the rasterizer (or stream-out) directly.
pub(crate) fn outputs_final_vertices(stage: ShaderStage, options: &CompileOptions) -> bool {
    match stage {
        ShaderStage::Vertex => !options.uses_geometry_shader,
        ShaderStage::Geometry => true,
        ShaderStage::Pixel => false,
    }
}

/// Whether any special uniform or uniform array lives in the uniform variable block.
pub fn has_uniform_var_block(analysis: &ShaderAnalysis, regs: &RegisterState, options: &CompileOptions) -> bool {
    let stage = analysis.stage;
    matches!(analysis.uniform_mode, UniformMode::Remapped | UniformMode::FullCFile)
        || (stage == ShaderStage::Vertex && regs.any_viewport_scale_disabled())
        || stage == ShaderStage::Pixel
        || analysis.needs_point_size_uniform(options.uses_geometry_shader)
        || analysis.needs_streamout_ssbo_uniforms(options.uses_geometry_shader)
        || analysis.has_texel_coordinate_units()
}

/// The Metal support buffer additionally always carries `verticesPerInstance` for stages that
/// emit final vertices.
fn has_support_buffer(analysis: &ShaderAnalysis, regs: &RegisterState, options: &CompileOptions) -> bool {
    has_uniform_var_block(analysis, regs, options) || outputs_final_vertices(analysis.stage, options)
}

/// Assigns GL, Vulkan and Metal slots for every resource the shader references.
pub fn assign_bindings(analysis: &ShaderAnalysis, regs: &RegisterState, options: &CompileOptions) -> ShaderBindings {
    let stage = analysis.stage;
    let mut bindings = ShaderBindings::default();
    let full_cbank = analysis.uniform_mode == UniformMode::FullCBank;
    let accessed_buffers: Vec<usize> = analysis
        .uniform_buffer_access
        .iter()
        .enumerate()
        .filter(|(_, access)| access.has_access())
        .map(|(index, _)| index)
        .collect();

    // OpenGL
    let gl = &mut bindings.gl;
    for unit in analysis.used_texture_units() {
        gl.textures[unit] = Some(unit as u32 + gl_texture_base(stage));
    }
    if full_cbank {
        for &buffer in &accessed_buffers {
            gl.uniform_buffers[buffer] = Some(buffer as u32 + gl_ubo_base(stage));
        }
    }

    // Vulkan
    let vk = &mut bindings.vk;
    vk.set_index = Some(vk_set_index(stage));
    let mut next = 0u32;
    let mut take = || {
        let slot = next;
        next += 1;
        slot
    };
    for unit in analysis.used_texture_units() {
        vk.textures[unit] = Some(take());
    }
    if has_uniform_var_block(analysis, regs, options) {
        vk.uniform_vars = Some(take());
    }
    if full_cbank {
        for &buffer in &accessed_buffers {
            vk.uniform_buffers[buffer] = Some(take());
        }
    }
    if analysis.use_ssbo_for_streamout {
        vk.tf_storage = Some(take());
    }

    // Metal
    let mtl = &mut bindings.mtl;
    for (slot, unit) in analysis.used_texture_units().enumerate() {
        mtl.textures[unit] = Some(slot as u32);
    }
    let mut next_buffer = 0u32;
    let mut take_buffer = || {
        let slot = next_buffer;
        next_buffer += 1;
        slot
    };
    if full_cbank {
        for &buffer in &accessed_buffers {
            mtl.uniform_buffers[buffer] = Some(take_buffer());
        }
    }
    if has_support_buffer(analysis, regs, options) {
        mtl.uniform_vars = Some(take_buffer());
    }
    if outputs_final_vertices(stage, options) && analysis.has_streamout_enable && analysis.has_streamout_write {
        mtl.tf_storage = Some(take_buffer());
    }
    if stage == ShaderStage::Vertex && options.uses_geometry_shader {
        mtl.vertices_per_instance = Some(take_buffer());
        mtl.index_buffer = Some(take_buffer());
        mtl.index_type = Some(take_buffer());
    }

    if stage == ShaderStage::Vertex {
        let attributes: Vec<AttributeBinding> = analysis
            .input_semantics
            .iter()
            .enumerate()
            .map(|(location, &semantic_id)| AttributeBinding {
                semantic_id,
                location: location as u32,
            })
            .collect();
        bindings.gl.attributes = attributes.clone();
        bindings.vk.attributes = attributes.clone();
        bindings.mtl.attributes = attributes;
    }

    tracing::trace!(%stage, vk_slots = next, mtl_buffers = next_buffer, "assigned bindings");
    bindings
}
