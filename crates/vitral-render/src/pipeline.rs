//! Shader modules and graphics pipeline construction.

use ash::vk;
use vitral_gpu::error::{GpuError, Result};

/// Floats per vertex: a 4-float position and a 4-float auxiliary vector
/// (color or texture coordinates).
pub const FLOATS_PER_VERTEX: u32 = 8;

/// Vertex stride in bytes.
pub const VERTEX_STRIDE: u32 = FLOATS_PER_VERTEX * std::mem::size_of::<f32>() as u32;

/// A vertex/fragment shader pair awaiting pipeline creation.
///
/// The modules only live until the pipeline is built; `create_pipelines`
/// destroys them.
pub struct Shader {
    pub vertex: vk::ShaderModule,
    pub fragment: vk::ShaderModule,
    /// Number of combined image-samplers the fragment stage binds.
    pub texture_count: u32,
}

impl Shader {
    /// Create the vertex and fragment shader modules from SPIR-V words.
    ///
    /// # Safety
    /// The device must be valid and both slices must hold valid SPIR-V.
    pub unsafe fn new(
        device: &ash::Device,
        vertex_spirv: &[u32],
        fragment_spirv: &[u32],
        texture_count: u32,
    ) -> Result<Self> {
        let vertex_info = vk::ShaderModuleCreateInfo::default().code(vertex_spirv);
        let vertex = device
            .create_shader_module(&vertex_info, None)
            .map_err(|e| GpuError::ShaderCreation(format!("Vertex: {e}")))?;

        let fragment_info = vk::ShaderModuleCreateInfo::default().code(fragment_spirv);
        let fragment = match device.create_shader_module(&fragment_info, None) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vertex, None);
                return Err(GpuError::ShaderCreation(format!("Fragment: {e}")));
            }
        };

        Ok(Self {
            vertex,
            fragment,
            texture_count,
        })
    }

    /// Destroy both modules.
    ///
    /// # Safety
    /// The device must be valid and no pipeline creation may be using the
    /// modules.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_shader_module(self.vertex, None);
        device.destroy_shader_module(self.fragment, None);
    }
}

/// A compiled draw configuration.
///
/// Outlives swapchain regeneration: only the render pass *handle* is
/// consumed at creation, and compatible render passes are rebuilt
/// identically on resize.
pub struct Pipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub descriptor_set_layout: vk::DescriptorSetLayout,
    /// Number of combined image-samplers in the descriptor layout.
    pub texture_count: u32,
}

impl Pipeline {
    /// Build the descriptor-set layout, pipeline layout, and graphics
    /// pipeline for one shader pair.
    ///
    /// Does not destroy the shader modules; `create_pipelines` owns that.
    ///
    /// # Safety
    /// The device, render pass, and shader modules must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        shader: &Shader,
    ) -> Result<Self> {
        // Binding 0 is always the mat4 uniform; binding 1 carries the
        // combined image-samplers when the shader uses textures.
        let mut bindings = vec![vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];
        if shader.texture_count > 0 {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count(shader.texture_count)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT),
            );
        }

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let descriptor_set_layout = device
            .create_descriptor_set_layout(&layout_info, None)
            .map_err(|e| GpuError::PipelineCreation(e.to_string()))?;

        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let layout = match device.create_pipeline_layout(&pipeline_layout_info, None) {
            Ok(layout) => layout,
            Err(e) => {
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                return Err(GpuError::PipelineCreation(e.to_string()));
            }
        };

        // Shader stages
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(shader.vertex)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(shader.fragment)
                .name(c"main"),
        ];

        // Vertex input: one binding, position + auxiliary vector
        let vertex_bindings = [vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(VERTEX_STRIDE)
            .input_rate(vk::VertexInputRate::VERTEX)];
        let vertex_attributes = [
            vk::VertexInputAttributeDescription::default()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(0),
            vk::VertexInputAttributeDescription::default()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(4 * std::mem::size_of::<f32>() as u32),
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        // Input assembly
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic, set per frame
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // Rasterization
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false)
            .line_width(1.0);

        // Multisampling
        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        // Depth stencil
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Alpha blending
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        // Dynamic state
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        let pipelines = device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_pipelines, e)| {
                device.destroy_pipeline_layout(layout, None);
                device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                GpuError::PipelineCreation(e.to_string())
            })?;

        Ok(Self {
            pipeline: pipelines[0],
            layout,
            descriptor_set_layout,
            texture_count: shader.texture_count,
        })
    }

    /// Destroy the pipeline and its layouts.
    ///
    /// # Safety
    /// The device must be valid and no shape or instance may still
    /// reference this pipeline.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
    }
}

/// Build one pipeline per shader, destroying every shader module
/// afterwards (the modules are not needed once pipelines exist).
///
/// On failure, pipelines already built are destroyed along with all
/// remaining modules.
///
/// # Safety
/// The device and render pass must be valid.
pub unsafe fn create_pipelines(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    shaders: Vec<Shader>,
) -> Result<Vec<Pipeline>> {
    let mut pipelines = Vec::with_capacity(shaders.len());

    for (i, shader) in shaders.iter().enumerate() {
        match Pipeline::new(device, render_pass, shader) {
            Ok(pipeline) => pipelines.push(pipeline),
            Err(e) => {
                for pipeline in &pipelines {
                    pipeline.destroy(device);
                }
                for shader in &shaders[i..] {
                    shader.destroy(device);
                }
                return Err(e);
            }
        }
        shader.destroy(device);
    }

    Ok(pipelines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_two_vec4s() {
        assert_eq!(VERTEX_STRIDE, 32);
        assert_eq!(FLOATS_PER_VERTEX, 8);
    }
}
