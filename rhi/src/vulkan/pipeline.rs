use anyhow::{anyhow, Result};
use log::*;
use std::ffi::CString;
use vulkanalia::bytecode::Bytecode;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::device::VulkanDevice;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PipelineState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub blend: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub color_blend_op: vk::BlendOp,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
    pub alpha_blend_op: vk::BlendOp,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub samples: vk::SampleCountFlags,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            blend: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            color_blend_op: vk::BlendOp::ADD,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
            alpha_blend_op: vk::BlendOp::ADD,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            samples: vk::SampleCountFlags::_1,
        }
    }
}

impl PipelineState {
    pub fn sanitize(mut self, features: &vk::PhysicalDeviceFeatures) -> Self {
        if self.polygon_mode != vk::PolygonMode::FILL && features.fill_mode_non_solid != vk::TRUE {
            warn!(
                "Polygon mode {:?} needs fillModeNonSolid, falling back to FILL.",
                self.polygon_mode
            );
            self.polygon_mode = vk::PolygonMode::FILL;
        }
        self
    }

    pub fn alpha_blended(mut self) -> Self {
        self.blend = true;
        self.src_color_blend_factor = vk::BlendFactor::SRC_ALPHA;
        self.dst_color_blend_factor = vk::BlendFactor::ONE_MINUS_SRC_ALPHA;
        self
    }
}

#[derive(Clone, Debug)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

impl ShaderStage {
    pub fn new(stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        Self {
            stage,
            module,
            entry_point: CString::from(c"main"),
        }
    }
}

#[derive(Debug)]
pub struct VulkanPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    state: PipelineState,
    shader_stages: Vec<ShaderStage>,
    descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    push_constant_ranges: Vec<vk::PushConstantRange>,
}

impl VulkanPipeline {
    pub fn new(render_pass: vk::RenderPass) -> Self {
        Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            render_pass,
            state: PipelineState::default(),
            shader_stages: Vec::new(),
            descriptor_set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub unsafe fn set_shaders(
        &mut self,
        device: &VulkanDevice,
        shader_stages: Vec<ShaderStage>,
    ) -> Result<()> {
        self.shader_stages = shader_stages;
        self.recreate(device)
    }

    pub unsafe fn set_layout(
        &mut self,
        device: &VulkanDevice,
        descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
        push_constant_ranges: Vec<vk::PushConstantRange>,
    ) -> Result<()> {
        self.descriptor_set_layouts = descriptor_set_layouts;
        self.push_constant_ranges = push_constant_ranges;
        self.recreate(device)
    }

    pub unsafe fn update_state<F>(&mut self, device: &VulkanDevice, update: F) -> Result<()>
    where
        F: FnOnce(&mut PipelineState),
    {
        let mut state = self.state;
        update(&mut state);
        let state = state.sanitize(device.enabled_features());
        if state == self.state {
            return Ok(());
        }
        self.state = state;
        self.recreate(device)
    }

    pub unsafe fn set_render_pass(
        &mut self,
        device: &VulkanDevice,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        self.render_pass = render_pass;
        self.recreate(device)
    }

    pub unsafe fn recreate(&mut self, device: &VulkanDevice) -> Result<()> {
        self.destroy(device);

        if self.shader_stages.is_empty() {
            debug!("Pipeline has no shaders yet, deferring creation.");
            return Ok(());
        }

        // Layout
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&self.descriptor_set_layouts)
            .push_constant_ranges(&self.push_constant_ranges);
        self.layout = device
            .vk_device
            .create_pipeline_layout(&layout_info, None)?;

        // Stages
        let stages = self
            .shader_stages
            .iter()
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(s.stage)
                    .module(s.module)
                    .name(s.entry_point.as_bytes_with_nul())
            })
            .collect::<Vec<_>>();

        let state = &self.state;
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(state.topology)
            .primitive_restart_enable(state.primitive_restart);

        // Viewport and scissor are dynamic, only their counts are baked.
        let viewports = &[vk::Viewport::default()];
        let scissors = &[vk::Rect2D::default()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        // rasterizer
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(state.polygon_mode)
            .line_width(state.line_width)
            .cull_mode(state.cull_mode)
            .front_face(state.front_face)
            .depth_bias_enable(false);

        // multisampling
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(state.samples);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(state.depth_test)
            .depth_write_enable(state.depth_write)
            .depth_compare_op(state.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // color blending
        let attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(state.blend)
            .src_color_blend_factor(state.src_color_blend_factor)
            .dst_color_blend_factor(state.dst_color_blend_factor)
            .color_blend_op(state.color_blend_op)
            .src_alpha_blend_factor(state.src_alpha_blend_factor)
            .dst_alpha_blend_factor(state.dst_alpha_blend_factor)
            .alpha_blend_op(state.alpha_blend_op);

        let attachments = &[attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        self.pipeline = device
            .vk_device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?
            .0[0];

        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        if !self.pipeline.is_null() {
            device.vk_device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if !self.layout.is_null() {
            device.vk_device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

pub unsafe fn create_shader_module(device: &VulkanDevice, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let bytecode = Bytecode::new(bytecode).map_err(|e| anyhow!("Invalid SPIR-V: {}", e))?;
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.code_size())
        .code(bytecode.code());

    Ok(device.vk_device.create_shader_module(&info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_opaque_depth_tested_triangles() {
        let state = PipelineState::default();
        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.front_face, vk::FrontFace::CLOCKWISE);
        assert!(!state.blend);
        assert!(state.depth_test && state.depth_write);
        assert_eq!(state.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(state.samples, vk::SampleCountFlags::_1);
    }

    #[test]
    fn wireframe_needs_fill_mode_non_solid() {
        let wireframe = PipelineState {
            polygon_mode: vk::PolygonMode::LINE,
            ..Default::default()
        };

        let without = wireframe.sanitize(&vk::PhysicalDeviceFeatures::default());
        assert_eq!(without.polygon_mode, vk::PolygonMode::FILL);

        let features = vk::PhysicalDeviceFeatures {
            fill_mode_non_solid: vk::TRUE,
            ..Default::default()
        };
        assert_eq!(wireframe.sanitize(&features).polygon_mode, vk::PolygonMode::LINE);
    }

    #[test]
    fn new_pipeline_has_no_native_objects() {
        let pipeline = VulkanPipeline::new(vk::RenderPass::null());
        assert!(pipeline.handle().is_null());
        assert!(pipeline.layout().is_null());
        assert_eq!(pipeline.state(), &PipelineState::default());
    }
}
