use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::command_buffer::{CommandRecorder, VulkanCommandBuffer};
use super::constants;
use super::device::VulkanDevice;
use super::recording::{RecordingEvent, RecordingState};

#[derive(Debug)]
pub struct VulkanRenderPass {
    render_pass: vk::RenderPass,
    clear_color: [f32; 4],
    state: RecordingState,
}

impl VulkanRenderPass {
    pub unsafe fn new(device: &VulkanDevice, color_format: vk::Format) -> Result<Self> {
        // Attachments
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        // Subpasses
        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments);

        // Dependencies
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

        // Create
        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = device.vk_device.create_render_pass(&info, None)?;

        Ok(Self::from_handle(render_pass))
    }

    pub fn from_handle(render_pass: vk::RenderPass) -> Self {
        Self {
            render_pass,
            clear_color: constants::DEFAULT_CLEAR_COLOR,
            state: RecordingState::Idle,
        }
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.clear_color = clear_color;
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    pub unsafe fn start_render_pass<R>(
        &mut self,
        recorder: &R,
        command_buffer: &VulkanCommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    ) where
        R: CommandRecorder + ?Sized,
    {
        let Some(next) = self.state.next(RecordingEvent::Start) else {
            return;
        };

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_color,
            },
        };

        let clear_values = &[color_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        recorder.begin_render_pass(command_buffer.handle(), &info);
        self.state = next;
    }

    pub unsafe fn end_render_pass<R>(&mut self, recorder: &R, command_buffer: &VulkanCommandBuffer)
    where
        R: CommandRecorder + ?Sized,
    {
        if let Some(next) = self.state.next(RecordingEvent::End) {
            recorder.end_render_pass(command_buffer.handle());
            self.state = next;
        }
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_render_pass(self.render_pass, None);
        self.render_pass = vk::RenderPass::null();
        self.state = RecordingState::Idle;
    }
}
