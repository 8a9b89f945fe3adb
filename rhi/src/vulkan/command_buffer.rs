use anyhow::Result;
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::device::VulkanDevice;
use super::recording::{RecordingEvent, RecordingState};

pub trait CommandRecorder {
    unsafe fn begin(&self, command_buffer: vk::CommandBuffer) -> Result<()>;

    unsafe fn end(&self, command_buffer: vk::CommandBuffer) -> Result<()>;

    unsafe fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    );

    unsafe fn end_render_pass(&self, command_buffer: vk::CommandBuffer);

    unsafe fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    unsafe fn set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport);

    unsafe fn set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D);

    unsafe fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    );

    unsafe fn draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
}

impl CommandRecorder for VulkanDevice {
    unsafe fn begin(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.vk_device.begin_command_buffer(command_buffer, &info)?;
        Ok(())
    }

    unsafe fn end(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        self.vk_device.end_command_buffer(command_buffer)?;
        Ok(())
    }

    unsafe fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    ) {
        self.vk_device
            .cmd_begin_render_pass(command_buffer, info, vk::SubpassContents::INLINE);
    }

    unsafe fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.vk_device.cmd_end_render_pass(command_buffer);
    }

    unsafe fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.vk_device
            .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
    }

    unsafe fn set_viewport(&self, command_buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.vk_device.cmd_set_viewport(command_buffer, 0, &[viewport]);
    }

    unsafe fn set_scissor(&self, command_buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.vk_device.cmd_set_scissor(command_buffer, 0, &[scissor]);
    }

    unsafe fn bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.vk_device.cmd_bind_descriptor_sets(
            command_buffer,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            first_set,
            descriptor_sets,
            dynamic_offsets,
        );
    }

    unsafe fn draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.vk_device.cmd_draw(
            command_buffer,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
    }
}

#[derive(Debug)]
pub struct VulkanCommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl VulkanCommandPool {
    pub unsafe fn new(device: &VulkanDevice, queue_family: u32) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family);

        let pool = device.vk_device.create_command_pool(&info, None)?;

        Ok(Self { pool, queue_family })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub unsafe fn allocate_command_buffer(
        &self,
        device: &VulkanDevice,
    ) -> Result<VulkanCommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = device.vk_device.allocate_command_buffers(&allocate_info)?[0];

        Ok(VulkanCommandBuffer::new(command_buffer))
    }

    pub unsafe fn free_command_buffer(
        &self,
        device: &VulkanDevice,
        command_buffer: VulkanCommandBuffer,
    ) {
        device
            .vk_device
            .free_command_buffers(self.pool, &[command_buffer.handle()]);
    }

    pub unsafe fn reset(&self, device: &VulkanDevice) -> Result<()> {
        device
            .vk_device
            .reset_command_pool(self.pool, vk::CommandPoolResetFlags::empty())?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_command_pool(self.pool, None);
        self.pool = vk::CommandPool::null();
    }
}

#[derive(Debug)]
pub struct VulkanCommandBuffer {
    command_buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl VulkanCommandBuffer {
    pub fn new(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            state: RecordingState::Idle,
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    pub unsafe fn start_recording<R>(&mut self, recorder: &R) -> Result<()>
    where
        R: CommandRecorder + ?Sized,
    {
        if let Some(next) = self.state.next(RecordingEvent::Start) {
            recorder.begin(self.command_buffer)?;
            self.state = next;
        }
        Ok(())
    }

    pub unsafe fn end_recording<R>(&mut self, recorder: &R) -> Result<()>
    where
        R: CommandRecorder + ?Sized,
    {
        if let Some(next) = self.state.next(RecordingEvent::End) {
            recorder.end(self.command_buffer)?;
            self.state = next;
        }
        Ok(())
    }

    pub unsafe fn bind_pipeline<R>(&mut self, recorder: &R, pipeline: vk::Pipeline) -> Result<()>
    where
        R: CommandRecorder + ?Sized,
    {
        self.start_recording(recorder)?;
        if pipeline.is_null() {
            warn!("Skipping bind of a pipeline without shaders.");
            return Ok(());
        }
        recorder.bind_pipeline(self.command_buffer, pipeline);
        Ok(())
    }

    pub unsafe fn set_viewport_and_scissor<R>(&mut self, recorder: &R, extent: vk::Extent2D)
    where
        R: CommandRecorder + ?Sized,
    {
        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(extent.width as f32)
            .height(extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0)
            .build();
        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(extent)
            .build();

        recorder.set_viewport(self.command_buffer, viewport);
        recorder.set_scissor(self.command_buffer, scissor);
    }

    pub unsafe fn bind_descriptor_sets<R>(
        &mut self,
        recorder: &R,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) where
        R: CommandRecorder + ?Sized,
    {
        recorder.bind_descriptor_sets(
            self.command_buffer,
            layout,
            first_set,
            descriptor_sets,
            dynamic_offsets,
        );
    }

    pub unsafe fn draw<R>(&mut self, recorder: &R, vertex_count: u32, instance_count: u32)
    where
        R: CommandRecorder + ?Sized,
    {
        recorder.draw(self.command_buffer, vertex_count, instance_count, 0, 0);
    }
}
