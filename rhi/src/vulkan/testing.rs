//! In-memory stand-ins for the device, used by unit tests.

use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use vulkanalia::vk::{self, Handle};

use super::command_buffer::CommandRecorder;
use super::descriptor_pool::DescriptorBackend;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Begin,
    End,
    BeginRenderPass { framebuffer: u64, clear_color: [u32; 4] },
    EndRenderPass,
    BindPipeline(u64),
    SetViewport,
    SetScissor,
    BindDescriptorSets { first_set: u32, sets: Vec<u64>, dynamic_offsets: Vec<u32> },
    Draw(u32, u32),
}

#[derive(Debug, Default)]
pub struct RecorderLog {
    commands: RefCell<Vec<Command>>,
    fail_begin: bool,
}

impl RecorderLog {
    pub fn failing_begin() -> Self {
        Self {
            fail_begin: true,
            ..Default::default()
        }
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }

    fn push(&self, command: Command) {
        self.commands.borrow_mut().push(command);
    }
}

impl CommandRecorder for RecorderLog {
    unsafe fn begin(&self, _: vk::CommandBuffer) -> Result<()> {
        if self.fail_begin {
            return Err(anyhow!(vk::ErrorCode::OUT_OF_HOST_MEMORY));
        }
        self.push(Command::Begin);
        Ok(())
    }

    unsafe fn end(&self, _: vk::CommandBuffer) -> Result<()> {
        self.push(Command::End);
        Ok(())
    }

    unsafe fn begin_render_pass(&self, _: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        let clear_value = *info.clear_values;
        let color = clear_value.color.float32;
        self.push(Command::BeginRenderPass {
            framebuffer: info.framebuffer.as_raw(),
            clear_color: color.map(f32::to_bits),
        });
    }

    unsafe fn end_render_pass(&self, _: vk::CommandBuffer) {
        self.push(Command::EndRenderPass);
    }

    unsafe fn bind_pipeline(&self, _: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.push(Command::BindPipeline(pipeline.as_raw()));
    }

    unsafe fn set_viewport(&self, _: vk::CommandBuffer, _: vk::Viewport) {
        self.push(Command::SetViewport);
    }

    unsafe fn set_scissor(&self, _: vk::CommandBuffer, _: vk::Rect2D) {
        self.push(Command::SetScissor);
    }

    unsafe fn bind_descriptor_sets(
        &self,
        _: vk::CommandBuffer,
        _: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        self.push(Command::BindDescriptorSets {
            first_set,
            sets: descriptor_sets.iter().map(|s| s.as_raw()).collect(),
            dynamic_offsets: dynamic_offsets.to_vec(),
        });
    }

    unsafe fn draw(&self, _: vk::CommandBuffer, vertex_count: u32, instance_count: u32, _: u32, _: u32) {
        self.push(Command::Draw(vertex_count, instance_count));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedWrite {
    pub set: u64,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct FakeDescriptorBackend {
    next_handle: Cell<u64>,
    pools: RefCell<HashMap<u64, (u32, u32)>>,
    pub created_pools: Cell<usize>,
    pub allocations: Cell<usize>,
    pub resets: Cell<usize>,
    pub destroyed_pools: Cell<usize>,
    pub writes: RefCell<Vec<RecordedWrite>>,
    pub exhausted: bool,
}

impl FakeDescriptorBackend {
    pub fn exhausted() -> Self {
        Self {
            exhausted: true,
            ..Default::default()
        }
    }

    fn next(&self) -> u64 {
        let handle = self.next_handle.get() + 1;
        self.next_handle.set(handle);
        handle
    }
}

impl DescriptorBackend for FakeDescriptorBackend {
    unsafe fn create_pool(
        &self,
        _: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<vk::DescriptorPool> {
        let handle = self.next();
        self.pools.borrow_mut().insert(handle, (max_sets, max_sets));
        self.created_pools.set(self.created_pools.get() + 1);
        Ok(vk::DescriptorPool::from_raw(handle))
    }

    unsafe fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        _: vk::DescriptorSetLayout,
    ) -> Result<vk::DescriptorSet, vk::ErrorCode> {
        self.allocations.set(self.allocations.get() + 1);
        let mut pools = self.pools.borrow_mut();
        match pools.get_mut(&pool.as_raw()) {
            Some((left, _)) if *left > 0 && !self.exhausted => {
                *left -= 1;
                Ok(vk::DescriptorSet::from_raw(self.next()))
            }
            _ => Err(vk::ErrorCode::OUT_OF_POOL_MEMORY),
        }
    }

    unsafe fn reset_pool(&self, pool: vk::DescriptorPool) -> Result<()> {
        self.resets.set(self.resets.get() + 1);
        if let Some((left, capacity)) = self.pools.borrow_mut().get_mut(&pool.as_raw()) {
            *left = *capacity;
        }
        Ok(())
    }

    unsafe fn destroy_pool(&self, pool: vk::DescriptorPool) {
        self.pools.borrow_mut().remove(&pool.as_raw());
        self.destroyed_pools.set(self.destroyed_pools.get() + 1);
    }

    unsafe fn write_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        self.writes
            .borrow_mut()
            .extend(writes.iter().map(|w| RecordedWrite {
                set: w.dst_set.as_raw(),
                binding: w.dst_binding,
                descriptor_type: w.descriptor_type,
                count: w.descriptor_count,
            }));
    }
}
