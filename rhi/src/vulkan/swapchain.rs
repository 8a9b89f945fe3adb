use anyhow::Result;
use log::*;
use std::sync::Arc;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSwapchainExtension};

use super::command_buffer::{VulkanCommandBuffer, VulkanCommandPool};
use super::constants;
use super::context::VulkanContext;
use super::framebuffer::VulkanFramebuffer;
use super::image::VulkanImage;
use super::pipeline::VulkanPipeline;
use super::render_pass::VulkanRenderPass;
use super::surface::{choose_composite_alpha, VulkanSurface};
use super::sync::{VulkanFence, VulkanSemaphore};
use crate::window::PresentationWindow;

/// Uses the surface's current extent unless it is the "undefined" sentinel, in which case
/// the window size is clamped into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    (width, height): (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// The extent a recreation should build, or `None` when the window has no drawable area.
/// A zero sized window is rejected before clamping, since clamping would raise it to the
/// surface minimum.
pub fn plan_recreate(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: (u32, u32),
) -> Option<vk::Extent2D> {
    if window_size.0 == 0 || window_size.1 == 0 {
        return None;
    }
    let extent = choose_extent(capabilities, window_size);
    (extent.width != 0 && extent.height != 0).then_some(extent)
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PresentModeControl {
    current: vk::PresentModeKHR,
    optimal: vk::PresentModeKHR,
}

impl PresentModeControl {
    pub fn new(optimal: vk::PresentModeKHR, vsync: bool) -> Self {
        let current = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            optimal
        };
        Self { current, optimal }
    }

    pub fn current(&self) -> vk::PresentModeKHR {
        self.current
    }

    pub fn vsync(&self) -> bool {
        self.current == vk::PresentModeKHR::FIFO
    }

    pub fn request_vsync(&mut self, vsync: bool) -> bool {
        let requested = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            self.optimal
        };
        if requested == self.current {
            return false;
        }
        self.current = requested;
        true
    }

    pub fn apply_vsync(&mut self, vsync: bool, lifecycle: &SwapchainLifecycle) -> VsyncChange {
        if !self.request_vsync(vsync) {
            VsyncChange::Unchanged
        } else if lifecycle.has_native_swapchain() {
            VsyncChange::Rebuild
        } else {
            VsyncChange::ModeOnly
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VsyncChange {
    Unchanged,
    ModeOnly,
    Rebuild,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SwapchainState {
    #[default]
    Uninitialized,
    Created,
    RecreatePending,
    Destroyed,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SwapchainLifecycle {
    state: SwapchainState,
    generation: u64,
}

impl SwapchainLifecycle {
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_native_swapchain(&self) -> bool {
        matches!(
            self.state,
            SwapchainState::Created | SwapchainState::RecreatePending
        )
    }

    pub fn begin_recreate(&mut self, extent: vk::Extent2D) -> bool {
        if extent.width == 0 || extent.height == 0 {
            return false;
        }
        self.state = SwapchainState::RecreatePending;
        true
    }

    pub fn created(&mut self) {
        self.state = SwapchainState::Created;
        self.generation += 1;
    }

    pub fn destroyed(&mut self) {
        self.state = SwapchainState::Destroyed;
    }
}

#[derive(Debug)]
pub struct VulkanSwapchain {
    window: Arc<dyn PresentationWindow>,
    surface: VulkanSurface,
    swapchain: vk::SwapchainKHR,
    old_swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    image_count: u32,
    current_image: u32,
    frame_acquired: bool,
    present_mode: PresentModeControl,
    lifecycle: SwapchainLifecycle,
    command_pool: VulkanCommandPool,
    command_buffer: Option<VulkanCommandBuffer>,
    render_pass: VulkanRenderPass,
    pipeline: VulkanPipeline,
    wait_fence: VulkanFence,
    present_complete: VulkanSemaphore,
    render_complete: VulkanSemaphore,
}

impl VulkanSwapchain {
    pub unsafe fn new(
        context: VulkanContext,
        window: Arc<dyn PresentationWindow>,
        surface: VulkanSurface,
        vsync: bool,
    ) -> Result<VulkanSwapchain> {
        let device = context.device;
        let format = surface.optimal_format();
        let present_mode = PresentModeControl::new(surface.optimal_present_mode(), vsync);

        let wait_fence = VulkanFence::new(device, true)?;
        let present_complete = VulkanSemaphore::new(device)?;
        let render_complete = VulkanSemaphore::new(device)?;

        let command_pool = VulkanCommandPool::new(device, device.queue_roles().graphics)?;
        let render_pass = VulkanRenderPass::new(device, format.format)?;
        let pipeline = VulkanPipeline::new(render_pass.handle());

        let mut swapchain = VulkanSwapchain {
            window,
            surface,
            swapchain: vk::SwapchainKHR::null(),
            old_swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format,
            extent: vk::Extent2D::default(),
            image_count: 0,
            current_image: 0,
            frame_acquired: false,
            present_mode,
            lifecycle: SwapchainLifecycle::default(),
            command_pool,
            command_buffer: None,
            render_pass,
            pipeline,
            wait_fence,
            present_complete,
            render_complete,
        };

        swapchain.create(context)?;

        Ok(swapchain)
    }

    unsafe fn create(&mut self, context: VulkanContext) -> Result<()> {
        let device = context.device;
        let capabilities = self.surface.refresh_capabilities(context.instance)?;

        self.extent = choose_extent(&capabilities, self.window.framebuffer_size());
        self.image_count = choose_image_count(&capabilities);

        let roles = device.queue_roles();
        let queue_family_indices = [roles.graphics, roles.present];
        let (sharing_mode, queue_family_indices) = if roles.graphics != roles.present {
            (vk::SharingMode::CONCURRENT, &queue_family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface.handle())
            .min_image_count(self.image_count)
            .image_format(self.format.format)
            .image_color_space(self.format.color_space)
            .image_extent(self.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(choose_composite_alpha(
                capabilities.supported_composite_alpha,
            ))
            .present_mode(self.present_mode.current())
            .clipped(true)
            .old_swapchain(self.old_swapchain);

        self.swapchain = device.vk_device.create_swapchain_khr(&info, None)?;

        if !self.old_swapchain.is_null() {
            device
                .vk_device
                .destroy_swapchain_khr(self.old_swapchain, None);
            self.old_swapchain = vk::SwapchainKHR::null();
        }

        self.images = device.vk_device.get_swapchain_images_khr(self.swapchain)?;
        self.image_views = VulkanImage::create_views(device, &self.images, self.format.format)?;
        self.framebuffers = VulkanFramebuffer::create(
            device,
            self.render_pass.handle(),
            &self.image_views,
            self.extent,
        )?;

        if self.command_buffer.is_none() {
            self.command_buffer = Some(self.command_pool.allocate_command_buffer(device)?);
        }

        self.lifecycle.created();
        info!(
            "Created swapchain #{} ({}x{}, {} images, {:?}).",
            self.lifecycle.generation(),
            self.extent.width,
            self.extent.height,
            self.images.len(),
            self.present_mode.current()
        );

        Ok(())
    }

    /// Rebuilds the chain for the current window size. Returns `false` without touching
    /// anything when the window has no drawable area.
    pub unsafe fn recreate(&mut self, context: VulkanContext) -> Result<bool> {
        let device = context.device;
        let capabilities = self.surface.refresh_capabilities(context.instance)?;

        let planned = plan_recreate(&capabilities, self.window.framebuffer_size());
        let Some(extent) = planned.filter(|&extent| self.lifecycle.begin_recreate(extent)) else {
            debug!("Skipping swapchain recreation for a zero sized window.");
            return Ok(false);
        };
        debug!("Recreating swapchain at {}x{}.", extent.width, extent.height);

        device.wait_idle()?;

        if let Some(command_buffer) = self.command_buffer.take() {
            self.command_pool.free_command_buffer(device, command_buffer);
        }
        VulkanFramebuffer::destroy(device, &mut self.framebuffers);
        VulkanImage::destroy_views(device, &mut self.image_views);
        self.images.clear();

        self.old_swapchain = self.swapchain;
        self.swapchain = vk::SwapchainKHR::null();
        self.frame_acquired = false;

        self.wait_fence.destroy(device);
        self.present_complete.destroy(device);
        self.render_complete.destroy(device);
        self.wait_fence = VulkanFence::new(device, true)?;
        self.present_complete = VulkanSemaphore::new(device)?;
        self.render_complete = VulkanSemaphore::new(device)?;

        self.create(context)?;

        Ok(true)
    }

    pub unsafe fn set_vsync(&mut self, context: VulkanContext, vsync: bool) -> Result<()> {
        let change = self.present_mode.apply_vsync(vsync, &self.lifecycle);
        if change == VsyncChange::Unchanged {
            return Ok(());
        }

        info!("Vsync {}.", if vsync { "enabled" } else { "disabled" });

        if change == VsyncChange::Rebuild {
            self.rebuild(context)?;
        }

        Ok(())
    }

    pub unsafe fn rebuild(&mut self, context: VulkanContext) -> Result<()> {
        self.end_graphic_command_buffer_and_render_pass(context)?;
        if self.recreate(context)? {
            self.prepare_next_frame(context)?;
            self.start_graphic_command_buffer_and_render_pass(context)?;
        }
        Ok(())
    }

    pub unsafe fn prepare_next_frame(&mut self, context: VulkanContext) -> Result<bool> {
        loop {
            match self.acquire_next_image(context) {
                Ok((index, vk::SuccessCode::SUBOPTIMAL_KHR)) => {
                    debug!("Acquired image {} is suboptimal, recreating.", index);
                }
                Ok((index, _)) => {
                    self.current_image = index;
                    self.frame_acquired = true;
                    break;
                }
                Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                    debug!("Swapchain out of date, recreating.");
                }
                Err(error) => return Err(error.into()),
            }

            if !self.recreate(context)? {
                return Ok(false);
            }
        }

        self.wait_fence.wait(context.device)?;
        self.wait_fence.reset(context.device)?;

        Ok(true)
    }

    pub unsafe fn acquire_next_image(
        &self,
        context: VulkanContext,
    ) -> Result<(u32, vk::SuccessCode), vk::ErrorCode> {
        context.device.vk_device.acquire_next_image_khr(
            self.swapchain,
            constants::INFINITE_TIMEOUT,
            self.present_complete.handle(),
            vk::Fence::null(),
        )
    }

    pub unsafe fn start_graphic_command_buffer_and_render_pass(
        &mut self,
        context: VulkanContext,
    ) -> Result<()> {
        if !self.frame_acquired {
            return Ok(());
        }
        let Some(command_buffer) = self.command_buffer.as_mut() else {
            return Ok(());
        };
        let Some(&framebuffer) = self.framebuffers.get(self.current_image as usize) else {
            return Ok(());
        };

        command_buffer.start_recording(context.device)?;
        self.render_pass
            .start_render_pass(context.device, command_buffer, framebuffer, self.extent);
        command_buffer.set_viewport_and_scissor(context.device, self.extent);

        Ok(())
    }

    pub unsafe fn end_graphic_command_buffer_and_render_pass(
        &mut self,
        context: VulkanContext,
    ) -> Result<()> {
        let Some(command_buffer) = self.command_buffer.as_mut() else {
            return Ok(());
        };

        self.render_pass.end_render_pass(context.device, command_buffer);
        command_buffer.end_recording(context.device)?;

        Ok(())
    }

    pub unsafe fn submit(&mut self, context: VulkanContext) -> Result<()> {
        let Some(command_buffer) = self.command_buffer.as_ref() else {
            return Ok(());
        };

        let wait_semaphores = &[self.present_complete.handle()];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[command_buffer.handle()];
        let signal_semaphores = &[self.render_complete.handle()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        context.device.vk_device.queue_submit(
            context.device.queues().graphics,
            &[submit_info],
            self.wait_fence.handle(),
        )?;

        Ok(())
    }

    pub unsafe fn queue_present(&mut self, context: VulkanContext) -> Result<()> {
        let wait_semaphores = &[self.render_complete.handle()];
        let swapchains = &[self.swapchain];
        let image_indices = &[self.current_image];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = context
            .device
            .vk_device
            .queue_present_khr(context.device.queues().present, &present_info);
        self.frame_acquired = false;

        match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                debug!("Swapchain changed during present, recreating.");
                self.recreate(context)?;
            }
            Ok(_) => {}
            Err(error) => return Err(error.into()),
        }

        Ok(())
    }

    pub unsafe fn flip(&mut self, context: VulkanContext) -> Result<()> {
        if self.frame_acquired {
            self.end_graphic_command_buffer_and_render_pass(context)?;
            self.submit(context)?;
            self.queue_present(context)?;
        }

        if self.prepare_next_frame(context)? {
            self.start_graphic_command_buffer_and_render_pass(context)?;
        }

        Ok(())
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn current_image(&self) -> u32 {
        self.current_image
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode.current()
    }

    pub fn vsync(&self) -> bool {
        self.present_mode.vsync()
    }

    pub fn lifecycle(&self) -> &SwapchainLifecycle {
        &self.lifecycle
    }

    pub fn surface(&self) -> &VulkanSurface {
        &self.surface
    }

    pub fn command_buffer_mut(&mut self) -> Option<&mut VulkanCommandBuffer> {
        self.command_buffer.as_mut()
    }

    pub fn render_pass(&self) -> &VulkanRenderPass {
        &self.render_pass
    }

    pub fn render_pass_mut(&mut self) -> &mut VulkanRenderPass {
        &mut self.render_pass
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.render_pass.set_clear_color(clear_color);
    }

    pub fn pipeline(&self) -> &VulkanPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut VulkanPipeline {
        &mut self.pipeline
    }

    pub unsafe fn destroy(&mut self, context: VulkanContext) {
        let device = context.device;

        if let Some(command_buffer) = self.command_buffer.take() {
            self.command_pool.free_command_buffer(device, command_buffer);
        }
        VulkanFramebuffer::destroy(device, &mut self.framebuffers);
        VulkanImage::destroy_views(device, &mut self.image_views);
        device.vk_device.destroy_swapchain_khr(self.swapchain, None);
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();

        self.wait_fence.destroy(device);
        self.present_complete.destroy(device);
        self.render_complete.destroy(device);
        self.command_pool.destroy(device);
        self.pipeline.destroy(device);
        self.render_pass.destroy(device);
        self.surface.destroy(context.instance);

        self.lifecycle.destroyed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        }
    }

    #[test]
    fn extent_prefers_current_extent() {
        let extent = choose_extent(&capabilities((1280, 720)), (800, 600));
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn undefined_extent_clamps_window_size() {
        let caps = capabilities((u32::MAX, u32::MAX));

        let extent = choose_extent(&caps, (8000, 600));
        assert_eq!((extent.width, extent.height), (4096, 600));

        let extent = choose_extent(&caps, (0, 0));
        assert_eq!((extent.width, extent.height), (1, 1));
    }

    #[test]
    fn minimized_window_is_never_rebuilt() {
        let undefined = capabilities((u32::MAX, u32::MAX));
        assert_eq!(plan_recreate(&undefined, (0, 0)), None);
        assert_eq!(plan_recreate(&undefined, (1024, 0)), None);

        let minimized = capabilities((0, 0));
        assert_eq!(plan_recreate(&minimized, (0, 0)), None);
        assert_eq!(plan_recreate(&minimized, (800, 600)), None);

        let mut lifecycle = SwapchainLifecycle::default();
        lifecycle.created();
        let before = lifecycle;
        let planned = plan_recreate(&undefined, (0, 0)).filter(|&e| lifecycle.begin_recreate(e));
        assert!(planned.is_none());
        assert_eq!(lifecycle, before);

        assert_eq!(
            plan_recreate(&undefined, (800, 600)),
            Some(vk::Extent2D {
                width: 800,
                height: 600
            })
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let mut caps = capabilities((800, 600));
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn vsync_toggles_between_fifo_and_optimal() {
        let mut control = PresentModeControl::new(vk::PresentModeKHR::MAILBOX, false);
        assert_eq!(control.current(), vk::PresentModeKHR::MAILBOX);

        assert!(control.request_vsync(true));
        assert!(!control.request_vsync(true));
        assert_eq!(control.current(), vk::PresentModeKHR::FIFO);
        assert!(control.vsync());

        assert!(control.request_vsync(false));
        assert_eq!(control.current(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn vsync_off_is_a_no_op_without_mailbox() {
        let mut control = PresentModeControl::new(vk::PresentModeKHR::FIFO, true);
        assert!(!control.request_vsync(false));
        assert!(control.vsync());
        assert!(!control.request_vsync(true));
    }

    #[test]
    fn enabling_vsync_twice_rebuilds_once() {
        let mut control = PresentModeControl::new(vk::PresentModeKHR::MAILBOX, false);
        let mut lifecycle = SwapchainLifecycle::default();
        lifecycle.created();

        let mut mode_changes = 0;
        let mut rebuilds = 0;
        for _ in 0..2 {
            let before = control.current();
            if control.apply_vsync(true, &lifecycle) == VsyncChange::Rebuild {
                assert!(lifecycle.begin_recreate(vk::Extent2D {
                    width: 800,
                    height: 600
                }));
                lifecycle.created();
                rebuilds += 1;
            }
            if control.current() != before {
                mode_changes += 1;
            }
        }

        assert_eq!(mode_changes, 1);
        assert_eq!(rebuilds, 1);
        assert_eq!(lifecycle.generation(), 2);
        assert_eq!(control.current(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn vsync_before_creation_only_switches_mode() {
        let mut control = PresentModeControl::new(vk::PresentModeKHR::MAILBOX, false);
        let lifecycle = SwapchainLifecycle::default();

        assert_eq!(control.apply_vsync(true, &lifecycle), VsyncChange::ModeOnly);
        assert_eq!(control.apply_vsync(true, &lifecycle), VsyncChange::Unchanged);
    }

    #[test]
    fn zero_extent_leaves_lifecycle_untouched() {
        let mut lifecycle = SwapchainLifecycle::default();
        lifecycle.created();
        let before = lifecycle;

        assert!(!lifecycle.begin_recreate(vk::Extent2D {
            width: 0,
            height: 0
        }));
        assert!(!lifecycle.begin_recreate(vk::Extent2D {
            width: 1024,
            height: 0
        }));
        assert_eq!(lifecycle, before);
        assert_eq!(lifecycle.state(), SwapchainState::Created);
    }

    #[test]
    fn recreation_cycles_through_pending() {
        let mut lifecycle = SwapchainLifecycle::default();
        assert_eq!(lifecycle.state(), SwapchainState::Uninitialized);
        assert!(!lifecycle.has_native_swapchain());

        lifecycle.created();
        assert!(lifecycle.begin_recreate(vk::Extent2D {
            width: 640,
            height: 480
        }));
        assert_eq!(lifecycle.state(), SwapchainState::RecreatePending);
        lifecycle.created();
        assert_eq!(lifecycle.generation(), 2);

        lifecycle.destroyed();
        assert_eq!(lifecycle.state(), SwapchainState::Destroyed);
    }
}
