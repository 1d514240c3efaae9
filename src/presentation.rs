//! Swapchain lifecycle: surface queries, image views, depth buffer, the two
//! render passes and their framebuffers.
//!
//! Every swapchain-dependent object lives in a [`Slot`], so the chain can be
//! torn down and rebuilt on resize or surface loss without tracking bits by
//! hand. `configure` fixes the set of queue families that will touch the
//! images and must run before the first `create`.

use crate::allocator::Allocator;
use crate::context::Context;
use crate::device::QueueIdentifier;
use crate::error::{Result, VulkanError};
use crate::kernel::Kernel;
use crate::physical_device::find_depth_format;
use crate::slot::Slot;
use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::vk;
use log::{debug, info, warn};
use vk_mem::Alloc;

/// Picks how many swapchain images to request.
///
/// Triple buffering is the target; the surface's limits win when they are
/// tighter. A reported maximum of zero means unbounded.
pub fn select_image_count(min_image_count: u32, max_image_count: u32) -> u32 {
    let desired = min_image_count.max(3);
    if max_image_count == 0 {
        desired
    } else {
        desired.min(max_image_count)
    }
}

/// Depth attachment shared by both render passes.
struct DepthBuffer {
    allocator: Allocator,
    device: ash::Device,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
}

impl DepthBuffer {
    fn new(context: &Context, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width: extent.width, height: extent.height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let allocation_create_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let allocator = context.allocator().clone();
        let (image, mut allocation) = unsafe {
            allocator.raw().create_image(&image_create_info, &allocation_create_info)
        }?;

        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if format == vk::Format::D32_SFLOAT_S8_UINT || format == vk::Format::D24_UNORM_S8_UINT {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe {
            context
                .device()
                .create_image_view(&view_create_info, context.allocation_callbacks())
        } {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.raw().destroy_image(image, &mut allocation) };
                return Err(e.into());
            }
        };
        debug!("Depth buffer created: {:?} ({:?}, {}x{}).", image, format, extent.width, extent.height);
        Ok(Self {
            allocator,
            device: context.device().clone(),
            allocation_callbacks: context.allocation_callbacks().copied(),
            image,
            allocation,
            view,
        })
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, self.allocation_callbacks.as_ref());
            self.allocator.raw().destroy_image(self.image, &mut self.allocation);
        }
    }
}

/// Owns the swapchain and everything keyed to its images.
pub struct Presentation {
    device: ash::Device,
    context: Context,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
    physical_device: vk::PhysicalDevice,
    surface_loader: SurfaceLoader,
    surface: vk::SurfaceKHR,
    swapchain_loader: SwapchainLoader,
    sharing_families: Vec<u32>,
    depth_format: vk::Format,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    swapchain: Slot<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    image_views: Slot<Vec<vk::ImageView>>,
    depth: Slot<DepthBuffer>,
    canvas_pass: Slot<vk::RenderPass>,
    overlay_pass: Slot<vk::RenderPass>,
    canvas_framebuffers: Slot<Vec<vk::Framebuffer>>,
    overlay_framebuffers: Slot<Vec<vk::Framebuffer>>,
}

impl Presentation {
    /// Builds an empty presentation layer. Nothing GPU-side is created until
    /// [`configure`] and [`create`] run.
    ///
    /// [`configure`]: Presentation::configure
    /// [`create`]: Presentation::create
    pub fn new(kernel: &Kernel) -> Result<Self> {
        let context = kernel.primary_context()?;
        let instance = kernel.instance();
        let swapchain_loader = SwapchainLoader::new(instance.raw(), kernel.device().raw());
        let depth_format = find_depth_format(
            instance.raw(),
            kernel.physical_device_info().physical_device,
        )?;
        Ok(Self {
            device: kernel.device().raw().clone(),
            context,
            allocation_callbacks: instance.allocation_callbacks().copied(),
            physical_device: kernel.physical_device_info().physical_device,
            surface_loader: kernel.surface_loader().clone(),
            surface: kernel.surface(),
            swapchain_loader,
            sharing_families: Vec::new(),
            depth_format,
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            swapchain: Slot::Absent,
            images: Vec::new(),
            image_views: Slot::Absent,
            depth: Slot::Absent,
            canvas_pass: Slot::Absent,
            overlay_pass: Slot::Absent,
            canvas_framebuffers: Slot::Absent,
            overlay_framebuffers: Slot::Absent,
        })
    }

    /// Declares the queues that will access the swapchain images. Must be
    /// called before [`create`]; the family set decides exclusive versus
    /// concurrent sharing.
    ///
    /// [`create`]: Presentation::create
    pub fn configure(&mut self, queues: &[QueueIdentifier]) -> Result<()> {
        if self.swapchain.is_present() {
            return Err(VulkanError::InvalidState(
                "presentation must be configured before the swapchain is created".to_string(),
            ));
        }
        if queues.is_empty() {
            return Err(VulkanError::InvalidState(
                "at least one queue must access the swapchain".to_string(),
            ));
        }
        let mut families: Vec<u32> = queues.iter().map(|q| q.family_index).collect();
        families.sort_unstable();
        families.dedup();
        debug!("Presentation configured for queue families {:?}.", families);
        self.sharing_families = families;
        Ok(())
    }

    /// Creates the swapchain and the full chain of dependent objects.
    pub fn create(&mut self, width: u32, height: u32) -> Result<()> {
        if self.sharing_families.is_empty() {
            return Err(VulkanError::InvalidState(
                "configure() must run before create()".to_string(),
            ));
        }

        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.physical_device, self.surface)
        }?;

        let surface_format = formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_UNORM
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first().copied())
            .ok_or_else(|| {
                VulkanError::UnsupportedFormat("surface reports no formats".to_string())
            })?;

        let present_mode = if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        let image_count =
            select_image_count(capabilities.min_image_count, capabilities.max_image_count);

        let mut swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        swapchain_create_info = if self.sharing_families.len() > 1 {
            swapchain_create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&self.sharing_families)
        } else {
            swapchain_create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe {
            self.swapchain_loader
                .create_swapchain(&swapchain_create_info, self.allocation_callbacks.as_ref())
        }?;
        self.swapchain.install(swapchain, "swapchain")?;
        self.surface_format = surface_format;
        self.extent = extent;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }?;
        info!(
            "Swapchain created: {} images, {:?}, {:?}, {}x{}.",
            self.images.len(),
            surface_format.format,
            present_mode,
            extent.width,
            extent.height
        );

        let mut views = Vec::with_capacity(self.images.len());
        for &image in &self.images {
            let view_create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe {
                self.device
                    .create_image_view(&view_create_info, self.allocation_callbacks.as_ref())
            }?;
            views.push(view);
        }
        self.image_views.install(views, "swapchain image views")?;

        let depth = DepthBuffer::new(&self.context, extent, self.depth_format)?;
        self.depth.install(depth, "depth buffer")?;

        let canvas_pass = self.create_canvas_pass(surface_format.format)?;
        self.canvas_pass.install(canvas_pass, "canvas render pass")?;
        let overlay_pass = self.create_overlay_pass(surface_format.format)?;
        self.overlay_pass.install(overlay_pass, "overlay render pass")?;

        let canvas_framebuffers = self.create_framebuffers(canvas_pass)?;
        self.canvas_framebuffers.install(canvas_framebuffers, "canvas framebuffers")?;
        let overlay_framebuffers = self.create_framebuffers(overlay_pass)?;
        self.overlay_framebuffers.install(overlay_framebuffers, "overlay framebuffers")?;

        Ok(())
    }

    /// Render pass that clears color and depth and hands the image to the
    /// present engine.
    fn create_canvas_pass(&self, format: vk::Format) -> Result<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
            vk::AttachmentDescription::builder()
                .format(self.depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];
        self.create_render_pass(&attachments, vk::AccessFlags::empty(), "canvas")
    }

    /// Render pass that loads the canvas output and composites on top of it.
    fn create_overlay_pass(&self, format: vk::Format) -> Result<vk::RenderPass> {
        let attachments = [
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::LOAD)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .build(),
            vk::AttachmentDescription::builder()
                .format(self.depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build(),
        ];
        self.create_render_pass(&attachments, vk::AccessFlags::COLOR_ATTACHMENT_WRITE, "overlay")
    }

    fn create_render_pass(
        &self,
        attachments: &[vk::AttachmentDescription],
        src_access: vk::AccessFlags,
        label: &str,
    ) -> Result<vk::RenderPass> {
        let color_ref = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_ref)
            .depth_stencil_attachment(&depth_ref);

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(src_access)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass.build()];
        let dependencies = [dependency.build()];
        let render_pass_create_info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe {
            self.device
                .create_render_pass(&render_pass_create_info, self.allocation_callbacks.as_ref())
        }?;
        debug!("Render pass created ({}): {:?}.", label, render_pass);
        Ok(render_pass)
    }

    fn create_framebuffers(&self, render_pass: vk::RenderPass) -> Result<Vec<vk::Framebuffer>> {
        let views = self.image_views.get("swapchain image views")?;
        let depth_view = self.depth.get("depth buffer")?.view;
        let mut framebuffers = Vec::with_capacity(views.len());
        for &view in views {
            let attachments = [view, depth_view];
            let framebuffer_create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            let framebuffer = unsafe {
                self.device
                    .create_framebuffer(&framebuffer_create_info, self.allocation_callbacks.as_ref())
            }?;
            framebuffers.push(framebuffer);
        }
        Ok(framebuffers)
    }

    /// Tears down every swapchain-dependent object. Absent slots are skipped,
    /// so a partially built or already destroyed chain is fine.
    pub fn destroy_chain(&mut self) {
        unsafe {
            if let Some(framebuffers) = self.overlay_framebuffers.take() {
                for fb in framebuffers {
                    self.device.destroy_framebuffer(fb, self.allocation_callbacks.as_ref());
                }
            }
            if let Some(framebuffers) = self.canvas_framebuffers.take() {
                for fb in framebuffers {
                    self.device.destroy_framebuffer(fb, self.allocation_callbacks.as_ref());
                }
            }
            if let Some(pass) = self.overlay_pass.take() {
                self.device.destroy_render_pass(pass, self.allocation_callbacks.as_ref());
            }
            if let Some(pass) = self.canvas_pass.take() {
                self.device.destroy_render_pass(pass, self.allocation_callbacks.as_ref());
            }
            drop(self.depth.take());
            if let Some(views) = self.image_views.take() {
                for view in views {
                    self.device.destroy_image_view(view, self.allocation_callbacks.as_ref());
                }
            }
            self.images.clear();
            if let Some(swapchain) = self.swapchain.take() {
                self.swapchain_loader
                    .destroy_swapchain(swapchain, self.allocation_callbacks.as_ref());
                info!("Swapchain destroyed.");
            }
        }
    }

    /// Rebuilds the swapchain chain after a resize or out-of-date result.
    /// Waits for the device to go idle first, so in-flight frames drain.
    pub fn refresh(&mut self, width: u32, height: u32) -> Result<()> {
        info!("Refreshing presentation chain ({}x{} requested).", width, height);
        self.context.device_wait_idle()?;
        self.destroy_chain();
        self.create(width, height)
    }

    /// Acquires the next swapchain image, signalling `semaphore` when it is
    /// ready. Out-of-date and lost-surface conditions surface as their
    /// dedicated error variants; a suboptimal acquire still returns the index.
    pub fn next_image(&self, semaphore: vk::Semaphore) -> Result<u32> {
        let swapchain = *self.swapchain.get("swapchain")?;
        let (index, suboptimal) = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        }?;
        if suboptimal {
            warn!("Swapchain image {} acquired but suboptimal.", index);
        }
        Ok(index)
    }

    /// Queues the image for presentation after `wait_semaphore` signals.
    /// A suboptimal present is reported as out-of-date so the caller refreshes.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<()> {
        let swapchains = [*self.swapchain.get("swapchain")?];
        let wait_semaphores = [wait_semaphore];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let suboptimal =
            unsafe { self.swapchain_loader.queue_present(queue, &present_info) }?;
        if suboptimal {
            return Err(VulkanError::SwapchainOutOfDate);
        }
        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn canvas_render_pass(&self) -> Result<vk::RenderPass> {
        self.canvas_pass.get("canvas render pass").map(|p| *p)
    }

    pub fn overlay_render_pass(&self) -> Result<vk::RenderPass> {
        self.overlay_pass.get("overlay render pass").map(|p| *p)
    }

    pub fn canvas_framebuffers(&self) -> Result<&[vk::Framebuffer]> {
        self.canvas_framebuffers.get("canvas framebuffers").map(|f| f.as_slice())
    }

    pub fn overlay_framebuffers(&self) -> Result<&[vk::Framebuffer]> {
        self.overlay_framebuffers.get("overlay framebuffers").map(|f| f.as_slice())
    }
}

impl Drop for Presentation {
    fn drop(&mut self) {
        self.destroy_chain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_count_targets_triple_buffering() {
        assert_eq!(select_image_count(2, 4), 3);
    }

    #[test]
    fn image_count_respects_unbounded_maximum() {
        assert_eq!(select_image_count(2, 0), 3);
    }

    #[test]
    fn image_count_is_clamped_by_small_maximum() {
        assert_eq!(select_image_count(1, 2), 2);
    }

    #[test]
    fn image_count_honours_large_minimum() {
        assert_eq!(select_image_count(4, 8), 4);
        assert_eq!(select_image_count(5, 0), 5);
    }
}
