//! Image resources: compute-written storage images and sampled textures.

use crate::allocator::Allocator;
use crate::buffer::DeviceBuffer;
use crate::context::Context;
use crate::error::{Result, VulkanError};
use ash::vk;
use log::{debug, trace};
use vk_mem::Alloc;

/// An image with its allocation, view and optional sampler.
///
/// Storage images are transitioned to `GENERAL` at creation and stay there;
/// sampled textures are uploaded once and transitioned to
/// `SHADER_READ_ONLY_OPTIMAL`.
pub struct Texture {
    allocator: Allocator,
    device: ash::Device,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    sampler: Option<vk::Sampler>,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl Texture {
    /// Creates a storage image for compute output, usable as a sampled source
    /// by later passes, and transitions it to `GENERAL`.
    pub fn new_storage_image(
        context: &Context,
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<Self> {
        let texture = Self::create_image(
            context,
            width,
            height,
            format,
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
        )?;

        let device = context.device().clone();
        let image = texture.image;
        context.run_one_time_commands(|cmd| {
            transition_layout(
                &device,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COMPUTE_SHADER,
            );
        })?;
        debug!("Storage image created: {:?} ({}x{}, {:?}).", image, width, height, format);
        Ok(texture)
    }

    /// Creates a sampled RGBA8 texture filled from `pixels` and leaves it in
    /// `SHADER_READ_ONLY_OPTIMAL`. Used for the overlay font atlas.
    pub fn new_sampled_rgba(
        context: &Context,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VulkanError::ResourceCreationError {
                resource_type: "Texture".to_string(),
                message: format!(
                    "pixel data is {} bytes, expected {} for {}x{} RGBA",
                    pixels.len(),
                    expected,
                    width,
                    height
                ),
            });
        }

        let mut texture = Self::create_image(
            context,
            width,
            height,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;

        let staging = DeviceBuffer::new_host_mapped(
            context,
            pixels.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        staging.write(0, pixels)?;

        let device = context.device().clone();
        let image = texture.image;
        let staging_buffer = staging.raw();
        context.run_one_time_commands(|cmd| {
            transition_layout(
                &device,
                cmd,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            );
            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_offset(vk::Offset3D::default())
                .image_extent(vk::Extent3D { width, height, depth: 1 });
            unsafe {
                device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region.build()],
                );
            }
            transition_layout(
                &device,
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
        })?;

        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(-1000.0)
            .max_lod(1000.0);
        let sampler = unsafe {
            context
                .device()
                .create_sampler(&sampler_create_info, context.allocation_callbacks())
        }?;
        texture.sampler = Some(sampler);
        debug!("Sampled texture created: {:?} ({}x{}).", image, width, height);
        Ok(texture)
    }

    fn create_image(
        context: &Context,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let image_create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
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

        let view_create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
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

        Ok(Self {
            allocator,
            device: context.device().clone(),
            allocation_callbacks: context.allocation_callbacks().copied(),
            image,
            allocation,
            view,
            sampler: None,
            extent: vk::Extent2D { width, height },
            format,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            if let Some(sampler) = self.sampler.take() {
                self.device.destroy_sampler(sampler, self.allocation_callbacks.as_ref());
            }
            self.device.destroy_image_view(self.view, self.allocation_callbacks.as_ref());
            self.allocator.raw().destroy_image(self.image, &mut self.allocation);
        }
        trace!("Texture {:?} destroyed.", self.image);
    }
}

/// Records a full-image layout transition barrier.
pub fn transition_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}
