//! Immediate-mode overlay compositing.
//!
//! The caller hands in a draw list every frame: interleaved vertices, 16-bit
//! indices and a run of draw commands, each with a clip rectangle and a
//! texture reference. Vertex and index buffers are host-mapped and replaced
//! whenever the element count changes; the command buffer for the acquired
//! image is re-recorded every frame. Coordinates are in pixels; a push
//! constant holding scale and translate maps them to clip space.

use crate::buffer::DeviceBuffer;
use crate::context::Context;
use crate::error::{Result, VulkanError};
use crate::presentation::Presentation;
use crate::shader::create_shader_module;
use crate::slot::Slot;
use crate::texture::Texture;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use log::{debug, info, trace};
use std::ffi::CString;
use std::mem;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OverlayVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
    pub color: [u8; 4],
}

/// What a draw command samples from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayTexture {
    FontAtlas,
    User(u32),
}

#[derive(Debug, Clone)]
pub struct DrawCommand {
    /// Clip rectangle in framebuffer pixels: left, top, right, bottom.
    pub clip_rect: [f32; 4],
    pub texture: OverlayTexture,
    pub index_count: u32,
    pub index_offset: u32,
    pub vertex_offset: i32,
}

#[derive(Debug, Clone, Default)]
pub struct DrawList {
    pub vertices: Vec<OverlayVertex>,
    pub indices: Vec<u16>,
    pub commands: Vec<DrawCommand>,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct OverlayPushConstants {
    scale: [f32; 2],
    translate: [f32; 2],
}

/// Buffers are replaced on any count change, shrink included, so the
/// allocation always matches the draw list exactly.
pub fn buffers_need_replacement(
    allocated_vertices: usize,
    allocated_indices: usize,
    vertices: usize,
    indices: usize,
) -> bool {
    allocated_vertices != vertices || allocated_indices != indices
}

/// Clamps a clip rectangle to the framebuffer. `None` means the command is
/// fully clipped and should be skipped.
pub fn clip_scissor(clip_rect: [f32; 4], fb_width: u32, fb_height: u32) -> Option<vk::Rect2D> {
    let left = clip_rect[0].max(0.0);
    let top = clip_rect[1].max(0.0);
    let right = clip_rect[2].min(fb_width as f32);
    let bottom = clip_rect[3].min(fb_height as f32);
    if right <= left || bottom <= top {
        return None;
    }
    Some(vk::Rect2D {
        offset: vk::Offset2D { x: left as i32, y: top as i32 },
        extent: vk::Extent2D {
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        },
    })
}

/// Swapchain-dependent objects.
struct Layer {
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,
}

pub struct Overlay {
    context: Context,
    vertex_shader: Vec<u32>,
    fragment_shader: Vec<u32>,
    font_atlas: Texture,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    atlas_set: vk::DescriptorSet,
    user_sets: Vec<vk::DescriptorSet>,
    command_pool: vk::CommandPool,
    layer: Slot<Layer>,
    vertex_buffer: Slot<DeviceBuffer>,
    index_buffer: Slot<DeviceBuffer>,
    allocated_vertices: usize,
    allocated_indices: usize,
}

const MAX_USER_TEXTURES: u32 = 63;

impl Overlay {
    /// Creates the device-level pieces: font atlas, descriptor plumbing and a
    /// slot for user textures. The pipeline is built by [`create`] once the
    /// presentation chain exists.
    ///
    /// [`create`]: Overlay::create
    pub fn new(
        context: Context,
        vertex_shader: Vec<u32>,
        fragment_shader: Vec<u32>,
        atlas_width: u32,
        atlas_height: u32,
        atlas_pixels: &[u8],
    ) -> Result<Self> {
        let font_atlas =
            Texture::new_sampled_rgba(&context, atlas_width, atlas_height, atlas_pixels)?;

        let device = context.device();
        let allocation_callbacks = context.allocation_callbacks();

        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let layout_create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let descriptor_set_layout = unsafe {
            device.create_descriptor_set_layout(&layout_create_info, allocation_callbacks)
        }?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1 + MAX_USER_TEXTURES,
        }];
        let pool_create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1 + MAX_USER_TEXTURES);
        let descriptor_pool =
            unsafe { device.create_descriptor_pool(&pool_create_info, allocation_callbacks) }?;

        let set_layouts = [descriptor_set_layout];
        let set_allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let atlas_set = unsafe { device.allocate_descriptor_sets(&set_allocate_info) }?[0];

        let sampler = font_atlas.sampler().ok_or_else(|| {
            VulkanError::InvalidState("font atlas texture has no sampler".to_string())
        })?;
        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: font_atlas.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(atlas_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build()];
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        // The overlay re-records the acquired image's command buffer every
        // frame; it owns its command pool.
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&pool_create_info, allocation_callbacks) }?;

        info!("Overlay created with a {}x{} font atlas.", atlas_width, atlas_height);
        Ok(Self {
            context,
            vertex_shader,
            fragment_shader,
            font_atlas,
            descriptor_set_layout,
            descriptor_pool,
            atlas_set,
            user_sets: Vec::new(),
            command_pool,
            layer: Slot::Absent,
            vertex_buffer: Slot::Absent,
            index_buffer: Slot::Absent,
            allocated_vertices: 0,
            allocated_indices: 0,
        })
    }

    /// Registers a sampled texture for use in draw commands. The texture must
    /// outlive the overlay; the returned handle refers to it in
    /// [`DrawCommand::texture`].
    pub fn register_texture(&mut self, texture: &Texture) -> Result<OverlayTexture> {
        if self.user_sets.len() as u32 >= MAX_USER_TEXTURES {
            return Err(VulkanError::InvalidState(format!(
                "overlay texture registry is full ({} entries)",
                MAX_USER_TEXTURES
            )));
        }
        let sampler = texture.sampler().ok_or_else(|| {
            VulkanError::InvalidState("overlay textures must carry a sampler".to_string())
        })?;

        let device = self.context.device();
        let set_layouts = [self.descriptor_set_layout];
        let set_allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { device.allocate_descriptor_sets(&set_allocate_info) }?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler,
            image_view: texture.view(),
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build()];
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        let id = self.user_sets.len() as u32;
        self.user_sets.push(set);
        debug!("Overlay texture {} registered.", id);
        Ok(OverlayTexture::User(id))
    }

    /// Builds the pipeline against the overlay render pass and allocates one
    /// command buffer per swapchain image.
    pub fn create(&mut self, presentation: &Presentation) -> Result<()> {
        let render_pass = presentation.overlay_render_pass()?;
        let pipeline_layout = self.create_pipeline_layout()?;
        let pipeline = match self.create_pipeline(pipeline_layout, render_pass) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    self.context.device().destroy_pipeline_layout(
                        pipeline_layout,
                        self.context.allocation_callbacks(),
                    );
                }
                return Err(e);
            }
        };

        let framebuffers = presentation.overlay_framebuffers()?.to_vec();
        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);
        let command_buffers = unsafe {
            self.context.device().allocate_command_buffers(&command_buffer_allocate_info)
        }?;

        self.layer.install(
            Layer {
                pipeline_layout,
                pipeline,
                render_pass,
                framebuffers,
                command_buffers,
                extent: presentation.extent(),
            },
            "overlay layer",
        )?;
        debug!("Overlay layer created for {} swapchain image(s).", presentation.image_count());
        Ok(())
    }

    fn create_pipeline_layout(&self) -> Result<vk::PipelineLayout> {
        let set_layouts = [self.descriptor_set_layout];
        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: mem::size_of::<OverlayPushConstants>() as u32,
        }];
        let pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout = unsafe {
            self.context.device().create_pipeline_layout(
                &pipeline_layout_create_info,
                self.context.allocation_callbacks(),
            )
        }?;
        Ok(pipeline_layout)
    }

    fn create_pipeline(
        &self,
        pipeline_layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> Result<vk::Pipeline> {
        let device = self.context.device();
        let allocation_callbacks = self.context.allocation_callbacks();

        let vertex_module = create_shader_module(device, &self.vertex_shader, allocation_callbacks)?;
        let fragment_module =
            match create_shader_module(device, &self.fragment_shader, allocation_callbacks) {
                Ok(module) => module,
                Err(e) => {
                    unsafe { device.destroy_shader_module(vertex_module, allocation_callbacks) };
                    return Err(e);
                }
            };
        let entry_point = CString::new("main").map_err(|e| {
            VulkanError::ShaderLoadingError(format!("invalid entry point name: {}", e))
        })?;
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&entry_point)
                .build(),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<OverlayVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 8,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: 16,
            },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state =
            vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false);
        // Standard premultiplied-friendly alpha blending for UI geometry.
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&color_blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);
        let pipeline_result = unsafe {
            device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info.build()],
                allocation_callbacks,
            )
        };
        unsafe {
            device.destroy_shader_module(vertex_module, allocation_callbacks);
            device.destroy_shader_module(fragment_module, allocation_callbacks);
        }
        let pipeline = pipeline_result.map_err(|(_, e)| {
            VulkanError::PipelineCreationError(format!("overlay pipeline: {}", e))
        })?[0];
        Ok(pipeline)
    }

    /// Ensures the vertex and index buffers hold exactly the draw list's
    /// counts, replacing them when the counts changed, then writes the data.
    fn upload_draw_data(&mut self, draw_list: &DrawList) -> Result<()> {
        if buffers_need_replacement(
            self.allocated_vertices,
            self.allocated_indices,
            draw_list.vertices.len(),
            draw_list.indices.len(),
        ) {
            drop(self.vertex_buffer.take());
            drop(self.index_buffer.take());
            if !draw_list.vertices.is_empty() {
                self.vertex_buffer.install(
                    DeviceBuffer::new_host_mapped(
                        &self.context,
                        (draw_list.vertices.len() * mem::size_of::<OverlayVertex>())
                            as vk::DeviceSize,
                        vk::BufferUsageFlags::VERTEX_BUFFER,
                    )?,
                    "overlay vertex buffer",
                )?;
            }
            if !draw_list.indices.is_empty() {
                self.index_buffer.install(
                    DeviceBuffer::new_host_mapped(
                        &self.context,
                        (draw_list.indices.len() * mem::size_of::<u16>()) as vk::DeviceSize,
                        vk::BufferUsageFlags::INDEX_BUFFER,
                    )?,
                    "overlay index buffer",
                )?;
            }
            self.allocated_vertices = draw_list.vertices.len();
            self.allocated_indices = draw_list.indices.len();
            trace!(
                "Overlay buffers replaced: {} vertices, {} indices.",
                self.allocated_vertices,
                self.allocated_indices
            );
        }

        if !draw_list.vertices.is_empty() {
            self.vertex_buffer
                .get("overlay vertex buffer")?
                .write(0, bytemuck::cast_slice(&draw_list.vertices))?;
        }
        if !draw_list.indices.is_empty() {
            self.index_buffer
                .get("overlay index buffer")?
                .write(0, bytemuck::cast_slice(&draw_list.indices))?;
        }
        Ok(())
    }

    fn descriptor_set_for(&self, texture: OverlayTexture) -> Result<vk::DescriptorSet> {
        match texture {
            OverlayTexture::FontAtlas => Ok(self.atlas_set),
            OverlayTexture::User(id) => {
                self.user_sets.get(id as usize).copied().ok_or_else(|| {
                    VulkanError::InvalidState(format!("unknown overlay texture id {}", id))
                })
            }
        }
    }

    /// Uploads the draw list, re-records the command buffer for
    /// `image_index` and submits it, waiting on `wait_semaphore` at color
    /// output and signalling `signal_semaphore`.
    pub fn submit(
        &mut self,
        image_index: u32,
        draw_list: &DrawList,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
    ) -> Result<()> {
        self.upload_draw_data(draw_list)?;
        self.record(image_index, draw_list)?;

        let layer = self.layer.get("overlay layer")?;
        let command_buffers = [layer.command_buffers[image_index as usize]];
        let wait_semaphores = [wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.context.device().queue_submit(
                self.context.queue(),
                &[submit_info.build()],
                vk::Fence::null(),
            )
        }?;
        trace!("Overlay pass submitted for image {}.", image_index);
        Ok(())
    }

    fn record(&self, image_index: u32, draw_list: &DrawList) -> Result<()> {
        let device = self.context.device();
        let layer = self.layer.get("overlay layer")?;
        let command_buffer =
            *layer.command_buffers.get(image_index as usize).ok_or_else(|| {
                VulkanError::InvalidState(format!(
                    "image index {} out of range ({} command buffers)",
                    image_index,
                    layer.command_buffers.len()
                ))
            })?;
        let extent = layer.extent;

        let clear_values = [
            // Color is LOADed; only depth is cleared by this pass.
            vk::ClearValue::default(),
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device.begin_command_buffer(command_buffer, &begin_info)?;
            let render_pass_begin = vk::RenderPassBeginInfo::builder()
                .render_pass(layer.render_pass)
                .framebuffer(layer.framebuffers[image_index as usize])
                .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_begin,
                vk::SubpassContents::INLINE,
            );

            if !draw_list.commands.is_empty()
                && self.vertex_buffer.is_present()
                && self.index_buffer.is_present()
            {
                device.cmd_bind_pipeline(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    layer.pipeline,
                );
                let viewport = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.cmd_set_viewport(command_buffer, 0, &[viewport]);
                device.cmd_bind_vertex_buffers(
                    command_buffer,
                    0,
                    &[self.vertex_buffer.get("overlay vertex buffer")?.raw()],
                    &[0],
                );
                device.cmd_bind_index_buffer(
                    command_buffer,
                    self.index_buffer.get("overlay index buffer")?.raw(),
                    0,
                    vk::IndexType::UINT16,
                );
                let push = OverlayPushConstants {
                    scale: [2.0 / extent.width as f32, 2.0 / extent.height as f32],
                    translate: [-1.0, -1.0],
                };
                device.cmd_push_constants(
                    command_buffer,
                    layer.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );

                for command in &draw_list.commands {
                    let Some(scissor) =
                        clip_scissor(command.clip_rect, extent.width, extent.height)
                    else {
                        continue;
                    };
                    device.cmd_set_scissor(command_buffer, 0, &[scissor]);
                    let set = self.descriptor_set_for(command.texture)?;
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::GRAPHICS,
                        layer.pipeline_layout,
                        0,
                        &[set],
                        &[],
                    );
                    device.cmd_draw_indexed(
                        command_buffer,
                        command.index_count,
                        1,
                        command.index_offset,
                        command.vertex_offset,
                        0,
                    );
                }
            }

            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }

    /// Tears down the swapchain-dependent layer. Safe to call when absent.
    pub fn destroy_chain(&mut self) {
        let device = self.context.device().clone();
        let allocation_callbacks = self.context.allocation_callbacks().copied();
        if let Some(layer) = self.layer.take() {
            unsafe {
                device.free_command_buffers(self.command_pool, &layer.command_buffers);
                device.destroy_pipeline(layer.pipeline, allocation_callbacks.as_ref());
                device
                    .destroy_pipeline_layout(layer.pipeline_layout, allocation_callbacks.as_ref());
            }
            trace!("Overlay layer destroyed.");
        }
    }

    /// Rebuilds the layer against a refreshed presentation chain.
    pub fn refresh(&mut self, presentation: &Presentation) -> Result<()> {
        self.destroy_chain();
        self.create(presentation)
    }
}

impl Drop for Overlay {
    fn drop(&mut self) {
        self.destroy_chain();
        unsafe {
            self.context.device().destroy_command_pool(
                self.command_pool,
                self.context.allocation_callbacks(),
            );
            self.context.device().destroy_descriptor_pool(
                self.descriptor_pool,
                self.context.allocation_callbacks(),
            );
            self.context.device().destroy_descriptor_set_layout(
                self.descriptor_set_layout,
                self.context.allocation_callbacks(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_replaced_on_any_count_change() {
        assert!(!buffers_need_replacement(100, 300, 100, 300));
        assert!(buffers_need_replacement(100, 300, 101, 300));
        assert!(buffers_need_replacement(100, 300, 100, 299));
        // Shrinking replaces too; the allocation tracks the list exactly.
        assert!(buffers_need_replacement(100, 300, 50, 150));
        assert!(buffers_need_replacement(0, 0, 1, 3));
    }

    #[test]
    fn scissor_is_clamped_to_framebuffer() {
        let rect = clip_scissor([-10.0, -5.0, 900.0, 700.0], 800, 600).unwrap();
        assert_eq!(rect.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(rect.extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn interior_scissor_is_preserved() {
        let rect = clip_scissor([10.0, 20.0, 110.0, 220.0], 800, 600).unwrap();
        assert_eq!(rect.offset, vk::Offset2D { x: 10, y: 20 });
        assert_eq!(rect.extent, vk::Extent2D { width: 100, height: 200 });
    }

    #[test]
    fn fully_clipped_commands_are_skipped() {
        assert!(clip_scissor([800.0, 0.0, 900.0, 100.0], 800, 600).is_none());
        assert!(clip_scissor([0.0, 0.0, 0.0, 0.0], 800, 600).is_none());
        assert!(clip_scissor([50.0, 50.0, 40.0, 60.0], 800, 600).is_none());
    }

    #[test]
    fn overlay_vertex_layout_is_20_bytes() {
        assert_eq!(mem::size_of::<OverlayVertex>(), 20);
        assert_eq!(mem::size_of::<OverlayPushConstants>(), 16);
    }
}
