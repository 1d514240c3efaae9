//! Fullscreen presentation of the compute output.
//!
//! Draws a single clockwise triangle that covers the viewport (the vertex
//! shader synthesizes positions from `gl_VertexIndex`, so there is no vertex
//! buffer) and samples the compute image in the fragment stage. The viewport
//! is dynamic state baked in at record time, so moving or resizing the target
//! rectangle re-records the command buffers without touching the pipeline.

use crate::context::Context;
use crate::error::{Result, VulkanError};
use crate::presentation::Presentation;
use crate::shader::create_shader_module;
use crate::slot::Slot;
use crate::texture::Texture;
use ash::vk;
use log::{debug, info, trace};
use std::ffi::CString;

/// Exact inequality on every field; any difference re-records.
pub fn viewports_differ(a: &vk::Viewport, b: &vk::Viewport) -> bool {
    a.x != b.x
        || a.y != b.y
        || a.width != b.width
        || a.height != b.height
        || a.min_depth != b.min_depth
        || a.max_depth != b.max_depth
}

/// Swapchain-dependent objects, rebuilt on refresh.
struct Layer {
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    extent: vk::Extent2D,
}

pub struct FullscreenRender {
    context: Context,
    vertex_shader: Vec<u32>,
    fragment_shader: Vec<u32>,
    sampler: vk::Sampler,
    command_pool: vk::CommandPool,
    layer: Slot<Layer>,
    viewport: vk::Viewport,
}

impl FullscreenRender {
    /// Creates the device-level pieces. The swapchain-dependent layer is built
    /// by [`create`] once the presentation chain exists.
    ///
    /// [`create`]: FullscreenRender::create
    pub fn new(context: Context, vertex_shader: Vec<u32>, fragment_shader: Vec<u32>) -> Result<Self> {
        let sampler_create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = unsafe {
            context.device().create_sampler(&sampler_create_info, context.allocation_callbacks())
        }?;

        // The pass re-records on viewport changes; it owns its command pool.
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe {
            context.device().create_command_pool(&pool_create_info, context.allocation_callbacks())
        } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    context.device().destroy_sampler(sampler, context.allocation_callbacks());
                }
                return Err(e.into());
            }
        };

        Ok(Self {
            context,
            vertex_shader,
            fragment_shader,
            sampler,
            command_pool,
            layer: Slot::Absent,
            viewport: vk::Viewport::default(),
        })
    }

    /// Builds the pipeline against the canvas render pass and records one
    /// command buffer per swapchain image. `viewport` defaults to the full
    /// surface when `None`.
    pub fn create(
        &mut self,
        presentation: &Presentation,
        source: &Texture,
        viewport: Option<vk::Viewport>,
    ) -> Result<()> {
        let extent = presentation.extent();
        self.viewport = viewport.unwrap_or(vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });

        let device = self.context.device();
        let allocation_callbacks = self.context.allocation_callbacks();

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
            descriptor_count: 1,
        }];
        let pool_create_info =
            vk::DescriptorPoolCreateInfo::builder().pool_sizes(&pool_sizes).max_sets(1);
        let descriptor_pool =
            unsafe { device.create_descriptor_pool(&pool_create_info, allocation_callbacks) }?;

        let set_layouts = [descriptor_set_layout];
        let set_allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&set_allocate_info) }?[0];

        // The compute image stays in GENERAL; sampling it there avoids a
        // per-frame layout round-trip.
        let image_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: source.view(),
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build()];
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        let pipeline_layout_create_info =
            vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let pipeline_layout = unsafe {
            device.create_pipeline_layout(&pipeline_layout_create_info, allocation_callbacks)
        }?;

        let render_pass = presentation.canvas_render_pass()?;
        let pipeline = self.create_pipeline(pipeline_layout, render_pass)?;

        let framebuffers = presentation.canvas_framebuffers()?.to_vec();
        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(framebuffers.len() as u32);
        let command_buffers =
            unsafe { device.allocate_command_buffers(&command_buffer_allocate_info) }?;

        self.layer.install(
            Layer {
                descriptor_set_layout,
                descriptor_pool,
                descriptor_set,
                pipeline_layout,
                pipeline,
                render_pass,
                framebuffers,
                command_buffers,
                extent,
            },
            "fullscreen layer",
        )?;
        self.record_command_buffers()?;
        info!("Fullscreen pass created for {} swapchain image(s).", presentation.image_count());
        Ok(())
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

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state =
            vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false);
        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
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
            VulkanError::PipelineCreationError(format!("fullscreen pipeline: {}", e))
        })?[0];
        Ok(pipeline)
    }

    fn record_command_buffers(&mut self) -> Result<()> {
        let device = self.context.device();
        let layer = self.layer.get("fullscreen layer")?;
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: [0.0, 0.0, 0.0, 1.0] } },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let scissor = vk::Rect2D { offset: vk::Offset2D::default(), extent: layer.extent };

        for (i, &command_buffer) in layer.command_buffers.iter().enumerate() {
            // Re-submitted while another frame may still reference it.
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
            unsafe {
                device.begin_command_buffer(command_buffer, &begin_info)?;
                let render_pass_begin = vk::RenderPassBeginInfo::builder()
                    .render_pass(layer.render_pass)
                    .framebuffer(layer.framebuffers[i])
                    .render_area(scissor)
                    .clear_values(&clear_values);
                device.cmd_begin_render_pass(
                    command_buffer,
                    &render_pass_begin,
                    vk::SubpassContents::INLINE,
                );
                device.cmd_bind_pipeline(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    layer.pipeline,
                );
                device.cmd_set_viewport(command_buffer, 0, &[self.viewport]);
                device.cmd_set_scissor(command_buffer, 0, &[scissor]);
                device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    layer.pipeline_layout,
                    0,
                    &[layer.descriptor_set],
                    &[],
                );
                device.cmd_draw(command_buffer, 3, 1, 0, 0);
                device.cmd_end_render_pass(command_buffer);
                device.end_command_buffer(command_buffer)?;
            }
        }
        debug!(
            "Fullscreen command buffers recorded (viewport {}x{} at {},{}).",
            self.viewport.width, self.viewport.height, self.viewport.x, self.viewport.y
        );
        Ok(())
    }

    /// Applies a new target viewport. Returns `true` when the rectangle
    /// actually changed, in which case only the command buffers were
    /// re-recorded; the pipeline survives because the viewport is dynamic.
    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> Result<bool> {
        if !viewports_differ(&self.viewport, &viewport) {
            return Ok(false);
        }
        self.viewport = viewport;
        if self.layer.is_present() {
            self.record_command_buffers()?;
        }
        Ok(true)
    }

    pub fn viewport(&self) -> vk::Viewport {
        self.viewport
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
                device.destroy_descriptor_pool(layer.descriptor_pool, allocation_callbacks.as_ref());
                device.destroy_descriptor_set_layout(
                    layer.descriptor_set_layout,
                    allocation_callbacks.as_ref(),
                );
            }
            trace!("Fullscreen layer destroyed.");
        }
    }

    /// Rebuilds the layer against a refreshed presentation chain, preserving
    /// the current viewport.
    pub fn refresh(&mut self, presentation: &Presentation, source: &Texture) -> Result<()> {
        self.destroy_chain();
        let viewport = self.viewport;
        self.create(presentation, source, Some(viewport))
    }

    /// Submits the pass for `image_index`, waiting on the given
    /// semaphore/stage pairs and signalling `signal_semaphore` when the pass
    /// finishes.
    pub fn submit(
        &self,
        image_index: u32,
        waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
        signal_semaphore: vk::Semaphore,
    ) -> Result<()> {
        let layer = self.layer.get("fullscreen layer")?;
        let command_buffer =
            *layer.command_buffers.get(image_index as usize).ok_or_else(|| {
                VulkanError::InvalidState(format!(
                    "image index {} out of range ({} command buffers)",
                    image_index,
                    layer.command_buffers.len()
                ))
            })?;

        let wait_semaphores: Vec<vk::Semaphore> = waits.iter().map(|&(s, _)| s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = waits.iter().map(|&(_, st)| st).collect();
        let command_buffers = [command_buffer];
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
        trace!("Fullscreen pass submitted for image {}.", image_index);
        Ok(())
    }
}

impl Drop for FullscreenRender {
    fn drop(&mut self) {
        self.destroy_chain();
        unsafe {
            self.context
                .device()
                .destroy_sampler(self.sampler, self.context.allocation_callbacks());
            self.context
                .device()
                .destroy_command_pool(self.command_pool, self.context.allocation_callbacks());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(x: f32, y: f32, w: f32, h: f32) -> vk::Viewport {
        vk::Viewport { x, y, width: w, height: h, min_depth: 0.0, max_depth: 1.0 }
    }

    #[test]
    fn identical_viewports_do_not_differ() {
        let a = viewport(0.0, 0.0, 800.0, 600.0);
        assert!(!viewports_differ(&a, &a.clone()));
    }

    #[test]
    fn any_field_change_differs() {
        let base = viewport(0.0, 0.0, 800.0, 600.0);
        assert!(viewports_differ(&base, &viewport(1.0, 0.0, 800.0, 600.0)));
        assert!(viewports_differ(&base, &viewport(0.0, 1.0, 800.0, 600.0)));
        assert!(viewports_differ(&base, &viewport(0.0, 0.0, 801.0, 600.0)));
        assert!(viewports_differ(&base, &viewport(0.0, 0.0, 800.0, 601.0)));
        let mut depth = base;
        depth.max_depth = 0.5;
        assert!(viewports_differ(&base, &depth));
    }
}
