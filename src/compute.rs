//! Compute dispatch target: a storage image written by a compute shader,
//! fed by push constants, uniform buffers and storage blobs.
//!
//! Descriptor binding order is fixed: binding 0 is the output storage image,
//! bindings 1..=U are the uniform buffers, and the storage blobs follow. The
//! target is single-flight: one dispatch may be in the pipe at a time, guarded
//! by a fence, and the next `enqueue` waits it out before reusing the command
//! buffer.

use crate::buffer::DeviceBuffer;
use crate::context::Context;
use crate::error::{Result, VulkanError};
use crate::shader::create_shader_module;
use crate::slot::Slot;
use crate::texture::Texture;
use ash::vk;
use log::{debug, info, trace};
use std::ffi::CString;

/// Push constants are limited to the size every Vulkan implementation
/// guarantees, so a target never depends on device limits.
pub const MAX_PUSH_CONSTANT_BYTES: usize = 128;

/// Shader-side workgroup edge length. Dispatches cover the output image in
/// 16x16 tiles.
pub const WORKGROUP_SIZE: u32 = 16;

/// Number of workgroups needed to cover a `width` x `height` image.
pub fn dispatch_group_counts(width: u32, height: u32) -> (u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE),
        height.div_ceil(WORKGROUP_SIZE),
    )
}

fn validate_push_constants(len: usize) -> Result<()> {
    if len > MAX_PUSH_CONSTANT_BYTES {
        return Err(VulkanError::PushConstantTooLarge { size: len, max: MAX_PUSH_CONSTANT_BYTES });
    }
    Ok(())
}

/// Static description of a compute target.
pub struct ComputeTargetDescriptor {
    /// SPIR-V for the compute stage, entry point `main`.
    pub shader: Vec<u32>,
    pub width: u32,
    pub height: u32,
    /// Format of the output storage image.
    pub output_format: vk::Format,
    /// Initial push-constant bytes. The length is baked into the pipeline
    /// layout and must not change afterwards. May be empty.
    pub push_constants: Vec<u8>,
    /// Sizes of the uniform buffers, bindings 1..=N.
    pub uniform_sizes: Vec<vk::DeviceSize>,
    /// Sizes of the storage blobs, bindings N+1.. .
    pub blob_sizes: Vec<vk::DeviceSize>,
}

/// Per-frame content changes. `None` entries are untouched.
pub struct ContentUpdate {
    /// Replacement push-constant bytes; same length as the initial span.
    /// Triggers a command-buffer re-record.
    pub push_constants: Option<Vec<u8>>,
    pub uniforms: Vec<Option<Vec<u8>>>,
    pub blobs: Vec<Option<Vec<u8>>>,
}

impl ContentUpdate {
    /// An update that changes nothing, shaped for a target with the given
    /// binding counts.
    pub fn none(uniform_count: usize, blob_count: usize) -> Self {
        Self {
            push_constants: None,
            uniforms: (0..uniform_count).map(|_| None).collect(),
            blobs: (0..blob_count).map(|_| None).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Dispatched,
}

/// Whether the command buffer must be re-recorded before the next dispatch.
/// Raised by anything baked into the recording (push-constant bytes, a
/// rebuilt pipeline layer) and lowered once a recording lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordMark {
    raised: bool,
}

impl RecordMark {
    fn raised() -> Self {
        Self { raised: true }
    }

    fn raise(&mut self) {
        self.raised = true;
    }

    fn lower(&mut self) {
        self.raised = false;
    }

    fn is_raised(&self) -> bool {
        self.raised
    }
}

/// Pipeline-level objects, rebuilt by `refresh` while the data layer stays.
struct PipelineLayer {
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    command_buffer: vk::CommandBuffer,
}

pub struct ComputeTarget {
    context: Context,
    shader: Vec<u32>,
    push_constants: Vec<u8>,
    output_format: vk::Format,
    extent: vk::Extent2D,
    output: Slot<Texture>,
    uniform_buffers: Vec<DeviceBuffer>,
    blob_buffers: Vec<DeviceBuffer>,
    blob_staging: Vec<DeviceBuffer>,
    layer: Slot<PipelineLayer>,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
    state: DispatchState,
    needs_record: RecordMark,
}

impl ComputeTarget {
    pub fn new(context: Context, descriptor: ComputeTargetDescriptor) -> Result<Self> {
        validate_push_constants(descriptor.push_constants.len())?;

        // The stage records and resets its own command buffer; it gets a pool
        // of its own rather than sharing the context's.
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(context.queue_family_index())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe {
            context.device().create_command_pool(&pool_create_info, context.allocation_callbacks())
        }?;

        let fence_create_info = vk::FenceCreateInfo::builder();
        let fence = match unsafe {
            context.device().create_fence(&fence_create_info, context.allocation_callbacks())
        } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe {
                    context
                        .device()
                        .destroy_command_pool(command_pool, context.allocation_callbacks());
                }
                return Err(e.into());
            }
        };

        let mut target = Self {
            context,
            shader: descriptor.shader,
            push_constants: descriptor.push_constants,
            output_format: descriptor.output_format,
            extent: vk::Extent2D { width: descriptor.width, height: descriptor.height },
            output: Slot::Absent,
            uniform_buffers: Vec::new(),
            blob_buffers: Vec::new(),
            blob_staging: Vec::new(),
            layer: Slot::Absent,
            command_pool,
            fence,
            state: DispatchState::Idle,
            needs_record: RecordMark::raised(),
        };
        target.build_resources(&descriptor.uniform_sizes, &descriptor.blob_sizes)?;
        target.build_layer()?;
        info!(
            "Compute target created: {}x{}, {} uniform(s), {} blob(s), {} push bytes.",
            descriptor.width,
            descriptor.height,
            target.uniform_buffers.len(),
            target.blob_buffers.len(),
            target.push_constants.len()
        );
        Ok(target)
    }

    fn build_resources(
        &mut self,
        uniform_sizes: &[vk::DeviceSize],
        blob_sizes: &[vk::DeviceSize],
    ) -> Result<()> {
        let output = Texture::new_storage_image(
            &self.context,
            self.extent.width,
            self.extent.height,
            self.output_format,
        )?;
        self.output.install(output, "compute output image")?;

        for &size in uniform_sizes {
            self.uniform_buffers.push(DeviceBuffer::new_host_mapped(
                &self.context,
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?);
        }
        for &size in blob_sizes {
            self.blob_buffers.push(DeviceBuffer::new_gpu_only(
                &self.context,
                size,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            )?);
            // Persistent staging avoids reallocating on every blob upload.
            self.blob_staging.push(DeviceBuffer::new_host_mapped(
                &self.context,
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
            )?);
        }
        Ok(())
    }

    fn build_layer(&mut self) -> Result<()> {
        let device = self.context.device();
        let allocation_callbacks = self.context.allocation_callbacks();

        let mut bindings = Vec::with_capacity(1 + self.uniform_buffers.len() + self.blob_buffers.len());
        bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        );
        for i in 0..self.uniform_buffers.len() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(1 + i as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build(),
            );
        }
        let blob_base = 1 + self.uniform_buffers.len() as u32;
        for i in 0..self.blob_buffers.len() {
            bindings.push(
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(blob_base + i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
                    .build(),
            );
        }

        let layout_create_info =
            vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let descriptor_set_layout = unsafe {
            device.create_descriptor_set_layout(&layout_create_info, allocation_callbacks)
        }?;

        let mut pool_sizes = vec![vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count: 1,
        }];
        if !self.uniform_buffers.is_empty() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: self.uniform_buffers.len() as u32,
            });
        }
        if !self.blob_buffers.is_empty() {
            pool_sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: self.blob_buffers.len() as u32,
            });
        }
        let pool_create_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let descriptor_pool =
            unsafe { device.create_descriptor_pool(&pool_create_info, allocation_callbacks) }?;

        let set_layouts = [descriptor_set_layout];
        let set_allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&set_allocate_info) }?[0];

        let image_info = [vk::DescriptorImageInfo {
            sampler: vk::Sampler::null(),
            image_view: self.output.get("compute output image")?.view(),
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let uniform_infos: Vec<[vk::DescriptorBufferInfo; 1]> = self
            .uniform_buffers
            .iter()
            .map(|b| {
                [vk::DescriptorBufferInfo { buffer: b.raw(), offset: 0, range: b.size() }]
            })
            .collect();
        let blob_infos: Vec<[vk::DescriptorBufferInfo; 1]> = self
            .blob_buffers
            .iter()
            .map(|b| {
                [vk::DescriptorBufferInfo { buffer: b.raw(), offset: 0, range: b.size() }]
            })
            .collect();

        let mut writes = Vec::with_capacity(1 + uniform_infos.len() + blob_infos.len());
        writes.push(
            vk::WriteDescriptorSet::builder()
                .dst_set(descriptor_set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&image_info)
                .build(),
        );
        for (i, info) in uniform_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(descriptor_set)
                    .dst_binding(1 + i as u32)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info)
                    .build(),
            );
        }
        for (i, info) in blob_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(descriptor_set)
                    .dst_binding(blob_base + i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(info)
                    .build(),
            );
        }
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        let push_ranges;
        let mut pipeline_layout_create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts);
        if !self.push_constants.is_empty() {
            push_ranges = [vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: self.push_constants.len() as u32,
            }];
            pipeline_layout_create_info =
                pipeline_layout_create_info.push_constant_ranges(&push_ranges);
        }
        let pipeline_layout = unsafe {
            device.create_pipeline_layout(&pipeline_layout_create_info, allocation_callbacks)
        }?;

        let shader_module = create_shader_module(device, &self.shader, allocation_callbacks)?;
        let entry_point = CString::new("main").map_err(|e| {
            VulkanError::ShaderLoadingError(format!("invalid entry point name: {}", e))
        })?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(&entry_point);
        let pipeline_create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(pipeline_layout);
        let pipeline_result = unsafe {
            device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info.build()],
                allocation_callbacks,
            )
        };
        unsafe { device.destroy_shader_module(shader_module, allocation_callbacks) };
        let pipeline = pipeline_result
            .map_err(|(_, e)| {
                VulkanError::PipelineCreationError(format!("compute pipeline: {}", e))
            })?[0];

        let command_buffer_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer =
            unsafe { device.allocate_command_buffers(&command_buffer_allocate_info) }?[0];

        self.layer.install(
            PipelineLayer {
                descriptor_set_layout,
                descriptor_pool,
                descriptor_set,
                pipeline_layout,
                pipeline,
                command_buffer,
            },
            "compute pipeline layer",
        )?;
        self.needs_record.raise();
        debug!("Compute pipeline layer built.");
        Ok(())
    }

    fn destroy_layer(&mut self) {
        let device = self.context.device().clone();
        let allocation_callbacks = self.context.allocation_callbacks().copied();
        if let Some(layer) = self.layer.take() {
            unsafe {
                device.free_command_buffers(self.command_pool, &[layer.command_buffer]);
                device.destroy_pipeline(layer.pipeline, allocation_callbacks.as_ref());
                device
                    .destroy_pipeline_layout(layer.pipeline_layout, allocation_callbacks.as_ref());
                device.destroy_descriptor_pool(layer.descriptor_pool, allocation_callbacks.as_ref());
                device.destroy_descriptor_set_layout(
                    layer.descriptor_set_layout,
                    allocation_callbacks.as_ref(),
                );
            }
        }
    }

    fn destroy_resources(&mut self) {
        self.blob_staging.clear();
        self.blob_buffers.clear();
        self.uniform_buffers.clear();
        drop(self.output.take());
    }

    /// Blocks until an in-flight dispatch retires and returns the target to
    /// `Idle`. No-op when nothing is in flight.
    fn wait_for_completion(&mut self) -> Result<()> {
        if self.state == DispatchState::Dispatched {
            unsafe {
                self.context.device().wait_for_fences(&[self.fence], true, u64::MAX)?;
                self.context.device().reset_fences(&[self.fence])?;
            }
            self.state = DispatchState::Idle;
            trace!("Compute dispatch retired.");
        }
        Ok(())
    }

    /// Applies content changes. Uniform changes are written straight through
    /// the persistent mapping; blob changes go through the staging buffer and
    /// block until the copy lands; a push-constant change marks the command
    /// buffer for re-recording.
    pub fn update(&mut self, update: &ContentUpdate) -> Result<()> {
        self.wait_for_completion()?;

        if let Some(push) = &update.push_constants {
            if push.len() != self.push_constants.len() {
                return Err(VulkanError::InvalidState(format!(
                    "push-constant span changed from {} to {} bytes; the layout is fixed",
                    self.push_constants.len(),
                    push.len()
                )));
            }
            self.push_constants.copy_from_slice(push);
            self.needs_record.raise();
        }

        for (i, change) in update.uniforms.iter().enumerate() {
            if let Some(bytes) = change {
                let buffer = self.uniform_buffers.get(i).ok_or_else(|| {
                    VulkanError::InvalidState(format!("uniform index {} out of range", i))
                })?;
                buffer.write(0, bytes)?;
            }
        }

        for (i, change) in update.blobs.iter().enumerate() {
            if let Some(bytes) = change {
                let staging = self.blob_staging.get(i).ok_or_else(|| {
                    VulkanError::InvalidState(format!("blob index {} out of range", i))
                })?;
                staging.write(0, bytes)?;
                staging.copy_to(&self.context, &self.blob_buffers[i], bytes.len() as vk::DeviceSize)?;
                self.context.queue_wait_idle()?;
            }
        }
        Ok(())
    }

    /// Submits the dispatch, signalling `signal_semaphore` on completion.
    /// Re-records the command buffer first if an update demanded it.
    pub fn enqueue(&mut self, signal_semaphore: vk::Semaphore) -> Result<()> {
        self.wait_for_completion()?;
        if self.needs_record.is_raised() {
            self.record()?;
            self.needs_record.lower();
        }

        let layer = self.layer.get("compute pipeline layer")?;
        let command_buffers = [layer.command_buffer];
        let signal_semaphores = [signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.context.device().queue_submit(
                self.context.queue(),
                &[submit_info.build()],
                self.fence,
            )
        }?;
        self.state = DispatchState::Dispatched;
        trace!("Compute dispatch enqueued.");
        Ok(())
    }

    fn record(&mut self) -> Result<()> {
        let device = self.context.device();
        let layer = self.layer.get("compute pipeline layer")?;
        let (groups_x, groups_y) = dispatch_group_counts(self.extent.width, self.extent.height);

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            device.begin_command_buffer(layer.command_buffer, &begin_info)?;
            device.cmd_bind_pipeline(
                layer.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layer.pipeline,
            );
            device.cmd_bind_descriptor_sets(
                layer.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                layer.pipeline_layout,
                0,
                &[layer.descriptor_set],
                &[],
            );
            if !self.push_constants.is_empty() {
                device.cmd_push_constants(
                    layer.command_buffer,
                    layer.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    &self.push_constants,
                );
            }
            device.cmd_dispatch(layer.command_buffer, groups_x, groups_y, 1);
            device.end_command_buffer(layer.command_buffer)?;
        }
        debug!(
            "Compute command buffer recorded: {}x{} groups over {}x{} pixels.",
            groups_x, groups_y, self.extent.width, self.extent.height
        );
        Ok(())
    }

    /// Full teardown and rebuild, including the output image at a new size.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.wait_for_completion()?;
        info!("Recreating compute target at {}x{}.", width, height);

        let uniform_sizes: Vec<vk::DeviceSize> =
            self.uniform_buffers.iter().map(|b| b.size()).collect();
        let blob_sizes: Vec<vk::DeviceSize> =
            self.blob_buffers.iter().map(|b| b.size()).collect();

        self.destroy_layer();
        self.destroy_resources();
        self.extent = vk::Extent2D { width, height };
        self.build_resources(&uniform_sizes, &blob_sizes)?;
        self.build_layer()
    }

    /// Rebuilds only the pipeline layer; image and buffers survive. Used when
    /// the frame chain was refreshed but the output size is unchanged.
    pub fn refresh(&mut self) -> Result<()> {
        self.wait_for_completion()?;
        self.destroy_layer();
        self.build_layer()
    }

    /// The storage image the shader writes. Sampled by the fullscreen pass.
    pub fn output(&self) -> Result<&Texture> {
        self.output.get("compute output image")
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn uniform_count(&self) -> usize {
        self.uniform_buffers.len()
    }

    pub fn blob_count(&self) -> usize {
        self.blob_buffers.len()
    }
}

impl Drop for ComputeTarget {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_completion() {
            log::warn!("Compute fence wait failed during teardown: {}", e);
        }
        self.destroy_layer();
        self.destroy_resources();
        unsafe {
            self.context
                .device()
                .destroy_fence(self.fence, self.context.allocation_callbacks());
            self.context
                .device()
                .destroy_command_pool(self.command_pool, self.context.allocation_callbacks());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_counts_round_up() {
        assert_eq!(dispatch_group_counts(1920, 1080), (120, 68));
        assert_eq!(dispatch_group_counts(1, 1), (1, 1));
        assert_eq!(dispatch_group_counts(16, 16), (1, 1));
        assert_eq!(dispatch_group_counts(17, 33), (2, 3));
    }

    #[test]
    fn push_constants_over_the_limit_are_rejected() {
        assert!(validate_push_constants(MAX_PUSH_CONSTANT_BYTES).is_ok());
        match validate_push_constants(MAX_PUSH_CONSTANT_BYTES + 1) {
            Err(VulkanError::PushConstantTooLarge { size, max }) => {
                assert_eq!(size, 129);
                assert_eq!(max, 128);
            }
            other => panic!("expected PushConstantTooLarge, got {:?}", other.err()),
        }
    }

    #[test]
    fn push_change_re_records_exactly_once() {
        // A fresh target starts raised (nothing recorded yet); a push-constant
        // change raises it again, and each recording lowers it, so one change
        // yields exactly one re-record over any number of steady frames.
        let mut mark = RecordMark::raised();
        let mut recordings = 0;
        for frame in 0..6 {
            if frame == 3 {
                mark.raise();
            }
            if mark.is_raised() {
                recordings += 1;
                mark.lower();
            }
        }
        assert_eq!(recordings, 2);
        assert!(!mark.is_raised());
    }

    #[test]
    fn empty_update_touches_nothing() {
        let update = ContentUpdate::none(2, 1);
        assert!(update.push_constants.is_none());
        assert_eq!(update.uniforms.len(), 2);
        assert_eq!(update.blobs.len(), 1);
        assert!(update.uniforms.iter().all(Option::is_none));
        assert!(update.blobs.iter().all(Option::is_none));
    }
}
