//! Bundle of the handles most operations need.
//!
//! A `Context` is cheap to clone and carries the logical device, the VMA
//! allocator handle, one queue and the command pool of that queue's family.
//! Resource modules take a context instead of threading five parameters
//! through every call.

use crate::allocator::Allocator;
use crate::error::{Result, VulkanError};
use ash::vk;
use log::trace;

#[derive(Clone)]
pub struct Context {
    device: ash::Device,
    allocator: Allocator,
    queue: vk::Queue,
    queue_family_index: u32,
    command_pool: vk::CommandPool,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
}

impl Context {
    pub(crate) fn new(
        device: ash::Device,
        allocator: Allocator,
        queue: vk::Queue,
        queue_family_index: u32,
        command_pool: vk::CommandPool,
        allocation_callbacks: Option<vk::AllocationCallbacks>,
    ) -> Self {
        Self { device, allocator, queue, queue_family_index, command_pool, allocation_callbacks }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn allocation_callbacks(&self) -> Option<&vk::AllocationCallbacks> {
        self.allocation_callbacks.as_ref()
    }

    /// Records commands into a fresh primary command buffer, submits it to the
    /// context's queue and waits for completion with a fence.
    ///
    /// Used for uploads and layout transitions outside the frame loop.
    pub fn run_one_time_commands<F>(&self, recorder: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }?[0];

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        let result: Result<()> = (|| {
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }?;
            recorder(command_buffer);
            unsafe { self.device.end_command_buffer(command_buffer) }?;

            let fence_create_info = vk::FenceCreateInfo::builder();
            let fence = unsafe {
                self.device.create_fence(&fence_create_info, self.allocation_callbacks.as_ref())
            }?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            let submit_result = unsafe {
                self.device
                    .queue_submit(self.queue, &[submit_info.build()], fence)
                    .map_err(VulkanError::from)
                    .and_then(|_| {
                        self.device
                            .wait_for_fences(&[fence], true, u64::MAX)
                            .map_err(VulkanError::from)
                    })
            };
            unsafe { self.device.destroy_fence(fence, self.allocation_callbacks.as_ref()) };
            submit_result?;
            trace!("One-time command buffer completed.");
            Ok(())
        })();

        unsafe { self.device.free_command_buffers(self.command_pool, &[command_buffer]) };
        result
    }

    /// Blocks until the context's queue has drained.
    pub fn queue_wait_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.queue) }?;
        Ok(())
    }

    /// Blocks until the whole device is idle.
    pub fn device_wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}
