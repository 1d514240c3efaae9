//! Buffer creation and upload helpers on top of VMA.

use crate::allocator::Allocator;
use crate::context::Context;
use crate::error::{Result, VulkanError};
use ash::vk;
use log::{debug, trace};
use vk_mem::Alloc;

/// A buffer together with its VMA allocation.
///
/// Holds a clone of the allocator handle so the memory is returned when the
/// buffer is dropped. Host-visible buffers are persistently mapped and written
/// through [`write`]; device-local buffers are filled through a staging copy.
///
/// [`write`]: DeviceBuffer::write
pub struct DeviceBuffer {
    allocator: Allocator,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    mapped_ptr: *mut u8,
}

impl DeviceBuffer {
    /// Creates a device-local buffer with no host access.
    pub fn new_gpu_only(
        context: &Context,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(VulkanError::ResourceCreationError {
                resource_type: "Buffer".to_string(),
                message: "cannot create a zero-sized buffer".to_string(),
            });
        }
        let buffer_create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let allocation_create_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (buffer, allocation) = unsafe {
            context.allocator().raw().create_buffer(&buffer_create_info, &allocation_create_info)
        }?;
        debug!("GPU-only buffer created: {:?} ({} bytes, {:?}).", buffer, size, usage);
        Ok(Self {
            allocator: context.allocator().clone(),
            buffer,
            allocation,
            size,
            mapped_ptr: std::ptr::null_mut(),
        })
    }

    /// Creates a persistently mapped host-visible buffer.
    pub fn new_host_mapped(
        context: &Context,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(VulkanError::ResourceCreationError {
                resource_type: "Buffer".to_string(),
                message: "cannot create a zero-sized buffer".to_string(),
            });
        }
        let buffer_create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let allocation_create_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };
        let allocator = context.allocator().clone();
        let (buffer, mut allocation) = unsafe {
            allocator.raw().create_buffer(&buffer_create_info, &allocation_create_info)
        }?;
        let mapped_ptr = match unsafe { allocator.raw().map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { allocator.raw().destroy_buffer(buffer, &mut allocation) };
                return Err(e.into());
            }
        };
        debug!("Host-mapped buffer created: {:?} ({} bytes, {:?}).", buffer, size, usage);
        Ok(Self { allocator, buffer, allocation, size, mapped_ptr })
    }

    /// Writes `bytes` at `offset` through the persistent mapping.
    ///
    /// Fails on device-local buffers and on writes past the end.
    pub fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> Result<()> {
        if self.mapped_ptr.is_null() {
            return Err(VulkanError::InvalidState(
                "write() on a buffer without host mapping".to_string(),
            ));
        }
        let end = offset
            .checked_add(bytes.len() as vk::DeviceSize)
            .filter(|&end| end <= self.size)
            .ok_or_else(|| {
                VulkanError::InvalidState(format!(
                    "write of {} bytes at offset {} exceeds buffer size {}",
                    bytes.len(),
                    offset,
                    self.size
                ))
            })?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mapped_ptr.add(offset as usize),
                bytes.len(),
            );
        }
        trace!("Wrote {} bytes into buffer {:?} at offset {}.", end - offset, self.buffer, offset);
        Ok(())
    }

    /// Records and submits a blocking copy of `size` bytes into `dst`.
    pub fn copy_to(&self, context: &Context, dst: &DeviceBuffer, size: vk::DeviceSize) -> Result<()> {
        let device = context.device().clone();
        let src = self.buffer;
        let dst_buffer = dst.buffer;
        context.run_one_time_commands(|cmd| {
            let region = vk::BufferCopy::builder().src_offset(0).dst_offset(0).size(size);
            unsafe {
                device.cmd_copy_buffer(cmd, src, dst_buffer, &[region.build()]);
            }
        })
    }

    pub fn raw(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        unsafe {
            if !self.mapped_ptr.is_null() {
                self.allocator.raw().unmap_memory(&mut self.allocation);
            }
            self.allocator.raw().destroy_buffer(self.buffer, &mut self.allocation);
        }
        trace!("Buffer {:?} destroyed.", self.buffer);
    }
}
