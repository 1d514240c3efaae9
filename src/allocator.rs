//! Thin shared handle over the VMA allocator.
//!
//! Buffers and textures keep a clone so their `Drop` impls can return memory
//! without borrowing the `Kernel`; the underlying `vk_mem::Allocator` is torn
//! down when the last clone goes away, before the device it was built on.

use crate::error::Result;
use ash::vk;
use log::info;
use std::sync::Arc;

#[derive(Clone)]
pub struct Allocator {
    raw: Arc<vk_mem::Allocator>,
}

impl Allocator {
    /// Creates a VMA allocator for the given device.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device);
        let raw = vk_mem::Allocator::new(create_info)?;
        info!("VMA allocator created.");
        Ok(Self { raw: Arc::new(raw) })
    }

    pub fn raw(&self) -> &vk_mem::Allocator {
        &self.raw
    }
}
