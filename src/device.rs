use crate::error::{Result, VulkanError};
use crate::instance::VulkanInstance;
use crate::physical_device::PhysicalDeviceInfo;
use ash::extensions::khr::Swapchain;
use ash::vk;
use log::{debug, info, warn};
use std::collections::HashMap;

/// Identifies one hardware queue: the adapter it lives on, the family it
/// belongs to and the index of the queue within that family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueIdentifier {
    pub physical_device: vk::PhysicalDevice,
    pub family_index: u32,
    pub queue_index: u32,
}

/// Holds the logical device together with the queues and command pools
/// retrieved from it. One queue and one resettable command pool are created
/// per usable queue family.
pub struct LogicalDevice {
    raw: ash::Device,
    queues: HashMap<u32, vk::Queue>,
    command_pools: HashMap<u32, vk::CommandPool>,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
}

impl LogicalDevice {
    pub fn raw(&self) -> &ash::Device {
        &self.raw
    }

    /// Queue for the given family, if the device exposed one.
    pub fn queue(&self, family_index: u32) -> Result<vk::Queue> {
        self.queues.get(&family_index).copied().ok_or_else(|| {
            VulkanError::QueueFamilyNotFound(format!("no queue retrieved for family {}", family_index))
        })
    }

    /// Command pool created for the given family.
    pub fn command_pool(&self, family_index: u32) -> Result<vk::CommandPool> {
        self.command_pools.get(&family_index).copied().ok_or_else(|| {
            VulkanError::QueueFamilyNotFound(format!("no command pool for family {}", family_index))
        })
    }

    pub fn allocation_callbacks(&self) -> Option<&vk::AllocationCallbacks> {
        self.allocation_callbacks.as_ref()
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            for (&family, &pool) in &self.command_pools {
                self.raw.destroy_command_pool(pool, self.allocation_callbacks.as_ref());
                debug!("Destroyed command pool for queue family {}.", family);
            }
            self.raw.destroy_device(self.allocation_callbacks.as_ref());
            info!("Logical device destroyed.");
        }
    }
}

/// Creates a logical device from the selected physical device.
///
/// One queue is requested from every family that advertises at least one
/// queue, so callers can route graphics, compute, transfer and present work
/// to whichever family suits each task. Enables the swapchain extension and
/// anisotropic filtering when the hardware supports it.
pub fn create_logical_device(
    vulkan_instance: &VulkanInstance,
    physical_device_info: &PhysicalDeviceInfo,
) -> Result<LogicalDevice> {
    let instance = vulkan_instance.raw();
    let allocation_callbacks = vulkan_instance.allocation_callbacks().copied();

    let usable_families: Vec<u32> = physical_device_info
        .queue_families
        .iter()
        .filter(|f| f.queue_count > 0)
        .map(|f| f.index)
        .collect();
    if usable_families.is_empty() {
        return Err(VulkanError::QueueFamilyNotFound(
            "physical device exposes no usable queue families".to_string(),
        ));
    }

    let queue_priorities = [1.0f32];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = usable_families
        .iter()
        .map(|&family_index| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family_index)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let mut enabled_features = vk::PhysicalDeviceFeatures::default();
    if physical_device_info.features.sampler_anisotropy == vk::TRUE {
        enabled_features.sampler_anisotropy = vk::TRUE;
    } else {
        warn!("Sampler anisotropy not supported by the physical device.");
    }

    let device_extension_names = [Swapchain::name().as_ptr()];

    let device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extension_names)
        .enabled_features(&enabled_features);

    let raw = unsafe {
        instance.create_device(
            physical_device_info.physical_device,
            &device_create_info,
            allocation_callbacks.as_ref(),
        )
    }
    .map_err(|e| {
        VulkanError::InitializationError(format!("Failed to create logical device: {}", e))
    })?;
    info!(
        "Logical device created for {} with {} queue famil(ies).",
        physical_device_info.device_name(),
        usable_families.len()
    );

    let mut queues = HashMap::new();
    let mut command_pools = HashMap::new();
    for &family_index in &usable_families {
        let queue = unsafe { raw.get_device_queue(family_index, 0) };
        queues.insert(family_index, queue);

        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = match unsafe {
            raw.create_command_pool(&pool_create_info, allocation_callbacks.as_ref())
        } {
            Ok(pool) => pool,
            Err(e) => {
                // Unwind the pools created so far before surfacing the error.
                unsafe {
                    for &created in command_pools.values() {
                        raw.destroy_command_pool(created, allocation_callbacks.as_ref());
                    }
                    raw.destroy_device(allocation_callbacks.as_ref());
                }
                return Err(VulkanError::ResourceCreationError {
                    resource_type: "CommandPool".to_string(),
                    message: format!("family {}: {}", family_index, e),
                });
            }
        };
        command_pools.insert(family_index, pool);
        debug!("Retrieved queue and created command pool for family {}.", family_index);
    }

    Ok(LogicalDevice { raw, queues, command_pools, allocation_callbacks })
}
