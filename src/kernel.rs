//! Device bring-up and ownership of the long-lived Vulkan objects.
//!
//! The `Kernel` creates the instance, surface, physical and logical device and
//! the VMA allocator, in that order, and tears them down in reverse. Everything
//! above it (presentation, compute, overlay) borrows from the kernel and must
//! be dropped before it.

use crate::alloc_callbacks::{AllocationStats, HostAllocationTracker};
use crate::allocator::Allocator;
use crate::context::Context;
use crate::device::{create_logical_device, LogicalDevice, QueueIdentifier};
use crate::error::{Result, VulkanError};
use crate::instance::VulkanInstance;
use crate::physical_device::{best_queue_family_for, select_physical_device, PhysicalDeviceInfo};
use crate::surface::SurfaceProvider;
use ash::extensions::khr::Surface as SurfaceLoader;
use ash::vk;
use log::info;

/// Root object of the renderer: owns the instance, device and allocator.
///
/// Field order matters: the allocator must be dropped before the logical
/// device, the device before the instance, and the host tracker must outlive
/// every object created with its callbacks, so it is declared last.
pub struct Kernel {
    allocator: Allocator,
    logical_device: LogicalDevice,
    physical_device_info: PhysicalDeviceInfo,
    primary_work_queue: QueueIdentifier,
    present_queue: QueueIdentifier,
    surface: vk::SurfaceKHR,
    surface_loader: SurfaceLoader,
    instance: VulkanInstance,
    host_tracker: Option<HostAllocationTracker>,
}

impl Kernel {
    /// Brings up the full device stack.
    ///
    /// # Arguments
    /// * `app_name`: Application name reported to the driver.
    /// * `enable_validation`: Whether to request the Khronos validation layer.
    /// * `surface_provider`: Platform strategy used to create the surface.
    /// * `track_host_allocations`: When true, driver host allocations made for
    ///   the instance and device are counted and surfaced via [`host_stats`].
    ///
    /// [`host_stats`]: Kernel::host_stats
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        surface_provider: &dyn SurfaceProvider,
        track_host_allocations: bool,
    ) -> Result<Self> {
        let host_tracker = track_host_allocations.then(HostAllocationTracker::new);

        let instance = VulkanInstance::new(
            app_name,
            enable_validation,
            surface_provider,
            host_tracker.as_ref(),
        )?;

        let surface_loader = SurfaceLoader::new(instance.entry(), instance.raw());
        let surface = surface_provider.create_surface(instance.entry(), instance.raw())?;

        let physical_device_info =
            select_physical_device(&instance, &surface_loader, surface)?;

        let work_family = best_queue_family_for(
            &physical_device_info.queue_families,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            false,
        )
        .ok_or_else(|| {
            VulkanError::QueueFamilyNotFound("graphics+compute".to_string())
        })?;
        let present_family = best_queue_family_for(
            &physical_device_info.queue_families,
            vk::QueueFlags::empty(),
            true,
        )
        .ok_or_else(|| VulkanError::QueueFamilyNotFound("present".to_string()))?;

        let logical_device = create_logical_device(&instance, &physical_device_info)?;

        let allocator = Allocator::new(
            instance.raw(),
            logical_device.raw(),
            physical_device_info.physical_device,
        )?;

        let primary_work_queue = QueueIdentifier {
            physical_device: physical_device_info.physical_device,
            family_index: work_family,
            queue_index: 0,
        };
        let present_queue = QueueIdentifier {
            physical_device: physical_device_info.physical_device,
            family_index: present_family,
            queue_index: 0,
        };
        info!(
            "Kernel initialized on {} (work family {}, present family {}).",
            physical_device_info.device_name(),
            work_family,
            present_family
        );

        Ok(Self {
            allocator,
            logical_device,
            physical_device_info,
            primary_work_queue,
            present_queue,
            surface,
            surface_loader,
            instance,
            host_tracker,
        })
    }

    /// The queue the renderer routes graphics and compute work to.
    pub fn primary_work_queue(&self) -> QueueIdentifier {
        self.primary_work_queue
    }

    /// The queue used for presentation. May alias the work queue.
    pub fn present_queue(&self) -> QueueIdentifier {
        self.present_queue
    }

    /// Builds a context bound to the primary work queue.
    pub fn primary_context(&self) -> Result<Context> {
        self.context_for(self.primary_work_queue)
    }

    /// Builds a context bound to an arbitrary queue on this device.
    pub fn context_for(&self, queue: QueueIdentifier) -> Result<Context> {
        Ok(Context::new(
            self.logical_device.raw().clone(),
            self.allocator.clone(),
            self.logical_device.queue(queue.family_index)?,
            queue.family_index,
            self.logical_device.command_pool(queue.family_index)?,
            self.instance.allocation_callbacks().copied(),
        ))
    }

    pub fn instance(&self) -> &VulkanInstance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &SurfaceLoader {
        &self.surface_loader
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn physical_device_info(&self) -> &PhysicalDeviceInfo {
        &self.physical_device_info
    }

    pub fn device(&self) -> &LogicalDevice {
        &self.logical_device
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    /// Counter snapshot from the host-allocation tracker, when enabled.
    pub fn host_stats(&self) -> Option<AllocationStats> {
        self.host_tracker.as_ref().map(|t| t.stats())
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        // The surface must go before the instance; the remaining fields drop
        // in declaration order (allocator, device, instance, tracker).
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan surface destroyed.");
    }
}
