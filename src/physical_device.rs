use crate::error::{Result, VulkanError};
use crate::instance::VulkanInstance;
use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain};
use ash::vk;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::ffi::CStr;

/// Per-family capability record built during adapter enumeration.
#[derive(Debug, Clone, Copy)]
pub struct QueueFamily {
    pub index: u32,
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

impl QueueFamily {
    /// Number of distinct capabilities this family advertises. Used to prefer
    /// dedicated families over do-everything ones when routing work.
    pub fn capability_count(&self) -> u32 {
        self.flags.as_raw().count_ones() + u32::from(self.supports_present)
    }
}

/// Holds information about a selected physical device.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<QueueFamily>,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Selects a suitable physical device for the renderer.
///
/// Enumerates available adapters, checks their suitability (swapchain support,
/// a graphics+compute capable family, a present capable family), and returns
/// information about the selected device. Discrete GPUs are preferred over
/// integrated ones when both qualify.
pub fn select_physical_device(
    vulkan_instance: &VulkanInstance,
    surface_loader: &SurfaceLoader,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDeviceInfo> {
    let instance = vulkan_instance.raw();
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    if physical_devices.is_empty() {
        return Err(VulkanError::NoSuitablePhysicalDevice);
    }
    info!("Found {} physical device(s). Evaluating suitability...", physical_devices.len());

    let mut fallback: Option<PhysicalDeviceInfo> = None;

    for &physical_device in physical_devices.iter() {
        match evaluate_device(instance, surface_loader, physical_device, surface) {
            Ok(Some(info)) => {
                info!(
                    "Device suitable: {} (Type: {:?})",
                    info.device_name(),
                    info.properties.device_type
                );
                if info.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
                    info!("Selected discrete GPU: {}", info.device_name());
                    return Ok(info);
                }
                if fallback.is_none() {
                    fallback = Some(info);
                }
            }
            Ok(None) => {
                let properties = unsafe { instance.get_physical_device_properties(physical_device) };
                debug!("Device not suitable: {:?}", unsafe {
                    CStr::from_ptr(properties.device_name.as_ptr())
                });
            }
            Err(e) => {
                let properties = unsafe { instance.get_physical_device_properties(physical_device) };
                warn!(
                    "Error checking suitability for device {:?}: {}",
                    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) },
                    e
                );
            }
        }
    }

    if let Some(info) = fallback {
        info!(
            "Final selected device (Type: {:?}): {}",
            info.properties.device_type,
            info.device_name()
        );
        return Ok(info);
    }
    Err(VulkanError::NoSuitablePhysicalDevice)
}

/// Checks one adapter: returns `Ok(Some(info))` when usable, `Ok(None)` when
/// not suitable but no error occurred.
fn evaluate_device(
    instance: &ash::Instance,
    surface_loader: &SurfaceLoader,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Option<PhysicalDeviceInfo>> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let features = unsafe { instance.get_physical_device_features(physical_device) };
    let memory_properties =
        unsafe { instance.get_physical_device_memory_properties(physical_device) };

    let available_extensions =
        unsafe { instance.enumerate_device_extension_properties(physical_device) }?;
    let mut available_extension_names = HashSet::new();
    for ext in available_extensions {
        available_extension_names
            .insert(unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned());
    }
    if !available_extension_names.contains(Swapchain::name()) {
        debug!(
            "Device {:?} is missing required extension: {:?}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) },
            Swapchain::name()
        );
        return Ok(None);
    }

    let queue_families = scan_queue_families(instance, surface_loader, physical_device, surface)?;

    let has_work_family = best_queue_family_for(
        &queue_families,
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        false,
    )
    .is_some();
    let has_present_family =
        best_queue_family_for(&queue_families, vk::QueueFlags::empty(), true).is_some();

    if !has_work_family || !has_present_family {
        debug!(
            "Device {:?} lacks required queue families (graphics+compute: {}, present: {}).",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) },
            has_work_family,
            has_present_family
        );
        return Ok(None);
    }

    Ok(Some(PhysicalDeviceInfo {
        physical_device,
        properties,
        features,
        memory_properties,
        queue_families,
    }))
}

/// Records capability flags and queue counts for every family on the adapter.
fn scan_queue_families(
    instance: &ash::Instance,
    surface_loader: &SurfaceLoader,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> Result<Vec<QueueFamily>> {
    let properties =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let mut families = Vec::with_capacity(properties.len());

    for (i, family) in properties.iter().enumerate() {
        let index = i as u32;
        let supports_present = unsafe {
            surface_loader.get_physical_device_surface_support(physical_device, index, surface)
        }?;
        families.push(QueueFamily {
            index,
            flags: family.queue_flags,
            queue_count: family.queue_count,
            supports_present,
        });
        debug!(
            "Queue family {}: flags={:?}, count={}, present={}",
            index, family.queue_flags, family.queue_count, supports_present
        );
    }
    Ok(families)
}

/// Picks the queue family supporting the required capabilities with the fewest
/// total capabilities, so dedicated families win over general-purpose ones.
///
/// # Arguments
/// * `families`: Candidate families, as recorded by the capability scan.
/// * `required`: Queue flags the family must support. May be empty when only
///   presentation matters.
/// * `needs_present`: Whether the family must support presentation.
pub fn best_queue_family_for(
    families: &[QueueFamily],
    required: vk::QueueFlags,
    needs_present: bool,
) -> Option<u32> {
    families
        .iter()
        .filter(|f| f.queue_count > 0)
        .filter(|f| f.flags.contains(required))
        .filter(|f| !needs_present || f.supports_present)
        .min_by_key(|f| f.capability_count())
        .map(|f| f.index)
}

/// Finds a supported format from a list of candidates.
///
/// # Arguments
/// * `instance`: Handle to the Vulkan instance.
/// * `physical_device`: Handle to the physical device.
/// * `candidates`: A slice of `vk::Format` candidates to check.
/// * `tiling`: The desired image tiling.
/// * `features`: The required `vk::FormatFeatureFlags`.
pub fn find_supported_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Option<vk::Format> {
    for &format in candidates {
        let props =
            unsafe { instance.get_physical_device_format_properties(physical_device, format) };
        match tiling {
            vk::ImageTiling::LINEAR => {
                if props.linear_tiling_features.contains(features) {
                    return Some(format);
                }
            }
            vk::ImageTiling::OPTIMAL => {
                if props.optimal_tiling_features.contains(features) {
                    return Some(format);
                }
            }
            _ => {
                warn!("Unsupported tiling mode for find_supported_format: {:?}", tiling);
                return None;
            }
        }
    }
    None
}

/// Probes the usual depth-format candidates and returns the first supported one.
pub fn find_depth_format(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    let candidates = [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ];
    find_supported_format(
        instance,
        physical_device,
        &candidates,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
    )
    .ok_or_else(|| VulkanError::UnsupportedFormat("no depth-stencil format available".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, flags: vk::QueueFlags, supports_present: bool) -> QueueFamily {
        QueueFamily { index, flags, queue_count: 1, supports_present }
    }

    #[test]
    fn dedicated_compute_family_beats_general_purpose_one() {
        let families = [
            family(
                0,
                vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                true,
            ),
            family(1, vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false),
        ];
        assert_eq!(best_queue_family_for(&families, vk::QueueFlags::COMPUTE, false), Some(1));
    }

    #[test]
    fn present_requirement_filters_families() {
        let families = [
            family(0, vk::QueueFlags::COMPUTE, false),
            family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
        ];
        assert_eq!(best_queue_family_for(&families, vk::QueueFlags::COMPUTE, true), Some(1));
    }

    #[test]
    fn empty_queue_families_are_skipped() {
        let mut f = family(0, vk::QueueFlags::GRAPHICS, true);
        f.queue_count = 0;
        assert_eq!(best_queue_family_for(&[f], vk::QueueFlags::GRAPHICS, false), None);
    }

    #[test]
    fn no_matching_family_yields_none() {
        let families = [family(0, vk::QueueFlags::TRANSFER, false)];
        assert_eq!(
            best_queue_family_for(&families, vk::QueueFlags::GRAPHICS, false),
            None
        );
    }
}
