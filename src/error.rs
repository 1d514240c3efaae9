//! Defines the custom error type and `Result` alias for the renderer.
//!
//! This module centralizes error handling for Vulkan-specific operations
//! (including the `vk-mem` allocator, which reports plain `vk::Result`
//! codes), I/O errors (e.g., when loading shader binaries), and the
//! renderer's own invariant violations such as lifecycle state-machine
//! misuse.

use ash::vk;
use std::fmt;

/// Custom error type for the renderer.
///
/// Encapsulates direct Vulkan API errors (`vk::Result`), standard I/O
/// errors, and specific error conditions encountered during setup or
/// per-frame operation.
#[derive(Debug)]
pub enum VulkanError {
    /// An error originating directly from a Vulkan API call.
    VkResult(vk::Result),
    /// A standard I/O error, typically from loading a shader binary.
    IoError(std::io::Error),
    /// An error that occurred during the general initialization phase of the
    /// renderer or a component.
    InitializationError(String),
    /// An error that occurred during the creation of a specific Vulkan resource.
    ResourceCreationError {
        /// The type of resource that failed to be created (e.g., "Buffer", "Swapchain").
        resource_type: String,
        /// A message detailing the cause of the failure.
        message: String,
    },
    /// A required Vulkan instance or device extension was not found.
    MissingExtension(String),
    /// No suitable Vulkan physical device (GPU) could be found.
    NoSuitablePhysicalDevice,
    /// A required queue family (e.g., graphics, present, compute) could not be
    /// found on the selected physical device.
    QueueFamilyNotFound(String),
    /// The Vulkan surface has been lost and needs to be recreated.
    SurfaceLost,
    /// The swapchain is no longer compatible with the surface (e.g., after a
    /// window resize) and needs to be recreated.
    SwapchainOutOfDate,
    /// A requested format (e.g., for the depth buffer or surface) is not
    /// supported by the physical device.
    UnsupportedFormat(String),
    /// An error occurred while loading or validating a shader module.
    ShaderLoadingError(String),
    /// An error occurred during the creation of a graphics or compute pipeline.
    PipelineCreationError(String),
    /// A resource lifecycle operation was attempted in the wrong state, such as
    /// installing into an occupied slot or using a resource that was never created.
    InvalidState(String),
    /// A push-constant byte span exceeds the size the pipeline layout was built for.
    PushConstantTooLarge {
        /// The size of the rejected span, in bytes.
        size: usize,
        /// The maximum size accepted, in bytes.
        max: usize,
    },
}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulkanError::VkResult(res) => write!(f, "Vulkan API Error: {}", res),
            VulkanError::IoError(err) => write!(f, "I/O Error: {}", err),
            VulkanError::InitializationError(msg) => write!(f, "Initialization Error: {}", msg),
            VulkanError::ResourceCreationError { resource_type, message } => {
                write!(f, "Failed to create resource '{}': {}", resource_type, message)
            }
            VulkanError::MissingExtension(ext) => {
                write!(f, "Missing required Vulkan instance/device extension: {}", ext)
            }
            VulkanError::NoSuitablePhysicalDevice => write!(f, "No suitable physical device found"),
            VulkanError::QueueFamilyNotFound(q_type) => {
                write!(f, "Required queue family not found: {}", q_type)
            }
            VulkanError::SurfaceLost => write!(f, "Vulkan surface lost, needs recreation."),
            VulkanError::SwapchainOutOfDate => {
                write!(f, "Vulkan swapchain is out of date, needs recreation.")
            }
            VulkanError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            VulkanError::ShaderLoadingError(msg) => write!(f, "Shader loading error: {}", msg),
            VulkanError::PipelineCreationError(msg) => write!(f, "Pipeline creation error: {}", msg),
            VulkanError::InvalidState(msg) => write!(f, "Invalid resource state: {}", msg),
            VulkanError::PushConstantTooLarge { size, max } => {
                write!(f, "Push constant span of {} bytes exceeds the {} byte limit", size, max)
            }
        }
    }
}

impl std::error::Error for VulkanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VulkanError::IoError(err) => Some(err),
            // vk::Result does not implement std::error::Error directly,
            // but its Display impl provides a textual representation.
            VulkanError::VkResult(_) => None,
            _ => None,
        }
    }
}

impl From<vk::Result> for VulkanError {
    /// Converts a raw `vk::Result` into a `VulkanError`.
    ///
    /// Special cases `vk::Result::ERROR_OUT_OF_DATE_KHR` and
    /// `vk::Result::ERROR_SURFACE_LOST_KHR` to their more specific variants so
    /// the orchestrator can distinguish recoverable-by-refresh conditions from
    /// fatal ones. Other values are wrapped in `VulkanError::VkResult`.
    fn from(err: vk::Result) -> Self {
        match err {
            vk::Result::ERROR_OUT_OF_DATE_KHR => VulkanError::SwapchainOutOfDate,
            vk::Result::ERROR_SURFACE_LOST_KHR => VulkanError::SurfaceLost,
            _ => VulkanError::VkResult(err),
        }
    }
}

impl From<std::io::Error> for VulkanError {
    fn from(err: std::io::Error) -> Self {
        VulkanError::IoError(err)
    }
}

/// A `Result` type alias used throughout the renderer,
/// defaulting the error type to `VulkanError`.
pub type Result<T, E = VulkanError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_date_maps_to_swapchain_out_of_date() {
        let err: VulkanError = vk::Result::ERROR_OUT_OF_DATE_KHR.into();
        assert!(matches!(err, VulkanError::SwapchainOutOfDate));
    }

    #[test]
    fn surface_lost_maps_to_surface_lost() {
        let err: VulkanError = vk::Result::ERROR_SURFACE_LOST_KHR.into();
        assert!(matches!(err, VulkanError::SurfaceLost));
    }

    #[test]
    fn other_results_are_wrapped() {
        let err: VulkanError = vk::Result::ERROR_DEVICE_LOST.into();
        match err {
            VulkanError::VkResult(res) => assert_eq!(res, vk::Result::ERROR_DEVICE_LOST),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
