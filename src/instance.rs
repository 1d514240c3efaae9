use crate::alloc_callbacks::HostAllocationTracker;
use crate::error::{Result, VulkanError};
use crate::surface::SurfaceProvider;
use ash::extensions::ext::DebugUtils;
use ash::vk::{self, make_api_version};
use log::{error, info, trace, warn};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

const ENGINE_NAME: &str = "Lumen Vulkan Renderer";
const VK_LAYER_KHRONOS_VALIDATION_NAME: &str = "VK_LAYER_KHRONOS_validation";

/// Structure holding the Vulkan instance and related objects.
pub struct VulkanInstance {
    entry: ash::Entry,
    instance: ash::Instance,
    api_version: u32,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
    debug_utils_loader: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanInstance {
    /// Creates a new `VulkanInstance`.
    ///
    /// Loads the Vulkan library, creates an instance with the extensions the
    /// surface provider requires, and sets up a debug messenger when validation
    /// is enabled and the Khronos validation layer is present. A missing
    /// validation layer is downgraded to a warning; a missing surface extension
    /// is fatal.
    ///
    /// # Arguments
    /// * `app_name`: Application name reported to the driver.
    /// * `enable_validation`: Whether to request the validation layer.
    /// * `surface_provider`: Supplies the platform surface extensions.
    /// * `host_tracker`: Optional host-allocation instrumentation; when given,
    ///   its callbacks are used for instance creation and destruction, so it
    ///   must outlive this instance.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        surface_provider: &dyn SurfaceProvider,
        host_tracker: Option<&HostAllocationTracker>,
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| VulkanError::InitializationError(format!("Failed to load Vulkan entry: {}", e)))?;
        let api_version_to_use = vk::API_VERSION_1_1;
        let allocation_callbacks = host_tracker.map(|t| t.callbacks());

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationError(format!("Invalid application name: {}", e)))?;
        let engine_name_cstr = CString::new(ENGINE_NAME)
            .map_err(|e| VulkanError::InitializationError(format!("Invalid engine name: {}", e)))?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(make_api_version(0, 0, 1, 0))
            .api_version(api_version_to_use);

        let mut required_extensions: Vec<&'static CStr> = surface_provider.required_extensions()?;
        if enable_validation {
            required_extensions.push(DebugUtils::name());
        }

        let available_extensions = entry
            .enumerate_instance_extension_properties(None)
            .map_err(VulkanError::from)?;

        for &required in &required_extensions {
            let found = available_extensions.iter().any(|ext| {
                let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
                name == required
            });
            if !found {
                return Err(VulkanError::MissingExtension(
                    required.to_string_lossy().into_owned(),
                ));
            }
        }
        info!("Required instance extensions are available: {:?}", required_extensions);

        let required_extension_ptrs: Vec<*const c_char> =
            required_extensions.iter().map(|s| s.as_ptr()).collect();

        let mut enabled_layer_names: Vec<*const c_char> = Vec::new();
        let validation_layer_name_cstr = CString::new(VK_LAYER_KHRONOS_VALIDATION_NAME)
            .map_err(|e| VulkanError::InitializationError(format!("Invalid layer name: {}", e)))?;

        if enable_validation {
            let available_layers =
                entry.enumerate_instance_layer_properties().map_err(VulkanError::from)?;

            let validation_layer_available = available_layers.iter().any(|layer| {
                unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }
                    .to_str()
                    .map(|name| name == VK_LAYER_KHRONOS_VALIDATION_NAME)
                    .unwrap_or(false)
            });

            if validation_layer_available {
                info!("Validation layer '{}' is available.", VK_LAYER_KHRONOS_VALIDATION_NAME);
                enabled_layer_names.push(validation_layer_name_cstr.as_ptr());
            } else {
                warn!(
                    "Validation layer '{}' requested but not available.",
                    VK_LAYER_KHRONOS_VALIDATION_NAME
                );
            }
        }

        let mut instance_create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&required_extension_ptrs);

        if !enabled_layer_names.is_empty() {
            instance_create_info = instance_create_info.enabled_layer_names(&enabled_layer_names);
        }

        let instance = unsafe {
            entry.create_instance(&instance_create_info, allocation_callbacks.as_ref())
        }
        .map_err(|e| VulkanError::InitializationError(format!("Failed to create Vulkan instance: {}", e)))?;
        info!("Vulkan instance created successfully.");

        let mut debug_utils_loader = None;
        let mut debug_messenger = None;

        if !enabled_layer_names.is_empty() {
            let loader = DebugUtils::new(&entry, &instance);
            let messenger_create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_utils_callback));

            match unsafe { loader.create_debug_utils_messenger(&messenger_create_info, None) } {
                Ok(messenger) => {
                    info!("Successfully created Vulkan debug messenger.");
                    debug_messenger = Some(messenger);
                }
                Err(e) => {
                    // The messenger is diagnostics only; startup continues without it.
                    error!("Failed to create Vulkan debug messenger: {}", e);
                }
            }
            debug_utils_loader = Some(loader);
        }

        Ok(Self {
            entry,
            instance,
            api_version: api_version_to_use,
            allocation_callbacks,
            debug_utils_loader,
            debug_messenger,
        })
    }

    /// Returns the Vulkan API version used by the instance.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Getter for the `ash::Instance`, needed for other Vulkan operations.
    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    /// Getter for the `ash::Entry`, needed for surface operations.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Allocation callbacks the instance was created with, if any.
    pub fn allocation_callbacks(&self) -> Option<&vk::AllocationCallbacks> {
        self.allocation_callbacks.as_ref()
    }

    /// Destroys the Vulkan instance and related objects.
    pub fn destroy(&mut self) {
        unsafe {
            if let (Some(loader), Some(messenger)) = (&self.debug_utils_loader, self.debug_messenger)
            {
                loader.destroy_debug_utils_messenger(messenger, None);
                info!("Vulkan debug messenger destroyed.");
            }
            self.debug_messenger = None;
            self.instance.destroy_instance(self.allocation_callbacks.as_ref());
            info!("Vulkan instance destroyed.");
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Vulkan debug callback function.
///
/// This function is called by the Vulkan validation layers to report messages.
unsafe extern "system" fn vulkan_debug_utils_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);
    let severity_str = format!("{:?}", message_severity).to_lowercase();
    let type_str = format!("{:?}", message_type).to_lowercase();

    let log_message = format!("[Vulkan][{}][{}] {:?}", severity_str, type_str, message);

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("{}", log_message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("{}", log_message);
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        info!("{}", log_message);
    } else {
        trace!("{}", log_message);
    }

    vk::FALSE
}
