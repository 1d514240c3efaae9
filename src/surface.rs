//! Window-system integration behind a strategy trait.
//!
//! Rather than branching on the target platform, the renderer takes a
//! `SurfaceProvider` at construction. The provider names the instance
//! extensions it needs and creates the `vk::SurfaceKHR` once the instance
//! exists. `WindowHandleSurface` covers every platform `raw-window-handle`
//! knows about via `ash-window`; embedders with exotic surfaces implement the
//! trait themselves.

use crate::error::{Result, VulkanError};
use ash::vk;
use log::{debug, info};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::CStr;

/// Strategy for obtaining a presentable surface.
pub trait SurfaceProvider {
    /// Instance extensions that must be enabled for `create_surface` to work.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Creates the surface. Called once per instance; the caller owns the
    /// returned handle and destroys it before the instance.
    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;
}

/// `SurfaceProvider` backed by raw window handles from the platform layer.
pub struct WindowHandleSurface {
    display_handle: RawDisplayHandle,
    window_handle: RawWindowHandle,
}

impl WindowHandleSurface {
    pub fn new(display_handle: RawDisplayHandle, window_handle: RawWindowHandle) -> Self {
        Self { display_handle, window_handle }
    }
}

impl SurfaceProvider for WindowHandleSurface {
    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let names = ash_window::enumerate_required_extensions(self.display_handle)
            .map_err(VulkanError::from)?;
        // ash-window hands back pointers into static extension-name tables.
        let names: Vec<&'static CStr> =
            names.iter().map(|&ptr| unsafe { CStr::from_ptr(ptr) }).collect();
        debug!("Surface provider requires instance extensions: {:?}", names);
        Ok(names)
    }

    fn create_surface(
        &self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.display_handle,
                self.window_handle,
                None,
            )
        }?;
        info!("Vulkan surface created from window handle: {:?}", surface);
        Ok(surface)
    }
}
