//! Per-frame synchronization primitives.

use crate::error::Result;
use ash::vk;
use log::{debug, trace};

/// Binary semaphores linking the stages of one frame:
/// compute signals `compute_complete`, the acquire signals `image_available`,
/// the fullscreen pass waits on both and signals `fullscreen_finished`, the
/// overlay pass (when enabled) signals `overlay_finished`, and present waits
/// on whichever of the last two ran.
///
/// After a frame is abandoned mid-chain (out-of-date acquire) a semaphore may
/// be left signalled; the orchestrator recreates the whole set during the
/// refresh cascade rather than reasoning about which ones are dirty.
pub struct FrameSync {
    device: ash::Device,
    allocation_callbacks: Option<vk::AllocationCallbacks>,
    pub compute_complete: vk::Semaphore,
    pub image_available: vk::Semaphore,
    pub fullscreen_finished: vk::Semaphore,
    pub overlay_finished: vk::Semaphore,
}

impl FrameSync {
    pub fn new(
        device: &ash::Device,
        allocation_callbacks: Option<vk::AllocationCallbacks>,
    ) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let mut semaphores = [vk::Semaphore::null(); 4];
        for (i, slot) in semaphores.iter_mut().enumerate() {
            *slot = match unsafe {
                device.create_semaphore(&create_info, allocation_callbacks.as_ref())
            } {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    unsafe {
                        for &created in &semaphores[..i] {
                            device.destroy_semaphore(created, allocation_callbacks.as_ref());
                        }
                    }
                    return Err(e.into());
                }
            };
        }
        debug!("Frame synchronization semaphores created.");
        Ok(Self {
            device: device.clone(),
            allocation_callbacks,
            compute_complete: semaphores[0],
            image_available: semaphores[1],
            fullscreen_finished: semaphores[2],
            overlay_finished: semaphores[3],
        })
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device
                .destroy_semaphore(self.compute_complete, self.allocation_callbacks.as_ref());
            self.device
                .destroy_semaphore(self.image_available, self.allocation_callbacks.as_ref());
            self.device
                .destroy_semaphore(self.fullscreen_finished, self.allocation_callbacks.as_ref());
            self.device
                .destroy_semaphore(self.overlay_finished, self.allocation_callbacks.as_ref());
        }
        trace!("Frame synchronization semaphores destroyed.");
    }
}
