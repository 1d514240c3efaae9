//! Frame orchestration: one compute dispatch, one fullscreen pass, an
//! optional overlay pass and the present, chained by binary semaphores.
//!
//! The chain per frame is fixed: compute signals `compute_complete`, the
//! acquire signals `image_available`, the fullscreen pass waits on both and
//! signals `fullscreen_finished`, the overlay (when enabled) waits on that
//! and signals `overlay_finished`, and present waits on whichever pass ran
//! last. The device is drained at the end of every frame, which keeps
//! resource lifetimes trivial at the cost of pipelining; see `FrameSync` for
//! why the semaphores are recreated on refresh.

use crate::compute::{ComputeTarget, ComputeTargetDescriptor, ContentUpdate};
use crate::error::{Result, VulkanError};
use crate::fullscreen::FullscreenRender;
use crate::kernel::Kernel;
use crate::overlay::{DrawList, Overlay};
use crate::presentation::Presentation;
use crate::surface::SurfaceProvider;
use crate::sync::FrameSync;
use ash::vk;
use log::{debug, info, warn};

/// The semaphores of one frame, named for plan inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSemaphore {
    ComputeComplete,
    ImageAvailable,
    FullscreenFinished,
    OverlayFinished,
}

/// Which semaphore each submission waits on and signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub fullscreen_waits: [FrameSemaphore; 2],
    pub fullscreen_signals: FrameSemaphore,
    pub overlay_wait: Option<FrameSemaphore>,
    pub overlay_signals: Option<FrameSemaphore>,
    pub present_waits: FrameSemaphore,
}

/// The semaphore pairing for a frame. Pure; exists so the chain can be
/// checked without a device.
pub fn frame_submission_plan(overlay_enabled: bool) -> SubmissionPlan {
    SubmissionPlan {
        fullscreen_waits: [FrameSemaphore::ImageAvailable, FrameSemaphore::ComputeComplete],
        fullscreen_signals: FrameSemaphore::FullscreenFinished,
        overlay_wait: overlay_enabled.then_some(FrameSemaphore::FullscreenFinished),
        overlay_signals: overlay_enabled.then_some(FrameSemaphore::OverlayFinished),
        present_waits: if overlay_enabled {
            FrameSemaphore::OverlayFinished
        } else {
            FrameSemaphore::FullscreenFinished
        },
    }
}

/// Everything needed to bring the renderer up.
pub struct RendererDescriptor {
    pub app_name: String,
    pub enable_validation: bool,
    pub track_host_allocations: bool,
    pub width: u32,
    pub height: u32,
    pub compute: ComputeTargetDescriptor,
    pub fullscreen_vertex_shader: Vec<u32>,
    pub fullscreen_fragment_shader: Vec<u32>,
    pub overlay: Option<OverlayDescriptor>,
}

pub struct OverlayDescriptor {
    pub vertex_shader: Vec<u32>,
    pub fragment_shader: Vec<u32>,
    pub atlas_width: u32,
    pub atlas_height: u32,
    pub atlas_pixels: Vec<u8>,
}

/// Per-frame input from the caller.
pub struct FrameInput<'a> {
    pub compute_update: ContentUpdate,
    /// New target viewport for the fullscreen pass, if it moved.
    pub viewport: Option<vk::Viewport>,
    /// Overlay geometry. Ignored when the renderer was built without an
    /// overlay; an empty pass still runs when the overlay exists but no list
    /// is supplied, to keep the semaphore chain intact.
    pub overlay: Option<&'a DrawList>,
}

/// Owns the whole stack. Fields drop in declaration order, so everything
/// that borrows device-level state goes before the kernel.
pub struct Renderer {
    overlay: Option<Overlay>,
    fullscreen: FullscreenRender,
    compute: ComputeTarget,
    presentation: Presentation,
    frame_sync: FrameSync,
    present_queue: vk::Queue,
    surface_size: (u32, u32),
    refresh_pending: bool,
    kernel: Kernel,
}

impl Renderer {
    pub fn new(surface_provider: &dyn SurfaceProvider, descriptor: RendererDescriptor) -> Result<Self> {
        let kernel = Kernel::new(
            &descriptor.app_name,
            descriptor.enable_validation,
            surface_provider,
            descriptor.track_host_allocations,
        )?;

        let mut presentation = Presentation::new(&kernel)?;
        presentation.configure(&[kernel.primary_work_queue(), kernel.present_queue()])?;
        presentation.create(descriptor.width, descriptor.height)?;

        let compute = ComputeTarget::new(kernel.primary_context()?, descriptor.compute)?;

        let mut fullscreen = FullscreenRender::new(
            kernel.primary_context()?,
            descriptor.fullscreen_vertex_shader,
            descriptor.fullscreen_fragment_shader,
        )?;
        fullscreen.create(&presentation, compute.output()?, None)?;

        let overlay = match descriptor.overlay {
            Some(overlay_descriptor) => {
                let mut overlay = Overlay::new(
                    kernel.primary_context()?,
                    overlay_descriptor.vertex_shader,
                    overlay_descriptor.fragment_shader,
                    overlay_descriptor.atlas_width,
                    overlay_descriptor.atlas_height,
                    &overlay_descriptor.atlas_pixels,
                )?;
                overlay.create(&presentation)?;
                Some(overlay)
            }
            None => None,
        };

        let frame_sync = FrameSync::new(
            kernel.device().raw(),
            kernel.instance().allocation_callbacks().copied(),
        )?;
        let present_queue = kernel.device().queue(kernel.present_queue().family_index)?;

        info!(
            "Renderer initialized ({}x{}, overlay {}).",
            descriptor.width,
            descriptor.height,
            if overlay.is_some() { "enabled" } else { "disabled" }
        );
        Ok(Self {
            overlay,
            fullscreen,
            compute,
            presentation,
            frame_sync,
            present_queue,
            surface_size: (descriptor.width, descriptor.height),
            refresh_pending: false,
            kernel,
        })
    }

    /// Notes a new surface size. The chain is rebuilt at the start of the
    /// next frame rather than immediately.
    pub fn resize(&mut self, width: u32, height: u32) {
        if (width, height) != self.surface_size {
            debug!("Surface resize requested: {}x{}.", width, height);
            self.surface_size = (width, height);
            self.refresh_pending = true;
        }
    }

    /// Runs one frame: update and dispatch compute, acquire, fullscreen pass,
    /// optional overlay pass, present, then drain the device.
    ///
    /// An out-of-date or lost surface anywhere in the chain skips or finishes
    /// the frame and schedules a refresh for the next call instead of failing.
    pub fn draw_frame(&mut self, input: FrameInput<'_>) -> Result<()> {
        if self.refresh_pending {
            self.refresh()?;
        }

        self.compute.update(&input.compute_update)?;
        self.compute.enqueue(self.frame_sync.compute_complete)?;

        let image_index = match self.presentation.next_image(self.frame_sync.image_available) {
            Ok(index) => index,
            Err(VulkanError::SwapchainOutOfDate) | Err(VulkanError::SurfaceLost) => {
                // compute_complete was signalled but nothing will wait on it;
                // the refresh recreates the semaphores once the device drains.
                warn!("Swapchain unusable at acquire; skipping frame.");
                unsafe { self.kernel.device().raw().device_wait_idle() }?;
                self.refresh_pending = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(viewport) = input.viewport {
            self.fullscreen.set_viewport(viewport)?;
        }

        self.fullscreen.submit(
            image_index,
            &[
                (self.frame_sync.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
                (self.frame_sync.compute_complete, vk::PipelineStageFlags::FRAGMENT_SHADER),
            ],
            self.frame_sync.fullscreen_finished,
        )?;

        let present_wait = match &mut self.overlay {
            Some(overlay) => {
                let empty = DrawList::default();
                let draw_list = input.overlay.unwrap_or(&empty);
                overlay.submit(
                    image_index,
                    draw_list,
                    self.frame_sync.fullscreen_finished,
                    self.frame_sync.overlay_finished,
                )?;
                self.frame_sync.overlay_finished
            }
            None => self.frame_sync.fullscreen_finished,
        };

        match self.presentation.present(self.present_queue, image_index, present_wait) {
            Ok(()) => {}
            Err(VulkanError::SwapchainOutOfDate) | Err(VulkanError::SurfaceLost) => {
                warn!("Swapchain unusable at present; scheduling refresh.");
                self.refresh_pending = true;
            }
            Err(e) => return Err(e),
        }

        unsafe { self.kernel.device().raw().device_wait_idle() }?;
        Ok(())
    }

    /// Rebuilds the swapchain-dependent stack in dependency order:
    /// presentation, compute, fullscreen, overlay, then fresh semaphores.
    fn refresh(&mut self) -> Result<()> {
        let (width, height) = self.surface_size;
        self.presentation.refresh(width, height)?;

        let surface_extent = self.presentation.extent();
        if surface_extent != self.compute.extent() {
            self.compute.recreate(surface_extent.width, surface_extent.height)?;
        } else {
            self.compute.refresh()?;
        }

        self.fullscreen.refresh(&self.presentation, self.compute.output()?)?;
        if let Some(overlay) = &mut self.overlay {
            overlay.refresh(&self.presentation)?;
        }

        // An abandoned frame can leave a binary semaphore signalled; replace
        // the whole set now that the device is idle.
        self.frame_sync = FrameSync::new(
            self.kernel.device().raw(),
            self.kernel.instance().allocation_callbacks().copied(),
        )?;

        self.refresh_pending = false;
        info!("Renderer refreshed at {}x{}.", surface_extent.width, surface_extent.height);
        Ok(())
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn compute(&mut self) -> &mut ComputeTarget {
        &mut self.compute
    }

    /// Access the overlay, e.g. to register user textures.
    pub fn overlay(&mut self) -> Option<&mut Overlay> {
        self.overlay.as_mut()
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fullscreen_waits_on_acquire_and_compute() {
        let plan = frame_submission_plan(false);
        assert!(plan.fullscreen_waits.contains(&FrameSemaphore::ImageAvailable));
        assert!(plan.fullscreen_waits.contains(&FrameSemaphore::ComputeComplete));
    }

    #[test]
    fn present_follows_the_last_pass() {
        assert_eq!(frame_submission_plan(false).present_waits, FrameSemaphore::FullscreenFinished);
        assert_eq!(frame_submission_plan(true).present_waits, FrameSemaphore::OverlayFinished);
    }

    #[test]
    fn every_signal_is_waited_exactly_once() {
        for overlay_enabled in [false, true] {
            let plan = frame_submission_plan(overlay_enabled);
            let mut signals = vec![
                FrameSemaphore::ComputeComplete,
                FrameSemaphore::ImageAvailable,
                plan.fullscreen_signals,
            ];
            signals.extend(plan.overlay_signals);

            let mut waits: Vec<FrameSemaphore> = plan.fullscreen_waits.to_vec();
            waits.extend(plan.overlay_wait);
            waits.push(plan.present_waits);

            signals.sort_by_key(|s| *s as u8);
            waits.sort_by_key(|s| *s as u8);
            assert_eq!(signals, waits, "overlay_enabled={}", overlay_enabled);
        }
    }

    #[test]
    fn overlay_pass_waits_on_fullscreen() {
        let plan = frame_submission_plan(true);
        assert_eq!(plan.overlay_wait, Some(FrameSemaphore::FullscreenFinished));
        assert_eq!(plan.overlay_signals, Some(FrameSemaphore::OverlayFinished));
    }
}
