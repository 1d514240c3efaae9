//! Compute-driven Vulkan frame orchestration.
//!
//! The crate brings up a Vulkan device behind a platform-neutral
//! [`SurfaceProvider`], runs a compute shader into a storage image every
//! frame, presents that image with a fullscreen triangle pass and optionally
//! composites an immediate-mode overlay on top, all chained with binary
//! semaphores and rebuilt as a cascade when the swapchain goes stale.
//!
//! Most applications only touch [`Renderer`]: build a
//! [`RendererDescriptor`], call [`Renderer::new`] with a surface provider,
//! then call [`Renderer::draw_frame`] once per frame and
//! [`Renderer::resize`] when the window changes. The lower layers (`Kernel`,
//! `Presentation`, `ComputeTarget`, ...) are public for embedders that need
//! to assemble the chain differently.
//!
//! [`SurfaceProvider`]: surface::SurfaceProvider
//! [`Renderer`]: renderer::Renderer
//! [`RendererDescriptor`]: renderer::RendererDescriptor
//! [`Renderer::new`]: renderer::Renderer::new
//! [`Renderer::draw_frame`]: renderer::Renderer::draw_frame
//! [`Renderer::resize`]: renderer::Renderer::resize

pub mod alloc_callbacks;
pub mod allocator;
pub mod buffer;
pub mod compute;
pub mod context;
pub mod device;
pub mod error;
pub mod fullscreen;
pub mod instance;
pub mod kernel;
pub mod overlay;
pub mod physical_device;
pub mod presentation;
pub mod renderer;
pub mod shader;
pub mod slot;
pub mod surface;
pub mod sync;
pub mod texture;

pub use alloc_callbacks::{AllocationStats, HostAllocationTracker};
pub use compute::{ComputeTarget, ComputeTargetDescriptor, ContentUpdate};
pub use context::Context;
pub use device::QueueIdentifier;
pub use error::{Result, VulkanError};
pub use fullscreen::FullscreenRender;
pub use kernel::Kernel;
pub use overlay::{DrawCommand, DrawList, Overlay, OverlayTexture, OverlayVertex};
pub use presentation::Presentation;
pub use renderer::{
    FrameInput, FrameSemaphore, OverlayDescriptor, Renderer, RendererDescriptor,
};
pub use surface::{SurfaceProvider, WindowHandleSurface};
pub use texture::Texture;
