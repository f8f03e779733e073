// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan context bootstrap.
//!
//! [`Context::new`] turns an [`InitOptions`] bundle into an instance, a
//! selected physical device, a logical device with its queues and, for each
//! surface provider, a negotiated swapchain with image views. Everything it
//! creates is torn down in reverse order when the context is dropped, or
//! when a later step fails.

#[cfg(feature = "vma")]
pub mod allocator;
pub mod config;
pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod handle;
pub mod negotiate;
pub mod options;
pub mod physical;
pub mod present;
pub mod renderpass;
pub mod surface;
pub mod swapchain;

pub use ash;

pub use config::{ConfigError, StartupConfig};
pub use context::Context;
pub use device::QueueIndexHandle;
pub use error::{ExtensionScope, Result, StartupError};
pub use handle::{CreateHandle, Handle, HandleKind};
pub use options::InitOptions;
pub use physical::{
    AnyGraphicsDevice, DefaultSelection, DeviceCandidate, DeviceSelection, PhysicalDeviceInfo,
    QueueRole,
};
pub use renderpass::{create_framebuffers, create_renderpass, RenderpassData};
pub use surface::{HeadlessSurface, SurfaceProvider, SurfaceRegistry, WindowSurface};
pub use swapchain::{SurfaceSwapchain, SwapchainDetails, SwapchainSupport};
