// SPDX-License-Identifier: CEPL-1.0
//! Surface providers and the surface-id registry.

use std::collections::HashSet;
use std::ffi::{CStr, CString};

use ash::ext::headless_surface;
use ash::khr::surface;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::debug;

use crate::error::{Result, StartupError};
use crate::swapchain::{default_format_policy, SwapchainDetails, SwapchainSupport};

/// One presentable target, plugged in by the windowing side.
///
/// The context adopts the returned `vk::SurfaceKHR` and destroys it before
/// the instance; the provider itself is dropped right after its surface.
pub trait SurfaceProvider {
    /// Unique among the providers handed to one context.
    fn id(&self) -> &str;

    /// Instance extensions needed before [`create_surface`](Self::create_surface)
    /// can succeed.
    fn required_instance_extensions(&self) -> Result<Vec<CString>>;

    /// # Safety
    /// `instance` must have been created from `entry` with every extension
    /// from `required_instance_extensions` enabled.
    unsafe fn create_surface(
        &mut self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Size used when the surface leaves the extent to the application.
    fn window_extent(&self) -> vk::Extent2D;

    fn set_window_extent(&mut self, extent: vk::Extent2D);

    /// Picks the swapchain tuple from what the device supports.
    fn select_format(
        &self,
        support: &SwapchainSupport,
        window: vk::Extent2D,
    ) -> Result<SwapchainDetails> {
        default_format_policy(self.id(), support, window)
    }
}

/// Ids already claimed by a context under construction.
#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    ids: HashSet<String>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `id`; a second claim of the same id fails.
    pub fn register(&mut self, id: &str) -> Result<()> {
        if !self.ids.insert(id.to_owned()) {
            return Err(StartupError::DuplicateSurfaceId(id.to_owned()));
        }
        debug!(surface = id, "surface id registered");
        Ok(())
    }

    pub fn release(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A window surface created through `ash-window`.
#[derive(Debug)]
pub struct WindowSurface {
    id: String,
    display: RawDisplayHandle,
    window: RawWindowHandle,
    extent: vk::Extent2D,
}

impl WindowSurface {
    /// # Safety
    /// The window behind `target` must outlive the context this provider is
    /// handed to.
    pub unsafe fn new<W>(id: impl Into<String>, target: &W, extent: vk::Extent2D) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + ?Sized,
    {
        let id = id.into();
        let fail = |reason: String| StartupError::Surface {
            id: id.clone(),
            reason,
        };
        let display = target
            .display_handle()
            .map_err(|e| fail(e.to_string()))?
            .as_raw();
        let window = target
            .window_handle()
            .map_err(|e| fail(e.to_string()))?
            .as_raw();
        Ok(Self {
            id,
            display,
            window,
            extent,
        })
    }
}

impl SurfaceProvider for WindowSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn required_instance_extensions(&self) -> Result<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.display)
            .map_err(StartupError::vulkan("enumerate_required_extensions"))?;
        // SAFETY: ash-window hands out pointers to static NUL-terminated names.
        Ok(names
            .iter()
            .map(|&p| unsafe { CStr::from_ptr(p) }.to_owned())
            .collect())
    }

    unsafe fn create_surface(
        &mut self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        unsafe { ash_window::create_surface(entry, instance, self.display, self.window, None) }
            .map_err(|result| StartupError::NativeCreateFailed {
                object: "window surface",
                result,
            })
    }

    fn window_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }
}

/// An offscreen surface from `VK_EXT_headless_surface`, for CI and tests.
#[derive(Clone, Debug)]
pub struct HeadlessSurface {
    id: String,
    extent: vk::Extent2D,
}

impl HeadlessSurface {
    pub fn new(id: impl Into<String>, extent: vk::Extent2D) -> Self {
        Self {
            id: id.into(),
            extent,
        }
    }
}

impl SurfaceProvider for HeadlessSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn required_instance_extensions(&self) -> Result<Vec<CString>> {
        Ok(vec![surface::NAME.to_owned(), headless_surface::NAME.to_owned()])
    }

    unsafe fn create_surface(
        &mut self,
        entry: &ash::Entry,
        instance: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let loader = headless_surface::Instance::new(entry, instance);
        let info = vk::HeadlessSurfaceCreateInfoEXT::default();
        unsafe { loader.create_headless_surface(&info, None) }.map_err(|result| {
            StartupError::NativeCreateFailed {
                object: "headless surface",
                result,
            }
        })
    }

    fn window_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn set_window_extent(&mut self, extent: vk::Extent2D) {
        self.extent = extent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_rejects_duplicates() {
        let mut reg = SurfaceRegistry::new();
        reg.register("main").unwrap();
        reg.register("overlay").unwrap();
        match reg.register("main") {
            Err(StartupError::DuplicateSurfaceId(id)) => assert_eq!(id, "main"),
            other => panic!("expected DuplicateSurfaceId, got {other:?}"),
        }
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn released_id_can_be_claimed_again() {
        let mut reg = SurfaceRegistry::new();
        reg.register("main").unwrap();
        assert!(reg.release("main"));
        assert!(!reg.contains("main"));
        reg.register("main").unwrap();
    }

    #[test]
    fn headless_requests_surface_extensions() {
        let s = HeadlessSurface::new("ci", vk::Extent2D { width: 64, height: 64 });
        let exts = s.required_instance_extensions().unwrap();
        assert_eq!(exts, vec![surface::NAME.to_owned(), headless_surface::NAME.to_owned()]);
        assert_eq!(s.id(), "ci");
    }
}
