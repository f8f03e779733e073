// SPDX-License-Identifier: CEPL-1.0
//! Single-owner wrapper for native Vulkan objects.
//!
//! A [`Handle`] holds one raw object together with whatever it needs to
//! destroy it (its parent device, the extension loader, ...). The empty
//! state is `None`, so a default handle, a handle that was `take`n from,
//! and a handle that was already destroyed all drop as no-ops.

use std::fmt;

use ash::prelude::VkResult;
use ash::vk;
use ash::{ext::debug_utils, khr::surface, khr::swapchain};
use tracing::trace;

use crate::error::{Result, StartupError};

/// Describes how one kind of native object is torn down.
pub trait HandleKind {
    type Raw;
    type Owner;
    /// Shown in logs and in `StartupError::NativeCreateFailed`.
    const NAME: &'static str;

    /// # Safety
    /// `raw` must have been created through `owner` and must no longer be
    /// in use by the device.
    unsafe fn destroy(owner: &Self::Owner, raw: Self::Raw);
}

/// Kinds that the wrapper can create itself.
pub trait CreateHandle: HandleKind {
    type Args<'a>;

    /// # Safety
    /// `args` must describe a valid create call for `owner`.
    unsafe fn create(owner: &Self::Owner, args: Self::Args<'_>) -> VkResult<Self::Raw>;
}

pub struct Handle<K: HandleKind> {
    live: Option<(K::Raw, K::Owner)>,
}

impl<K: HandleKind> Handle<K> {
    pub const fn empty() -> Self {
        Self { live: None }
    }

    /// Takes ownership of an object created elsewhere.
    ///
    /// # Safety
    /// `raw` must belong to `owner` and nothing else may destroy it.
    pub unsafe fn adopt(owner: K::Owner, raw: K::Raw) -> Self {
        trace!(object = K::NAME, "adopted");
        Self {
            live: Some((raw, owner)),
        }
    }

    pub fn get(&self) -> Option<&K::Raw> {
        self.live.as_ref().map(|(raw, _)| raw)
    }

    pub fn owner(&self) -> Option<&K::Owner> {
        self.live.as_ref().map(|(_, owner)| owner)
    }

    /// Like [`get`](Self::get) but an empty handle is an error.
    pub fn live(&self) -> Result<&K::Raw> {
        self.get().ok_or(StartupError::EmptyHandle(K::NAME))
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_none()
    }

    /// Moves the object out, leaving `self` empty.
    pub fn take(&mut self) -> Self {
        Self {
            live: self.live.take(),
        }
    }

    /// Destroys the current object (if any), then owns `next`.
    pub fn replace(&mut self, mut next: Self) {
        self.destroy();
        self.live = next.live.take();
    }

    /// Idempotent.
    pub fn destroy(&mut self) {
        if let Some((raw, owner)) = self.live.take() {
            // SAFETY: `create`/`adopt` established that `raw` belongs to
            // `owner`, and taking it out of `live` makes this the only
            // destroy call it will ever see.
            unsafe { K::destroy(&owner, raw) };
            trace!(object = K::NAME, "destroyed");
        }
    }
}

impl<K: CreateHandle> Handle<K> {
    /// # Safety
    /// See [`CreateHandle::create`].
    pub unsafe fn create(owner: K::Owner, args: K::Args<'_>) -> Result<Self> {
        let raw = unsafe { K::create(&owner, args) }.map_err(|result| {
            StartupError::NativeCreateFailed {
                object: K::NAME,
                result,
            }
        })?;
        trace!(object = K::NAME, "created");
        Ok(Self {
            live: Some((raw, owner)),
        })
    }
}

impl<K> Handle<K>
where
    K: HandleKind,
    K::Raw: vk::Handle + Copy,
{
    /// The raw handle, or `VK_NULL_HANDLE` when empty.
    pub fn raw(&self) -> K::Raw {
        match self.get() {
            Some(raw) => *raw,
            None => <K::Raw as vk::Handle>::from_raw(0),
        }
    }
}

impl<K: HandleKind> Default for Handle<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K: HandleKind> Drop for Handle<K> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &K::NAME)
            .field("live", &self.live.is_some())
            .finish()
    }
}

// --- kinds -----------------------------------------------------------------

pub enum InstanceKind {}

impl HandleKind for InstanceKind {
    type Raw = ash::Instance;
    /// The entry keeps the loader library mapped for as long as the
    /// instance lives.
    type Owner = ash::Entry;
    const NAME: &'static str = "instance";

    unsafe fn destroy(_entry: &ash::Entry, raw: ash::Instance) {
        unsafe { raw.destroy_instance(None) };
    }
}

impl CreateHandle for InstanceKind {
    type Args<'a> = &'a vk::InstanceCreateInfo<'a>;

    unsafe fn create(entry: &ash::Entry, info: Self::Args<'_>) -> VkResult<ash::Instance> {
        unsafe { entry.create_instance(info, None) }
    }
}

pub enum DeviceKind {}

impl HandleKind for DeviceKind {
    type Raw = ash::Device;
    type Owner = ash::Instance;
    const NAME: &'static str = "logical device";

    unsafe fn destroy(_instance: &ash::Instance, raw: ash::Device) {
        unsafe { raw.destroy_device(None) };
    }
}

impl CreateHandle for DeviceKind {
    type Args<'a> = (vk::PhysicalDevice, &'a vk::DeviceCreateInfo<'a>);

    unsafe fn create(instance: &ash::Instance, args: Self::Args<'_>) -> VkResult<ash::Device> {
        let (physical, info) = args;
        unsafe { instance.create_device(physical, info, None) }
    }
}

pub enum DebugMessengerKind {}

impl HandleKind for DebugMessengerKind {
    type Raw = vk::DebugUtilsMessengerEXT;
    type Owner = debug_utils::Instance;
    const NAME: &'static str = "debug messenger";

    unsafe fn destroy(owner: &debug_utils::Instance, raw: vk::DebugUtilsMessengerEXT) {
        unsafe { owner.destroy_debug_utils_messenger(raw, None) };
    }
}

impl CreateHandle for DebugMessengerKind {
    type Args<'a> = &'a vk::DebugUtilsMessengerCreateInfoEXT<'a>;

    unsafe fn create(
        owner: &debug_utils::Instance,
        info: Self::Args<'_>,
    ) -> VkResult<vk::DebugUtilsMessengerEXT> {
        unsafe { owner.create_debug_utils_messenger(info, None) }
    }
}

/// Surfaces come from a [`SurfaceProvider`](crate::SurfaceProvider) and are
/// adopted, never created here.
pub enum SurfaceKind {}

impl HandleKind for SurfaceKind {
    type Raw = vk::SurfaceKHR;
    type Owner = surface::Instance;
    const NAME: &'static str = "surface";

    unsafe fn destroy(owner: &surface::Instance, raw: vk::SurfaceKHR) {
        unsafe { owner.destroy_surface(raw, None) };
    }
}

pub enum SwapchainKind {}

impl HandleKind for SwapchainKind {
    type Raw = vk::SwapchainKHR;
    type Owner = swapchain::Device;
    const NAME: &'static str = "swapchain";

    unsafe fn destroy(owner: &swapchain::Device, raw: vk::SwapchainKHR) {
        unsafe { owner.destroy_swapchain(raw, None) };
    }
}

impl CreateHandle for SwapchainKind {
    type Args<'a> = &'a vk::SwapchainCreateInfoKHR<'a>;

    unsafe fn create(
        owner: &swapchain::Device,
        info: Self::Args<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        unsafe { owner.create_swapchain(info, None) }
    }
}

pub enum ImageViewKind {}

impl HandleKind for ImageViewKind {
    type Raw = vk::ImageView;
    type Owner = ash::Device;
    const NAME: &'static str = "image view";

    unsafe fn destroy(device: &ash::Device, raw: vk::ImageView) {
        unsafe { device.destroy_image_view(raw, None) };
    }
}

impl CreateHandle for ImageViewKind {
    type Args<'a> = &'a vk::ImageViewCreateInfo<'a>;

    unsafe fn create(device: &ash::Device, info: Self::Args<'_>) -> VkResult<vk::ImageView> {
        unsafe { device.create_image_view(info, None) }
    }
}

pub enum RenderPassKind {}

impl HandleKind for RenderPassKind {
    type Raw = vk::RenderPass;
    type Owner = ash::Device;
    const NAME: &'static str = "render pass";

    unsafe fn destroy(device: &ash::Device, raw: vk::RenderPass) {
        unsafe { device.destroy_render_pass(raw, None) };
    }
}

impl CreateHandle for RenderPassKind {
    type Args<'a> = &'a vk::RenderPassCreateInfo<'a>;

    unsafe fn create(device: &ash::Device, info: Self::Args<'_>) -> VkResult<vk::RenderPass> {
        unsafe { device.create_render_pass(info, None) }
    }
}

pub enum FramebufferKind {}

impl HandleKind for FramebufferKind {
    type Raw = vk::Framebuffer;
    type Owner = ash::Device;
    const NAME: &'static str = "framebuffer";

    unsafe fn destroy(device: &ash::Device, raw: vk::Framebuffer) {
        unsafe { device.destroy_framebuffer(raw, None) };
    }
}

impl CreateHandle for FramebufferKind {
    type Args<'a> = &'a vk::FramebufferCreateInfo<'a>;

    unsafe fn create(device: &ash::Device, info: Self::Args<'_>) -> VkResult<vk::Framebuffer> {
        unsafe { device.create_framebuffer(info, None) }
    }
}

#[cfg(feature = "vma")]
pub enum AllocatorKind {}

#[cfg(feature = "vma")]
impl HandleKind for AllocatorKind {
    type Raw = vk_mem::Allocator;
    type Owner = ();
    const NAME: &'static str = "allocator";

    unsafe fn destroy(_: &(), raw: vk_mem::Allocator) {
        drop(raw);
    }
}

#[cfg(feature = "vma")]
impl CreateHandle for AllocatorKind {
    type Args<'a> = vk_mem::AllocatorCreateInfo<'a>;

    #[allow(unused_unsafe)]
    unsafe fn create(_: &(), info: Self::Args<'_>) -> VkResult<vk_mem::Allocator> {
        unsafe { vk_mem::Allocator::new(info) }
    }
}

pub type InstanceHandle = Handle<InstanceKind>;
pub type DeviceHandle = Handle<DeviceKind>;
pub type DebugMessengerHandle = Handle<DebugMessengerKind>;
pub type SurfaceHandle = Handle<SurfaceKind>;
pub type SwapchainHandle = Handle<SwapchainKind>;
pub type ImageViewHandle = Handle<ImageViewKind>;
pub type RenderPassHandle = Handle<RenderPassKind>;
pub type FramebufferHandle = Handle<FramebufferKind>;
#[cfg(feature = "vma")]
pub type AllocatorHandle = Handle<AllocatorKind>;
