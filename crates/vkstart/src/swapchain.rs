// SPDX-License-Identifier: CEPL-1.0
//! Per-surface swapchain negotiation, creation and in-place recreation.

use std::collections::BTreeSet;
use std::fmt;

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info, warn};

use crate::device::QueueIndexHandle;
use crate::error::{Result, StartupError};
use crate::handle::{
    Handle, HandleKind, ImageViewHandle, ImageViewKind, SurfaceHandle, SwapchainHandle, SwapchainKind,
};
use crate::surface::SurfaceProvider;

pub const PREFERRED_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;
pub const PREFERRED_PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::MAILBOX;

/// What the device reports for one surface.
#[derive(Clone, Debug, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// # Safety
    /// `physical` and `surface` must belong to the instance behind `loader`.
    pub unsafe fn query(
        loader: &surface::Instance,
        physical: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical, surface)
                    .map_err(StartupError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?,
                formats: loader
                    .get_physical_device_surface_formats(physical, surface)
                    .map_err(StartupError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical, surface)
                    .map_err(StartupError::vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))?,
            })
        }
    }
}

/// The negotiated tuple a swapchain is created from.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDetails {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    /// Requested minimum; the driver may create more.
    pub image_count: u32,
    pub usage: vk::ImageUsageFlags,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

pub fn choose_surface_format(
    surface_id: &str,
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR> {
    let first = formats
        .first()
        .copied()
        .ok_or_else(|| StartupError::NoSurfaceFormat(surface_id.to_owned()))?;
    Ok(formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT && f.color_space == PREFERRED_COLOR_SPACE)
        .unwrap_or_else(|| {
            warn!(
                surface = surface_id,
                fallback = ?first.format,
                color_space = ?first.color_space,
                "preferred surface format not supported; using first reported"
            );
            first
        }))
}

/// MAILBOX when offered, otherwise FIFO (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&PREFERRED_PRESENT_MODE) {
        PREFERRED_PRESENT_MODE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One above the minimum, capped by a declared maximum (0 is unbounded).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count.saturating_add(1);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&bit| supported.contains(bit))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// The policy providers get unless they override
/// [`SurfaceProvider::select_format`].
pub fn default_format_policy(
    surface_id: &str,
    support: &SwapchainSupport,
    window: vk::Extent2D,
) -> Result<SwapchainDetails> {
    let caps = &support.capabilities;
    Ok(SwapchainDetails {
        format: choose_surface_format(surface_id, &support.formats)?,
        present_mode: choose_present_mode(&support.present_modes),
        extent: choose_extent(caps, window),
        image_count: choose_image_count(caps),
        usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        pre_transform: caps.current_transform,
        composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
    })
}

/// CONCURRENT when more than one family touches the images.
pub fn sharing_mode(families: &BTreeSet<u32>) -> (vk::SharingMode, Vec<u32>) {
    if families.len() > 1 {
        (vk::SharingMode::CONCURRENT, families.iter().copied().collect())
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

pub fn swapchain_create_info<'a>(
    surface: vk::SurfaceKHR,
    details: &SwapchainDetails,
    sharing: vk::SharingMode,
    family_indices: &'a [u32],
    old_swapchain: vk::SwapchainKHR,
) -> vk::SwapchainCreateInfoKHR<'a> {
    vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(details.image_count)
        .image_format(details.format.format)
        .image_color_space(details.format.color_space)
        .image_extent(details.extent)
        .image_array_layers(1)
        .image_usage(details.usage)
        .image_sharing_mode(sharing)
        .queue_family_indices(family_indices)
        .pre_transform(details.pre_transform)
        .composite_alpha(details.composite_alpha)
        .present_mode(details.present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain)
}

/// 2D color view, identity swizzle, one mip level and one layer.
pub fn image_view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo<'static> {
    vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
}

/// One view per image. On failure the views created so far are dropped.
pub fn create_image_views<V>(
    images: &[vk::Image],
    format: vk::Format,
    mut create: impl FnMut(&vk::ImageViewCreateInfo<'_>) -> Result<V>,
) -> Result<Vec<V>> {
    images
        .iter()
        .map(|&image| create(&image_view_info(image, format)))
        .collect()
}

/// Views, swapchain and images of one swapchain generation.
///
/// Fields drop top to bottom, so views go before the swapchain they view.
/// Either everything is present or, after a failed build, nothing is.
pub(crate) struct SwapchainImages<S: HandleKind = SwapchainKind, V: HandleKind = ImageViewKind> {
    views: Vec<Handle<V>>,
    swapchain: Handle<S>,
    images: Vec<vk::Image>,
    details: Option<SwapchainDetails>,
}

impl<S: HandleKind, V: HandleKind> Default for SwapchainImages<S, V> {
    fn default() -> Self {
        Self {
            views: Vec::new(),
            swapchain: Handle::default(),
            images: Vec::new(),
            details: None,
        }
    }
}

impl<S, V> SwapchainImages<S, V>
where
    S: HandleKind,
    S::Raw: vk::Handle + Copy,
    V: HandleKind,
{
    fn is_live(&self) -> bool {
        !self.swapchain.is_empty() && self.details.is_some()
    }

    /// Destroys views and swapchain and forgets the images.
    fn retire(&mut self) {
        self.views.clear();
        self.swapchain.destroy();
        self.images.clear();
        self.details = None;
    }

    /// Replaces the current generation with one built from `details`.
    ///
    /// `create_swapchain` gets the current swapchain as the `old_swapchain`
    /// hint. A zero-sized extent is not buildable: nothing is touched and
    /// `Ok(false)` comes back. Any error leaves the state retired, since a
    /// swapchain passed as `old_swapchain` is retired even when the create
    /// call fails.
    fn rebuild(
        &mut self,
        details: SwapchainDetails,
        create_swapchain: impl FnOnce(S::Raw) -> Result<Handle<S>>,
        get_images: impl FnOnce(S::Raw) -> Result<Vec<vk::Image>>,
        create_view: impl FnMut(&vk::ImageViewCreateInfo<'_>) -> Result<Handle<V>>,
    ) -> Result<bool> {
        if details.extent.width == 0 || details.extent.height == 0 {
            return Ok(false);
        }

        let next = match create_swapchain(self.swapchain.raw()) {
            Ok(next) => next,
            Err(e) => {
                self.retire();
                return Err(e);
            }
        };
        self.views.clear();
        self.swapchain.replace(next);
        self.images.clear();
        self.details = None;

        let built = get_images(self.swapchain.raw()).and_then(|images| {
            let views = create_image_views(&images, details.format.format, create_view)?;
            Ok((images, views))
        });
        match built {
            Ok((images, views)) => {
                self.images = images;
                self.views = views;
                self.details = Some(details);
                Ok(true)
            }
            Err(e) => {
                self.retire();
                Err(e)
            }
        }
    }
}

/// Swapchain state for one surface.
///
/// Fields drop top to bottom: views and swapchain, surface, then the
/// provider that produced the surface.
pub struct SurfaceSwapchain {
    chain: SwapchainImages,
    present: Option<QueueIndexHandle>,
    surface: SurfaceHandle,
    provider: Box<dyn SurfaceProvider>,
}

impl SurfaceSwapchain {
    pub(crate) fn new(provider: Box<dyn SurfaceProvider>, surface: SurfaceHandle) -> Self {
        Self {
            chain: SwapchainImages::default(),
            present: None,
            surface,
            provider,
        }
    }

    pub fn id(&self) -> &str {
        self.provider.id()
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface.raw()
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.chain.swapchain.raw()
    }

    /// Owned by the swapchain; never destroyed here.
    pub fn images(&self) -> &[vk::Image] {
        &self.chain.images
    }

    pub fn image_views(&self) -> Vec<vk::ImageView> {
        self.chain.views.iter().map(ImageViewHandle::raw).collect()
    }

    pub fn image_count(&self) -> usize {
        self.chain.images.len()
    }

    pub fn details(&self) -> Option<&SwapchainDetails> {
        self.chain.details.as_ref()
    }

    pub fn present_queue(&self) -> Option<QueueIndexHandle> {
        self.present
    }

    /// False without a present queue, and after a failed (re)build.
    pub fn is_presentable(&self) -> bool {
        self.present.is_some() && self.chain.is_live()
    }

    pub(crate) fn provider_mut(&mut self) -> &mut dyn SurfaceProvider {
        self.provider.as_mut()
    }

    pub(crate) fn set_present(&mut self, present: Option<QueueIndexHandle>) {
        self.present = present;
    }

    /// Builds the swapchain and its views, or rebuilds them in place.
    ///
    /// The previous swapchain is passed as `old_swapchain` and destroyed
    /// once its successor exists. Surfaces without a present queue are left
    /// alone, and so is the current swapchain while the negotiated extent
    /// has a zero side (a minimized window). On error the surface keeps no
    /// swapchain and [`is_presentable`](Self::is_presentable) is false.
    ///
    /// # Safety
    /// Nothing may still be using the current images or views.
    pub(crate) unsafe fn build(
        &mut self,
        surface_loader: &surface::Instance,
        swapchain_loader: &swapchain::Device,
        device: &ash::Device,
        physical: vk::PhysicalDevice,
        image_families: &BTreeSet<u32>,
    ) -> Result<()> {
        if self.present.is_none() {
            debug!(surface = self.id(), "no present queue; skipping swapchain");
            return Ok(());
        }
        let surface = *self.surface.live()?;
        let support = unsafe { SwapchainSupport::query(surface_loader, physical, surface) }?;
        let details = self
            .provider
            .select_format(&support, self.provider.window_extent())?;
        let (sharing, indices) = sharing_mode(image_families);

        let built = self.chain.rebuild(
            details,
            |old| {
                let info = swapchain_create_info(surface, &details, sharing, &indices, old);
                unsafe { SwapchainHandle::create(swapchain_loader.clone(), &info) }
            },
            |raw| {
                unsafe { swapchain_loader.get_swapchain_images(raw) }
                    .map_err(StartupError::vulkan("vkGetSwapchainImagesKHR"))
            },
            |info| unsafe { ImageViewHandle::create(device.clone(), info) },
        );

        match built {
            Ok(true) => info!(
                surface = self.id(),
                format = ?details.format.format,
                present_mode = ?details.present_mode,
                width = details.extent.width,
                height = details.extent.height,
                requested = details.image_count,
                images = self.chain.images.len(),
                sharing = ?sharing,
                "swapchain ready"
            ),
            Ok(false) => info!(
                surface = self.id(),
                width = details.extent.width,
                height = details.extent.height,
                "zero-sized extent; keeping current swapchain"
            ),
            Err(e) => {
                warn!(
                    surface = self.id(),
                    error = %e,
                    "swapchain build failed; surface has no swapchain"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SurfaceSwapchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceSwapchain")
            .field("id", &self.id())
            .field("surface", &self.surface)
            .field("swapchain", &self.chain.swapchain)
            .field("images", &self.chain.images.len())
            .field("details", &self.chain.details)
            .field("present", &self.present)
            .finish()
    }
}
