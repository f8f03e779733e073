// SPDX-License-Identifier: CEPL-1.0
use ash::khr::surface;
use ash::vk;
use tracing::{debug, warn};

use crate::error::{Result, StartupError};

/// First queue family, in index order, that can present to the surface.
///
/// `None` is not an error: the surface stays without a present queue and a
/// warning is logged.
pub fn resolve_present_family(
    surface_id: &str,
    family_count: u32,
    mut supports_present: impl FnMut(u32) -> Result<bool>,
) -> Result<Option<u32>> {
    for family in 0..family_count {
        if supports_present(family)? {
            debug!(surface = surface_id, family, "present family resolved");
            return Ok(Some(family));
        }
    }
    warn!(
        surface = surface_id,
        "no queue family can present to this surface; it will have no swapchain"
    );
    Ok(None)
}

/// # Safety
/// `physical` and `surface` must belong to the instance `loader` was built
/// from.
pub unsafe fn query_present_family(
    loader: &surface::Instance,
    physical: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_id: &str,
    family_count: u32,
) -> Result<Option<u32>> {
    resolve_present_family(surface_id, family_count, |family| {
        unsafe { loader.get_physical_device_surface_support(physical, family, surface) }
            .map_err(StartupError::vulkan("vkGetPhysicalDeviceSurfaceSupportKHR"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_supporting_family_wins() {
        let mut asked = Vec::new();
        let family = resolve_present_family("main", 4, |f| {
            asked.push(f);
            Ok(f >= 2)
        })
        .unwrap();
        assert_eq!(family, Some(2));
        assert_eq!(asked, vec![0, 1, 2]);
    }

    #[test]
    fn no_support_is_not_fatal() {
        assert_eq!(resolve_present_family("offscreen", 3, |_| Ok(false)).unwrap(), None);
        assert_eq!(resolve_present_family("empty", 0, |_| Ok(true)).unwrap(), None);
    }

    #[test]
    fn query_errors_propagate() {
        let err = resolve_present_family("main", 2, |_| {
            Err(StartupError::Vulkan {
                call: "vkGetPhysicalDeviceSurfaceSupportKHR",
                result: vk::Result::ERROR_SURFACE_LOST_KHR,
            })
        })
        .unwrap_err();
        assert!(matches!(
            err,
            StartupError::Vulkan {
                call: "vkGetPhysicalDeviceSurfaceSupportKHR",
                ..
            }
        ));
    }
}
