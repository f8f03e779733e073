// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::Result;
use crate::handle::AllocatorHandle;

/// Last step of the bootstrap when the `vma` feature is on.
///
/// # Safety
/// `device` must have been created from `instance` on `physical`, and the
/// returned handle must be dropped before the device.
pub unsafe fn create_allocator(
    instance: &ash::Instance,
    device: &ash::Device,
    physical: vk::PhysicalDevice,
    api_version: u32,
) -> Result<AllocatorHandle> {
    let mut info = vk_mem::AllocatorCreateInfo::new(instance, device, physical);
    info.vulkan_api_version = api_version;
    let allocator = unsafe { AllocatorHandle::create((), info) }?;
    debug!("memory allocator ready");
    Ok(allocator)
}
