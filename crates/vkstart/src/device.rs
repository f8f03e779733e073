// SPDX-License-Identifier: CEPL-1.0
//! Logical device creation and queue retrieval.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::c_char;

use ash::vk;
use tracing::{debug, info};

use crate::error::{Result, StartupError};
use crate::handle::DeviceHandle;
use crate::physical::{PhysicalDeviceInfo, QueueRole};

static QUEUE_PRIORITY: [f32; 1] = [1.0];

/// A role's resolved family and the queue fetched from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueIndexHandle {
    pub family_index: u32,
    pub queue: vk::Queue,
}

/// One request per distinct family, one queue each at full priority.
pub fn queue_create_infos(families: &BTreeSet<u32>) -> Vec<vk::DeviceQueueCreateInfo<'static>> {
    families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&QUEUE_PRIORITY)
        })
        .collect()
}

/// Role families of `physical` plus any extra (present) families.
pub fn unique_families(
    physical: &PhysicalDeviceInfo,
    extra: impl IntoIterator<Item = u32>,
) -> BTreeSet<u32> {
    physical
        .queue_family_indices
        .values()
        .copied()
        .chain(extra)
        .collect()
}

/// # Safety
/// `physical` must have been selected from `instance`.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    physical: &PhysicalDeviceInfo,
    families: &BTreeSet<u32>,
) -> Result<DeviceHandle> {
    let queue_infos = queue_create_infos(families);
    let extension_ptrs: Vec<*const c_char> =
        physical.extensions.iter().map(|e| e.as_ptr()).collect();

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&physical.features);

    let device = unsafe {
        DeviceHandle::create(instance.clone(), (physical.handle, &create_info))
    }?;
    info!(
        families = ?families,
        extensions = ?physical.extensions,
        "logical device created"
    );
    Ok(device)
}

/// Queue 0 of each role's family. A null queue means the device was not
/// created with that family and is fatal.
pub fn fetch_queues(
    roles: impl IntoIterator<Item = (QueueRole, u32)>,
    mut get_queue: impl FnMut(u32) -> vk::Queue,
) -> Result<BTreeMap<QueueRole, QueueIndexHandle>> {
    let mut out = BTreeMap::new();
    for (role, family) in roles {
        out.insert(role, fetch_queue(role, family, &mut get_queue)?);
    }
    Ok(out)
}

pub fn fetch_queue(
    role: QueueRole,
    family: u32,
    mut get_queue: impl FnMut(u32) -> vk::Queue,
) -> Result<QueueIndexHandle> {
    let queue = get_queue(family);
    if queue == vk::Queue::null() {
        return Err(StartupError::QueueHandleNull { role, family });
    }
    debug!(?role, family, "queue fetched");
    Ok(QueueIndexHandle {
        family_index: family,
        queue,
    })
}
