// SPDX-License-Identifier: CEPL-1.0
//! The context aggregate and the bootstrap pipeline that fills it.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{c_char, CStr, CString};

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info};

use crate::debug;
use crate::device::{
    create_logical_device, fetch_queue, fetch_queues, unique_families, QueueIndexHandle,
};
use crate::error::{Result, StartupError};
use crate::handle::{DebugMessengerHandle, DeviceHandle, InstanceHandle, SurfaceHandle};
use crate::negotiate::{
    extension_names, layer_names, plan_instance, InstancePlan, InstanceRequest,
};
use crate::options::{format_version, InitOptions};
use crate::physical::{DefaultSelection, DeviceSelection, PhysicalDeviceInfo, QueueRole};
use crate::present::query_present_family;
use crate::surface::SurfaceRegistry;
use crate::swapchain::SurfaceSwapchain;

#[cfg(feature = "vma")]
use crate::allocator::create_allocator;
#[cfg(feature = "vma")]
use crate::handle::AllocatorHandle;

const ENGINE_NAME: &CStr = c"vkstart";
const PORTABILITY_SUBSET: &CStr = c"VK_KHR_portability_subset";

/// A ready-to-render Vulkan context.
///
/// Owned objects are declared in teardown order: allocator, swapchains and
/// their surfaces, device, debug messenger, instance.
pub struct Context {
    #[cfg(feature = "vma")]
    allocator: AllocatorHandle,
    swapchains: BTreeMap<String, SurfaceSwapchain>,
    queues: BTreeMap<QueueRole, QueueIndexHandle>,
    swapchain_loader: Option<swapchain::Device>,
    device: DeviceHandle,
    physical: PhysicalDeviceInfo,
    /// Every family that touches swapchain images.
    image_families: BTreeSet<u32>,
    debug_messenger: DebugMessengerHandle,
    surface_loader: surface::Instance,
    instance: InstanceHandle,
    registry: SurfaceRegistry,
    device_fns: ash::Device,
    instance_fns: ash::Instance,
    api_version: u32,
    entry: ash::Entry,
}

impl Context {
    /// Loads the system Vulkan library and runs the bootstrap.
    pub fn new(options: InitOptions) -> Result<Self> {
        // SAFETY: the loaded entry is kept inside the context for as long as
        // any object created through it.
        let entry = unsafe { ash::Entry::load() }.map_err(StartupError::Loader)?;
        Self::with_entry(entry, options)
    }

    /// Runs the bootstrap against an already loaded entry.
    ///
    /// On error every object created so far is destroyed before returning.
    pub fn with_entry(entry: ash::Entry, options: InitOptions) -> Result<Self> {
        let InitOptions {
            app_name,
            api_version,
            mut required_instance_extensions,
            desired_instance_extensions,
            required_layers,
            desired_layers,
            enable_validation,
            mut required_device_extensions,
            mut desired_device_extensions,
            device_selection,
            surfaces,
        } = options;
        let portability = cfg!(target_vendor = "apple");

        let mut registry = SurfaceRegistry::new();
        for provider in &surfaces {
            registry.register(provider.id())?;
            required_instance_extensions.extend(provider.required_instance_extensions()?);
        }
        if surfaces.is_empty() {
            info!("no surface providers; the context will have no swapchains");
        } else {
            required_device_extensions.push(swapchain::NAME.to_owned());
        }
        if portability {
            desired_device_extensions.push(PORTABILITY_SUBSET.to_owned());
        }

        // --- instance + debug ---
        let supported_extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(StartupError::vulkan("vkEnumerateInstanceExtensionProperties"))?;
        let supported_layers = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(StartupError::vulkan("vkEnumerateInstanceLayerProperties"))?;
        let plan = plan_instance(
            &InstanceRequest {
                required_extensions: required_instance_extensions,
                desired_extensions: desired_instance_extensions,
                required_layers,
                desired_layers,
                validation: enable_validation,
                portability,
            },
            &extension_names(&supported_extensions),
            &layer_names(&supported_layers),
        )?;

        let instance = unsafe { create_instance(&entry, &app_name, api_version, &plan) }?;
        let instance_fns = instance.live()?.clone();
        let debug_messenger = if plan.validation {
            unsafe { debug::install(&entry, &instance_fns) }?
        } else {
            DebugMessengerHandle::default()
        };

        // --- surfaces ---
        let surface_loader = surface::Instance::new(&entry, &instance_fns);
        let mut pending = Vec::with_capacity(surfaces.len());
        for mut provider in surfaces {
            let raw = unsafe { provider.create_surface(&entry, &instance_fns) }?;
            let handle = unsafe { SurfaceHandle::adopt(surface_loader.clone(), raw) };
            debug!(surface = provider.id(), "surface created");
            pending.push(SurfaceSwapchain::new(provider, handle));
        }

        // --- physical device ---
        let strategy: Box<dyn DeviceSelection> =
            device_selection.unwrap_or_else(|| Box::new(DefaultSelection));
        let physical = strategy.select(
            &instance_fns,
            &required_device_extensions,
            &desired_device_extensions,
        )?;

        // Present families decide which queues the device is created with.
        let family_count = u32::try_from(physical.queue_families.len()).unwrap_or(u32::MAX);
        let mut present_families = Vec::with_capacity(pending.len());
        for sc in &pending {
            present_families.push(unsafe {
                query_present_family(
                    &surface_loader,
                    physical.handle,
                    sc.surface(),
                    sc.id(),
                    family_count,
                )
            }?);
        }

        // --- device + queues ---
        let image_families = unique_families(&physical, present_families.iter().flatten().copied());
        let device = unsafe { create_logical_device(&instance_fns, &physical, &image_families) }?;
        let device_fns = device.live()?.clone();
        let get_queue = |family: u32| unsafe { device_fns.get_device_queue(family, 0) };

        let queues = fetch_queues(
            physical
                .queue_family_indices
                .iter()
                .map(|(&role, &family)| (role, family)),
            get_queue,
        )?;
        for (sc, family) in pending.iter_mut().zip(&present_families) {
            let present = family
                .map(|f| fetch_queue(QueueRole::Present, f, get_queue))
                .transpose()?;
            sc.set_present(present);
        }

        // --- swapchains ---
        let swapchain_loader =
            (!pending.is_empty()).then(|| swapchain::Device::new(&instance_fns, &device_fns));
        let mut swapchains = BTreeMap::new();
        for mut sc in pending {
            if let Some(loader) = &swapchain_loader {
                unsafe {
                    sc.build(
                        &surface_loader,
                        loader,
                        &device_fns,
                        physical.handle,
                        &image_families,
                    )
                }?;
            }
            swapchains.insert(sc.id().to_owned(), sc);
        }

        // --- allocator ---
        #[cfg(feature = "vma")]
        let allocator =
            unsafe { create_allocator(&instance_fns, &device_fns, physical.handle, api_version) }?;

        info!(
            device = %physical.name,
            api = %format_version(api_version),
            validation = plan.validation,
            surfaces = swapchains.len(),
            "context ready"
        );

        Ok(Self {
            #[cfg(feature = "vma")]
            allocator,
            swapchains,
            queues,
            swapchain_loader,
            device,
            physical,
            image_families,
            debug_messenger,
            surface_loader,
            instance,
            registry,
            device_fns,
            instance_fns,
            api_version,
            entry,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance_fns
    }

    pub fn device(&self) -> &ash::Device {
        &self.device_fns
    }

    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn debug_enabled(&self) -> bool {
        !self.debug_messenger.is_empty()
    }

    pub fn queue(&self, role: QueueRole) -> Option<QueueIndexHandle> {
        self.queues.get(&role).copied()
    }

    /// Graphics, Transfer and, when available, Compute.
    pub fn queues(&self) -> &BTreeMap<QueueRole, QueueIndexHandle> {
        &self.queues
    }

    /// Present queue per surface id; surfaces nothing can present to are
    /// absent.
    pub fn present_queues(&self) -> BTreeMap<&str, QueueIndexHandle> {
        self.swapchains
            .iter()
            .filter_map(|(id, sc)| sc.present_queue().map(|q| (id.as_str(), q)))
            .collect()
    }

    pub fn swapchain(&self, id: &str) -> Option<&SurfaceSwapchain> {
        self.swapchains.get(id)
    }

    pub fn swapchains(&self) -> impl Iterator<Item = &SurfaceSwapchain> {
        self.swapchains.values()
    }

    pub fn surface_ids(&self) -> &SurfaceRegistry {
        &self.registry
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.surface_loader
    }

    /// `None` when the context was built without surfaces.
    pub fn swapchain_loader(&self) -> Option<&swapchain::Device> {
        self.swapchain_loader.as_ref()
    }

    #[cfg(feature = "vma")]
    pub fn allocator(&self) -> Option<&vk_mem::Allocator> {
        self.allocator.get()
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device_fns.device_wait_idle() }
            .map_err(StartupError::vulkan("vkDeviceWaitIdle"))
    }

    /// Rebuilds one surface's swapchain for a new window size.
    ///
    /// Waits for the device to go idle first. The old views are destroyed,
    /// the old swapchain is handed to the driver as `old_swapchain` and
    /// destroyed once its successor exists. Handles previously read from
    /// the surface (swapchain, images, views) are invalid afterwards.
    ///
    /// A zero-sized extent (a minimized window) keeps the current swapchain.
    /// If the rebuild fails the surface is left without a swapchain and
    /// reports itself as not presentable.
    pub fn recreate_swapchain(&mut self, id: &str, window_extent: vk::Extent2D) -> Result<()> {
        let sc = self
            .swapchains
            .get_mut(id)
            .ok_or_else(|| StartupError::UnknownSurface(id.to_owned()))?;
        sc.provider_mut().set_window_extent(window_extent);
        let Some(loader) = &self.swapchain_loader else {
            return Ok(());
        };

        unsafe { self.device_fns.device_wait_idle() }
            .map_err(StartupError::vulkan("vkDeviceWaitIdle"))?;
        debug!(surface = id, ?window_extent, "recreating swapchain");
        // SAFETY: the device is idle, so nothing references the old images.
        unsafe {
            sc.build(
                &self.surface_loader,
                loader,
                &self.device_fns,
                self.physical.handle,
                &self.image_families,
            )
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Field drops do the actual teardown.
        unsafe { self.device_fns.device_wait_idle() }.ok();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.physical.name)
            .field("api_version", &format_version(self.api_version))
            .field("queues", &self.queues)
            .field("swapchains", &self.swapchains)
            .field("debug_enabled", &self.debug_enabled())
            .finish_non_exhaustive()
    }
}

unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &CString,
    api_version: u32,
    plan: &InstancePlan,
) -> Result<InstanceHandle> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(api_version);

    let extension_ptrs: Vec<*const c_char> = plan.extensions.iter().map(|e| e.as_ptr()).collect();
    let layer_ptrs: Vec<*const c_char> = plan.layers.iter().map(|l| l.as_ptr()).collect();

    let mut debug_info = debug::messenger_create_info();
    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_ptrs)
        .flags(plan.flags);
    if plan.validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    let instance = unsafe { InstanceHandle::create(entry.clone(), &create_info) }?;
    info!(
        extensions = ?plan.extensions,
        layers = ?plan.layers,
        "instance created"
    );
    Ok(instance)
}
