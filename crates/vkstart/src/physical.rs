// SPDX-License-Identifier: CEPL-1.0
//! Physical device enumeration, ranking and per-role queue families.

use std::collections::BTreeMap;
use std::ffi::CString;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{ExtensionScope, Result, StartupError};
use crate::negotiate::{extension_names, negotiate, NameKind};

/// Logical queue roles. `Present` is bound per surface, never here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueueRole {
    Graphics,
    Transfer,
    Compute,
    Present,
}

/// Everything a strategy may look at when ranking one device.
#[derive(Clone, Debug)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub extensions: Vec<CString>,
}

impl DeviceCandidate {
    /// # Safety
    /// `handle` must come from `instance`.
    pub unsafe fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .map_err(StartupError::vulkan("vkEnumerateDeviceExtensionProperties"))?;
        let name = properties
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            handle,
            name,
            properties,
            features,
            queue_families,
            extensions: extension_names(&extensions),
        })
    }

    pub fn has_graphics_family(&self) -> bool {
        self.queue_families
            .iter()
            .any(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
    }

    pub fn supports_extensions(&self, names: &[CString]) -> bool {
        names.iter().all(|n| self.extensions.contains(n))
    }

    pub fn is_software(&self) -> bool {
        const SOFTWARE_NAMES: [&str; 3] = ["llvmpipe", "SwiftShader", "Microsoft Basic Render"];
        self.properties.device_type == vk::PhysicalDeviceType::CPU
            || SOFTWARE_NAMES.iter().any(|s| self.name.contains(s))
    }
}

/// The selected device and the decisions derived from it. Immutable once
/// built.
#[derive(Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Graphics, Transfer and (when present) Compute.
    pub queue_family_indices: BTreeMap<QueueRole, u32>,
    pub features: vk::PhysicalDeviceFeatures,
    pub extensions: Vec<CString>,
    pub depth_format: vk::Format,
    pub depth_has_stencil: bool,
}

impl PhysicalDeviceInfo {
    /// Resolves queue families, device extensions and the depth format for
    /// an already chosen candidate. `format_props` queries the driver.
    pub fn from_candidate(
        candidate: &DeviceCandidate,
        features: vk::PhysicalDeviceFeatures,
        required_extensions: &[CString],
        desired_extensions: &[CString],
        format_props: impl FnMut(vk::Format) -> vk::FormatProperties,
    ) -> Result<Self> {
        let queue_family_indices = resolve_queue_families(&candidate.queue_families)?;
        let extensions = negotiate(
            NameKind::Extension(ExtensionScope::Device),
            required_extensions,
            desired_extensions,
            &candidate.extensions,
        )?;
        let (depth_format, depth_has_stencil) = pick_depth_format(format_props)?;

        Ok(Self {
            handle: candidate.handle,
            name: candidate.name.clone(),
            properties: candidate.properties,
            queue_families: candidate.queue_families.clone(),
            queue_family_indices,
            features,
            extensions,
            depth_format,
            depth_has_stencil,
        })
    }

    pub fn family(&self, role: QueueRole) -> Option<u32> {
        self.queue_family_indices.get(&role).copied()
    }
}

/// Pluggable device choice.
///
/// `rank` and `features_to_activate` drive the provided `select`; a
/// strategy that needs full control overrides `select` itself.
pub trait DeviceSelection {
    /// `None` excludes the device.
    fn rank(&self, candidate: &DeviceCandidate) -> Option<u64>;

    fn features_to_activate(&self, candidate: &DeviceCandidate) -> vk::PhysicalDeviceFeatures;

    fn select(
        &self,
        instance: &ash::Instance,
        required_extensions: &[CString],
        desired_extensions: &[CString],
    ) -> Result<PhysicalDeviceInfo> {
        let handles = unsafe { instance.enumerate_physical_devices() }
            .map_err(StartupError::vulkan("vkEnumeratePhysicalDevices"))?;
        if handles.is_empty() {
            return Err(StartupError::NoPhysicalDevice);
        }

        let candidates = handles
            .into_iter()
            .map(|h| unsafe { DeviceCandidate::query(instance, h) })
            .collect::<Result<Vec<_>>>()?;

        let ranked = rank_candidates(self, &candidates, required_extensions);
        let Some(&(score, index)) = ranked.first() else {
            return Err(StartupError::NoEligibleDevice);
        };
        let chosen = &candidates[index];
        info!(
            device = %chosen.name,
            kind = ?chosen.properties.device_type,
            score,
            "selected physical device"
        );

        let features = self.features_to_activate(chosen);
        PhysicalDeviceInfo::from_candidate(
            chosen,
            features,
            required_extensions,
            desired_extensions,
            |format| unsafe {
                instance.get_physical_device_format_properties(chosen.handle, format)
            },
        )
    }
}

/// Eligible candidates as `(score, enumeration index)`, best first.
/// Devices without a graphics family or without the required extensions
/// are never ranked. Equal scores keep enumeration order.
pub fn rank_candidates<S: DeviceSelection + ?Sized>(
    strategy: &S,
    candidates: &[DeviceCandidate],
    required_extensions: &[CString],
) -> Vec<(u64, usize)> {
    let mut ranked: Vec<(u64, usize)> = candidates
        .iter()
        .enumerate()
        .filter_map(|(i, c)| {
            if !c.has_graphics_family() || !c.supports_extensions(required_extensions) {
                debug!(device = %c.name, "ineligible: missing graphics family or extensions");
                return None;
            }
            let score = strategy.rank(c);
            debug!(device = %c.name, ?score, "ranked");
            score.map(|s| (s, i))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));
    ranked
}

fn type_bonus(ty: vk::PhysicalDeviceType) -> u64 {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1_000_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        _ => 0,
    }
}

/// Hardware devices with geometry shaders, discrete first, larger maximum
/// 2D image size breaking the rest.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSelection;

impl DeviceSelection for DefaultSelection {
    fn rank(&self, candidate: &DeviceCandidate) -> Option<u64> {
        if candidate.is_software() || candidate.features.geometry_shader != vk::TRUE {
            return None;
        }
        let props = &candidate.properties;
        Some(type_bonus(props.device_type) + u64::from(props.limits.max_image_dimension2_d))
    }

    fn features_to_activate(&self, candidate: &DeviceCandidate) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
            .geometry_shader(true)
            .sampler_anisotropy(candidate.features.sampler_anisotropy == vk::TRUE)
    }
}

/// Accepts anything with a graphics family, software rasterizers included.
/// Activates no optional features.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyGraphicsDevice;

impl DeviceSelection for AnyGraphicsDevice {
    fn rank(&self, candidate: &DeviceCandidate) -> Option<u64> {
        let props = &candidate.properties;
        Some(type_bonus(props.device_type) + u64::from(props.limits.max_image_dimension2_d))
    }

    fn features_to_activate(&self, _: &DeviceCandidate) -> vk::PhysicalDeviceFeatures {
        vk::PhysicalDeviceFeatures::default()
    }
}

/// First family per capability bit. Transfer falls back to the graphics
/// family; compute is simply absent when nothing offers it.
pub fn resolve_queue_families(
    families: &[vk::QueueFamilyProperties],
) -> Result<BTreeMap<QueueRole, u32>> {
    let mut out = BTreeMap::new();
    for (index, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }
        for (flag, role) in [
            (vk::QueueFlags::GRAPHICS, QueueRole::Graphics),
            (vk::QueueFlags::TRANSFER, QueueRole::Transfer),
            (vk::QueueFlags::COMPUTE, QueueRole::Compute),
        ] {
            if family.queue_flags.contains(flag) {
                out.entry(role).or_insert(index);
            }
        }
    }

    let graphics = *out
        .get(&QueueRole::Graphics)
        .ok_or(StartupError::NoGraphicsQueueFamily)?;
    out.entry(QueueRole::Transfer).or_insert(graphics);
    if !out.contains_key(&QueueRole::Compute) {
        warn!("no compute-capable queue family; compute role left unbound");
    }
    debug!(families = ?out, "resolved queue families");
    Ok(out)
}

/// Candidates in preference order.
pub const DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// First entry of [`DEPTH_FORMATS`] usable as an optimal-tiling depth
/// attachment, with its stencil flag.
pub fn pick_depth_format(
    mut format_props: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<(vk::Format, bool)> {
    DEPTH_FORMATS
        .into_iter()
        .find(|&f| {
            format_props(f)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .map(|f| (f, has_stencil(f)))
        .ok_or(StartupError::NoDepthFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn candidate(
        raw: u64,
        name: &str,
        ty: vk::PhysicalDeviceType,
        max_dim: u32,
        geometry: bool,
    ) -> DeviceCandidate {
        let mut properties = vk::PhysicalDeviceProperties {
            device_type: ty,
            ..Default::default()
        };
        properties.limits.max_image_dimension2_d = max_dim;
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: name.to_owned(),
            properties,
            features: vk::PhysicalDeviceFeatures::default().geometry_shader(geometry),
            queue_families: vec![family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)],
            extensions: vec![],
        }
    }

    const DISCRETE: vk::PhysicalDeviceType = vk::PhysicalDeviceType::DISCRETE_GPU;
    const INTEGRATED: vk::PhysicalDeviceType = vk::PhysicalDeviceType::INTEGRATED_GPU;

    #[test]
    fn discrete_outranks_integrated() {
        let list = [
            candidate(1, "igpu", INTEGRATED, 16384, true),
            candidate(2, "dgpu", DISCRETE, 8192, true),
        ];
        let ranked = rank_candidates(&DefaultSelection, &list, &[]);
        assert_eq!(ranked.iter().map(|r| r.1).collect::<Vec<_>>(), vec![1, 0]);
    }

    #[test]
    fn score_grows_with_image_dimension() {
        let small = candidate(1, "a", DISCRETE, 4096, true);
        let large = candidate(2, "b", DISCRETE, 8192, true);
        assert!(DefaultSelection.rank(&large) > DefaultSelection.rank(&small));
    }

    #[test]
    fn ties_go_to_first_enumerated() {
        let list = [
            candidate(1, "first", DISCRETE, 8192, true),
            candidate(2, "second", DISCRETE, 8192, true),
        ];
        let ranked = rank_candidates(&DefaultSelection, &list, &[]);
        assert_eq!(ranked[0].1, 0);
    }

    #[test]
    fn ineligible_devices_are_never_ranked() {
        let mut no_graphics = candidate(1, "compute-only", DISCRETE, 65536, true);
        no_graphics.queue_families = vec![family(vk::QueueFlags::COMPUTE)];
        let no_geometry = candidate(2, "no-gs", DISCRETE, 65536, false);
        let software = candidate(3, "llvmpipe (LLVM 17)", vk::PhysicalDeviceType::CPU, 16384, true);
        let ok = candidate(4, "fine", INTEGRATED, 1024, true);

        let list = [no_graphics, no_geometry, software, ok];
        let ranked = rank_candidates(&DefaultSelection, &list, &[]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].1, 3);
    }

    #[test]
    fn required_extensions_filter_candidates() {
        let ext = CString::new("VK_KHR_swapchain").unwrap();
        let mut with = candidate(1, "with", INTEGRATED, 1024, true);
        with.extensions = vec![ext.clone()];
        let without = candidate(2, "without", DISCRETE, 16384, true);
        let ranked = rank_candidates(&DefaultSelection, &[without, with], &[ext]);
        assert_eq!(ranked, vec![(10_000 + 1024, 1)]);
    }

    #[test]
    fn any_graphics_device_takes_software() {
        let list = [candidate(1, "SwiftShader Device", vk::PhysicalDeviceType::CPU, 8192, false)];
        assert!(rank_candidates(&DefaultSelection, &list, &[]).is_empty());
        assert_eq!(rank_candidates(&AnyGraphicsDevice, &list, &[]).len(), 1);
        assert_eq!(
            AnyGraphicsDevice.features_to_activate(&list[0]).geometry_shader,
            vk::FALSE
        );
    }

    #[test]
    fn transfer_aliases_graphics_without_dedicated_family() {
        let fams = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let map = resolve_queue_families(&fams).unwrap();
        assert_eq!(map[&QueueRole::Graphics], 0);
        assert_eq!(map[&QueueRole::Transfer], 0);
        assert_eq!(map[&QueueRole::Compute], 0);
    }

    #[test]
    fn first_family_per_bit_wins() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let map = resolve_queue_families(&fams).unwrap();
        assert_eq!(map[&QueueRole::Graphics], 0);
        assert_eq!(map[&QueueRole::Transfer], 0);
        assert_eq!(map[&QueueRole::Compute], 0);
    }

    #[test]
    fn distinct_transfer_family_is_used() {
        let fams = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
        ];
        let map = resolve_queue_families(&fams).unwrap();
        assert_eq!(map[&QueueRole::Transfer], 1);
        assert!(!map.contains_key(&QueueRole::Compute));
    }

    #[test]
    fn missing_graphics_family_is_fatal() {
        let fams = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert!(matches!(
            resolve_queue_families(&fams),
            Err(StartupError::NoGraphicsQueueFamily)
        ));
    }

    fn depth_support(supported: &'static [vk::Format]) -> impl FnMut(vk::Format) -> vk::FormatProperties {
        move |f| vk::FormatProperties {
            optimal_tiling_features: if supported.contains(&f) {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    #[test]
    fn depth_format_follows_preference_order() {
        let all = pick_depth_format(depth_support(&DEPTH_FORMATS)).unwrap();
        assert_eq!(all, (vk::Format::D32_SFLOAT, false));

        let stencil_only = pick_depth_format(depth_support(&[vk::Format::D24_UNORM_S8_UINT])).unwrap();
        assert_eq!(stencil_only, (vk::Format::D24_UNORM_S8_UINT, true));

        assert!(matches!(
            pick_depth_format(depth_support(&[])),
            Err(StartupError::NoDepthFormat)
        ));
    }

    #[test]
    fn info_from_candidate_negotiates_device_extensions() {
        let swapchain = CString::new("VK_KHR_swapchain").unwrap();
        let subset = CString::new("VK_KHR_portability_subset").unwrap();
        let mut c = candidate(9, "gpu", DISCRETE, 8192, true);
        c.extensions = vec![swapchain.clone()];

        let info = PhysicalDeviceInfo::from_candidate(
            &c,
            DefaultSelection.features_to_activate(&c),
            &[swapchain.clone()],
            &[subset],
            depth_support(&DEPTH_FORMATS),
        )
        .unwrap();
        assert_eq!(info.extensions, vec![swapchain]);
        assert_eq!(info.family(QueueRole::Graphics), Some(0));
        assert_eq!(info.features.geometry_shader, vk::TRUE);
        assert_eq!(info.depth_format, vk::Format::D32_SFLOAT);
    }
}
