// SPDX-License-Identifier: CEPL-1.0
//! Required/desired name negotiation for extensions and layers.

use std::ffi::{CStr, CString};

use ash::vk;
use ash::{ext::debug_utils, khr::portability_enumeration};
use tracing::{debug, warn};

use crate::error::{ExtensionScope, Result, StartupError};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// What a negotiated list names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind {
    Extension(ExtensionScope),
    Layer,
}

impl NameKind {
    fn missing(self, name: &CStr) -> StartupError {
        let name = name.to_string_lossy().into_owned();
        match self {
            NameKind::Extension(scope) => StartupError::ExtensionMissing { scope, name },
            NameKind::Layer => StartupError::LayerMissing(name),
        }
    }
}

/// Returns `required ∪ (desired ∩ supported)`, in request order and without
/// duplicates. A required name that is not supported is fatal; a desired
/// one is dropped with a warning.
pub fn negotiate(
    kind: NameKind,
    required: &[CString],
    desired: &[CString],
    supported: &[CString],
) -> Result<Vec<CString>> {
    let mut out: Vec<CString> = Vec::with_capacity(required.len() + desired.len());

    for name in required {
        if !supported.contains(name) {
            return Err(kind.missing(name));
        }
        if !out.contains(name) {
            out.push(name.clone());
        }
    }

    for name in desired {
        if out.contains(name) {
            continue;
        }
        if supported.contains(name) {
            out.push(name.clone());
        } else {
            warn!(?kind, name = %name.to_string_lossy(), "desired name not supported; skipping");
        }
    }

    debug!(?kind, names = ?out, "negotiated");
    Ok(out)
}

pub fn extension_names(props: &[vk::ExtensionProperties]) -> Vec<CString> {
    props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(CStr::to_owned)
        .collect()
}

pub fn layer_names(props: &[vk::LayerProperties]) -> Vec<CString> {
    props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(CStr::to_owned)
        .collect()
}

/// Inputs to instance negotiation after surface providers have added
/// their extensions.
#[derive(Clone, Debug, Default)]
pub struct InstanceRequest {
    pub required_extensions: Vec<CString>,
    pub desired_extensions: Vec<CString>,
    pub required_layers: Vec<CString>,
    pub desired_layers: Vec<CString>,
    pub validation: bool,
    pub portability: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstancePlan {
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    /// True only when both the validation layer and `VK_EXT_debug_utils`
    /// made it into the lists above.
    pub validation: bool,
    pub flags: vk::InstanceCreateFlags,
}

pub fn plan_instance(
    request: &InstanceRequest,
    supported_extensions: &[CString],
    supported_layers: &[CString],
) -> Result<InstancePlan> {
    let validation = if request.validation {
        let has_layer = supported_layers.iter().any(|l| l.as_c_str() == VALIDATION_LAYER);
        let has_ext = supported_extensions
            .iter()
            .any(|e| e.as_c_str() == debug_utils::NAME);
        if !(has_layer && has_ext) {
            warn!(
                layer = has_layer,
                debug_utils = has_ext,
                "validation requested but not available; continuing without it"
            );
        }
        has_layer && has_ext
    } else {
        false
    };

    let mut required_extensions = request.required_extensions.clone();
    let mut required_layers = request.required_layers.clone();
    let mut flags = vk::InstanceCreateFlags::empty();

    if request.portability {
        required_extensions.push(portability_enumeration::NAME.to_owned());
        flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }
    if validation {
        required_extensions.push(debug_utils::NAME.to_owned());
        required_layers.push(VALIDATION_LAYER.to_owned());
    }

    let extensions = negotiate(
        NameKind::Extension(ExtensionScope::Instance),
        &required_extensions,
        &request.desired_extensions,
        supported_extensions,
    )?;
    let layers = negotiate(
        NameKind::Layer,
        &required_layers,
        &request.desired_layers,
        supported_layers,
    )?;

    Ok(InstancePlan {
        extensions,
        layers,
        validation,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<CString> {
        list.iter().map(|s| CString::new(*s).unwrap()).collect()
    }

    const EXT: NameKind = NameKind::Extension(ExtensionScope::Instance);

    #[test]
    fn required_plus_supported_desired() {
        let supported = names(&["A", "B", "C", "D"]);
        let out = negotiate(EXT, &names(&["A", "C"]), &names(&["D", "X", "A"]), &supported).unwrap();
        assert_eq!(out, names(&["A", "C", "D"]));
    }

    #[test]
    fn missing_required_is_fatal() {
        let supported = names(&["A"]);
        match negotiate(EXT, &names(&["A", "Z"]), &[], &supported) {
            Err(StartupError::ExtensionMissing { scope, name }) => {
                assert_eq!(scope, ExtensionScope::Instance);
                assert_eq!(name, "Z");
            }
            other => panic!("expected ExtensionMissing, got {other:?}"),
        }
    }

    #[test]
    fn missing_layer_uses_layer_error() {
        let err = negotiate(NameKind::Layer, &names(&["L"]), &[], &[]).unwrap_err();
        assert!(matches!(err, StartupError::LayerMissing(ref n) if n == "L"));
    }

    #[test]
    fn duplicates_collapse() {
        let supported = names(&["A", "B"]);
        let out = negotiate(EXT, &names(&["A", "A"]), &names(&["B", "B"]), &supported).unwrap();
        assert_eq!(out, names(&["A", "B"]));
    }

    #[test]
    fn validation_needs_layer_and_extension() {
        let request = InstanceRequest {
            validation: true,
            ..Default::default()
        };
        let only_layer = plan_instance(&request, &[], &[VALIDATION_LAYER.to_owned()]).unwrap();
        assert!(!only_layer.validation);
        assert!(only_layer.layers.is_empty());

        let only_ext = plan_instance(&request, &[debug_utils::NAME.to_owned()], &[]).unwrap();
        assert!(!only_ext.validation);
        assert!(only_ext.extensions.is_empty());

        let both = plan_instance(
            &request,
            &[debug_utils::NAME.to_owned()],
            &[VALIDATION_LAYER.to_owned()],
        )
        .unwrap();
        assert!(both.validation);
        assert_eq!(both.extensions, vec![debug_utils::NAME.to_owned()]);
        assert_eq!(both.layers, vec![VALIDATION_LAYER.to_owned()]);
    }

    #[test]
    fn validation_off_ignores_available_layer() {
        let plan = plan_instance(
            &InstanceRequest::default(),
            &[debug_utils::NAME.to_owned()],
            &[VALIDATION_LAYER.to_owned()],
        )
        .unwrap();
        assert!(!plan.validation);
        assert!(plan.layers.is_empty());
    }

    #[test]
    fn portability_is_required_and_flagged() {
        let request = InstanceRequest {
            portability: true,
            ..Default::default()
        };
        let plan = plan_instance(&request, &[portability_enumeration::NAME.to_owned()], &[]).unwrap();
        assert!(plan
            .flags
            .contains(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR));
        assert!(matches!(
            plan_instance(&request, &[], &[]),
            Err(StartupError::ExtensionMissing { .. })
        ));
    }
}
