// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::physical::QueueRole;

pub type Result<T, E = StartupError> = std::result::Result<T, E>;

/// Which name table a missing extension was looked up in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionScope {
    Instance,
    Device,
}

impl std::fmt::Display for ExtensionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtensionScope::Instance => f.write_str("instance"),
            ExtensionScope::Device => f.write_str("device"),
        }
    }
}

/// Fatal bootstrap failures. Advisory conditions never show up here; they
/// are logged and the pipeline carries on with a fallback.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not load the Vulkan library: {0}")]
    Loader(#[source] ash::LoadingError),
    #[error("required {scope} extension {name} is not supported")]
    ExtensionMissing { scope: ExtensionScope, name: String },
    #[error("required layer {0} is not supported")]
    LayerMissing(String),
    #[error("the platform reports no physical devices")]
    NoPhysicalDevice,
    #[error("no physical device satisfies the selection criteria")]
    NoEligibleDevice,
    #[error("selected physical device exposes no graphics queue family")]
    NoGraphicsQueueFamily,
    #[error("no supported depth format found")]
    NoDepthFormat,
    #[error("device returned a null queue for {role:?} (family {family})")]
    QueueHandleNull { role: QueueRole, family: u32 },
    #[error("failed to create {object}: {result:?}")]
    NativeCreateFailed {
        object: &'static str,
        result: vk::Result,
    },
    #[error("{call} failed: {result:?}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },
    #[error("surface id {0:?} is already registered; surface ids must be unique")]
    DuplicateSurfaceId(String),
    #[error("no surface registered under id {0:?}")]
    UnknownSurface(String),
    #[error("surface {0:?} reports no supported formats")]
    NoSurfaceFormat(String),
    #[error("{0} handle is empty")]
    EmptyHandle(&'static str),
    #[error("surface {id:?}: {reason}")]
    Surface { id: String, reason: String },
}

impl StartupError {
    pub(crate) fn vulkan(call: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| StartupError::Vulkan { call, result }
    }
}
