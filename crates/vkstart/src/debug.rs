// SPDX-License-Identifier: CEPL-1.0
//! Validation-layer messages forwarded into `tracing`.

use std::borrow::Cow;
use std::ffi::{c_void, CStr};

use ash::ext::debug_utils;
use ash::vk;
use tracing::Level;

use crate::error::Result;
use crate::handle::DebugMessengerHandle;

/// Target used for every forwarded validation message.
pub const VALIDATION_TARGET: &str = "vkstart::validation";

/// Shared by the standalone messenger and the instance `p_next` chain.
/// Subscribes to every severity; filter with the `vkstart::validation`
/// target.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// # Safety
/// `instance` must have been created with `VK_EXT_debug_utils` enabled.
pub unsafe fn install(entry: &ash::Entry, instance: &ash::Instance) -> Result<DebugMessengerHandle> {
    let loader = debug_utils::Instance::new(entry, instance);
    let info = messenger_create_info();
    unsafe { DebugMessengerHandle::create(loader, &info) }
}

fn level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        Level::WARN
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        Level::INFO
    } else {
        Level::TRACE
    }
}

fn type_label(ty: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if ty.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if ty.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else if ty.contains(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL) {
        "general"
    } else {
        "unknown"
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes either null or a valid callback struct whose
    // `p_message` is null or NUL-terminated for the duration of the call.
    let message: Cow<'_, str> = match unsafe { p_callback_data.as_ref() } {
        Some(data) if !data.p_message.is_null() => {
            unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy()
        }
        _ => Cow::Borrowed("<no message>"),
    };
    let kind = type_label(message_type);

    let level = level_for(message_severity);
    if level == Level::ERROR {
        tracing::error!(target: VALIDATION_TARGET, kind, "{message}");
    } else if level == Level::WARN {
        tracing::warn!(target: VALIDATION_TARGET, kind, "{message}");
    } else if level == Level::INFO {
        tracing::info!(target: VALIDATION_TARGET, kind, "{message}");
    } else {
        tracing::trace!(target: VALIDATION_TARGET, kind, "{message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::DebugUtilsMessageSeverityFlagsEXT as Sev;
    use ash::vk::DebugUtilsMessageTypeFlagsEXT as Ty;

    #[test]
    fn severity_maps_to_tracing_levels() {
        assert_eq!(level_for(Sev::VERBOSE), Level::TRACE);
        assert_eq!(level_for(Sev::INFO), Level::INFO);
        assert_eq!(level_for(Sev::WARNING), Level::WARN);
        assert_eq!(level_for(Sev::ERROR), Level::ERROR);
    }

    #[test]
    fn create_info_subscribes_to_every_mapped_severity() {
        let info = messenger_create_info();
        for sev in [Sev::VERBOSE, Sev::INFO, Sev::WARNING, Sev::ERROR] {
            assert!(info.message_severity.contains(sev), "{sev:?} not subscribed");
        }
        assert!(info.message_type.contains(Ty::VALIDATION | Ty::PERFORMANCE | Ty::GENERAL));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn callback_tolerates_null_data() {
        let ret = unsafe {
            vulkan_debug_callback(Sev::WARNING, Ty::GENERAL, std::ptr::null(), std::ptr::null_mut())
        };
        assert_eq!(ret, vk::FALSE);
        assert_eq!(type_label(Ty::GENERAL), "general");
    }
}
