// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};
use std::fmt;

use ash::vk;

use crate::physical::DeviceSelection;
use crate::surface::SurfaceProvider;

/// Everything the bootstrap needs from the caller.
pub struct InitOptions {
    pub app_name: CString,
    /// Packed with `vk::make_api_version`.
    pub api_version: u32,
    pub required_instance_extensions: Vec<CString>,
    pub desired_instance_extensions: Vec<CString>,
    pub required_layers: Vec<CString>,
    pub desired_layers: Vec<CString>,
    pub enable_validation: bool,
    pub required_device_extensions: Vec<CString>,
    pub desired_device_extensions: Vec<CString>,
    /// `None` uses [`DefaultSelection`](crate::DefaultSelection).
    pub device_selection: Option<Box<dyn DeviceSelection>>,
    pub surfaces: Vec<Box<dyn SurfaceProvider>>,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            app_name: c"vkstart".to_owned(),
            api_version: vk::API_VERSION_1_0,
            required_instance_extensions: Vec::new(),
            desired_instance_extensions: Vec::new(),
            required_layers: Vec::new(),
            desired_layers: Vec::new(),
            enable_validation: false,
            required_device_extensions: Vec::new(),
            desired_device_extensions: Vec::new(),
            device_selection: None,
            surfaces: Vec::new(),
        }
    }
}

impl InitOptions {
    pub fn with_surface(mut self, provider: impl SurfaceProvider + 'static) -> Self {
        self.surfaces.push(Box::new(provider));
        self
    }

    pub fn with_device_selection(mut self, strategy: impl DeviceSelection + 'static) -> Self {
        self.device_selection = Some(Box::new(strategy));
        self
    }

    pub fn with_validation(mut self, on: bool) -> Self {
        self.enable_validation = on;
        self
    }

    pub fn require_device_extension(mut self, name: &CStr) -> Self {
        self.required_device_extensions.push(name.to_owned());
        self
    }

    pub fn desire_device_extension(mut self, name: &CStr) -> Self {
        self.desired_device_extensions.push(name.to_owned());
        self
    }
}

impl fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let surface_ids: Vec<&str> = self.surfaces.iter().map(|s| s.id()).collect();
        f.debug_struct("InitOptions")
            .field("app_name", &self.app_name)
            .field("api_version", &format_version(self.api_version))
            .field("required_instance_extensions", &self.required_instance_extensions)
            .field("desired_instance_extensions", &self.desired_instance_extensions)
            .field("required_layers", &self.required_layers)
            .field("desired_layers", &self.desired_layers)
            .field("enable_validation", &self.enable_validation)
            .field("required_device_extensions", &self.required_device_extensions)
            .field("desired_device_extensions", &self.desired_device_extensions)
            .field("custom_device_selection", &self.device_selection.is_some())
            .field("surfaces", &surface_ids)
            .finish()
    }
}

/// `major.minor.patch`
pub fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}
