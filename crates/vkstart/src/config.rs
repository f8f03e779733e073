// SPDX-License-Identifier: CEPL-1.0
//! TOML mirror of the string-valued parts of [`InitOptions`].
//!
//! ```toml
//! app_name = "probe"
//! api_version = "1.2"
//! validation = true
//!
//! [instance]
//! desired_layers = ["VK_LAYER_MESA_overlay"]
//!
//! [device]
//! desired_extensions = ["VK_KHR_portability_subset"]
//! ```

use std::ffi::CString;
use std::path::{Path, PathBuf};

use ash::vk;
use serde::Deserialize;
use thiserror::Error;

use crate::options::InitOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid api_version {0:?}; expected \"major.minor\" or \"major.minor.patch\"")]
    ApiVersion(String),
    #[error("name {0:?} contains a NUL byte")]
    Nul(String),
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceSection {
    pub required_extensions: Vec<String>,
    pub desired_extensions: Vec<String>,
    pub required_layers: Vec<String>,
    pub desired_layers: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    pub required_extensions: Vec<String>,
    pub desired_extensions: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StartupConfig {
    pub app_name: String,
    pub api_version: String,
    pub validation: bool,
    pub instance: InstanceSection,
    pub device: DeviceSection,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            app_name: "vkstart".into(),
            api_version: "1.0".into(),
            validation: false,
            instance: InstanceSection::default(),
            device: DeviceSection::default(),
        }
    }
}

impl StartupConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Surfaces and a custom device strategy are attached afterwards.
    pub fn into_options(self) -> Result<InitOptions, ConfigError> {
        Ok(InitOptions {
            app_name: to_cstring(self.app_name)?,
            api_version: parse_api_version(&self.api_version)?,
            required_instance_extensions: to_cstrings(self.instance.required_extensions)?,
            desired_instance_extensions: to_cstrings(self.instance.desired_extensions)?,
            required_layers: to_cstrings(self.instance.required_layers)?,
            desired_layers: to_cstrings(self.instance.desired_layers)?,
            enable_validation: self.validation,
            required_device_extensions: to_cstrings(self.device.required_extensions)?,
            desired_device_extensions: to_cstrings(self.device.desired_extensions)?,
            device_selection: None,
            surfaces: Vec::new(),
        })
    }
}

/// `"1.2"` or `"1.2.198"`, variant 0.
pub fn parse_api_version(s: &str) -> Result<u32, ConfigError> {
    let bad = || ConfigError::ApiVersion(s.to_owned());
    let parts = s
        .trim()
        .split('.')
        .map(|p| p.parse::<u32>().map_err(|_| bad()))
        .collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [major, minor] => Ok(vk::make_api_version(0, major, minor, 0)),
        [major, minor, patch] => Ok(vk::make_api_version(0, major, minor, patch)),
        _ => Err(bad()),
    }
}

fn to_cstring(s: String) -> Result<CString, ConfigError> {
    CString::new(s).map_err(|e| {
        let bytes = e.into_vec();
        ConfigError::Nul(String::from_utf8_lossy(&bytes).into_owned())
    })
}

fn to_cstrings(list: Vec<String>) -> Result<Vec<CString>, ConfigError> {
    list.into_iter().map(to_cstring).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = StartupConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, StartupConfig::default());
        let opts = cfg.into_options().unwrap();
        assert_eq!(opts.api_version, vk::API_VERSION_1_0);
        assert_eq!(opts.app_name.to_str().unwrap(), "vkstart");
    }

    #[test]
    fn sections_map_onto_options() {
        let cfg = StartupConfig::from_toml_str(
            r#"
            app_name = "probe"
            api_version = "1.2"
            validation = true

            [instance]
            required_extensions = ["VK_KHR_surface"]
            desired_layers = ["VK_LAYER_MESA_overlay"]

            [device]
            desired_extensions = ["VK_KHR_portability_subset"]
            "#,
        )
        .unwrap();
        let opts = cfg.into_options().unwrap();
        assert_eq!(opts.api_version, vk::API_VERSION_1_2);
        assert!(opts.enable_validation);
        assert_eq!(opts.required_instance_extensions[0].to_str().unwrap(), "VK_KHR_surface");
        assert_eq!(opts.desired_layers.len(), 1);
        assert_eq!(opts.desired_device_extensions.len(), 1);
        assert!(opts.required_device_extensions.is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            StartupConfig::from_toml_str("vsync = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn api_versions() {
        assert_eq!(parse_api_version("1.3").unwrap(), vk::API_VERSION_1_3);
        assert_eq!(
            parse_api_version("1.2.198").unwrap(),
            vk::make_api_version(0, 1, 2, 198)
        );
        for bad in ["", "1", "one.two", "1.2.3.4"] {
            assert!(matches!(parse_api_version(bad), Err(ConfigError::ApiVersion(_))));
        }
    }

    #[test]
    fn interior_nul_is_reported() {
        let cfg = StartupConfig {
            app_name: "bad\0name".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.into_options(), Err(ConfigError::Nul(_))));
    }
}
