//! Recipe configuration model and validation

use std::collections::{BTreeMap, HashSet};

use gn_ci_step::Platform;
use serde::{Deserialize, Serialize};

use crate::macos_sdk::{SdkKind, SdkSpec};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Where the sources come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Git remote fetched from, also recorded on published packages
    pub repository: String,
    /// Ref fetched when the build was not triggered by a specific commit
    pub default_ref: String,
    /// Checkout directory, relative to the start directory
    pub checkout_dir: String,
}

/// Pinned tools installed with `cipd ensure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Install directory, relative to the start directory
    pub dir: String,
    /// Packages installed on every platform
    pub common: BTreeMap<String, String>,
    /// Extra packages per platform name; every platform needs an entry
    pub platforms: BTreeMap<String, BTreeMap<String, String>>,
}

impl ToolsConfig {
    /// Package pins for `platform`
    pub fn packages_for(&self, platform: Platform) -> BTreeMap<String, String> {
        let mut packages = self.common.clone();
        if let Some(extra) = self.platforms.get(platform.name()) {
            packages.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        packages
    }
}

/// A named build variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub name: String,
    /// Extra arguments for `build/gen.py`
    #[serde(default)]
    pub args: Vec<String>,
}

impl BuildConfiguration {
    pub fn new(name: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Built in order; fail-fast
    pub configurations: Vec<BuildConfiguration>,
    /// Output directory, relative to the checkout
    pub out_dir: String,
    /// Unit test binary inside `out_dir`
    pub test_binary: String,
}

/// What gets packaged and where it is published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    /// CIPD package name; `${platform}` is expanded by cipd
    pub name: String,
    /// Executable inside the output directory (platform suffix added)
    pub binary: String,
    /// Version file written into the package on install
    pub version_file: String,
    /// Configuration whose output is packaged; must be built last
    pub configuration: String,
    /// Package file name inside the cleanup directory
    pub file_name: String,
    /// Refs moved to a newly registered instance
    pub refs: Vec<String>,
    /// Only builders in this project publish
    pub internal_project: String,
}

/// Xcode SDK used on mac builders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    pub sdk_version: String,
    pub tool_package: String,
    pub tool_version: String,
    #[serde(default)]
    pub kind: SdkKind,
    /// Named cache directory, relative to the cache root
    #[serde(default = "default_sdk_cache")]
    pub cache_name: String,
}

fn default_sdk_cache() -> String {
    "macos_sdk".to_string()
}

impl SdkConfig {
    pub fn spec(&self) -> SdkSpec {
        SdkSpec::new(&self.sdk_version, &self.tool_package, &self.tool_version)
    }
}

/// External commands, overridable for unusual bot images
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandsConfig {
    pub git: String,
    pub cipd: String,
    pub python: String,
}

/// Complete recipe configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeConfig {
    pub source: SourceConfig,
    pub tools: ToolsConfig,
    pub build: BuildConfig,
    pub package: PackageConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macos_sdk: Option<SdkConfig>,
    pub commands: CommandsConfig,
}

impl RecipeConfig {
    /// Check invariants the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.source.repository.trim().is_empty() {
            return invalid("source.repository must not be empty".to_string());
        }
        if self.source.default_ref.trim().is_empty() {
            return invalid("source.default_ref must not be empty".to_string());
        }

        for platform in Platform::ALL {
            if !self.tools.platforms.contains_key(platform.name()) {
                return invalid(format!(
                    "tools.platforms is missing an entry for '{}'",
                    platform
                ));
            }
        }
        for name in self.tools.platforms.keys() {
            if name.parse::<Platform>().is_err() {
                return invalid(format!("tools.platforms has unknown platform '{}'", name));
            }
        }

        let configs = &self.build.configurations;
        if configs.is_empty() {
            return invalid("build.configurations must not be empty".to_string());
        }
        let mut seen = HashSet::new();
        for config in configs {
            if config.name.trim().is_empty() {
                return invalid("build configuration names must not be empty".to_string());
            }
            if !seen.insert(config.name.as_str()) {
                return invalid(format!("duplicate build configuration '{}'", config.name));
            }
        }
        // All configurations share one output directory, so the packaged
        // one has to be the last one built.
        let packaged = match self.packaged_configuration() {
            Some(packaged) => packaged,
            None => {
                return invalid(format!(
                    "packaged configuration '{}' is not a build configuration",
                    self.package.configuration
                ))
            }
        };
        if configs.last().map(|last| last.name.as_str()) != Some(packaged.name.as_str()) {
            return invalid(format!(
                "packaged configuration '{}' must be the last build configuration",
                self.package.configuration
            ));
        }

        if self.package.name.trim().is_empty() || self.package.binary.trim().is_empty() {
            return invalid("package.name and package.binary must not be empty".to_string());
        }

        if let Some(ref sdk) = self.macos_sdk {
            if sdk.sdk_version.trim().is_empty() || sdk.tool_package.trim().is_empty() {
                return invalid(
                    "macos_sdk.sdk_version and macos_sdk.tool_package must not be empty"
                        .to_string(),
                );
            }
        }

        Ok(())
    }

    /// The configuration whose output is packaged
    pub fn packaged_configuration(&self) -> Option<&BuildConfiguration> {
        self.build
            .configurations
            .iter()
            .find(|c| c.name == self.package.configuration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(config: &RecipeConfig, needle: &str) {
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(needle), "'{}' should mention '{}'", err, needle);
    }

    #[test]
    fn test_packages_for_platform() {
        let tools = ToolsConfig::default();

        let linux = tools.packages_for(Platform::Linux);
        assert_eq!(linux.len(), 2);
        assert_eq!(linux["infra/ninja/${platform}"], "version:1.8.2");
        assert_eq!(linux["fuchsia/clang/${platform}"], "goma");

        for platform in [Platform::Mac, Platform::Win] {
            let pkgs = tools.packages_for(platform);
            assert_eq!(pkgs.len(), 1);
            assert!(pkgs.contains_key("infra/ninja/${platform}"));
        }
    }

    #[test]
    fn test_missing_platform_table() {
        let mut config = RecipeConfig::default();
        config.tools.platforms.remove("win");
        assert_invalid(&config, "'win'");
    }

    #[test]
    fn test_unknown_platform_table() {
        let mut config = RecipeConfig::default();
        config.tools.platforms.insert("plan9".to_string(), BTreeMap::new());
        assert_invalid(&config, "plan9");
    }

    #[test]
    fn test_release_must_be_last() {
        let mut config = RecipeConfig::default();
        config.build.configurations.reverse();
        assert_invalid(&config, "must be the last");
    }

    #[test]
    fn test_packaged_configuration_must_exist() {
        let mut config = RecipeConfig::default();
        config.package.configuration = "profile".to_string();
        assert_invalid(&config, "'profile' is not a build configuration");
    }

    #[test]
    fn test_duplicate_configuration() {
        let mut config = RecipeConfig::default();
        config
            .build
            .configurations
            .insert(0, BuildConfiguration::new("release", &[]));
        assert_invalid(&config, "duplicate");
    }

    #[test]
    fn test_empty_configurations() {
        let mut config = RecipeConfig::default();
        config.build.configurations.clear();
        assert_invalid(&config, "must not be empty");
    }

    #[test]
    fn test_empty_sdk_version() {
        let mut config = RecipeConfig::default();
        config.macos_sdk = Some(SdkConfig {
            sdk_version: " ".to_string(),
            tool_package: "infra/tools/mac_toolchain/${platform}".to_string(),
            tool_version: "latest".to_string(),
            kind: SdkKind::Mac,
            cache_name: default_sdk_cache(),
        });
        assert_invalid(&config, "macos_sdk");
    }

    #[test]
    fn test_packaged_configuration_lookup() {
        let config = RecipeConfig::default();
        assert_eq!(config.packaged_configuration().unwrap().name, "release");
    }
}
