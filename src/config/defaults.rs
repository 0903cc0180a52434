//! Built-in defaults (layer 1)

use std::collections::BTreeMap;

use super::recipe::{
    BuildConfig, BuildConfiguration, CommandsConfig, PackageConfig, RecipeConfig, SourceConfig,
    ToolsConfig,
};

/// Default config file location, relative to the start directory
pub const DEFAULT_CONFIG_PATH: &str = ".gn-ci/recipe.toml";

/// Upstream GN repository
pub const DEFAULT_REPOSITORY: &str = "https://gn.googlesource.com/gn";

/// Project whose builders are trusted to publish packages
pub const INTERNAL_PROJECT: &str = "infra-internal";

fn pins(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(pkg, version)| (pkg.to_string(), version.to_string()))
        .collect()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            default_ref: "refs/heads/main".to_string(),
            checkout_dir: "gn".to_string(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(
            "linux".to_string(),
            pins(&[("fuchsia/clang/${platform}", "goma")]),
        );
        platforms.insert("mac".to_string(), BTreeMap::new());
        platforms.insert("win".to_string(), BTreeMap::new());

        Self {
            dir: "cipd".to_string(),
            common: pins(&[("infra/ninja/${platform}", "version:1.8.2")]),
            platforms,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            // Release last: its output is what gets packaged
            configurations: vec![
                BuildConfiguration::new("debug", &["-d"]),
                BuildConfiguration::new("release", &[]),
            ],
            out_dir: "out".to_string(),
            test_binary: "gn_unittests".to_string(),
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            name: "gn/gn/${platform}".to_string(),
            binary: "gn".to_string(),
            version_file: ".versions/gn.cipd_version".to_string(),
            configuration: "release".to_string(),
            file_name: "gn.cipd".to_string(),
            refs: vec!["latest".to_string()],
            internal_project: INTERNAL_PROJECT.to_string(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            git: "git".to_string(),
            cipd: "cipd".to_string(),
            python: "python3".to_string(),
        }
    }
}

impl Default for RecipeConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            tools: ToolsConfig::default(),
            build: BuildConfig::default(),
            package: PackageConfig::default(),
            macos_sdk: None,
            commands: CommandsConfig::default(),
        }
    }
}
