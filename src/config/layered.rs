//! Layered loading with provenance
//!
//! Each contributing layer is recorded with its origin and, for files, the
//! SHA-256 of the raw bytes, so a run summary shows exactly which config
//! produced it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::merge::merge_layers;
use super::recipe::{ConfigError, RecipeConfig};
use crate::macos_sdk::SdkKind;

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    File,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Settings that can be overridden from the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub repository: Option<String>,
    pub default_ref: Option<String>,
    pub internal_project: Option<String>,
    pub git: Option<String>,
    pub cipd: Option<String>,
    pub python: Option<String>,
    pub sdk_version: Option<String>,
    pub sdk_tool_package: Option<String>,
    pub sdk_tool_version: Option<String>,
    pub sdk_kind: Option<SdkKind>,
}

impl ConfigOverrides {
    /// Overrides as a merge layer; `None` when nothing is overridden
    pub fn to_value(&self) -> Option<Value> {
        let mut root = Map::new();
        let mut set = |section: &str, key: &str, value: Value| {
            let table = root
                .entry(section.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(table) = table {
                table.insert(key.to_string(), value);
            }
        };

        let strings = [
            ("source", "repository", &self.repository),
            ("source", "default_ref", &self.default_ref),
            ("package", "internal_project", &self.internal_project),
            ("commands", "git", &self.git),
            ("commands", "cipd", &self.cipd),
            ("commands", "python", &self.python),
            ("macos_sdk", "sdk_version", &self.sdk_version),
            ("macos_sdk", "tool_package", &self.sdk_tool_package),
            ("macos_sdk", "tool_version", &self.sdk_tool_version),
        ];
        for (section, key, value) in strings {
            if let Some(v) = value {
                set(section, key, json!(v));
            }
        }
        if let Some(kind) = self.sdk_kind {
            set("macos_sdk", "kind", json!(kind));
        }

        if root.is_empty() {
            None
        } else {
            Some(Value::Object(root))
        }
    }
}

/// Validated configuration plus the layers that produced it
#[derive(Debug, Clone, Serialize)]
pub struct LoadedConfig {
    pub config: RecipeConfig,
    pub sources: Vec<ConfigSource>,
}

impl LoadedConfig {
    /// Merge built-in defaults, `file` (which must exist if given), and
    /// `overrides`, then validate.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let builtin = serde_json::to_value(RecipeConfig::default())
            .map_err(|e| ConfigError::ParseError(format!("built-in defaults: {}", e)))?;
        let mut layers = vec![builtin];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = file {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = overrides.to_value() {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let merged = merge_layers(layers);
        let config: RecipeConfig = serde_json::from_value(merged)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        tracing::debug!(layers = sources.len(), "configuration loaded");
        Ok(Self { config, sources })
    }
}

/// Parse a TOML file into a merge layer, returning it with its digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path)
        .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let contents = String::from_utf8(bytes)
        .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
    let table: toml::Table = toml::from_str(&contents)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

    // toml values serialize to the equivalent JSON structure
    let value = serde_json::to_value(table)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
    Ok((value, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_only() {
        let loaded = LoadedConfig::load(None, &ConfigOverrides::default()).unwrap();

        assert_eq!(loaded.config, RecipeConfig::default());
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].origin, ConfigOrigin::Builtin);
    }

    #[test]
    fn test_file_layer_merges_and_records_digest() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[source]").unwrap();
        writeln!(temp, "default_ref = \"refs/heads/master\"").unwrap();
        writeln!(temp, "[tools.platforms.mac]").unwrap();
        writeln!(temp, "\"infra/tools/mac_toolchain/${{platform}}\" = \"latest\"").unwrap();

        let loaded = LoadedConfig::load(Some(temp.path()), &ConfigOverrides::default()).unwrap();

        assert_eq!(loaded.config.source.default_ref, "refs/heads/master");
        assert_eq!(loaded.config.source.repository, "https://gn.googlesource.com/gn");
        assert_eq!(loaded.config.tools.platforms["mac"].len(), 1);
        assert!(loaded.config.tools.platforms["linux"].contains_key("fuchsia/clang/${platform}"));

        let file = &loaded.sources[1];
        assert_eq!(file.origin, ConfigOrigin::File);
        assert_eq!(file.digest.as_ref().map(|d| d.len()), Some(64));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[package]").unwrap();
        writeln!(temp, "internal_project = \"from-file\"").unwrap();

        let overrides = ConfigOverrides {
            internal_project: Some("from-cli".to_string()),
            cipd: Some("/opt/cipd".to_string()),
            ..Default::default()
        };
        let loaded = LoadedConfig::load(Some(temp.path()), &overrides).unwrap();

        assert_eq!(loaded.config.package.internal_project, "from-cli");
        assert_eq!(loaded.config.commands.cipd, "/opt/cipd");
        assert_eq!(loaded.sources.last().unwrap().origin, ConfigOrigin::Cli);
    }

    #[test]
    fn test_sdk_from_overrides() {
        let overrides = ConfigOverrides {
            sdk_version: Some("12A7209".to_string()),
            sdk_tool_package: Some("infra/tools/mac_toolchain/${platform}".to_string()),
            sdk_tool_version: Some("git_revision:abc".to_string()),
            sdk_kind: Some(SdkKind::Ios),
            ..Default::default()
        };
        let loaded = LoadedConfig::load(None, &overrides).unwrap();

        let sdk = loaded.config.macos_sdk.unwrap();
        assert_eq!(sdk.kind, SdkKind::Ios);
        assert_eq!(sdk.cache_name, "macos_sdk");
        assert_eq!(sdk.spec().sdk_version(), "12a7209");
    }

    #[test]
    fn test_partial_sdk_is_parse_error() {
        let overrides = ConfigOverrides {
            sdk_version: Some("12A7209".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            LoadedConfig::load(None, &overrides),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = LoadedConfig::load(
            Some(Path::new("/nonexistent/recipe.toml")),
            &ConfigOverrides::default(),
        );
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let mut temp = NamedTempFile::new().unwrap();
        writeln!(temp, "[[build.configurations]]").unwrap();
        writeln!(temp, "name = \"debug\"").unwrap();

        let result = LoadedConfig::load(Some(temp.path()), &ConfigOverrides::default());
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
