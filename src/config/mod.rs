//! Recipe configuration
//!
//! Three layers, later layers winning:
//! 1. Built-in defaults (what the GN builders use)
//! 2. Config file (`.gn-ci/recipe.toml` by default)
//! 3. CLI overrides

mod defaults;
mod layered;
mod merge;
mod recipe;

pub use defaults::{DEFAULT_CONFIG_PATH, DEFAULT_REPOSITORY, INTERNAL_PROJECT};
pub use layered::{ConfigOrigin, ConfigOverrides, ConfigSource, LoadedConfig};
pub use merge::{deep_merge, merge_layers};
pub use recipe::{
    BuildConfig, BuildConfiguration, CommandsConfig, ConfigError, PackageConfig, RecipeConfig,
    SdkConfig, SourceConfig, ToolsConfig,
};
