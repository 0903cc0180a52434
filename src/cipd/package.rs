//! Package definitions for `cipd pkg-build`
//!
//! Serialized as JSON, which cipd reads as YAML:
//!
//! ```json
//! {"package": "gn/gn/${platform}", "root": "/b/gn/out", "install_mode": "copy",
//!  "data": [{"file": "gn"}, {"version_file": ".versions/gn.cipd_version"}]}
//! ```

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("'{path}' is not inside package root '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("version file path '{0}' must be relative and stay inside the package")]
    InvalidVersionFile(String),

    #[error("failed to write package definition: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize package definition: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// How cipd deploys package files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    #[default]
    Copy,
    Symlink,
}

/// One entry of the package's `data` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageEntry {
    /// A file, relative to the package root, using `/` separators
    File(String),
    /// Where cipd writes the installed instance's version on deployment
    VersionFile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDefinition {
    pub package: String,
    pub root: PathBuf,
    pub install_mode: InstallMode,
    pub data: Vec<PackageEntry>,
}

impl PackageDefinition {
    pub fn new(package: impl Into<String>, root: impl Into<PathBuf>, install_mode: InstallMode) -> Self {
        Self {
            package: package.into(),
            root: root.into(),
            install_mode,
            data: Vec::new(),
        }
    }

    /// Add a file given by its full path; it must live under the root
    pub fn add_file(&mut self, path: &Path) -> Result<(), PackageError> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| PackageError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            return Err(PackageError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            });
        }
        self.data.push(PackageEntry::File(parts.join("/")));
        Ok(())
    }

    pub fn add_version_file(&mut self, relative: &str) -> Result<(), PackageError> {
        let path = Path::new(relative);
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if relative.is_empty() || escapes {
            return Err(PackageError::InvalidVersionFile(relative.to_string()));
        }
        self.data.push(PackageEntry::VersionFile(relative.to_string()));
        Ok(())
    }

    /// Files in the package, relative to the root
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.data.iter().filter_map(|e| match e {
            PackageEntry::File(f) => Some(f.as_str()),
            PackageEntry::VersionFile(_) => None,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), PackageError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> PackageDefinition {
        PackageDefinition::new("gn/gn/${platform}", "/b/gn/out", InstallMode::Copy)
    }

    #[test]
    fn test_add_file_relative_to_root() {
        let mut def = definition();
        def.add_file(Path::new("/b/gn/out/gn")).unwrap();
        def.add_file(Path::new("/b/gn/out/sub/tool")).unwrap();

        assert_eq!(def.files().collect::<Vec<_>>(), vec!["gn", "sub/tool"]);
    }

    #[test]
    fn test_add_file_outside_root() {
        let mut def = definition();
        assert!(matches!(
            def.add_file(Path::new("/b/gn/gn")),
            Err(PackageError::OutsideRoot { .. })
        ));
        assert!(def.add_file(Path::new("/b/gn/out")).is_err());
        assert!(def.data.is_empty());
    }

    #[test]
    fn test_version_file_validation() {
        let mut def = definition();
        def.add_version_file(".versions/gn.cipd_version").unwrap();
        assert!(def.add_version_file("../escape").is_err());
        assert!(def.add_version_file("/abs/path").is_err());
        assert!(def.add_version_file("").is_err());
        assert_eq!(def.data.len(), 1);
    }

    #[test]
    fn test_json_layout_matches_cipd() {
        let mut def = definition();
        def.add_file(Path::new("/b/gn/out/gn")).unwrap();
        def.add_version_file(".versions/gn.cipd_version").unwrap();

        let value: serde_json::Value = serde_json::from_str(&def.to_json().unwrap()).unwrap();
        assert_eq!(value["package"], "gn/gn/${platform}");
        assert_eq!(value["install_mode"], "copy");
        assert_eq!(value["data"][0]["file"], "gn");
        assert_eq!(value["data"][1]["version_file"], ".versions/gn.cipd_version");
    }
}
