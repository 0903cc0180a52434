//! CIPD client
//!
//! Thin wrappers that turn package-manager operations into steps. cipd's
//! own install guarantees make concurrent `ensure` into a shared cache safe,
//! so nothing here locks.

mod package;

pub use package::{InstallMode, PackageDefinition, PackageEntry, PackageError};

use std::collections::BTreeMap;
use std::path::Path;

use gn_ci_step::{cmd, StepFailure, Steps};

/// Errors from package operations that touch the filesystem
#[derive(Debug, thiserror::Error)]
pub enum CipdError {
    #[error(transparent)]
    Step(#[from] StepFailure),

    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Package pins for `cipd ensure`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnsureFile {
    packages: BTreeMap<String, String>,
}

impl EnsureFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, name: impl Into<String>, version: impl Into<String>) -> &mut Self {
        self.packages.insert(name.into(), version.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Ensure-file text: one `<package> <version>` line per pin
    pub fn render(&self) -> String {
        self.packages
            .iter()
            .map(|(name, version)| format!("{} {}\n", name, version))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnsureFile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut file = EnsureFile::new();
        for (name, version) in iter {
            file.add_package(name, version);
        }
        file
    }
}

/// A registered package instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    pub package: String,
    pub instance_id: String,
}

/// Parse `cipd search` output:
///
/// ```text
/// Instances:
///   gn/gn/linux-amd64:Xk3m...
/// ```
pub fn parse_search_output(stdout: &str) -> Vec<Pin> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter_map(|line| line.rsplit_once(':'))
        .filter(|(package, instance_id)| {
            !package.contains(char::is_whitespace)
                && !instance_id.is_empty()
                && !instance_id.contains(char::is_whitespace)
        })
        .map(|(package, instance_id)| Pin {
            package: package.to_string(),
            instance_id: instance_id.to_string(),
        })
        .collect()
}

/// CIPD command wrapper
#[derive(Debug, Clone)]
pub struct Cipd {
    binary: String,
}

impl Cipd {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Install `pins` into `root`
    pub fn ensure(&self, steps: &mut Steps, root: &Path, pins: &EnsureFile) -> Result<(), StepFailure> {
        steps.step_stdin(
            "ensure_installed",
            cmd![&self.binary, "ensure", "-root", root, "-ensure-file", "-"],
            pins.render(),
        )?;
        Ok(())
    }

    /// Build a package file from `def` at `output`. The definition is
    /// written next to the output file.
    pub fn build_from_pkg(
        &self,
        steps: &mut Steps,
        def: &PackageDefinition,
        output: &Path,
    ) -> Result<(), CipdError> {
        let def_path = output.with_extension("pkg_def.json");
        def.write_to_file(&def_path)?;
        steps.step(
            &format!("build {}", def.package),
            cmd![&self.binary, "pkg-build", "-pkg-def", &def_path, "-out", output],
        )?;
        Ok(())
    }

    /// Find instances of `package` carrying `tag`
    pub fn search(&self, steps: &mut Steps, package: &str, tag: &str) -> Result<Vec<Pin>, StepFailure> {
        let output = steps.step_capture(
            &format!("cipd search {} {}", package, tag),
            cmd![&self.binary, "search", package, "-tag", tag],
        )?;
        Ok(parse_search_output(&output.stdout))
    }

    /// Upload and register a package file, moving `refs` and attaching `tags`
    pub fn register(
        &self,
        steps: &mut Steps,
        package: &str,
        package_file: &Path,
        refs: &[String],
        tags: &BTreeMap<String, String>,
    ) -> Result<(), StepFailure> {
        let mut argv = cmd![&self.binary, "pkg-register", package_file];
        for r in refs {
            argv.push("-ref".to_string());
            argv.push(r.clone());
        }
        for (key, value) in tags {
            argv.push("-tag".to_string());
            argv.push(format!("{}:{}", key, value));
        }
        steps.step(&format!("register {}", package), argv)?;
        Ok(())
    }
}
