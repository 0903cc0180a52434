//! Scoped Xcode SDK activation
//!
//! Deploys the `mac_toolchain` helper and an Xcode.app bundle into a named
//! cache, points the system's active developer directory at it for the
//! duration of a block, and resets it afterwards no matter how the block
//! ended.
//!
//! To avoid rebuilding the bundle on every run, give builders a named cache
//! (`macos_sdk` by default). Builders that need a different SDK version
//! should use a differently named cache. Mac and iOS builders sharing bots
//! are better off sharing one cache and always fetching the iOS kind.
//!
//! Everything here is a no-op on non-mac platforms.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use gn_ci_step::{cmd, StepFailure, Steps};
use serde::{Deserialize, Serialize};

use crate::cipd::{Cipd, EnsureFile};

/// Sub-path of the cache holding the Xcode bundle
pub const XCODE_APP: &str = "XCode.app";

/// Helper binary deployed by the tool package
pub const MAC_TOOLCHAIN: &str = "mac_toolchain";

/// Which parts of Xcode to install
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkKind {
    /// Base Xcode distribution
    #[default]
    Mac,
    /// Base distribution plus the iOS simulators (much larger)
    Ios,
}

impl SdkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdkKind::Mac => "mac",
            SdkKind::Ios => "ios",
        }
    }
}

impl std::str::FromStr for SdkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mac" => Ok(SdkKind::Mac),
            "ios" => Ok(SdkKind::Ios),
            other => Err(format!("unknown SDK kind '{}' (expected mac or ios)", other)),
        }
    }
}

/// Which Xcode to deploy and with which helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkSpec {
    sdk_version: String,
    tool_package: String,
    tool_version: String,
}

impl SdkSpec {
    /// Xcode build versions are matched case-insensitively by the helper,
    /// so the version is normalized to lower case.
    pub fn new(sdk_version: &str, tool_package: &str, tool_version: &str) -> Self {
        Self {
            sdk_version: sdk_version.to_lowercase(),
            tool_package: tool_package.to_string(),
            tool_version: tool_version.to_string(),
        }
    }

    pub fn sdk_version(&self) -> &str {
        &self.sdk_version
    }

    pub fn tool_package(&self) -> &str {
        &self.tool_package
    }

    pub fn tool_version(&self) -> &str {
        &self.tool_version
    }
}

/// The system-wide "active developer directory" pointer
pub trait DeveloperDirSwitch {
    /// Point the active developer directory at `bundle`
    fn select(&self, steps: &mut Steps, bundle: &Path) -> Result<(), StepFailure>;

    /// Restore the system default
    fn reset(&self, steps: &mut Steps) -> Result<(), StepFailure>;
}

/// `sudo xcode-select`
#[derive(Debug, Clone, Default)]
pub struct XcodeSelect;

impl DeveloperDirSwitch for XcodeSelect {
    fn select(&self, steps: &mut Steps, bundle: &Path) -> Result<(), StepFailure> {
        steps.step(
            "select XCode",
            cmd!["sudo", "xcode-select", "--switch", bundle],
        )?;
        Ok(())
    }

    fn reset(&self, steps: &mut Steps) -> Result<(), StepFailure> {
        steps.step("reset XCode", cmd!["sudo", "xcode-select", "--reset"])?;
        Ok(())
    }
}

/// SDK activator bound to a cache directory
#[derive(Debug, Clone)]
pub struct MacosSdk<S = XcodeSelect> {
    spec: SdkSpec,
    cache_dir: PathBuf,
    cipd: Cipd,
    switch: S,
}

impl MacosSdk<XcodeSelect> {
    pub fn new(spec: SdkSpec, cache_dir: impl Into<PathBuf>, cipd: Cipd) -> Self {
        Self::with_switch(spec, cache_dir, cipd, XcodeSelect)
    }
}

impl<S: DeveloperDirSwitch> MacosSdk<S> {
    pub fn with_switch(spec: SdkSpec, cache_dir: impl Into<PathBuf>, cipd: Cipd, switch: S) -> Self {
        Self {
            spec,
            cache_dir: cache_dir.into(),
            cipd,
            switch,
        }
    }

    pub fn spec(&self) -> &SdkSpec {
        &self.spec
    }

    /// Where the Xcode bundle is deployed
    pub fn sdk_app(&self) -> PathBuf {
        self.cache_dir.join(XCODE_APP)
    }

    /// Run `block` with Xcode activated.
    ///
    /// On mac the reset step runs exactly once after the block, even if
    /// activation failed part way, the block returned an error, or the
    /// block panicked. The first error wins: a reset failure is only
    /// returned when everything before it succeeded.
    pub fn with_sdk<T, E>(
        &self,
        steps: &mut Steps,
        kind: SdkKind,
        block: impl FnOnce(&mut Steps) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StepFailure>,
    {
        if !steps.platform().is_mac() {
            return block(steps);
        }

        let activation = steps.infra(|steps| {
            let app = self.ensure_sdk(steps, kind)?;
            self.switch.select(steps, &app)
        });

        let outcome = match activation {
            Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| block(steps))),
            Err(failure) => Ok(Err(E::from(failure))),
        };

        let reset = steps.infra(|steps| self.switch.reset(steps));

        match outcome {
            Err(payload) => {
                if let Err(failure) = reset {
                    tracing::error!(%failure, "Xcode reset failed while unwinding");
                }
                panic::resume_unwind(payload)
            }
            Ok(Err(e)) => {
                if let Err(failure) = reset {
                    tracing::warn!(%failure, "Xcode reset failed after an earlier failure");
                }
                Err(e)
            }
            Ok(Ok(value)) => {
                reset?;
                Ok(value)
            }
        }
    }

    /// Ensure the helper and the Xcode bundle are in the cache; returns the
    /// bundle path.
    fn ensure_sdk(&self, steps: &mut Steps, kind: SdkKind) -> Result<PathBuf, StepFailure> {
        let mut pins = EnsureFile::new();
        pins.add_package(self.spec.tool_package(), self.spec.tool_version());
        self.cipd.ensure(steps, &self.cache_dir, &pins)?;

        let sdk_app = self.sdk_app();
        steps.step(
            "install xcode",
            cmd![
                self.cache_dir.join(MAC_TOOLCHAIN),
                "install",
                "-kind",
                kind.as_str(),
                "-xcode-version",
                self.spec.sdk_version(),
                "-output-dir",
                &sdk_app
            ],
        )?;
        Ok(sdk_app)
    }
}
