//! Target platform
//!
//! The recipe only distinguishes the three desktop families CI runs on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("unsupported platform '{0}' (expected linux, mac or win)")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Mac,
    Win,
}

impl Platform {
    /// Every supported platform, in a stable order
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::Mac, Platform::Win];

    /// Platform of the machine this binary runs on
    pub fn host() -> Result<Self, PlatformError> {
        match std::env::consts::OS {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::Mac),
            "windows" => Ok(Platform::Win),
            other => Err(PlatformError::Unsupported(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Win => "win",
        }
    }

    pub fn is_mac(&self) -> bool {
        *self == Platform::Mac
    }

    pub fn is_win(&self) -> bool {
        *self == Platform::Win
    }

    /// Suffix appended to executables built for this platform
    pub fn exe_suffix(&self) -> &'static str {
        if self.is_win() {
            ".exe"
        } else {
            ""
        }
    }

    /// `name` with this platform's executable suffix
    pub fn exe(&self, name: &str) -> String {
        format!("{}{}", name, self.exe_suffix())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(Platform::Linux),
            "mac" | "macos" | "darwin" => Ok(Platform::Mac),
            "win" | "windows" => Ok(Platform::Win),
            _ => Err(PlatformError::Unsupported(s.to_string())),
        }
    }
}
