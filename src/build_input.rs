//! CI build metadata
//!
//! What triggered this run: the commit to build, the pending code-review
//! patches to apply on top of it, and which builder is running. Built from
//! CLI flags, a buildbucket-style JSON document, and `buildset:` tags.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

/// Errors while assembling the build input
#[derive(Debug, thiserror::Error)]
pub enum BuildInputError {
    #[error("invalid gerrit change '{0}' (expected [HOST/]CHANGE/PATCHSET)")]
    InvalidChange(String),

    #[error("malformed buildset tag '{0}'")]
    MalformedBuildset(String),

    #[error("conflicting commits: '{first}' and '{second}'")]
    ConflictingCommits { first: String, second: String },

    #[error("failed to read build input: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse build input: {0}")]
    Json(#[from] serde_json::Error),
}

/// The commit a CI build was triggered for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitilesCommit {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub project: String,
    pub id: String,
}

/// A pending code-review change to cherry-pick onto the checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GerritChange {
    #[serde(default)]
    pub host: String,
    pub change: u64,
    pub patchset: u32,
}

impl GerritChange {
    pub fn new(change: u64, patchset: u32) -> Self {
        Self {
            host: String::new(),
            change,
            patchset,
        }
    }

    /// Gerrit ref holding this patchset, e.g. `refs/changes/00/1000/1`
    pub fn git_ref(&self) -> String {
        format!(
            "refs/changes/{:02}/{}/{}",
            self.change % 100,
            self.change,
            self.patchset
        )
    }

    /// `change/patchset`, used in step names
    pub fn label(&self) -> String {
        format!("{}/{}", self.change, self.patchset)
    }
}

impl fmt::Display for GerritChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.label())
        } else {
            write!(f, "{}/{}", self.host, self.label())
        }
    }
}

impl FromStr for GerritChange {
    type Err = BuildInputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BuildInputError::InvalidChange(s.to_string());
        let mut parts: Vec<&str> = s.rsplitn(3, '/').collect();
        parts.reverse();
        let (host, change, patchset) = match parts.as_slice() {
            [change, patchset] => ("", *change, *patchset),
            [host, change, patchset] if !host.is_empty() => (*host, *change, *patchset),
            _ => return Err(invalid()),
        };
        Ok(Self {
            host: host.to_string(),
            change: change.parse().map_err(|_| invalid())?,
            patchset: patchset.parse().map_err(|_| invalid())?,
        })
    }
}

/// Read-only description of what to check out and apply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitiles_commit: Option<GitilesCommit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gerrit_changes: Vec<GerritChange>,
}

impl BuildInput {
    /// Ref to fetch: the triggering commit, or `default_ref`
    pub fn checkout_ref(&self, default_ref: &str) -> String {
        match self.gitiles_commit {
            Some(ref commit) if !commit.id.is_empty() => commit.id.clone(),
            _ => default_ref.to_string(),
        }
    }

    /// Whether this run was triggered by code review
    pub fn has_patches(&self) -> bool {
        !self.gerrit_changes.is_empty()
    }

    fn set_commit(&mut self, commit: GitilesCommit) -> Result<(), BuildInputError> {
        if let Some(ref existing) = self.gitiles_commit {
            if existing.id != commit.id {
                return Err(BuildInputError::ConflictingCommits {
                    first: existing.id.clone(),
                    second: commit.id,
                });
            }
            return Ok(());
        }
        self.gitiles_commit = Some(commit);
        Ok(())
    }

    /// Fold a `buildset:` tag into this input; other tags are ignored
    pub fn apply_tag(&mut self, tag: &str) -> Result<(), BuildInputError> {
        static COMMIT: OnceLock<Regex> = OnceLock::new();
        static PATCH: OnceLock<Regex> = OnceLock::new();

        if let Some(rest) = tag.strip_prefix("buildset:commit/") {
            let re = COMMIT.get_or_init(|| {
                Regex::new(r"^gitiles/([^/]+)/(.+)/\+/([0-9a-f]{40})$").expect("static regex")
            });
            let caps = re
                .captures(rest)
                .ok_or_else(|| BuildInputError::MalformedBuildset(tag.to_string()))?;
            return self.set_commit(GitilesCommit {
                host: caps[1].to_string(),
                project: caps[2].to_string(),
                id: caps[3].to_string(),
            });
        }

        if let Some(rest) = tag.strip_prefix("buildset:patch/") {
            let re = PATCH.get_or_init(|| {
                Regex::new(r"^gerrit/([^/]+)/(\d+)/(\d+)$").expect("static regex")
            });
            let caps = re
                .captures(rest)
                .ok_or_else(|| BuildInputError::MalformedBuildset(tag.to_string()))?;
            let malformed = || BuildInputError::MalformedBuildset(tag.to_string());
            self.gerrit_changes.push(GerritChange {
                host: caps[1].to_string(),
                change: caps[2].parse().map_err(|_| malformed())?,
                patchset: caps[3].parse().map_err(|_| malformed())?,
            });
            return Ok(());
        }

        tracing::debug!(tag, "ignoring non-buildset tag");
        Ok(())
    }
}

/// Identity of the builder running this recipe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderId {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub builder: String,
}

/// Buildbucket-style build document, as handed over by the CI platform
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildDocument {
    #[serde(default)]
    pub builder: Option<BuilderId>,
    /// Legacy flat fields
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub input: Option<BuildInput>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl BuildDocument {
    pub fn from_json(json: &str) -> Result<Self, BuildInputError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, BuildInputError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Resolve into builder identity and build input. Explicit `builder`
    /// fields win over the legacy flat ones; tags add to `input`.
    pub fn resolve(self) -> Result<(BuilderId, BuildInput), BuildInputError> {
        let mut builder = self.builder.unwrap_or_default();
        if builder.project.is_empty() {
            builder.project = self.project.unwrap_or_default();
        }
        if builder.bucket.is_empty() {
            builder.bucket = self.bucket.unwrap_or_default();
        }

        let mut input = self.input.unwrap_or_default();
        for tag in &self.tags {
            input.apply_tag(tag)?;
        }
        Ok((builder, input))
    }
}
