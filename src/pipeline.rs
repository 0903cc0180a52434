//! Build pipeline
//!
//! One run, in order:
//! - check out the source and apply pending patches
//! - install pinned build tools
//! - generate, build and test every configuration, fail-fast
//! - on unpatched runs, package the binary of the last configuration
//! - on the internal project, publish it keyed by source revision
//!
//! Steps run through `Steps`, so the whole pipeline is exercised in tests
//! with a mock runner.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gn_ci_step::{cmd, Context, Platform, StepFailure, Steps};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::build_input::{BuildInput, BuilderId};
use crate::checkout::Checkout;
use crate::cipd::{Cipd, EnsureFile, InstallMode, PackageDefinition};
use crate::config::{BuildConfiguration, RecipeConfig};
use crate::environment::build_env;
use crate::error::RecipeError;
use crate::macos_sdk::{MacosSdk, SdkKind};

/// Marker recorded when the current revision is already published
pub const UP_TO_DATE_MARKER: &str = "Package is up-to-date";

/// Directories a run works in
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    /// Working directory: source checkout and tools live here
    pub start_dir: PathBuf,
    /// Root of the named caches (the Xcode cache lives below it)
    pub cache_dir: PathBuf,
    /// Scratch directory for the package file and its definition
    pub cleanup_dir: PathBuf,
}

impl PipelinePaths {
    /// Build paths anchored at the current directory. Build steps run with
    /// their cwd inside the checkout, so every path on their command line
    /// must be absolute.
    pub fn new(
        start_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        cleanup_dir: impl Into<PathBuf>,
    ) -> io::Result<Self> {
        let cwd = std::env::current_dir()?;
        let anchor = |dir: PathBuf| if dir.is_absolute() { dir } else { cwd.join(dir) };
        Ok(Self {
            start_dir: anchor(start_dir.into()),
            cache_dir: anchor(cache_dir.into()),
            cleanup_dir: anchor(cleanup_dir.into()),
        })
    }
}

/// What the publish step decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum PublishDecision {
    /// An instance tagged with this revision already exists
    UpToDate { instance_id: String },
    /// The package file was registered for this revision
    Register { revision: String },
}

/// A package file produced by the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltPackage {
    pub name: String,
    pub path: PathBuf,
    /// Digest of the package file, when it could be read back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Result of a run that reached the end of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    /// Configurations that built and passed their tests, in order
    pub configurations: Vec<String>,
    /// Absent on patched runs
    pub package: Option<BuiltPackage>,
    /// Absent outside the internal project
    pub publish: Option<PublishDecision>,
}

/// Commands for one configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedConfiguration {
    pub name: String,
    pub generate: Vec<String>,
    pub ninja: Vec<String>,
    pub test: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedSdk {
    pub sdk_version: String,
    pub kind: SdkKind,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPackage {
    pub definition: PackageDefinition,
    pub file_name: String,
    /// Whether the builder may publish
    pub publish: bool,
}

/// Everything a run would do, resolved for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub platform: Platform,
    pub builder: BuilderId,
    pub repository: String,
    pub checkout_ref: String,
    pub patches: Vec<String>,
    pub source_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub tools: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk: Option<PlannedSdk>,
    pub configurations: Vec<PlannedConfiguration>,
    /// Absent on patched runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PlannedPackage>,
}

/// One recipe run over a resolved configuration and build input
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    config: &'a RecipeConfig,
    paths: PipelinePaths,
    builder: &'a BuilderId,
    input: &'a BuildInput,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a RecipeConfig,
        paths: PipelinePaths,
        builder: &'a BuilderId,
        input: &'a BuildInput,
    ) -> Self {
        Self {
            config,
            paths,
            builder,
            input,
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.paths.start_dir.join(&self.config.source.checkout_dir)
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.paths.start_dir.join(&self.config.tools.dir)
    }

    fn out_dir(&self) -> PathBuf {
        self.source_dir().join(&self.config.build.out_dir)
    }

    fn cipd(&self) -> Cipd {
        Cipd::new(&self.config.commands.cipd)
    }

    /// Only trusted builders publish
    pub fn publishes(&self) -> bool {
        self.builder.project == self.config.package.internal_project
    }

    /// Resolve the run for `platform` without executing anything
    pub fn plan(&self, platform: Platform) -> Result<Plan, RecipeError> {
        let configurations = self
            .config
            .build
            .configurations
            .iter()
            .map(|c| PlannedConfiguration {
                name: c.name.clone(),
                generate: self.generate_argv(c),
                ninja: self.ninja_argv(platform),
                test: self.test_argv(platform),
            })
            .collect();

        let sdk = match (&self.config.macos_sdk, platform.is_mac()) {
            (Some(sdk), true) => Some(PlannedSdk {
                sdk_version: sdk.spec().sdk_version().to_string(),
                kind: sdk.kind,
                cache_dir: self.paths.cache_dir.join(&sdk.cache_name),
            }),
            _ => None,
        };

        let package = if self.input.has_patches() {
            None
        } else {
            Some(PlannedPackage {
                definition: self.package_definition(platform)?,
                file_name: self.config.package.file_name.clone(),
                publish: self.publishes(),
            })
        };

        Ok(Plan {
            platform,
            builder: self.builder.clone(),
            repository: self.config.source.repository.clone(),
            checkout_ref: self.input.checkout_ref(&self.config.source.default_ref),
            patches: self.input.gerrit_changes.iter().map(|c| c.label()).collect(),
            source_dir: self.source_dir(),
            tools_dir: self.tools_dir(),
            tools: self.config.tools.packages_for(platform),
            env: build_env(platform, &self.tools_dir()),
            sdk,
            configurations,
            package,
        })
    }

    /// Execute the whole recipe
    pub fn run(&self, steps: &mut Steps) -> Result<PipelineOutcome, RecipeError> {
        let platform = steps.platform();
        let src_dir = self.source_dir();
        let tools_dir = self.tools_dir();

        tracing::info!(
            %platform,
            builder = %self.builder.builder,
            project = %self.builder.project,
            patches = self.input.gerrit_changes.len(),
            "starting run"
        );

        let checkout = Checkout {
            git: &self.config.commands.git,
            repository: &self.config.source.repository,
            default_ref: &self.config.source.default_ref,
        };
        checkout.run(steps, &src_dir, self.input)?;

        let pins: EnsureFile = self.config.tools.packages_for(platform).into_iter().collect();
        steps.infra(|steps| self.cipd().ensure(steps, &tools_dir, &pins))?;

        let env = build_env(platform, &tools_dir);
        let mut outcome = PipelineOutcome::default();
        for config in &self.config.build.configurations {
            self.build_configuration(steps, config, &env)?;
            outcome.configurations.push(config.name.clone());
        }

        if self.input.has_patches() {
            tracing::info!("patched run, skipping package");
            return Ok(outcome);
        }

        let package = steps.infra(|steps| self.build_package(steps))?;

        if self.publishes() {
            let decision = steps.infra(|steps| self.publish(steps, &package.path))?;
            outcome.publish = Some(decision);
        } else {
            tracing::info!(project = %self.builder.project, "not an internal builder, skipping publish");
        }
        outcome.package = Some(package);

        Ok(outcome)
    }

    fn generate_argv(&self, config: &BuildConfiguration) -> Vec<String> {
        let mut argv = cmd![
            &self.config.commands.python,
            self.source_dir().join("build").join("gen.py")
        ];
        argv.extend(config.args.iter().cloned());
        argv
    }

    fn ninja_argv(&self, platform: Platform) -> Vec<String> {
        cmd![
            self.tools_dir().join(platform.exe("ninja")),
            "-C",
            self.out_dir()
        ]
    }

    fn test_argv(&self, platform: Platform) -> Vec<String> {
        cmd![self.out_dir().join(platform.exe(&self.config.build.test_binary))]
    }

    fn build_configuration(
        &self,
        steps: &mut Steps,
        config: &BuildConfiguration,
        env: &BTreeMap<String, String>,
    ) -> Result<(), StepFailure> {
        let platform = steps.platform();
        tracing::info!(configuration = %config.name, "building configuration");

        steps.nest(&config.name, |steps| {
            steps.nest("build", |steps| {
                let ctx = Context::new().cwd(self.source_dir()).env(env.clone());
                steps.with_context(ctx, |steps| {
                    self.with_sdk(steps, |steps| {
                        steps.step("generate", self.generate_argv(config))?;
                        steps.step("ninja", self.ninja_argv(platform))?;
                        Ok(())
                    })
                })
            })?;
            steps.step("test", self.test_argv(platform))?;
            Ok(())
        })
    }

    /// Wrap `block` in an Xcode activation when one is configured
    fn with_sdk(
        &self,
        steps: &mut Steps,
        block: impl FnOnce(&mut Steps) -> Result<(), StepFailure>,
    ) -> Result<(), StepFailure> {
        match &self.config.macos_sdk {
            Some(sdk) => MacosSdk::new(
                sdk.spec(),
                self.paths.cache_dir.join(&sdk.cache_name),
                self.cipd(),
            )
            .with_sdk(steps, sdk.kind, block),
            None => block(steps),
        }
    }

    fn package_definition(&self, platform: Platform) -> Result<PackageDefinition, RecipeError> {
        let out_dir = self.out_dir();
        let mut def = PackageDefinition::new(&self.config.package.name, &out_dir, InstallMode::Copy);
        def.add_file(&out_dir.join(platform.exe(&self.config.package.binary)))?;
        def.add_version_file(&self.config.package.version_file)?;
        Ok(def)
    }

    fn build_package(&self, steps: &mut Steps) -> Result<BuiltPackage, RecipeError> {
        let def = self.package_definition(steps.platform())?;
        let output = self.paths.cleanup_dir.join(&self.config.package.file_name);
        self.cipd().build_from_pkg(steps, &def, &output)?;

        let sha256 = match fs::read(&output) {
            Ok(bytes) => Some(hex::encode(Sha256::digest(&bytes))),
            Err(e) => {
                tracing::warn!(path = %output.display(), error = %e, "package file not readable after build");
                None
            }
        };

        Ok(BuiltPackage {
            name: def.package,
            path: output,
            sha256,
        })
    }

    fn publish(&self, steps: &mut Steps, package_file: &Path) -> Result<PublishDecision, RecipeError> {
        let revision = self.head_revision(steps)?;
        let package = &self.config.package.name;
        let cipd = self.cipd();

        let existing = cipd.search(steps, package, &format!("git_revision:{}", revision))?;
        if let Some(pin) = existing.into_iter().next() {
            tracing::info!(%revision, instance_id = %pin.instance_id, "package already published");
            steps.marker(UP_TO_DATE_MARKER);
            return Ok(PublishDecision::UpToDate {
                instance_id: pin.instance_id,
            });
        }

        let tags = BTreeMap::from([
            ("git_repository".to_string(), self.config.source.repository.clone()),
            ("git_revision".to_string(), revision.clone()),
        ]);
        cipd.register(steps, package, package_file, &self.config.package.refs, &tags)?;
        tracing::info!(%revision, "package registered");

        Ok(PublishDecision::Register { revision })
    }

    /// Commit id of the checked-out tree
    fn head_revision(&self, steps: &mut Steps) -> Result<String, RecipeError> {
        let output = steps.with_context(Context::new().cwd(self.source_dir()), |steps| {
            steps.step_capture("rev-parse", cmd![&self.config.commands.git, "rev-parse", "HEAD"])
        })?;

        let revision = output.stdout.trim();
        if revision.len() != 40 || hex::decode(revision).is_err() {
            return Err(RecipeError::InvalidRevision(revision.to_string()));
        }
        Ok(revision.to_ascii_lowercase())
    }
}
