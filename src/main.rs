//! gn-ci CLI
//!
//! Entry point for the `gn-ci` command-line tool.

use clap::{Args, Parser, Subcommand};
use gn_ci_recipe::build_input::BuildDocument;
use gn_ci_recipe::config::DEFAULT_CONFIG_PATH;
use gn_ci_recipe::{
    BuildInput, BuilderId, ConfigOverrides, ExitCode, GerritChange, GitilesCommit, LoadedConfig,
    Pipeline, PipelinePaths, RecipeError, RunHeader, RunSummary, SdkKind,
};
use gn_ci_step::{Platform, ProcessRunner, Steps};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gn-ci")]
#[command(about = "GN continuous-integration recipe", version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check out, build, test, package and publish
    Run {
        #[command(flatten)]
        recipe: RecipeArgs,

        /// Write the run summary as JSON to this path
        #[arg(long, env = "GN_CI_SUMMARY_JSON")]
        summary_json: Option<PathBuf>,
    },

    /// Print the resolved plan as JSON without running anything
    Plan {
        #[command(flatten)]
        recipe: RecipeArgs,
    },

    /// Validate a recipe config file
    VerifyConfig {
        /// Path to recipe config file (default: .gn-ci/recipe.toml)
        #[arg(long, short = 'c', env = "GN_CI_CONFIG")]
        config: Option<PathBuf>,

        /// Print the merged config as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RecipeArgs {
    /// Path to recipe config file (default: .gn-ci/recipe.toml if present)
    #[arg(long, short = 'c', env = "GN_CI_CONFIG")]
    config: Option<PathBuf>,

    /// Working directory for the checkout and tools (default: current dir)
    #[arg(long, env = "GN_CI_START_DIR")]
    start_dir: Option<PathBuf>,

    /// Root of named caches (default: <start-dir>/cache)
    #[arg(long, env = "GN_CI_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Target platform (default: host)
    #[arg(long, env = "GN_CI_PLATFORM")]
    platform: Option<Platform>,

    /// Build metadata as JSON (builder, input, tags)
    #[arg(long, env = "GN_CI_BUILD_INPUT")]
    build_input: Option<PathBuf>,

    /// Triggering commit id
    #[arg(long, env = "GN_CI_COMMIT")]
    commit: Option<String>,

    /// Pending change as [HOST/]CHANGE/PATCHSET, applied in order given
    #[arg(long = "gerrit-change", env = "GN_CI_GERRIT_CHANGES", value_delimiter = ',')]
    gerrit_changes: Vec<GerritChange>,

    #[arg(long, env = "GN_CI_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "GN_CI_BUCKET")]
    bucket: Option<String>,

    #[arg(long, env = "GN_CI_BUILDER")]
    builder: Option<String>,

    /// Buildset tag, e.g. buildset:patch/gerrit/HOST/CHANGE/PATCHSET
    #[arg(long = "tag", env = "GN_CI_TAGS", value_delimiter = ',')]
    tags: Vec<String>,

    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Args)]
struct OverrideArgs {
    /// Source repository URL
    #[arg(long, env = "GN_CI_REPOSITORY")]
    repository: Option<String>,

    /// Ref fetched when no commit is given
    #[arg(long, env = "GN_CI_DEFAULT_REF")]
    default_ref: Option<String>,

    /// Project whose builders publish packages
    #[arg(long, env = "GN_CI_INTERNAL_PROJECT")]
    internal_project: Option<String>,

    #[arg(long, env = "GN_CI_GIT")]
    git: Option<String>,

    #[arg(long, env = "GN_CI_CIPD")]
    cipd: Option<String>,

    #[arg(long, env = "GN_CI_PYTHON")]
    python: Option<String>,

    /// Xcode build version, e.g. 12A7209
    #[arg(long, env = "GN_CI_SDK_VERSION")]
    sdk_version: Option<String>,

    #[arg(long, env = "GN_CI_SDK_TOOL_PACKAGE")]
    sdk_tool_package: Option<String>,

    #[arg(long, env = "GN_CI_SDK_TOOL_VERSION")]
    sdk_tool_version: Option<String>,

    /// mac or ios
    #[arg(long, env = "GN_CI_SDK_KIND")]
    sdk_kind: Option<SdkKind>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            repository: args.repository,
            default_ref: args.default_ref,
            internal_project: args.internal_project,
            git: args.git,
            cipd: args.cipd,
            python: args.python,
            sdk_version: args.sdk_version,
            sdk_tool_package: args.sdk_tool_package,
            sdk_tool_version: args.sdk_tool_version,
            sdk_kind: args.sdk_kind,
        }
    }
}

/// Everything resolved before the first step runs
struct Resolved {
    loaded: LoadedConfig,
    platform: Platform,
    builder: BuilderId,
    input: BuildInput,
    start_dir: PathBuf,
    cache_dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Commands::Run {
            recipe,
            summary_json,
        } => run_recipe(recipe, summary_json.as_deref()),
        Commands::Plan { recipe } => run_plan(recipe),
        Commands::VerifyConfig { config, json } => run_verify_config(config, json),
    };
    process::exit(code.as_i32());
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_recipe(args: RecipeArgs, summary_json: Option<&Path>) -> ExitCode {
    let resolved = match resolve(args) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    let cleanup = match tempfile::Builder::new().prefix("gn-ci-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error creating cleanup directory: {}", e);
            return ExitCode::InfraFailure;
        }
    };

    let header = RunHeader::new(
        resolved.platform,
        resolved.builder.clone(),
        resolved.input.clone(),
        resolved.loaded.sources.clone(),
    );
    tracing::info!(run_id = %header.run_id, "run started");

    let paths = match PipelinePaths::new(&resolved.start_dir, &resolved.cache_dir, cleanup.path()) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error resolving working directories: {}", e);
            return ExitCode::InfraFailure;
        }
    };
    let pipeline = Pipeline::new(
        &resolved.loaded.config,
        paths,
        &resolved.builder,
        &resolved.input,
    );
    let mut steps = Steps::new(Box::new(ProcessRunner), resolved.platform);
    let result = pipeline.run(&mut steps);
    let records = steps.into_records();

    let (summary, code) = match result {
        Ok(outcome) => (RunSummary::success(header, records, outcome), ExitCode::Success),
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            let code = e.exit_code();
            (
                RunSummary::failure(header, records, e.failure_kind(), code, e.to_string()),
                code,
            )
        }
    };

    println!("{}", summary.human_summary);
    if let Some(path) = summary_json {
        if let Err(e) = summary.write_to_file(path) {
            eprintln!("Error writing summary to {}: {}", path.display(), e);
            if code.is_success() {
                return ExitCode::InfraFailure;
            }
        }
    }
    code
}

fn run_plan(args: RecipeArgs) -> ExitCode {
    let resolved = match resolve(args) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    let paths = match PipelinePaths::new(&resolved.start_dir, &resolved.cache_dir, std::env::temp_dir()) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error resolving working directories: {}", e);
            return ExitCode::InfraFailure;
        }
    };
    let pipeline = Pipeline::new(
        &resolved.loaded.config,
        paths,
        &resolved.builder,
        &resolved.input,
    );

    let rendered = pipeline
        .plan(resolved.platform)
        .and_then(|plan| serde_json::to_string_pretty(&plan).map_err(RecipeError::from));
    match rendered {
        Ok(json) => {
            println!("{}", json);
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run_verify_config(config: Option<PathBuf>, json: bool) -> ExitCode {
    let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match LoadedConfig::load(Some(&path), &ConfigOverrides::default()) {
        Ok(loaded) => {
            if json {
                match serde_json::to_string_pretty(&loaded) {
                    Ok(s) => println!("{}", s),
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        return ExitCode::Config;
                    }
                }
            } else {
                println!("{}: valid", path.display());
                println!(
                    "  configurations: {}",
                    loaded
                        .config
                        .build
                        .configurations
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                println!("  package: {}", loaded.config.package.name);
            }
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("{}: {}", path.display(), e);
            ExitCode::Config
        }
    }
}

fn resolve(args: RecipeArgs) -> Result<Resolved, RecipeError> {
    let start_dir = match args.start_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let cache_dir = args.cache_dir.unwrap_or_else(|| start_dir.join("cache"));

    // The default config file is optional; an explicit one must exist
    let config_path = args.config.or_else(|| {
        let default = start_dir.join(DEFAULT_CONFIG_PATH);
        default.is_file().then_some(default)
    });
    let loaded = LoadedConfig::load(config_path.as_deref(), &args.overrides.into())?;

    let platform = match args.platform {
        Some(p) => p,
        None => Platform::host()?,
    };

    let document = match args.build_input {
        Some(path) => BuildDocument::from_file(&path)?,
        None => BuildDocument::default(),
    };
    let (mut builder, mut input) = document.resolve()?;

    if let Some(project) = args.project {
        builder.project = project;
    }
    if let Some(bucket) = args.bucket {
        builder.bucket = bucket;
    }
    if let Some(name) = args.builder {
        builder.builder = name;
    }
    if let Some(id) = args.commit {
        input.gitiles_commit = Some(GitilesCommit {
            id,
            ..Default::default()
        });
    }
    input.gerrit_changes.extend(args.gerrit_changes);
    for tag in &args.tags {
        input.apply_tag(tag)?;
    }

    Ok(Resolved {
        loaded,
        platform,
        builder,
        input,
        start_dir,
        cache_dir,
    })
}
