//! End-to-end pipeline scenarios against the mock runner
//!
//! Each test drives a full `Pipeline::run` and checks the issued steps:
//! CI runs that register or find an existing package, patched runs,
//! external builders, fail-fast configurations and the mac SDK wrapper.

use std::path::{Path, PathBuf};

use gn_ci_recipe::build_input::{BuildInput, BuilderId, GerritChange, GitilesCommit};
use gn_ci_recipe::config::{BuildConfiguration, RecipeConfig, SdkConfig};
use gn_ci_recipe::macos_sdk::SdkKind;
use gn_ci_recipe::pipeline::{Pipeline, PipelineOutcome, PipelinePaths, PublishDecision, UP_TO_DATE_MARKER};
use gn_ci_recipe::RecipeError;
use gn_ci_step::{FailureKind, MockRunner, Platform, StepStatus, Steps};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

const REVISION: &str = "2d5a7d3a9f1e6b7c8d9e0f1a2b3c4d5e6f708192";
const PACKAGE: &str = "gn/gn/${platform}";

fn search_step() -> String {
    format!("cipd search {} git_revision:{}", PACKAGE, REVISION)
}

fn builder(project: &str) -> BuilderId {
    BuilderId {
        project: project.to_string(),
        bucket: "ci".to_string(),
        builder: "gn-linux64".to_string(),
    }
}

fn ci_input() -> BuildInput {
    BuildInput {
        gitiles_commit: Some(GitilesCommit {
            host: "gn.googlesource.com".to_string(),
            project: "gn".to_string(),
            id: REVISION.to_string(),
        }),
        gerrit_changes: vec![],
    }
}

fn cq_input() -> BuildInput {
    BuildInput {
        gitiles_commit: None,
        gerrit_changes: vec![GerritChange::new(456789, 12)],
    }
}

fn sdk_config() -> SdkConfig {
    SdkConfig {
        sdk_version: "10B61".to_string(),
        tool_package: "infra/tools/mac_toolchain/${platform}".to_string(),
        tool_version: "git_revision:796d2b92cff93fc2059623ce0a66284373ceea0a".to_string(),
        kind: SdkKind::Mac,
        cache_name: "macos_sdk".to_string(),
    }
}

struct Harness {
    config: RecipeConfig,
    cleanup: TempDir,
    mock: MockRunner,
}

impl Harness {
    fn new(mock: MockRunner) -> Self {
        Self {
            config: RecipeConfig::default(),
            cleanup: tempfile::tempdir().unwrap(),
            mock,
        }
    }

    fn paths(&self) -> PipelinePaths {
        PipelinePaths {
            start_dir: PathBuf::from("/b/w"),
            cache_dir: PathBuf::from("/b/cache"),
            cleanup_dir: self.cleanup.path().to_path_buf(),
        }
    }

    fn package_file(&self) -> PathBuf {
        self.cleanup.path().join("gn.cipd")
    }

    fn run(
        &self,
        platform: Platform,
        builder: &BuilderId,
        input: &BuildInput,
    ) -> Result<PipelineOutcome, RecipeError> {
        let mut steps = Steps::new(Box::new(self.mock.clone()), platform);
        Pipeline::new(&self.config, self.paths(), builder, input).run(&mut steps)
    }
}

fn with_revision(mock: MockRunner) -> MockRunner {
    mock.with_stdout("rev-parse", &format!("{}\n", REVISION))
}

// =============================================================================
// CI runs
// =============================================================================

#[test]
fn test_ci_linux_registers_new_package() {
    let h = Harness::new(with_revision(MockRunner::new()));

    let outcome = h.run(Platform::Linux, &builder("infra-internal"), &ci_input()).unwrap();

    assert_eq!(outcome.configurations, vec!["debug", "release"]);
    assert_eq!(
        outcome.publish,
        Some(PublishDecision::Register {
            revision: REVISION.to_string()
        })
    );
    assert_eq!(
        h.mock.names(),
        vec![
            "git|init",
            "git|fetch",
            "git|checkout",
            "ensure_installed",
            "debug|build|generate",
            "debug|build|ninja",
            "debug|test",
            "release|build|generate",
            "release|build|ninja",
            "release|test",
            "build gn/gn/${platform}",
            "rev-parse",
            search_step().as_str(),
            "register gn/gn/${platform}",
        ]
    );

    let register = h.mock.find("register gn/gn/${platform}").unwrap();
    assert_eq!(
        register.argv,
        vec![
            "cipd".to_string(),
            "pkg-register".to_string(),
            h.package_file().to_string_lossy().into_owned(),
            "-ref".to_string(),
            "latest".to_string(),
            "-tag".to_string(),
            "git_repository:https://gn.googlesource.com/gn".to_string(),
            "-tag".to_string(),
            format!("git_revision:{}", REVISION),
        ]
    );
    assert!(register.infra);
    assert_eq!(h.mock.count_ending_with("register gn/gn/${platform}"), 1);
}

#[test]
fn test_ci_fetches_triggering_commit() {
    let h = Harness::new(with_revision(MockRunner::new()));

    h.run(Platform::Linux, &builder("infra-internal"), &ci_input()).unwrap();

    let fetch = h.mock.find("git|fetch").unwrap();
    assert_eq!(fetch.argv[3], REVISION);
    assert_eq!(fetch.cwd.as_deref(), Some(Path::new("/b/w/gn")));
}

#[test]
fn test_ci_existing_instance_skips_register() {
    let mock = with_revision(MockRunner::new()).with_stdout(
        &search_step(),
        "Instances:\n  gn/gn/linux-amd64:Zb3DyoLNnJ8Lf4kNkdV6aQ3Dhx8qUt7_nWvEx1aNb9UC\n",
    );
    let h = Harness::new(mock);
    let mut steps = Steps::new(Box::new(h.mock.clone()), Platform::Linux);
    let id = builder("infra-internal");
    let input = ci_input();

    let outcome = Pipeline::new(&h.config, h.paths(), &id, &input)
        .run(&mut steps)
        .unwrap();

    assert_eq!(
        outcome.publish,
        Some(PublishDecision::UpToDate {
            instance_id: "Zb3DyoLNnJ8Lf4kNkdV6aQ3Dhx8qUt7_nWvEx1aNb9UC".to_string()
        })
    );
    assert!(!h.mock.ran("register gn/gn/${platform}"));

    // Recorded in the log, never executed
    let marker = steps
        .records()
        .iter()
        .find(|r| r.name == UP_TO_DATE_MARKER)
        .unwrap();
    assert_eq!(marker.status, StepStatus::Marker);
    assert!(!h.mock.ran(UP_TO_DATE_MARKER));
}

#[test]
fn test_ci_linux_tools_and_env() {
    let h = Harness::new(with_revision(MockRunner::new()));

    h.run(Platform::Linux, &builder("infra-internal"), &ci_input()).unwrap();

    let ensure = h.mock.find("ensure_installed").unwrap();
    assert!(ensure.infra);
    assert_eq!(
        ensure.argv,
        vec!["cipd", "ensure", "-root", "/b/w/cipd", "-ensure-file", "-"]
    );
    assert_eq!(
        ensure.stdin.as_deref(),
        Some("fuchsia/clang/${platform} goma\ninfra/ninja/${platform} version:1.8.2\n")
    );

    let generate = h.mock.find("debug|build|generate").unwrap();
    assert_eq!(generate.argv, vec!["python3", "/b/w/gn/build/gen.py", "-d"]);
    assert_eq!(generate.cwd.as_deref(), Some(Path::new("/b/w/gn")));
    assert_eq!(generate.env["CC"], "/b/w/cipd/bin/clang");
    assert_eq!(generate.env["LDFLAGS"], "-static-libstdc++ -ldl -lpthread");

    let ninja = h.mock.find("release|build|ninja").unwrap();
    assert_eq!(ninja.argv, vec!["/b/w/cipd/ninja", "-C", "/b/w/gn/out"]);
    assert_eq!(ninja.env["CXX"], "/b/w/cipd/bin/clang++");

    assert_eq!(
        h.mock.find("release|build|generate").unwrap().argv,
        vec!["python3", "/b/w/gn/build/gen.py"]
    );
    assert_eq!(h.mock.find("release|test").unwrap().argv, vec!["/b/w/gn/out/gn_unittests"]);
}

#[test]
fn test_ci_writes_package_definition() {
    let h = Harness::new(with_revision(MockRunner::new()));

    let outcome = h.run(Platform::Win, &builder("infra-internal"), &ci_input()).unwrap();

    let def_path = h.cleanup.path().join("gn.pkg_def.json");
    let def: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&def_path).unwrap()).unwrap();
    assert_eq!(def["package"], PACKAGE);
    assert_eq!(def["install_mode"], "copy");
    assert_eq!(def["data"][0]["file"], "gn.exe");
    assert_eq!(def["data"][1]["version_file"], ".versions/gn.cipd_version");

    let package = outcome.package.unwrap();
    assert_eq!(package.path, h.package_file());
    // The mock never writes the package file itself
    assert_eq!(package.sha256, None);

    let build = h.mock.find("build gn/gn/${platform}").unwrap();
    assert_eq!(build.argv[1], "pkg-build");
    assert!(build.infra);
    assert_eq!(
        h.mock.find("debug|test").unwrap().argv,
        vec!["/b/w/gn/out/gn_unittests.exe"]
    );
}

#[test]
fn test_package_digest_when_file_exists() {
    let h = Harness::new(with_revision(MockRunner::new()));
    std::fs::write(h.package_file(), b"gn package").unwrap();

    let outcome = h.run(Platform::Linux, &builder("infra-internal"), &ci_input()).unwrap();

    let sha = outcome.package.unwrap().sha256.unwrap();
    assert_eq!(sha.len(), 64);
    assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
}

// =============================================================================
// Gates
// =============================================================================

#[test]
fn test_cq_run_builds_but_never_packages() {
    let h = Harness::new(MockRunner::new());

    let outcome = h.run(Platform::Linux, &builder("infra-internal"), &cq_input()).unwrap();

    assert_eq!(outcome.configurations, vec!["debug", "release"]);
    assert!(outcome.package.is_none());
    assert!(outcome.publish.is_none());
    assert!(h.mock.ran("git|cherry-pick 456789/12"));
    assert!(h.mock.ran("release|test"));
    assert!(!h.mock.ran("build gn/gn/${platform}"));
    assert!(!h.mock.ran("rev-parse"));
    assert_eq!(h.mock.count_ending_with("register gn/gn/${platform}"), 0);
    assert!(!h.cleanup.path().join("gn.pkg_def.json").exists());
}

#[test]
fn test_external_project_packages_without_publishing() {
    let h = Harness::new(MockRunner::new());

    let outcome = h.run(Platform::Mac, &builder("gn"), &ci_input()).unwrap();

    assert!(outcome.package.is_some());
    assert!(outcome.publish.is_none());
    assert!(h.mock.ran("build gn/gn/${platform}"));
    assert!(!h.mock.ran("rev-parse"));
    assert!(!h.mock.ran(&search_step()));
    assert!(!h.mock.ran("register gn/gn/${platform}"));
}

#[test]
fn test_internal_project_is_configurable() {
    let mut h = Harness::new(with_revision(MockRunner::new()));
    h.config.package.internal_project = "gn-trusted".to_string();

    let outcome = h.run(Platform::Linux, &builder("gn-trusted"), &ci_input()).unwrap();

    assert!(matches!(outcome.publish, Some(PublishDecision::Register { .. })));
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_first_configuration_failure_stops_the_run() {
    let h = Harness::new(MockRunner::new().with_exit_code("debug|build|generate", 1));

    let err = h
        .run(Platform::Linux, &builder("infra-internal"), &ci_input())
        .unwrap_err();

    match err {
        RecipeError::Step(failure) => {
            assert_eq!(failure.step, "debug|build|generate");
            assert_eq!(failure.kind, FailureKind::Step);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!h.mock.ran("debug|build|ninja"));
    assert!(!h.mock.ran("release|build|generate"));
    assert!(!h.mock.ran("build gn/gn/${platform}"));
}

#[test]
fn test_test_failure_is_step_failure() {
    let h = Harness::new(MockRunner::new().with_exit_code("release|test", 1));

    let err = h
        .run(Platform::Linux, &builder("infra-internal"), &ci_input())
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Step));
    assert_eq!(err.exit_code().as_i32(), 1);
    assert!(h.mock.ran("debug|test"));
}

#[test]
fn test_tool_install_failure_is_infra() {
    let h = Harness::new(MockRunner::new().with_exit_code("ensure_installed", 1));

    let err = h
        .run(Platform::Linux, &builder("infra-internal"), &ci_input())
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Infra));
    assert!(!h.mock.ran("debug|build|generate"));
}

#[test]
fn test_patch_failure_stops_later_patches() {
    let input = BuildInput {
        gitiles_commit: None,
        gerrit_changes: vec![
            GerritChange::new(1001, 1),
            GerritChange::new(1002, 4),
            GerritChange::new(1003, 2),
        ],
    };
    let h = Harness::new(MockRunner::new().with_exit_code("git|cherry-pick 1002/4", 1));

    let err = h.run(Platform::Linux, &builder("infra-internal"), &input).unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Patch));
    assert_eq!(err.exit_code().as_i32(), 3);
    assert_eq!(
        h.mock.names(),
        vec![
            "git|init",
            "git|fetch",
            "git|checkout",
            "git|fetch 1001/1",
            "git|cherry-pick 1001/1",
            "git|fetch 1002/4",
            "git|cherry-pick 1002/4",
        ]
    );
    assert_eq!(
        h.mock.find("git|fetch 1002/4").unwrap().argv[3],
        "refs/changes/02/1002/4"
    );
}

#[test]
fn test_patch_fetch_failure_stops_later_patches() {
    let input = BuildInput {
        gitiles_commit: None,
        gerrit_changes: vec![
            GerritChange::new(1001, 1),
            GerritChange::new(1002, 4),
            GerritChange::new(1003, 2),
        ],
    };
    let h = Harness::new(MockRunner::new().with_exit_code("git|fetch 1002/4", 1));

    let err = h.run(Platform::Linux, &builder("infra-internal"), &input).unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Patch));
    assert_eq!(err.exit_code().as_i32(), 3);
    assert!(h.mock.ran("git|cherry-pick 1001/1"));
    assert!(!h.mock.ran("git|cherry-pick 1002/4"));
    assert_eq!(h.mock.count_ending_with("1003/2"), 0);
    assert_eq!(h.mock.names().last().map(String::as_str), Some("git|fetch 1002/4"));
}

#[test]
fn test_garbage_revision_is_infra_error() {
    let h = Harness::new(MockRunner::new().with_stdout("rev-parse", "HEAD\n"));

    let err = h
        .run(Platform::Linux, &builder("infra-internal"), &ci_input())
        .unwrap_err();

    assert!(matches!(err, RecipeError::InvalidRevision(ref rev) if rev == "HEAD"));
    assert_eq!(err.exit_code().as_i32(), 2);
    assert!(!h.mock.ran(&search_step()));
}

#[test]
fn test_register_failure_is_infra() {
    let h = Harness::new(
        with_revision(MockRunner::new()).with_exit_code("register gn/gn/${platform}", 1),
    );

    let err = h
        .run(Platform::Linux, &builder("infra-internal"), &ci_input())
        .unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Infra));
}

// =============================================================================
// Configurations and SDK
// =============================================================================

#[test]
fn test_custom_configurations_run_in_order() {
    let mut h = Harness::new(MockRunner::new());
    h.config.build.configurations = vec![
        BuildConfiguration::new("asan", &["--use-asan"]),
        BuildConfiguration::new("debug", &["-d"]),
        BuildConfiguration::new("release", &[]),
    ];

    h.run(Platform::Linux, &builder("gn"), &cq_input()).unwrap();

    let tests: Vec<String> = h
        .mock
        .names()
        .into_iter()
        .filter(|n| n.ends_with("|test"))
        .collect();
    assert_eq!(tests, vec!["asan|test", "debug|test", "release|test"]);
    assert_eq!(
        h.mock.find("asan|build|generate").unwrap().argv,
        vec!["python3", "/b/w/gn/build/gen.py", "--use-asan"]
    );
}

#[test]
fn test_mac_wraps_build_in_sdk() {
    let mut h = Harness::new(MockRunner::new());
    h.config.macos_sdk = Some(sdk_config());

    h.run(Platform::Mac, &builder("gn"), &cq_input()).unwrap();

    let debug: Vec<String> = h
        .mock
        .names()
        .into_iter()
        .filter(|n| n.starts_with("debug|"))
        .collect();
    assert_eq!(
        debug,
        vec![
            "debug|build|ensure_installed",
            "debug|build|install xcode",
            "debug|build|select XCode",
            "debug|build|generate",
            "debug|build|ninja",
            "debug|build|reset XCode",
            "debug|test",
        ]
    );
    assert_eq!(h.mock.count_ending_with("reset XCode"), 2);
    assert_eq!(
        h.mock.find("debug|build|install xcode").unwrap().argv[5],
        "10b61"
    );
    assert_eq!(
        h.mock.find("release|build|select XCode").unwrap().argv[3],
        "/b/cache/macos_sdk/XCode.app"
    );
    assert!(h.mock.find("debug|build|generate").unwrap().env.is_empty());
}

#[test]
fn test_mac_build_failure_still_resets_sdk() {
    let mut h = Harness::new(MockRunner::new().with_exit_code("debug|build|ninja", 1));
    h.config.macos_sdk = Some(sdk_config());

    let err = h.run(Platform::Mac, &builder("gn"), &cq_input()).unwrap_err();

    assert_eq!(err.failure_kind(), Some(FailureKind::Step));
    assert_eq!(h.mock.count_ending_with("reset XCode"), 1);
    assert!(!h.mock.ran("debug|test"));
}

#[test]
fn test_sdk_config_ignored_off_mac() {
    let mut h = Harness::new(MockRunner::new());
    h.config.macos_sdk = Some(sdk_config());

    h.run(Platform::Linux, &builder("gn"), &cq_input()).unwrap();

    assert_eq!(h.mock.count_ending_with("select XCode"), 0);
    assert_eq!(h.mock.count_ending_with("reset XCode"), 0);
    assert_eq!(h.mock.count_ending_with("ensure_installed"), 1);
}

// =============================================================================
// Working directories
// =============================================================================

#[test]
fn test_relative_start_dir_is_anchored() {
    let cleanup = tempfile::tempdir().unwrap();
    let cwd = std::env::current_dir().unwrap();
    let paths = PipelinePaths::new("work", "work/cache", cleanup.path()).unwrap();
    assert_eq!(paths.start_dir, cwd.join("work"));
    assert_eq!(paths.cache_dir, cwd.join("work/cache"));
    assert_eq!(paths.cleanup_dir, cleanup.path());

    let mock = MockRunner::new();
    let config = RecipeConfig::default();
    let id = builder("gn");
    let input = cq_input();
    let mut steps = Steps::new(Box::new(mock.clone()), Platform::Linux);
    Pipeline::new(&config, paths, &id, &input).run(&mut steps).unwrap();

    let src = cwd.join("work").join("gn");
    let generate = mock.find("debug|build|generate").unwrap();
    assert_eq!(generate.cwd.as_deref(), Some(src.as_path()));
    assert_eq!(
        generate.argv[1],
        src.join("build").join("gen.py").to_string_lossy().into_owned()
    );

    let ninja = mock.find("debug|build|ninja").unwrap();
    assert!(Path::new(&ninja.argv[0]).is_absolute());
    assert_eq!(ninja.argv[2], src.join("out").to_string_lossy().into_owned());
    assert!(Path::new(&mock.find("debug|test").unwrap().argv[0]).is_absolute());
}
