//! Source checkout
//!
//! Fresh `git init` + fetch of the triggering ref, then each pending
//! code-review patchset cherry-picked on top in the order supplied.
//! Conflicts are never resolved; the first failing patch aborts the run.

use std::path::Path;

use gn_ci_step::{cmd, Context, FailureKind, StepFailure, Steps};

use crate::build_input::BuildInput;

/// Git commands for one checkout
#[derive(Debug, Clone)]
pub struct Checkout<'a> {
    pub git: &'a str,
    pub repository: &'a str,
    pub default_ref: &'a str,
}

impl Checkout<'_> {
    /// Check out `input` into `src_dir`, all under a `git` nest
    pub fn run(&self, steps: &mut Steps, src_dir: &Path, input: &BuildInput) -> Result<(), StepFailure> {
        steps.nest("git", |steps| {
            steps.infra(|steps| {
                steps.step("init", cmd![self.git, "init", src_dir])?;

                steps.with_context(Context::new().cwd(src_dir), |steps| {
                    let target = input.checkout_ref(self.default_ref);
                    tracing::info!(%target, repository = self.repository, "fetching source");
                    steps.step("fetch", cmd![self.git, "fetch", self.repository, &target])?;
                    steps.step("checkout", cmd![self.git, "checkout", "FETCH_HEAD"])?;

                    // Patch failures belong to the patch, not to infra
                    let patch_ctx = Context::new().infra(false).attribute_to(FailureKind::Patch);
                    steps.with_context(patch_ctx, |steps| {
                        for change in &input.gerrit_changes {
                            let label = change.label();
                            tracing::info!(change = %change, "applying patch");
                            steps.step(
                                &format!("fetch {}", label),
                                cmd![self.git, "fetch", self.repository, change.git_ref()],
                            )?;
                            steps.step(
                                &format!("cherry-pick {}", label),
                                cmd![self.git, "cherry-pick", "FETCH_HEAD"],
                            )?;
                        }
                        Ok(())
                    })
                })
            })
        })
    }
}
