//! Cargo build system implementation

use super::{exists, BuildSystem, BuildSystemContext};
use crate::environment::{EnvironmentFragment, Tier};
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

pub struct CargoBuildSystem;

#[async_trait]
impl BuildSystem for CargoBuildSystem {
    fn name(&self) -> &'static str {
        "cargo"
    }

    fn kind(&self) -> BuildSystemKind {
        BuildSystemKind::Cargo
    }

    async fn detect(&self, source_dir: &Path) -> Result<bool, Error> {
        exists(&source_dir.join("Cargo.toml")).await
    }

    async fn default_command(
        &self,
        phase: Phase,
        ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error> {
        let jobs = ctx.jobs.to_string();
        let invocation = match phase {
            Phase::Prepare | Phase::Patch | Phase::Configure => return Ok(None),
            Phase::Build => Invocation::exec("cargo", ["build", "--release", "--jobs", jobs.as_str()]),
            Phase::Check => Invocation::exec("cargo", ["test", "--release", "--jobs", jobs.as_str()]),
            Phase::Install => Invocation::exec(
                "cargo",
                [
                    "install".to_string(),
                    "--path".to_string(),
                    ".".to_string(),
                    "--root".to_string(),
                    ctx.output_dir.display().to_string(),
                    "--locked".to_string(),
                ],
            ),
        };
        Ok(Some(invocation))
    }

    fn environment(&self, ctx: &BuildSystemContext<'_>) -> Option<EnvironmentFragment> {
        let mut fragment = EnvironmentFragment::new(self.name(), Tier::Base)
            .with("CARGO_TARGET_DIR", ctx.source_dir.join("target").display().to_string());
        if ctx.triples.is_cross() {
            fragment = fragment.with("CARGO_BUILD_TARGET", ctx.triples.host.to_string());
        }
        Some(fragment)
    }
}
