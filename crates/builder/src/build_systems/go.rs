//! Go modules build system implementation

use super::{exists, BuildSystem, BuildSystemContext};
use crate::environment::{EnvironmentFragment, Tier};
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

pub struct GoBuildSystem;

#[async_trait]
impl BuildSystem for GoBuildSystem {
    fn name(&self) -> &'static str {
        "go"
    }

    fn kind(&self) -> BuildSystemKind {
        BuildSystemKind::Go
    }

    async fn detect(&self, source_dir: &Path) -> Result<bool, Error> {
        exists(&source_dir.join("go.mod")).await
    }

    async fn default_command(
        &self,
        phase: Phase,
        _ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error> {
        let invocation = match phase {
            Phase::Prepare => Invocation::exec("go", ["mod", "download"]),
            Phase::Patch | Phase::Configure => return Ok(None),
            Phase::Build => Invocation::exec("go", ["build", "./..."]),
            Phase::Check => Invocation::exec("go", ["test", "./..."]),
            Phase::Install => Invocation::exec("go", ["install", "./..."]),
        };
        Ok(Some(invocation))
    }

    fn environment(&self, ctx: &BuildSystemContext<'_>) -> Option<EnvironmentFragment> {
        let mut fragment = EnvironmentFragment::new(self.name(), Tier::Base)
            .with("GOBIN", ctx.output_dir.join("bin").display().to_string())
            .with("GOFLAGS", "-trimpath");
        if ctx.triples.is_cross() {
            fragment = fragment
                .with("GOOS", ctx.triples.host.go_os())
                .with("GOARCH", ctx.triples.host.go_arch())
                .with("CGO_ENABLED", "0");
        }
        Some(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_systems::test_support;
    use crate::environment::compose;

    #[test]
    fn cross_sets_goos_goarch() {
        let triples = test_support::cross();
        let ctx = BuildSystemContext {
            source_dir: Path::new("/src"),
            output_dir: Path::new("/out"),
            triples: &triples,
            jobs: 2,
        };
        let env = compose(&[GoBuildSystem.environment(&ctx).unwrap()]).unwrap();
        assert_eq!(env.get("GOBIN"), Some("/out/bin"));
        assert_eq!(env.get("GOOS"), Some("linux"));
        assert_eq!(env.get("GOARCH"), Some("arm64"));
    }
}
