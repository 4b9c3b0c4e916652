//! GNU Autotools build system implementation

use super::{exists, BuildSystem, BuildSystemContext};
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

/// `./configure && make && make install`
pub struct AutotoolsBuildSystem;

impl AutotoolsBuildSystem {
    fn configure_args(ctx: &BuildSystemContext<'_>) -> Vec<String> {
        let mut args = vec![format!("--prefix={}", ctx.output_dir.display())];
        let triples = ctx.triples;
        if triples.is_cross() {
            args.push(format!("--build={}", triples.build));
            args.push(format!("--host={}", triples.host));
        }
        if triples.target != triples.host {
            args.push(format!("--target={}", triples.target));
        }
        args
    }
}

#[async_trait]
impl BuildSystem for AutotoolsBuildSystem {
    fn name(&self) -> &'static str {
        "autotools"
    }

    fn kind(&self) -> BuildSystemKind {
        BuildSystemKind::Autotools
    }

    async fn detect(&self, source_dir: &Path) -> Result<bool, Error> {
        for marker in ["configure", "configure.ac", "configure.in"] {
            if exists(&source_dir.join(marker)).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn default_command(
        &self,
        phase: Phase,
        ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error> {
        let invocation = match phase {
            // Only regenerate when the tarball ships without a configure script
            Phase::Prepare => {
                if exists(&ctx.source_dir.join("configure")).await? {
                    return Ok(None);
                }
                Invocation::exec("autoreconf", ["-fi"])
            }
            Phase::Patch => return Ok(None),
            Phase::Configure => Invocation::exec("./configure", Self::configure_args(ctx)),
            Phase::Build => Invocation::exec("make", [format!("-j{}", ctx.jobs)]),
            Phase::Check => Invocation::exec("make", ["check"]),
            Phase::Install => Invocation::exec("make", ["install"]),
        };
        Ok(Some(invocation))
    }
}
