//! CMake build system implementation

use super::{exists, BuildSystem, BuildSystemContext};
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

const BUILD_DIR: &str = "build";

/// Out-of-source CMake build in `build/`
pub struct CMakeBuildSystem;

#[async_trait]
impl BuildSystem for CMakeBuildSystem {
    fn name(&self) -> &'static str {
        "cmake"
    }

    fn kind(&self) -> BuildSystemKind {
        BuildSystemKind::Cmake
    }

    async fn detect(&self, source_dir: &Path) -> Result<bool, Error> {
        exists(&source_dir.join("CMakeLists.txt")).await
    }

    async fn default_command(
        &self,
        phase: Phase,
        ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error> {
        let invocation = match phase {
            Phase::Prepare | Phase::Patch => return Ok(None),
            Phase::Configure => {
                let mut args = vec![
                    "-S".to_string(),
                    ".".to_string(),
                    "-B".to_string(),
                    BUILD_DIR.to_string(),
                    format!("-DCMAKE_INSTALL_PREFIX={}", ctx.output_dir.display()),
                    "-DCMAKE_BUILD_TYPE=Release".to_string(),
                ];
                if ctx.triples.is_cross() {
                    args.push(format!("-DCMAKE_SYSTEM_PROCESSOR={}", ctx.triples.host.arch()));
                    args.push(format!("-DCMAKE_C_COMPILER_TARGET={}", ctx.triples.host));
                }
                Invocation::exec("cmake", args)
            }
            Phase::Build => Invocation::exec(
                "cmake",
                [
                    "--build".to_string(),
                    BUILD_DIR.to_string(),
                    "--parallel".to_string(),
                    ctx.jobs.to_string(),
                ],
            ),
            Phase::Check => Invocation::exec("ctest", ["--test-dir", BUILD_DIR]),
            Phase::Install => Invocation::exec("cmake", ["--install", BUILD_DIR]),
        };
        Ok(Some(invocation))
    }
}
