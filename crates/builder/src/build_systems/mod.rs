//! Build system abstraction and implementations
//!
//! A build system supplies the default command for each phase plus a few
//! base environment variables. Recipes then append to or replace those
//! defaults per phase.

use crate::cross::Triples;
use crate::environment::EnvironmentFragment;
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::{BuildError, Error};
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

mod autotools;
mod cargo;
mod cmake;
mod custom;
mod go;

pub use autotools::AutotoolsBuildSystem;
pub use cargo::CargoBuildSystem;
pub use cmake::CMakeBuildSystem;
pub use custom::CustomBuildSystem;
pub use go::GoBuildSystem;

/// What a build system needs to know to produce its commands
#[derive(Debug, Clone, Copy)]
pub struct BuildSystemContext<'a> {
    /// Working copy of the source tree; commands run here
    pub source_dir: &'a Path,
    /// Installation prefix, captured as the artifact
    pub output_dir: &'a Path,
    pub triples: &'a Triples,
    pub jobs: usize,
}

/// Trait for build system implementations
#[async_trait]
pub trait BuildSystem: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> BuildSystemKind;

    /// Detect if this build system applies to the source directory
    async fn detect(&self, source_dir: &Path) -> Result<bool, Error>;

    /// Default command for a phase, or `None` if the phase has no default
    async fn default_command(
        &self,
        phase: Phase,
        ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error>;

    /// Build-system specific environment, applied at the base tier
    fn environment(&self, _ctx: &BuildSystemContext<'_>) -> Option<EnvironmentFragment> {
        None
    }
}

/// Registry of available build systems
pub struct BuildSystemRegistry {
    systems: Vec<Box<dyn BuildSystem>>,
}

impl BuildSystemRegistry {
    /// Create a new registry with all supported build systems
    #[must_use]
    pub fn new() -> Self {
        Self {
            systems: vec![
                Box::new(AutotoolsBuildSystem),
                Box::new(CMakeBuildSystem),
                Box::new(CargoBuildSystem),
                Box::new(GoBuildSystem),
                Box::new(CustomBuildSystem),
            ],
        }
    }

    /// Pick the build system for a recipe, detecting when asked to
    ///
    /// # Errors
    ///
    /// Returns `NoBuildSystemDetected` if detection finds nothing, or an I/O
    /// error from probing the source tree.
    pub async fn select(
        &self,
        kind: BuildSystemKind,
        source_dir: &Path,
    ) -> Result<&dyn BuildSystem, Error> {
        if kind == BuildSystemKind::Auto {
            return self.detect(source_dir).await;
        }
        self.get(kind).ok_or_else(|| {
            BuildError::RecipeError {
                message: format!("build system {kind} is not registered"),
            }
            .into()
        })
    }

    /// Detect which build system to use for a source directory
    ///
    /// # Errors
    ///
    /// Returns an error if detection fails or no suitable build system is found
    pub async fn detect(&self, source_dir: &Path) -> Result<&dyn BuildSystem, Error> {
        for system in &self.systems {
            if system.detect(source_dir).await? {
                return Ok(system.as_ref());
            }
        }

        Err(BuildError::NoBuildSystemDetected {
            path: source_dir.display().to_string(),
        }
        .into())
    }

    #[must_use]
    pub fn get(&self, kind: BuildSystemKind) -> Option<&dyn BuildSystem> {
        self.systems
            .iter()
            .find(|s| s.kind() == kind)
            .map(std::convert::AsRef::as_ref)
    }
}

impl Default for BuildSystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn exists(path: &Path) -> Result<bool, Error> {
    Ok(tokio::fs::try_exists(path).await?)
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::cross::Triples;
    use kiln_types::Triple;

    pub fn native() -> Triples {
        let triple: Triple = "x86_64-unknown-linux-gnu".parse().unwrap();
        Triples {
            build: triple.clone(),
            host: triple.clone(),
            target: triple,
        }
    }

    pub fn cross() -> Triples {
        Triples {
            build: "x86_64-unknown-linux-gnu".parse().unwrap(),
            host: "aarch64-unknown-linux-gnu".parse().unwrap(),
            target: "aarch64-unknown-linux-gnu".parse().unwrap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detection_order() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BuildSystemRegistry::new();
        let err = registry.detect(dir.path()).await.err().unwrap();
        assert!(matches!(
            err,
            Error::Build(BuildError::NoBuildSystemDetected { .. })
        ));

        tokio::fs::write(dir.path().join("go.mod"), "module x\n").await.unwrap();
        assert_eq!(registry.detect(dir.path()).await.unwrap().name(), "go");

        tokio::fs::write(dir.path().join("CMakeLists.txt"), "").await.unwrap();
        assert_eq!(registry.detect(dir.path()).await.unwrap().name(), "cmake");

        tokio::fs::write(dir.path().join("configure.ac"), "").await.unwrap();
        assert_eq!(registry.detect(dir.path()).await.unwrap().name(), "autotools");
    }

    #[tokio::test]
    async fn explicit_kind_skips_detection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = BuildSystemRegistry::new();
        let system = registry
            .select(BuildSystemKind::Custom, dir.path())
            .await
            .unwrap();
        assert_eq!(system.kind(), BuildSystemKind::Custom);
    }
}
