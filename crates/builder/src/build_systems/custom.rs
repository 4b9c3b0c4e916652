//! Recipe-supplied commands only

use super::{BuildSystem, BuildSystemContext};
use crate::stages::Invocation;
use async_trait::async_trait;
use kiln_errors::Error;
use kiln_types::{BuildSystemKind, Phase};
use std::path::Path;

/// Never detected; every phase must carry its own command
pub struct CustomBuildSystem;

#[async_trait]
impl BuildSystem for CustomBuildSystem {
    fn name(&self) -> &'static str {
        "custom"
    }

    fn kind(&self) -> BuildSystemKind {
        BuildSystemKind::Custom
    }

    async fn detect(&self, _source_dir: &Path) -> Result<bool, Error> {
        Ok(false)
    }

    async fn default_command(
        &self,
        _phase: Phase,
        _ctx: &BuildSystemContext<'_>,
    ) -> Result<Option<Invocation>, Error> {
        Ok(None)
    }
}
