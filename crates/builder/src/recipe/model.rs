//! YAML recipe format
//!
//! ```yaml
//! metadata:
//!   name: hello
//!   version: "2.12"
//!   hosts: [x86_64-linux, aarch64-linux]
//!   provides:
//!     binaries: [hello]
//! source:
//!   gnu: { name: hello, version: "2.12" }
//!   checksum: sha256:cf04af86dc085268c5f4470fbae49b18afbc221b78096aab842d934a76bad0ab
//! build_system: autotools
//! dependencies:
//!   - zlib
//!   - { recipe: pkgconf, kind: tool }
//! args:
//!   phases:
//!     configure:
//!       args: [--disable-dependency-tracking]
//! ```

use crate::assert::{AssertSpec, Provides};
use kiln_args::Fragment;
use kiln_net::SourceSpec;
use kiln_types::{BuildSystemKind, Triple};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub metadata: Metadata,

    /// Omitted for recipes that generate everything in their phases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RecipeSource>,

    #[serde(default)]
    pub build_system: BuildSystemKind,

    /// In declaration order
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,

    /// Default argument fragment, merged before any caller fragment
    #[serde(default)]
    pub args: Fragment,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<AssertSpec>,

    /// Directory the recipe was loaded from; patch paths resolve against it
    #[serde(skip)]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Supported host patterns; empty means any host
    #[serde(default)]
    pub hosts: Vec<Triple>,
    #[serde(default)]
    pub provides: Provides,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeSource {
    #[serde(flatten)]
    pub spec: SourceSpec,
    /// Applied in order with `patch -p1` during the patch phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PathBuf>,
}

/// How a dependency's output is used by the recipe that declares it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Headers and libraries linked into the binaries we build
    #[default]
    Library,
    /// A program run during our phases, built for the build machine
    Tool,
    /// A compiler that runs on the build machine and emits code for our host
    Toolchain,
}

impl DependencyKind {
    #[allow(clippy::trivially_copy_pass_by_ref)]
    fn is_library(&self) -> bool {
        *self == Self::Library
    }
}

/// A dependency: either a recipe name, or a recipe with a logical name
/// and kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    Name(String),
    Bound {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        recipe: String,
        #[serde(default, skip_serializing_if = "DependencyKind::is_library")]
        kind: DependencyKind,
    },
}

impl DependencyDecl {
    /// Key for per-dependency overrides (`dependencies.<name>`)
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Bound { name, recipe, .. } => name.as_deref().unwrap_or(recipe),
        }
    }

    #[must_use]
    pub fn recipe(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Bound { recipe, .. } => recipe,
        }
    }

    #[must_use]
    pub fn kind(&self) -> DependencyKind {
        match self {
            Self::Name(_) => DependencyKind::Library,
            Self::Bound { kind, .. } => *kind,
        }
    }
}

impl Recipe {
    /// `name@version`
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}@{}", self.metadata.name, self.metadata.version)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Patch files resolved against the recipe directory
    pub fn patch_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.source
            .iter()
            .flat_map(|source| source.patches.iter())
            .map(|patch| resolve(&self.dir, patch))
    }

    /// The declared test spec, or presence checks derived from `provides`
    #[must_use]
    pub fn assert_spec(&self) -> AssertSpec {
        self.test
            .clone()
            .unwrap_or_else(|| AssertSpec::from_provides(&self.metadata.provides))
    }
}

fn resolve(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}
