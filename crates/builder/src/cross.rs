//! Triple resolution for build/host/target
//!
//! A build runs on `build`, produces binaries for `host`, and (for
//! toolchains) those binaries generate code for `target`.

use crate::recipe::DependencyKind;
use kiln_errors::{BuildError, Error};
use kiln_types::Triple;
use serde::{Deserialize, Serialize};

/// Possibly incomplete triples as requested by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Triple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Triple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Triple>,
}

/// Fully resolved triples
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triples {
    pub build: Triple,
    pub host: Triple,
    pub target: Triple,
}

/// Resolve against the invoking machine
#[must_use]
pub fn rotate(args: &RotateArgs) -> Triples {
    rotate_from(args, &Triple::native())
}

/// Resolve omitted triples: `build` and `host` fall back to `native`,
/// `target` falls back to `host`.
#[must_use]
pub fn rotate_from(args: &RotateArgs, native: &Triple) -> Triples {
    let build = args.build.clone().unwrap_or_else(|| native.clone());
    let host = args.host.clone().unwrap_or_else(|| native.clone());
    let target = args.target.clone().unwrap_or_else(|| host.clone());
    Triples {
        build,
        host,
        target,
    }
}

impl Triples {
    #[must_use]
    pub fn native() -> Self {
        rotate(&RotateArgs::default())
    }

    /// Whether produced binaries run somewhere other than the build machine
    #[must_use]
    pub fn is_cross(&self) -> bool {
        self.build != self.host
    }

    /// Triples for a builder nested one cross stage down: the toolchain
    /// this stage builds runs on `host`, so `host` becomes the next `build`.
    #[must_use]
    pub fn next_stage(&self) -> Self {
        Self {
            build: self.host.clone(),
            host: self.target.clone(),
            target: self.target.clone(),
        }
    }

    /// Check `host` against a recipe's allow-list; an empty list allows all
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedHost` when no pattern matches.
    pub fn check_host(&self, supported: &[Triple]) -> Result<(), Error> {
        if supported.is_empty() || supported.iter().any(|p| self.host.satisfies(p)) {
            return Ok(());
        }
        Err(BuildError::UnsupportedHost {
            host: self.host.to_string(),
            supported: supported.iter().map(ToString::to_string).collect(),
        }
        .into())
    }

    /// The stage before this one: a toolchain running on `build` that
    /// emits code for `host`. Its [`next_stage`](Self::next_stage) is this
    /// stage with `target` at `host`.
    #[must_use]
    pub fn previous_stage(&self) -> Self {
        Self {
            build: self.build.clone(),
            host: self.build.clone(),
            target: self.host.clone(),
        }
    }

    /// Triples a dependency of `kind` is built with
    #[must_use]
    pub fn for_dependency(&self, kind: DependencyKind) -> Self {
        match kind {
            DependencyKind::Library => Self {
                build: self.build.clone(),
                host: self.host.clone(),
                target: self.host.clone(),
            },
            DependencyKind::Tool => Self {
                build: self.build.clone(),
                host: self.build.clone(),
                target: self.build.clone(),
            },
            DependencyKind::Toolchain => self.previous_stage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Triple {
        s.parse().unwrap()
    }

    #[test]
    fn empty_rotate_is_native() {
        let native = Triple::native();
        let triples = rotate(&RotateArgs::default());
        assert_eq!(triples.build, native);
        assert_eq!(triples.host, native);
        assert_eq!(triples.target, native);
        assert!(!triples.is_cross());
    }

    #[test]
    fn host_only_keeps_native_build() {
        let native = t("x86_64-unknown-linux-gnu");
        let host = t("aarch64-unknown-linux-musl");
        let triples = rotate_from(
            &RotateArgs {
                host: Some(host.clone()),
                ..RotateArgs::default()
            },
            &native,
        );
        assert_eq!(triples.build, native);
        assert_eq!(triples.host, host);
        assert_eq!(triples.target, host);
        assert!(triples.is_cross());
    }

    #[test]
    fn next_stage_shifts_down() {
        let triples = Triples {
            build: t("x86_64-linux-gnu"),
            host: t("aarch64-linux-gnu"),
            target: t("riscv64-linux-gnu"),
        };
        let next = triples.next_stage();
        assert_eq!(next.build, triples.host);
        assert_eq!(next.host, triples.target);
        assert_eq!(next.target, triples.target);
    }

    #[test]
    fn previous_stage_undoes_next_stage() {
        let triples = Triples {
            build: t("x86_64-linux-gnu"),
            host: t("aarch64-linux-gnu"),
            target: t("aarch64-linux-gnu"),
        };
        let toolchain = triples.previous_stage();
        assert_eq!(toolchain.build, triples.build);
        assert_eq!(toolchain.host, triples.build);
        assert_eq!(toolchain.target, triples.host);
        assert!(!toolchain.is_cross());
        assert_eq!(toolchain.next_stage(), triples);
    }

    #[test]
    fn dependency_kinds_rotate_differently() {
        let triples = Triples {
            build: t("x86_64-linux-gnu"),
            host: t("aarch64-linux-gnu"),
            target: t("riscv64-linux-gnu"),
        };
        let library = triples.for_dependency(DependencyKind::Library);
        assert_eq!((&library.build, &library.host), (&triples.build, &triples.host));
        assert_eq!(library.target, triples.host);

        let tool = triples.for_dependency(DependencyKind::Tool);
        assert!(!tool.is_cross());
        assert_eq!(tool.target, triples.build);

        let toolchain = triples.for_dependency(DependencyKind::Toolchain);
        assert_eq!(toolchain.host, triples.build);
        assert_eq!(toolchain.target, triples.host);

        // without cross compilation every kind collapses to the same build
        let native = rotate_from(&RotateArgs::default(), &t("x86_64-linux-gnu"));
        for kind in [DependencyKind::Library, DependencyKind::Tool, DependencyKind::Toolchain] {
            assert_eq!(native.for_dependency(kind), native);
        }
    }

    #[test]
    fn equality_is_componentwise() {
        assert_ne!(t("x86_64-linux-gnu"), t("x86_64-linux-musl"));
        assert_eq!(t("x86_64-linux-gnu"), t("x86_64-unknown-linux-gnu"));
    }

    #[test]
    fn host_allow_list() {
        let triples = rotate_from(&RotateArgs::default(), &t("aarch64-apple-darwin"));
        assert!(triples.check_host(&[]).is_ok());
        assert!(triples.check_host(&[t("aarch64-darwin")]).is_ok());
        let err = triples
            .check_host(&[t("x86_64-linux"), t("aarch64-linux")])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Build(BuildError::UnsupportedHost { ref supported, .. }) if supported.len() == 2
        ));
    }
}
