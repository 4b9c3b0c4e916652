//! Environment contributed by a resolved dependency

use super::{EnvironmentFragment, Tier};
use crate::recipe::DependencyKind;
use kiln_args::Mutation;
use std::path::Path;

/// Search paths and flags for a dependency's output directory.
/// Only directories that exist contribute.
///
/// `bin/` joins `PATH` only when `runs_on_build` says the dependency's
/// binaries execute on the build machine. Tools and toolchains contribute
/// nothing to compile or link against.
pub async fn dependency_fragment(
    name: &str,
    output: &Path,
    kind: DependencyKind,
    runs_on_build: bool,
) -> EnvironmentFragment {
    let mut env = EnvironmentFragment::new(name, Tier::Dependency);
    let exists = |dir: &Path| {
        let dir = dir.to_path_buf();
        async move { tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) }
    };

    let bin = output.join("bin");
    if runs_on_build && exists(&bin).await {
        // ahead of the host PATH so dependency tools shadow host tools
        env.push("PATH", Mutation::prefix(display(&bin), Some(":")));
    }

    let aclocal = output.join("share/aclocal");
    if exists(&aclocal).await {
        env.push("ACLOCAL_PATH", Mutation::suffix(display(&aclocal), Some(":")));
    }

    if kind != DependencyKind::Library {
        return env;
    }

    env.push("CMAKE_PREFIX_PATH", Mutation::suffix(display(output), Some(":")));

    let include = output.join("include");
    if exists(&include).await {
        env.push("CPATH", Mutation::suffix(display(&include), Some(":")));
        env.push(
            "CPPFLAGS",
            Mutation::suffix(format!("-I{}", include.display()), Some(" ")),
        );
    }

    let lib = output.join("lib");
    if exists(&lib).await {
        env.push("LIBRARY_PATH", Mutation::suffix(display(&lib), Some(":")));
        env.push(
            "LDFLAGS",
            Mutation::suffix(format!("-L{}", lib.display()), Some(" ")),
        );
    }

    for pkgconfig in [output.join("lib/pkgconfig"), output.join("share/pkgconfig")] {
        if exists(&pkgconfig).await {
            env.push("PKG_CONFIG_PATH", Mutation::suffix(display(&pkgconfig), Some(":")));
        }
    }

    env
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
