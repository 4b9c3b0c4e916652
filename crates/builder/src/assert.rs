//! Post-build assertions over an output directory
//!
//! Each declared binary, library and header yields one result. Binaries
//! are run through the same [`CommandRunner`] seam as build phases.

use crate::stages::{CommandRequest, CommandRunner};
use kiln_errors::{BuildError, Error};
use kiln_events::{AppEvent, BuildEvent, EventEmitter};
use kiln_types::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// What a recipe promises its output contains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provides {
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertSpec {
    #[serde(default)]
    pub binaries: Vec<BinaryCheck>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryCheck {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub expect: Expectation,
}

/// How a binary's run is judged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    /// Exits zero
    #[default]
    Success,
    /// Present and executable; not run
    Exists,
    /// Exits zero and stdout equals the snapshot, ignoring trailing whitespace
    Snapshot(String),
    /// Exits zero and stdout or stderr contains the text
    Contains(String),
}

impl AssertSpec {
    /// Presence checks for everything a recipe provides
    #[must_use]
    pub fn from_provides(provides: &Provides) -> Self {
        Self {
            binaries: provides
                .binaries
                .iter()
                .map(|name| BinaryCheck {
                    name: name.clone(),
                    args: Vec::new(),
                    expect: Expectation::Exists,
                })
                .collect(),
            libraries: provides.libraries.clone(),
            headers: provides.headers.clone(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty() && self.libraries.is_empty() && self.headers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertResult {
    /// Path of the checked artifact relative to the output directory
    pub artifact: String,
    pub passed: bool,
    pub message: Option<String>,
}

impl AssertResult {
    fn pass(artifact: String) -> Self {
        Self {
            artifact,
            passed: true,
            message: None,
        }
    }

    fn fail(artifact: String, message: impl Into<String>) -> Self {
        Self {
            artifact,
            passed: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssertReport {
    pub results: Vec<AssertResult>,
}

impl AssertReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AssertResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// # Errors
    ///
    /// Returns `AssertionFailed` for the first failing artifact.
    pub fn into_result(self) -> Result<Self, Error> {
        if let Some(failed) = self.failures().next() {
            return Err(BuildError::AssertionFailed {
                artifact: failed.artifact.clone(),
                message: failed.message.clone().unwrap_or_default(),
            }
            .into());
        }
        Ok(self)
    }
}

/// Check an output directory against a spec
///
/// # Errors
///
/// Only infrastructure failures are errors (cancellation, I/O while
/// probing). Failed checks are reported in the returned report.
pub async fn check_output<E: EventEmitter>(
    recipe: &str,
    output: &Path,
    spec: &AssertSpec,
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    events: &E,
) -> Result<AssertReport, Error> {
    let mut report = AssertReport::default();

    for check in &spec.binaries {
        let result = check_binary(recipe, output, check, runner, cancel).await?;
        report.results.push(result);
    }
    for library in &spec.libraries {
        report.results.push(check_library(output, library).await?);
    }
    for header in &spec.headers {
        let artifact = format!("include/{header}");
        let result = if is_file(&output.join(&artifact)).await? {
            AssertResult::pass(artifact)
        } else {
            AssertResult::fail(artifact, "header not found")
        };
        report.results.push(result);
    }

    for result in report.results.iter().filter(|r| r.passed) {
        events.emit(AppEvent::Build(BuildEvent::AssertionPassed {
            recipe: recipe.to_string(),
            check: result.artifact.clone(),
        }));
    }
    Ok(report)
}

async fn check_binary(
    recipe: &str,
    output: &Path,
    check: &BinaryCheck,
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
) -> Result<AssertResult, Error> {
    let artifact = format!("bin/{}", check.name);
    let path = output.join(&artifact);
    if !is_file(&path).await? {
        return Ok(AssertResult::fail(artifact, "binary not found"));
    }
    if check.expect == Expectation::Exists {
        return Ok(AssertResult::pass(artifact));
    }

    let request = CommandRequest {
        recipe: recipe.to_string(),
        phase: Phase::Check,
        program: path.display().to_string(),
        args: check.args.clone(),
        cwd: output.to_path_buf(),
        env: BTreeMap::from([
            ("PATH".to_string(), output.join("bin").display().to_string()),
            ("OUTPUT".to_string(), output.display().to_string()),
        ]),
    };
    let result = runner.run(&request, cancel).await?;
    if !result.success() {
        return Ok(AssertResult::fail(
            artifact,
            format!("exited with {:?}: {}", result.exit_code, result.stderr.trim_end()),
        ));
    }

    Ok(match &check.expect {
        Expectation::Snapshot(expected) if result.stdout.trim_end() != expected.trim_end() => {
            AssertResult::fail(
                artifact,
                format!(
                    "output differs from snapshot\nexpected: {}\nactual: {}",
                    expected.trim_end(),
                    result.stdout.trim_end()
                ),
            )
        }
        Expectation::Contains(needle)
            if !result.stdout.contains(needle.as_str()) && !result.stderr.contains(needle.as_str()) =>
        {
            AssertResult::fail(artifact, format!("output does not contain {needle:?}"))
        }
        _ => AssertResult::pass(artifact),
    })
}

async fn check_library(output: &Path, name: &str) -> Result<AssertResult, Error> {
    let lib_dir = output.join("lib");
    let stem = format!("lib{name}");
    for ext in ["a", "so", "dylib"] {
        let artifact = format!("lib/{stem}.{ext}");
        if is_file(&output.join(&artifact)).await? {
            return Ok(AssertResult::pass(artifact));
        }
    }

    // versioned shared objects: libz.so.1, libz.so.1.3
    let versioned = format!("{stem}.so.");
    if tokio::fs::try_exists(&lib_dir).await? {
        let mut entries = tokio::fs::read_dir(&lib_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            if file_name.to_string_lossy().starts_with(&versioned) {
                return Ok(AssertResult::pass(format!("lib/{}", file_name.to_string_lossy())));
            }
        }
    }
    Ok(AssertResult::fail(format!("lib/{stem}"), "library not found"))
}

async fn is_file(path: &Path) -> Result<bool, Error> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}
