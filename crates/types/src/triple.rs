//! Compilation target triples
//!
//! A triple identifies a machine as `arch-vendor-system[-environment]`.
//! Parsing is lenient about the vendor component, which is frequently
//! omitted in the wild (`x86_64-linux-gnu`, `aarch64-linux`); a missing
//! vendor normalises to `unknown` so that equality stays component-wise.

use kiln_errors::{ArgsError, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error as ThisError;

/// A structured (architecture, vendor, system, environment) tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    arch: String,
    vendor: String,
    system: String,
    environment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("invalid triple {input:?}: {reason}")]
pub struct TripleParseError {
    pub input: String,
    pub reason: &'static str,
}

impl From<TripleParseError> for Error {
    fn from(err: TripleParseError) -> Self {
        ArgsError::InvalidFragment {
            message: err.to_string(),
        }
        .into()
    }
}

impl Triple {
    /// Build a triple from its components
    #[must_use]
    pub fn new(
        arch: impl Into<String>,
        vendor: impl Into<String>,
        system: impl Into<String>,
        environment: Option<&str>,
    ) -> Self {
        Self {
            arch: arch.into(),
            vendor: vendor.into(),
            system: system.into(),
            environment: environment.map(str::to_string),
        }
    }

    /// The invoking machine's triple
    #[must_use]
    pub fn native() -> Self {
        let arch = std::env::consts::ARCH;
        match std::env::consts::OS {
            "macos" => Self::new(arch, "apple", "darwin", None),
            "windows" => Self::new(arch, "pc", "windows", Some(native_env_or("msvc"))),
            "linux" => Self::new(arch, "unknown", "linux", Some(native_env_or("gnu"))),
            other => Self::new(arch, "unknown", other, None),
        }
    }

    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    #[must_use]
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    #[must_use]
    pub fn system(&self) -> &str {
        &self.system
    }

    #[must_use]
    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    /// Whether this triple satisfies a host allow-list pattern.
    ///
    /// Architecture and system must match. The vendor only has to match when
    /// the pattern names one other than `unknown`; the environment only when
    /// the pattern names one.
    #[must_use]
    pub fn satisfies(&self, pattern: &Triple) -> bool {
        if self.arch != pattern.arch || self.system != pattern.system {
            return false;
        }
        if pattern.vendor != "unknown" && pattern.vendor != self.vendor {
            return false;
        }
        match &pattern.environment {
            Some(env) => self.environment.as_ref() == Some(env),
            None => true,
        }
    }

    /// GOOS value for this triple
    #[must_use]
    pub fn go_os(&self) -> &str {
        match self.system.as_str() {
            "darwin" | "macos" => "darwin",
            other => other,
        }
    }

    /// GOARCH value for this triple
    #[must_use]
    pub fn go_arch(&self) -> &str {
        match self.arch.as_str() {
            "x86_64" => "amd64",
            "aarch64" | "arm64" => "arm64",
            "i686" | "i386" => "386",
            "armv7" | "arm" => "arm",
            other => other,
        }
    }

    /// Check if a string is likely a vendor name
    fn is_vendor(s: &str) -> bool {
        matches!(s, "apple" | "pc" | "unknown" | "none" | "w64")
    }
}

fn native_env_or(default: &'static str) -> &'static str {
    if cfg!(target_env = "musl") {
        "musl"
    } else if cfg!(target_env = "gnu") {
        "gnu"
    } else if cfg!(target_env = "msvc") {
        "msvc"
    } else {
        default
    }
}

impl FromStr for Triple {
    type Err = TripleParseError;

    fn from_str(triple: &str) -> Result<Self, Self::Err> {
        let err = |reason| TripleParseError {
            input: triple.to_string(),
            reason,
        };
        let parts: Vec<&str> = triple.split('-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(err("empty component"));
        }

        let arch = parts[0].to_string();
        let (vendor, system, environment) = match parts.len() {
            // arch-os (e.g. aarch64-linux)
            2 => ("unknown".to_string(), parts[1].to_string(), None),
            // arch-vendor-os or arch-os-env
            3 if Self::is_vendor(parts[1]) => (parts[1].to_string(), parts[2].to_string(), None),
            3 => (
                "unknown".to_string(),
                parts[1].to_string(),
                Some(parts[2].to_string()),
            ),
            4 => (
                parts[1].to_string(),
                parts[2].to_string(),
                Some(parts[3].to_string()),
            ),
            1 => return Err(err("expected at least arch and system")),
            _ => return Err(err("too many components")),
        };

        Ok(Self {
            arch,
            vendor,
            system,
            environment,
        })
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch, self.vendor, self.system)?;
        if let Some(env) = &self.environment {
            write!(f, "-{env}")?;
        }
        Ok(())
    }
}

impl Serialize for Triple {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Triple {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
