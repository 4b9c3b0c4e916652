#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the kiln build engine
//!
//! This crate provides the small vocabulary shared by every other crate:
//! compilation triples, phase names, build-system kinds and source archive
//! formats.

pub mod phase;
pub mod triple;

pub use phase::{Phase, UnknownPhase};
pub use triple::{Triple, TripleParseError};

use serde::{Deserialize, Serialize};

/// Build system driving a recipe's default phase commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystemKind {
    /// Detect from marker files in the source tree
    #[default]
    Auto,
    Autotools,
    Cmake,
    Cargo,
    Go,
    /// No default commands; every phase is supplied by the recipe
    Custom,
}

impl std::fmt::Display for BuildSystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Autotools => "autotools",
            Self::Cmake => "cmake",
            Self::Cargo => "cargo",
            Self::Go => "go",
            Self::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// What to do with fetched bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Keep the downloaded file as-is
    Raw,
    /// Decompress and unpack into a directory
    #[default]
    Extract,
}

/// Compression used by conventional source tarballs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gz,
    Bz2,
    Xz,
    Zst,
}

impl Compression {
    /// File extension suffix after `.tar.`
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gz => "gz",
            Self::Bz2 => "bz2",
            Self::Xz => "xz",
            Self::Zst => "zst",
        }
    }
}
