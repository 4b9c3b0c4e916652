//! Source descriptions and their URL conventions

use kiln_config::NetworkConfig;
use kiln_errors::{Error, NetworkError};
use kiln_hash::Checksum;
use kiln_types::{Compression, FetchMode};
use serde::{Deserialize, Serialize};
use url::Url;

/// Where a source comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLocation {
    /// A concrete URL (`http`, `https` or `file`)
    Url(String),
    /// A release tarball on the GNU mirror network
    Gnu {
        name: String,
        version: String,
        #[serde(default)]
        compression: Compression,
    },
    /// A GitHub tag archive or release asset
    Github {
        owner: String,
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default)]
        source: GithubSource,
        #[serde(default)]
        compression: Compression,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GithubSource {
    #[default]
    Tag,
    Release,
}

/// A fetchable, checksum-pinned source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    #[serde(flatten)]
    pub location: SourceLocation,
    pub checksum: Checksum,
    #[serde(default)]
    pub mode: FetchMode,
    /// Strip a single top-level directory after extraction
    #[serde(default = "default_unwrap")]
    pub unwrap: bool,
}

fn default_unwrap() -> bool {
    true
}

impl SourceSpec {
    #[must_use]
    pub fn url(url: impl Into<String>, checksum: Checksum) -> Self {
        Self {
            location: SourceLocation::Url(url.into()),
            checksum,
            mode: FetchMode::default(),
            unwrap: true,
        }
    }

    #[must_use]
    pub fn gnu(name: &str, version: &str, compression: Compression, checksum: Checksum) -> Self {
        Self {
            location: SourceLocation::Gnu {
                name: name.to_string(),
                version: version.to_string(),
                compression,
            },
            checksum,
            mode: FetchMode::default(),
            unwrap: true,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_unwrap(mut self, unwrap: bool) -> Self {
        self.unwrap = unwrap;
        self
    }

    /// Resolve the concrete download URL
    ///
    /// # Errors
    ///
    /// Returns `InvalidUrl` if the result does not parse, uses an unsupported
    /// scheme, or a GitHub source names neither a tag nor a version.
    pub fn resolve_url(&self, network: &NetworkConfig) -> Result<Url, Error> {
        let raw = match &self.location {
            SourceLocation::Url(url) => url.clone(),
            SourceLocation::Gnu {
                name,
                version,
                compression,
            } => format!(
                "{}/{name}/{name}-{version}.tar.{}",
                network.gnu_mirror.trim_end_matches('/'),
                compression.extension()
            ),
            SourceLocation::Github {
                owner,
                repo,
                tag,
                version,
                source,
                compression,
            } => {
                let base = network.github_base.trim_end_matches('/');
                let tag = match (tag, version) {
                    (Some(tag), _) => tag.clone(),
                    (None, Some(version)) => format!("v{version}"),
                    (None, None) => {
                        return Err(NetworkError::InvalidUrl(format!(
                            "github source {owner}/{repo} needs a tag or a version"
                        ))
                        .into())
                    }
                };
                match source {
                    GithubSource::Tag => {
                        format!("{base}/{owner}/{repo}/archive/refs/tags/{tag}.tar.gz")
                    }
                    GithubSource::Release => {
                        let version = version
                            .clone()
                            .unwrap_or_else(|| tag.trim_start_matches('v').to_string());
                        format!(
                            "{base}/{owner}/{repo}/releases/download/{tag}/{repo}-{version}.tar.{}",
                            compression.extension()
                        )
                    }
                }
            }
        };
        parse_url(&raw)
    }
}

/// Parse a URL and require a supported scheme
///
/// # Errors
///
/// Returns `InvalidUrl` for malformed URLs or schemes other than
/// `http`, `https` and `file`.
pub fn parse_url(raw: &str) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|e| NetworkError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(url),
        other => Err(NetworkError::InvalidUrl(format!("{raw}: unsupported scheme {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checksum() -> Checksum {
        Checksum::sha256_of(b"source")
    }

    #[test]
    fn gnu_convention() {
        let spec = SourceSpec::gnu("make", "4.4.1", Compression::Gz, checksum());
        let url = spec.resolve_url(&NetworkConfig::default()).unwrap();
        assert_eq!(url.as_str(), "https://ftp.gnu.org/gnu/make/make-4.4.1.tar.gz");
    }

    #[test]
    fn gnu_convention_uses_configured_mirror() {
        let network = NetworkConfig {
            gnu_mirror: "https://mirror.example/gnu/".into(),
            ..NetworkConfig::default()
        };
        let spec = SourceSpec::gnu("sed", "4.9", Compression::Xz, checksum());
        assert_eq!(
            spec.resolve_url(&network).unwrap().as_str(),
            "https://mirror.example/gnu/sed/sed-4.9.tar.xz"
        );
    }

    #[test]
    fn github_tag_defaults_to_v_version() {
        let json = serde_json::json!({
            "github": {"owner": "madler", "repo": "zlib", "version": "1.3.1"},
            "checksum": checksum().to_string(),
        });
        let spec: SourceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(
            spec.resolve_url(&NetworkConfig::default()).unwrap().as_str(),
            "https://github.com/madler/zlib/archive/refs/tags/v1.3.1.tar.gz"
        );
        assert!(spec.unwrap);
        assert_eq!(spec.mode, FetchMode::Extract);
    }

    #[test]
    fn github_release_asset() {
        let spec = SourceSpec {
            location: SourceLocation::Github {
                owner: "jqlang".into(),
                repo: "jq".into(),
                tag: Some("jq-1.7.1".into()),
                version: Some("1.7.1".into()),
                source: GithubSource::Release,
                compression: Compression::Gz,
            },
            checksum: checksum(),
            mode: FetchMode::Extract,
            unwrap: true,
        };
        assert_eq!(
            spec.resolve_url(&NetworkConfig::default()).unwrap().as_str(),
            "https://github.com/jqlang/jq/releases/download/jq-1.7.1/jq-1.7.1.tar.gz"
        );
    }

    #[test]
    fn github_without_tag_or_version_is_rejected() {
        let spec = SourceSpec {
            location: SourceLocation::Github {
                owner: "o".into(),
                repo: "r".into(),
                tag: None,
                version: None,
                source: GithubSource::Tag,
                compression: Compression::Gz,
            },
            checksum: checksum(),
            mode: FetchMode::Extract,
            unwrap: true,
        };
        assert!(spec.resolve_url(&NetworkConfig::default()).is_err());
    }

    #[test]
    fn url_schemes() {
        assert!(parse_url("https://example.com/a.tar.gz").is_ok());
        assert!(parse_url("file:///tmp/a.tar.gz").is_ok());
        assert!(parse_url("ftp://example.com/a.tar.gz").is_err());
        assert!(parse_url("not a url").is_err());
    }

    #[test]
    fn raw_spec_from_json() {
        let json = serde_json::json!({
            "url": "https://example.com/tool",
            "checksum": checksum().to_string(),
            "mode": "raw",
        });
        let spec: SourceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.mode, FetchMode::Raw);
        assert_eq!(
            spec.location,
            SourceLocation::Url("https://example.com/tool".into())
        );
    }
}
