#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for kiln
//!
//! Configuration is layered:
//! - Default values (hard-coded)
//! - Configuration file (`~/.config/kiln/config.toml`)
//! - Environment variables (`KILN_STORE`, `KILN_JOBS`, `KILN_GNU_MIRROR`)
//! - CLI flags (applied by the binary)

use kiln_errors::{ConfigError, Error};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// Where kiln keeps its data
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PathConfig {
    /// Root of the artifact store, download cache, build cache and
    /// scratch work directories
    pub store: Option<PathBuf>,
}

/// Network configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_gnu_mirror")]
    pub gnu_mirror: String,
    #[serde(default = "default_github_base")]
    pub github_base: String,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BuildConfig {
    /// Parallel jobs for `make -j` and friends (0 = number of CPUs)
    #[serde(default)]
    pub jobs: usize,
    /// Run the check phase even when the recipe does not ask for it
    #[serde(default)]
    pub run_checks: bool,
    /// Leave the work directory in place when a build fails
    #[serde(default)]
    pub keep_failed_work: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout: default_connect_timeout(),
            user_agent: default_user_agent(),
            gnu_mirror: default_gnu_mirror(),
            github_base: default_github_base(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("kiln/{}", env!("CARGO_PKG_VERSION"))
}

fn default_gnu_mirror() -> String {
    "https://ftp.gnu.org/gnu".to_string()
}

fn default_github_base() -> String {
    "https://github.com".to_string()
}

impl NetworkConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("kiln").join("config.toml"))
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this structure.
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;
        Self::from_toml(&contents)
    }

    /// Load from an explicit path, or from the default location when it
    /// exists, falling back to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing, or any file that is
    /// read cannot be parsed.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => {
                let default = Self::default_path()?;
                if fs::try_exists(&default).await.unwrap_or(false) {
                    Self::load_from_file(&default).await
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply environment variable overrides from the process environment
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        self.merge_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides from an arbitrary lookup
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn merge_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), Error> {
        if let Some(store) = lookup("KILN_STORE") {
            self.paths.store = Some(PathBuf::from(store));
        }

        if let Some(jobs) = lookup("KILN_JOBS") {
            self.build.jobs = jobs.parse().map_err(|_| ConfigError::InvalidValue {
                field: "KILN_JOBS".to_string(),
                value: jobs,
            })?;
        }

        if let Some(mirror) = lookup("KILN_GNU_MIRROR") {
            if mirror.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "KILN_GNU_MIRROR".to_string(),
                    value: mirror,
                }
                .into());
            }
            self.network.gnu_mirror = mirror.trim_end_matches('/').to_string();
        }

        Ok(())
    }

    /// Store root (with default under the user's data directory)
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.paths.store.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("kiln")
        })
    }

    /// Effective parallel job count
    #[must_use]
    pub fn jobs(&self) -> usize {
        calculate_build_jobs(self.build.jobs)
    }
}

/// Resolve a configured job count, auto-detecting when zero
#[must_use]
pub fn calculate_build_jobs(config_value: usize) -> usize {
    if config_value > 0 {
        config_value
    } else {
        num_cpus::get().max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.network.gnu_mirror, "https://ftp.gnu.org/gnu");
        assert!(!config.build.run_checks);
    }

    #[tokio::test]
    async fn load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[paths]
store = "/var/tmp/kiln"

[network]
timeout = 10
github_base = "http://localhost:8080"

[build]
jobs = 4
run_checks = true
"#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/var/tmp/kiln"));
        assert_eq!(config.network.timeout(), Duration::from_secs(10));
        assert_eq!(config.network.connect_timeout, 30);
        assert_eq!(config.network.github_base, "http://localhost:8080");
        assert_eq!(config.jobs(), 4);
        assert!(config.build.run_checks);
    }

    #[tokio::test]
    async fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load_or_default(Some(&missing)).await.is_err());
    }

    #[test]
    fn parse_errors_are_reported() {
        let err = Config::from_toml("[build]\njobs = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KILN_STORE", "/srv/kiln"),
            ("KILN_JOBS", "3"),
            ("KILN_GNU_MIRROR", "https://mirror.example/gnu/"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .merge_env_from(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/srv/kiln"));
        assert_eq!(config.build.jobs, 3);
        assert_eq!(config.network.gnu_mirror, "https://mirror.example/gnu");
    }

    #[test]
    fn invalid_env_value() {
        let mut config = Config::default();
        let result = config.merge_env_from(|k| (k == "KILN_JOBS").then(|| "lots".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn zero_jobs_autodetects() {
        assert!(calculate_build_jobs(0) >= 1);
        assert_eq!(calculate_build_jobs(7), 7);
    }
}
