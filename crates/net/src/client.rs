//! HTTP client with connection pooling
//!
//! Requests are issued exactly once. Retry policy belongs to callers.

use futures::StreamExt;
use kiln_config::NetworkConfig;
use kiln_errors::{Error, NetworkError};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Network client configuration
#[derive(Debug, Clone)]
pub struct NetConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 10,
            user_agent: format!("kiln/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl From<&NetworkConfig> for NetConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            user_agent: config.user_agent.clone(),
            ..Self::default()
        }
    }
}

/// Thin wrapper over a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct NetClient {
    client: Client,
}

impl NetClient {
    /// Create a new network client
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to initialize.
    pub fn new(config: &NetConfig) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| NetworkError::DownloadFailed(format!("cannot create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Create with default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created with default settings.
    pub fn with_defaults() -> Result<Self, Error> {
        Self::new(&NetConfig::default())
    }

    /// Issue a GET request and require a success status
    ///
    /// # Errors
    ///
    /// Returns `Timeout` or `DownloadFailed` for transport failures and
    /// `HttpError` for non-success statuses.
    pub async fn get(&self, url: &str) -> Result<Response, Error> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::HttpError {
                url: url.to_string(),
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            }
            .into());
        }
        Ok(response)
    }

    /// Stream a response body into `file`, calling `on_chunk` for every chunk
    ///
    /// # Errors
    ///
    /// Returns an error if the body stream fails or the file cannot be written.
    pub async fn stream_to<F>(
        &self,
        url: &str,
        response: Response,
        file: &mut tokio::fs::File,
        mut on_chunk: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&[u8]),
    {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::transport_error(url, &e))?;
            on_chunk(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    fn transport_error(url: &str, error: &reqwest::Error) -> Error {
        if error.is_timeout() {
            NetworkError::Timeout {
                url: url.to_string(),
            }
            .into()
        } else {
            NetworkError::DownloadFailed(format!("{url}: {error}")).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_network_settings() {
        let network = NetworkConfig {
            timeout: 12,
            ..NetworkConfig::default()
        };
        let config = NetConfig::from(&network);
        assert_eq!(config.timeout, Duration::from_secs(12));
        assert_eq!(config.user_agent, network.user_agent);
        assert!(NetClient::new(&config).is_ok());
    }
}
