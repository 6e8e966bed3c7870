use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("api key is required but empty")]
    ApiKeyMissing,

    #[error("endpoint is not a valid URL: {0}")]
    EndpointInvalidUrl(String),

    #[error("endpoint must use the https scheme: {0}")]
    EndpointNotHttps(String),

    #[error("flush interval must be greater than zero")]
    InvalidFlushInterval,

    #[error("max batch size must be greater than zero")]
    InvalidBatchSize,
}

/// Immutable dispatcher configuration. Built with [`Config::builder`];
/// validation happens once, at construction.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub endpoint: Url,
    pub api_key_header: String,
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    /// Queue capacity. `None` means unbounded.
    pub max_buffer_size: Option<usize>,
    pub max_retries: u32,
}

impl Config {
    pub fn builder(api_key: impl Into<String>, endpoint: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            api_key_header: None,
            flush_interval: None,
            max_batch_size: None,
            max_buffer_size: None,
            max_retries: None,
        }
    }
}

#[derive(Debug)]
pub struct ConfigBuilder {
    api_key: String,
    endpoint: String,
    api_key_header: Option<String>,
    flush_interval: Option<Duration>,
    max_batch_size: Option<usize>,
    max_buffer_size: Option<usize>,
    max_retries: Option<u32>,
}

impl ConfigBuilder {
    /// Header name carrying the api key. Default `X-API-Key`.
    pub fn api_key_header(mut self, name: impl Into<String>) -> Self {
        self.api_key_header = Some(name.into());
        self
    }

    /// Period of the scheduled flush timer. Default 5 s.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Events per transport request. Default 10.
    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    /// Queue capacity; oldest events are evicted beyond it. Unbounded by
    /// default.
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = Some(size);
        self
    }

    /// Retry budget per event before a terminal drop. Default 3.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn build(self) -> Result<Config, ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::ApiKeyMissing);
        }

        let endpoint = Url::parse(&self.endpoint)
            .map_err(|_| ConfigError::EndpointInvalidUrl(self.endpoint.clone()))?;
        if endpoint.scheme() != "https" {
            return Err(ConfigError::EndpointNotHttps(self.endpoint));
        }

        let flush_interval = self.flush_interval.unwrap_or(Duration::from_millis(5000));
        if flush_interval.is_zero() {
            return Err(ConfigError::InvalidFlushInterval);
        }

        let max_batch_size = self.max_batch_size.unwrap_or(10);
        if max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        Ok(Config {
            api_key: self.api_key,
            endpoint,
            api_key_header: self
                .api_key_header
                .unwrap_or_else(|| "X-API-Key".to_owned()),
            flush_interval,
            max_batch_size,
            max_buffer_size: self.max_buffer_size,
            max_retries: self.max_retries.unwrap_or(3),
        })
    }
}

#[cfg(test)]
mod tests;
