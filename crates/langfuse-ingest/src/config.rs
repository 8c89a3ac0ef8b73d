// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ConfigError;
use reqwest::Url;
use std::env;
use std::time::Duration;

const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_IDLE_CONNS_PER_HOST: usize = 10;
const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(90);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configuration for the ingestion client and its event processors
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Langfuse server base URL (e.g., https://cloud.langfuse.com)
    pub url: String,
    /// Public key of the Langfuse project
    pub public_key: String,
    /// Secret key of the Langfuse project
    pub secret_key: String,
    /// Number of concurrent batch processors draining the queue
    pub number_of_event_processor: usize,
    /// Flush a batch once it holds this many events
    pub batch_size: usize,
    /// Flush whatever is pending at least this often
    pub batch_timeout: Duration,
    /// Additional attempts after the first failed send
    pub max_retries: u32,
    /// Base unit of the exponential backoff
    pub retry_delay: Duration,
    /// Per request HTTP timeout
    pub timeout: Duration,
    /// Idle connections kept per host in the HTTP pool
    pub max_idle_conns_per_host: usize,
    /// How long an idle pooled connection is kept around
    pub idle_conn_timeout: Duration,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            public_key: String::new(),
            secret_key: String::new(),
            number_of_event_processor: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            max_idle_conns_per_host: DEFAULT_MAX_IDLE_CONNS_PER_HOST,
            idle_conn_timeout: DEFAULT_IDLE_CONN_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl IngestConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            url: env::var("LANGFUSE_URL").unwrap_or_default(),
            public_key: env::var("LANGFUSE_PUBLIC_KEY").unwrap_or_default(),
            secret_key: env::var("LANGFUSE_SECRET_KEY").unwrap_or_default(),
            number_of_event_processor: parse_var("LANGFUSE_NUM_OF_EVENT_PROCESSOR")
                .unwrap_or(defaults.number_of_event_processor),
            batch_size: parse_var("LANGFUSE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            batch_timeout: parse_var("LANGFUSE_BATCH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.batch_timeout),
            max_retries: parse_var("LANGFUSE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_delay: parse_var("LANGFUSE_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            timeout: parse_var("LANGFUSE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            max_idle_conns_per_host: parse_var("LANGFUSE_MAX_IDLE_CONNS_PER_HOST")
                .unwrap_or(defaults.max_idle_conns_per_host),
            idle_conn_timeout: parse_var("LANGFUSE_IDLE_CONN_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_conn_timeout),
            log_level: env::var("LANGFUSE_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the full configuration, including what the HTTP transport needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingestion_url()?;

        if self.public_key.trim().is_empty() {
            return Err(ConfigError::MissingPublicKey);
        }
        if self.secret_key.trim().is_empty() {
            return Err(ConfigError::MissingSecretKey);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NotPositive("timeout"));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }

        self.validate_pipeline()
    }

    /// Validate only the batching and retry settings.
    ///
    /// A processor count of zero is accepted; the service warns and starts no
    /// workers.
    pub fn validate_pipeline(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::NotPositive("batch_size"));
        }
        if self.batch_timeout.is_zero() {
            return Err(ConfigError::NotPositive("batch_timeout"));
        }
        Ok(())
    }

    /// Full URL of the ingestion endpoint
    pub fn ingestion_url(&self) -> Result<Url, ConfigError> {
        let base = self.url.trim();
        if base.is_empty() {
            return Err(ConfigError::MissingUrl);
        }
        let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .map_err(|_| ConfigError::InvalidUrl(base.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidUrl(self.url.clone()));
        }
        base.join("api/public/ingestion")
            .map_err(|_| ConfigError::InvalidUrl(self.url.clone()))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}
