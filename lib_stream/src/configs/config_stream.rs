//! # Stream Configuration
//!
//! Loads the YAML stream configuration and turns it into an immutable
//! [`StreamSession`]: decoded credentials, derived endpoint URL and framing.
//! Everything downstream reads the session, never the raw file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use thiserror::Error;

use crate::core::pending_queue::DEFAULT_WARN_DEPTH;
use crate::core::reconnect::{BudgetPolicy, RetryBudget, DEFAULT_MAX_ATTEMPTS};
use crate::framing::Framing;
use crate::ingestors::http_stream::StreamRequest;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The YAML did not match the expected shape.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yml::Error),
    /// The encoded password is not valid base64 UTF-8.
    #[error("invalid account.password_encoded: {0}")]
    Password(String),
    /// A required value is empty.
    #[error("missing required config value: {0}")]
    Missing(&'static str),
    /// The endpoint URL is not a valid URL.
    #[error("invalid stream URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parser message.
        reason: String,
    },
}

/// Which upstream product the stream is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointVariant {
    /// PowerTrack: JSON activities.
    #[default]
    Powertrack,
    /// Enterprise Data Collector: Atom entries.
    Edc,
}

impl EndpointVariant {
    /// Framing used by streams of this variant.
    pub fn framing(self) -> Framing {
        match self {
            EndpointVariant::Powertrack => Framing::Json,
            EndpointVariant::Edc => Framing::Xml,
        }
    }
}

/// `account` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Account name, part of the endpoint URL.
    pub name: String,
    /// Basic-auth user.
    pub user_name: String,
    /// Base64-encoded basic-auth password.
    pub password_encoded: String,
}

/// `stream` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    /// Publisher tag, e.g. `twitter`.
    pub publisher: String,
    /// Stream type, e.g. `track`.
    #[serde(rename = "type")]
    pub stream_type: String,
    /// Stream label, e.g. `prod`.
    pub label: String,
    /// Upstream product.
    #[serde(default)]
    pub endpoint: EndpointVariant,
    /// Identifier stored with every record.
    #[serde(default = "default_stream_id")]
    pub stream_id: i64,
    /// Request a gzip-compressed body.
    #[serde(default = "default_true")]
    pub compressed: bool,
    /// Explicit endpoint URL, overriding the derived one.
    #[serde(default)]
    pub url: Option<String>,
}

/// `database` section, used by the Postgres sink.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    #[serde(default = "default_db_port")]
    pub port: u16,
    /// Database name.
    pub schema: String,
    /// Login user.
    pub user_name: String,
    /// Login password.
    pub password: String,
    /// Table the activities are written to.
    #[serde(default = "default_table")]
    pub table: String,
}

/// `pipeline` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Queue depth that triggers the falling-behind warning.
    #[serde(default = "default_warn_depth")]
    pub queue_warn_depth: usize,
    /// Queue bound. Unset means unbounded.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// Longest wait of the consumer on an empty queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Finish queued records before exiting on shutdown.
    #[serde(default = "default_true")]
    pub drain_on_shutdown: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_warn_depth: default_warn_depth(),
            queue_capacity: None,
            poll_interval_ms: default_poll_interval_ms(),
            drain_on_shutdown: true,
        }
    }
}

/// `reconnect` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Retries allowed per budget.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wait before each retry.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// How budgets are allotted.
    #[serde(default)]
    pub budget: BudgetPolicy,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay_ms(),
            budget: BudgetPolicy::default(),
        }
    }
}

impl ReconnectConfig {
    /// The retry budget this section describes.
    pub fn retry_budget(&self) -> RetryBudget {
        RetryBudget::new(self.budget, self.max_attempts, Duration::from_millis(self.delay_ms))
    }
}

fn default_stream_id() -> i64 {
    1
}
fn default_true() -> bool {
    true
}
fn default_db_port() -> u16 {
    5432
}
fn default_table() -> String {
    "activities".to_string()
}
fn default_warn_depth() -> usize {
    DEFAULT_WARN_DEPTH
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_delay_ms() -> u64 {
    2000
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Credentials.
    pub account: AccountConfig,
    /// Stream selection.
    pub stream: StreamSection,
    /// Postgres sink settings.
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Queue and consumer settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Retry settings.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl StreamConfig {
    /// Parses a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(text)?)
    }

    /// Reads and parses a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        log::info!("Loaded stream config from {}", path.display());
        Ok(config)
    }

    /// Validates the configuration and builds the session it describes.
    pub fn session(&self) -> Result<StreamSession, ConfigError> {
        let account = &self.account;
        let stream = &self.stream;
        for (value, name) in [
            (&account.name, "account.name"),
            (&account.user_name, "account.user_name"),
            (&stream.publisher, "stream.publisher"),
            (&stream.stream_type, "stream.type"),
            (&stream.label, "stream.label"),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        let password = decode_password(&account.password_encoded)?;
        let url = match &stream.url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => endpoint_url(stream.endpoint, &account.name, &stream.publisher, &stream.stream_type, &stream.label),
        };
        url::Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(StreamSession {
            account_name: account.name.clone(),
            user_name: account.user_name.clone(),
            password,
            publisher: stream.publisher.clone(),
            stream_type: stream.stream_type.clone(),
            stream_label: stream.label.clone(),
            endpoint: stream.endpoint,
            stream_id: stream.stream_id,
            compressed: stream.compressed,
            url,
        })
    }
}

/// Decodes a base64 password into text.
pub fn decode_password(encoded: &str) -> Result<String, ConfigError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ConfigError::Password(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ConfigError::Password(e.to_string()))
}

/// The endpoint URL of a stream.
pub fn endpoint_url(endpoint: EndpointVariant, account: &str, publisher: &str, stream_type: &str, label: &str) -> String {
    match endpoint {
        EndpointVariant::Powertrack => format!(
            "https://stream.gnip.com:443/accounts/{}/publishers/{}/streams/{}/{}.json",
            account, publisher, stream_type, label
        ),
        EndpointVariant::Edc => format!("https://{}.gnip.com/data_collectors/{}/stream.xml", account, label),
    }
}

/// Immutable identity of one running stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSession {
    /// Account name.
    pub account_name: String,
    /// Basic-auth user.
    pub user_name: String,
    /// Decoded password.
    pub password: String,
    /// Publisher tag.
    pub publisher: String,
    /// Stream type.
    pub stream_type: String,
    /// Stream label.
    pub stream_label: String,
    /// Upstream product.
    pub endpoint: EndpointVariant,
    /// Identifier stored with every record.
    pub stream_id: i64,
    /// Request a gzip-compressed body.
    pub compressed: bool,
    /// Endpoint URL.
    pub url: String,
}

impl StreamSession {
    /// Framing of this stream's records.
    pub fn framing(&self) -> Framing {
        self.endpoint.framing()
    }

    /// The HTTP request that opens this stream.
    pub fn stream_request(&self) -> StreamRequest {
        let mut request = StreamRequest::new(self.url.clone()).with_credentials(&self.user_name, &self.password);
        request.compressed = self.compressed;
        request
    }
}
