//! # Configuration Modules
//!
//! The YAML stream configuration and the immutable session derived from it.

/// YAML configuration, validation and the `StreamSession`.
pub mod config_stream;

pub use config_stream::{
    AccountConfig, ConfigError, DatabaseConfig, EndpointVariant, PipelineConfig, ReconnectConfig, StreamConfig,
    StreamSection, StreamSession,
};
