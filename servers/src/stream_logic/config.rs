use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

/// Where normalized records are written.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    /// The `database` section's PostgreSQL table.
    Postgres,
    /// One JSON line per record on stdout.
    Stdout,
}

#[derive(Parser, Debug, Clone, Default)]
#[clap(about = "Firehose stream consumer", version)]
pub struct Config {
    #[clap(short = 'c', long, env = "STREAM_CONFIG_PATH", help = "Path to the YAML stream configuration.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STREAM_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, value_enum, env = "STREAM_SINK", help = "Record sink. Defaults to postgres when a database section is configured, stdout otherwise.")]
    pub sink: Option<SinkKind>,

    #[clap(long, env = "STREAM_URL", help = "Endpoint URL, overriding the one in the config file.")]
    pub stream_url: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            sink: other.sink.or(self.sink),
            stream_url: other.stream_url.or(self.stream_url),
        }
    }

    pub fn config_path(&self) -> &Path {
        self.config_path.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG_PATH))
    }

    pub fn log_dir(&self) -> &Path {
        self.log_dir.as_deref().unwrap_or(Path::new(DEFAULT_LOG_DIR))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)
    }

    /// The sink to use, given whether a database section exists.
    pub fn sink_kind(&self, has_database: bool) -> SinkKind {
        self.sink
            .unwrap_or(if has_database { SinkKind::Postgres } else { SinkKind::Stdout })
    }
}

const DEFAULT_CONFIG_PATH: &str = "./config_private.yaml";
const DEFAULT_LOG_DIR: &str = "./logs";
const DEFAULT_LOG_LEVEL: &str = "info";

fn defaults() -> Config {
    Config {
        config_path: Some(PathBuf::from(DEFAULT_CONFIG_PATH)),
        log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
        log_level: Some(DEFAULT_LOG_LEVEL.to_string()),
        ..Default::default()
    }
}

/// Defaults, overridden by environment variables and CLI arguments.
pub fn load_config() -> Config {
    defaults().merge(Config::parse())
}
