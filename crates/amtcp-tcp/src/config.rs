//! TCP iface configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use amtcp_transport_traits::{TransportError, TransportResult};

use crate::header::HEADER_SIZE;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "AMTCP";

/// Largest accepted segment size.
///
/// An endpoint does not read into its buffer while a frame is in flight, so
/// two peers sending to each other at once only make progress if each frame
/// fits the kernel socket buffers between them. 64 KiB stays below the
/// default send plus receive buffer of common TCP stacks.
pub const MAX_SEGMENT_SIZE: usize = 64 * 1024;

/// TCP iface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpIfaceConfig {
    /// Segment size for bulk sends, header included.
    pub bulk_size: usize,
    /// Segment size for short sends, header included.
    pub short_size: usize,
    /// Disable Nagle's algorithm on every endpoint socket.
    pub nodelay: bool,
    /// IP time-to-live applied to endpoint sockets.
    pub ttl: Option<u32>,
    /// Readiness events fetched per multiplexer wait.
    pub max_events: usize,
}

impl Default for TcpIfaceConfig {
    fn default() -> Self {
        Self {
            bulk_size: 8192,
            short_size: 256,
            nodelay: true,
            ttl: None,
            max_events: 16,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The loaded values are inconsistent
    #[error(transparent)]
    Invalid(#[from] TransportError),
}

impl TcpIfaceConfig {
    /// Capacity of each endpoint buffer: large enough for either send kind.
    pub fn buffer_capacity(&self) -> usize {
        self.bulk_size.max(self.short_size)
    }

    /// Largest short body, user header included, accepted by `send_short`.
    pub fn max_short(&self) -> usize {
        self.short_size.saturating_sub(HEADER_SIZE)
    }

    /// Largest payload accepted by `send_bulk`.
    pub fn max_bulk(&self) -> usize {
        self.bulk_size.saturating_sub(HEADER_SIZE)
    }

    /// Checks that every segment can hold a header, stays within
    /// [`MAX_SEGMENT_SIZE`] and that polling can progress.
    pub fn validate(&self) -> TransportResult<()> {
        if self.bulk_size <= HEADER_SIZE {
            return Err(TransportError::ConfigurationError(format!(
                "bulk_size ({}) must exceed the {HEADER_SIZE} byte header",
                self.bulk_size
            )));
        }
        if self.short_size <= HEADER_SIZE {
            return Err(TransportError::ConfigurationError(format!(
                "short_size ({}) must exceed the {HEADER_SIZE} byte header",
                self.short_size
            )));
        }
        if self.buffer_capacity() > MAX_SEGMENT_SIZE {
            return Err(TransportError::ConfigurationError(format!(
                "segment size {} exceeds the {MAX_SEGMENT_SIZE} byte limit",
                self.buffer_capacity()
            )));
        }
        if self.max_events == 0 {
            return Err(TransportError::ConfigurationError(
                "max_events must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The file format is auto-detected from the file extension. Environment
    /// variables with the `AMTCP_` prefix override file settings, e.g.
    /// `AMTCP_BULK_SIZE=65536`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file doesn't exist
    /// - The file format is unsupported
    /// - The file contains invalid configuration
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Load configuration from a file with a custom environment prefix
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            // Environment variables override file settings
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Create a configuration builder
    pub fn builder() -> TcpIfaceConfigBuilder {
        TcpIfaceConfigBuilder::new()
    }
}

/// Builder for [`TcpIfaceConfig`]
#[derive(Debug, Clone, Default)]
pub struct TcpIfaceConfigBuilder {
    config: TcpIfaceConfig,
}

impl TcpIfaceConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bulk segment size
    #[must_use]
    pub const fn bulk_size(mut self, size: usize) -> Self {
        self.config.bulk_size = size;
        self
    }

    /// Set the short segment size
    #[must_use]
    pub const fn short_size(mut self, size: usize) -> Self {
        self.config.short_size = size;
        self
    }

    /// Enable or disable `TCP_NODELAY`
    #[must_use]
    pub const fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    /// Set the IP time-to-live
    #[must_use]
    pub const fn ttl(mut self, ttl: u32) -> Self {
        self.config.ttl = Some(ttl);
        self
    }

    /// Set the number of events fetched per wait
    #[must_use]
    pub const fn max_events(mut self, n: usize) -> Self {
        self.config.max_events = n;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> TransportResult<TcpIfaceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
