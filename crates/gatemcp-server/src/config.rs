//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML/YAML/JSON
//! file, then `GATEMCP__*` environment variables (e.g.
//! `GATEMCP__KEEP_ALIVE_SECS=5`; nested keys use `__`, as in
//! `GATEMCP__AUTH__VALIDATION=issued`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gatemcp_auth::DEFAULT_TOKEN_PREFIX;
use gatemcp_transport_streamable::BindingConfig;
use gatemcp_transport_traits::BindingKind;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GATEMCP";

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Extension is not toml, yaml, yml or json
    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    /// Values parsed but are inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Parse error from the config crate
    #[error("Configuration parse error: {0}")]
    ParseError(#[from] config::ConfigError),
}

/// How bearer tokens are checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Any token with the configured prefix (placeholder)
    #[default]
    Prefix,
    /// Only unexpired tokens issued by this server's `/token` endpoint
    Issued,
}

/// Authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Prefix of issued and accepted tokens
    pub token_prefix: String,
    /// Validation strategy
    pub validation: ValidationMode,
    /// Lifetime of issued tokens, in seconds
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            validation: ValidationMode::Prefix,
            token_ttl_secs: 3600,
        }
    }
}

impl AuthSettings {
    /// Token lifetime.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_address: String,
    /// Bindings to serve
    pub bindings: Vec<BindingKind>,
    /// Paths, keep-alive and limits, as top-level keys
    #[serde(flatten)]
    pub transport: BindingConfig,
    /// Authentication
    pub auth: AuthSettings,
    /// Allowed CORS origins; empty allows any
    pub cors_allowed_origins: Vec<String>,
    /// Name reported in `serverInfo`
    pub server_name: String,
    /// Version reported in `serverInfo`
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3334".to_string(),
            bindings: vec![BindingKind::Multiplexed, BindingKind::EventStream],
            transport: BindingConfig::default(),
            auth: AuthSettings::default(),
            cors_allowed_origins: Vec::new(),
            server_name: "gatemcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, an optional file and `GATEMCP__*` environment overrides.
    ///
    /// The result is not validated so callers can apply their own overrides
    /// first; [`GateServer::new`](crate::GateServer::new) validates.
    ///
    /// # Errors
    ///
    /// Missing or unsupported file, or values that do not parse.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("bindings")
            .with_list_parse_key("cors_allowed_origins")
    }

    fn load_from(path: Option<&Path>, environment: config::Environment) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.to_path_buf()));
            }
            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("toml") => FileFormat::Toml,
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                other => {
                    return Err(ConfigError::UnsupportedFormat(
                        other.unwrap_or_default().to_string(),
                    ));
                }
            };
            builder = builder.add_source(File::from(path).format(format));
        }

        // Environment variables override file settings
        builder = builder.add_source(environment);

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.bindings.is_empty() {
            return Err(ConfigError::Invalid("at least one binding must be enabled".into()));
        }
        for path in [
            &self.transport.event_stream_path,
            &self.transport.multiplexed_path,
        ] {
            if !path.starts_with('/') || path.len() < 2 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint path {path:?} must start with '/' and name a resource"
                )));
            }
        }
        if self.transport.event_stream_path == self.transport.multiplexed_path {
            return Err(ConfigError::Invalid(
                "event-stream and multiplexed paths must differ".into(),
            ));
        }
        if self.auth.token_prefix.is_empty() {
            return Err(ConfigError::Invalid("token prefix must not be empty".into()));
        }
        if self.transport.keep_alive.is_zero() {
            return Err(ConfigError::Invalid("keep_alive must be at least one second".into()));
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_address
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bind_address {:?}: {e}", self.bind_address)))
    }

    /// Whether `kind` is served.
    pub fn serves(&self, kind: BindingKind) -> bool {
        self.bindings.contains(&kind)
    }

    /// Set the listen address.
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    /// Restrict the served bindings.
    pub fn with_bindings(mut self, bindings: Vec<BindingKind>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Replace the transport settings.
    pub fn with_transport(mut self, transport: BindingConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Replace the auth settings.
    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = auth;
        self
    }
}
