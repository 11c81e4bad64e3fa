//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/verto/config.toml` by default.
//!
//! `passwd` supports secret references (`pass::…`, `env::…`, see
//! [`crate::secret`]). `login_params` and `user_variables` are TOML tables
//! passed to the server as JSON objects. `[logging]` selects the log output
//! format and filter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Level;

use verto_core::{TracingConfig, TracingOutputFormat};
use verto_protocol::LoginParams;

use crate::error::{ClientError, ClientResult};
use crate::negotiation::{DEFAULT_GATHERING_TIMEOUT, NegotiationOptions};
use crate::session::SessionOptions;
use crate::transport::{ReconnectPolicy, TransportOptions};

/// Configuration for the verto client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode: debug-level logging.
    pub debug: bool,

    /// Log output.
    pub logging: LoggingSettings,

    /// Connection and credentials.
    pub transport: TransportSettings,

    /// Media negotiation.
    pub negotiation: NegotiationSettings,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Compact,
    /// JSON lines, for long-running listeners.
    Json,
}

impl From<LogFormat> for TracingOutputFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
            LogFormat::Json => Self::Json,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Output format; compact with `debug`, pretty otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<LogFormat>,

    /// `EnvFilter` directives replacing the default `verto*=<level>` filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// `[transport]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Server URL (`ws://` or `wss://`).
    pub socket_url: Option<String>,

    /// Login, usually `user@domain`.
    pub login: Option<String>,

    /// Password or secret reference.
    pub passwd: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_params: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_variables: Option<Value>,

    pub reconnect: ReconnectSettings,
}

/// `[transport.reconnect]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 1.0 keeps the delay fixed.
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            multiplier: policy.multiplier,
        }
    }
}

/// `[negotiation]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationSettings {
    pub gathering_timeout_ms: u64,

    /// STUN/TURN server URLs.
    pub ice_servers: Vec<String>,

    pub ice_candidate_pool_size: u8,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT.as_millis() as u64,
            ice_servers: Vec::new(),
            ice_candidate_pool_size: 1,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("verto")
    }

    /// Checks values the server would only reject at runtime.
    pub fn validate(&self) -> ClientResult<()> {
        if let Some(url) = &self.transport.socket_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ClientError::Config(format!(
                    "socket_url must start with ws:// or wss://, got {}",
                    url
                )));
            }
        }

        let reconnect = &self.transport.reconnect;
        if reconnect.initial_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnect initial_delay_ms must be positive".into(),
            ));
        }
        if reconnect.multiplier < 1.0 {
            return Err(ClientError::Config(
                "reconnect multiplier must be at least 1.0".into(),
            ));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(ClientError::Config(
                "reconnect max_delay_ms must not be below initial_delay_ms".into(),
            ));
        }

        if self.negotiation.gathering_timeout_ms == 0 {
            return Err(ClientError::Config(
                "gathering_timeout_ms must be positive".into(),
            ));
        }

        if let Some(filter) = &self.logging.filter {
            verto_core::validate_filter(filter)
                .map_err(|e| ClientError::Config(format!("invalid logging filter: {}", e)))?;
        }

        for key in [&self.transport.login_params, &self.transport.user_variables]
            .into_iter()
            .flatten()
        {
            if !key.is_object() {
                return Err(ClientError::Config(
                    "login_params and user_variables must be tables".into(),
                ));
            }
        }
        Ok(())
    }

    /// Builds login credentials, resolving a secret reference in `passwd`.
    ///
    /// Returns `None` when no login is configured.
    pub fn credentials(&self) -> ClientResult<Option<LoginParams>> {
        let Some(login) = &self.transport.login else {
            return Ok(None);
        };
        let passwd = match &self.transport.passwd {
            Some(raw) => crate::secret::resolve(raw)
                .map_err(|e| ClientError::Config(format!("failed to resolve passwd: {}", e)))?,
            None => String::new(),
        };

        Ok(Some(LoginParams {
            login_params: self.transport.login_params.clone(),
            user_variables: self.transport.user_variables.clone(),
            ..LoginParams::new(login.clone(), passwd)
        }))
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let settings = &self.transport.reconnect;
        ReconnectPolicy::default().with_backoff(
            Duration::from_millis(settings.initial_delay_ms),
            Duration::from_millis(settings.max_delay_ms),
            settings.multiplier,
        )
    }

    pub fn transport_options(&self) -> ClientResult<TransportOptions> {
        let url = self.transport.socket_url.clone().ok_or_else(|| {
            ClientError::Config(format!(
                "no server configured. Add to {}:\n  \
                 [transport]\n  \
                 socket_url = \"wss://pbx.example.com:8082\"\n\n  \
                 Or pass --url",
                Self::default_path().display()
            ))
        })?;

        let mut options = TransportOptions::new(url).with_reconnect(self.reconnect_policy());
        if let Some(credentials) = self.credentials()? {
            options = options.with_credentials(credentials);
        }
        Ok(options)
    }

    pub fn negotiation_options(&self) -> NegotiationOptions {
        NegotiationOptions::default()
            .with_gathering_timeout(Duration::from_millis(self.negotiation.gathering_timeout_ms))
            .with_ice_servers(self.negotiation.ice_servers.clone())
            .with_candidate_pool_size(self.negotiation.ice_candidate_pool_size)
    }

    /// Logging setup: `debug` selects debug level, `[logging]` the format
    /// and filter. JSON output uses the long-running service preset.
    pub fn tracing_config(&self) -> TracingConfig {
        let mut config = match (self.logging.format, self.debug) {
            (Some(LogFormat::Json), _) => TracingConfig::service(),
            (_, true) => TracingConfig::cli_debug(),
            (_, false) => TracingConfig::default().with_level(Level::WARN),
        };
        if self.debug {
            config = config.with_level(Level::DEBUG);
        }
        if let Some(format) = self.logging.format {
            config = config.with_format(format.into());
        }
        if let Some(filter) = &self.logging.filter {
            config = config.with_env_filter(filter.clone());
        }
        config
    }

    pub fn session_options(&self) -> ClientResult<SessionOptions> {
        self.validate()?;
        Ok(SessionOptions::new(self.transport_options()?)
            .with_negotiation(self.negotiation_options()))
    }
}
