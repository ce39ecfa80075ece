// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use confab_core::ContextConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token protocol clients must present; unset = open gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Render segment-array messages as display strings in handler accessors
    #[serde(default = "default_message_as_string")]
    pub message_as_string: bool,
    /// How long an outbound API call waits for its echoed response
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,
    /// Timeout applied to conversation waits that don't specify their own
    #[serde(default = "default_wait_secs")]
    pub default_wait_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            access_token: None,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            message_as_string: default_message_as_string(),
            api_timeout_secs: default_api_timeout_secs(),
            default_wait_secs: default_wait_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    20220
}

fn default_message_as_string() -> bool {
    true
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_wait_secs() -> u64 {
    600
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults apply and the environment can
    /// still override them.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            Config::default()
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("CONFAB_HOST") {
            config.server.host = val;
        }
        if let Ok(val) = std::env::var("CONFAB_PORT") {
            config.server.port = val
                .parse()
                .with_context(|| format!("CONFAB_PORT must be a valid port number, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("CONFAB_ACCESS_TOKEN") {
            config.server.access_token = Some(val);
        }
        if let Ok(val) = std::env::var("CONFAB_MESSAGE_AS_STRING") {
            config.protocol.message_as_string = val.parse().with_context(|| {
                format!("CONFAB_MESSAGE_AS_STRING must be true/false, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("CONFAB_API_TIMEOUT_SECS") {
            config.protocol.api_timeout_secs = val.parse().with_context(|| {
                format!(
                    "CONFAB_API_TIMEOUT_SECS must be a number of seconds, got: {}",
                    val
                )
            })?;
        }
        if let Ok(val) = std::env::var("CONFAB_WAIT_SECS") {
            config.protocol.default_wait_secs = val.parse().with_context(|| {
                format!("CONFAB_WAIT_SECS must be a number of seconds, got: {}", val)
            })?;
        }

        // Validate
        if config.server.host.trim().is_empty() {
            anyhow::bail!("server.host must not be empty");
        }
        if config.protocol.api_timeout_secs == 0 {
            anyhow::bail!("protocol.api_timeout_secs must be at least 1");
        }
        if config.protocol.default_wait_secs == 0 {
            anyhow::bail!("protocol.default_wait_secs must be at least 1");
        }
        if let Some(token) = &config.server.access_token {
            if token.trim().is_empty() {
                anyhow::bail!("server.access_token must not be blank when set");
            }
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol.api_timeout_secs)
    }

    /// The tunables the engine's handler surface inherits.
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            default_wait_timeout: Duration::from_secs(self.protocol.default_wait_secs),
            message_as_string: self.protocol.message_as_string,
        }
    }
}
