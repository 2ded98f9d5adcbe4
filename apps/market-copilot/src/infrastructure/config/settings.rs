//! Copilot Configuration Settings
//!
//! Configuration types loaded from environment variables at startup. The
//! core never reads configuration sources anywhere else; everything is
//! injected from here.

use std::time::Duration;

use crate::domain::market::Symbol;

/// Watch list used when `COPILOT_WATCHLIST` is not set.
const DEFAULT_WATCHLIST: &str = "AAPL,MSFT,NVDA,BTC-USD,ETH-USD";

/// Model used when `OPENROUTER_MODEL` is not set.
const DEFAULT_MODEL: &str = "xiaomi/mimo-v2-flash:free";

/// LLM endpoint settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// OpenRouter API key.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Alpaca credentials; absent when the equities adapter is disabled.
#[derive(Clone)]
pub struct AlpacaKeys {
    /// API key id.
    pub key: String,
    /// API secret.
    pub secret: String,
}

impl std::fmt::Debug for AlpacaKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlpacaKeys")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Streaming connection settings shared by every adapter.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence window before a connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
        }
    }
}

/// Agent loop settings.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Maximum plan-act-observe iterations per turn.
    pub max_iterations: u32,
    /// Per-tool-call deadline.
    pub tool_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            tool_timeout: Duration::from_secs(10),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Idle window after which a session is torn down.
    pub idle_expiry: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_expiry: Duration::from_secs(30 * 60),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Session API HTTP port.
    pub http_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete service configuration.
#[derive(Clone)]
pub struct CopilotConfig {
    /// LLM endpoint settings.
    pub llm: LlmSettings,
    /// Alpaca credentials, when configured.
    pub alpaca: Option<AlpacaKeys>,
    /// News API key, when configured.
    pub news_api_key: Option<String>,
    /// Startup watch list.
    pub watchlist: Vec<Symbol>,
    /// Server ports.
    pub server: ServerSettings,
    /// Streaming connection settings.
    pub stream: StreamSettings,
    /// Agent loop settings.
    pub agent: AgentSettings,
    /// Session lifecycle settings.
    pub session: SessionSettings,
    /// Bounded wait for a first tick in quote lookups.
    pub quote_wait: Duration,
}

impl std::fmt::Debug for CopilotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotConfig")
            .field("llm", &self.llm)
            .field("alpaca", &self.alpaca)
            .field("news_api_key", &self.news_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("watchlist", &self.watchlist)
            .field("server", &self.server)
            .field("stream", &self.stream)
            .field("agent", &self.agent)
            .field("session", &self.session)
            .field("quote_wait", &self.quote_wait)
            .finish()
    }
}

impl CopilotConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM credential is missing or the watch list
    /// contains an invalid symbol. A missing vendor credential is not an
    /// error; it disables that adapter.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;
        if api_key.is_empty() {
            return Err(ConfigError::EmptyValue("OPENROUTER_API_KEY".to_string()));
        }

        let model =
            std::env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let alpaca = match (std::env::var("ALPACA_KEY"), std::env::var("ALPACA_SECRET")) {
            (Ok(key), Ok(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some(AlpacaKeys { key, secret })
            }
            _ => None,
        };

        let news_api_key = std::env::var("NEWS_API_KEY").ok().filter(|k| !k.is_empty());

        let watchlist_raw =
            std::env::var("COPILOT_WATCHLIST").unwrap_or_else(|_| DEFAULT_WATCHLIST.to_string());
        let watchlist = parse_watchlist(&watchlist_raw)?;

        let server = ServerSettings {
            http_port: parse_env_u16("COPILOT_HTTP_PORT", ServerSettings::default().http_port),
            health_port: parse_env_u16(
                "COPILOT_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let stream = StreamSettings {
            heartbeat_interval: parse_env_duration_secs(
                "COPILOT_HEARTBEAT_INTERVAL_SECS",
                StreamSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "COPILOT_HEARTBEAT_TIMEOUT_SECS",
                StreamSettings::default().heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "COPILOT_RECONNECT_DELAY_INITIAL_MS",
                StreamSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "COPILOT_RECONNECT_DELAY_MAX_SECS",
                StreamSettings::default().reconnect_delay_max,
            ),
        };

        let agent = AgentSettings {
            max_iterations: parse_env_u32(
                "COPILOT_AGENT_MAX_ITERATIONS",
                AgentSettings::default().max_iterations,
            ),
            tool_timeout: parse_env_duration_secs(
                "COPILOT_TOOL_TIMEOUT_SECS",
                AgentSettings::default().tool_timeout,
            ),
        };

        let session = SessionSettings {
            idle_expiry: parse_env_duration_secs(
                "COPILOT_SESSION_IDLE_EXPIRY_SECS",
                SessionSettings::default().idle_expiry,
            ),
        };

        let quote_wait =
            parse_env_duration_millis("COPILOT_QUOTE_WAIT_MS", Duration::from_secs(2));

        Ok(Self {
            llm: LlmSettings { api_key, model },
            alpaca,
            news_api_key,
            watchlist,
            server,
            stream,
            agent,
            session,
            quote_wait,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Watch list entry failed symbol validation.
    #[error("invalid watch list symbol {0:?}")]
    InvalidSymbol(String),
}

fn parse_watchlist(raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| Symbol::parse(s).map_err(|_| ConfigError::InvalidSymbol(s.to_string())))
        .collect()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
