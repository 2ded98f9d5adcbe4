//! Configuration Loading
//!
//! Environment-driven configuration, read once at startup and injected into
//! every component.

mod settings;

pub use settings::{
    AgentSettings, AlpacaKeys, ConfigError, CopilotConfig, LlmSettings, ServerSettings,
    SessionSettings, StreamSettings,
};
