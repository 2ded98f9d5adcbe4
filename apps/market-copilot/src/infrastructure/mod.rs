//! Infrastructure layer - Adapters and external integrations.

/// Environment-driven configuration.
pub mod config;
/// Session API and health HTTP servers.
pub mod http;
/// OpenRouter LLM client.
pub mod llm;
/// Prometheus metrics recorder.
pub mod metrics;
/// News search adapter.
pub mod news;
/// Market data provider adapters.
pub mod providers;
/// Tracing and OpenTelemetry setup.
pub mod telemetry;
