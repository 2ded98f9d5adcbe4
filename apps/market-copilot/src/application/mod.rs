//! Application layer - The core triad and the ports it depends on.

/// Agent reasoning loop.
pub mod agent;
/// Provider orchestration and the market data cache.
pub mod data_manager;
/// Port traits for providers, news, and the model endpoint.
pub mod ports;
/// Session-keyed state store.
pub mod state;
/// The fixed tool set the agent may invoke.
pub mod tools;
