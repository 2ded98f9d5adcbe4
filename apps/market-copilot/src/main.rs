//! Market Copilot Binary
//!
//! Starts the streaming data manager, the agent, and the HTTP surface.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p market-copilot
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `OPENROUTER_API_KEY`: OpenRouter API key
//!
//! ## Optional
//! - `OPENROUTER_MODEL`: Model identifier
//! - `ALPACA_KEY` / `ALPACA_SECRET`: Alpaca credentials (equities adapter
//!   is disabled without them)
//! - `NEWS_API_KEY`: NewsAPI key (news tool degrades without it)
//! - `COPILOT_WATCHLIST`: Comma-separated startup watch list
//! - `COPILOT_HTTP_PORT`: Session API port (default: 8080)
//! - `COPILOT_HEALTH_PORT`: Health check port (default: 8082)
//! - `OTEL_ENABLED` / `OTEL_EXPORTER_OTLP_ENDPOINT` / `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use market_copilot::application::agent::{AgentConfig, AgentCore};
use market_copilot::application::data_manager::{
    DataManager, DataManagerConfig, EVENT_CHANNEL_CAPACITY,
};
use market_copilot::application::ports::{MarketProvider, NewsSource, ProviderEvent};
use market_copilot::application::state::{StateConfig, StateManager};
use market_copilot::application::tools::ToolRegistry;
use market_copilot::infrastructure::config::CopilotConfig;
use market_copilot::infrastructure::http::{ApiServer, ApiState, HealthServer, HealthServerState};
use market_copilot::infrastructure::llm::{OpenRouterClient, OpenRouterConfig};
use market_copilot::infrastructure::news::{NewsApiConfig, NewsApiSource};
use market_copilot::infrastructure::providers::alpaca::{
    AlpacaConfig, AlpacaCredentials, AlpacaProvider,
};
use market_copilot::infrastructure::providers::binance::{BinanceConfig, BinanceProvider};
use market_copilot::infrastructure::providers::heartbeat::HeartbeatConfig;
use market_copilot::infrastructure::providers::reconnect::BackoffConfig;
use market_copilot::infrastructure::telemetry;
use market_copilot::{Symbol, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Copilot");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = CopilotConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let stream_backoff = BackoffConfig {
        base_delay: config.stream.reconnect_delay_initial,
        max_delay: config.stream.reconnect_delay_max,
        ..BackoffConfig::default()
    };
    let stream_heartbeat = HeartbeatConfig {
        ping_interval: config.stream.heartbeat_interval,
        timeout: config.stream.heartbeat_timeout,
    };

    // Provider event channel: adapters produce, the cache writer consumes.
    let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(EVENT_CHANNEL_CAPACITY);

    // Crypto adapter (public data, always on).
    let binance = Arc::new(BinanceProvider::new(
        BinanceConfig {
            backoff: stream_backoff.clone(),
            heartbeat: stream_heartbeat.clone(),
            ..BinanceConfig::default()
        },
        event_tx.clone(),
        shutdown_token.clone(),
    )?);

    // Equities adapter, only when credentials are configured.
    let alpaca = match &config.alpaca {
        Some(keys) => {
            let mut alpaca_config = AlpacaConfig::iex(AlpacaCredentials::new(
                keys.key.clone(),
                keys.secret.clone(),
            ));
            alpaca_config.backoff = stream_backoff;
            alpaca_config.heartbeat = stream_heartbeat;
            Some(Arc::new(AlpacaProvider::new(
                alpaca_config,
                event_tx.clone(),
                shutdown_token.clone(),
            )?))
        }
        None => {
            tracing::warn!("ALPACA_KEY/ALPACA_SECRET not set, equities adapter disabled");
            None
        }
    };
    drop(event_tx);

    let mut providers: Vec<Arc<dyn MarketProvider>> = vec![Arc::clone(&binance) as _];
    if let Some(alpaca) = &alpaca {
        providers.push(Arc::clone(alpaca) as _);
    }

    let data_manager = Arc::new(DataManager::new(
        DataManagerConfig {
            quote_wait: config.quote_wait,
        },
        providers,
    ));

    // Spawn the single cache writer.
    tokio::spawn(
        Arc::clone(&data_manager).run_writer(event_rx, shutdown_token.clone()),
    );

    // Spawn adapter connection tasks.
    tokio::spawn(Arc::clone(&binance).run());
    if let Some(alpaca) = &alpaca {
        tokio::spawn(Arc::clone(alpaca).run());
    }

    // Subscribe the configured watch list.
    if let Err(error) = data_manager.subscribe(&config.watchlist).await {
        tracing::warn!(error = %error, "Watch list subscription failed");
    }

    // News source, when configured.
    let news: Option<Arc<dyn NewsSource>> = match &config.news_api_key {
        Some(key) => match NewsApiSource::new(NewsApiConfig::new(key.clone())) {
            Ok(source) => Some(Arc::new(source) as _),
            Err(error) => {
                tracing::warn!(error = %error, "News client unavailable");
                None
            }
        },
        None => {
            tracing::info!("NEWS_API_KEY not set, news tool will report not configured");
            None
        }
    };

    // LLM client, tool registry, agent.
    let llm = Arc::new(OpenRouterClient::new(OpenRouterConfig::new(
        config.llm.api_key.clone(),
        config.llm.model.clone(),
    ))?);
    let tools = Arc::new(ToolRegistry::new(Arc::clone(&data_manager), news));
    let agent = Arc::new(AgentCore::new(
        llm,
        tools,
        AgentConfig {
            max_iterations: config.agent.max_iterations,
            tool_timeout: config.agent.tool_timeout,
        },
    ));

    // Session store.
    let sessions = Arc::new(StateManager::new(StateConfig {
        idle_expiry: config.session.idle_expiry,
        default_watchlist: config.watchlist.clone(),
        ..StateConfig::default()
    }));

    // Session API server.
    let api_state = Arc::new(ApiState {
        sessions: Arc::clone(&sessions),
        agent,
        data: Arc::clone(&data_manager),
    });
    let api_server = ApiServer::new(config.server.http_port, api_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "Session API error");
        }
    });

    // Health server.
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&data_manager),
        Arc::clone(&sessions),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Market Copilot ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Market Copilot stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &CopilotConfig) {
    tracing::info!(
        model = %config.llm.model,
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        watchlist = ?config.watchlist.iter().map(Symbol::as_str).collect::<Vec<_>>(),
        equities_adapter = config.alpaca.is_some(),
        news_configured = config.news_api_key.is_some(),
        "Configuration loaded"
    );
}

/// Load .env from the current directory or any ancestor.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
