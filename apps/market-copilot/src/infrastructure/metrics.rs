//! Prometheus Metrics
//!
//! Installs the Prometheus recorder and describes the counters the core
//! increments. Rendered at `/metrics` on the health server port.
//!
//! # Counters
//!
//! - `copilot_quotes_applied_total` / `copilot_quotes_dropped_total`: live
//!   quotes accepted into or rejected from the cache
//! - `copilot_candles_merged_total`: candles merged into series
//! - `copilot_tool_calls_total`: tool invocations
//! - `copilot_llm_requests_total`: completion round trips
//! - `copilot_agent_turns_total` / `copilot_agent_turns_truncated_total`:
//!   agent turns started / truncated at the iteration cap

use std::sync::OnceLock;

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Safe to call more than once; later calls return the existing handle.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");
            register_metrics();
            handle
        })
        .clone()
}

/// Get the handle for rendering metrics, if initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "copilot_quotes_applied_total",
        "Live quotes applied to the cache"
    );
    describe_counter!(
        "copilot_quotes_dropped_total",
        "Out-of-order quotes dropped by the monotonic check"
    );
    describe_counter!(
        "copilot_candles_merged_total",
        "Candles merged into cached series"
    );
    describe_counter!("copilot_tool_calls_total", "Tool invocations by the agent");
    describe_counter!(
        "copilot_llm_requests_total",
        "Completion round trips to the model endpoint"
    );
    describe_counter!("copilot_agent_turns_total", "Agent turns started");
    describe_counter!(
        "copilot_agent_turns_truncated_total",
        "Agent turns truncated at the iteration cap"
    );
}
