//! Agent Core
//!
//! The plan-act-observe loop that turns a natural-language query into tool
//! invocations and a synthesized answer. Bounded in iterations so a model
//! that keeps requesting tools cannot spin forever.
//!
//! # Loop shape
//!
//! 1. Compose the prompt: system instruction, conversation history, query,
//!    and the declared schema of every registered tool.
//! 2. One completion round trip. A text response ends the turn.
//! 3. Tool-call responses are validated, executed concurrently under a
//!    per-call timeout, and their observations (including errors) are fed
//!    back before the next round.
//! 4. On hitting the iteration cap, one final tools-disabled completion
//!    produces a best-effort answer flagged `Truncated`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use super::ports::{
    CompletionOutcome, LlmClient, LlmMessage, LlmUnavailable, ToolCallRequest, ToolSpec,
};
use super::tools::{ToolError, ToolRegistry};
use crate::domain::session::{
    AgentTurn, ChatMessage, ChatRole, ToolCallRecord, ToolOutcome, TurnOutcome,
};

/// Instruction framing the model as a market analyst.
///
/// Condensed from the production prompt; the tool schemas carry the
/// operational detail.
const SYSTEM_PROMPT: &str = "\
You are a senior quantitative equity strategist providing institutional-grade \
market intelligence. Synthesize raw data into precise, risk-adjusted analysis.

Rules:
- Be precise: cite actual prices, percentages, and timestamps from tool \
observations, never vague directions.
- Use the available tools to ground every factual claim; do not invent \
market data.
- For bullish theses, state the invalidation point; quantify uncertainty \
with probabilistic language.
- Distinguish trailing data from forward-looking estimates.
- You provide informational analysis, not personalized financial advice, \
and should say so when giving actionable levels.";

// =============================================================================
// Configuration
// =============================================================================

/// Tunables for the reasoning loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum plan-act-observe iterations per turn.
    pub max_iterations: u32,
    /// Deadline for each individual tool call.
    pub tool_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            tool_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Terminal failure of a turn.
///
/// Everything else (tool errors, timeouts, bad arguments) is recovered into
/// the model's context and the loop continues.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// The model endpoint failed; the turn cannot proceed.
    #[error(transparent)]
    Llm(#[from] LlmUnavailable),
}

// =============================================================================
// Agent Core
// =============================================================================

/// Drives one turn at a time against the LLM and the tool registry.
pub struct AgentCore {
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl AgentCore {
    /// Create an agent over the given model client and tool registry.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            llm,
            tools,
            config,
        }
    }

    /// Answer a query, given the session's retained conversation history.
    ///
    /// Cancellation aborts any in-flight tool calls and the in-flight model
    /// request; the returned turn carries the `Cancelled` outcome and is not
    /// retried.
    ///
    /// # Errors
    ///
    /// Only [`AgentError::Llm`] is terminal, and only before any truncation
    /// fallback applies.
    pub async fn answer(
        &self,
        history: &[ChatMessage],
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentTurn, AgentError> {
        metrics::counter!("copilot_agent_turns_total").increment(1);

        let specs = ToolRegistry::specs();
        let mut messages = compose_prompt(history, query);
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Ok(cancelled_turn(records, iteration));
                }
                result = self.complete(&messages, &specs) => result?,
            };

            match outcome {
                CompletionOutcome::Text(answer) => {
                    return Ok(AgentTurn {
                        tool_calls: records,
                        answer,
                        outcome: TurnOutcome::Completed,
                        iterations: iteration,
                    });
                }
                CompletionOutcome::ToolCalls(calls) => {
                    tracing::debug!(
                        iteration,
                        count = calls.len(),
                        tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                        "Executing tool calls"
                    );

                    messages.push(LlmMessage::assistant_tool_calls(calls.clone()));

                    let outcomes = tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            return Ok(cancelled_turn(records, iteration));
                        }
                        outcomes = self.run_tool_calls(&calls) => outcomes,
                    };

                    for (call, outcome) in calls.into_iter().zip(outcomes) {
                        messages.push(LlmMessage::tool_result(
                            call.id.clone(),
                            &outcome.as_observation(),
                        ));
                        records.push(ToolCallRecord {
                            tool: call.name,
                            arguments: call.arguments,
                            outcome,
                        });
                    }
                }
            }
        }

        // Iteration cap reached: synthesize from what was gathered.
        self.truncated_turn(messages, records, cancel).await
    }

    /// Execute every call of one iteration concurrently.
    ///
    /// Calls are independent by contract, so no relative ordering is
    /// guaranteed; outcomes are returned in request order.
    async fn run_tool_calls(&self, calls: &[ToolCallRequest]) -> Vec<ToolOutcome> {
        join_all(calls.iter().map(|call| self.run_tool_call(call))).await
    }

    /// Validate and execute one call, mapping every failure mode into an
    /// observation the model can react to.
    async fn run_tool_call(&self, call: &ToolCallRequest) -> ToolOutcome {
        // Schema validation failures never cost an extra model round; they
        // are recorded and fed back with the other observations.
        let invocation = match ToolRegistry::validate(&call.name, &call.arguments) {
            Ok(invocation) => invocation,
            Err(error) => {
                tracing::warn!(tool = %call.name, error = %error, "Tool call rejected");
                return ToolOutcome::Error(error.to_string());
            }
        };

        match tokio::time::timeout(self.config.tool_timeout, self.tools.execute(invocation)).await
        {
            Ok(Ok(value)) => ToolOutcome::Ok(value),
            Ok(Err(error)) => {
                tracing::warn!(tool = %call.name, error = %error, "Tool call failed");
                ToolOutcome::Error(error.to_string())
            }
            Err(_) => {
                tracing::warn!(
                    tool = %call.name,
                    timeout_ms = self.config.tool_timeout.as_millis(),
                    "Tool call timed out"
                );
                ToolOutcome::Error(ToolError::Timeout.to_string())
            }
        }
    }

    /// Best-effort synthesis after the iteration cap.
    async fn truncated_turn(
        &self,
        mut messages: Vec<LlmMessage>,
        records: Vec<ToolCallRecord>,
        cancel: &CancellationToken,
    ) -> Result<AgentTurn, AgentError> {
        metrics::counter!("copilot_agent_turns_truncated_total").increment(1);
        messages.push(LlmMessage::user(
            "Stop calling tools. Give your best answer now using only the \
             observations above.",
        ));

        let iterations = self.config.max_iterations;

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(cancelled_turn(records, iterations));
            }
            result = self.complete(&messages, &[]) => result,
        };

        let answer = match result {
            Ok(CompletionOutcome::Text(text)) => text,
            // The endpoint failed or ignored the instruction; fall back to a
            // plain summary of what the tools produced.
            Ok(CompletionOutcome::ToolCalls(_)) | Err(_) => summarize_records(&records),
        };

        Ok(AgentTurn {
            tool_calls: records,
            answer,
            outcome: TurnOutcome::Truncated,
            iterations,
        })
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        specs: &[ToolSpec],
    ) -> Result<CompletionOutcome, LlmUnavailable> {
        metrics::counter!("copilot_llm_requests_total").increment(1);
        self.llm.complete(messages, specs).await
    }
}

/// System prompt, retained history, and the new query.
fn compose_prompt(history: &[ChatMessage], query: &str) -> Vec<LlmMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(LlmMessage::system(SYSTEM_PROMPT));
    for entry in history {
        messages.push(match entry.role {
            ChatRole::User => LlmMessage::user(&entry.content),
            ChatRole::Assistant => LlmMessage::assistant(&entry.content),
        });
    }
    messages.push(LlmMessage::user(query));
    messages
}

fn cancelled_turn(records: Vec<ToolCallRecord>, iterations: u32) -> AgentTurn {
    AgentTurn {
        tool_calls: records,
        answer: String::new(),
        outcome: TurnOutcome::Cancelled,
        iterations,
    }
}

/// Plain-text fallback when even the truncation completion fails.
fn summarize_records(records: &[ToolCallRecord]) -> String {
    let successes: Vec<String> = records
        .iter()
        .filter(|r| r.outcome.is_ok())
        .map(|r| format!("{}: {}", r.tool, r.outcome.as_observation()))
        .collect();

    if successes.is_empty() {
        "I could not complete the analysis: no tool produced usable data \
         within the allowed steps."
            .to_string()
    } else {
        format!(
            "I could not finish a full analysis within the allowed steps. \
             Data gathered so far:\n{}",
            successes.join("\n")
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
