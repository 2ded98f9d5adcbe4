//! Agent Turn and Conversation Types
//!
//! Record types for one query/response cycle: the tool calls the agent made,
//! the outcome of the turn, and the conversation history retained across
//! turns. The turn record itself is transient; only the answer text survives
//! into history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// End user.
    User,
    /// The agent.
    Assistant,
}

/// One retained conversation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
    /// When the message was recorded.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped now.
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only record of one tool invocation within a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    /// Tool name as declared in the registry.
    pub tool: String,
    /// Arguments the model supplied.
    pub arguments: serde_json::Value,
    /// Result value on success, error description on failure.
    pub outcome: ToolOutcome,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "value")]
pub enum ToolOutcome {
    /// Handler returned a value.
    Ok(serde_json::Value),
    /// Handler failed; the description is fed back to the model.
    Error(String),
}

impl ToolOutcome {
    /// The JSON observation fed back into the model's context.
    #[must_use]
    pub fn as_observation(&self) -> serde_json::Value {
        match self {
            Self::Ok(value) => value.clone(),
            Self::Error(msg) => serde_json::json!({ "error": msg }),
        }
    }

    /// Whether the invocation succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model produced a final answer within the iteration cap.
    Completed,
    /// The iteration cap was reached; the answer is best-effort.
    Truncated,
    /// The user cancelled the turn.
    Cancelled,
}

/// The finished product of one query/response cycle.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTurn {
    /// Tool calls in execution order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Final answer text (empty when cancelled).
    pub answer: String,
    /// How the turn ended.
    pub outcome: TurnOutcome,
    /// Loop iterations consumed.
    pub iterations: u32,
}
