//! Agent contract: turn a prompt into a reply plus optional action requests.
//!
//! The runner treats the agent as opaque. It hands over the prompt, the actions the agent
//! may request, and sender metadata; it gets back reply text and an ordered list of calls.

use crate::actions::ActionSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent generate failed: {0}")]
    Generate(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A prior turn of conversation (role + content).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Input for one agent invocation. Built fresh for every inbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub prompt: String,
    /// Prior turns. The runner does not keep history, so this is always empty today.
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Actions the agent may request, in registration order.
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub sender_meta: HashMap<String, String>,
    /// Sender's active session, when a session store is bound and has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// A request from the agent to run a registered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub reply: String,
    /// Executed by the runner in this order.
    #[serde(default)]
    pub action_calls: Vec<ActionCall>,
    /// Session the agent continued or created; saved as the sender's active session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentResponse {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            reply: text.into(),
            ..Default::default()
        }
    }
}

/// Produces replies. Single-shot: one request in, one response out.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Generate a response. The runner drops this future when the request deadline passes.
    async fn generate(&self, req: AgentRequest) -> Result<AgentResponse, AgentError>;
}
