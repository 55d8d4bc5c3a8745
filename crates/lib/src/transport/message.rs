//! Messages crossing the transport boundary: inbound to the runner, outbound to a transport.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message from a transport to be dispatched by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Id of the transport that produced the message; replies are routed back through it.
    pub transport_id: String,
    pub sender: String,
    pub text: String,
    #[serde(default)]
    pub thread_id: String,
    /// Transport-specific metadata, passed through to the agent untouched.
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl InboundMessage {
    pub fn new(
        transport_id: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            transport_id: transport_id.into(),
            sender: sender.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    /// Build the reply addressed back to this message's sender on the same transport and thread.
    pub fn reply(&self, text: impl Into<String>) -> OutboundMessage {
        OutboundMessage {
            transport_id: self.transport_id.clone(),
            recipient: self.sender.clone(),
            text: text.into(),
            thread_id: self.thread_id.clone(),
        }
    }
}

/// A reply produced by the runner for delivery by exactly one transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub transport_id: String,
    pub recipient: String,
    pub text: String,
    #[serde(default)]
    pub thread_id: String,
}
