//! Action registry: actions by name, in registration order, with the specs advertised to the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Failed(String),
}

/// What the agent is told about an action: its name and capability tags (e.g. "shell:exec").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A named side-effecting capability (shell execution, file read/write, ...).
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> Vec<String>;
    /// One-line usage shown by `/help` (e.g. "/shell <cmd> - run a command").
    fn help(&self) -> String;
    /// Run the action. The runner drops this future when the action deadline passes.
    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ActionError>;
}

/// Actions by name. Read-only once built.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    ordered: Vec<Arc<dyn Action>>,
    by_name: HashMap<String, Arc<dyn Action>>,
    specs: Vec<ActionSpec>,
}

impl ActionRegistry {
    /// Build the registry. An action whose name is already taken is dropped with a warning.
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        let mut ordered = Vec::with_capacity(actions.len());
        let mut by_name = HashMap::with_capacity(actions.len());
        let mut specs = Vec::with_capacity(actions.len());
        for a in actions {
            let name = a.name().to_string();
            if by_name.contains_key(&name) {
                log::warn!("action registry: duplicate action {}, ignoring", name);
                continue;
            }
            specs.push(ActionSpec {
                name: name.clone(),
                capabilities: a.capabilities(),
            });
            by_name.insert(name, a.clone());
            ordered.push(a);
        }
        Self {
            ordered,
            by_name,
            specs,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Action>> {
        self.by_name.get(name)
    }

    pub fn specs(&self) -> &[ActionSpec] {
        &self.specs
    }

    /// Help lines in registration order.
    pub fn help_lines(&self) -> Vec<String> {
        self.ordered.iter().map(|a| a.help()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Render an action result as reply text: strings verbatim, null as empty, anything else as JSON.
pub fn render_output(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
