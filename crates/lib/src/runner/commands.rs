//! Built-in slash commands and direct `/action` invocation.

use super::{Limit, LogScope, Runner};
use crate::actions::Action;
use crate::transport::InboundMessage;
use std::sync::Arc;

const BUILTIN_HELP: &[(&str, &str)] = &[
    ("/help", "show this help"),
    ("/status", "show your active session"),
    ("/use <session-id>", "switch your active session"),
    ("/new [prompt]", "start a new session, optionally with its first prompt"),
];

const NO_STORE: &str = "sessions are not available: no session store configured";

/// What the pipeline does with a message after command interception.
pub(super) enum Dispatch {
    /// Fully handled; send this reply and stop.
    Reply(String),
    /// Continue to the agent with this prompt.
    Agent(String),
}

struct Command<'a> {
    name: &'a str,
    rest: &'a str,
}

/// Split `/name rest of line`. `None` if the text is not a command.
fn parse_command(text: &str) -> Option<Command<'_>> {
    let body = text.trim().strip_prefix('/')?;
    let (name, rest) = match body.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (body, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(Command { name, rest })
}

impl Runner {
    /// Intercept built-in commands and `/action` invocations. Unknown commands go to the agent unchanged.
    pub(super) async fn handle_command(
        &self,
        msg: &InboundMessage,
        limit: Limit<'_>,
        scope: &LogScope<'_>,
    ) -> Dispatch {
        let Some(cmd) = parse_command(&msg.text) else {
            return Dispatch::Agent(msg.text.clone());
        };
        match cmd.name.to_ascii_lowercase().as_str() {
            "help" => Dispatch::Reply(self.help_text()),
            "status" => Dispatch::Reply(self.status(&msg.sender, scope).await),
            "use" => Dispatch::Reply(self.use_session(&msg.sender, cmd.rest, scope).await),
            "new" => self.new_session(&msg.sender, cmd.rest, scope).await,
            _ => match self.actions.get(cmd.name) {
                Some(action) => {
                    log::info!("{} direct action /{}", scope, cmd.name);
                    Dispatch::Reply(
                        self.direct_action(action, cmd.rest, &msg.sender, limit, scope)
                            .await,
                    )
                }
                None => Dispatch::Agent(msg.text.clone()),
            },
        }
    }

    fn help_text(&self) -> String {
        let mut lines = vec!["commands:".to_string()];
        lines.extend(
            BUILTIN_HELP
                .iter()
                .map(|(usage, what)| format!("{} - {}", usage, what)),
        );
        if !self.actions.is_empty() {
            lines.push("actions:".to_string());
            lines.extend(self.actions.help_lines());
        }
        lines.join("\n")
    }

    async fn status(&self, sender: &str, scope: &LogScope<'_>) -> String {
        let Some(store) = &self.store else {
            return NO_STORE.to_string();
        };
        match store.active(sender).await {
            Ok(Some(state)) => format!(
                "active session: {}\nupdated: {}",
                state.session_id,
                state.updated_at.to_rfc3339()
            ),
            Ok(None) => "no active session".to_string(),
            Err(e) => {
                log::warn!("{} /status: {}", scope, e);
                format!("failed to read session: {}", e)
            }
        }
    }

    async fn use_session(&self, sender: &str, session_id: &str, scope: &LogScope<'_>) -> String {
        if session_id.is_empty() {
            return "usage: /use <session-id>".to_string();
        }
        let Some(store) = &self.store else {
            return NO_STORE.to_string();
        };
        match store.save_active(sender, session_id).await {
            Ok(()) => format!("now using session {}", session_id),
            Err(e) => {
                log::warn!("{} /use {}: {}", scope, session_id, e);
                format!("failed to switch session: {}", e)
            }
        }
    }

    /// Clear the active session. Trailing text becomes the first prompt of the new session.
    async fn new_session(&self, sender: &str, prompt: &str, scope: &LogScope<'_>) -> Dispatch {
        if let Some(store) = &self.store {
            if let Err(e) = store.clear_active(sender).await {
                log::warn!("{} /new: {}", scope, e);
                return Dispatch::Reply(format!("failed to reset session: {}", e));
            }
        }
        if prompt.is_empty() {
            Dispatch::Reply("started a new session".to_string())
        } else {
            Dispatch::Agent(prompt.to_string())
        }
    }

    /// Run an action straight from the user, bypassing the agent. The rest of the line is the payload.
    async fn direct_action(
        &self,
        action: &Arc<dyn Action>,
        raw_args: &str,
        sender: &str,
        limit: Limit<'_>,
        scope: &LogScope<'_>,
    ) -> String {
        let name = action.name().to_string();
        let args = serde_json::Value::String(raw_args.to_string());
        match self.invoke_action(action, args, sender, limit, scope).await {
            Ok(out) if out.is_empty() => format!("[{}] done", name),
            Ok(out) => format!("[{}]\n{}", name, out),
            Err(e) => format!("[{}] failed: {}", name, e),
        }
    }
}
