//! Action layer: named capabilities the agent (or a `/name` command) can invoke.

mod registry;

pub use registry::{render_output, Action, ActionError, ActionRegistry, ActionSpec};
