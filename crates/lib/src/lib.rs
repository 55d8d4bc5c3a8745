//! Buddy core library: the message dispatch engine that bridges chat transports
//! to a pluggable agent and its actions.

pub mod actions;
pub mod agent;
pub mod config;
pub mod retry;
pub mod runner;
pub mod session;
pub mod transport;

pub use runner::{Runner, RunnerError, RunnerOptions};
