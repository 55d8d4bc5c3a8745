//! Transports (e.g. Nostr, email, WhatsApp).
//!
//! Transport trait and registry so the runner can start ingestion loops
//! and route replies. Inbound messages are fanned into the runner's single dispatch loop.

mod message;
mod registry;

pub use message::{InboundMessage, OutboundMessage};
pub use registry::{Transport, TransportError, TransportRegistry};
