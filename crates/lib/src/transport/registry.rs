//! Transport trait and registry: lookup transports by id for outbound routing.

use crate::transport::message::{InboundMessage, OutboundMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The lifecycle token fired; treated as a clean shutdown by the runner.
    #[error("transport cancelled")]
    Cancelled,
    #[error("inbound channel closed")]
    InboundClosed,
    #[error("transport connect failed: {0}")]
    Connect(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// A message source and sink (e.g. a Nostr relay, a mailbox, a webhook).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Unique transport id (e.g. "nostr").
    fn id(&self) -> &str;

    /// Run the ingestion loop until `shutdown` fires or a fatal error occurs,
    /// pushing every received message into `inbound`. A full `inbound` blocks the loop.
    async fn start(
        &self,
        shutdown: CancellationToken,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Result<(), TransportError>;

    /// Deliver one message. The runner bounds this call with the request deadline.
    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError>;
}

/// Transports by id, in registration order. Read-only once built.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    ordered: Vec<Arc<dyn Transport>>,
    by_id: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    /// Build the registry. A transport whose id is already taken is dropped with a warning.
    pub fn new(transports: Vec<Arc<dyn Transport>>) -> Self {
        let mut ordered = Vec::with_capacity(transports.len());
        let mut by_id = HashMap::with_capacity(transports.len());
        for t in transports {
            let id = t.id().to_string();
            if by_id.contains_key(&id) {
                log::warn!("transport registry: duplicate transport id {}, ignoring", id);
                continue;
            }
            by_id.insert(id, t.clone());
            ordered.push(t);
        }
        Self { ordered, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Transport>> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Transport>> {
        self.ordered.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.ordered.iter().map(|t| t.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
