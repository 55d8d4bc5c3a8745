//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use buddy::actions::{Action, ActionError};
use buddy::agent::{Agent, AgentError, AgentRequest, AgentResponse};
use buddy::transport::{InboundMessage, OutboundMessage, Transport, TransportError};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Channel-backed transport: tests push inbound messages and read replies.
pub struct MockTransport {
    id: String,
    inbound: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

/// Test side of a [`MockTransport`].
pub struct MockHandle {
    pub inbound: mpsc::Sender<InboundMessage>,
    pub outbound: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl MockTransport {
    pub fn new(id: &str) -> (Arc<Self>, MockHandle) {
        let (in_tx, in_rx) = mpsc::channel(32);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            id: id.to_string(),
            inbound: Mutex::new(Some(in_rx)),
            outbound: out_tx,
        });
        let handle = MockHandle {
            inbound: in_tx,
            outbound: out_rx,
        };
        (transport, handle)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        sink: mpsc::Sender<InboundMessage>,
    ) -> Result<(), TransportError> {
        let mut rx = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Connect("already started".to_string()))?;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Err(TransportError::Cancelled),
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        if sink.send(msg).await.is_err() {
                            return Err(TransportError::InboundClosed);
                        }
                    }
                    None => return Ok(()),
                },
            }
        }
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        self.outbound
            .send(msg)
            .map_err(|e| TransportError::Delivery(e.to_string()))
    }
}

/// Pushes a fixed batch straight into the runner's queue, reports when done, then idles until shutdown.
pub struct BurstTransport {
    id: String,
    batch: Vec<InboundMessage>,
    pushed: Mutex<Option<oneshot::Sender<()>>>,
    pub sent: Mutex<Vec<OutboundMessage>>,
}

impl BurstTransport {
    pub fn new(id: &str, texts: &[String]) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let batch = texts
            .iter()
            .map(|t| InboundMessage::new(id, "alice", t.clone()))
            .collect();
        let transport = Arc::new(Self {
            id: id.to_string(),
            batch,
            pushed: Mutex::new(Some(tx)),
            sent: Mutex::new(Vec::new()),
        });
        (transport, rx)
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for BurstTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start(
        &self,
        shutdown: CancellationToken,
        sink: mpsc::Sender<InboundMessage>,
    ) -> Result<(), TransportError> {
        for msg in self.batch.iter().cloned() {
            sink.send(msg)
                .await
                .map_err(|_| TransportError::InboundClosed)?;
        }
        if let Some(tx) = self.pushed.lock().unwrap().take() {
            let _ = tx.send(());
        }
        shutdown.cancelled().await;
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Fails to connect immediately.
pub struct DeadTransport(pub &'static str);

#[async_trait]
impl Transport for DeadTransport {
    fn id(&self) -> &str {
        self.0
    }

    async fn start(
        &self,
        _shutdown: CancellationToken,
        _sink: mpsc::Sender<InboundMessage>,
    ) -> Result<(), TransportError> {
        Err(TransportError::Connect("relay refused connection".to_string()))
    }

    async fn send(&self, _msg: OutboundMessage) -> Result<(), TransportError> {
        Err(TransportError::Delivery("not connected".to_string()))
    }
}

/// Replies with the prompt. Prompts containing "fail" fail.
#[derive(Default)]
pub struct EchoAgent {
    pub delay: Duration,
}

#[async_trait]
impl Agent for EchoAgent {
    async fn generate(&self, req: AgentRequest) -> Result<AgentResponse, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if req.prompt.contains("fail") {
            return Err(AgentError::Generate(format!("refused: {}", req.prompt)));
        }
        Ok(AgentResponse::reply(req.prompt))
    }
}

/// Always returns the same response.
pub struct ScriptedAgent(pub AgentResponse);

#[async_trait]
impl Agent for ScriptedAgent {
    async fn generate(&self, _req: AgentRequest) -> Result<AgentResponse, AgentError> {
        Ok(self.0.clone())
    }
}

/// Stands in for a shell action: `{"command": "echo hi"}` or a bare string yields the text after "echo ".
pub struct FakeShell;

#[async_trait]
impl Action for FakeShell {
    fn name(&self) -> &str {
        "shell"
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["shell:exec".to_string()]
    }

    fn help(&self) -> String {
        "/shell <cmd> - run a shell command".to_string()
    }

    async fn invoke(&self, args: Value) -> Result<Value, ActionError> {
        let command = match &args {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("command")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ActionError::InvalidArgs("missing command".to_string()))?,
            _ => return Err(ActionError::InvalidArgs("expected string or object".to_string())),
        };
        match command.strip_prefix("echo ") {
            Some(rest) => Ok(Value::String(format!("{}\n", rest))),
            None => Err(ActionError::Failed(format!("command not allowed: {}", command))),
        }
    }
}
