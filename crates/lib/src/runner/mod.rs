//! Dispatch engine: fan-in from every transport, one message at a time through
//! command interception, agent, actions, and back out through the originating transport.

mod commands;

use crate::actions::{render_output, Action, ActionRegistry, ActionSpec};
use crate::agent::{Agent, AgentRequest};
use crate::session::{AuditEntry, SessionStore};
use crate::transport::{InboundMessage, Transport, TransportError, TransportRegistry};
use commands::Dispatch;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Capacity of the shared inbound queue. Transports block when it is full.
pub const INBOUND_BUFFER: usize = 128;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// How long `start` waits for transport tasks after the inbound queue has drained.
const TRANSPORT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("transport {id}: {source}")]
    Transport {
        id: String,
        #[source]
        source: TransportError,
    },
    #[error("transport task failed: {0}")]
    TransportTask(String),
}

/// Tunables fixed at construction.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Deadline for the whole pipeline of one message. Zero disables it.
    pub request_timeout: Duration,
    /// Deadline for each action call, never past the request deadline. Zero disables it.
    pub action_timeout: Duration,
    /// When non-empty, messages from anyone else are dropped.
    pub allowed_senders: HashSet<String>,
    /// Replies longer than this many characters are cut. Zero means no cap.
    pub max_reply_chars: usize,
    /// How long in-flight and buffered work may keep running after shutdown fires.
    /// Once it elapses, pending agent, action and send calls are interrupted.
    pub shutdown_grace: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            allowed_senders: HashSet::new(),
            max_reply_chars: 0,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Wires transports, the agent, and actions together.
pub struct Runner {
    transports: TransportRegistry,
    agent: Arc<dyn Agent>,
    actions: ActionRegistry,
    store: Option<Arc<dyn SessionStore>>,
    options: RunnerOptions,
}

impl Runner {
    pub fn new(
        transports: Vec<Arc<dyn Transport>>,
        agent: Arc<dyn Agent>,
        actions: Vec<Arc<dyn Action>>,
    ) -> Self {
        Self {
            transports: TransportRegistry::new(transports),
            agent,
            actions: ActionRegistry::new(actions),
            store: None,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.options.action_timeout = timeout;
        self
    }

    pub fn with_allowed_senders<I, S>(mut self, senders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.allowed_senders = senders.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_reply_chars(mut self, max: usize) -> Self {
        self.options.max_reply_chars = max;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.options.shutdown_grace = grace;
        self
    }

    /// Bind a session store; without one, `/status`, `/use` and `/new` report that sessions are unavailable.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Specs advertised to the agent, in registration order.
    pub fn action_specs(&self) -> &[ActionSpec] {
        self.actions.specs()
    }

    /// Start every transport and process inbound messages until `shutdown` fires.
    ///
    /// On shutdown the inbound queue stops accepting messages, everything already
    /// buffered is still processed, then transport tasks are joined (bounded).
    /// Pipeline work still running when the shutdown grace elapses is interrupted.
    /// Returns the first transport failure, if any; cancellation is a clean exit.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<(), RunnerError> {
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER);
        let mut tasks = JoinSet::new();
        for transport in self.transports.iter() {
            let transport = transport.clone();
            let token = shutdown.clone();
            let tx = inbound_tx.clone();
            tasks.spawn(async move {
                let id = transport.id().to_string();
                let res = transport.start(token, tx).await;
                (id, res)
            });
        }
        log::info!(
            "runner: started {} transport(s): {}",
            self.transports.len(),
            self.transports.ids().join(", ")
        );

        let hard_stop = CancellationToken::new();
        let watchdog = tokio::spawn(stop_after_grace(
            shutdown.clone(),
            hard_stop.clone(),
            self.options.shutdown_grace,
        ));

        let mut first_err = None;
        let mut closing = false;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled(), if !closing => {
                    log::info!("runner: shutdown requested, draining inbound queue");
                    inbound_rx.close();
                    closing = true;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    record_transport_exit(joined, &shutdown, &mut first_err);
                }
                msg = inbound_rx.recv() => match msg {
                    Some(msg) => self.dispatch(msg, &hard_stop).await,
                    None => break,
                },
            }
        }
        // Held until here so the queue only closes on shutdown, even if every transport exits early.
        drop(inbound_tx);

        let join_all = async {
            while let Some(joined) = tasks.join_next().await {
                record_transport_exit(joined, &shutdown, &mut first_err);
            }
        };
        let timed_out = tokio::time::timeout(TRANSPORT_JOIN_TIMEOUT, join_all)
            .await
            .is_err();
        if timed_out {
            log::warn!(
                "runner: transports still running after {:?}, aborting them",
                TRANSPORT_JOIN_TIMEOUT
            );
            tasks.abort_all();
        }
        watchdog.abort();
        log::info!("runner: stopped");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run one message through the pipeline outside the dispatch loop, bounded only by
    /// the configured deadlines. Per-message failures are logged, never returned.
    pub async fn handle_message(&self, msg: InboundMessage) {
        self.dispatch(msg, &CancellationToken::new()).await
    }

    async fn dispatch(&self, msg: InboundMessage, hard_stop: &CancellationToken) {
        let scope = LogScope(&msg);
        if !self.sender_allowed(&msg.sender) {
            log::warn!("{} sender not allowed, dropping message", scope);
            return;
        }
        let limit = Limit::new(hard_stop, self.options.request_timeout);

        let prompt = match self.handle_command(&msg, limit, &scope).await {
            Dispatch::Reply(text) => {
                self.route(&msg, text, limit, &scope).await;
                return;
            }
            Dispatch::Agent(prompt) => prompt,
        };

        let Some(text) = self.run_agent(&msg, prompt, limit, &scope).await else {
            return;
        };
        self.route(&msg, text, limit, &scope).await;
    }

    fn sender_allowed(&self, sender: &str) -> bool {
        self.options.allowed_senders.is_empty() || self.options.allowed_senders.contains(sender)
    }

    /// Call the agent, run its action calls in order, and compose the reply.
    /// `None` when the agent failed; nothing should be sent then.
    async fn run_agent(
        &self,
        msg: &InboundMessage,
        prompt: String,
        limit: Limit<'_>,
        scope: &LogScope<'_>,
    ) -> Option<String> {
        let req = AgentRequest {
            prompt,
            history: Vec::new(),
            actions: self.actions.specs().to_vec(),
            sender_meta: msg.meta.clone(),
            session_id: self.lookup_session(&msg.sender, scope).await,
        };

        let start = Instant::now();
        let resp = match limit.run(self.agent.generate(req)).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                log::error!("{} agent error: {}", scope, e);
                return None;
            }
            Err(cut) => {
                log::error!("{} agent {} after {:?}", scope, cut, start.elapsed());
                return None;
            }
        };
        log::info!("{} agent reply in {:?}", scope, start.elapsed());
        self.remember_session(&msg.sender, resp.session_id.as_deref(), scope)
            .await;

        let mut fragments = Vec::new();
        for call in &resp.action_calls {
            let Some(action) = self.actions.get(&call.name) else {
                log::warn!("{} unknown action {}", scope, call.name);
                continue;
            };
            if let Ok(out) = self
                .invoke_action(action, call.args.clone(), &msg.sender, limit, scope)
                .await
            {
                if !out.is_empty() {
                    fragments.push(format!("[{}]\n{}", call.name, out));
                }
            }
        }
        Some(compose_reply(&resp.reply, &fragments))
    }

    /// Invoke one action under its own deadline (capped by the request deadline) and audit it.
    /// Returns the rendered output, or a description of the failure.
    async fn invoke_action(
        &self,
        action: &Arc<dyn Action>,
        args: serde_json::Value,
        sender: &str,
        request: Limit<'_>,
        scope: &LogScope<'_>,
    ) -> Result<String, String> {
        let name = action.name().to_string();
        let limit = request.nested(self.options.action_timeout);
        let start = Instant::now();
        let res = limit.run(action.invoke(args)).await;
        let elapsed = start.elapsed();

        let (result, outcome) = match res {
            Ok(Ok(value)) => {
                log::info!("{} action {} ok in {:?}", scope, name, elapsed);
                (Ok(render_output(&value)), "ok".to_string())
            }
            Ok(Err(e)) => {
                log::warn!("{} action {} failed: {}", scope, name, e);
                (Err(e.to_string()), format!("error: {}", e))
            }
            Err(cut) => {
                log::warn!("{} action {} {} after {:?}", scope, name, cut, elapsed);
                let outcome = match cut {
                    Interrupted::TimedOut => "timeout",
                    Interrupted::Stopped => "cancelled",
                };
                (Err(format!("{} after {:?}", cut, elapsed)), outcome.to_string())
            }
        };

        if let Some(store) = &self.store {
            let entry = AuditEntry {
                action: name,
                sender: sender.to_string(),
                outcome,
                duration: elapsed,
            };
            if let Err(e) = store.append_audit(entry).await {
                log::warn!("{} audit append failed: {}", scope, e);
            }
        }
        result
    }

    async fn lookup_session(&self, sender: &str, scope: &LogScope<'_>) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.active(sender).await {
            Ok(state) => state.map(|s| s.session_id),
            Err(e) => {
                log::warn!("{} session lookup failed: {}", scope, e);
                None
            }
        }
    }

    async fn remember_session(&self, sender: &str, session_id: Option<&str>, scope: &LogScope<'_>) {
        let (Some(store), Some(id)) = (&self.store, session_id) else {
            return;
        };
        if id.is_empty() {
            return;
        }
        if let Err(e) = store.save_active(sender, id).await {
            log::warn!("{} failed to save session {}: {}", scope, id, e);
        }
    }

    /// Send the reply through the transport the message came from. Failures are logged only.
    async fn route(
        &self,
        msg: &InboundMessage,
        text: String,
        limit: Limit<'_>,
        scope: &LogScope<'_>,
    ) {
        let text = truncate_chars(text, self.options.max_reply_chars);
        let Some(transport) = self.transports.get(&msg.transport_id) else {
            log::error!("{} no transport for outbound", scope);
            return;
        };
        match limit.run(transport.send(msg.reply(text))).await {
            Ok(Ok(())) => log::debug!("{} reply sent", scope),
            Ok(Err(e)) => log::error!("{} send error: {}", scope, e),
            Err(cut) => log::error!("{} send {}", scope, cut),
        }
    }
}

fn record_transport_exit(
    joined: Result<(String, Result<(), TransportError>), JoinError>,
    shutdown: &CancellationToken,
    first_err: &mut Option<RunnerError>,
) {
    let err = match joined {
        Ok((id, Ok(()))) => {
            log::info!("runner: transport {} stopped", id);
            return;
        }
        Ok((id, Err(TransportError::Cancelled))) => {
            log::info!("runner: transport {} cancelled", id);
            return;
        }
        Ok((id, Err(TransportError::InboundClosed))) if shutdown.is_cancelled() => {
            log::info!("runner: transport {} stopped after inbound queue closed", id);
            return;
        }
        Ok((id, Err(source))) => RunnerError::Transport { id, source },
        Err(e) if e.is_cancelled() => return,
        Err(e) => RunnerError::TransportTask(e.to_string()),
    };
    log::error!("runner: {}", err);
    if first_err.is_none() {
        *first_err = Some(err);
    }
}

/// Tags per-message log lines with where the message came from.
struct LogScope<'a>(&'a InboundMessage);

impl fmt::Display for LogScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transport={} sender={} thread={}",
            self.0.transport_id, self.0.sender, self.0.thread_id
        )
    }
}

/// `now + timeout`, never later than `parent`. A zero timeout adds no bound of its own.
fn deadline_after(parent: Option<Instant>, timeout: Duration) -> Option<Instant> {
    let own = if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    };
    match (parent, own) {
        (Some(p), Some(o)) => Some(p.min(o)),
        (p, o) => p.or(o),
    }
}

/// Why a bounded call did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    TimedOut,
    Stopped,
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::TimedOut => f.write_str("timed out"),
            Interrupted::Stopped => f.write_str("interrupted by shutdown"),
        }
    }
}

/// Bound for one pipeline stage: an optional deadline plus the hard-stop token.
#[derive(Clone, Copy)]
struct Limit<'a> {
    deadline: Option<Instant>,
    stop: &'a CancellationToken,
}

impl<'a> Limit<'a> {
    fn new(stop: &'a CancellationToken, timeout: Duration) -> Self {
        Self {
            deadline: deadline_after(None, timeout),
            stop,
        }
    }

    /// Child bound that never outlives this one.
    fn nested(self, timeout: Duration) -> Self {
        Self {
            deadline: deadline_after(self.deadline, timeout),
            stop: self.stop,
        }
    }

    async fn run<F: Future>(self, fut: F) -> Result<F::Output, Interrupted> {
        let bounded = async {
            match self.deadline {
                Some(d) => tokio::time::timeout_at(d, fut)
                    .await
                    .map_err(|_| Interrupted::TimedOut),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            res = bounded => res,
            _ = self.stop.cancelled() => Err(Interrupted::Stopped),
        }
    }
}

/// Fire `hard_stop` once `shutdown` has been cancelled for `grace`.
async fn stop_after_grace(shutdown: CancellationToken, hard_stop: CancellationToken, grace: Duration) {
    shutdown.cancelled().await;
    tokio::time::sleep(grace).await;
    log::warn!("runner: shutdown grace of {:?} elapsed, interrupting in-flight work", grace);
    hard_stop.cancel();
}

fn compose_reply(reply: &str, fragments: &[String]) -> String {
    if fragments.is_empty() {
        return reply.to_string();
    }
    let joined = fragments.join("\n\n");
    if reply.is_empty() {
        joined
    } else {
        format!("{}\n\n{}", reply, joined)
    }
}

fn truncate_chars(mut text: String, max: usize) -> String {
    if max == 0 {
        return text;
    }
    if let Some((idx, _)) = text.char_indices().nth(max) {
        text.truncate(idx);
    }
    text
}
