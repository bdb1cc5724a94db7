//! Connection lifecycle state machine.
//!
//! [`ConnectionManager`] is a handle to a background task (the actor) that
//! owns all connection state. Public operations post commands and return
//! immediately; outcomes reach the caller through its
//! [`ProgressSubscriber`].
//!
//! Every connection attempt is stamped with a generation. Tasks spawned for
//! an attempt (the transport open, the heartbeat) report back with that
//! generation, and the actor ignores reports whose generation is no longer
//! current. Error, close, and heartbeat timeout all funnel into one
//! idempotent failure path, so a single failure schedules at most one
//! reconnect.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use pulse_core::constants::CLOSE_NORMAL;
use pulse_core::{DocumentId, ProgressError, ProgressEvent, RawDocumentId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::dispatcher::{MessageDispatcher, Received};
use crate::endpoint::EndpointResolver;
use crate::heartbeat::{HeartbeatMonitor, Liveness};
use crate::policy::{FailureCause, ReconnectDecision, ReconnectPolicy, StopReason};
use crate::restart::{RestartAccepted, RestartController};
use crate::state::{ConnectionState, ManagerSnapshot};
use crate::subscriber::ProgressSubscriber;
use crate::transport::{
    CloseInfo, Connector, OutboundMessage, TransportEvent, TransportLink, WsConnector,
};

/// Close reason sent when the caller disconnects.
pub const CLIENT_DISCONNECT_REASON: &str = "client disconnect";
/// Close reason sent when a new `connect` replaces the current connection.
pub const SUPERSEDED_REASON: &str = "superseded by new connection";
/// Close reason sent when the manager shuts down.
pub const SHUTDOWN_REASON: &str = "client shutdown";

// ─────────────────────────────────────────────────────────────────────────────
// Public handle
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-owned manager for one progress stream at a time.
///
/// Dropping the manager shuts its background task down and closes any open
/// connection.
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    restart: RestartController,
    resolver: EndpointResolver,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct Shared {
    connected: AtomicBool,
    state: RwLock<ConnectionState>,
}

impl ConnectionManager {
    /// Create a manager using WebSocket transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ProgressError> {
        Self::with_connector(config, Arc::new(WsConnector::default()))
    }

    /// Create a manager with a custom transport.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ProgressError> {
        let resolver = EndpointResolver::new(config.api_base_url.clone());
        let restart = RestartController::new(resolver.clone(), config.request_timeout)?;
        let shared = Arc::new(Shared::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            resolver: resolver.clone(),
            policy: ReconnectPolicy::new(config.backoff.clone(), config.terminal_close_codes.clone()),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval, config.heartbeat_timeout),
            dispatcher: MessageDispatcher::new(config.throttle_window),
            connector,
            shared: Arc::clone(&shared),
            commands: commands_rx,
            signals_tx,
            signals: signals_rx,
            document_id: None,
            subscriber: None,
            manually_disconnected: false,
            attempts: 0,
            generation: 0,
            handle: None,
            reconnect_at: None,
            state: ConnectionState::Idle,
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands: commands_tx,
            shared,
            restart,
            resolver,
            task: Mutex::new(Some(task)),
        })
    }

    /// Subscribe to the progress stream of `document_id`.
    ///
    /// An invalid identifier is reported to `subscriber` immediately and
    /// nothing is opened. Otherwise any existing connection is replaced.
    pub fn connect(
        &self,
        document_id: impl Into<RawDocumentId>,
        subscriber: Arc<dyn ProgressSubscriber>,
    ) {
        match DocumentId::parse(document_id) {
            Ok(document_id) => {
                let command = Command::Connect {
                    document_id,
                    subscriber,
                };
                if self.commands.send(command).is_err() {
                    warn!("connect after shutdown ignored");
                }
            }
            Err(error) => {
                warn!(%error, "refusing to connect");
                subscriber.on_error(&error);
            }
        }
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Ask the backend to restart the job for `document_id`.
    ///
    /// Does not touch the connection; call [`connect`](Self::connect)
    /// afterwards to follow the restarted job.
    pub async fn restart_analysis(
        &self,
        document_id: impl Into<RawDocumentId>,
    ) -> Result<RestartAccepted, ProgressError> {
        let document_id = DocumentId::parse(document_id)?;
        self.restart.restart_analysis(&document_id).await
    }

    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Streaming URL `connect` would open for `document_id`.
    pub fn endpoint_for(&self, document_id: &DocumentId) -> String {
        self.resolver.analysis_url(document_id)
    }

    /// Consistent view of the manager's state, or `None` after shutdown.
    pub async fn snapshot(&self) -> Option<ManagerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    /// Close the connection and stop the background task.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────────────────────────

enum Command {
    Connect {
        document_id: DocumentId,
        subscriber: Arc<dyn ProgressSubscriber>,
    },
    Disconnect,
    Snapshot(oneshot::Sender<ManagerSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Reports from tasks spawned for a connection generation.
enum Signal {
    Opened { generation: u64, link: TransportLink },
    OpenFailed { generation: u64, error: ProgressError },
    HeartbeatExpired { generation: u64 },
}

enum Wake {
    Command(Option<Command>),
    Signal(Signal),
    Inbound(u64, TransportEvent),
    ReconnectDue,
    FlushDue,
}

struct ConnectionHandle {
    generation: u64,
    document_id: DocumentId,
    url: String,
    created_at: Instant,
    phase: Phase,
}

enum Phase {
    Connecting(JoinHandle<()>),
    Open(OpenLink),
}

struct OpenLink {
    outbound: mpsc::Sender<OutboundMessage>,
    inbound: mpsc::Receiver<TransportEvent>,
    liveness: Arc<Liveness>,
    heartbeat: CancellationToken,
}

struct Actor {
    resolver: EndpointResolver,
    policy: ReconnectPolicy,
    heartbeat: HeartbeatMonitor,
    dispatcher: MessageDispatcher,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,

    document_id: Option<DocumentId>,
    subscriber: Option<Arc<dyn ProgressSubscriber>>,
    manually_disconnected: bool,
    attempts: u32,
    generation: u64,
    handle: Option<ConnectionHandle>,
    reconnect_at: Option<Instant>,
    state: ConnectionState,
}

impl Actor {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                Some(signal) = self.signals.recv() => Wake::Signal(signal),
                (generation, event) = next_inbound(&mut self.handle) => {
                    Wake::Inbound(generation, event)
                }
                () = sleep_until(self.reconnect_at) => Wake::ReconnectDue,
                () = sleep_until(self.dispatcher.flush_deadline()) => Wake::FlushDue,
            };

            match wake {
                Wake::Command(Some(Command::Connect {
                    document_id,
                    subscriber,
                })) => self.connect(document_id, subscriber),
                Wake::Command(Some(Command::Disconnect)) => self.disconnect(),
                Wake::Command(Some(Command::Snapshot(reply))) => {
                    let _ = reply.send(self.snapshot());
                }
                Wake::Command(Some(Command::Shutdown(ack))) => {
                    self.teardown(SHUTDOWN_REASON);
                    let _ = ack.send(());
                    break;
                }
                Wake::Command(None) => {
                    self.teardown(SHUTDOWN_REASON);
                    break;
                }
                Wake::Signal(Signal::Opened { generation, link }) => {
                    self.on_opened(generation, link);
                }
                Wake::Signal(Signal::OpenFailed { generation, error }) => {
                    let message = match error {
                        ProgressError::Transport { message, .. } => message,
                        other => other.to_string(),
                    };
                    self.fail_connection(generation, FailureCause::Transport { message });
                }
                Wake::Signal(Signal::HeartbeatExpired { generation }) => {
                    self.fail_connection(generation, FailureCause::HeartbeatTimeout);
                }
                Wake::Inbound(generation, event) => self.on_transport_event(generation, event),
                Wake::ReconnectDue => self.on_reconnect_due(),
                Wake::FlushDue => {
                    if let Some(event) = self.dispatcher.take_due(Instant::now()) {
                        self.deliver(event);
                    }
                }
            }
        }
        debug!("connection manager stopped");
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn connect(&mut self, document_id: DocumentId, subscriber: Arc<dyn ProgressSubscriber>) {
        if self.handle.is_some() || self.reconnect_at.is_some() {
            debug!(document_id = %document_id, "replacing existing connection");
            self.teardown(SUPERSEDED_REASON);
        }
        self.dispatcher.clear();
        self.manually_disconnected = false;
        self.attempts = 0;
        self.document_id = Some(document_id);
        self.subscriber = Some(subscriber);
        self.open();
    }

    fn disconnect(&mut self) {
        self.manually_disconnected = true;
        self.teardown(CLIENT_DISCONNECT_REASON);
        self.dispatcher.clear();
        self.attempts = 0;
        if let Some(document_id) = self.document_id.take() {
            info!(document_id = %document_id, "progress stream disconnected by caller");
        }
        self.subscriber = None;
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            document_id: self.document_id.clone(),
            state: self.state,
            is_connected: self.shared.connected.load(Ordering::SeqCst),
            is_manually_disconnected: self.manually_disconnected,
            reconnect_attempts: self.attempts,
            generation: self.generation,
            active_heartbeats: self.heartbeat.active(),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────────

    fn open(&mut self) {
        let Some(document_id) = self.document_id.clone() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let url = self.resolver.analysis_url(&document_id);
        info!(document_id = %document_id, generation, %url, "opening progress stream");

        let connector = Arc::clone(&self.connector);
        let signals = self.signals_tx.clone();
        let target = url.clone();
        let task = tokio::spawn(async move {
            let signal = match connector.open(&target).await {
                Ok(link) => Signal::Opened { generation, link },
                Err(error) => Signal::OpenFailed { generation, error },
            };
            let _ = signals.send(signal);
        });

        self.handle = Some(ConnectionHandle {
            generation,
            document_id,
            url,
            created_at: Instant::now(),
            phase: Phase::Connecting(task),
        });
        self.set_state(ConnectionState::Connecting);
    }

    fn on_opened(&mut self, generation: u64, link: TransportLink) {
        let Some(handle) = self
            .handle
            .as_mut()
            .filter(|h| h.generation == generation && matches!(h.phase, Phase::Connecting(_)))
        else {
            debug!(generation, "discarding superseded connection");
            let _ = link.outbound.try_send(OutboundMessage::Close {
                code: CLOSE_NORMAL,
                reason: SUPERSEDED_REASON.to_owned(),
            });
            return;
        };

        let liveness = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let signals = self.signals_tx.clone();
        let _ = self.heartbeat.spawn(
            Arc::clone(&liveness),
            link.outbound.clone(),
            cancel.clone(),
            move || {
                let _ = signals.send(Signal::HeartbeatExpired { generation });
            },
        );

        let elapsed_ms = u64::try_from(handle.created_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(document_id = %handle.document_id, generation, elapsed_ms, "progress stream open");
        handle.phase = Phase::Open(OpenLink {
            outbound: link.outbound,
            inbound: link.inbound,
            liveness,
            heartbeat: cancel,
        });

        self.attempts = 0;
        self.shared.connected.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Open);
    }

    fn on_transport_event(&mut self, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => self.on_frame(&text),
            TransportEvent::Error(message) => {
                self.fail_connection(generation, FailureCause::Transport { message });
            }
            TransportEvent::Closed(CloseInfo { code, reason }) => {
                self.fail_connection(generation, FailureCause::Closed { code, reason });
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        if let Some(ConnectionHandle {
            phase: Phase::Open(link),
            ..
        }) = &self.handle
        {
            link.liveness.mark();
        }

        match self.dispatcher.receive(text, Instant::now()) {
            Ok(Received::Buffered) => trace!("progress buffered"),
            Ok(Received::Control(frame)) => debug!(?frame, "control frame"),
            Err(error) => {
                warn!(%error, "dropping undecodable frame");
                self.notify_error(&error);
            }
        }
    }

    /// The single failure path for error, close, failed open and heartbeat
    /// timeout. No-op unless `generation` is the current handle.
    fn fail_connection(&mut self, generation: u64, cause: FailureCause) {
        let Some(handle) = self.handle.take_if(|h| h.generation == generation) else {
            debug!(generation, ?cause, "ignoring failure of superseded connection");
            return;
        };
        let document_id = handle.document_id.clone();
        let url = handle.url.clone();
        stop_handle(handle);
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(event) = self.dispatcher.flush() {
            self.deliver(event);
        }

        if self.manually_disconnected {
            self.set_state(ConnectionState::Idle);
            return;
        }

        match &cause {
            FailureCause::Transport { message } => {
                warn!(document_id = %document_id, generation, %message, "progress stream error");
                self.notify_error(&ProgressError::Transport {
                    url,
                    message: message.clone(),
                });
            }
            FailureCause::HeartbeatTimeout => {
                let timeout_ms =
                    u64::try_from(self.heartbeat.timeout().as_millis()).unwrap_or(u64::MAX);
                warn!(document_id = %document_id, generation, timeout_ms, "heartbeat timed out");
                self.notify_error(&ProgressError::HeartbeatTimeout { timeout_ms });
            }
            FailureCause::Closed { code, reason } => {
                info!(document_id = %document_id, generation, ?code, %reason, "progress stream closed");
                if !code.is_some_and(|code| self.policy.is_terminal_code(code)) {
                    self.notify_error(&ProgressError::Transport {
                        url,
                        message: describe_close(*code, reason),
                    });
                }
            }
        }

        match self.policy.decide(self.attempts, &cause) {
            ReconnectDecision::Retry { attempt, delay } => {
                self.attempts = self.attempts.saturating_add(1);
                self.reconnect_at = Some(Instant::now() + delay);
                info!(
                    document_id = %document_id,
                    attempt = attempt + 1,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "scheduling reconnect"
                );
                self.set_state(ConnectionState::Reconnecting);
            }
            ReconnectDecision::Stop(reason) => {
                if matches!(reason, StopReason::TerminalClose { .. }) {
                    self.attempts = self.policy.max_attempts();
                }
                let error = reason.into_error();
                warn!(document_id = %document_id, %error, "giving up on progress stream");
                self.notify_error(&error);
                self.set_state(ConnectionState::Idle);
            }
        }
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if self.manually_disconnected || self.handle.is_some() {
            return;
        }
        self.open();
    }

    /// Drop the current handle and any scheduled reconnect.
    fn teardown(&mut self, reason: &str) {
        self.reconnect_at = None;
        if let Some(handle) = self.handle.take() {
            self.set_state(ConnectionState::Closing);
            if let Phase::Open(link) = &handle.phase {
                let _ = link.outbound.try_send(OutboundMessage::Close {
                    code: CLOSE_NORMAL,
                    reason: reason.to_owned(),
                });
            }
            debug!(generation = handle.generation, reason, "connection torn down");
            stop_handle(handle);
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Idle);
    }

    // ── Subscriber ──────────────────────────────────────────────────────

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, generation = self.generation, "connection state");
        self.state = state;
        *self.shared.state.write() = state;
        if let Some(subscriber) = &self.subscriber {
            subscriber.on_state_change(state);
        }
    }

    fn deliver(&self, event: ProgressEvent) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.on_progress(event);
        }
    }

    fn notify_error(&self, error: &ProgressError) {
        if let Some(subscriber) = &self.subscriber {
            subscriber.on_error(error);
        }
    }
}

fn describe_close(code: Option<u16>, reason: &str) -> String {
    let mut message = match code {
        Some(code) => format!("connection closed unexpectedly (code {code})"),
        None => "connection closed unexpectedly".to_owned(),
    };
    if !reason.trim().is_empty() {
        message.push_str(": ");
        message.push_str(reason);
    }
    message
}

fn stop_handle(handle: ConnectionHandle) {
    match handle.phase {
        Phase::Connecting(task) => task.abort(),
        Phase::Open(link) => link.heartbeat.cancel(),
    }
}

/// Next event of the open link; pending while there is none.
async fn next_inbound(handle: &mut Option<ConnectionHandle>) -> (u64, TransportEvent) {
    let Some(ConnectionHandle {
        generation,
        phase: Phase::Open(link),
        ..
    }) = handle
    else {
        return std::future::pending().await;
    };
    let event = link.inbound.recv().await.unwrap_or_else(|| {
        TransportEvent::Closed(CloseInfo {
            code: None,
            reason: String::new(),
        })
    });
    (*generation, event)
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pulse_core::backoff::BackoffConfig;
    use pulse_core::ErrorCategory;
    use pulse_core::constants::DEFAULT_TERMINAL_REASON;
    use serde_json::json;

    use crate::subscriber::{ChannelSubscriber, SubscriberEvent};

    // -- Fake transport --

    struct FakeServer {
        url: String,
        to_client: mpsc::Sender<TransportEvent>,
        from_client: mpsc::Receiver<OutboundMessage>,
    }

    impl FakeServer {
        async fn send_json(&self, value: serde_json::Value) {
            let _ = self.to_client.send(TransportEvent::Frame(value.to_string())).await;
        }

        async fn close(&self, code: u16, reason: &str) {
            let _ = self
                .to_client
                .send(TransportEvent::Closed(CloseInfo::new(code, reason)))
                .await;
        }
    }

    struct FakeConnector {
        accept: bool,
        opens: AtomicUsize,
        servers: mpsc::UnboundedSender<FakeServer>,
    }

    impl FakeConnector {
        fn new(accept: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
            let (servers, rx) = mpsc::unbounded_channel();
            let connector = Arc::new(Self {
                accept,
                opens: AtomicUsize::new(0),
                servers,
            });
            (connector, rx)
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(&self, url: &str) -> Result<TransportLink, ProgressError> {
            let _ = self.opens.fetch_add(1, Ordering::SeqCst);
            if !self.accept {
                return Err(ProgressError::Transport {
                    url: url.to_owned(),
                    message: "connection refused".into(),
                });
            }
            let (out_tx, out_rx) = mpsc::channel(64);
            let (in_tx, in_rx) = mpsc::channel(64);
            let _ = self.servers.send(FakeServer {
                url: url.to_owned(),
                to_client: in_tx,
                from_client: out_rx,
            });
            Ok(TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    // -- Helpers --

    fn config() -> ClientConfig {
        ClientConfig::default().with_api_base_url("http://backend.test")
    }

    fn fast_backoff(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            jitter_ms: 0,
        }
    }

    fn subscriber() -> (Arc<ChannelSubscriber>, mpsc::UnboundedReceiver<SubscriberEvent>) {
        let (sub, rx) = ChannelSubscriber::new();
        (Arc::new(sub), rx)
    }

    /// Let spawned tasks run without moving far in (paused) time.
    async fn settle() {
        time::sleep(Duration::from_millis(1)).await;
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SubscriberEvent>) -> Vec<SubscriberEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn errors(events: &[SubscriberEvent]) -> Vec<ProgressError> {
        events
            .iter()
            .filter_map(|e| match e {
                SubscriberEvent::Error(err) => Some(err.clone()),
                _ => None,
            })
            .collect()
    }

    fn progress(events: &[SubscriberEvent]) -> Vec<ProgressEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                SubscriberEvent::Progress(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    // -- Identifier validation --

    #[tokio::test(start_paused = true)]
    async fn invalid_identifiers_never_open() {
        let (connector, _servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();

        manager.connect("", sub.clone());
        manager.connect("   ", sub.clone());
        manager.connect(f64::NAN, sub.clone());
        manager.connect(f64::INFINITY, sub.clone());
        manager.connect(None::<i64>, sub.clone());
        settle().await;

        let errs = errors(&drain(&mut rx));
        assert_eq!(errs.len(), 5);
        assert!(
            errs.iter()
                .all(|e| matches!(e, ProgressError::InvalidIdentifier { .. }))
        );
        assert_eq!(connector.opens(), 0);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    // -- Open --

    #[tokio::test(start_paused = true)]
    async fn open_marks_connected() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();

        manager.connect(42, sub);
        settle().await;

        let server = servers.recv().await.unwrap();
        assert_eq!(server.url, "ws://backend.test/ws/analysis/42");
        assert!(manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(
            drain(&mut rx),
            vec![
                SubscriberEvent::State(ConnectionState::Connecting),
                SubscriberEvent::State(ConnectionState::Open),
            ]
        );

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(snapshot.document_id, Some(DocumentId::parse(42).unwrap()));
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.active_heartbeats, 1);
        assert!(!snapshot.is_manually_disconnected);
    }

    // -- Dispatch --

    #[tokio::test(start_paused = true)]
    async fn burst_is_throttled_to_latest() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();
        let _ = drain(&mut rx);

        for pct in [10, 20, 30, 40, 50, 60] {
            server
                .send_json(json!({"status": "processing", "overall_progress": pct}))
                .await;
        }
        time::sleep(Duration::from_millis(50)).await;
        assert!(progress(&drain(&mut rx)).is_empty());

        time::sleep(Duration::from_millis(100)).await;
        let delivered = progress(&drain(&mut rx));
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].overall_progress, Some(60.0));
    }

    #[tokio::test(start_paused = true)]
    async fn control_frames_are_not_progress() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();

        server
            .send_json(json!({"type": "connection_established", "document_id": 42}))
            .await;
        server
            .send_json(json!({"type": "heartbeat_response", "timestamp": "now"}))
            .await;
        time::sleep(Duration::from_millis(500)).await;

        let events = drain(&mut rx);
        assert!(progress(&events).is_empty());
        assert!(errors(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn decode_error_keeps_connection_open() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();

        let _ = server
            .to_client
            .send(TransportEvent::Frame("{broken".into()))
            .await;
        settle().await;

        let errs = errors(&drain(&mut rx));
        assert_matches!(errs.as_slice(), [ProgressError::MessageDecode { .. }]);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(manager.is_connected());
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_progress_flushed_on_failure() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();
        let _ = drain(&mut rx);

        server
            .send_json(json!({"status": "completed", "overall_progress": 100}))
            .await;
        server.close(1006, "").await;
        settle().await;

        let events = drain(&mut rx);
        assert_matches!(
            events.as_slice(),
            [
                SubscriberEvent::Progress(event),
                SubscriberEvent::Error(ProgressError::Transport { .. }),
                SubscriberEvent::State(ConnectionState::Reconnecting),
            ] if event.is_finished()
        );
    }

    // -- Reconnect --

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_with_backoff() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let first = servers.recv().await.unwrap();

        first.close(1006, "").await;
        settle().await;
        let errs = errors(&drain(&mut rx));
        assert_matches!(errs.as_slice(), [err @ ProgressError::Transport { .. }] if !err.is_terminal());
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert!(!manager.is_connected());
        assert_eq!(manager.snapshot().await.unwrap().reconnect_attempts, 1);

        // first retry lands in [3000, 4000) ms
        time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(connector.opens(), 1);
        time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(connector.opens(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.snapshot().await.unwrap().reconnect_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_terminal_close_reports_transport_error() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();

        server.close(1011, "worker restarted").await;
        settle().await;

        let errs = errors(&drain(&mut rx));
        assert_eq!(
            errs,
            vec![ProgressError::Transport {
                url: "ws://backend.test/ws/analysis/42".into(),
                message: "connection closed unexpectedly (code 1011): worker restarted".into(),
            }]
        );
        assert_eq!(errs[0].category(), ErrorCategory::Transport);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
    }

    // -- describe_close --

    #[test]
    fn close_description_omits_blank_parts() {
        assert_eq!(describe_close(None, ""), "connection closed unexpectedly");
        assert_eq!(
            describe_close(Some(1006), "  "),
            "connection closed unexpectedly (code 1006)"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (connector, _servers) = FakeConnector::new(false);
        let config = ClientConfig {
            backoff: fast_backoff(3),
            ..config()
        };
        let manager = ConnectionManager::with_connector(config, connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.opens(), 4);

        let errs = errors(&drain(&mut rx));
        assert_eq!(errs.len(), 5);
        assert!(
            errs[..4]
                .iter()
                .all(|e| matches!(e, ProgressError::Transport { .. }))
        );
        assert_eq!(errs[4], ProgressError::MaxAttemptsExceeded { attempts: 3 });
        assert!(errs[4].is_terminal());
        assert_eq!(manager.state(), ConnectionState::Idle);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.opens(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn session_expired_close_is_terminal() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(7, sub);
        settle().await;
        let server = servers.recv().await.unwrap();

        server.close(4001, "").await;
        settle().await;

        let errs = errors(&drain(&mut rx));
        assert_eq!(
            errs,
            vec![ProgressError::TerminalClose {
                code: 4001,
                reason: DEFAULT_TERMINAL_REASON.into()
            }]
        );
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(manager.snapshot().await.unwrap().reconnect_attempts, 5);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_reports_once_and_retries_once() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let server = servers.recv().await.unwrap();

        let _ = server
            .to_client
            .send(TransportEvent::Error("connection reset".into()))
            .await;
        server.close(1006, "").await;
        settle().await;

        let errs = errors(&drain(&mut rx));
        assert_matches!(
            errs.as_slice(),
            [ProgressError::Transport { message, .. }] if message == "connection reset"
        );
        assert_eq!(manager.snapshot().await.unwrap().reconnect_attempts, 1);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.opens(), 2);
    }

    // -- Heartbeat --

    #[tokio::test(start_paused = true)]
    async fn heartbeat_timeout_starts_one_reconnect() {
        let (connector, mut servers) = FakeConnector::new(true);
        let config = ClientConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
            backoff: BackoffConfig {
                base_delay_ms: 1000,
                jitter_ms: 0,
                ..BackoffConfig::default()
            },
            ..config()
        };
        let manager = ConnectionManager::with_connector(config, connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let mut first = servers.recv().await.unwrap();

        // probe at 1s, timeout at 4s, retry at 5s
        let probe = first.from_client.recv().await.unwrap();
        assert_matches!(probe, OutboundMessage::Text(text) if text.contains("\"heartbeat\""));

        time::sleep(Duration::from_millis(3500)).await;
        // a close racing the timeout must not schedule a second cycle
        first.close(1006, "").await;
        let errs = errors(&drain(&mut rx));
        assert_eq!(errs, vec![ProgressError::HeartbeatTimeout { timeout_ms: 3000 }]);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(connector.opens(), 2);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert!(errors(&drain(&mut rx)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn answered_heartbeats_keep_connection() {
        let (connector, mut servers) = FakeConnector::new(true);
        let config = ClientConfig {
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(3),
            ..config()
        };
        let manager = ConnectionManager::with_connector(config, connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let mut server = servers.recv().await.unwrap();

        for _ in 0..10 {
            let _ = server.from_client.recv().await.unwrap();
            server
                .send_json(json!({"type": "heartbeat_response", "timestamp": 1}))
                .await;
        }

        assert!(errors(&drain(&mut rx)).is_empty());
        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Open);
    }

    // -- Disconnect / replace --

    #[tokio::test(start_paused = true)]
    async fn manual_disconnect_suppresses_reconnect() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, mut rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let mut server = servers.recv().await.unwrap();

        manager.disconnect();
        settle().await;
        server.close(1006, "").await;
        settle().await;

        assert_eq!(
            server.from_client.recv().await.unwrap(),
            OutboundMessage::Close {
                code: CLOSE_NORMAL,
                reason: CLIENT_DISCONNECT_REASON.into()
            }
        );
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(!manager.is_connected());

        let snapshot = manager.snapshot().await.unwrap();
        assert!(snapshot.is_manually_disconnected);
        assert_eq!(snapshot.document_id, None);
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.active_heartbeats, 0);
        assert!(errors(&drain(&mut rx)).is_empty());

        // idempotent
        manager.disconnect();
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let (connector, _servers) = FakeConnector::new(false);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, _rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        assert_eq!(manager.state(), ConnectionState::Reconnecting);

        manager.disconnect();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.opens(), 1);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_flag_clears_on_next_connect() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, _rx) = subscriber();
        manager.connect(42, sub.clone());
        settle().await;
        manager.disconnect();
        settle().await;

        manager.connect(42, sub);
        settle().await;
        let _ = servers.recv().await.unwrap();
        let second = servers.recv().await.unwrap();
        second.close(1006, "").await;
        settle().await;

        let snapshot = manager.snapshot().await.unwrap();
        assert!(!snapshot.is_manually_disconnected);
        assert_eq!(snapshot.state, ConnectionState::Reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_leaves_one_handle() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector.clone()).unwrap();
        let (sub, _rx) = subscriber();

        manager.connect(42, sub.clone());
        settle().await;
        manager.connect(42, sub);
        settle().await;

        let mut first = servers.recv().await.unwrap();
        let _second = servers.recv().await.unwrap();
        assert_eq!(
            first.from_client.recv().await.unwrap(),
            OutboundMessage::Close {
                code: CLOSE_NORMAL,
                reason: SUPERSEDED_REASON.into()
            }
        );

        // the superseded link closing must be ignored
        first.close(1006, "").await;
        time::sleep(Duration::from_secs(10)).await;

        let snapshot = manager.snapshot().await.unwrap();
        assert_eq!(connector.opens(), 2);
        assert_eq!(snapshot.generation, 2);
        assert_eq!(snapshot.active_heartbeats, 1);
        assert_eq!(snapshot.state, ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_and_stops() {
        let (connector, mut servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let (sub, _rx) = subscriber();
        manager.connect(42, sub);
        settle().await;
        let mut server = servers.recv().await.unwrap();

        manager.shutdown().await;
        assert_eq!(
            server.from_client.recv().await.unwrap(),
            OutboundMessage::Close {
                code: CLOSE_NORMAL,
                reason: SHUTDOWN_REASON.into()
            }
        );
        assert!(!manager.is_connected());
        assert!(manager.snapshot().await.is_none());
    }

    // -- Restart --

    #[tokio::test]
    async fn failed_restart_leaves_connection_alone() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/documents/99/reanalyze"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "not found"})))
            .mount(&backend)
            .await;

        let (connector, _servers) = FakeConnector::new(true);
        let config = ClientConfig::default().with_api_base_url(backend.uri());
        let manager = ConnectionManager::with_connector(config, connector.clone()).unwrap();
        let (sub, _rx) = subscriber();
        manager.connect(99, sub);
        time::sleep(Duration::from_millis(20)).await;
        assert!(manager.is_connected());

        let err = manager.restart_analysis(99).await.unwrap_err();
        assert_matches!(
            err,
            ProgressError::RestartRequestFailed { status: Some(404), ref detail } if detail == "not found"
        );
        assert!(manager.is_connected());
        assert_eq!(connector.opens(), 1);
    }

    #[tokio::test]
    async fn restart_rejects_invalid_identifier() {
        let (connector, _servers) = FakeConnector::new(true);
        let manager = ConnectionManager::with_connector(config(), connector).unwrap();
        let err = manager.restart_analysis("").await.unwrap_err();
        assert_matches!(err, ProgressError::InvalidIdentifier { .. });
    }
}
