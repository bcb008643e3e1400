//! The driver task.
//!
//! One task owns the connection machine, the session registry and the
//! socket, and handles one input at a time: a caller request, a socket
//! event, the retry timer or the keepalive tick. Callers reach it through
//! [`Request`]s carrying a oneshot reply channel.

use std::collections::{HashMap, VecDeque};
use std::future::pending;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use termlink_core::{Decoded, Inbound, LinkError, LinkResult, MessageCodec, Outbound, SessionId};

use crate::config::TransportConfig;
use crate::connection::{ConnectionMachine, ConnectionState, Effect, MachineInput};
use crate::events::{SessionEvent, TransportEvent};
use crate::registry::{Routed, SessionRegistry};
use crate::session::{SessionInfo, SessionOptions};
use crate::transport::{websocket, LinkEvent, WsSink};

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Request {
    Connect(Reply<LinkResult<()>>),
    Disconnect(Reply<()>),
    State(Reply<ConnectionState>),
    CreateSession(SessionOptions, Reply<LinkResult<SessionId>>),
    CloseSession(SessionId, Reply<LinkResult<()>>),
    Attach(SessionId, Reply<LinkResult<()>>),
    Detach(Reply<Option<SessionId>>),
    Sessions(Reply<Vec<SessionInfo>>),
    /// Send an envelope as-is. Input and commands must target a live session.
    Send(Outbound, Reply<LinkResult<()>>),
    Resize {
        session_id: SessionId,
        cols: u16,
        rows: u16,
        reply: Reply<LinkResult<()>>,
    },
    Ping(Reply<LinkResult<u64>>),
}

struct PendingCreate {
    request_id: String,
    options: SessionOptions,
    reply: Reply<LinkResult<SessionId>>,
}

enum Turn {
    Request(Request),
    Link(LinkEvent),
    RetryElapsed,
    Keepalive,
    Shutdown,
}

pub(crate) struct Driver {
    url: String,
    ping_interval: Option<Duration>,
    machine: ConnectionMachine,
    registry: SessionRegistry,
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<TransportEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    /// Tag of the current socket; bumped whenever a socket is closed.
    generation: u64,
    sink: Option<WsSink>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
    retry_at: Option<Instant>,
    keepalive: Option<Interval>,
    connect_waiters: Vec<Reply<LinkResult<()>>>,
    pending_creates: VecDeque<PendingCreate>,
    pending_closes: HashMap<SessionId, Vec<Reply<LinkResult<()>>>>,
    next_request_id: u64,
    next_ping_id: u64,
}

impl Driver {
    pub(crate) fn new(
        config: &TransportConfig,
        requests: mpsc::UnboundedReceiver<Request>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        Self {
            url: config.url.clone(),
            ping_interval: config.ping_interval(),
            machine: ConnectionMachine::new(
                config.reconnect.backoff(),
                config.reconnect.max_attempts,
            ),
            registry: SessionRegistry::new(config.output_buffer_chunks),
            requests,
            events,
            link_tx,
            link_rx,
            generation: 0,
            sink: None,
            connect_task: None,
            reader_task: None,
            retry_at: None,
            keepalive: None,
            connect_waiters: Vec::new(),
            pending_creates: VecDeque::new(),
            pending_closes: HashMap::new(),
            next_request_id: 0,
            next_ping_id: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let turn = tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => Turn::Request(request),
                    None => Turn::Shutdown,
                },
                Some(event) = self.link_rx.recv() => Turn::Link(event),
                () = sleep_until(self.retry_at) => Turn::RetryElapsed,
                () = next_tick(&mut self.keepalive) => Turn::Keepalive,
            };

            match turn {
                Turn::Request(request) => {
                    self.handle_request(request).await;
                    // Drain whatever queued up meanwhile so bursts of resizes
                    // collapse into one flush below.
                    while let Ok(request) = self.requests.try_recv() {
                        self.handle_request(request).await;
                    }
                }
                Turn::Link(event) => self.handle_link(event),
                Turn::RetryElapsed => {
                    self.retry_at = None;
                    self.apply(MachineInput::RetryElapsed);
                }
                Turn::Keepalive => self.keepalive_ping().await,
                Turn::Shutdown => break,
            }

            self.flush_resizes().await;
        }

        tracing::debug!("transport handle dropped, stopping driver");
        self.apply(MachineInput::Disconnect);
        self.close_socket();
    }

    // ── Connection ─────────────────────────────────────────────────────

    fn apply(&mut self, input: MachineInput) {
        let manual = input == MachineInput::Disconnect;
        let before = self.machine.state();
        for effect in self.machine.step(input) {
            self.execute(effect);
        }
        let after = self.machine.state();
        if before != after {
            tracing::debug!(from = %before, to = %after, "connection state changed");
            self.on_transition(before, after, manual);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenSocket => {
                self.close_socket();
                tracing::debug!(url = %self.url, generation = self.generation, "opening socket");
                self.connect_task = Some(websocket::spawn_connect(
                    self.url.clone(),
                    self.generation,
                    self.link_tx.clone(),
                ));
            }
            Effect::CloseSocket => self.close_socket(),
            Effect::ScheduleRetry(delay) => self.retry_at = Some(Instant::now() + delay),
            Effect::CancelRetry => self.retry_at = None,
            Effect::Emit(event) => self.emit(event),
        }
    }

    fn on_transition(&mut self, before: ConnectionState, after: ConnectionState, manual: bool) {
        match after {
            ConnectionState::Open => {
                tracing::info!(url = %self.url, "connected");
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                self.keepalive = self.ping_interval.map(|period| {
                    let mut interval = time::interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval
                });
            }
            ConnectionState::Closed => {
                self.keepalive = None;
                let err = if manual {
                    tracing::info!(url = %self.url, "disconnected");
                    LinkError::Closed
                } else {
                    let cause = self.machine.last_error().unwrap_or("connection lost");
                    tracing::warn!(url = %self.url, error = %cause, "giving up on connection");
                    LinkError::Transport(cause.to_string())
                };
                for waiter in self.connect_waiters.drain(..) {
                    let _ = waiter.send(Err(err.clone()));
                }
                self.abandon_sessions(err);
            }
            _ if before == ConnectionState::Open => {
                tracing::warn!(url = %self.url, "connection lost");
                self.keepalive = None;
                self.fail_in_flight(LinkError::Transport("connection lost".into()));
            }
            _ => {}
        }
    }

    /// Reject requests still waiting on the host. Sessions are kept.
    fn fail_in_flight(&mut self, err: LinkError) {
        for pending in self.pending_creates.drain(..) {
            let _ = pending.reply.send(Err(err.clone()));
        }
        for (_, waiters) in self.pending_closes.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
    }

    /// The connection is gone for good: forget every session.
    fn abandon_sessions(&mut self, err: LinkError) {
        for pending in self.pending_creates.drain(..) {
            let _ = pending.reply.send(Err(err.clone()));
        }
        // Nothing left to close.
        for (_, waiters) in self.pending_closes.drain() {
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }
        if !self.registry.is_empty() {
            tracing::info!(count = self.registry.len(), "dropping sessions");
        }
        self.registry.clear();
    }

    fn close_socket(&mut self) {
        self.generation += 1;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(sink) = self.sink.take() {
            websocket::close_in_background(sink);
        }
    }

    fn handle_link(&mut self, event: LinkEvent) {
        if event.generation() != self.generation {
            tracing::trace!(generation = event.generation(), "ignoring superseded socket");
            if let LinkEvent::Opened { stream, .. } = event {
                websocket::discard(stream);
            }
            return;
        }

        match event {
            LinkEvent::Opened { generation, stream } => {
                self.connect_task = None;
                let (sink, read) = stream.split();
                self.sink = Some(sink);
                self.reader_task = Some(websocket::spawn_reader(
                    read,
                    generation,
                    self.link_tx.clone(),
                ));
                tracing::debug!(generation, "socket open, waiting for host acknowledgment");
            }
            LinkEvent::Failed { error, .. } => {
                self.connect_task = None;
                tracing::warn!(url = %self.url, error = %error, "connect attempt failed");
                self.apply(MachineInput::SocketFailed { error });
            }
            LinkEvent::Frame { text, .. } => self.handle_frame(&text),
            LinkEvent::Closed { code, reason, .. } => {
                self.reader_task = None;
                tracing::debug!(code, reason = %reason, "socket closed");
                self.apply(MachineInput::SocketClosed { code, reason });
            }
        }
    }

    // ── Inbound ────────────────────────────────────────────────────────

    fn handle_frame(&mut self, text: &str) {
        match MessageCodec::decode(text) {
            Ok(Decoded::Message(msg)) => self.handle_inbound(msg),
            Ok(Decoded::Unknown(msg_type)) => {
                tracing::debug!(msg_type = %msg_type, "dropping unknown message type");
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn handle_inbound(&mut self, msg: Inbound) {
        let msg = match msg {
            Inbound::PtyOutput { session_id, data } => return self.on_output(session_id, data),
            other => other,
        };

        match &msg {
            Inbound::Connected { server_version } => {
                tracing::debug!(
                    server_version = server_version.as_deref().unwrap_or("unknown"),
                    "host acknowledged connection"
                );
                self.apply(MachineInput::Acknowledged);
            }
            Inbound::SessionCreated {
                session_id,
                request_id,
            } => self.on_session_created(session_id, request_id.as_deref()),
            Inbound::SessionClosed {
                session_id,
                exit_code,
                signal,
            } => self.on_session_closed(session_id, *exit_code, signal.clone()),
            Inbound::CommandResult {
                session_id,
                output,
                exit_code,
            } => self.emit(TransportEvent::Session(SessionEvent::CommandResult {
                session_id: session_id.clone(),
                output: output.clone(),
                exit_code: *exit_code,
            })),
            Inbound::Error {
                session_id,
                message,
                code,
            } => {
                tracing::warn!(session_id = ?session_id, code = ?code, "host error: {message}");
                self.emit(TransportEvent::Session(SessionEvent::Error {
                    session_id: session_id.clone(),
                    message: message.clone(),
                }));
            }
            Inbound::Pong { session_id, id } => {
                tracing::trace!(id = ?id, "pong");
                self.emit(TransportEvent::Session(SessionEvent::Pong {
                    session_id: session_id.clone(),
                    id: *id,
                }));
            }
            Inbound::PtyOutput { .. } => {}
        }

        self.emit(TransportEvent::Message(msg));
    }

    fn on_output(&mut self, session_id: SessionId, data: String) {
        match self.registry.route_output(&session_id, data) {
            Routed::Deliver(data) => self.emit(TransportEvent::PtyOutput { session_id, data }),
            Routed::Buffered { evicted: true } => {
                tracing::trace!(session_id = %session_id, "output buffer full, dropped oldest chunk");
            }
            Routed::Buffered { evicted: false } => {}
            Routed::Unknown => {
                tracing::debug!(session_id = %session_id, "output for unknown session dropped");
            }
        }
    }

    fn on_session_created(&mut self, session_id: &SessionId, request_id: Option<&str>) {
        let pending = match request_id {
            Some(rid) => self
                .pending_creates
                .iter()
                .position(|p| p.request_id == rid)
                .and_then(|i| self.pending_creates.remove(i)),
            None => self.pending_creates.pop_front(),
        };
        let options = pending
            .as_ref()
            .map(|p| p.options.clone())
            .unwrap_or_default();

        if !self.registry.insert(session_id.clone(), options) {
            tracing::warn!(session_id = %session_id, "duplicate session_created ignored");
            if let Some(pending) = pending {
                let _ = pending.reply.send(Ok(session_id.clone()));
            }
            return;
        }

        tracing::info!(session_id = %session_id, "session created");
        self.emit(TransportEvent::SessionCreated {
            session_id: session_id.clone(),
        });
        self.emit(TransportEvent::Session(SessionEvent::Created {
            session_id: session_id.clone(),
        }));
        match pending {
            Some(pending) => {
                let _ = pending.reply.send(Ok(session_id.clone()));
            }
            None => tracing::debug!(session_id = %session_id, "session created without a pending request"),
        }
    }

    fn on_session_closed(
        &mut self,
        session_id: &SessionId,
        exit_code: Option<i32>,
        signal: Option<String>,
    ) {
        if let Some(waiters) = self.pending_closes.remove(session_id) {
            self.registry.remove(session_id);
            tracing::info!(session_id = %session_id, "session closed");
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        } else if self.registry.mark_exited(session_id, exit_code, signal.clone()) {
            tracing::info!(session_id = %session_id, exit_code = ?exit_code, signal = ?signal, "remote session exited");
        } else {
            tracing::debug!(session_id = %session_id, "session_closed for unknown or closed session");
            return;
        }
        self.emit(TransportEvent::SessionClosed {
            session_id: session_id.clone(),
            exit_code,
            signal,
        });
    }

    // ── Requests ───────────────────────────────────────────────────────

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Connect(reply) => {
                if self.machine.is_open() {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.connect_waiters.push(reply);
                self.apply(MachineInput::Connect);
            }
            Request::Disconnect(reply) => {
                self.apply(MachineInput::Disconnect);
                let _ = reply.send(());
            }
            Request::State(reply) => {
                let _ = reply.send(self.machine.state());
            }
            Request::CreateSession(options, reply) => {
                self.next_request_id += 1;
                let request_id = format!("req-{}", self.next_request_id);
                let msg = Outbound::SessionCreate {
                    request_id: request_id.clone(),
                    cols: options.cols,
                    rows: options.rows,
                    shell: options.shell.clone(),
                    cwd: options.cwd.clone(),
                    env: options.env.clone(),
                };
                match self.send_envelope(&msg).await {
                    Ok(()) => {
                        tracing::debug!(request_id = %request_id, "session create sent");
                        self.pending_creates.push_back(PendingCreate {
                            request_id,
                            options,
                            reply,
                        });
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Request::CloseSession(session_id, reply) => self.close_session(session_id, reply).await,
            Request::Attach(session_id, reply) => {
                let result = match self.registry.attach(&session_id) {
                    Ok(replay) => {
                        tracing::debug!(session_id = %session_id, replayed = replay.len(), "session attached");
                        for data in replay {
                            self.emit(TransportEvent::PtyOutput {
                                session_id: session_id.clone(),
                                data,
                            });
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::Detach(reply) => {
                let _ = reply.send(self.registry.detach());
            }
            Request::Sessions(reply) => {
                let _ = reply.send(self.registry.infos());
            }
            Request::Send(msg, reply) => {
                let result = match &msg {
                    Outbound::PtyInput { session_id, .. } | Outbound::Command { session_id, .. } => {
                        self.registry.check_writable(session_id)
                    }
                    _ => Ok(()),
                };
                let result = match result {
                    Ok(()) => self.send_envelope(&msg).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::Resize {
                session_id,
                cols,
                rows,
                reply,
            } => {
                let result = if self.machine.is_open() {
                    self.registry.queue_resize(&session_id, cols, rows)
                } else {
                    Err(LinkError::NotConnected)
                };
                let _ = reply.send(result);
            }
            Request::Ping(reply) => {
                let result = self.send_ping().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn close_session(&mut self, session_id: SessionId, reply: Reply<LinkResult<()>>) {
        if let Some(waiters) = self.pending_closes.get_mut(&session_id) {
            waiters.push(reply);
            return;
        }
        match self.registry.is_closed(&session_id) {
            None => {
                let _ = reply.send(Ok(()));
            }
            Some(true) => {
                self.registry.remove(&session_id);
                tracing::debug!(session_id = %session_id, "removed exited session");
                let _ = reply.send(Ok(()));
            }
            Some(false) => {
                let msg = Outbound::SessionClose {
                    session_id: session_id.clone(),
                };
                match self.send_envelope(&msg).await {
                    Ok(()) => {
                        self.pending_closes.insert(session_id, vec![reply]);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
        }
    }

    // ── Outbound ───────────────────────────────────────────────────────

    async fn send_envelope(&mut self, msg: &Outbound) -> LinkResult<()> {
        if !self.machine.is_open() {
            return Err(LinkError::NotConnected);
        }
        let sink = self.sink.as_mut().ok_or(LinkError::NotConnected)?;
        let text = MessageCodec::encode(msg)?;
        tracing::trace!(msg_type = msg.type_name(), "send");
        websocket::send_text(sink, text)
            .await
            .map_err(LinkError::Transport)
    }

    async fn send_ping(&mut self) -> LinkResult<u64> {
        self.next_ping_id += 1;
        let id = self.next_ping_id;
        self.send_envelope(&Outbound::Ping { id: Some(id) }).await?;
        Ok(id)
    }

    async fn keepalive_ping(&mut self) {
        if let Err(e) = self.send_ping().await {
            tracing::debug!(error = %e, "keepalive ping failed");
        }
    }

    async fn flush_resizes(&mut self) {
        if !self.machine.is_open() || !self.registry.has_pending_resizes() {
            return;
        }
        for (session_id, cols, rows) in self.registry.take_resizes() {
            tracing::debug!(session_id = %session_id, cols, rows, "resize");
            let msg = Outbound::SessionResize {
                session_id,
                cols,
                rows,
            };
            if let Err(e) = self.send_envelope(&msg).await {
                tracing::warn!(error = %e, "failed to send resize");
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        tracing::trace!(event = event.name(), "emit");
        let _ = self.events.send(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
