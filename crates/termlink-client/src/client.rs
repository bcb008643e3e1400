//! The public transport handle.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

use termlink_core::{FsOp, FsPayload, LinkError, LinkResult, Outbound, SessionId};
use termlink_guard::{AuditLogEntry, CommandSanitizer};

use crate::config::TransportConfig;
use crate::connection::ConnectionState;
use crate::driver::{Driver, Reply, Request};
use crate::events::TransportEvent;
use crate::session::{SessionInfo, SessionOptions};

/// How [`SessionTransport::send_input`] treats its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    /// Run the text through the command sanitizer first.
    #[default]
    Sanitized,
    /// Send the text verbatim.
    ///
    /// This bypasses every security check. Use it only for keystrokes that
    /// are not commands (control characters, answers to prompts, editor
    /// input), never for text that came from an untrusted source.
    Raw,
}

/// Receiving end of the transport's event channel.
///
/// Events are never dropped; an idle consumer just lets them queue.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for EventStream {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Multiplexed PTY sessions over one WebSocket.
///
/// The handle is cheap to share behind an `Arc`; every method takes `&self`.
/// Dropping the last handle disconnects and stops the background task.
pub struct SessionTransport {
    requests: mpsc::UnboundedSender<Request>,
    sanitizer: Arc<CommandSanitizer>,
    request_timeout: Duration,
}

impl SessionTransport {
    /// Build a transport and its event stream. Nothing connects until
    /// [`connect`](Self::connect) is called.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: TransportConfig) -> LinkResult<(Self, EventStream)> {
        let sanitizer = CommandSanitizer::with_config(config.security.sanitizer_config())
            .map_err(|e| LinkError::Config(e.to_string()))?;
        Self::with_sanitizer(config, Arc::new(sanitizer))
    }

    /// Like [`new`](Self::new), with a caller-built sanitizer (custom rules,
    /// audit callback). `config.security` is ignored.
    pub fn with_sanitizer(
        config: TransportConfig,
        sanitizer: Arc<CommandSanitizer>,
    ) -> LinkResult<(Self, EventStream)> {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(&config, request_rx, event_tx);
        tokio::spawn(driver.run());

        tracing::debug!(url = %config.url, level = %sanitizer.level(), "transport created");

        Ok((
            Self {
                requests: request_tx,
                sanitizer,
                request_timeout: config.request_timeout(),
            },
            EventStream { rx: event_rx },
        ))
    }

    /// Open the connection and wait for the host's acknowledgment.
    ///
    /// Failed attempts are retried with backoff; this resolves with an error
    /// only once the retry ceiling is reached or `disconnect` is called.
    pub async fn connect(&self) -> LinkResult<()> {
        self.call(Request::Connect).await?
    }

    /// Close the connection and forget every session. Safe to call twice.
    pub async fn disconnect(&self) -> LinkResult<()> {
        self.call(Request::Disconnect).await
    }

    pub async fn state(&self) -> LinkResult<ConnectionState> {
        self.call(Request::State).await
    }

    /// Ask the host for a new PTY and wait for its id.
    pub async fn create_session(&self, options: SessionOptions) -> LinkResult<SessionId> {
        self.call_with_timeout(|reply| Request::CreateSession(options, reply))
            .await
    }

    /// Make `session_id` the live session. Its buffered output is emitted as
    /// `PtyOutput` events, oldest first, before any new output.
    pub async fn attach(&self, session_id: &SessionId) -> LinkResult<()> {
        let session_id = session_id.clone();
        self.call(|reply| Request::Attach(session_id, reply)).await?
    }

    /// Stop live delivery. Returns the session that was attached.
    pub async fn detach(&self) -> LinkResult<Option<SessionId>> {
        self.call(Request::Detach).await
    }

    /// Close a session and wait for the host to confirm. Closing a session
    /// that already exited, or one that is unknown, succeeds immediately.
    pub async fn close_session(&self, session_id: &SessionId) -> LinkResult<()> {
        let session_id = session_id.clone();
        self.call_with_timeout(|reply| Request::CloseSession(session_id, reply))
            .await
    }

    pub async fn sessions(&self) -> LinkResult<Vec<SessionInfo>> {
        self.call(Request::Sessions).await
    }

    /// Send keyboard input to a session.
    ///
    /// In [`InputMode::Sanitized`] the text must pass the sanitizer; a single
    /// trailing line ending is kept so the remote shell still runs it.
    pub async fn send_input(
        &self,
        session_id: &SessionId,
        text: &str,
        mode: InputMode,
    ) -> LinkResult<()> {
        let data = match mode {
            InputMode::Sanitized => self.sanitize_line(text)?,
            InputMode::Raw => {
                tracing::warn!(session_id = %session_id, "sending raw input without sanitization");
                text.to_string()
            }
        };
        let msg = Outbound::PtyInput {
            session_id: session_id.clone(),
            data,
        };
        self.call(|reply| Request::Send(msg, reply)).await?
    }

    /// Run a command in a session. Always sanitized.
    pub async fn execute(&self, session_id: &SessionId, command: &str) -> LinkResult<()> {
        let command = self.sanitizer.sanitize(command)?;
        let msg = Outbound::Command {
            session_id: session_id.clone(),
            command,
        };
        self.call(|reply| Request::Send(msg, reply)).await?
    }

    /// Resize a session's terminal. Resizes queued together are coalesced
    /// so only the latest size per session goes on the wire.
    pub async fn resize(&self, session_id: &SessionId, cols: u16, rows: u16) -> LinkResult<()> {
        let session_id = session_id.clone();
        self.call(|reply| Request::Resize {
            session_id,
            cols,
            rows,
            reply,
        })
        .await?
    }

    /// Send a `ping` and return its id. The answer arrives as a
    /// `session:pong` event.
    pub async fn ping(&self) -> LinkResult<u64> {
        self.call(Request::Ping).await?
    }

    /// Proxy a file-system request to the host. The payload is passed
    /// through untouched, but it may not carry envelope keys.
    pub async fn fs_request(&self, op: FsOp, payload: FsPayload) -> LinkResult<()> {
        payload.validate()?;
        let msg = Outbound::fs(op, payload);
        self.call(|reply| Request::Send(msg, reply)).await?
    }

    pub fn sanitizer(&self) -> &CommandSanitizer {
        &self.sanitizer
    }

    pub fn audit_log(&self) -> Vec<AuditLogEntry> {
        self.sanitizer.audit_log()
    }

    pub fn safety_score(&self, command: &str) -> u8 {
        self.sanitizer.safety_score(command)
    }

    fn sanitize_line(&self, text: &str) -> LinkResult<String> {
        let (body, ending) = split_line_ending(text);
        let mut sanitized = self.sanitizer.sanitize(body)?;
        sanitized.push_str(ending);
        Ok(sanitized)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Request) -> LinkResult<T> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)
    }

    async fn call_with_timeout<T>(
        &self,
        make: impl FnOnce(Reply<LinkResult<T>>) -> Request,
    ) -> LinkResult<T> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(make(tx)).map_err(|_| LinkError::Closed)?;
        match time::timeout(self.request_timeout, rx).await {
            Ok(reply) => reply.map_err(|_| LinkError::Closed)?,
            Err(_) => Err(LinkError::Timeout),
        }
    }
}

/// Split off one trailing `\r\n`, `\n` or `\r`.
fn split_line_ending(text: &str) -> (&str, &str) {
    for ending in ["\r\n", "\n", "\r"] {
        if let Some(body) = text.strip_suffix(ending) {
            return (body, ending);
        }
    }
    (text, "")
}
