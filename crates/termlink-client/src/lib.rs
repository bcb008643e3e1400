//! termlink-client: multiplexed remote PTY sessions over one WebSocket.
//!
//! A [`SessionTransport`] keeps a single connection to a remote execution
//! host, reconnecting with exponential backoff when it drops. Any number of
//! PTY sessions share that connection; one is attached at a time, and output
//! for the rest is buffered until they are attached again. Every command
//! line is screened by a [`termlink_guard::CommandSanitizer`] before it is
//! sent.
//!
//! # Quick Start
//!
//! ```no_run
//! use termlink_client::{InputMode, SessionOptions, SessionTransport, TransportConfig, TransportEvent};
//!
//! # async fn example() -> termlink_core::LinkResult<()> {
//! let (transport, mut events) = SessionTransport::new(TransportConfig::new("wss://host.example/pty"))?;
//! transport.connect().await?;
//!
//! let session = transport.create_session(SessionOptions::default()).await?;
//! transport.attach(&session).await?;
//! transport.send_input(&session, "ls -la\n", InputMode::Sanitized).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::PtyOutput { data, .. } = event {
//!         print!("{data}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
mod driver;
pub mod events;
pub mod registry;
pub mod session;
mod transport;

// Re-export primary public types.
pub use client::{EventStream, InputMode, SessionTransport};
pub use config::{ReconnectConfig, SecurityConfig, TransportConfig};
pub use connection::{BackoffPolicy, ConnectionMachine, ConnectionState, Effect, MachineInput};
pub use events::{SessionEvent, TransportEvent, EVENT_NAMES};
pub use registry::{Routed, SessionRegistry, DEFAULT_OUTPUT_BUFFER_CHUNKS};
pub use session::{SessionInfo, SessionOptions};

// Re-export the shared types callers need alongside the client.
pub use termlink_core::{FsOp, FsPayload, LinkError, LinkResult, SessionId};
pub use termlink_guard::{CommandSanitizer, SanitizeError, SecurityLevel};
