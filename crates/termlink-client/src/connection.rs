//! Connection lifecycle as a pure state machine.
//!
//! [`ConnectionMachine::step`] consumes one [`MachineInput`] and returns the
//! [`Effect`]s the driver must carry out: opening or closing the socket,
//! arming or cancelling the retry timer, and emitting events. No I/O or
//! timing happens here, which keeps every transition unit-testable.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ack──▶ Open
//!                      │   ▲              │
//!              failure │   │ retry timer  │ socket lost
//!                      ▼   │              ▼
//!                    Reconnecting ◀───────┘
//!                      │
//!   ceiling reached    ▼        manual disconnect from any state
//!                    Closed ◀────────────────────────────────
//! ```

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::events::TransportEvent;

/// WebSocket close code reported when the link dies without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code used for a caller-requested disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineInput {
    /// Caller asked to connect.
    Connect,
    /// Caller asked to disconnect.
    Disconnect,
    /// The host sent its `connected` acknowledgment.
    Acknowledged,
    /// The socket closed, cleanly or not.
    SocketClosed { code: u16, reason: String },
    /// Opening the socket failed.
    SocketFailed { error: String },
    /// The retry timer fired.
    RetryElapsed,
}

/// Work the driver performs on behalf of the machine, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenSocket,
    CloseSocket,
    ScheduleRetry(Duration),
    CancelRetry,
    Emit(TransportEvent),
}

/// Exponential backoff with downward jitter.
///
/// `delay(n) = min(max, base * 2^(n-1) * (1 - r * jitter))` for a random
/// `r` in `[0, 1)`. With `jitter <= 0.5` a delay is never shorter than the
/// one before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30000),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (1-based), given a random
    /// sample in `[0, 1)`.
    pub fn delay(&self, attempt: u32, sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let raw = self.base.as_secs_f64() * 2f64.powi(exponent);
        let shaved = raw * (1.0 - sample.clamp(0.0, 1.0) * self.jitter.clamp(0.0, 1.0));
        Duration::from_secs_f64(shaved.min(self.max.as_secs_f64()))
    }
}

pub struct ConnectionMachine {
    state: ConnectionState,
    /// Reconnect attempts since the link was last open.
    attempt: u32,
    max_attempts: Option<u32>,
    /// Whether the current logical connection has been open at least once.
    was_open: bool,
    last_error: Option<String>,
    backoff: BackoffPolicy,
    rng: StdRng,
}

impl ConnectionMachine {
    pub fn new(backoff: BackoffPolicy, max_attempts: Option<u32>) -> Self {
        Self::with_rng(backoff, max_attempts, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(backoff: BackoffPolicy, max_attempts: Option<u32>, seed: u64) -> Self {
        Self::with_rng(backoff, max_attempts, StdRng::seed_from_u64(seed))
    }

    fn with_rng(backoff: BackoffPolicy, max_attempts: Option<u32>, rng: StdRng) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            max_attempts,
            was_open: false,
            last_error: None,
            backoff,
            rng,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn step(&mut self, input: MachineInput) -> Vec<Effect> {
        use ConnectionState::*;

        match (self.state, input) {
            (Idle | Closed, MachineInput::Connect) => {
                self.attempt = 0;
                self.was_open = false;
                self.last_error = None;
                self.state = Connecting;
                vec![
                    Effect::Emit(TransportEvent::Connecting { attempt: 0 }),
                    Effect::OpenSocket,
                ]
            }
            // Already connecting, open or waiting to retry.
            (_, MachineInput::Connect) => Vec::new(),

            (Idle | Closed, MachineInput::Disconnect) => Vec::new(),
            (_, MachineInput::Disconnect) => {
                self.state = Closed;
                self.attempt = 0;
                vec![
                    Effect::CancelRetry,
                    Effect::CloseSocket,
                    Effect::Emit(TransportEvent::Disconnected {
                        code: NORMAL_CLOSURE,
                        reason: "client disconnect".into(),
                    }),
                ]
            }

            (Connecting, MachineInput::Acknowledged) => {
                let event = if self.was_open {
                    TransportEvent::Reconnected {
                        attempts: self.attempt,
                    }
                } else {
                    TransportEvent::Connected
                };
                self.state = Open;
                self.attempt = 0;
                self.was_open = true;
                self.last_error = None;
                vec![Effect::Emit(event)]
            }
            (_, MachineInput::Acknowledged) => Vec::new(),

            (Open, MachineInput::SocketClosed { code, reason }) => {
                self.last_error = Some(format!("connection closed ({code}): {reason}"));
                let mut effects = vec![Effect::Emit(TransportEvent::Disconnected { code, reason })];
                effects.extend(self.retry_or_give_up());
                effects
            }
            (Open, MachineInput::SocketFailed { error }) => {
                self.last_error = Some(error.clone());
                let mut effects = vec![Effect::Emit(TransportEvent::Disconnected {
                    code: ABNORMAL_CLOSURE,
                    reason: error,
                })];
                effects.extend(self.retry_or_give_up());
                effects
            }
            (Connecting, MachineInput::SocketClosed { code, reason }) => {
                self.last_error = Some(format!("connection closed ({code}): {reason}"));
                self.retry_or_give_up()
            }
            (Connecting, MachineInput::SocketFailed { error }) => {
                self.last_error = Some(error);
                self.retry_or_give_up()
            }
            // Stale socket notifications.
            (_, MachineInput::SocketClosed { .. } | MachineInput::SocketFailed { .. }) => Vec::new(),

            (Reconnecting, MachineInput::RetryElapsed) => {
                self.state = Connecting;
                vec![
                    Effect::Emit(TransportEvent::Connecting {
                        attempt: self.attempt,
                    }),
                    Effect::OpenSocket,
                ]
            }
            (_, MachineInput::RetryElapsed) => Vec::new(),
        }
    }

    fn retry_or_give_up(&mut self) -> Vec<Effect> {
        let next = self.attempt + 1;
        if self.max_attempts.is_some_and(|max| next > max) {
            self.state = ConnectionState::Closed;
            let cause = self.last_error.as_deref().unwrap_or("connection lost");
            let message = format!("giving up after {} reconnect attempts: {cause}", self.attempt);
            return vec![
                Effect::CloseSocket,
                Effect::Emit(TransportEvent::Error {
                    message,
                    fatal: true,
                }),
            ];
        }

        self.attempt = next;
        self.state = ConnectionState::Reconnecting;
        let delay = self.backoff.delay(next, self.rng.gen());
        vec![
            Effect::CloseSocket,
            Effect::ScheduleRetry(delay),
            Effect::Emit(TransportEvent::Reconnecting {
                attempt: next,
                delay,
            }),
        ]
    }
}
