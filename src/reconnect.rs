use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which channel a tracking operation currently relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Push,
    Pull,
}

/// Lifecycle of the push connection for one job.
///
/// `Idle → Connecting → {Connected, Failed}`, `Connected → Disconnected →
/// Connecting` while retries remain, `→ Exhausted` once they run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Exhausted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "IDLE"),
            Phase::Connecting => write!(f, "CONNECTING"),
            Phase::Connected => write!(f, "CONNECTED"),
            Phase::Disconnected => write!(f, "DISCONNECTED"),
            Phase::Failed => write!(f, "FAILED"),
            Phase::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// Push-path state of one tracking operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub attempted: bool,
    pub connected: bool,
    pub retry_count: u32,
    pub mode: Mode,
    pub phase: Phase,
}

impl ConnectionState {
    pub fn new(pull_only: bool) -> Self {
        Self {
            attempted: false,
            connected: false,
            retry_count: 0,
            mode: if pull_only { Mode::Pull } else { Mode::Push },
            phase: Phase::Idle,
        }
    }
}

/// Bounds on push reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// What the push channel just reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Connected,
    /// Connect failed, or an established connection went away.
    ConnectionLost(String),
    /// The server sent an error event.
    ChannelError(String),
    /// The server sent something unintelligible.
    ProtocolViolation(String),
}

/// Why push was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DowngradeReason {
    RetriesExhausted { attempts: u32, last_error: String },
    ChannelError(String),
    ProtocolViolation(String),
}

impl fmt::Display for DowngradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DowngradeReason::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "push retries exhausted after {attempts} attempts: {last_error}"),
            DowngradeReason::ChannelError(msg) => write!(f, "push channel error: {msg}"),
            DowngradeReason::ProtocolViolation(msg) => write!(f, "push protocol violation: {msg}"),
        }
    }
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Keep reading the current channel.
    Continue,
    /// Close the channel and connect again after the delay.
    Retry(Duration),
    /// Give up on push for the rest of the operation. Emitted once.
    Downgrade(DowngradeReason),
    /// Push was already abandoned; the signal is stale.
    Ignore,
}

/// Applies a [`RetryPolicy`] to the push connection of one job.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconnectionController {
    policy: RetryPolicy,
}

impl ReconnectionController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Mark the start of a connection attempt.
    pub fn begin_attempt(&self, state: &mut ConnectionState) {
        if state.mode == Mode::Pull {
            return;
        }
        state.attempted = true;
        state.connected = false;
        state.phase = Phase::Connecting;
    }

    /// Feed one transport signal into the state machine.
    ///
    /// - `Connected` clears the retry budget.
    /// - `ConnectionLost` retries while `retry_count < max_retries`, then
    ///   exhausts.
    /// - `ChannelError` and `ProtocolViolation` fail immediately.
    ///
    /// Once the mode is `Pull` every signal is ignored.
    pub fn next(&self, state: &mut ConnectionState, signal: TransportSignal) -> Directive {
        if state.mode == Mode::Pull {
            return Directive::Ignore;
        }

        match signal {
            TransportSignal::Connected => {
                state.connected = true;
                state.retry_count = 0;
                state.phase = Phase::Connected;
                Directive::Continue
            }
            TransportSignal::ConnectionLost(error) => {
                state.connected = false;
                if state.retry_count < self.policy.max_retries {
                    state.retry_count += 1;
                    state.phase = Phase::Disconnected;
                    Directive::Retry(self.policy.retry_delay)
                } else {
                    state.phase = Phase::Exhausted;
                    Self::downgrade(
                        state,
                        DowngradeReason::RetriesExhausted {
                            attempts: state.retry_count + 1,
                            last_error: error,
                        },
                    )
                }
            }
            TransportSignal::ChannelError(msg) => {
                state.phase = Phase::Failed;
                Self::downgrade(state, DowngradeReason::ChannelError(msg))
            }
            TransportSignal::ProtocolViolation(msg) => {
                state.phase = Phase::Failed;
                Self::downgrade(state, DowngradeReason::ProtocolViolation(msg))
            }
        }
    }

    fn downgrade(state: &mut ConnectionState, reason: DowngradeReason) -> Directive {
        state.connected = false;
        state.mode = Mode::Pull;
        Directive::Downgrade(reason)
    }
}
