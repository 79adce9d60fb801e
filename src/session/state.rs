//! Pure session state machine
//!
//! Transitions are computed here without side effects; the session applies
//! them atomically to its state channel.

use std::fmt;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, `connect` not yet called
    Unconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake accepted; interruptions do not leave this state
    Connected,
    /// DISCONNECT issued, waiting for the engine to confirm
    Disconnecting,
    /// Closed cleanly; the session is spent
    Disconnected,
    /// Connect or disconnect failed; the session is spent
    Failed,
}

/// Inputs that move the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    ConnectRequested,
    ConnectSucceeded,
    ConnectFailed,
    DisconnectRequested,
    DisconnectConfirmed,
    DisconnectFailed,
    /// The engine's event stream ended while connected
    EngineLost,
}

impl SessionState {
    /// Next state for `transition`, or `None` when it is not allowed here
    pub fn next(self, transition: Transition) -> Option<SessionState> {
        use SessionState::*;
        use Transition::*;

        match (self, transition) {
            (Unconnected, ConnectRequested) => Some(Connecting),
            (Connecting, ConnectSucceeded) => Some(Connected),
            (Connecting, ConnectFailed) => Some(Failed),
            (Connected, DisconnectRequested) => Some(Disconnecting),
            (Connected, EngineLost) => Some(Failed),
            (Disconnecting, DisconnectConfirmed) => Some(Disconnected),
            (Disconnecting, DisconnectFailed) => Some(Failed),
            _ => None,
        }
    }

    /// Publishing is only allowed while connected
    pub fn can_publish(self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// No operation can succeed from here on
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
