//! Error types for session operations
//!
//! Each operation has its own error enum so callers can match on exactly what
//! that operation can produce. [`SessionError`] covers the immediate failures
//! raised before a completion signal is handed out.

use crate::config::ConfigError;
use crate::session::SessionState;
use crate::transport::{ConnectReturnCode, EngineFailure, FailureKind};
use std::time::Duration;
use thiserror::Error;

/// Observation of a completion signal ended without an outcome
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("{operation} was cancelled before an outcome was reported")]
    Cancelled { operation: &'static str },
    #[error("timed out after {timeout:?} waiting for {operation} outcome")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Operation attempted in the wrong lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {operation} while session is {state}")]
pub struct InvalidStateError {
    pub operation: &'static str,
    pub state: SessionState,
}

impl InvalidStateError {
    pub fn new(operation: &'static str, state: SessionState) -> Self {
        Self { operation, state }
    }
}

/// CONNECT handshake failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Broker refused connection: {0}")]
    Refused(ConnectReturnCode),
    #[error("Handshake failed: {0}")]
    Handshake(EngineFailure),
    #[error("Engine stopped before the handshake completed")]
    EngineStopped,
    #[error(transparent)]
    Signal(#[from] SignalError),
}

impl From<EngineFailure> for ConnectError {
    fn from(failure: EngineFailure) -> Self {
        match failure.kind {
            FailureKind::Refused(code) => ConnectError::Refused(code),
            _ => ConnectError::Handshake(failure),
        }
    }
}

/// Publish was rejected or lost
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Engine refused the publish: {0}")]
    HandOff(EngineFailure),
    #[error("Transport failed before acknowledgement: {0}")]
    Transport(EngineFailure),
    #[error("Session closed before the publish was acknowledged")]
    SessionClosed,
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// Close handshake failed; the session is unusable either way
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisconnectError {
    #[error("Disconnect failed: {0}")]
    Transport(EngineFailure),
    #[error("Engine stopped before the disconnect was confirmed")]
    EngineStopped,
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// Immediate failure of a session operation
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    InvalidState(#[from] InvalidStateError),
    #[error("Transport interrupted; publish rejected until the connection resumes")]
    NotReady,
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Disconnect(#[from] DisconnectError),
}

impl SessionError {
    /// The state error, if this is one
    pub fn as_invalid_state(&self) -> Option<&InvalidStateError> {
        match self {
            SessionError::InvalidState(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
