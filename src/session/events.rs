//! Lifecycle notifications delivered to the caller
//!
//! The session invokes an [`EventSink`] from its dispatcher task, one call at a
//! time. Handlers run off the caller's task, so they must not block waiting on
//! the session; spawn a task for any reaction that needs a session operation.

use crate::error::{ConnectError, DisconnectError};
use crate::transport::{ConnectOutcome, EngineFailure};
use tracing::{error, info, warn};

/// Receiver of session lifecycle events
pub trait EventSink: Send + Sync {
    /// The CONNECT handshake finished
    fn on_connect_result(&self, result: Result<&ConnectOutcome, &ConnectError>);

    /// The transport was lost; the engine is reconnecting
    fn on_interrupted(&self, failure: &EngineFailure);

    /// The transport was restored after an interruption
    fn on_resumed(&self, outcome: &ConnectOutcome);

    /// The close handshake finished
    fn on_disconnect_result(&self, result: Result<(), &DisconnectError>);
}

/// Sink that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn on_connect_result(&self, _result: Result<&ConnectOutcome, &ConnectError>) {}
    fn on_interrupted(&self, _failure: &EngineFailure) {}
    fn on_resumed(&self, _outcome: &ConnectOutcome) {}
    fn on_disconnect_result(&self, _result: Result<(), &DisconnectError>) {}
}

/// Sink that reports every event as a log line
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    client_id: String,
}

impl LoggingEventSink {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

impl EventSink for LoggingEventSink {
    fn on_connect_result(&self, result: Result<&ConnectOutcome, &ConnectError>) {
        match result {
            Ok(outcome) => info!(
                client_id = %self.client_id,
                return_code = outcome.return_code.code(),
                session_present = outcome.session_present,
                "Connection completed"
            ),
            Err(e) => error!(client_id = %self.client_id, error = %e, "Connection failed"),
        }
    }

    fn on_interrupted(&self, failure: &EngineFailure) {
        warn!(client_id = %self.client_id, error = %failure, "Connection interrupted");
    }

    fn on_resumed(&self, outcome: &ConnectOutcome) {
        info!(
            client_id = %self.client_id,
            return_code = outcome.return_code.code(),
            session_present = outcome.session_present,
            "Connection resumed"
        );
    }

    fn on_disconnect_result(&self, result: Result<(), &DisconnectError>) {
        match result {
            Ok(()) => info!(client_id = %self.client_id, "Disconnect completed"),
            Err(e) => error!(client_id = %self.client_id, error = %e, "Disconnect failed"),
        }
    }
}
