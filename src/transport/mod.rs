//! Engine layer beneath the session
//!
//! This module defines the seam between the session orchestration layer and
//! the wire-level MQTT engine. An engine owns the network connection, runs its
//! own I/O task and reports outcomes as [`EngineEvent`]s over a channel.

use crate::session::PublishRequest;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Correlation id the session assigns to every publish hand-off
pub type PublishToken = u64;

/// Channel the engine reports its events on
pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// MQTT 3.1.1 CONNACK return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUsernameOrPassword,
    NotAuthorized,
}

impl ConnectReturnCode {
    /// Numeric code as carried in the CONNACK packet
    pub fn code(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0,
            ConnectReturnCode::UnacceptableProtocolVersion => 1,
            ConnectReturnCode::IdentifierRejected => 2,
            ConnectReturnCode::ServerUnavailable => 3,
            ConnectReturnCode::BadUsernameOrPassword => 4,
            ConnectReturnCode::NotAuthorized => 5,
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadUsernameOrPassword => "bad username or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        write!(f, "{text} ({})", self.code())
    }
}

/// Outcome of a successful CONNECT handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub return_code: ConnectReturnCode,
    /// Whether the broker resumed a stored session for this client id
    pub session_present: bool,
}

impl ConnectOutcome {
    pub fn accepted(session_present: bool) -> Self {
        Self {
            return_code: ConnectReturnCode::Accepted,
            session_present,
        }
    }
}

/// Broad classification of engine-level failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Broker answered CONNECT with a refusal code
    Refused(ConnectReturnCode),
    /// Socket-level error
    Io,
    /// TLS handshake or certificate error
    Tls,
    /// Network or flush timeout
    Timeout,
    /// Unexpected packet or protocol state
    Protocol,
    /// The engine's request queue is full
    QueueFull,
    /// The engine is not running or has stopped
    Closed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Refused(code) => write!(f, "refused: {code}"),
            FailureKind::Io => f.write_str("io"),
            FailureKind::Tls => f.write_str("tls"),
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Protocol => f.write_str("protocol"),
            FailureKind::QueueFull => f.write_str("queue full"),
            FailureKind::Closed => f.write_str("closed"),
        }
    }
}

/// Structured failure reported by an engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({message})")]
pub struct EngineFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl EngineFailure {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn closed<S: Into<String>>(message: S) -> Self {
        Self::new(FailureKind::Closed, message)
    }
}

/// Events an engine reports to its session, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// First handshake finished, successfully or not
    ConnectCompleted(Result<ConnectOutcome, EngineFailure>),
    /// An established transport was lost; the engine is reconnecting
    Interrupted(EngineFailure),
    /// The transport was re-established after an interruption
    Resumed(ConnectOutcome),
    /// A QoS 1/2 publish was acknowledged or failed
    PublishCompleted {
        token: PublishToken,
        result: Result<u16, EngineFailure>,
    },
    /// DISCONNECT was written to the broker, or closing failed
    DisconnectCompleted(Result<(), EngineFailure>),
}

/// Wire-level MQTT engine driven by a session
///
/// Implementations run their I/O on their own task and must report exactly one
/// `ConnectCompleted` after `start`, and exactly one `DisconnectCompleted` after
/// `disconnect`. Events for one engine are delivered in order over the channel
/// passed to `start`.
#[async_trait::async_trait]
pub trait MqttEngine: Send + Sync + 'static {
    /// Client identifier presented to the broker
    fn client_id(&self) -> &str;

    /// Begin the transport and CONNECT handshake; outcome arrives as an event
    async fn start(&self, events: EngineEventSender) -> Result<(), EngineFailure>;

    /// Hand a publish to the engine; QoS 1/2 completion arrives as an event
    async fn publish(
        &self,
        token: PublishToken,
        request: &PublishRequest,
    ) -> Result<(), EngineFailure>;

    /// Send DISCONNECT; confirmation arrives as an event
    async fn disconnect(&self) -> Result<(), EngineFailure>;

    /// Stop background work immediately, without protocol exchange
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_codes_match_mqtt_311() {
        assert_eq!(ConnectReturnCode::Accepted.code(), 0);
        assert_eq!(ConnectReturnCode::UnacceptableProtocolVersion.code(), 1);
        assert_eq!(ConnectReturnCode::IdentifierRejected.code(), 2);
        assert_eq!(ConnectReturnCode::ServerUnavailable.code(), 3);
        assert_eq!(ConnectReturnCode::BadUsernameOrPassword.code(), 4);
        assert_eq!(ConnectReturnCode::NotAuthorized.code(), 5);
    }

    #[test]
    fn test_engine_failure_display() {
        let failure = EngineFailure::new(
            FailureKind::Refused(ConnectReturnCode::NotAuthorized),
            "broker said no",
        );
        let text = failure.to_string();
        assert!(text.contains("not authorized (5)"), "got: {text}");
        assert!(text.contains("broker said no"), "got: {text}");
    }

    #[test]
    fn test_accepted_outcome() {
        let outcome = ConnectOutcome::accepted(true);
        assert_eq!(outcome.return_code, ConnectReturnCode::Accepted);
        assert!(outcome.session_present);
    }
}
