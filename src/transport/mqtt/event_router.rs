//! Pure routing of rumqttc events and errors
//!
//! The supervisor task feeds every polled event through [`route_event`] and
//! every poll error through [`classify_connection_error`]; neither touches I/O.

use crate::transport::{ConnectOutcome, ConnectReturnCode, EngineFailure, FailureKind};
use rumqttc::{ClientError, ConnectionError, Event, Outgoing, Packet};

/// What the supervisor does with a polled event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRoute {
    /// CONNACK accepted; the link is up
    LinkUp(ConnectOutcome),
    /// A PUBLISH was written with this packet id (0 for QoS 0)
    PublishSent(u16),
    /// The broker completed delivery of this packet id
    PublishAcked(u16),
    /// DISCONNECT was written to the broker
    DisconnectSent,
    /// Nothing the session cares about
    Ignore,
}

/// Route a rumqttc event (pure function)
pub fn route_event(event: &Event) -> EngineRoute {
    match event {
        Event::Incoming(Packet::ConnAck(connack)) => match map_return_code(connack.code) {
            ConnectReturnCode::Accepted => EngineRoute::LinkUp(ConnectOutcome {
                return_code: ConnectReturnCode::Accepted,
                session_present: connack.session_present,
            }),
            // rumqttc surfaces refusals as poll errors; a refused CONNACK here is not a link
            _ => EngineRoute::Ignore,
        },
        Event::Incoming(Packet::PubAck(puback)) => EngineRoute::PublishAcked(puback.pkid),
        // QoS 2 completes on PUBCOMP, PUBREC is only the halfway mark
        Event::Incoming(Packet::PubComp(pubcomp)) => EngineRoute::PublishAcked(pubcomp.pkid),
        Event::Outgoing(Outgoing::Publish(pkid)) => EngineRoute::PublishSent(*pkid),
        Event::Outgoing(Outgoing::Disconnect) => EngineRoute::DisconnectSent,
        _ => EngineRoute::Ignore,
    }
}

/// Translate a rumqttc CONNACK code
pub fn map_return_code(code: rumqttc::ConnectReturnCode) -> ConnectReturnCode {
    use rumqttc::ConnectReturnCode as Wire;

    match code {
        Wire::Success => ConnectReturnCode::Accepted,
        Wire::RefusedProtocolVersion => ConnectReturnCode::UnacceptableProtocolVersion,
        Wire::BadClientId => ConnectReturnCode::IdentifierRejected,
        Wire::ServiceUnavailable => ConnectReturnCode::ServerUnavailable,
        Wire::BadUserNamePassword => ConnectReturnCode::BadUsernameOrPassword,
        Wire::NotAuthorized => ConnectReturnCode::NotAuthorized,
    }
}

/// Classify an event loop error (pure function)
pub fn classify_connection_error(error: &ConnectionError) -> EngineFailure {
    let kind = match error {
        ConnectionError::ConnectionRefused(code) => FailureKind::Refused(map_return_code(*code)),
        ConnectionError::Io(_) => FailureKind::Io,
        ConnectionError::Tls(_) => FailureKind::Tls,
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => FailureKind::Timeout,
        ConnectionError::RequestsDone => FailureKind::Closed,
        _ => FailureKind::Protocol,
    };
    EngineFailure::new(kind, error.to_string())
}

/// Classify a request hand-off error (pure function)
pub fn classify_client_error(error: &ClientError) -> EngineFailure {
    match error {
        ClientError::TryRequest(_) => {
            EngineFailure::new(FailureKind::QueueFull, "engine request queue is full")
        }
        ClientError::Request(_) => EngineFailure::closed("engine event loop is gone"),
    }
}
