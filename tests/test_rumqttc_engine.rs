//! Session over the real rumqttc engine against an in-process broker
//!
//! These tests exercise the wire path end to end: CONNECT/CONNACK, publish
//! acknowledgement at each QoS, reconnection after a dropped link, and the
//! DISCONNECT handshake.

mod fake_broker;

use fake_broker::{BrokerOptions, FakeBroker};
use iotlink::session::{PublishRequest, QualityOfService, Session, SessionState};
use iotlink::testing::{RecordingEventSink, SinkEvent};
use iotlink::transport::mqtt::ConnectionConfigBuilder;
use iotlink::{ConnectError, ConnectReturnCode, ConnectionConfig, FailureKind, SessionError};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

fn config_for(endpoint: &str, client_id: &str) -> ConnectionConfig {
    ConnectionConfigBuilder::new()
        .with_endpoint(endpoint)
        .with_client_id(client_id)
        .with_keep_alive_secs(30)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_connect_publish_disconnect_over_the_wire() {
    // Arrange
    let broker = FakeBroker::start(BrokerOptions::default()).await;
    let sink = RecordingEventSink::new();
    let session = Session::new(config_for(&broker.endpoint(), "wire-happy"), sink.clone());

    // Act: connect
    let outcome = session.connect().await.unwrap().wait_timeout(WAIT).await.unwrap();

    // Assert
    assert_eq!(outcome.return_code, ConnectReturnCode::Accepted);
    assert_eq!(session.state(), SessionState::Connected);

    // Act: one publish at every QoS
    let at_least_once = session
        .publish(PublishRequest::new("sdk/test/temp", "21.5", QualityOfService::AtLeastOnce))
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    let exactly_once = session
        .publish(PublishRequest::new("sdk/test/temp", "21.6", QualityOfService::ExactlyOnce))
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    let at_most_once = session
        .publish(PublishRequest::new("sdk/test/temp", "21.7", QualityOfService::AtMostOnce))
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    // Assert
    assert!(at_least_once.packet_id.is_some());
    assert!(exactly_once.packet_id.is_some());
    assert_ne!(at_least_once.packet_id, exactly_once.packet_id);
    assert_eq!(at_most_once.packet_id, None);

    assert!(broker.wait_until(WAIT, |b| b.published().len() == 3).await);
    let payloads: Vec<Vec<u8>> = broker.published().into_iter().map(|p| p.payload).collect();
    assert_eq!(
        payloads,
        vec![b"21.5".to_vec(), b"21.6".to_vec(), b"21.7".to_vec()]
    );
    assert!(broker.published().iter().all(|p| p.topic == "sdk/test/temp"));

    // Act: disconnect
    session
        .disconnect()
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();

    // Assert
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(broker.wait_until(WAIT, |b| b.disconnects() == 1).await);
    assert_eq!(
        sink.events(),
        vec![
            SinkEvent::Connected(outcome),
            SinkEvent::Disconnected
        ]
    );
}

#[tokio::test]
async fn test_broker_refusal_fails_connect() {
    // Arrange: broker answers every CONNECT with "not authorized"
    let broker = FakeBroker::start(BrokerOptions {
        refuse_with: Some(5),
        ..Default::default()
    })
    .await;
    let sink = RecordingEventSink::new();
    let session = Session::new(config_for(&broker.endpoint(), "wire-refused"), sink.clone());

    // Act
    let result = session.connect().await.unwrap().wait_timeout(WAIT).await;

    // Assert
    assert_eq!(
        result,
        Err(ConnectError::Refused(ConnectReturnCode::NotAuthorized))
    );
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(broker.connects(), 1, "refusal must not be retried");

    let publish = session
        .publish(PublishRequest::new("a/b", "x", QualityOfService::AtLeastOnce))
        .await;
    assert!(matches!(publish, Err(SessionError::InvalidState(_))));
}

#[tokio::test]
async fn test_unreachable_broker_fails_connect() {
    // Arrange: bind then release a port so nothing listens on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let sink = RecordingEventSink::new();
    let endpoint = format!("mqtt://127.0.0.1:{port}");
    let session = Session::new(config_for(&endpoint, "wire-unreachable"), sink.clone());

    // Act
    let result = session.connect().await.unwrap().wait_timeout(WAIT).await;

    // Assert
    match result {
        Err(ConnectError::Handshake(failure)) => assert_eq!(failure.kind, FailureKind::Io),
        other => panic!("expected handshake failure, got {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(matches!(
        sink.events().as_slice(),
        [SinkEvent::ConnectFailed(ConnectError::Handshake(_))]
    ));
}

#[tokio::test]
async fn test_dropped_link_is_interrupted_then_resumed() {
    // Arrange
    let broker = FakeBroker::start(BrokerOptions {
        session_present: true,
        ..Default::default()
    })
    .await;
    let sink = RecordingEventSink::new();
    let session = Session::new(config_for(&broker.endpoint(), "wire-resume"), sink.clone());
    session.connect().await.unwrap().wait_timeout(WAIT).await.unwrap();

    // Act: broker drops the connection; the engine reconnects on its own
    broker.kick();
    let events = sink.wait_for_events(3, WAIT).await;

    // Assert: exactly one interruption, then one resumption
    assert_eq!(events.len(), 3, "events: {events:?}");
    assert!(matches!(events[1], SinkEvent::Interrupted(_)));
    assert!(matches!(events[2], SinkEvent::Resumed(outcome) if outcome.session_present));
    assert!(!session.is_interrupted());
    assert_eq!(session.state(), SessionState::Connected);
    assert!(broker.connects() >= 2);

    // The resumed session publishes normally
    let ack = session
        .publish(PublishRequest::new("sdk/test/temp", "after", QualityOfService::AtLeastOnce))
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    assert!(ack.packet_id.is_some());

    session
        .disconnect()
        .await
        .unwrap()
        .wait_timeout(WAIT)
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
}
