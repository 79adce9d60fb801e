//! iotlink - MQTT session layer for IoT devices
//!
//! A [`Session`] wraps an MQTT 3.1.1 engine (rumqttc by default) and exposes
//! connect, publish and disconnect as operations that return one-shot
//! completion signals. Lifecycle notifications, including transport
//! interruption and resumption, are delivered to a caller-supplied
//! [`EventSink`].
//!
//! # Overview
//!
//! - [`session`] - Session lifecycle, completion signals and event sinks
//! - [`transport`] - Engine seam and the rumqttc engine
//! - [`config`] - TOML configuration for the publisher binary
//! - [`observability`] - Structured logging setup
//! - [`sensor`] - Sensor reading for the publisher binary
//! - [`testing`] - Mock engine and recording sink
//!
//! # Quick Start
//!
//! ```rust
//! use iotlink::session::{PublishRequest, QualityOfService, Session, SessionState};
//! use iotlink::testing::{MockEngine, RecordingEventSink};
//!
//! # tokio_test::block_on(async {
//! let sink = RecordingEventSink::new();
//! let session = Session::with_engine(MockEngine::new("doc-device"), sink.clone());
//!
//! session.connect().await?.await?;
//! assert_eq!(session.state(), SessionState::Connected);
//!
//! let ack = session
//!     .publish(PublishRequest::new("sdk/test/temp", "21.0", QualityOfService::AtLeastOnce))
//!     .await?
//!     .await?;
//! assert!(ack.packet_id.is_some());
//!
//! session.disconnect().await?.await?;
//! assert_eq!(session.state(), SessionState::Disconnected);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod sensor;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, PublisherConfig};
pub use error::{
    ConnectError, DisconnectError, InvalidStateError, PublishError, SessionError, SessionResult,
    SignalError,
};
pub use session::{
    CompletionSignal, EventSink, LoggingEventSink, NoopEventSink, PublishAck, PublishRequest,
    QualityOfService, Session, SessionState,
};
pub use transport::mqtt::{ConnectionConfig, ConnectionConfigBuilder, CredentialSource};
pub use transport::{ConnectOutcome, ConnectReturnCode, EngineFailure, FailureKind, MqttEngine};
