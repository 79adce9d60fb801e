//! rumqttc-backed MQTT 3.1.1 engine
//!
//! This module separates pure functions from I/O operations for testability.
//!
//! # Architecture
//!
//! - [`connection`] - Connection configuration, credential loading and option building
//! - [`event_router`] - Pure routing of rumqttc events and error classification
//! - [`in_flight`] - Pure correlation of publish tokens with packet ids
//! - [`client`] - Impure I/O: the event loop supervisor and [`RumqttcEngine`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use iotlink::transport::mqtt::{ConnectionConfigBuilder, RumqttcEngine};
//!
//! let config = ConnectionConfigBuilder::new()
//!     .with_endpoint("mqtt://localhost:1883")
//!     .with_client_id("bench-device")
//!     .build()?;
//!
//! let engine = RumqttcEngine::new(&config);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod client;
pub mod connection;
pub mod event_router;
pub mod in_flight;

pub use client::RumqttcEngine;
pub use connection::{
    configure_mqtt_options, ConnectionConfig, ConnectionConfigBuilder, CredentialSource,
    Endpoint, ReconnectConfig, TlsCredentials,
};
pub use event_router::{classify_connection_error, route_event, EngineRoute};
pub use in_flight::InFlightTracker;
