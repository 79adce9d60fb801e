//! MQTT session orchestration
//!
//! This module wraps an MQTT engine in a [`Session`] whose connect, publish and
//! disconnect operations return one-shot completion signals, and relays
//! interruption and resumption to a caller-supplied [`EventSink`].
//!
//! - [`state`] - Pure lifecycle state machine
//! - [`signal`] - One-shot completer / signal pairs
//! - [`events`] - Event sink trait and stock sinks
//! - [`publish`] - Publish request and acknowledgement values
//! - [`lifecycle`] - The session itself

pub mod events;
pub mod lifecycle;
pub mod publish;
pub mod signal;
pub mod state;

pub use events::{EventSink, LoggingEventSink, NoopEventSink};
pub use lifecycle::{ConnectSignal, DisconnectSignal, PublishSignal, Session};
pub use publish::{PublishAck, PublishRequest, QualityOfService};
pub use signal::{completion_pair, Completer, CompletionSignal};
pub use state::{SessionState, Transition};
