//! Mock implementations for testing
//!
//! [`MockEngine`] stands in for the rumqttc engine so session behavior can be
//! driven deterministically, and [`RecordingEventSink`] captures lifecycle
//! notifications for assertions.

use crate::error::{ConnectError, DisconnectError};
use crate::session::{EventSink, PublishRequest};
use crate::transport::{
    ConnectOutcome, ConnectReturnCode, EngineEvent, EngineEventSender, EngineFailure,
    FailureKind, MqttEngine, PublishToken,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How the mock answers `start`
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    /// CONNACK accepted
    Accept { session_present: bool },
    /// CONNACK with a refusal code, then the engine stops
    Refuse(ConnectReturnCode),
    /// Transport failure during the handshake, then the engine stops
    Fail(EngineFailure),
    /// Never answer; drive it with [`MockEngine::complete_connect`]
    Silent,
    /// `start` itself returns an error
    RejectStart(EngineFailure),
}

/// How the mock answers `disconnect`
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectBehavior {
    /// DISCONNECT written, engine stops
    Confirm,
    /// Close fails, engine stops
    Fail(EngineFailure),
    /// Never answer
    Silent,
    /// `disconnect` itself returns an error
    RejectHandOff(EngineFailure),
}

/// Engine method invocations, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Start,
    Publish(PublishToken),
    Disconnect,
    Shutdown,
}

/// Mock engine for session tests
#[derive(Debug)]
pub struct MockEngine {
    client_id: String,
    connect_behavior: Mutex<ConnectBehavior>,
    disconnect_behavior: Mutex<DisconnectBehavior>,
    auto_ack: AtomicBool,
    publish_failure: Mutex<Option<EngineFailure>>,
    events: Mutex<Option<EngineEventSender>>,
    published: Mutex<Vec<(PublishToken, u16, PublishRequest)>>,
    calls: Mutex<Vec<EngineCall>>,
    next_pkid: AtomicU16,
}

impl MockEngine {
    /// Engine that accepts the handshake, acks every publish and confirms disconnect
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            connect_behavior: Mutex::new(ConnectBehavior::Accept {
                session_present: false,
            }),
            disconnect_behavior: Mutex::new(DisconnectBehavior::Confirm),
            auto_ack: AtomicBool::new(true),
            publish_failure: Mutex::new(None),
            events: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_pkid: AtomicU16::new(1),
        }
    }

    pub fn with_connect(self, behavior: ConnectBehavior) -> Self {
        *lock(&self.connect_behavior) = behavior;
        self
    }

    pub fn with_disconnect(self, behavior: DisconnectBehavior) -> Self {
        *lock(&self.disconnect_behavior) = behavior;
        self
    }

    /// Leave QoS 1/2 publishes unacknowledged until [`MockEngine::ack_publish`]
    pub fn without_auto_ack(self) -> Self {
        self.auto_ack.store(false, Ordering::SeqCst);
        self
    }

    /// Reject every publish hand-off with `failure`
    pub fn with_publish_failure(self, failure: EngineFailure) -> Self {
        *lock(&self.publish_failure) = Some(failure);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.calls).clone()
    }

    /// Requests accepted by `publish`, in hand-off order
    pub fn published(&self) -> Vec<PublishRequest> {
        lock(&self.published)
            .iter()
            .map(|(_, _, request)| request.clone())
            .collect()
    }

    /// Tokens of accepted publishes, in hand-off order
    pub fn published_tokens(&self) -> Vec<PublishToken> {
        lock(&self.published)
            .iter()
            .map(|(token, _, _)| *token)
            .collect()
    }

    /// Whether the event channel is still held
    pub fn is_running(&self) -> bool {
        lock(&self.events).is_some()
    }

    /// Send a raw event to the session
    pub fn emit(&self, event: EngineEvent) -> bool {
        match lock(&self.events).as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    /// Answer a [`ConnectBehavior::Silent`] handshake
    pub fn complete_connect(&self, result: Result<ConnectOutcome, EngineFailure>) -> bool {
        let failed = result.is_err();
        let sent = self.emit(EngineEvent::ConnectCompleted(result));
        if failed {
            self.stop();
        }
        sent
    }

    pub fn simulate_interruption(&self, failure: EngineFailure) -> bool {
        self.emit(EngineEvent::Interrupted(failure))
    }

    pub fn simulate_resumption(&self, session_present: bool) -> bool {
        self.emit(EngineEvent::Resumed(ConnectOutcome::accepted(session_present)))
    }

    /// Acknowledge a publish that was handed off without auto-ack
    pub fn ack_publish(&self, token: PublishToken) -> bool {
        let pkid = lock(&self.published)
            .iter()
            .find(|(t, _, _)| *t == token)
            .map(|(_, pkid, _)| *pkid);
        match pkid {
            Some(pkid) => self.emit(EngineEvent::PublishCompleted {
                token,
                result: Ok(pkid),
            }),
            None => false,
        }
    }

    pub fn fail_publish(&self, token: PublishToken, failure: EngineFailure) -> bool {
        self.emit(EngineEvent::PublishCompleted {
            token,
            result: Err(failure),
        })
    }

    /// Drop the event channel, as a crashed engine would
    pub fn stop(&self) {
        lock(&self.events).take();
    }

    fn record(&self, call: EngineCall) {
        lock(&self.calls).push(call);
    }

    fn allocate_pkid(&self) -> u16 {
        loop {
            let pkid = self.next_pkid.fetch_add(1, Ordering::SeqCst);
            if pkid != 0 {
                return pkid;
            }
        }
    }
}

#[async_trait]
impl MqttEngine for MockEngine {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn start(&self, events: EngineEventSender) -> Result<(), EngineFailure> {
        self.record(EngineCall::Start);
        let behavior = lock(&self.connect_behavior).clone();
        if let ConnectBehavior::RejectStart(failure) = behavior {
            return Err(failure);
        }

        *lock(&self.events) = Some(events);
        match behavior {
            ConnectBehavior::Accept { session_present } => {
                self.complete_connect(Ok(ConnectOutcome::accepted(session_present)));
            }
            ConnectBehavior::Refuse(code) => {
                self.complete_connect(Err(EngineFailure::new(
                    FailureKind::Refused(code),
                    format!("connection refused: {code}"),
                )));
            }
            ConnectBehavior::Fail(failure) => {
                self.complete_connect(Err(failure));
            }
            ConnectBehavior::Silent | ConnectBehavior::RejectStart(_) => {}
        }
        Ok(())
    }

    async fn publish(
        &self,
        token: PublishToken,
        request: &PublishRequest,
    ) -> Result<(), EngineFailure> {
        self.record(EngineCall::Publish(token));
        if let Some(failure) = lock(&self.publish_failure).clone() {
            return Err(failure);
        }
        if !self.is_running() {
            return Err(EngineFailure::closed("mock engine stopped"));
        }

        let pkid = if request.qos.is_acknowledged() {
            self.allocate_pkid()
        } else {
            0
        };
        lock(&self.published).push((token, pkid, request.clone()));

        if pkid != 0 && self.auto_ack.load(Ordering::SeqCst) {
            self.ack_publish(token);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineFailure> {
        self.record(EngineCall::Disconnect);
        let behavior = lock(&self.disconnect_behavior).clone();
        match behavior {
            DisconnectBehavior::Confirm => {
                self.emit(EngineEvent::DisconnectCompleted(Ok(())));
                self.stop();
            }
            DisconnectBehavior::Fail(failure) => {
                self.emit(EngineEvent::DisconnectCompleted(Err(failure)));
                self.stop();
            }
            DisconnectBehavior::Silent => {}
            DisconnectBehavior::RejectHandOff(failure) => return Err(failure),
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.record(EngineCall::Shutdown);
        self.stop();
    }
}

/// Event delivered to a [`RecordingEventSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Connected(ConnectOutcome),
    ConnectFailed(ConnectError),
    Interrupted(EngineFailure),
    Resumed(ConnectOutcome),
    Disconnected,
    DisconnectFailed(DisconnectError),
}

/// Event sink that records every notification
#[derive(Debug)]
pub struct RecordingEventSink {
    events: watch::Sender<Vec<SinkEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Arc<Self> {
        let (events, _) = watch::channel(Vec::new());
        Arc::new(Self { events })
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    /// Wait until at least `count` events were recorded, or `timeout` passes
    pub async fn wait_for_events(&self, count: usize, timeout: Duration) -> Vec<SinkEvent> {
        let mut rx = self.events.subscribe();
        let _ = tokio::time::timeout(timeout, rx.wait_for(|events| events.len() >= count)).await;
        self.events()
    }

    fn push(&self, event: SinkEvent) {
        self.events.send_modify(|events| events.push(event));
    }
}

impl EventSink for RecordingEventSink {
    fn on_connect_result(&self, result: Result<&ConnectOutcome, &ConnectError>) {
        self.push(match result {
            Ok(outcome) => SinkEvent::Connected(*outcome),
            Err(e) => SinkEvent::ConnectFailed(e.clone()),
        });
    }

    fn on_interrupted(&self, failure: &EngineFailure) {
        self.push(SinkEvent::Interrupted(failure.clone()));
    }

    fn on_resumed(&self, outcome: &ConnectOutcome) {
        self.push(SinkEvent::Resumed(*outcome));
    }

    fn on_disconnect_result(&self, result: Result<(), &DisconnectError>) {
        self.push(match result {
            Ok(()) => SinkEvent::Disconnected,
            Err(e) => SinkEvent::DisconnectFailed(e.clone()),
        });
    }
}
