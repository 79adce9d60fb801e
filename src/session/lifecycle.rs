//! Session lifecycle and signal plumbing
//!
//! A [`Session`] owns one engine. Operations check and advance the state
//! machine atomically, hand work to the engine and return a completion signal.
//! A dispatcher task consumes the engine's events in order, fulfils pending
//! signals and relays lifecycle notifications to the [`EventSink`].

use super::events::EventSink;
use super::publish::{PublishAck, PublishRequest, QualityOfService};
use super::signal::{completion_pair, Completer, CompletionSignal};
use super::state::{SessionState, Transition};
use crate::error::{
    ConnectError, DisconnectError, InvalidStateError, PublishError, SessionError, SessionResult,
};
use crate::session_span;
use crate::transport::mqtt::{ConnectionConfig, RumqttcEngine};
use crate::transport::{ConnectOutcome, EngineEvent, MqttEngine, PublishToken};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

/// Signal returned by [`Session::connect`]
pub type ConnectSignal = CompletionSignal<ConnectOutcome, ConnectError>;
/// Signal returned by [`Session::publish`]
pub type PublishSignal = CompletionSignal<PublishAck, PublishError>;
/// Signal returned by [`Session::disconnect`]
pub type DisconnectSignal = CompletionSignal<(), DisconnectError>;

#[derive(Default)]
struct PendingSignals {
    connect: Option<Completer<ConnectOutcome, ConnectError>>,
    disconnect: Option<Completer<(), DisconnectError>>,
    publishes: HashMap<PublishToken, (QualityOfService, Completer<PublishAck, PublishError>)>,
}

/// Whether the dispatcher keeps reading engine events
enum Flow {
    Continue,
    Stop,
}

/// State shared between the session handle and its dispatcher task
struct SessionShared {
    client_id: String,
    state_tx: watch::Sender<SessionState>,
    interrupted: AtomicBool,
    pending: Mutex<PendingSignals>,
}

impl SessionShared {
    fn new(client_id: String) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unconnected);
        Self {
            client_id,
            state_tx,
            interrupted: AtomicBool::new(false),
            pending: Mutex::new(PendingSignals::default()),
        }
    }

    fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    fn pending(&self) -> MutexGuard<'_, PendingSignals> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically apply `transition`; on rejection returns the current state
    fn apply(&self, transition: Transition) -> Result<SessionState, SessionState> {
        let mut outcome = Err(SessionState::Unconnected);
        self.state_tx.send_if_modified(|state| match state.next(transition) {
            Some(next) => {
                debug!(
                    client_id = %self.client_id,
                    from = %state,
                    to = %next,
                    "Session state transition"
                );
                *state = next;
                outcome = Ok(next);
                true
            }
            None => {
                outcome = Err(*state);
                false
            }
        });
        outcome
    }

    fn handle_engine_event(&self, sink: &dyn EventSink, event: EngineEvent) -> Flow {
        match event {
            EngineEvent::ConnectCompleted(Ok(outcome)) => {
                if let Err(state) = self.apply(Transition::ConnectSucceeded) {
                    warn!(client_id = %self.client_id, %state, "Ignoring connect completion");
                    return Flow::Continue;
                }
                let completer = self.pending().connect.take();
                sink.on_connect_result(Ok(&outcome));
                if let Some(completer) = completer {
                    completer.complete(Ok(outcome));
                }
                Flow::Continue
            }
            EngineEvent::ConnectCompleted(Err(failure)) => {
                if self.fail_connect(sink, ConnectError::from(failure)) {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
            EngineEvent::Interrupted(failure) => {
                if self.state() != SessionState::Connected {
                    debug!(client_id = %self.client_id, error = %failure, "Ignoring interruption outside of connected state");
                    return Flow::Continue;
                }
                self.interrupted.store(true, Ordering::SeqCst);
                sink.on_interrupted(&failure);
                Flow::Continue
            }
            EngineEvent::Resumed(outcome) => {
                if self.state() != SessionState::Connected {
                    debug!(client_id = %self.client_id, "Ignoring resumption outside of connected state");
                    return Flow::Continue;
                }
                self.interrupted.store(false, Ordering::SeqCst);
                sink.on_resumed(&outcome);
                Flow::Continue
            }
            EngineEvent::PublishCompleted { token, result } => {
                let entry = self.pending().publishes.remove(&token);
                match entry {
                    Some((qos, completer)) => {
                        let outcome = result
                            .map(|packet_id| PublishAck::acknowledged(packet_id, qos))
                            .map_err(PublishError::Transport);
                        completer.complete(outcome);
                    }
                    None => debug!(client_id = %self.client_id, token, "Publish completion has no pending signal"),
                }
                Flow::Continue
            }
            EngineEvent::DisconnectCompleted(result) => {
                let (transition, outcome) = match result {
                    Ok(()) => (Transition::DisconnectConfirmed, Ok(())),
                    Err(failure) => (
                        Transition::DisconnectFailed,
                        Err(DisconnectError::Transport(failure)),
                    ),
                };
                if self.finish_disconnect(sink, transition, outcome) {
                    Flow::Stop
                } else {
                    Flow::Continue
                }
            }
        }
    }

    /// Move `Connecting -> Failed` and report `error`; false if not connecting
    fn fail_connect(&self, sink: &dyn EventSink, error: ConnectError) -> bool {
        if let Err(state) = self.apply(Transition::ConnectFailed) {
            warn!(client_id = %self.client_id, %state, error = %error, "Ignoring connect failure");
            return false;
        }
        let completer = self.pending().connect.take();
        self.abandon_publishes();
        sink.on_connect_result(Err(&error));
        if let Some(completer) = completer {
            completer.complete(Err(error));
        }
        true
    }

    /// Leave `Disconnecting` via `transition` and report `outcome`
    fn finish_disconnect(
        &self,
        sink: &dyn EventSink,
        transition: Transition,
        outcome: Result<(), DisconnectError>,
    ) -> bool {
        if let Err(state) = self.apply(transition) {
            warn!(client_id = %self.client_id, %state, "Ignoring disconnect completion");
            return false;
        }
        let completer = self.pending().disconnect.take();
        self.abandon_publishes();
        sink.on_disconnect_result(outcome.as_ref().map(|_| ()));
        if let Some(completer) = completer {
            completer.complete(outcome);
        }
        true
    }

    /// Resolve every outstanding publish with `SessionClosed`
    fn abandon_publishes(&self) {
        let abandoned: Vec<_> = self.pending().publishes.drain().collect();
        if !abandoned.is_empty() {
            warn!(
                client_id = %self.client_id,
                count = abandoned.len(),
                "Session closed with unacknowledged publishes"
            );
        }
        for (_, (_, completer)) in abandoned {
            completer.complete(Err(PublishError::SessionClosed));
        }
    }

    /// The engine's event stream ended
    fn on_engine_stopped(&self, sink: &dyn EventSink) {
        match self.state() {
            SessionState::Connecting => {
                self.fail_connect(sink, ConnectError::EngineStopped);
            }
            SessionState::Disconnecting => {
                self.finish_disconnect(
                    sink,
                    Transition::DisconnectFailed,
                    Err(DisconnectError::EngineStopped),
                );
            }
            SessionState::Connected => {
                if self.apply(Transition::EngineLost).is_ok() {
                    error!(client_id = %self.client_id, "Engine stopped while connected");
                    self.abandon_publishes();
                }
            }
            _ => {}
        }
    }
}

async fn dispatch_engine_events(
    shared: Arc<SessionShared>,
    sink: Arc<dyn EventSink>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) {
    while let Some(event) = events.recv().await {
        trace!(?event, "Engine event");
        if let Flow::Stop = shared.handle_engine_event(sink.as_ref(), event) {
            break;
        }
    }
    shared.on_engine_stopped(sink.as_ref());
    debug!(client_id = %shared.client_id, "Session dispatcher stopped");
}

/// MQTT client session over an exclusively owned engine
///
/// ```rust,no_run
/// use iotlink::session::{NoopEventSink, PublishRequest, QualityOfService, Session};
/// use iotlink::transport::mqtt::{ConnectionConfigBuilder, CredentialSource};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let config = ConnectionConfigBuilder::new_mtls(
///     CredentialSource::file("device.pem.crt"),
///     CredentialSource::file("private.pem.key"),
/// )
/// .with_certificate_authority(CredentialSource::file("AmazonRootCA1.pem"))
/// .with_endpoint("a1b2c3-ats.iot.us-east-1.amazonaws.com")
/// .with_client_id("sensor-01")
/// .build()?;
///
/// let session = Session::new(config, Arc::new(NoopEventSink));
/// session.connect().await?.await?;
/// let request = PublishRequest::new("sdk/test/temp", "23.5", QualityOfService::AtLeastOnce);
/// let ack = session.publish(request).await?.await?;
/// println!("acknowledged packet {:?}", ack.packet_id);
/// session.disconnect().await?.await?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct Session<E: MqttEngine = RumqttcEngine> {
    engine: E,
    shared: Arc<SessionShared>,
    sink: Arc<dyn EventSink>,
    next_token: AtomicU64,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Session<RumqttcEngine> {
    /// Session over the rumqttc engine
    pub fn new(config: ConnectionConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_engine(RumqttcEngine::new(&config), sink)
    }
}

impl<E: MqttEngine> Session<E> {
    pub fn with_engine(engine: E, sink: Arc<dyn EventSink>) -> Self {
        let shared = Arc::new(SessionShared::new(engine.client_id().to_string()));
        Self {
            engine,
            shared,
            sink,
            next_token: AtomicU64::new(1),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Connected but the transport is currently down
    pub fn is_interrupted(&self) -> bool {
        self.shared.interrupted.load(Ordering::SeqCst)
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Start the handshake; the signal resolves with the broker's answer
    pub async fn connect(&self) -> SessionResult<ConnectSignal> {
        self.shared
            .apply(Transition::ConnectRequested)
            .map_err(|state| InvalidStateError::new("connect", state))?;
        info!(client_id = %self.shared.client_id, "Connecting");

        let (completer, signal) = completion_pair("connect");
        self.shared.pending().connect = Some(completer);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(failure) = self.engine.start(events_tx).await {
            error!(client_id = %self.shared.client_id, error = %failure, "Engine failed to start");
            self.shared
                .fail_connect(self.sink.as_ref(), ConnectError::from(failure));
            return Ok(signal);
        }

        let span = session_span!(client_id = %self.shared.client_id);
        let handle = tokio::spawn(
            dispatch_engine_events(self.shared.clone(), self.sink.clone(), events_rx)
                .instrument(span),
        );
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(signal)
    }

    /// Hand a message to the engine
    ///
    /// QoS 0 resolves as soon as the engine accepts the message. Publishing
    /// while the transport is interrupted fails fast with
    /// [`SessionError::NotReady`]; nothing is queued.
    pub async fn publish(&self, request: PublishRequest) -> SessionResult<PublishSignal> {
        let state = self.state();
        if !state.can_publish() {
            return Err(InvalidStateError::new("publish", state).into());
        }
        if self.is_interrupted() {
            return Err(SessionError::NotReady);
        }
        request.validate()?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let qos = request.qos;
        let (completer, signal) = completion_pair("publish");
        let synthetic = if qos.is_acknowledged() {
            self.shared
                .pending()
                .publishes
                .insert(token, (qos, completer));
            None
        } else {
            Some(completer)
        };

        if let Err(failure) = self.engine.publish(token, &request).await {
            self.shared.pending().publishes.remove(&token);
            warn!(
                client_id = %self.shared.client_id,
                topic = %request.topic,
                error = %failure,
                "Publish hand-off failed"
            );
            return Err(PublishError::HandOff(failure).into());
        }

        debug!(
            client_id = %self.shared.client_id,
            topic = %request.topic,
            qos = qos.level(),
            bytes = request.payload.len(),
            token,
            "Publish handed to engine"
        );
        if let Some(completer) = synthetic {
            completer.complete(Ok(PublishAck::synthetic()));
        }
        Ok(signal)
    }

    /// Send DISCONNECT; the session is spent once the signal resolves
    pub async fn disconnect(&self) -> SessionResult<DisconnectSignal> {
        self.shared
            .apply(Transition::DisconnectRequested)
            .map_err(|state| InvalidStateError::new("disconnect", state))?;
        info!(client_id = %self.shared.client_id, "Disconnecting");

        let (completer, signal) = completion_pair("disconnect");
        self.shared.pending().disconnect = Some(completer);

        if let Err(failure) = self.engine.disconnect().await {
            error!(client_id = %self.shared.client_id, error = %failure, "Disconnect hand-off failed");
            self.shared.finish_disconnect(
                self.sink.as_ref(),
                Transition::DisconnectFailed,
                Err(DisconnectError::Transport(failure)),
            );
        }
        Ok(signal)
    }
}

impl<E: MqttEngine> Drop for Session<E> {
    fn drop(&mut self) {
        self.engine.shutdown();

        // Outstanding signals resolve as cancelled once the dispatcher is gone
        let dispatcher = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = dispatcher.take() {
            handle.abort();
        }
    }
}
