//! Impure I/O operations for the rumqttc engine
//!
//! [`RumqttcEngine`] owns a rumqttc client and event loop. `start` spawns a
//! supervisor task that polls the event loop, reports handshake, publish and
//! disconnect outcomes as engine events, and reconnects with backoff after the
//! link drops.

use super::connection::{configure_mqtt_options, ConnectionConfig, ReconnectConfig};
use super::event_router::{
    classify_client_error, classify_connection_error, route_event, EngineRoute,
};
use super::in_flight::InFlightTracker;
use crate::session::PublishRequest;
use crate::transport::{
    EngineEvent, EngineEventSender, EngineFailure, MqttEngine, PublishToken,
};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Instruction from the engine handle to its supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Disconnect,
    Shutdown,
}

/// Whether the supervisor keeps polling
enum Step {
    Continue,
    Stop,
}

/// Link status as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Waiting for the first CONNACK
    Handshaking,
    Up,
    /// Lost after being up; counts failed reconnect attempts
    Down { attempts: u32 },
}

fn lock_tracker(tracker: &Mutex<InFlightTracker>) -> MutexGuard<'_, InFlightTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// MQTT 3.1.1 engine backed by rumqttc
pub struct RumqttcEngine {
    client_id: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    in_flight: Arc<Mutex<InFlightTracker>>,
    reconnect_config: ReconnectConfig,
    control_tx: watch::Sender<Control>,
    stopped: Arc<AtomicBool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcEngine {
    /// Build the client; nothing touches the network until `start`
    pub fn new(config: &ConnectionConfig) -> Self {
        let mqtt_options = configure_mqtt_options(config);
        let (client, event_loop) = AsyncClient::new(mqtt_options, config.request_capacity());
        let (control_tx, _) = watch::channel(Control::Run);

        Self {
            client_id: config.client_id().to_string(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            in_flight: Arc::new(Mutex::new(InFlightTracker::new())),
            reconnect_config: config.reconnect_config().clone(),
            control_tx,
            stopped: Arc::new(AtomicBool::new(false)),
            supervisor: Mutex::new(None),
        }
    }

    /// Whether the supervisor has exited
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Perform interruptible sleep with control monitoring
    /// Returns `None` if the sleep completed, or the control that interrupted it
    async fn interruptible_sleep(
        control_rx: &mut watch::Receiver<Control>,
        delay: Duration,
    ) -> Option<Control> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                changed = control_rx.changed() => {
                    if changed.is_err() {
                        return Some(Control::Shutdown);
                    }
                    let control = *control_rx.borrow_and_update();
                    if control != Control::Run {
                        return Some(control);
                    }
                }
                _ = &mut sleep => return None,
            }
        }
    }
}

/// State owned by the supervisor task
struct Supervisor {
    client_id: String,
    events: EngineEventSender,
    in_flight: Arc<Mutex<InFlightTracker>>,
    reconnect_config: ReconnectConfig,
    control_rx: watch::Receiver<Control>,
    link: Link,
    stopped: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!(client_id = %self.client_id, "Starting MQTT event loop supervisor");

        loop {
            let polled = tokio::select! {
                changed = self.control_rx.changed() => {
                    let control = if changed.is_ok() {
                        *self.control_rx.borrow_and_update()
                    } else {
                        Control::Shutdown
                    };
                    match control {
                        Control::Shutdown => {
                            info!(client_id = %self.client_id, "Shutdown signal received, stopping supervisor");
                            break;
                        }
                        // No live link to close; the session is done with it
                        Control::Disconnect if self.link != Link::Up => {
                            self.report(EngineEvent::DisconnectCompleted(Ok(())));
                            break;
                        }
                        _ => continue,
                    }
                }
                polled = event_loop.poll() => polled,
            };

            let step = match polled {
                Ok(event) => {
                    trace!(client_id = %self.client_id, ?event, "MQTT event");
                    self.on_route(route_event(&event))
                }
                Err(e) => self.on_error(e).await,
            };
            if let Step::Stop = step {
                break;
            }
        }

        let outstanding = lock_tracker(&self.in_flight).outstanding();
        if outstanding > 0 {
            debug!(client_id = %self.client_id, outstanding, "Supervisor stopped with publishes in flight");
        }
        // Set before the event sender drops so publishers see it first
        self.stopped.store(true, Ordering::SeqCst);
        info!(client_id = %self.client_id, "MQTT event loop stopped");
    }

    fn disconnect_requested(&self) -> bool {
        *self.control_rx.borrow() == Control::Disconnect
    }

    fn report(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            debug!(client_id = %self.client_id, "Session stopped listening to engine events");
        }
    }

    fn on_route(&mut self, route: EngineRoute) -> Step {
        match route {
            EngineRoute::LinkUp(outcome) => {
                match self.link {
                    Link::Handshaking => {
                        info!(client_id = %self.client_id, session_present = outcome.session_present, "Connection acknowledged");
                        self.report(EngineEvent::ConnectCompleted(Ok(outcome)));
                    }
                    Link::Down { attempts } => {
                        info!(client_id = %self.client_id, attempts, "Connection re-established");
                        self.report(EngineEvent::Resumed(outcome));
                    }
                    Link::Up => debug!(client_id = %self.client_id, "Duplicate CONNACK ignored"),
                }
                self.link = Link::Up;
            }
            EngineRoute::PublishSent(pkid) => {
                if let Some(token) = lock_tracker(&self.in_flight).on_outgoing(pkid) {
                    trace!(client_id = %self.client_id, pkid, token, "Publish written");
                }
            }
            EngineRoute::PublishAcked(pkid) => {
                let token = lock_tracker(&self.in_flight).acknowledge(pkid);
                match token {
                    Some(token) => self.report(EngineEvent::PublishCompleted {
                        token,
                        result: Ok(pkid),
                    }),
                    None => debug!(client_id = %self.client_id, pkid, "Acknowledgement for untracked packet"),
                }
            }
            EngineRoute::DisconnectSent => {
                info!(client_id = %self.client_id, "DISCONNECT sent");
                self.report(EngineEvent::DisconnectCompleted(Ok(())));
                return Step::Stop;
            }
            EngineRoute::Ignore => {}
        }
        Step::Continue
    }

    async fn on_error(&mut self, error: ConnectionError) -> Step {
        let failure = classify_connection_error(&error);

        if self.disconnect_requested() {
            // Losing a live link before DISCONNECT went out is a failed close
            let outcome = match self.link {
                Link::Up => Err(failure),
                _ => Ok(()),
            };
            self.report(EngineEvent::DisconnectCompleted(outcome));
            return Step::Stop;
        }

        let attempts = match self.link {
            Link::Handshaking => {
                error!(client_id = %self.client_id, error = %failure, "Connection failed");
                self.report(EngineEvent::ConnectCompleted(Err(failure)));
                return Step::Stop;
            }
            Link::Up => {
                warn!(client_id = %self.client_id, error = %failure, "Connection interrupted");
                self.report(EngineEvent::Interrupted(failure));
                1
            }
            Link::Down { attempts } => {
                debug!(client_id = %self.client_id, attempts, error = %failure, "Reconnect attempt failed");
                attempts.saturating_add(1)
            }
        };
        self.link = Link::Down { attempts };

        let delay = self.reconnect_config.calculate_backoff_delay(attempts);
        debug!(client_id = %self.client_id, attempt = attempts, delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

        match RumqttcEngine::interruptible_sleep(&mut self.control_rx, delay).await {
            None => Step::Continue,
            Some(Control::Disconnect) => {
                self.report(EngineEvent::DisconnectCompleted(Ok(())));
                Step::Stop
            }
            Some(_) => Step::Stop,
        }
    }
}

#[async_trait]
impl MqttEngine for RumqttcEngine {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn start(&self, events: EngineEventSender) -> Result<(), EngineFailure> {
        let event_loop = self
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| EngineFailure::closed("event loop already started"))?;

        let supervisor = Supervisor {
            client_id: self.client_id.clone(),
            events,
            in_flight: self.in_flight.clone(),
            reconnect_config: self.reconnect_config.clone(),
            control_rx: self.control_tx.subscribe(),
            link: Link::Handshaking,
            stopped: self.stopped.clone(),
        };
        let handle = tokio::spawn(supervisor.run(event_loop));

        *self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn publish(
        &self,
        token: PublishToken,
        request: &PublishRequest,
    ) -> Result<(), EngineFailure> {
        if self.is_stopped() {
            return Err(EngineFailure::closed("engine stopped"));
        }

        // Queue order must match tracker order, so both happen under one lock
        let mut in_flight = lock_tracker(&self.in_flight);
        in_flight.expect_outgoing(request.qos.is_acknowledged().then_some(token));
        if let Err(e) = self.client.try_publish(
            request.topic.as_str(),
            request.qos.into(),
            request.retain,
            request.payload.to_vec(),
        ) {
            in_flight.discard_last();
            return Err(classify_client_error(&e));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), EngineFailure> {
        if self.is_stopped() {
            return Err(EngineFailure::closed("engine stopped"));
        }

        self.client
            .try_disconnect()
            .map_err(|e| classify_client_error(&e))?;
        self.control_tx.send_replace(Control::Disconnect);
        Ok(())
    }

    fn shutdown(&self) {
        self.control_tx.send_replace(Control::Shutdown);
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for RumqttcEngine {
    fn drop(&mut self) {
        // Can't send DISCONNECT here; callers disconnect explicitly for a clean close
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::QualityOfService;
    use crate::transport::mqtt::ConnectionConfigBuilder;
    use tokio::sync::mpsc;

    fn plaintext_config() -> ConnectionConfig {
        ConnectionConfigBuilder::new()
            .with_endpoint("mqtt://127.0.0.1:1")
            .with_client_id("engine-unit")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        // Arrange
        let (_control_tx, mut control_rx) = watch::channel(Control::Run);

        // Act
        let result =
            RumqttcEngine::interruptible_sleep(&mut control_rx, Duration::from_millis(10)).await;

        // Assert
        assert_eq!(result, None, "Sleep should complete without interruption");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted_by_disconnect() {
        // Arrange
        let (control_tx, mut control_rx) = watch::channel(Control::Run);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = control_tx.send(Control::Disconnect);
        });

        // Act
        let result =
            RumqttcEngine::interruptible_sleep(&mut control_rx, Duration::from_secs(5)).await;

        // Assert
        assert_eq!(result, Some(Control::Disconnect));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_sender_dropped() {
        let (control_tx, mut control_rx) = watch::channel(Control::Run);
        drop(control_tx);

        let result =
            RumqttcEngine::interruptible_sleep(&mut control_rx, Duration::from_secs(5)).await;

        assert_eq!(result, Some(Control::Shutdown));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let engine = RumqttcEngine::new(&plaintext_config());
        let (events_tx, _events_rx) = mpsc::unbounded_channel();

        engine.start(events_tx.clone()).await.unwrap();
        let second = engine.start(events_tx).await;

        assert!(second.is_err(), "Event loop can only be started once");
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_connect_failure_reported_once_and_supervisor_stops() {
        // Arrange: nothing listens on port 1
        let engine = RumqttcEngine::new(&plaintext_config());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        // Act
        engine.start(events_tx).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(10), events_rx.recv())
            .await
            .expect("engine should report the handshake outcome");

        // Assert
        assert!(
            matches!(event, Some(EngineEvent::ConnectCompleted(Err(_)))),
            "got: {event:?}"
        );
        let end = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
            .await
            .expect("event stream should end");
        assert!(end.is_none());
        assert!(engine.is_stopped());
    }

    #[tokio::test]
    async fn test_publish_after_stop_is_closed() {
        let engine = RumqttcEngine::new(&plaintext_config());
        engine.stopped.store(true, Ordering::SeqCst);

        let request = PublishRequest::new("a/b", "x", QualityOfService::AtLeastOnce);
        let result = engine.publish(1, &request).await;

        assert_eq!(
            result.unwrap_err().kind,
            crate::transport::FailureKind::Closed
        );
        assert_eq!(lock_tracker(&engine.in_flight).outstanding(), 0);
    }

    #[tokio::test]
    async fn test_publish_rejected_when_queue_full() {
        // Arrange: capacity 1 and no event loop draining the queue
        let config = ConnectionConfigBuilder::new()
            .with_endpoint("mqtt://127.0.0.1:1")
            .with_client_id("engine-unit")
            .with_request_capacity(1)
            .build()
            .unwrap();
        let engine = RumqttcEngine::new(&config);
        let request = PublishRequest::new("a/b", "x", QualityOfService::AtLeastOnce);

        // Act
        engine.publish(1, &request).await.unwrap();
        let second = engine.publish(2, &request).await;

        // Assert
        assert_eq!(
            second.unwrap_err().kind,
            crate::transport::FailureKind::QueueFull
        );
        assert_eq!(lock_tracker(&engine.in_flight).outstanding(), 1);
    }
}
