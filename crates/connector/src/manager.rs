//! Connection manager: owns the platform stream and its lifecycle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ConnectorError;
use crate::handlers::HandlerRegistry;
use crate::metrics;
use crate::monitor::ConnectionMonitor;
use crate::observer::ObserverState;
use crate::reconnect::{ReconnectProcedure, ReconnectionStrategy};
use crate::router::{EventRouter, InboundHandler};
use wflink_metadata::PlatformConfig;
use wflink_middleware::{StreamSignal, StreamSink, Transport, TransportError};
use wflink_wire::{Codec, EventAck, Inbound, InboundEvent, JoinEvent, OutboundEvent};

/// Sink of one opened stream; its async mutex serialises writers
type SharedSink = Arc<tokio::sync::Mutex<Box<dyn StreamSink>>>;

/// Opens the stream, performs the join/greet handshake, writes outbound
/// events, and hands every inbound frame to the router.
///
/// The slot holding the active sink is only locked long enough to clone or
/// swap it, so replacing a stream never waits behind a stalled writer.
/// Lock wait plus write, and every close, are bounded by the write timeout.
/// Each opened stream gets a generation number; signals and queued events
/// from an older generation are dropped.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    codec: Codec,
    router: Arc<EventRouter>,
    monitor: Arc<ConnectionMonitor>,
    reconnect: Arc<ReconnectionStrategy>,
    handlers: Arc<HandlerRegistry>,
    tags: Vec<String>,
    write_timeout: Duration,
    stream: Mutex<Option<SharedSink>>,
    generation: AtomicU64,
    shutting_down: AtomicBool,
    this: Weak<ConnectionManager>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        codec: Codec,
        router: Arc<EventRouter>,
        monitor: Arc<ConnectionMonitor>,
        reconnect: Arc<ReconnectionStrategy>,
        handlers: Arc<HandlerRegistry>,
        platform: &PlatformConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            transport,
            codec,
            router,
            monitor,
            reconnect,
            handlers,
            tags: platform.tags.clone(),
            write_timeout: platform.write_timeout(),
            stream: Mutex::new(None),
            generation: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    pub fn observer_state(&self) -> ObserverState {
        self.monitor.observer_state()
    }

    /// Connect once; on failure hand over to the reconnection strategy
    /// instead of failing startup
    pub async fn start(&self) {
        match self.connect().await {
            Ok(()) => info!("Platform stream established"),
            Err(e) => {
                warn!(error = %e, "Initial connection failed, scheduling reconnection");
                self.schedule_reconnect();
            }
        }
    }

    /// Open a new stream and send the join handshake.
    ///
    /// Leaves the observer in `AwaitsGreet` on success and `Disconnected` on
    /// any failure. A previously open stream is closed once the new one is up.
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(ConnectorError::ShutDown);
        }

        self.monitor.track_observer_state(ObserverState::Connecting);
        let channel = match self.transport.open().await {
            Ok(channel) => channel,
            Err(e) => {
                self.monitor.track_observer_state(ObserverState::Disconnected);
                return Err(e.into());
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(channel.sink));
        let superseded = lock(&self.stream).replace(sink);
        if let Some(old) = superseded {
            self.close_sink(old).await;
        }
        self.monitor.track_observer_state(ObserverState::Connected);
        info!(generation, "Stream opened, sending join");

        let join = OutboundEvent::Join(JoinEvent {
            id: Uuid::new_v4().to_string(),
            tags: self.tags.clone(),
        });
        if let Err(e) = self.send_event(join).await {
            error!(generation, error = %e, "Join handshake failed");
            self.close_stream().await;
            self.monitor.track_observer_state(ObserverState::Disconnected);
            return Err(e);
        }
        self.monitor.transition_observer(ObserverState::Connected, ObserverState::AwaitsGreet);

        // Reader starts only now so a fast greet cannot arrive before AwaitsGreet
        self.spawn_reader(generation, channel.signals);
        Ok(())
    }

    /// Encode and write one event. The envelope is tracked for
    /// acknowledgment before the write and forgotten again if the write
    /// fails; acks themselves are not tracked.
    pub async fn send_event(&self, event: OutboundEvent) -> Result<(), ConnectorError> {
        let event_type = event.event_type();
        let (envelope, text) = match self
            .codec
            .encode(&event)
            .and_then(|env| self.codec.to_text(&env).map(|text| (env, text)))
        {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(event_type = %event_type, error = %e, "Failed to encode outbound event, dropping");
                return Err(e.into());
            }
        };

        let sink = lock(&self.stream).clone().ok_or(ConnectorError::NotConnected)?;
        let tracked = !matches!(event, OutboundEvent::Ack(_));
        let write = async {
            let mut sink = sink.lock().await;
            if tracked {
                self.monitor.track_event_sent(&envelope);
            }
            sink.send(text).await
        };

        let result = match tokio::time::timeout(self.write_timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SendFailed(format!(
                "write timed out after {:?}",
                self.write_timeout
            ))),
        };
        if let Err(e) = result {
            if tracked {
                self.monitor.untrack(&envelope.id);
            }
            warn!(event_id = %envelope.id, event_type = %event_type, error = %e, "Event write failed");
            return Err(e.into());
        }

        debug!(event_id = %envelope.id, event_type = %event_type, "Event sent");
        metrics::inc_event_sent(event_type.as_str());
        Ok(())
    }

    /// Close the stream for good; no reconnection follows
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down connection manager");
        self.reconnect.shutdown();
        // Invalidate the reader of the current stream
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.close_stream().await;
        self.monitor.track_observer_state(ObserverState::Disconnected);
        self.transport.shutdown();
    }

    async fn close_stream(&self) {
        let current = lock(&self.stream).take();
        if let Some(sink) = current {
            self.close_sink(sink).await;
        }
    }

    /// Close a sink already removed from the slot. A writer stuck on it
    /// holds its lock for at most the write timeout.
    async fn close_sink(&self, sink: SharedSink) {
        let closing = async { sink.lock().await.close().await };
        match tokio::time::timeout(self.write_timeout, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Stream close failed"),
            Err(_) => warn!(
                timeout_ms = self.write_timeout.as_millis() as u64,
                "Stream close timed out, abandoning stream"
            ),
        }
    }

    fn spawn_reader(&self, generation: u64, mut signals: mpsc::Receiver<StreamSignal>) {
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let handler: Arc<dyn InboundHandler> = Arc::new(StreamScope {
                manager: Arc::clone(&manager),
                generation,
            });
            let reason = loop {
                match signals.recv().await {
                    Some(StreamSignal::Message(text)) => {
                        if !manager.is_current(generation) {
                            debug!(generation, "Message on superseded stream ignored");
                            return;
                        }
                        manager.router.dispatch(&text, Arc::clone(&handler));
                    }
                    Some(StreamSignal::Error(e)) => break Some(e),
                    Some(StreamSignal::Completed) | None => break None,
                }
            };
            manager.on_stream_terminated(generation, reason);
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn on_stream_terminated(&self, generation: u64, error: Option<String>) {
        if self.shutting_down.load(Ordering::Acquire) || !self.is_current(generation) {
            debug!(generation, "Termination of superseded stream ignored");
            return;
        }
        match &error {
            Some(e) => warn!(generation, error = %e, "Stream failed"),
            None => warn!(generation, "Stream completed by platform"),
        }
        self.monitor.track_observer_state(ObserverState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        let this = self.this.clone();
        let procedure: ReconnectProcedure = Arc::new(move || {
            let this = this.clone();
            Box::pin(async move {
                let manager = this.upgrade().ok_or(ConnectorError::ShutDown)?;
                manager.close_stream().await;
                manager.connect().await
            })
        });
        self.reconnect.request_reconnection(procedure);
    }

    fn on_greet(&self) {
        if self
            .monitor
            .transition_observer(ObserverState::AwaitsGreet, ObserverState::Ready)
        {
            info!("Greet received, connection ready");
        } else {
            warn!(state = %self.observer_state(), "Greet received outside of handshake, ignoring");
        }
    }
}

/// Handles events of one stream generation. Events still queued in a pool
/// when their stream is replaced are dropped, so a stale greet cannot mark
/// the new stream ready.
struct StreamScope {
    manager: Arc<ConnectionManager>,
    generation: u64,
}

#[async_trait]
impl InboundHandler for StreamScope {
    async fn handle(&self, inbound: Inbound) -> Result<(), ConnectorError> {
        if !self.manager.is_current(self.generation) {
            debug!(
                generation = self.generation,
                event_id = %inbound.id,
                "Event from superseded stream dropped"
            );
            return Ok(());
        }
        self.manager.handle_inbound(inbound).await
    }
}

impl ConnectionManager {
    async fn handle_inbound(&self, inbound: Inbound) -> Result<(), ConnectorError> {
        let Inbound {
            id: envelope_id,
            event,
            ..
        } = inbound;
        match event {
            InboundEvent::Greet(_) => {
                self.on_greet();
                Ok(())
            }
            InboundEvent::KeepAlive(keep_alive) => {
                self.monitor.track_keep_alive(keep_alive.timestamp);
                let ack = EventAck {
                    id: Some(Uuid::new_v4().to_string()),
                    ..EventAck::success(envelope_id)
                };
                self.send_event(OutboundEvent::Ack(ack)).await
            }
            InboundEvent::Ack(ack) => {
                self.monitor.track_acknowledge(&ack);
                Ok(())
            }
            InboundEvent::ProcessorRequest(request) => {
                let response = self.handlers.process(&request).await;
                self.send_event(OutboundEvent::ProcessorResponse(response))
                    .await
            }
            InboundEvent::CriteriaRequest(request) => {
                let response = self.handlers.evaluate(&request).await;
                self.send_event(OutboundEvent::CriteriaResponse(response))
                    .await
            }
            InboundEvent::Other { event_type, .. } => {
                warn!(event_id = %envelope_id, event_type = %event_type, "No handler for inbound event type");
                Ok(())
            }
        }
    }
}
