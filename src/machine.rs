//! Connection lifecycle for a single heart rate peripheral.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> DiscoveringServices -> DiscoveringCharacteristics -> Subscribed
//!            ^            |                  |                         |                    |
//!            |            +------------------+-------------------------+--------------------+
//!            |                               v
//!            +------------- (backoff) -- Disconnected
//! ```
//!
//! Everything runs on one task: transport results, presentation commands and timer expiries
//! all arrive as [`Event`]s on the same queue and are handled one at a time.

use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::LinkConfig;
use crate::decoder::decode_heart_rate;
use crate::error::LinkError;
use crate::history::{Reading, RetentionWindow};
use crate::signal::{AdapterState, Command, Event, EventSink, PeripheralId, TransportEvent};
use crate::status::{LinkStatus, StatusPublisher, SCANNING_MESSAGE};
use crate::transport::{Transport, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};


const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Subscribed,
    Disconnected,
}

impl LinkState {
    /// A peripheral is targeted and the link is being set up or in use.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            LinkState::Connecting
                | LinkState::DiscoveringServices
                | LinkState::DiscoveringCharacteristics
                | LinkState::Subscribed
        )
    }
}

/// What we know about the targeted peripheral. Reset to `None` whenever the link drops.
#[derive(Debug, Clone)]
struct ConnectionContext {
    peripheral: PeripheralId,
    name: String,
    service: Option<Uuid>,
    characteristic: Option<Uuid>,
}

/// A timer that will post an event back onto the queue.
#[derive(Debug)]
struct Deferred {
    generation: u64,
    task: JoinHandle<()>,
}

impl Deferred {
    fn cancel(self) {
        self.task.abort();
    }
}

pub struct ConnectionMachine<T: Transport> {
    config: LinkConfig,
    transport: T,
    sink: EventSink,
    status: StatusPublisher,
    history: RetentionWindow,
    state: LinkState,
    adapter_ready: bool,
    context: Option<ConnectionContext>,
    reconnect: Option<Deferred>,
    negotiation: Option<Deferred>,
    generation: u64,
}

impl<T: Transport> ConnectionMachine<T> {
    /// `sink` must feed the queue this machine's events are read from, since timers post
    /// their expiry through it.
    pub fn new(config: LinkConfig, transport: T, sink: EventSink) -> Self {
        let history = RetentionWindow::new(config.history_window);
        ConnectionMachine {
            config,
            transport,
            sink,
            status: StatusPublisher::new(),
            history,
            state: LinkState::Idle,
            adapter_ready: false,
            context: None,
            reconnect: None,
            negotiation: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn history(&self) -> &RetentionWindow {
        &self.history
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    pub fn handle(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Transport(event) => self.on_transport(event),
            Event::Command(Command::Rescan) => self.rescan(),
            Event::Command(Command::Disconnect) => self.request_disconnect(),
            Event::Command(Command::Shutdown) => {
                self.shutdown();
                return ControlFlow::Break(());
            }
            Event::ReconnectDue(generation) => self.on_reconnect_due(generation),
            Event::NegotiationTimeout(generation) => self.on_negotiation_timeout(generation),
        }
        ControlFlow::Continue(())
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => self.on_adapter_state(state),
            TransportEvent::PeripheralDiscovered { id, name, .. } => self.on_discovered(id, name),
            TransportEvent::ScanFailed { error } => {
                if self.state == LinkState::Scanning {
                    self.link_down(LinkError::ScanFailed(error));
                }
            }
            TransportEvent::Connected(id) => self.on_connected(id),
            TransportEvent::ConnectFailed { id, error } => {
                let error = error.unwrap_or_else(|| "Unknown error".to_string());
                self.on_link_event(&id, LinkError::ConnectFailed(error));
            }
            TransportEvent::Disconnected { id, error } => {
                self.on_link_event(&id, LinkError::LinkLost(error));
            }
            TransportEvent::ServicesDiscovered { id, services, error } => {
                self.on_services(id, services, error)
            }
            TransportEvent::CharacteristicsDiscovered { id, service, characteristics, error } => {
                self.on_characteristics(id, service, characteristics, error)
            }
            TransportEvent::NotifyStateChanged { id, characteristic, enabled, error } => {
                if !self.is_target(&id) || characteristic != HEART_RATE_MEASUREMENT_UUID {
                    return;
                }
                match error {
                    Some(error) if enabled => self.abandon(LinkError::SubscribeFailed(error)),
                    Some(error) => debug!("disabling notifications failed: {error}"),
                    None => info!("heart rate notifications enabled: {enabled}"),
                }
            }
            TransportEvent::ValueUpdated { id, characteristic, value } => {
                self.on_value(id, characteristic, value)
            }
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        if state.is_ready() {
            self.adapter_ready = true;
            if self.state == LinkState::Idle {
                self.start_scanning();
            } else {
                debug!("adapter ready while {:?}, nothing to do", self.state);
            }
            return;
        }

        self.adapter_ready = false;
        let error = LinkError::TransportUnavailable(state);
        warn!("{error}");
        self.cancel_timers();
        if self.state == LinkState::Scanning {
            self.transport.stop_scan();
        }
        if let Some(context) = self.context.take() {
            self.transport.cancel_connection(&context.peripheral);
        }
        self.transition(LinkState::Idle);
        self.publish(|s| {
            s.connected = false;
            s.current_heart_rate = None;
            s.device_name = None;
            s.status_message = error.to_string();
        });
    }

    fn on_discovered(&mut self, id: PeripheralId, name: Option<String>) {
        if self.state != LinkState::Scanning {
            return;
        }
        let Some(name) = name.filter(|name| name.contains(&self.config.name_filter)) else {
            trace!("skipping peripheral {id}");
            return;
        };

        info!("found matching peripheral {name:?} ({id})");
        self.transport.stop_scan();
        self.context = Some(ConnectionContext {
            peripheral: id.clone(),
            name: name.clone(),
            service: None,
            characteristic: None,
        });
        self.transition(LinkState::Connecting);
        self.publish(|s| {
            s.status_message = format!("Found WHOOP device: {name}");
            s.device_name = Some(name.clone());
        });
        self.arm_negotiation();
        self.transport.connect(&id);
    }

    fn on_connected(&mut self, id: PeripheralId) {
        if !self.is_target(&id) || self.state != LinkState::Connecting {
            debug!("ignoring connection of {id} while {:?}", self.state);
            return;
        }
        self.transition(LinkState::DiscoveringServices);
        self.publish(|s| {
            s.connected = true;
            s.status_message = "Connected to WHOOP".to_string();
        });
        self.transport.discover_services(&id, &[HEART_RATE_SERVICE_UUID]);
    }

    fn on_services(&mut self, id: PeripheralId, services: Vec<Uuid>, error: Option<String>) {
        if !self.is_target(&id) || self.state != LinkState::DiscoveringServices {
            return;
        }
        if let Some(error) = error {
            debug!("service discovery on {id} failed: {error}");
        }
        if !services.contains(&HEART_RATE_SERVICE_UUID) {
            self.abandon(LinkError::ServiceNotFound);
            return;
        }

        if let Some(context) = self.context.as_mut() {
            context.service = Some(HEART_RATE_SERVICE_UUID);
        }
        self.transition(LinkState::DiscoveringCharacteristics);
        self.transport.discover_characteristics(
            &id,
            &[HEART_RATE_MEASUREMENT_UUID],
            HEART_RATE_SERVICE_UUID,
        );
    }

    fn on_characteristics(
        &mut self,
        id: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
        error: Option<String>,
    ) {
        let expected = self.context.as_ref().and_then(|c| c.service);
        if !self.is_target(&id)
            || self.state != LinkState::DiscoveringCharacteristics
            || expected != Some(service)
        {
            return;
        }
        if let Some(error) = error {
            debug!("characteristic discovery on {id} failed: {error}");
        }
        if !characteristics.contains(&HEART_RATE_MEASUREMENT_UUID) {
            self.abandon(LinkError::CharacteristicNotFound);
            return;
        }

        if let Some(context) = self.context.as_mut() {
            context.characteristic = Some(HEART_RATE_MEASUREMENT_UUID);
        }
        self.disarm_negotiation();
        self.transition(LinkState::Subscribed);
        self.publish(|_| {});
        self.transport.set_notify(&id, true, HEART_RATE_MEASUREMENT_UUID);
    }

    fn on_value(&mut self, id: PeripheralId, characteristic: Uuid, value: Vec<u8>) {
        if !self.is_target(&id)
            || self.state != LinkState::Subscribed
            || characteristic != HEART_RATE_MEASUREMENT_UUID
        {
            trace!("ignoring notification from {id} for {characteristic}");
            return;
        }

        let heart_rate = match decode_heart_rate(&value) {
            Ok(heart_rate) => heart_rate,
            Err(error) => {
                debug!("dropping notification {value:02x?}: {error}");
                return;
            }
        };
        trace!("heart rate: {heart_rate}");

        let reading = Reading::new(tokio::time::Instant::now().into_std(), heart_rate);
        self.history.record(reading);
        let history = self.history.snapshot();
        self.publish(|s| {
            s.current_heart_rate = Some(heart_rate);
            s.status_message = "Receiving heart rate data".to_string();
            s.history = history;
        });
    }

    /// Disconnect or connect failure reported by the transport.
    fn on_link_event(&mut self, id: &PeripheralId, error: LinkError) {
        match &self.context {
            Some(context) if context.peripheral == *id => self.link_down(error),
            None if self.state == LinkState::Disconnected => {
                debug!("{id}: {error} while already disconnected");
                self.schedule_reconnect();
            }
            _ => debug!("ignoring stale link event for {id}: {error}"),
        }
    }

    /// Tear down our side of a link that is no good and go through the backoff.
    fn abandon(&mut self, error: LinkError) {
        if let Some(context) = &self.context {
            info!("giving up on {} ({})", context.name, context.peripheral);
            self.transport.cancel_connection(&context.peripheral);
        }
        self.link_down(error);
    }

    fn link_down(&mut self, error: LinkError) {
        warn!("{error}");
        self.disarm_negotiation();
        self.context = None;
        self.transition(LinkState::Disconnected);
        self.publish(|s| {
            s.connected = false;
            s.current_heart_rate = None;
            s.device_name = None;
            s.status_message = error.to_string();
        });
        self.schedule_reconnect();
    }

    fn start_scanning(&mut self) {
        self.context = None;
        if !self.adapter_ready {
            self.transition(LinkState::Idle);
            self.publish(|s| s.status_message = "Bluetooth is not available".to_string());
            return;
        }

        self.transition(LinkState::Scanning);
        self.publish(|s| {
            s.connected = false;
            s.current_heart_rate = None;
            s.device_name = None;
            s.status_message = SCANNING_MESSAGE.to_string();
        });
        self.transport.scan(&[HEART_RATE_SERVICE_UUID]);
    }

    fn rescan(&mut self) {
        info!("rescan requested");
        self.cancel_timers();
        if let Some(context) = self.context.take() {
            self.transport.cancel_connection(&context.peripheral);
        }
        if self.state == LinkState::Scanning {
            self.transport.stop_scan();
        }
        self.start_scanning();
    }

    fn request_disconnect(&mut self) {
        match &self.context {
            Some(context) => {
                info!("disconnecting from {}", context.name);
                self.transport.cancel_connection(&context.peripheral);
            }
            None => debug!("disconnect requested with no peripheral"),
        }
    }

    /// Releases everything acquired: timers, the scan and the connection.
    pub fn shutdown(&mut self) {
        self.cancel_timers();
        if self.state == LinkState::Scanning {
            self.transport.stop_scan();
        }
        if let Some(context) = self.context.take() {
            info!("disconnecting from {} on shutdown", context.name);
            if let Some(characteristic) = context.characteristic {
                self.transport.set_notify(&context.peripheral, false, characteristic);
            }
            self.transport.cancel_connection(&context.peripheral);
        }
        self.transition(LinkState::Idle);
        self.publish(|s| {
            s.connected = false;
            s.current_heart_rate = None;
            s.device_name = None;
        });
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect.is_some() {
            debug!("reconnect already pending");
            return;
        }
        let delay = self.config.reconnect_delay;
        self.reconnect = Some(self.defer(delay, Event::ReconnectDue));
    }

    fn on_reconnect_due(&mut self, generation: u64) {
        match self.reconnect.take() {
            Some(pending) if pending.generation == generation => {
                info!("reconnecting");
                self.start_scanning();
            }
            pending => {
                self.reconnect = pending;
                debug!("ignoring stale reconnect timer {generation}");
            }
        }
    }

    fn arm_negotiation(&mut self) {
        self.disarm_negotiation();
        let timeout = self.config.negotiation_timeout;
        self.negotiation = Some(self.defer(timeout, Event::NegotiationTimeout));
    }

    fn disarm_negotiation(&mut self) {
        if let Some(pending) = self.negotiation.take() {
            pending.cancel();
        }
    }

    fn on_negotiation_timeout(&mut self, generation: u64) {
        match self.negotiation.take() {
            Some(pending) if pending.generation == generation => {
                if self.state.is_active() {
                    self.abandon(LinkError::NegotiationTimedOut);
                }
            }
            pending => self.negotiation = pending,
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.cancel();
        }
        self.disarm_negotiation();
    }

    fn defer(&mut self, delay: Duration, event: fn(u64) -> Event) -> Deferred {
        self.generation += 1;
        let generation = self.generation;
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.emit(event(generation));
        });
        Deferred { generation, task }
    }

    fn is_target(&self, id: &PeripheralId) -> bool {
        self.context.as_ref().is_some_and(|c| c.peripheral == *id)
    }

    fn transition(&mut self, next: LinkState) {
        if self.state != next {
            info!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn publish(&self, update: impl FnOnce(&mut LinkStatus)) {
        let state = self.state;
        self.status.publish(|s| {
            s.state = state;
            update(s);
        });
    }
}

/// Drives a [`ConnectionMachine`] until shutdown.
pub async fn run<T: Transport>(
    mut machine: ConnectionMachine<T>,
    mut queue: UnboundedReceiver<Event>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = queue.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if machine.handle(event).is_break() {
            break;
        }
    }

    machine.shutdown();
    if let Some(tasks) = machine.transport().in_flight() {
        tasks.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait()).await.is_err() {
            warn!("transport still busy after {SHUTDOWN_GRACE:?}, exiting anyway");
        }
    }
}

/// The running machine, as seen by the rest of the program.
pub struct LinkHandle {
    sink: EventSink,
    status: watch::Receiver<LinkStatus>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl LinkHandle {
    pub fn spawn<T: Transport>(
        config: LinkConfig,
        transport: T,
        sink: EventSink,
        queue: UnboundedReceiver<Event>,
    ) -> Self {
        let machine = ConnectionMachine::new(config, transport, sink.clone());
        let status = machine.status();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(machine, queue, shutdown.clone()));
        LinkHandle {
            sink,
            status,
            shutdown,
            task,
        }
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Sender for [`Command`]s, for a presentation layer that outlives borrows of the handle.
    pub fn commands(&self) -> EventSink {
        self.sink.clone()
    }

    pub fn rescan(&self) {
        self.sink.emit(Command::Rescan);
    }

    pub fn disconnect(&self) {
        self.sink.emit(Command::Disconnect);
    }

    /// Stops the machine and waits for it to release the peripheral.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.task.await {
            warn!("connection task ended abnormally: {error}");
        }
    }
}
