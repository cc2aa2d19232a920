use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId as PlatformId};
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::signal::{AdapterState, EventSink, PeripheralId, TransportEvent};
use crate::transport::{RequestQueue, Transport};


/// Peripherals advertised since the last scan started, shared with the listener task.
struct Known<P> {
    peripherals: Arc<Mutex<HashMap<PeripheralId, P>>>,
}

impl<P: Clone> Known<P> {
    fn new() -> Self {
        Known { peripherals: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn insert(&self, id: PeripheralId, peripheral: P) {
        if let Ok(mut peripherals) = self.peripherals.lock() {
            peripherals.insert(id, peripheral);
        }
    }

    fn get(&self, id: &PeripheralId) -> Option<P> {
        self.peripherals.lock().ok()?.get(id).cloned()
    }

    /// Forgets everything, so the map only ever holds what the current scan has seen.
    fn new_scan(&self) {
        if let Ok(mut peripherals) = self.peripherals.lock() {
            peripherals.clear();
        }
    }
}

impl<P> Clone for Known<P> {
    fn clone(&self) -> Self {
        Known { peripherals: self.peripherals.clone() }
    }
}

/// [`Transport`] over the platform Bluetooth stack.
///
/// Scan control, subscriptions and disconnects go through one ordered [`RequestQueue`].
/// Connecting and service discovery are spawned on their own so a slow connect never holds
/// up the disconnect that cancels it. Adapter events (state changes, discoveries,
/// disconnections) are forwarded by a listener task for as long as the transport lives.
pub struct BtleplugTransport {
    adapter: Option<Adapter>,
    sink: EventSink,
    known: Known<Peripheral>,
    notifications: Arc<Mutex<Option<JoinHandle<()>>>>,
    listener: Option<JoinHandle<()>>,
    tasks: TaskTracker,
    requests: RequestQueue,
}

impl BtleplugTransport {
    /// Opens the first adapter. Having no adapter at all is reported to the machine as
    /// [`AdapterState::Unsupported`] rather than as an error.
    pub async fn start(sink: EventSink) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter_list = manager.adapters().await?;

        let tasks = TaskTracker::new();
        let mut transport = BtleplugTransport {
            adapter: None,
            sink: sink.clone(),
            known: Known::new(),
            notifications: Arc::new(Mutex::new(None)),
            listener: None,
            requests: RequestQueue::new(tasks.clone()),
            tasks,
        };

        // TODO: let the user pick the adapter when more than one is present.
        let Some(adapter) = adapter_list.into_iter().next() else {
            error!("No Bluetooth adapters found");
            sink.emit(TransportEvent::AdapterStateChanged(AdapterState::Unsupported));
            return Ok(transport);
        };
        info!(
            "using adapter {}",
            adapter.adapter_info().await.unwrap_or_else(|_| "No name adapter".to_string())
        );

        let events = adapter.events().await?;
        let state = match adapter.adapter_state().await {
            Ok(state) => adapter_state(state),
            Err(error) => {
                warn!("could not read adapter state: {error}");
                AdapterState::Unknown
            }
        };
        transport.listener = Some(tokio::spawn(listen(
            adapter.clone(),
            events,
            sink.clone(),
            transport.known.clone(),
        )));
        transport.adapter = Some(adapter);
        sink.emit(TransportEvent::AdapterStateChanged(state));

        Ok(transport)
    }

    fn lookup(&self, id: &PeripheralId) -> Option<Peripheral> {
        let peripheral = self.known.get(id);
        if peripheral.is_none() {
            warn!("unknown peripheral {id}");
        }
        peripheral
    }

    fn stop_notifications(&self) {
        if let Some(pump) = self.notifications.lock().ok().and_then(|mut pump| pump.take()) {
            pump.abort();
        }
    }
}

impl Transport for BtleplugTransport {
    fn scan(&mut self, service_filter: &[Uuid]) {
        let Some(adapter) = self.adapter.clone() else {
            self.sink.emit(TransportEvent::ScanFailed { error: "no Bluetooth adapter".into() });
            return;
        };
        self.known.new_scan();
        let filter = ScanFilter { services: service_filter.to_vec() };
        let sink = self.sink.clone();
        self.requests.push(async move {
            if let Err(error) = adapter.start_scan(filter).await {
                sink.emit(TransportEvent::ScanFailed { error: error.to_string() });
            }
        });
    }

    fn stop_scan(&mut self) {
        let Some(adapter) = self.adapter.clone() else { return; };
        self.requests.push(async move {
            if let Err(error) = adapter.stop_scan().await {
                debug!("failed to stop scan cleanly: {error}");
            }
        });
    }

    fn connect(&mut self, id: &PeripheralId) {
        let id = id.clone();
        let Some(peripheral) = self.lookup(&id) else {
            self.sink.emit(TransportEvent::ConnectFailed {
                id,
                error: Some("peripheral is no longer available".into()),
            });
            return;
        };
        let sink = self.sink.clone();
        self.tasks.spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => TransportEvent::Connected(id),
                Err(error) => TransportEvent::ConnectFailed { id, error: Some(error.to_string()) },
            };
            sink.emit(event);
        });
    }

    fn cancel_connection(&mut self, id: &PeripheralId) {
        self.stop_notifications();
        let Some(peripheral) = self.lookup(id) else { return; };
        let id = id.clone();
        self.requests.push(async move {
            if let Err(error) = peripheral.disconnect().await {
                warn!("error disconnecting from {id}: {error}");
            }
        });
    }

    fn discover_services(&mut self, id: &PeripheralId, uuids: &[Uuid]) {
        let Some(peripheral) = self.lookup(id) else { return; };
        let id = id.clone();
        let wanted = uuids.to_vec();
        let sink = self.sink.clone();
        self.tasks.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => TransportEvent::ServicesDiscovered {
                    id,
                    services: peripheral
                        .services()
                        .iter()
                        .map(|service| service.uuid)
                        .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                        .collect(),
                    error: None,
                },
                Err(error) => TransportEvent::ServicesDiscovered {
                    id,
                    services: Vec::new(),
                    error: Some(error.to_string()),
                },
            };
            sink.emit(event);
        });
    }

    fn discover_characteristics(&mut self, id: &PeripheralId, uuids: &[Uuid], service: Uuid) {
        let Some(peripheral) = self.lookup(id) else { return; };
        // btleplug resolves characteristics together with the services
        let characteristics = peripheral
            .services()
            .into_iter()
            .filter(|s| s.uuid == service)
            .flat_map(|s| s.characteristics)
            .map(|c| c.uuid)
            .filter(|uuid| uuids.is_empty() || uuids.contains(uuid))
            .collect();
        self.sink.emit(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            characteristics,
            error: None,
        });
    }

    fn set_notify(&mut self, id: &PeripheralId, enabled: bool, characteristic: Uuid) {
        let Some(peripheral) = self.lookup(id) else { return; };
        let id = id.clone();
        let sink = self.sink.clone();

        let target = peripheral.characteristics().into_iter().find(|c| {
            c.uuid == characteristic && c.properties.contains(CharPropFlags::NOTIFY)
        });
        let Some(target) = target else {
            sink.emit(TransportEvent::NotifyStateChanged {
                id,
                characteristic,
                enabled,
                error: Some("characteristic does not support notifications".into()),
            });
            return;
        };

        if !enabled {
            self.stop_notifications();
            self.requests.push(async move {
                let error = peripheral.unsubscribe(&target).await.err().map(|e| e.to_string());
                sink.emit(TransportEvent::NotifyStateChanged {
                    id,
                    characteristic,
                    enabled,
                    error,
                });
            });
            return;
        }

        let slot = self.notifications.clone();
        self.requests.push(async move {
            // Take the stream before subscribing so the first value is not missed.
            let subscribed = async {
                let stream = peripheral.notifications().await?;
                peripheral.subscribe(&target).await?;
                Ok::<_, btleplug::Error>(stream)
            }
            .await;

            let mut stream = match subscribed {
                Ok(stream) => stream,
                Err(error) => {
                    sink.emit(TransportEvent::NotifyStateChanged {
                        id,
                        characteristic,
                        enabled,
                        error: Some(error.to_string()),
                    });
                    return;
                }
            };

            let forward = sink.clone();
            let forward_id = id.clone();
            let pump = tokio::spawn(async move {
                // Process while the BLE connection is not broken or stopped.
                while let Some(data) = stream.next().await {
                    let delivered = forward.emit(TransportEvent::ValueUpdated {
                        id: forward_id.clone(),
                        characteristic: data.uuid,
                        value: data.value,
                    });
                    if !delivered {
                        break;
                    }
                }
                debug!("notification stream for {forward_id} ended");
            });
            if let Ok(mut slot) = slot.lock() {
                if let Some(previous) = slot.replace(pump) {
                    previous.abort();
                }
            }
            sink.emit(TransportEvent::NotifyStateChanged {
                id,
                characteristic,
                enabled,
                error: None,
            });
        });
    }

    fn in_flight(&self) -> Option<TaskTracker> {
        Some(self.tasks.clone())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.stop_notifications();
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn listen<S>(adapter: Adapter, mut events: S, sink: EventSink, known: Known<Peripheral>)
where
    S: Stream<Item = CentralEvent> + Unpin,
{
    while let Some(event) = events.next().await {
        let delivered = match event {
            CentralEvent::StateUpdate(state) => {
                sink.emit(TransportEvent::AdapterStateChanged(adapter_state(state)))
            }
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Ok(peripheral) = adapter.peripheral(&id).await else { continue; };
                let Ok(Some(properties)) = peripheral.properties().await else { continue; };
                let key = peripheral_key(&id);
                known.insert(key.clone(), peripheral);
                sink.emit(TransportEvent::PeripheralDiscovered {
                    id: key,
                    name: properties.local_name,
                    services: properties.services,
                })
            }
            CentralEvent::DeviceDisconnected(id) => sink.emit(TransportEvent::Disconnected {
                id: peripheral_key(&id),
                error: None,
            }),
            _ => true,
        };
        if !delivered {
            break;
        }
    }
    debug!("adapter event stream closed");
}

fn peripheral_key(id: &PlatformId) -> PeripheralId {
    PeripheralId(format!("{id:?}"))
}

fn adapter_state(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_scan_forgets_earlier_peripherals() {
        let known = Known::new();
        let listener = known.clone();
        listener.insert(PeripheralId::from("strap-1"), "WHOOP 4C0000000");
        listener.insert(PeripheralId::from("watch"), "Forerunner");
        assert_eq!(known.get(&PeripheralId::from("strap-1")), Some("WHOOP 4C0000000"));

        known.new_scan();
        assert_eq!(known.get(&PeripheralId::from("strap-1")), None);
        assert_eq!(known.get(&PeripheralId::from("watch")), None);

        listener.insert(PeripheralId::from("strap-1"), "WHOOP 4C0000000");
        assert_eq!(known.get(&PeripheralId::from("strap-1")), Some("WHOOP 4C0000000"));
    }

    #[test]
    fn central_states_map_onto_adapter_states() {
        assert_eq!(adapter_state(CentralState::PoweredOn), AdapterState::PoweredOn);
        assert_eq!(adapter_state(CentralState::PoweredOff), AdapterState::PoweredOff);
        assert_eq!(adapter_state(CentralState::Unknown), AdapterState::Unknown);
    }
}
