use std::time::Duration;

use log::{debug, info};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::signal::{AdapterState, EventSink, PeripheralId, TransportEvent};
use crate::transport::{Transport, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID};


const SIMULATED_ID: &str = "simulated-strap";
const SIMULATED_NAME: &str = "WHOOP 4C0000000";
const ADVERTISING_DELAY: Duration = Duration::from_millis(500);
const CONNECT_DELAY: Duration = Duration::from_millis(300);
const NOTIFICATION_INTERVAL: Duration = Duration::from_millis(800);
/// The strap "walks out of range" after this many notifications.
const DROP_AFTER: u32 = 300;

/// A pretend strap for running without Bluetooth hardware.
pub struct SimulatedTransport {
    sink: EventSink,
    tasks: TaskTracker,
    notifications: Option<JoinHandle<()>>,
}

impl SimulatedTransport {
    pub fn start(sink: EventSink) -> Self {
        info!("using simulated heart rate sensor");
        sink.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        SimulatedTransport {
            sink,
            tasks: TaskTracker::new(),
            notifications: None,
        }
    }

    fn after(&self, delay: Duration, event: TransportEvent) {
        let sink = self.sink.clone();
        self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            sink.emit(event);
        });
    }

    fn stop_notifications(&mut self) {
        if let Some(pump) = self.notifications.take() {
            pump.abort();
        }
    }
}

impl Transport for SimulatedTransport {
    fn scan(&mut self, service_filter: &[Uuid]) {
        if !service_filter.is_empty() && !service_filter.contains(&HEART_RATE_SERVICE_UUID) {
            return;
        }
        self.after(
            ADVERTISING_DELAY,
            TransportEvent::PeripheralDiscovered {
                id: PeripheralId::from(SIMULATED_ID),
                name: Some(SIMULATED_NAME.to_string()),
                services: vec![HEART_RATE_SERVICE_UUID],
            },
        );
    }

    fn stop_scan(&mut self) {
        debug!("simulated scan stopped");
    }

    fn connect(&mut self, id: &PeripheralId) {
        self.after(CONNECT_DELAY, TransportEvent::Connected(id.clone()));
    }

    fn cancel_connection(&mut self, id: &PeripheralId) {
        self.stop_notifications();
        self.sink.emit(TransportEvent::Disconnected { id: id.clone(), error: None });
    }

    fn discover_services(&mut self, id: &PeripheralId, uuids: &[Uuid]) {
        let services = [HEART_RATE_SERVICE_UUID]
            .into_iter()
            .filter(|uuid| uuids.is_empty() || uuids.contains(uuid))
            .collect();
        self.sink.emit(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services,
            error: None,
        });
    }

    fn discover_characteristics(&mut self, id: &PeripheralId, uuids: &[Uuid], service: Uuid) {
        let characteristics = if service == HEART_RATE_SERVICE_UUID {
            [HEART_RATE_MEASUREMENT_UUID]
                .into_iter()
                .filter(|uuid| uuids.is_empty() || uuids.contains(uuid))
                .collect()
        } else {
            Vec::new()
        };
        self.sink.emit(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            characteristics,
            error: None,
        });
    }

    fn set_notify(&mut self, id: &PeripheralId, enabled: bool, characteristic: Uuid) {
        self.stop_notifications();
        if enabled && characteristic == HEART_RATE_MEASUREMENT_UUID {
            let stream = transmit_fake_hr_data(self.sink.clone(), id.clone());
            self.notifications = Some(tokio::spawn(stream));
        }
        self.sink.emit(TransportEvent::NotifyStateChanged {
            id: id.clone(),
            characteristic,
            enabled,
            error: None,
        });
    }

    fn in_flight(&self) -> Option<TaskTracker> {
        Some(self.tasks.clone())
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}

async fn transmit_fake_hr_data(sink: EventSink, id: PeripheralId) {
    for _ in 0..DROP_AFTER {
        tokio::time::sleep(NOTIFICATION_INTERVAL).await;
        let heart_rate = rand::thread_rng().gen_range(50..70);
        let delivered = sink.emit(TransportEvent::ValueUpdated {
            id: id.clone(),
            characteristic: HEART_RATE_MEASUREMENT_UUID,
            value: encode_measurement(heart_rate),
        });
        if !delivered {
            return;
        }
    }
    sink.emit(TransportEvent::Disconnected { id, error: Some("simulated link loss".into()) });
}

/// Heart Rate Measurement value in the narrowest format that fits.
pub fn encode_measurement(heart_rate: u16) -> Vec<u8> {
    match u8::try_from(heart_rate) {
        Ok(heart_rate) => vec![0x00, heart_rate],
        Err(_) => {
            let [lo, hi] = heart_rate.to_le_bytes();
            vec![0x01, lo, hi]
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode_heart_rate;
    use crate::signal::{self, Event};

    #[test]
    fn measurements_use_sixteen_bits_only_when_needed() {
        assert_eq!(encode_measurement(75), vec![0x00, 75]);
        assert_eq!(encode_measurement(300), vec![0x01, 0x2C, 0x01]);
        assert_eq!(decode_heart_rate(&encode_measurement(300)), Ok(300));
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_strap_advertises_and_streams() {
        let (sink, mut queue) = signal::channel();
        let mut transport = SimulatedTransport::start(sink);
        assert_eq!(
            queue.recv().await,
            Some(Event::Transport(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn)))
        );

        transport.scan(&[HEART_RATE_SERVICE_UUID]);
        let Some(Event::Transport(TransportEvent::PeripheralDiscovered { id, name, .. })) =
            queue.recv().await
        else {
            panic!("expected an advertisement");
        };
        assert!(name.is_some_and(|name| name.contains("WHOOP")));

        transport.set_notify(&id, true, HEART_RATE_MEASUREMENT_UUID);
        assert!(matches!(
            queue.recv().await,
            Some(Event::Transport(TransportEvent::NotifyStateChanged { error: None, .. }))
        ));
        let Some(Event::Transport(TransportEvent::ValueUpdated { value, .. })) = queue.recv().await
        else {
            panic!("expected a notification");
        };
        let heart_rate = decode_heart_rate(&value).unwrap_or_default();
        assert!((50..70).contains(&heart_rate));
    }
}
