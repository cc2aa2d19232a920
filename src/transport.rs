use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::signal::PeripheralId;


// https://www.bluetooth.com/specifications/assigned-numbers/
pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);


/// A BLE central as seen by the connection machine.
///
/// Every method is a request that returns immediately. Results come back later as
/// [`TransportEvent`](crate::signal::TransportEvent)s on the machine's queue.
pub trait Transport: Send + 'static {
    fn scan(&mut self, service_filter: &[Uuid]);

    fn stop_scan(&mut self);

    fn connect(&mut self, id: &PeripheralId);

    fn cancel_connection(&mut self, id: &PeripheralId);

    fn discover_services(&mut self, id: &PeripheralId, uuids: &[Uuid]);

    fn discover_characteristics(&mut self, id: &PeripheralId, uuids: &[Uuid], service: Uuid);

    fn set_notify(&mut self, id: &PeripheralId, enabled: bool, characteristic: Uuid);

    /// Requests still running in the background, awaited on shutdown so a final
    /// disconnect actually reaches the adapter.
    fn in_flight(&self) -> Option<TaskTracker> {
        None
    }
}


/// Runs requests one after another in the order they were pushed.
///
/// Each request is a tracked task that first waits for the one before it, so a
/// `stop_scan` followed by a `scan` reaches the adapter in that order.
pub struct RequestQueue {
    tasks: TaskTracker,
    last: Option<JoinHandle<()>>,
}

impl RequestQueue {
    pub fn new(tasks: TaskTracker) -> Self {
        RequestQueue { tasks, last: None }
    }

    pub fn push<F>(&mut self, request: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.last.take();
        self.last = Some(self.tasks.spawn(async move {
            if let Some(previous) = previous {
                // a panicked or aborted predecessor does not hold up the rest
                let _ = previous.await;
            }
            request.await;
        }));
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn requests_complete_in_push_order() {
        let tasks = TaskTracker::new();
        let mut queue = RequestQueue::new(tasks.clone());
        let done = Arc::new(Mutex::new(Vec::new()));

        // slowest first: unordered tasks would finish in reverse
        for (name, delay) in [("stop_scan", 30), ("scan", 10), ("connect", 0)] {
            let done = done.clone();
            queue.push(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.lock().unwrap().push(name);
            });
        }

        tasks.close();
        tasks.wait().await;
        assert_eq!(*done.lock().unwrap(), vec!["stop_scan", "scan", "connect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_request_does_not_block_the_next() {
        let tasks = TaskTracker::new();
        let mut queue = RequestQueue::new(tasks.clone());
        let done = Arc::new(Mutex::new(Vec::new()));

        queue.push(async { panic!("adapter went away"); });
        let after = done.clone();
        queue.push(async move { after.lock().unwrap().push("disconnect") });

        tasks.close();
        tasks.wait().await;
        assert_eq!(*done.lock().unwrap(), vec!["disconnect"]);
    }
}
