//! The externally visible snapshot of the link.
//!
//! Only the connection machine writes it; any number of readers hold a
//! [`watch::Receiver`] and clone the latest value whenever they like.

use tokio::sync::watch;

use crate::history::Reading;
use crate::machine::LinkState;


pub const SCANNING_MESSAGE: &str = "Scanning for WHOOP...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub connected: bool,
    pub status_message: String,
    pub current_heart_rate: Option<u16>,
    pub device_name: Option<String>,
    pub history: Vec<Reading>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus {
            state: LinkState::Idle,
            connected: false,
            status_message: SCANNING_MESSAGE.to_string(),
            current_heart_rate: None,
            device_name: None,
            history: Vec::new(),
        }
    }
}

impl LinkStatus {
    /// Short text for a menu bar or window title.
    pub fn badge(&self) -> String {
        match (self.current_heart_rate, self.connected) {
            (Some(heart_rate), _) => format!("♥ {heart_rate}"),
            (None, true) => "♥ --".to_string(),
            (None, false) => "♥ ···".to_string(),
        }
    }
}

/// Single writer side of the status surface.
#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<LinkStatus>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LinkStatus::default());
        StatusPublisher { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.tx.subscribe()
    }

    /// Applies `update` and wakes readers only if something actually changed.
    pub fn publish(&self, update: impl FnOnce(&mut LinkStatus)) {
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }

    pub fn current(&self) -> LinkStatus {
        self.tx.borrow().clone()
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        StatusPublisher::new()
    }
}
