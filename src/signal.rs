use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;


/// Power/permission state reported by the BLE adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

impl AdapterState {
    pub fn is_ready(self) -> bool {
        self == AdapterState::PoweredOn
    }
}

/// Transport-assigned peripheral identifier, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        PeripheralId(id.to_string())
    }
}

/// Everything a transport can report back. Each variant answers a fire-and-forget request
/// on [`Transport`](crate::transport::Transport), or is unsolicited (adapter state, link loss,
/// notifications).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterStateChanged(AdapterState),
    PeripheralDiscovered {
        id: PeripheralId,
        name: Option<String>,
        services: Vec<Uuid>,
    },
    ScanFailed {
        error: String,
    },
    Connected(PeripheralId),
    Disconnected {
        id: PeripheralId,
        error: Option<String>,
    },
    ConnectFailed {
        id: PeripheralId,
        error: Option<String>,
    },
    ServicesDiscovered {
        id: PeripheralId,
        services: Vec<Uuid>,
        error: Option<String>,
    },
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
        error: Option<String>,
    },
    NotifyStateChanged {
        id: PeripheralId,
        characteristic: Uuid,
        enabled: bool,
        error: Option<String>,
    },
    ValueUpdated {
        id: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Requests from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Rescan,
    Disconnect,
    Shutdown,
}

/// One item on the machine's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Transport(TransportEvent),
    Command(Command),
    ReconnectDue(u64),
    NegotiationTimeout(u64),
}

impl From<TransportEvent> for Event {
    fn from(event: TransportEvent) -> Self {
        Event::Transport(event)
    }
}

impl From<Command> for Event {
    fn from(command: Command) -> Self {
        Event::Command(command)
    }
}

/// Cloneable handle that pushes events onto the machine's queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<Event>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        EventSink { tx }
    }

    /// Returns false once the machine has gone away.
    pub fn emit(&self, event: impl Into<Event>) -> bool {
        self.tx.send(event.into()).is_ok()
    }
}

/// The machine's queue: the sink goes to producers, the receiver to the machine.
pub fn channel() -> (EventSink, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}
