use thiserror::Error;

use crate::signal::AdapterState;


/// Failure to interpret a Heart Rate Measurement value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed heart rate payload: needed {needed} bytes, got {actual}")]
    MalformedPayload { needed: usize, actual: usize },
}

/// Everything that can go wrong with the link. Never fatal: the machine turns each of these
/// into a status message and a transition. The `Display` text is the status message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("{}", unavailable_message(.0))]
    TransportUnavailable(AdapterState),
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),
    #[error("Disconnected from WHOOP")]
    LinkLost(Option<String>),
    #[error("Heart rate service not found")]
    ServiceNotFound,
    #[error("Heart rate characteristic not found")]
    CharacteristicNotFound,
    #[error("Failed to subscribe to heart rate: {0}")]
    SubscribeFailed(String),
    #[error("Scan failed: {0}")]
    ScanFailed(String),
    #[error("Timed out setting up heart rate notifications")]
    NegotiationTimedOut,
}

fn unavailable_message(state: &AdapterState) -> &'static str {
    match state {
        AdapterState::PoweredOff => "Bluetooth is powered off",
        AdapterState::Unauthorized => "Bluetooth permission denied",
        AdapterState::Unsupported => "Bluetooth not supported",
        AdapterState::PoweredOn | AdapterState::Unknown => "Bluetooth unavailable",
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_states_map_to_status_text() {
        assert_eq!(
            LinkError::TransportUnavailable(AdapterState::PoweredOff).to_string(),
            "Bluetooth is powered off"
        );
        assert_eq!(
            LinkError::TransportUnavailable(AdapterState::Unauthorized).to_string(),
            "Bluetooth permission denied"
        );
        assert_eq!(
            LinkError::TransportUnavailable(AdapterState::Unsupported).to_string(),
            "Bluetooth not supported"
        );
        assert_eq!(
            LinkError::TransportUnavailable(AdapterState::Unknown).to_string(),
            "Bluetooth unavailable"
        );
    }

    #[test]
    fn link_failures_are_distinguishable_in_text() {
        let failed = LinkError::ConnectFailed("Unknown error".into()).to_string();
        let lost = LinkError::LinkLost(None).to_string();
        assert_eq!(failed, "Failed to connect: Unknown error");
        assert_eq!(lost, "Disconnected from WHOOP");
        assert_ne!(failed, lost);
    }
}
