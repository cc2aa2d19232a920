use std::time::Duration;

use clap::Parser;

use crate::history::HISTORY_WINDOW;


pub const DEVICE_NAME_FILTER: &str = "WHOOP";
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables of the connection machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Case-sensitive substring an advertised name must contain.
    pub name_filter: String,
    pub reconnect_delay: Duration,
    pub history_window: Duration,
    /// Upper bound from starting a connection to having notifications enabled.
    pub negotiation_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            name_filter: DEVICE_NAME_FILTER.to_string(),
            reconnect_delay: RECONNECT_DELAY,
            history_window: HISTORY_WINDOW,
            negotiation_timeout: NEGOTIATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "whoophr", version, about = "Live heart rate from a WHOOP strap over Bluetooth LE")]
pub struct Args {
    /// Connect to the first heart rate sensor whose name contains this text
    #[arg(long, default_value = DEVICE_NAME_FILTER)]
    pub name_filter: String,

    /// Seconds to wait before scanning again after a lost or failed connection
    #[arg(long, value_name = "SECS", default_value_t = RECONNECT_DELAY.as_secs())]
    pub reconnect_delay_secs: u64,

    /// Seconds of heart rate history to keep
    #[arg(long, value_name = "SECS", default_value_t = HISTORY_WINDOW.as_secs())]
    pub history_secs: u64,

    /// Give up on a connection that has not delivered notifications after this many seconds
    #[arg(long, value_name = "SECS", default_value_t = NEGOTIATION_TIMEOUT.as_secs())]
    pub negotiation_timeout_secs: u64,

    /// Use a simulated sensor instead of the Bluetooth adapter
    #[arg(long)]
    pub simulate: bool,

    /// Log readings instead of opening a window
    #[arg(long)]
    pub headless: bool,
}

impl Args {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            name_filter: self.name_filter.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            history_window: Duration::from_secs(self.history_secs),
            negotiation_timeout: Duration::from_secs(self.negotiation_timeout_secs),
        }
    }
}
