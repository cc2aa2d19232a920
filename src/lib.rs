//! Live heart rate from a WHOOP strap (or any sensor exposing the standard Heart Rate
//! service) over Bluetooth LE.
//!
//! [`machine`] owns the connection lifecycle and is fed by a [`transport::Transport`]:
//! [`bthr::BtleplugTransport`] for real hardware, [`fake::SimulatedTransport`] for running
//! without it. Readers follow the link through the [`status::LinkStatus`] snapshot.

pub mod bthr;
pub mod config;
pub mod decoder;
pub mod error;
pub mod fake;
pub mod history;
pub mod machine;
pub mod signal;
pub mod status;
pub mod transport;
pub mod widget;

pub use config::{Args, LinkConfig};
pub use decoder::decode_heart_rate;
pub use error::{DecodeError, LinkError};
pub use history::{Reading, RetentionWindow};
pub use machine::{ConnectionMachine, LinkHandle, LinkState};
pub use status::LinkStatus;
