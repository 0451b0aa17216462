//! # rxpass
//!
//! Put a radio receiver behind an ArduPilot flight controller into its
//! bootloader, using the controller's MAVLink serial passthrough.
//!
//! The receiver is wired to one of the controller's serial ports. This crate
//! talks MAVLink to the controller over USB, finds out which serial channels
//! run MAVLink2 and at what baud rate, bridges the target channel to the USB
//! link and then walks the receiver through a confirmation-gated reboot into
//! its system bootloader. The link stays bridged afterwards so a flashing
//! tool can write new firmware over the same port.
//!
//! ## Layers
//!
//! - [`port`]: byte pipe (`serialport` backed [`NativePort`])
//! - [`protocol`]: MAVLink framing and the handful of messages used
//! - [`link`]: typed message link ([`Transport`]) and how to open one ([`Connector`])
//! - [`controller`], [`passthrough`], [`bootloader`]: the handshake steps
//! - [`session`]: the steps composed into complete flows
//! - [`programmer`], [`host`]: flashing tool and port discovery
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use rxpass::{Channel, Flow, NativeConnector, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::default();
//!     let mut connector = NativeConnector::new(config.host);
//!
//!     let session = rxpass::session::run(
//!         &mut connector,
//!         "/dev/ttyACM0",
//!         Channel::new(2)?,
//!         Flow::Full,
//!         &config,
//!         &mut |state| println!("{state}"),
//!     )?;
//!     println!("Receiver in bootloader at {} baud", session.baud());
//!     session.close()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootloader;
pub mod controller;
pub mod error;
pub mod host;
pub mod link;
pub mod param;
pub mod passthrough;
pub mod port;
pub mod programmer;
pub mod protocol;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use {link::NativeConnector, port::NativePort};
pub use {
    bootloader::{AckOutcome, BootloaderReport, Stage},
    controller::{Channel, ChannelDescriptor, ControllerSession, baud_from_code},
    error::{Error, Result},
    host::{DetectedPort, DeviceKind, auto_detect_port, discover_ports, select_port},
    link::{Connector, Identity, MavLink, Received, Transport},
    port::{Port, SerialConfig},
    programmer::{FlashJob, Programmer},
    protocol::{MavResult, Message, MessageKind, ParamName},
    retry::RetryPolicy,
    session::{Flow, HandshakeState, Session, SessionConfig},
};
