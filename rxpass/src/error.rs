//! Error types for rxpass.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::protocol::message::MavResult;

/// Result type for rxpass operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for rxpass operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, process spawning).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The serial device exists but the current user may not open it.
    #[error("Permission denied opening {port} (port busy or not accessible)")]
    PermissionDenied {
        /// Port name/path.
        port: String,
    },

    /// The serial device could not be opened.
    #[error("Could not open {port}: {reason}")]
    OpenFailed {
        /// Port name/path.
        port: String,
        /// Underlying reason reported by the driver.
        reason: String,
    },

    /// The flight controller never sent a heartbeat.
    #[error("No heartbeat from flight controller within {}s", timeout.as_secs())]
    NoHeartbeat {
        /// How long we waited.
        timeout: Duration,
    },

    /// A channel index outside 1..=9.
    #[error("Invalid serial channel {0} (expected 1-9)")]
    InvalidChannel(u8),

    /// The requested channel does not run MAVLink2.
    #[error("SERIAL{channel} is not configured for MAVLink2 (eligible: {})", format_channels(eligible))]
    ChannelNotEligible {
        /// Requested channel.
        channel: u8,
        /// Channels that are configured for MAVLink2.
        eligible: Vec<u8>,
    },

    /// A parameter name that cannot be sent on the wire.
    #[error("Invalid parameter name {0:?} (1-16 ASCII characters)")]
    InvalidParamName(String),

    /// The flight controller did not answer a parameter read.
    #[error("Timeout reading parameter {0}")]
    ParameterTimeout(String),

    /// The receiver did not answer the probe through the passthrough.
    #[error("Could not connect to receiver")]
    ReceiverNotConnected,

    /// The receiver answered the probe but refuses to be flashed via serial.
    #[error("Receiver does not support being flashed via serial (result: {0})")]
    FlashUnsupported(MavResult),

    /// The receiver refused to arm for reboot (strict arming only).
    #[error("Could not arm receiver for reboot (result: {0})")]
    ArmRejected(MavResult),

    /// The external flashing tool exited unsuccessfully.
    #[error("Flashing tool failed{}", code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    ToolFailed {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
    },

    /// No serial port looked like a flight controller.
    #[error("No flight controller port found{}", if .0.is_empty() { String::new() } else { format!(" ({})", .0) })]
    PortNotFound(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

fn format_channels(channels: &[u8]) -> String {
    if channels.is_empty() {
        return "none".to_string();
    }
    channels
        .iter()
        .map(|c| format!("SERIAL{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_not_eligible_lists_channels() {
        let err = Error::ChannelNotEligible {
            channel: 4,
            eligible: vec![1, 2],
        };
        assert_eq!(
            err.to_string(),
            "SERIAL4 is not configured for MAVLink2 (eligible: SERIAL1, SERIAL2)"
        );

        let err = Error::ChannelNotEligible {
            channel: 4,
            eligible: Vec::new(),
        };
        assert!(err.to_string().ends_with("(eligible: none)"));
    }

    #[test]
    fn test_tool_failed_message() {
        assert_eq!(
            Error::ToolFailed { code: Some(3) }.to_string(),
            "Flashing tool failed with exit code 3"
        );
        assert_eq!(Error::ToolFailed { code: None }.to_string(), "Flashing tool failed");
    }
}
