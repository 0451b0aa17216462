//! MAVLink wire protocol: checksum, framing and the typed messages the
//! handshake needs.

pub mod crc;
pub mod frame;
pub mod message;

// Re-export common types
pub use frame::{Frame, FrameParser, Header};
pub use message::{
    CommandAck, CommandLong, Heartbeat, MavResult, Message, MessageKind, ParamName,
    ParamRequestRead, ParamSet, ParamValue,
};
