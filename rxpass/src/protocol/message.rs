//! Typed MAVLink messages used by the passthrough handshake.
//!
//! Only the handful of messages the handshake reads or writes are modelled;
//! anything else decodes to [`Message::Unknown`] and is ignored upstream.
//!
//! Payload layouts follow the MAVLink wire order (fields sorted by size,
//! extension fields appended in declaration order).

use {
    byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
    std::{fmt, io::Cursor},
};

/// `MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN`.
pub const MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN: u16 = 246;

/// `MAV_PARAM_TYPE_REAL32`.
pub const MAV_PARAM_TYPE_REAL32: u8 = 9;

/// `MAV_TYPE_GCS`.
pub const MAV_TYPE_GCS: u8 = 6;

/// `MAV_AUTOPILOT_INVALID`.
pub const MAV_AUTOPILOT_INVALID: u8 = 8;

/// Maximum length of a parameter id on the wire.
pub const PARAM_ID_LEN: usize = 16;

/// Message types this crate understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// HEARTBEAT (#0).
    Heartbeat,
    /// PARAM_REQUEST_READ (#20).
    ParamRequestRead,
    /// PARAM_VALUE (#22).
    ParamValue,
    /// PARAM_SET (#23).
    ParamSet,
    /// COMMAND_LONG (#76).
    CommandLong,
    /// COMMAND_ACK (#77).
    CommandAck,
}

impl MessageKind {
    /// Look up a kind by its numeric message id.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::Heartbeat),
            20 => Some(Self::ParamRequestRead),
            22 => Some(Self::ParamValue),
            23 => Some(Self::ParamSet),
            76 => Some(Self::CommandLong),
            77 => Some(Self::CommandAck),
            _ => None,
        }
    }

    /// Numeric message id.
    pub const fn id(self) -> u32 {
        match self {
            Self::Heartbeat => 0,
            Self::ParamRequestRead => 20,
            Self::ParamValue => 22,
            Self::ParamSet => 23,
            Self::CommandLong => 76,
            Self::CommandAck => 77,
        }
    }

    /// CRC_EXTRA seed derived from the message definition.
    pub const fn crc_extra(self) -> u8 {
        match self {
            Self::Heartbeat => 50,
            Self::ParamRequestRead => 214,
            Self::ParamValue => 220,
            Self::ParamSet => 168,
            Self::CommandLong => 152,
            Self::CommandAck => 143,
        }
    }

    /// Full payload length including extension fields.
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Heartbeat => 9,
            Self::ParamRequestRead => 20,
            Self::ParamValue => 25,
            Self::ParamSet => 23,
            Self::CommandLong => 33,
            Self::CommandAck => 10,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::ParamRequestRead => "PARAM_REQUEST_READ",
            Self::ParamValue => "PARAM_VALUE",
            Self::ParamSet => "PARAM_SET",
            Self::CommandLong => "COMMAND_LONG",
            Self::CommandAck => "COMMAND_ACK",
        };
        f.write_str(name)
    }
}

/// Result code carried by COMMAND_ACK (`MAV_RESULT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MavResult {
    /// Command accepted and executed.
    Accepted,
    /// Command valid but cannot be executed right now.
    TemporarilyRejected,
    /// Command refused.
    Denied,
    /// Command not supported.
    Unsupported,
    /// Command valid but execution failed.
    Failed,
    /// Command is being executed.
    InProgress,
    /// Command was cancelled.
    Cancelled,
    /// A result code this crate does not name.
    Other(u8),
}

impl From<u8> for MavResult {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Accepted,
            1 => Self::TemporarilyRejected,
            2 => Self::Denied,
            3 => Self::Unsupported,
            4 => Self::Failed,
            5 => Self::InProgress,
            6 => Self::Cancelled,
            other => Self::Other(other),
        }
    }
}

impl From<MavResult> for u8 {
    fn from(result: MavResult) -> Self {
        match result {
            MavResult::Accepted => 0,
            MavResult::TemporarilyRejected => 1,
            MavResult::Denied => 2,
            MavResult::Unsupported => 3,
            MavResult::Failed => 4,
            MavResult::InProgress => 5,
            MavResult::Cancelled => 6,
            MavResult::Other(v) => v,
        }
    }
}

impl fmt::Display for MavResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "ACCEPTED"),
            Self::TemporarilyRejected => write!(f, "TEMPORARILY_REJECTED"),
            Self::Denied => write!(f, "DENIED"),
            Self::Unsupported => write!(f, "UNSUPPORTED"),
            Self::Failed => write!(f, "FAILED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Other(v) => write!(f, "RESULT_{v}"),
        }
    }
}

/// A validated MAVLink parameter name (1-16 ASCII characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamName(String);

impl ParamName {
    /// Validate and wrap a parameter name.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let valid = !name.is_empty()
            && name.len() <= PARAM_ID_LEN
            && name
                .bytes()
                .all(|b| b.is_ascii_graphic());
        if valid {
            Ok(Self(name))
        } else {
            Err(crate::Error::InvalidParamName(name))
        }
    }

    /// Decode the NUL-padded wire representation.
    ///
    /// Returns `None` for ids that are empty or not printable ASCII.
    pub fn from_wire(raw: &[u8; PARAM_ID_LEN]) -> Option<Self> {
        let end = raw
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PARAM_ID_LEN);
        let name = std::str::from_utf8(&raw[..end]).ok()?;
        Self::new(name).ok()
    }

    /// Encode as a NUL-padded 16 byte id.
    pub fn to_wire(&self) -> [u8; PARAM_ID_LEN] {
        let mut raw = [0u8; PARAM_ID_LEN];
        raw[..self.0.len()].copy_from_slice(self.0.as_bytes());
        raw
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// HEARTBEAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Autopilot specific mode flags.
    pub custom_mode: u32,
    /// Vehicle or component type (`MAV_TYPE`).
    pub mav_type: u8,
    /// Autopilot type (`MAV_AUTOPILOT`).
    pub autopilot: u8,
    /// System mode bitmap.
    pub base_mode: u8,
    /// System status (`MAV_STATE`).
    pub system_status: u8,
    /// MAVLink version.
    pub mavlink_version: u8,
}

impl Heartbeat {
    /// Heartbeat announcing a ground station.
    pub fn gcs() -> Self {
        Self {
            custom_mode: 0,
            mav_type: MAV_TYPE_GCS,
            autopilot: MAV_AUTOPILOT_INVALID,
            base_mode: 0,
            system_status: 0,
            mavlink_version: 3,
        }
    }
}

/// PARAM_REQUEST_READ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRequestRead {
    /// System id of the parameter owner.
    pub target_system: u8,
    /// Component id of the parameter owner.
    pub target_component: u8,
    /// Parameter name.
    pub param_id: ParamName,
    /// Parameter index, -1 to look up by name.
    pub param_index: i16,
}

/// PARAM_VALUE.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValue {
    /// Parameter name.
    pub param_id: ParamName,
    /// Value, always transported as float.
    pub value: f32,
    /// Semantic type (`MAV_PARAM_TYPE`).
    pub param_type: u8,
    /// Total number of parameters on the component.
    pub param_count: u16,
    /// Index of this parameter.
    pub param_index: u16,
}

/// PARAM_SET.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    /// System id of the parameter owner.
    pub target_system: u8,
    /// Component id of the parameter owner.
    pub target_component: u8,
    /// Parameter name.
    pub param_id: ParamName,
    /// New value.
    pub value: f32,
    /// Semantic type (`MAV_PARAM_TYPE`).
    pub param_type: u8,
}

/// COMMAND_LONG.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLong {
    /// Addressed system.
    pub target_system: u8,
    /// Addressed component.
    pub target_component: u8,
    /// Command id (`MAV_CMD`).
    pub command: u16,
    /// Confirmation counter.
    pub confirmation: u8,
    /// param1..param7.
    pub params: [f32; 7],
}

/// COMMAND_ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    /// Command id this acknowledges.
    pub command: u16,
    /// Result code.
    pub result: MavResult,
    /// Progress or reason for failure.
    pub progress: u8,
    /// Additional result payload.
    pub result_param2: i32,
    /// System that sent the command.
    pub target_system: u8,
    /// Component that sent the command.
    pub target_component: u8,
}

/// A decoded MAVLink message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// HEARTBEAT.
    Heartbeat(Heartbeat),
    /// PARAM_REQUEST_READ.
    ParamRequestRead(ParamRequestRead),
    /// PARAM_VALUE.
    ParamValue(ParamValue),
    /// PARAM_SET.
    ParamSet(ParamSet),
    /// COMMAND_LONG.
    CommandLong(CommandLong),
    /// COMMAND_ACK.
    CommandAck(CommandAck),
    /// A message id not modelled here.
    Unknown {
        /// Numeric message id.
        id: u32,
    },
}

impl Message {
    /// The modelled kind, `None` for unknown messages.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Heartbeat(_) => Some(MessageKind::Heartbeat),
            Self::ParamRequestRead(_) => Some(MessageKind::ParamRequestRead),
            Self::ParamValue(_) => Some(MessageKind::ParamValue),
            Self::ParamSet(_) => Some(MessageKind::ParamSet),
            Self::CommandLong(_) => Some(MessageKind::CommandLong),
            Self::CommandAck(_) => Some(MessageKind::CommandAck),
            Self::Unknown { .. } => None,
        }
    }

    /// Numeric message id.
    pub fn id(&self) -> u32 {
        match self {
            Self::Unknown { id } => *id,
            other => other
                .kind()
                .map_or(u32::MAX, MessageKind::id),
        }
    }

    /// Serialize the full (untruncated) payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            self.kind()
                .map_or(0, MessageKind::payload_len),
        );
        match self {
            Self::Heartbeat(m) => {
                buf.write_u32::<LittleEndian>(m.custom_mode)
                    .unwrap();
                buf.extend_from_slice(&[
                    m.mav_type,
                    m.autopilot,
                    m.base_mode,
                    m.system_status,
                    m.mavlink_version,
                ]);
            },
            Self::ParamRequestRead(m) => {
                buf.write_i16::<LittleEndian>(m.param_index)
                    .unwrap();
                buf.push(m.target_system);
                buf.push(m.target_component);
                buf.extend_from_slice(
                    &m.param_id
                        .to_wire(),
                );
            },
            Self::ParamValue(m) => {
                buf.write_f32::<LittleEndian>(m.value)
                    .unwrap();
                buf.write_u16::<LittleEndian>(m.param_count)
                    .unwrap();
                buf.write_u16::<LittleEndian>(m.param_index)
                    .unwrap();
                buf.extend_from_slice(
                    &m.param_id
                        .to_wire(),
                );
                buf.push(m.param_type);
            },
            Self::ParamSet(m) => {
                buf.write_f32::<LittleEndian>(m.value)
                    .unwrap();
                buf.push(m.target_system);
                buf.push(m.target_component);
                buf.extend_from_slice(
                    &m.param_id
                        .to_wire(),
                );
                buf.push(m.param_type);
            },
            Self::CommandLong(m) => {
                for p in m.params {
                    buf.write_f32::<LittleEndian>(p)
                        .unwrap();
                }
                buf.write_u16::<LittleEndian>(m.command)
                    .unwrap();
                buf.extend_from_slice(&[m.target_system, m.target_component, m.confirmation]);
            },
            Self::CommandAck(m) => {
                buf.write_u16::<LittleEndian>(m.command)
                    .unwrap();
                buf.push(m.result.into());
                buf.push(m.progress);
                buf.write_i32::<LittleEndian>(m.result_param2)
                    .unwrap();
                buf.push(m.target_system);
                buf.push(m.target_component);
            },
            Self::Unknown { .. } => {},
        }
        buf
    }

    /// Decode a payload for the given message id.
    ///
    /// Truncated payloads are zero-extended first. Returns `None` when the
    /// payload is malformed (e.g. a parameter id that is not ASCII).
    pub fn decode(id: u32, payload: &[u8]) -> Option<Self> {
        let Some(kind) = MessageKind::from_id(id) else {
            return Some(Self::Unknown { id });
        };

        let mut padded = payload.to_vec();
        if padded.len() < kind.payload_len() {
            padded.resize(kind.payload_len(), 0);
        }
        let mut rd = Cursor::new(padded.as_slice());

        let message = match kind {
            MessageKind::Heartbeat => Self::Heartbeat(Heartbeat {
                custom_mode: rd
                    .read_u32::<LittleEndian>()
                    .ok()?,
                mav_type: rd.read_u8().ok()?,
                autopilot: rd.read_u8().ok()?,
                base_mode: rd.read_u8().ok()?,
                system_status: rd.read_u8().ok()?,
                mavlink_version: rd.read_u8().ok()?,
            }),
            MessageKind::ParamRequestRead => {
                let param_index = rd
                    .read_i16::<LittleEndian>()
                    .ok()?;
                let target_system = rd.read_u8().ok()?;
                let target_component = rd.read_u8().ok()?;
                let param_id = read_param_id(&mut rd)?;
                Self::ParamRequestRead(ParamRequestRead {
                    target_system,
                    target_component,
                    param_id,
                    param_index,
                })
            },
            MessageKind::ParamValue => {
                let value = rd
                    .read_f32::<LittleEndian>()
                    .ok()?;
                let param_count = rd
                    .read_u16::<LittleEndian>()
                    .ok()?;
                let param_index = rd
                    .read_u16::<LittleEndian>()
                    .ok()?;
                let param_id = read_param_id(&mut rd)?;
                let param_type = rd.read_u8().ok()?;
                Self::ParamValue(ParamValue {
                    param_id,
                    value,
                    param_type,
                    param_count,
                    param_index,
                })
            },
            MessageKind::ParamSet => {
                let value = rd
                    .read_f32::<LittleEndian>()
                    .ok()?;
                let target_system = rd.read_u8().ok()?;
                let target_component = rd.read_u8().ok()?;
                let param_id = read_param_id(&mut rd)?;
                let param_type = rd.read_u8().ok()?;
                Self::ParamSet(ParamSet {
                    target_system,
                    target_component,
                    param_id,
                    value,
                    param_type,
                })
            },
            MessageKind::CommandLong => {
                let mut params = [0f32; 7];
                for p in &mut params {
                    *p = rd
                        .read_f32::<LittleEndian>()
                        .ok()?;
                }
                let command = rd
                    .read_u16::<LittleEndian>()
                    .ok()?;
                Self::CommandLong(CommandLong {
                    target_system: rd.read_u8().ok()?,
                    target_component: rd.read_u8().ok()?,
                    command,
                    confirmation: rd.read_u8().ok()?,
                    params,
                })
            },
            MessageKind::CommandAck => Self::CommandAck(CommandAck {
                command: rd
                    .read_u16::<LittleEndian>()
                    .ok()?,
                result: rd
                    .read_u8()
                    .ok()?
                    .into(),
                progress: rd.read_u8().ok()?,
                result_param2: rd
                    .read_i32::<LittleEndian>()
                    .ok()?,
                target_system: rd.read_u8().ok()?,
                target_component: rd.read_u8().ok()?,
            }),
        };

        Some(message)
    }
}

fn read_param_id(rd: &mut Cursor<&[u8]>) -> Option<ParamName> {
    let mut raw = [0u8; PARAM_ID_LEN];
    std::io::Read::read_exact(rd, &mut raw).ok()?;
    ParamName::from_wire(&raw)
}
