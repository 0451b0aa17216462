//! Session with the flight controller.
//!
//! Connecting runs the first half of the handshake:
//!
//! 1. open the port at the bootstrap baud rate
//! 2. wait for a heartbeat and take the controller's system id from it
//! 3. read `SERIAL{n}_PROTOCOL` for n = 1.. until a read times out; channels
//!    running MAVLink2 are eligible
//! 4. check that the target channel is eligible
//! 5. read the target's `SERIAL{n}_BAUD` and map it to a baud rate
//! 6. if that differs from the bootstrap rate, reopen at it and wait for a
//!    heartbeat again
//!
//! Any failure aborts the whole session; the link is closed before returning.

use {
    crate::{
        error::{Error, Result},
        link::{Connector, Identity, Received, Transport},
        param::{AUTOPILOT_COMPONENT_ID, ParamName, read_parameter},
        protocol::{Message, MessageKind, message::MAV_TYPE_GCS},
        retry::poll_until,
        session::{HandshakeState, SessionConfig},
    },
    log::{debug, info, warn},
    std::{fmt, time::Duration},
};

/// Baud rate every controller USB port is first opened at.
pub const BOOTSTRAP_BAUD: u32 = 115_200;

/// `SERIALn_PROTOCOL` value for MAVLink2.
pub const PROTOCOL_MAVLINK2: i32 = 2;

/// Highest serial channel number.
pub const MAX_CHANNEL: u8 = 9;

/// A controller serial channel, `SERIAL1` to `SERIAL9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel(u8);

impl Channel {
    /// Validate a channel number.
    pub fn new(index: u8) -> Result<Self> {
        if (1..=MAX_CHANNEL).contains(&index) {
            Ok(Self(index))
        } else {
            Err(Error::InvalidChannel(index))
        }
    }

    /// Channel number (1-based).
    pub const fn index(self) -> u8 {
        self.0
    }

    /// All channels in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (1..=MAX_CHANNEL).map(Self)
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::new(index)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SERIAL{}", self.0)
    }
}

/// What the controller reported for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// The channel.
    pub channel: Channel,
    /// `SERIALn_PROTOCOL` value.
    pub protocol: i32,
    /// `SERIALn_BAUD` value, only read for the target channel.
    pub baud_code: Option<u32>,
}

impl ChannelDescriptor {
    /// Whether the channel can carry the passthrough.
    pub const fn is_eligible(&self) -> bool {
        self.protocol == PROTOCOL_MAVLINK2
    }
}

/// Naming of the per-channel controller parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelParams {
    /// Common prefix, `SERIAL`.
    pub prefix: String,
    /// Protocol parameter suffix, `_PROTOCOL`.
    pub protocol_suffix: String,
    /// Baud parameter suffix, `_BAUD`.
    pub baud_suffix: String,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            prefix: "SERIAL".into(),
            protocol_suffix: "_PROTOCOL".into(),
            baud_suffix: "_BAUD".into(),
        }
    }
}

impl ChannelParams {
    /// Protocol parameter of `channel`.
    pub fn protocol(&self, channel: Channel) -> Result<ParamName> {
        ParamName::new(format!(
            "{}{}{}",
            self.prefix,
            channel.index(),
            self.protocol_suffix
        ))
    }

    /// Baud parameter of `channel`.
    pub fn baud(&self, channel: Channel) -> Result<ParamName> {
        ParamName::new(format!(
            "{}{}{}",
            self.prefix,
            channel.index(),
            self.baud_suffix
        ))
    }
}

/// Map a `SERIALn_BAUD` code to a baud rate.
///
/// Codes outside the table are passed through unchanged, so a parameter that
/// already holds a literal rate maps to itself.
pub const fn baud_from_code(code: u32) -> u32 {
    match code {
        19 => 19_200,
        38 => 38_400,
        57 => 57_600,
        115 => 115_200,
        230 => 230_400,
        460 => 460_800,
        other => other,
    }
}

/// Parameter floats carry integers; truncate like the controller does.
#[allow(clippy::cast_possible_truncation)]
fn param_to_i32(value: f32) -> i32 {
    value as i32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn param_to_u32(value: f32) -> u32 {
    value as u32
}

/// An established session with the controller.
#[derive(Debug)]
pub struct ControllerSession<L> {
    link: L,
    baud: u32,
    target: Identity,
    channel: Channel,
    channels: Vec<ChannelDescriptor>,
}

impl<L: Transport> ControllerSession<L> {
    /// Connect to the controller on `port` and verify `channel`.
    ///
    /// `on_state` is called as the handshake advances.
    pub fn connect<C>(
        connector: &mut C,
        port: &str,
        channel: Channel,
        config: &SessionConfig,
        on_state: &mut dyn FnMut(HandshakeState),
    ) -> Result<Self>
    where
        C: Connector<Link = L>,
    {
        info!("Connecting to {port} at {} baud", config.bootstrap_baud);
        let mut link = connector.open(port, config.bootstrap_baud)?;

        let handshake = Self::verify_channel(&mut link, channel, config, on_state);
        let (target, channels, baud_code) = match handshake {
            Ok(found) => found,
            Err(e) => {
                close_quietly(&mut link);
                return Err(e);
            },
        };

        let baud = baud_from_code(baud_code);
        info!("{channel} runs at {baud} baud");

        if baud != config.bootstrap_baud {
            info!("Reconnecting at {baud} baud");
            link.close()?;
            link = connector.open(port, baud)?;
            if let Err(e) = wait_heartbeat(&mut link, config.reopen_heartbeat_timeout, config) {
                close_quietly(&mut link);
                return Err(e);
            }
        }
        on_state(HandshakeState::BaudNegotiated);

        Ok(Self {
            link,
            baud,
            target,
            channel,
            channels,
        })
    }

    /// Steps 2 to 5: heartbeat, channel scan, eligibility, baud code.
    fn verify_channel(
        link: &mut L,
        channel: Channel,
        config: &SessionConfig,
        on_state: &mut dyn FnMut(HandshakeState),
    ) -> Result<(Identity, Vec<ChannelDescriptor>, u32)> {
        let heartbeat = wait_heartbeat(link, config.heartbeat_timeout, config)?;
        let target = Identity::new(heartbeat.header.system_id, AUTOPILOT_COMPONENT_ID);
        info!(
            "Heartbeat from system {} component {}",
            heartbeat.header.system_id, heartbeat.header.component_id
        );
        on_state(HandshakeState::Live);

        let mut channels = scan_channels(link, target, config)?;
        let eligible: Vec<Channel> = channels
            .iter()
            .filter(|c| c.is_eligible())
            .map(|c| c.channel)
            .collect();
        info!(
            "MAVLink2 channels: {}",
            eligible
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        if !eligible.contains(&channel) {
            return Err(Error::ChannelNotEligible {
                channel: channel.index(),
                eligible: eligible
                    .iter()
                    .map(|c| c.index())
                    .collect(),
            });
        }
        on_state(HandshakeState::ChannelVerified);

        let name = config
            .channel_params
            .baud(channel)?;
        let code = read_parameter(link, target, &name, &config.param_retry)?
            .map(param_to_u32)
            .ok_or_else(|| Error::ParameterTimeout(name.to_string()))?;

        if let Some(descriptor) = channels
            .iter_mut()
            .find(|c| c.channel == channel)
        {
            descriptor.baud_code = Some(code);
        }
        Ok((target, channels, code))
    }

    /// Baud rate of the link.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Controller address for parameter traffic.
    pub fn target(&self) -> Identity {
        self.target
    }

    /// The verified target channel.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Every channel the scan reached.
    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    /// Channels configured for MAVLink2.
    pub fn eligible_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|c| c.is_eligible())
            .map(|c| c.channel)
            .collect()
    }

    /// The open link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The open link, mutably.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Give up the session, keeping the link open.
    pub fn into_link(self) -> L {
        self.link
    }
}

/// Read `SERIALn_PROTOCOL` for ascending n until a read times out.
fn scan_channels<L: Transport + ?Sized>(
    link: &mut L,
    target: Identity,
    config: &SessionConfig,
) -> Result<Vec<ChannelDescriptor>> {
    let mut channels = Vec::new();
    for channel in Channel::all() {
        let name = config
            .channel_params
            .protocol(channel)?;
        let Some(value) = read_parameter(link, target, &name, &config.param_retry)? else {
            debug!("{name} did not answer, stopping scan");
            break;
        };
        channels.push(ChannelDescriptor {
            channel,
            protocol: param_to_i32(value),
            baud_code: None,
        });
    }
    Ok(channels)
}

/// Block until a heartbeat from something other than a ground station.
fn wait_heartbeat<L: Transport + ?Sized>(
    link: &mut L,
    timeout: Duration,
    config: &SessionConfig,
) -> Result<Received> {
    poll_until(timeout, config.param_retry.poll_interval, || {
        while let Some(received) = link.recv(MessageKind::Heartbeat)? {
            if is_vehicle_heartbeat(&received) {
                return Ok(Some(received));
            }
            debug!("Ignoring ground station heartbeat from {}", received.header.system_id);
        }
        Ok(None)
    })?
    .ok_or(Error::NoHeartbeat { timeout })
}

fn is_vehicle_heartbeat(received: &Received) -> bool {
    match &received.message {
        Message::Heartbeat(hb) => hb.mav_type != MAV_TYPE_GCS,
        _ => false,
    }
}

pub(crate) fn close_quietly<L: Transport + ?Sized>(link: &mut L) {
    if let Err(e) = link.close() {
        warn!("Error closing link: {e}");
    }
}
