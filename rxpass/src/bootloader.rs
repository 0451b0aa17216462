//! Confirmation-gated reboot of the receiver into its bootloader.
//!
//! Once the passthrough is open the receiver is addressed directly with
//! `MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN`, sent three times with increasing
//! confirmation:
//!
//! | Stage   | confirmation | param3 (action) | purpose                      |
//! |---------|--------------|-----------------|------------------------------|
//! | probe   | 0            | 0               | presence and capability      |
//! | arm     | 1            | 3               | arm the reboot               |
//! | execute | 2            | 3               | reboot into the bootloader   |
//!
//! Every command carries the receiver's component id in param4 and a magic
//! number in param7. The receiver echoes the magic plus an 8-bit flag field
//! in `result_param2` of its COMMAND_ACK; acks without it are not ours.

use {
    crate::{
        error::{Error, Result},
        link::{Identity, Transport},
        protocol::{
            CommandAck, CommandLong, MavResult, Message, MessageKind,
            message::MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
        },
        retry::{RetryPolicy, resend_until},
        session::{HandshakeState, SessionConfig},
    },
    log::{debug, error, info, trace, warn},
    std::fmt,
};

/// Marker placed in param7 and echoed back in the acknowledgement.
pub const REBOOT_MAGIC: i32 = 1_234_321;

// Exactly representable: the magic is below 2^24
#[allow(clippy::cast_precision_loss)]
const REBOOT_MAGIC_PARAM: f32 = REBOOT_MAGIC as f32;

/// System id the receiver answers on.
pub const RECEIVER_SYSTEM_ID: u8 = 51;

/// Component id the receiver answers on.
pub const RECEIVER_COMPONENT_ID: u8 = 68;

/// param3 value requesting the bootloader reboot.
pub const ACTION_ENTER_BOOTLOADER: u8 = 3;

/// One step of the confirmation-gated sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Presence and capability check.
    Probe,
    /// Arm the reboot.
    Arm,
    /// Reboot into the bootloader.
    Execute,
}

impl Stage {
    /// Confirmation counter sent with the command.
    pub const fn confirmation(self) -> u8 {
        match self {
            Self::Probe => 0,
            Self::Arm => 1,
            Self::Execute => 2,
        }
    }

    /// Action code sent in param3.
    pub const fn action(self) -> u8 {
        match self {
            Self::Probe => 0,
            Self::Arm | Self::Execute => ACTION_ENTER_BOOTLOADER,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Arm => write!(f, "arm"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// What came back for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckOutcome {
    /// A matching acknowledgement arrived.
    pub accepted: bool,
    /// Flag byte from the acknowledgement, 0 when none arrived.
    pub flags: u8,
    /// Result code, [`MavResult::Failed`] when none arrived.
    pub result: MavResult,
}

impl AckOutcome {
    fn silent() -> Self {
        Self {
            accepted: false,
            flags: 0,
            result: MavResult::Failed,
        }
    }

    /// Acknowledged with [`MavResult::Accepted`].
    pub fn is_success(&self) -> bool {
        self.accepted && self.result == MavResult::Accepted
    }
}

/// What the three stages produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderReport {
    /// Flags reported by the probe.
    pub flags: u8,
    /// The arm stage was accepted.
    pub armed: bool,
    /// The execute stage was acknowledged at all.
    pub execute_acknowledged: bool,
}

/// Flags carried by `ack` if it answers our reboot command.
///
/// `None` unless the command id matches and `result_param2` lies within
/// `[REBOOT_MAGIC, REBOOT_MAGIC + 255]`.
pub fn ack_marker_flags(ack: &CommandAck) -> Option<u8> {
    if ack.command != MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN {
        return None;
    }
    let offset = ack
        .result_param2
        .checked_sub(REBOOT_MAGIC)?;
    u8::try_from(offset).ok()
}

/// Build the reboot command for one stage.
fn reboot_command(confirmation: u8, action: u8, target: Identity) -> Message {
    Message::CommandLong(CommandLong {
        target_system: target.system_id,
        target_component: target.component_id,
        command: MAV_CMD_PREFLIGHT_REBOOT_SHUTDOWN,
        confirmation,
        params: [
            0.0,
            0.0,
            f32::from(action),
            f32::from(target.component_id),
            0.0,
            0.0,
            REBOOT_MAGIC_PARAM,
        ],
    })
}

/// Send the reboot command until a matching acknowledgement arrives.
///
/// Acks that fail [`ack_marker_flags`] are skipped. Without a match within
/// the policy's budget the outcome is "not accepted".
pub fn send_confirmed_command<T: Transport + ?Sized>(
    link: &mut T,
    confirmation: u8,
    action: u8,
    target: Identity,
    policy: &RetryPolicy,
) -> Result<AckOutcome> {
    let command = reboot_command(confirmation, action, target);

    let ack = resend_until(
        policy,
        link,
        |link, attempt| {
            trace!(
                "Reboot command confirmation {confirmation} (attempt {attempt}/{})",
                policy.attempts
            );
            link.send(&command)
        },
        |link| {
            while let Some(received) = link.recv(MessageKind::CommandAck)? {
                if let Message::CommandAck(ack) = received.message {
                    match ack_marker_flags(&ack) {
                        Some(flags) => return Ok(Some((ack, flags))),
                        None => trace!("Ignoring unrelated ack {ack:?}"),
                    }
                }
            }
            Ok(None)
        },
    )?;

    Ok(match ack {
        Some((ack, flags)) => {
            debug!("Ack: result {} flags {flags:#04x}", ack.result);
            AckOutcome {
                accepted: true,
                flags,
                result: ack.result,
            }
        },
        None => AckOutcome::silent(),
    })
}

fn send_stage<T: Transport + ?Sized>(
    link: &mut T,
    stage: Stage,
    config: &SessionConfig,
) -> Result<AckOutcome> {
    info!("Receiver {stage}");
    send_confirmed_command(
        link,
        stage.confirmation(),
        stage.action(),
        config.receiver,
        &config.command_retry,
    )
}

/// Run probe, arm and execute against the receiver.
///
/// A silent or refusing probe is fatal. A failed arm is logged and the
/// sequence continues unless `config.strict_arm` is set. The execute stage
/// succeeds even without an acknowledgement since the receiver may reboot
/// before answering.
pub fn enter_bootloader<T: Transport + ?Sized>(
    link: &mut T,
    config: &SessionConfig,
    on_state: &mut dyn FnMut(HandshakeState),
) -> Result<BootloaderReport> {
    let probe = send_stage(link, Stage::Probe, config)?;
    if !probe.accepted {
        return Err(Error::ReceiverNotConnected);
    }
    if probe.result != MavResult::Accepted {
        return Err(Error::FlashUnsupported(probe.result));
    }
    info!("Receiver connected (flags {:#04x})", probe.flags);
    on_state(HandshakeState::Probed);

    let arm = send_stage(link, Stage::Arm, config)?;
    let armed = arm.is_success();
    if armed {
        on_state(HandshakeState::Armed);
    } else if config.strict_arm {
        return Err(Error::ArmRejected(arm.result));
    } else {
        error!("Could not arm receiver for reboot (result: {}), continuing", arm.result);
    }

    let execute = send_stage(link, Stage::Execute, config)?;
    if execute.accepted {
        info!("Receiver acknowledged reboot (result: {})", execute.result);
    } else {
        warn!("No acknowledgement for reboot, receiver is expected to have restarted");
    }
    on_state(HandshakeState::Executed);

    Ok(BootloaderReport {
        flags: probe.flags,
        armed,
        execute_acknowledged: execute.accepted,
    })
}
