//! Serial passthrough on the controller.
//!
//! Opening sets the passthrough timeout, then points the passthrough at the
//! target channel. From then on the controller forwards raw bytes between the
//! host link and that channel. Both directions end with a settle delay so
//! the controller has switched over before anything else is sent.

use {
    crate::{
        controller::Channel,
        error::Result,
        link::{Identity, Transport},
        param::{ParamName, write_parameter},
        session::SessionConfig,
    },
    log::info,
    std::{thread, time::Duration},
};

/// Time the controller needs to switch the passthrough on or off.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1500);

/// `SERIAL_PASS2` value that disables the passthrough.
pub const PASSTHROUGH_DISABLED: f32 = -1.0;

/// Names of the passthrough parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughParams {
    /// Inactivity timeout in seconds, 0 for none (`SERIAL_PASSTIMO`).
    pub timeout: String,
    /// Channel bridged to the host link (`SERIAL_PASS2`).
    pub channel: String,
}

impl Default for PassthroughParams {
    fn default() -> Self {
        Self {
            timeout: "SERIAL_PASSTIMO".into(),
            channel: "SERIAL_PASS2".into(),
        }
    }
}

/// Bridge `channel` to the host link.
///
/// Writes are not acknowledged by the controller. Repeating the call leaves
/// the controller in the same state.
pub fn open<T: Transport + ?Sized>(
    link: &mut T,
    target: Identity,
    channel: Channel,
    timeout_s: u32,
    config: &SessionConfig,
) -> Result<()> {
    let params = &config.passthrough_params;
    let timeout_name = ParamName::new(params.timeout.as_str())?;
    let channel_name = ParamName::new(params.channel.as_str())?;

    #[allow(clippy::cast_precision_loss)]
    let timeout = timeout_s as f32;
    write_parameter(link, target, &timeout_name, timeout)?;
    write_parameter(link, target, &channel_name, f32::from(channel.index()))?;

    info!("Passthrough to {channel} enabled");
    thread::sleep(config.passthrough_settle);
    Ok(())
}

/// Disable the passthrough.
pub fn close<T: Transport + ?Sized>(
    link: &mut T,
    target: Identity,
    channel: Channel,
    config: &SessionConfig,
) -> Result<()> {
    let channel_name = ParamName::new(
        config
            .passthrough_params
            .channel
            .as_str(),
    )?;
    write_parameter(link, target, &channel_name, PASSTHROUGH_DISABLED)?;

    info!("Passthrough to {channel} disabled");
    thread::sleep(config.passthrough_settle);
    Ok(())
}
