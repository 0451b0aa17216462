//! Parameter reads and writes on the controller.
//!
//! Reads use the retrying request loop: a PARAM_REQUEST_READ by name is sent
//! every resend interval until a PARAM_VALUE carrying the same name arrives
//! or the attempt budget is spent. Writes are fire-and-forget.

pub use crate::protocol::ParamName;

use {
    crate::{
        error::Result,
        link::{Identity, Transport},
        protocol::{Message, MessageKind, ParamRequestRead, ParamSet, message},
        retry::{RetryPolicy, resend_until},
    },
    log::{debug, trace},
};

/// Component id parameter requests are addressed to.
///
/// The component id seen in the controller's heartbeat is not reliable for
/// this, so the autopilot component is addressed explicitly.
pub const AUTOPILOT_COMPONENT_ID: u8 = 1;

/// Read one parameter by name.
///
/// Returns `Ok(None)` when no matching reply arrived within the policy's
/// budget; the caller decides whether that is fatal.
pub fn read_parameter<T: Transport + ?Sized>(
    link: &mut T,
    target: Identity,
    name: &ParamName,
    policy: &RetryPolicy,
) -> Result<Option<f32>> {
    let request = Message::ParamRequestRead(ParamRequestRead {
        target_system: target.system_id,
        target_component: target.component_id,
        param_id: name.clone(),
        param_index: -1,
    });

    let value = resend_until(
        policy,
        link,
        |link, attempt| {
            trace!("Requesting {name} (attempt {attempt}/{})", policy.attempts);
            link.send(&request)
        },
        |link| {
            while let Some(received) = link.recv(MessageKind::ParamValue)? {
                match received.message {
                    Message::ParamValue(reply) if reply.param_id == *name => {
                        return Ok(Some(reply.value));
                    },
                    other => trace!("Ignoring unrelated reply {other:?}"),
                }
            }
            Ok(None)
        },
    )?;

    match value {
        Some(v) => debug!("{name} = {v}"),
        None => debug!("{name}: no reply after {} requests", policy.attempts),
    }
    Ok(value)
}

/// Write one parameter as a 32-bit float. No acknowledgement is awaited.
pub fn write_parameter<T: Transport + ?Sized>(
    link: &mut T,
    target: Identity,
    name: &ParamName,
    value: f32,
) -> Result<()> {
    debug!("Setting {name} = {value}");
    link.send(&Message::ParamSet(ParamSet {
        target_system: target.system_id,
        target_component: target.component_id,
        param_id: name.clone(),
        value,
        param_type: message::MAV_PARAM_TYPE_REAL32,
    }))
}
