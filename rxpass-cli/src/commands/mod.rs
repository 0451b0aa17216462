//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod close;
pub(crate) mod completions;
pub(crate) mod ports;
pub(crate) mod run;

use {
    crate::use_fancy_output,
    indicatif::{ProgressBar, ProgressStyle},
    rxpass::HandshakeState,
    std::time::Duration,
};

/// Spinner that follows the handshake, hidden when quiet or not on a terminal.
pub(crate) fn handshake_spinner(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Waiting for flight controller heartbeat");
    pb
}

/// What the handshake is doing after reaching `state`.
pub(crate) fn next_step(state: HandshakeState) -> &'static str {
    match state {
        HandshakeState::Unconnected => "Waiting for flight controller heartbeat",
        HandshakeState::Live => "Reading serial channel configuration",
        HandshakeState::ChannelVerified => "Reading channel baud rate",
        HandshakeState::BaudNegotiated => "Opening passthrough",
        HandshakeState::PassthroughOpen => "Probing receiver",
        HandshakeState::Probed => "Arming receiver",
        HandshakeState::Armed => "Rebooting receiver into bootloader",
        HandshakeState::Executed => "Done",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_step_covers_every_state() {
        let states = [
            HandshakeState::Unconnected,
            HandshakeState::Live,
            HandshakeState::ChannelVerified,
            HandshakeState::BaudNegotiated,
            HandshakeState::PassthroughOpen,
            HandshakeState::Probed,
            HandshakeState::Armed,
            HandshakeState::Executed,
        ];
        let steps: std::collections::HashSet<&str> = states
            .iter()
            .map(|s| next_step(*s))
            .collect();
        assert_eq!(steps.len(), states.len());
    }

    #[test]
    fn test_spinner_hidden_when_quiet() {
        assert!(handshake_spinner(true).is_hidden());
    }
}
