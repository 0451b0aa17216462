//! The complete handshake: controller, passthrough and receiver.
//!
//! [`run`] drives one of two flows over a link it owns for the whole
//! session:
//!
//! - [`Flow::Full`]: connect, open the passthrough, reboot the receiver into
//!   its bootloader
//! - [`Flow::PassthroughOnly`]: connect and open the passthrough, for
//!   receivers that handle their own bootloader entry
//!
//! On success the still-open link is handed back so the caller can close it
//! before starting a flashing tool on the same port.

use {
    crate::{
        bootloader::{self, BootloaderReport, RECEIVER_COMPONENT_ID, RECEIVER_SYSTEM_ID},
        controller::{BOOTSTRAP_BAUD, Channel, ChannelParams, ControllerSession, close_quietly},
        error::Result,
        link::{Connector, Identity, Transport},
        passthrough::{self, DEFAULT_SETTLE, PassthroughParams},
        retry::RetryPolicy,
    },
    log::{info, warn},
    std::{fmt, time::Duration},
};

/// Handshake progress. States only ever advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    /// Nothing opened yet.
    Unconnected,
    /// Controller heartbeat seen.
    Live,
    /// Target channel runs MAVLink2.
    ChannelVerified,
    /// Link runs at the channel's baud rate.
    BaudNegotiated,
    /// Passthrough bridged to the target channel.
    PassthroughOpen,
    /// Receiver answered the probe.
    Probed,
    /// Receiver armed for reboot.
    Armed,
    /// Reboot into the bootloader sent.
    Executed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Live => "controller live",
            Self::ChannelVerified => "channel verified",
            Self::BaudNegotiated => "baud negotiated",
            Self::PassthroughOpen => "passthrough open",
            Self::Probed => "receiver probed",
            Self::Armed => "receiver armed",
            Self::Executed => "bootloader entered",
        };
        f.write_str(s)
    }
}

/// Which handshake to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Passthrough plus bootloader reboot.
    #[default]
    Full,
    /// Passthrough only.
    PassthroughOnly,
}

/// Every tunable of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Baud rate the port is first opened at.
    pub bootstrap_baud: u32,
    /// Wait for the first heartbeat.
    pub heartbeat_timeout: Duration,
    /// Wait for a heartbeat after reopening at the channel's baud rate.
    pub reopen_heartbeat_timeout: Duration,
    /// Parameter read budget.
    pub param_retry: RetryPolicy,
    /// Reboot command budget, per stage.
    pub command_retry: RetryPolicy,
    /// Per-channel parameter names.
    pub channel_params: ChannelParams,
    /// Passthrough parameter names.
    pub passthrough_params: PassthroughParams,
    /// Delay after switching the passthrough.
    pub passthrough_settle: Duration,
    /// Passthrough inactivity timeout in seconds, 0 for none.
    pub passthrough_timeout_s: u32,
    /// Identity our frames are sent with.
    pub host: Identity,
    /// Identity of the receiver behind the passthrough.
    pub receiver: Identity,
    /// Treat a refused arm stage as fatal.
    pub strict_arm: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bootstrap_baud: BOOTSTRAP_BAUD,
            heartbeat_timeout: Duration::from_secs(7),
            reopen_heartbeat_timeout: Duration::from_secs(7),
            param_retry: RetryPolicy::new(4, Duration::from_millis(500)),
            command_retry: RetryPolicy::new(10, Duration::from_millis(500)),
            channel_params: ChannelParams::default(),
            passthrough_params: PassthroughParams::default(),
            passthrough_settle: DEFAULT_SETTLE,
            passthrough_timeout_s: 0,
            host: Identity::default(),
            receiver: Identity::new(RECEIVER_SYSTEM_ID, RECEIVER_COMPONENT_ID),
            strict_arm: false,
        }
    }
}

/// A finished handshake and the link it ran over.
#[derive(Debug)]
pub struct Session<L> {
    link: L,
    baud: u32,
    channel: Channel,
    eligible: Vec<Channel>,
    bootloader: Option<BootloaderReport>,
}

impl<L: Transport> Session<L> {
    /// Baud rate of the link.
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// The bridged channel.
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Channels configured for MAVLink2.
    pub fn eligible_channels(&self) -> &[Channel] {
        &self.eligible
    }

    /// Receiver outcome, `None` for [`Flow::PassthroughOnly`].
    pub fn bootloader(&self) -> Option<&BootloaderReport> {
        self.bootloader
            .as_ref()
    }

    /// The open link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Take the open link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Close the link.
    pub fn close(mut self) -> Result<()> {
        self.link
            .close()
    }
}

/// Run `flow` against the controller on `port`, bridging `channel`.
pub fn run<C: Connector>(
    connector: &mut C,
    port: &str,
    channel: Channel,
    flow: Flow,
    config: &SessionConfig,
    on_state: &mut dyn FnMut(HandshakeState),
) -> Result<Session<C::Link>> {
    let controller = ControllerSession::connect(connector, port, channel, config, on_state)?;
    let baud = controller.baud();
    let target = controller.target();
    let eligible = controller.eligible_channels();
    let mut link = controller.into_link();

    if let Err(e) = passthrough::open(
        &mut link,
        target,
        channel,
        config.passthrough_timeout_s,
        config,
    ) {
        close_quietly(&mut link);
        return Err(e);
    }
    on_state(HandshakeState::PassthroughOpen);

    match enter_flow(&mut link, flow, config, on_state) {
        Ok(bootloader) => Ok(Session {
            link,
            baud,
            channel,
            eligible,
            bootloader,
        }),
        Err(e) => {
            warn!(
                "Passthrough to {channel} may still be open; power cycle the flight controller to end it"
            );
            close_quietly(&mut link);
            Err(e)
        },
    }
}

/// Everything past the open passthrough.
fn enter_flow<L: Transport + ?Sized>(
    link: &mut L,
    flow: Flow,
    config: &SessionConfig,
    on_state: &mut dyn FnMut(HandshakeState),
) -> Result<Option<BootloaderReport>> {
    match flow {
        Flow::Full => bootloader::enter_bootloader(link, config, on_state).map(Some),
        Flow::PassthroughOnly => {
            info!("Passthrough open, skipping bootloader entry");
            Ok(None)
        },
    }
}

/// Connect to the controller and disable the passthrough.
pub fn close_passthrough<C: Connector>(
    connector: &mut C,
    port: &str,
    channel: Channel,
    config: &SessionConfig,
    on_state: &mut dyn FnMut(HandshakeState),
) -> Result<()> {
    let mut controller = ControllerSession::connect(connector, port, channel, config, on_state)?;
    let target = controller.target();
    let closed = passthrough::close(controller.link_mut(), target, channel, config);
    let mut link = controller.into_link();
    link.close()?;
    closed
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            error::Error,
            protocol::{MavResult, Message},
            testing::{Bench, Event, MockConnector, MockTransport, ReceiverScript, fast_config},
        },
    };

    fn run_flow(
        bench: &Bench,
        channel: u8,
        flow: Flow,
    ) -> (Result<Session<MockTransport>>, Vec<HandshakeState>) {
        let mut connector = MockConnector::new(bench.clone());
        let mut states = Vec::new();
        let result = run(
            &mut connector,
            "/dev/ttyACM0",
            Channel::new(channel).unwrap(),
            flow,
            &fast_config(),
            &mut |s| states.push(s),
        );
        (result, states)
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.bootstrap_baud, 115_200);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(7));
        assert_eq!(config.reopen_heartbeat_timeout, Duration::from_secs(7));
        assert_eq!(config.param_retry.attempts, 4);
        assert_eq!(config.command_retry.attempts, 10);
        assert_eq!(config.command_retry.resend_interval, Duration::from_millis(500));
        assert_eq!(config.param_retry.poll_interval, Duration::from_millis(10));
        assert_eq!(config.receiver, Identity::new(51, 68));
        assert_eq!(config.host, Identity::new(255, 190));
        assert!(!config.strict_arm);
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(HandshakeState::Unconnected < HandshakeState::Live);
        assert!(HandshakeState::PassthroughOpen < HandshakeState::Probed);
        assert_eq!(HandshakeState::Executed.to_string(), "bootloader entered");
    }

    #[test]
    fn test_full_flow_on_reconnected_channel() {
        let bench = Bench::new().with_receiver(ReceiverScript::cooperative(0));
        let (result, states) = run_flow(&bench, 2, Flow::Full);
        let session = result.unwrap();

        assert_eq!(session.baud(), 57_600);
        assert_eq!(session.channel().index(), 2);
        assert!(
            session
                .bootloader()
                .unwrap()
                .armed
        );
        assert_eq!(states, vec![
            HandshakeState::Live,
            HandshakeState::ChannelVerified,
            HandshakeState::BaudNegotiated,
            HandshakeState::PassthroughOpen,
            HandshakeState::Probed,
            HandshakeState::Armed,
            HandshakeState::Executed
        ]);
        assert!(states.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(bench.param("SERIAL_PASS2"), Some(2.0));

        // Still open for the caller
        assert!(!session.link().closed);
        session.close().unwrap();
        assert!(matches!(bench.log.events().last(), Some(Event::Closed)));
    }

    #[test]
    fn test_passthrough_only_sends_no_commands() {
        let bench = Bench::new().with_receiver(ReceiverScript::cooperative(0));
        let (result, states) = run_flow(&bench, 1, Flow::PassthroughOnly);
        let session = result.unwrap();

        assert!(session.bootloader().is_none());
        assert_eq!(states.last(), Some(&HandshakeState::PassthroughOpen));
        assert!(bench.log.commands().is_empty());
        assert_eq!(session.eligible_channels().len(), 2);
    }

    #[test]
    fn test_unsupported_receiver_closes_link() {
        let bench = Bench::new().with_receiver(ReceiverScript {
            probe: Some(MavResult::Unsupported),
            ..ReceiverScript::cooperative(0)
        });
        let (result, states) = run_flow(&bench, 1, Flow::Full);

        assert!(matches!(result, Err(Error::FlashUnsupported(_))));
        assert_eq!(states.last(), Some(&HandshakeState::PassthroughOpen));
        assert!(
            bench
                .log
                .commands()
                .iter()
                .all(|c| c.confirmation == 0)
        );
        assert!(matches!(bench.log.events().last(), Some(Event::Closed)));
    }

    #[test]
    fn test_failed_timeout_write_leaves_passthrough_untouched() {
        let bench = Bench::new()
            .with_receiver(ReceiverScript::cooperative(0))
            .fail_param_set("SERIAL_PASSTIMO");
        let (result, states) = run_flow(&bench, 1, Flow::Full);

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(states.last(), Some(&HandshakeState::BaudNegotiated));
        assert!(bench.log.param_sets().is_empty());
        assert_eq!(bench.param("SERIAL_PASS2"), Some(-1.0));
        assert!(bench.log.commands().is_empty());
        assert!(matches!(bench.log.events().last(), Some(Event::Closed)));
    }

    #[test]
    fn test_failed_channel_write_does_not_report_open_passthrough() {
        let bench = Bench::new().fail_param_set("SERIAL_PASS2");
        let (result, states) = run_flow(&bench, 1, Flow::PassthroughOnly);

        assert!(result.is_err());
        assert!(!states.contains(&HandshakeState::PassthroughOpen));
        assert_eq!(bench.log.param_sets(), vec![(
            "SERIAL_PASSTIMO".to_string(),
            0.0
        )]);
        assert!(matches!(bench.log.events().last(), Some(Event::Closed)));
    }

    #[test]
    fn test_ineligible_channel_never_touches_passthrough() {
        let bench = Bench::new().with_receiver(ReceiverScript::cooperative(0));
        let (result, _) = run_flow(&bench, 3, Flow::Full);

        assert!(matches!(result, Err(Error::ChannelNotEligible { .. })));
        assert!(
            !bench
                .log
                .sent()
                .iter()
                .any(|m| matches!(m, Message::ParamSet(_) | Message::CommandLong(_)))
        );
    }

    #[test]
    fn test_close_passthrough() {
        let bench = Bench::new().with_param("SERIAL_PASS2", 2.0);
        let mut connector = MockConnector::new(bench.clone());
        close_passthrough(
            &mut connector,
            "/dev/ttyACM0",
            Channel::new(2).unwrap(),
            &fast_config(),
            &mut |_| {},
        )
        .unwrap();

        assert_eq!(bench.param("SERIAL_PASS2"), Some(-1.0));
        assert!(matches!(bench.log.events().last(), Some(Event::Closed)));
    }
}
