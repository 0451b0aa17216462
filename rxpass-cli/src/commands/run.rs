//! `run`: bridge the receiver's channel and reboot it into its bootloader,
//! then optionally flash it.

use {
    super::{handshake_spinner, next_step},
    crate::{Cli, CliError, config::Config, get_port, resolve_channel},
    anyhow::Result,
    clap::{Args, ValueEnum},
    console::style,
    log::debug,
    rxpass::{
        Channel, Error, FlashJob, Flow, MavLink, NativeConnector, NativePort, Programmer, Session,
        SessionConfig, Transport, session,
    },
    std::{path::PathBuf, thread},
};

/// Receiver MCU family.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum Chip {
    /// STM32 receivers: rebooted into the ST system bootloader over MAVLink.
    #[default]
    Stm32,
    /// ESP receivers: passthrough only, the receiver enters its bootloader itself.
    Esp,
}

impl From<Chip> for Flow {
    fn from(chip: Chip) -> Self {
        match chip {
            Chip::Stm32 => Self::Full,
            Chip::Esp => Self::PassthroughOnly,
        }
    }
}

/// Arguments of `rxpass run`.
#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    /// Flight controller serial channel the receiver is wired to (1-9).
    #[arg(
        env = "RXPASS_CHANNEL",
        value_parser = clap::value_parser!(u8).range(1..=9)
    )]
    pub(crate) channel: Option<u8>,

    /// Receiver MCU family.
    #[arg(long, value_enum, default_value_t = Chip::Stm32)]
    pub(crate) chip: Chip,

    /// Firmware image to write once the receiver is in its bootloader.
    #[arg(short, long, value_name = "FILE")]
    pub(crate) firmware: Option<PathBuf>,

    /// Erase the whole receiver flash before writing.
    #[arg(long, requires = "firmware")]
    pub(crate) full_erase: bool,

    /// Only erase the sectors being written, even if configured otherwise.
    #[arg(long, overrides_with = "full_erase")]
    pub(crate) no_full_erase: bool,

    /// Path to STM32_Programmer_CLI.
    #[arg(long, value_name = "PATH", env = "RXPASS_PROGRAMMER")]
    pub(crate) tool: Option<PathBuf>,

    /// Passthrough inactivity timeout in seconds (0 keeps it open until reboot).
    #[arg(long, value_name = "SECONDS")]
    pub(crate) passthrough_timeout: Option<u32>,

    /// Abort when the receiver refuses to arm for reboot.
    #[arg(long)]
    pub(crate) strict_arm: bool,

    /// Carry on when the receiver refuses to arm, even if configured otherwise.
    #[arg(long, overrides_with = "strict_arm")]
    pub(crate) no_strict_arm: bool,
}

impl RunArgs {
    /// Handshake settings: configuration files, then flags.
    fn session_config(&self, config: &Config) -> SessionConfig {
        let mut session = config.session_config();
        if let Some(timeout_s) = self.passthrough_timeout {
            session.passthrough_timeout_s = timeout_s;
        }
        if let Some(strict_arm) = flag_pair(self.strict_arm, self.no_strict_arm) {
            session.strict_arm = strict_arm;
        }
        session
    }

    /// Full-chip erase: flags, then configuration.
    fn wants_full_erase(&self, config: &Config) -> bool {
        flag_pair(self.full_erase, self.no_full_erase).unwrap_or_else(|| config.full_erase())
    }

    fn programmer(&self, config: &Config) -> Programmer {
        self.tool
            .clone()
            .or_else(|| {
                config
                    .programmer
                    .tool
                    .clone()
            })
            .map_or_else(Programmer::default, Programmer::new)
    }
}

/// Setting chosen by a `--x` / `--no-x` pair, if either was given.
fn flag_pair(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Run command implementation.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, args: &RunArgs) -> Result<()> {
    let channel = resolve_channel(args.channel, config)?;
    let flow = Flow::from(args.chip);
    if args.firmware.is_some() && flow == Flow::PassthroughOnly {
        return Err(CliError::Usage(
            "--firmware uses the STM32 programmer and needs --chip stm32".to_string(),
        )
        .into());
    }

    let port = get_port(cli, config)?;
    let session_config = args.session_config(config);
    debug!("Session config: {session_config:?}");

    if !cli.quiet {
        eprintln!(
            "{} Connecting to flight controller on {} (receiver on {})",
            style("⏳").yellow(),
            style(&port).cyan(),
            style(channel).cyan()
        );
    }

    let session = handshake(cli.quiet, &port, channel, flow, &session_config)?;
    let baud = session.baud();
    report(cli, &session, &port);
    session.close()?;

    let Some(firmware) = &args.firmware else {
        if !cli.quiet {
            print_manual_hint(&port, baud, channel);
        }
        return Ok(());
    };

    let settle = config.programmer_settle();
    if !cli.quiet {
        eprintln!(
            "{} Waiting {}s for the receiver bootloader",
            style("⏳").yellow(),
            settle.as_secs()
        );
    }
    thread::sleep(settle);

    let job = FlashJob::new(port.clone(), baud, firmware.clone())
        .with_full_erase(args.wants_full_erase(config));
    let programmer = args.programmer(config);
    if let Err(err) = programmer.flash(&job) {
        if matches!(err, Error::ToolFailed { .. } | Error::Io(_)) {
            print_recovery_hint(&programmer, &job);
        }
        return Err(err.into());
    }

    if !cli.quiet {
        eprintln!(
            "\n{} {}",
            style("🎉").green(),
            style("Receiver flashed").green().bold()
        );
        eprintln!(
            "  Power cycle the flight controller to end the passthrough on {channel}."
        );
    }

    Ok(())
}

fn handshake(
    quiet: bool,
    port: &str,
    channel: Channel,
    flow: Flow,
    config: &SessionConfig,
) -> Result<Session<MavLink<NativePort>>> {
    let mut connector = NativeConnector::new(config.host);
    let pb = handshake_spinner(quiet);
    let result = session::run(&mut connector, port, channel, flow, config, &mut |state| {
        pb.set_message(next_step(state));
    });
    pb.finish_and_clear();
    Ok(result?)
}

fn report<L: Transport>(cli: &Cli, session: &Session<L>, port: &str) {
    if cli.quiet {
        return;
    }
    let eligible: Vec<String> = session
        .eligible_channels()
        .iter()
        .map(ToString::to_string)
        .collect();
    eprintln!(
        "{} MAVLink2 channels: {}",
        style("ℹ").blue(),
        eligible.join(", ")
    );

    match session.bootloader() {
        Some(report) => {
            if !report.armed {
                eprintln!(
                    "{} Receiver did not confirm arming, the reboot may not have happened",
                    style("⚠").yellow()
                );
            }
            eprintln!(
                "{} Receiver rebooting into bootloader (flags 0x{:02X})",
                style("✓").green(),
                report.flags
            );
        },
        None => {
            eprintln!(
                "{} Passthrough open, {} is bridged to {}",
                style("✓").green(),
                style(port).cyan(),
                session.channel()
            );
        },
    }
}

fn print_manual_hint(port: &str, baud: u32, channel: Channel) {
    eprintln!(
        "\n{} Flash the receiver on {} at {} baud, then power cycle the flight controller \
         or run {} to end the passthrough.",
        style("→").green().bold(),
        style(port).cyan(),
        baud,
        style(format!("rxpass close {}", channel.index())).cyan()
    );
}

fn print_recovery_hint(programmer: &Programmer, job: &FlashJob) {
    eprintln!(
        "\n{} Flashing did not complete. The receiver stays in its bootloader until power cycled;",
        style("✗").red().bold()
    );
    eprintln!("  retry manually with:");
    eprintln!(
        "  {}",
        style(format!(
            "\"{}\" {}",
            programmer
                .tool()
                .display(),
            job.args()
                .iter()
                .map(|a| if a.contains(' ') {
                    format!("\"{a}\"")
                } else {
                    a.clone()
                })
                .collect::<Vec<_>>()
                .join(" ")
        ))
        .cyan()
    );
}
