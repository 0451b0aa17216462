//! rxpass CLI - put a receiver behind an ArduPilot flight controller into its
//! bootloader.
//!
//! ## Features
//!
//! - Bridge the receiver's serial channel with MAVLink serial passthrough
//! - Reboot STM32 receivers into the system bootloader
//! - Flash firmware with STM32CubeProgrammer afterwards
//! - Flight controller port auto-detection
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    log::debug,
    rxpass::Channel,
    std::{env, path::PathBuf, process::ExitCode},
};

mod commands;
mod config;
mod serial;

use {
    commands::run::RunArgs,
    config::Config,
    serial::{SerialOptions, select_serial_port},
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Problems with how the tool was invoked rather than with the hardware.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad or missing arguments, nothing to prompt with.
    #[error("{0}")]
    Usage(String),
    /// The user backed out of a prompt.
    #[error("{0}")]
    Cancelled(String),
}

/// Process exit codes.
mod exit {
    pub const FAILURE: u8 = 1;
    pub const USAGE: u8 = 2;
    pub const UNREACHABLE: u8 = 3;
    pub const CHANNEL: u8 = 4;
    pub const RECEIVER: u8 = 5;
    pub const TOOL: u8 = 6;
    pub const CANCELLED: u8 = 130;
}

/// rxpass - reboot a MAVLink receiver into its bootloader through an
/// ArduPilot flight controller.
///
/// Environment variables:
///   RXPASS_PORT               - Flight controller serial port
///   RXPASS_CHANNEL            - Serial channel the receiver is wired to (1-9)
///   RXPASS_PROGRAMMER         - Path to STM32_Programmer_CLI
///   RXPASS_NON_INTERACTIVE    - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "rxpass")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Flight controller serial port (auto-detected if not specified).
    #[arg(short, long, global = true, env = "RXPASS_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "RXPASS_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the passthrough and reboot the receiver into its bootloader.
    Run(RunArgs),

    /// Switch the passthrough off.
    Close {
        /// Serial channel the passthrough was opened on (1-9).
        #[arg(
            env = "RXPASS_CHANNEL",
            value_parser = clap::value_parser!(u8).range(1..=9)
        )]
        channel: Option<u8>,
    },

    /// List available serial ports.
    #[command(name = "list-ports")]
    ListPorts {
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install the script for the current (or given) shell.
        #[arg(long)]
        install: bool,
    },
}

/// Exit code for a failed command.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => exit::USAGE,
            CliError::Cancelled(_) => exit::CANCELLED,
        };
    }

    match err.downcast_ref::<rxpass::Error>() {
        Some(
            rxpass::Error::PermissionDenied { .. }
            | rxpass::Error::OpenFailed { .. }
            | rxpass::Error::NoHeartbeat { .. },
        ) => exit::UNREACHABLE,
        Some(rxpass::Error::ChannelNotEligible { .. }) => exit::CHANNEL,
        Some(
            rxpass::Error::ReceiverNotConnected
            | rxpass::Error::FlashUnsupported(_)
            | rxpass::Error::ArmRejected(_),
        ) => exit::RECEIVER,
        Some(rxpass::Error::ToolFailed { .. }) => exit::TOOL,
        Some(rxpass::Error::InvalidChannel(_) | rxpass::Error::PortNotFound(_)) => exit::USAGE,
        _ => exit::FAILURE,
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "rxpass v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_with_override(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Run(args) => commands::run::cmd_run(cli, &config, args)?,
        Commands::Close { channel } => commands::close::cmd_close(cli, &config, *channel)?,
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)?;
            } else {
                let shell = shell
                    .or_else(commands::completions::detect_shell_type)
                    .ok_or_else(|| {
                        CliError::Usage(
                            "specify a shell type, e.g.: rxpass completions bash".to_string(),
                        )
                    })?;
                commands::completions::cmd_completions(shell);
            }
        },
    }

    Ok(())
}

/// Channel from the command line, else from the config file.
fn resolve_channel(arg: Option<u8>, config: &Config) -> Result<Channel> {
    let index = arg
        .or(config
            .connection
            .channel)
        .ok_or_else(|| {
            CliError::Usage(
                "No receiver channel given, pass it as an argument or set RXPASS_CHANNEL"
                    .to_string(),
            )
        })?;
    Channel::new(index).map_err(|e| CliError::Usage(e.to_string()).into())
}

/// Get the flight controller port from CLI args, config or selection.
fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}

#[cfg(test)]
mod cli_tests {
    use {super::*, crate::commands::run::Chip, clap::CommandFactory, std::time::Duration};

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["rxpass", "--port", "/dev/ttyACM0", "run", "2"]).unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.channel, Some(2));
                assert_eq!(args.chip, Chip::Stm32);
                assert!(args.firmware.is_none());
                assert!(!args.strict_arm);
            },
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_run_with_all_options() {
        let cli = Cli::try_parse_from([
            "rxpass",
            "run",
            "4",
            "--chip",
            "stm32",
            "--firmware",
            "rx.hex",
            "--full-erase",
            "--tool",
            "/opt/st/STM32_Programmer_CLI",
            "--passthrough-timeout",
            "30",
            "--strict-arm",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.channel, Some(4));
                assert_eq!(args.firmware, Some(PathBuf::from("rx.hex")));
                assert!(args.full_erase);
                assert_eq!(
                    args.tool,
                    Some(PathBuf::from("/opt/st/STM32_Programmer_CLI"))
                );
                assert_eq!(args.passthrough_timeout, Some(30));
                assert!(args.strict_arm);
            },
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_parse_run_esp() {
        let cli = Cli::try_parse_from(["rxpass", "run", "1", "--chip", "esp"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run(RunArgs {
                chip: Chip::Esp,
                ..
            })
        ));
    }

    #[test]
    fn test_cli_channel_out_of_range() {
        for bad in ["0", "10", "x"] {
            let err = Cli::try_parse_from(["rxpass", "run", bad])
                .err()
                .unwrap();
            assert_eq!(err.exit_code(), 2);
        }
        assert!(Cli::try_parse_from(["rxpass", "close", "12"]).is_err());
    }

    #[test]
    fn test_cli_full_erase_requires_firmware() {
        assert!(Cli::try_parse_from(["rxpass", "run", "2", "--full-erase"]).is_err());
    }

    #[test]
    fn test_cli_last_of_flag_pair_wins() {
        let cli = Cli::try_parse_from([
            "rxpass",
            "run",
            "2",
            "--strict-arm",
            "--no-strict-arm",
            "--no-full-erase",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert!(!args.strict_arm);
                assert!(args.no_strict_arm);
                assert!(args.no_full_erase);
            },
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_cli_invalid_chip() {
        assert!(Cli::try_parse_from(["rxpass", "run", "2", "--chip", "avr"]).is_err());
    }

    #[test]
    fn test_cli_parse_close() {
        let cli = Cli::try_parse_from(["rxpass", "close", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Close { channel: Some(3) }));
    }

    #[test]
    fn test_cli_parse_list_ports_json() {
        let cli = Cli::try_parse_from(["rxpass", "list-ports", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["rxpass", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions {
                shell: Some(Shell::Zsh),
                install: false
            }
        ));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "rxpass",
            "--port",
            "COM5",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--config",
            "/tmp/rxpass.toml",
            "list-ports",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM5"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/rxpass.toml")));
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["rxpass"]).is_err());
    }

    // ---- channel resolution ----

    #[test]
    fn test_resolve_channel_prefers_argument() {
        let mut config = Config::default();
        config.connection.channel = Some(5);
        assert_eq!(resolve_channel(Some(2), &config).unwrap().index(), 2);
        assert_eq!(resolve_channel(None, &config).unwrap().index(), 5);
    }

    #[test]
    fn test_resolve_channel_missing_or_invalid_is_usage() {
        let err = resolve_channel(None, &Config::default()).unwrap_err();
        assert_eq!(exit_code(&err), exit::USAGE);

        let mut config = Config::default();
        config.connection.channel = Some(11);
        let err = resolve_channel(None, &config).unwrap_err();
        assert_eq!(exit_code(&err), exit::USAGE);
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_codes() {
        let code = |e: rxpass::Error| exit_code(&anyhow::Error::from(e));

        assert_eq!(
            code(rxpass::Error::PermissionDenied {
                port: "COM5".into()
            }),
            exit::UNREACHABLE
        );
        assert_eq!(
            code(rxpass::Error::NoHeartbeat {
                timeout: Duration::from_secs(7)
            }),
            exit::UNREACHABLE
        );
        assert_eq!(
            code(rxpass::Error::ChannelNotEligible {
                channel: 4,
                eligible: vec![1, 2]
            }),
            exit::CHANNEL
        );
        assert_eq!(code(rxpass::Error::ReceiverNotConnected), exit::RECEIVER);
        assert_eq!(
            code(rxpass::Error::FlashUnsupported(rxpass::MavResult::Denied)),
            exit::RECEIVER
        );
        assert_eq!(
            code(rxpass::Error::ToolFailed { code: Some(1) }),
            exit::TOOL
        );
        assert_eq!(
            code(rxpass::Error::ParameterTimeout("SERIAL2_BAUD".into())),
            exit::FAILURE
        );
    }

    #[test]
    fn test_exit_codes_for_cli_errors() {
        let usage: anyhow::Error = CliError::Usage("bad".into()).into();
        let cancelled: anyhow::Error = CliError::Cancelled("bye".into()).into();
        assert_eq!(exit_code(&usage), exit::USAGE);
        assert_eq!(exit_code(&cancelled), exit::CANCELLED);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), exit::FAILURE);
    }

    #[test]
    fn test_exit_code_survives_context() {
        use anyhow::Context as _;
        let err = Err::<(), _>(rxpass::Error::ReceiverNotConnected)
            .context("handshake")
            .unwrap_err();
        assert_eq!(exit_code(&err), exit::RECEIVER);
    }
}
