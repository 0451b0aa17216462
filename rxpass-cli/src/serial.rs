//! Flight controller port selection.
//!
//! An explicit `--port` or configured port always wins. Otherwise a single
//! flight controller on USB is picked automatically; anything ambiguous is
//! resolved with a prompt, or rejected in non-interactive mode.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::debug,
    rxpass::{DetectedPort, discover_ports, select_port},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Non-interactive mode (fail instead of prompting).
    pub non_interactive: bool,
}

fn usage_err(message: impl Into<String>) -> anyhow::Error {
    CliError::Usage(message.into()).into()
}

/// Resolve the port to talk to the flight controller on.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    if let Some(port_name) = &config
        .connection
        .port
    {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    choose_port(&discover_ports(), options.non_interactive)
}

/// Pick among discovered ports: the single flight controller, else a prompt.
fn choose_port(ports: &[DetectedPort], non_interactive: bool) -> Result<String> {
    if ports.is_empty() {
        return Err(usage_err("No serial ports found, is the flight controller plugged in?"));
    }

    match select_port(ports) {
        Ok(port) => Ok(port.name),
        Err(err) if non_interactive => Err(usage_err(format!("{err}, use --port"))),
        Err(err) => {
            debug!("{err}");
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal, pass --port instead",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err(format!("Port prompt failed: {io_err}"))
            }
        },
    }
}

fn port_label(port: &DetectedPort) -> String {
    let name = if port.is_flight_controller() {
        style(&port.name)
            .bold()
            .to_string()
    } else {
        port.name
            .clone()
    };

    let device_info = if port
        .device
        .is_known()
    {
        format!(
            " [{}]",
            style(
                port.device
                    .name()
            )
            .yellow()
        )
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(ports: &[DetectedPort]) -> Result<String> {
    eprintln!(
        "{} {} serial ports found, flight controllers are listed first",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Flight controller port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .get(index)
            .map(|p| p.name.clone())
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rxpass::DeviceKind};

    fn usb(name: &str, vid: u16, pid: u16) -> DetectedPort {
        DetectedPort {
            device: DeviceKind::from_vid_pid(vid, pid),
            vid: Some(vid),
            pid: Some(pid),
            ..DetectedPort::named(name)
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM9".to_string());
        let options = SerialOptions {
            port: Some("COM7".to_string()),
            non_interactive: true,
        };
        assert_eq!(select_serial_port(&options, &config).unwrap(), "COM7");
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyACM9".to_string());
        let options = SerialOptions {
            port: None,
            non_interactive: true,
        };
        assert_eq!(
            select_serial_port(&options, &config).unwrap(),
            "/dev/ttyACM9"
        );
    }

    #[test]
    fn test_single_controller_is_picked_from_mixed_ports() {
        let ports = vec![
            usb("/dev/ttyUSB0", 0x0403, 0x6001),
            usb("/dev/ttyACM0", 0x1209, 0x5741),
        ];
        assert_eq!(choose_port(&ports, true).unwrap(), "/dev/ttyACM0");
    }

    #[test]
    fn test_ambiguous_ports_are_usage_errors_when_non_interactive() {
        let two = vec![
            usb("/dev/ttyACM0", 0x1209, 0x5741),
            usb("/dev/ttyACM1", 0x2DAE, 0x1011),
        ];
        let err = choose_port(&two, true).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(msg)) if msg.contains("2 flight controllers")
        ));

        let none = vec![usb("/dev/ttyUSB0", 0x0403, 0x6001)];
        assert!(matches!(
            choose_port(&none, true)
                .unwrap_err()
                .downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        assert!(choose_port(&[], true).is_err());
    }

    #[test]
    fn test_port_label_plain() {
        console::set_colors_enabled(false);
        let label = port_label(&usb("/dev/ttyUSB3", 0xAAAA, 0xBBBB));
        assert_eq!(label, "/dev/ttyUSB3 (AAAA:BBBB)");
    }

    #[test]
    fn test_usage_err_maps_to_cli_error() {
        let err = usage_err("no port");
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
