//! `close`: switch the controller's passthrough off again.

use {
    super::{handshake_spinner, next_step},
    crate::{Cli, config::Config, get_port, resolve_channel},
    anyhow::Result,
    console::style,
    rxpass::{NativeConnector, session},
};

/// Close command implementation.
pub(crate) fn cmd_close(cli: &Cli, config: &Config, channel: Option<u8>) -> Result<()> {
    let channel = resolve_channel(channel, config)?;
    let port = get_port(cli, config)?;
    let session_config = config.session_config();
    let mut connector = NativeConnector::new(session_config.host);

    let pb = handshake_spinner(cli.quiet);
    let result = session::close_passthrough(
        &mut connector,
        &port,
        channel,
        &session_config,
        &mut |state| pb.set_message(next_step(state)),
    );
    pb.finish_and_clear();
    result?;

    if !cli.quiet {
        eprintln!(
            "{} Passthrough to {} closed",
            style("✓").green(),
            style(channel).cyan()
        );
    }
    Ok(())
}
