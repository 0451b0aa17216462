//! External STM32 programmer.
//!
//! After the receiver has rebooted into its system bootloader the firmware is
//! written by `STM32_Programmer_CLI` over the same serial port, still bridged
//! through the controller's passthrough:
//!
//! ```text
//! STM32_Programmer_CLI -c port=<port> br=<baud> [-e all] -w <file> -v -g
//! ```

use {
    crate::error::{Error, Result},
    log::{debug, info},
    std::{
        env,
        path::{Path, PathBuf},
        process::Command,
        time::Duration,
    },
};

/// Executable name on every platform.
const TOOL_NAME: &str = "STM32_Programmer_CLI";

/// Wait between closing the link and starting the tool.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(5);

/// Where the programmer is looked for when no path is given.
///
/// Windows uses a copy bundled next to the tool, elsewhere the default
/// STM32CubeProgrammer install under the home directory.
pub fn default_tool_path() -> PathBuf {
    if cfg!(windows) {
        ["zmodules", "STM32CubeProgrammer", "bin"]
            .iter()
            .collect::<PathBuf>()
            .join(format!("{TOOL_NAME}.exe"))
    } else {
        let home = env::var_os("HOME").map_or_else(|| PathBuf::from("~"), PathBuf::from);
        home.join("STMicroelectronics")
            .join("STM32Cube")
            .join("STM32CubeProgrammer")
            .join("bin")
            .join(TOOL_NAME)
    }
}

/// One firmware write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    /// Serial port the receiver is reachable on.
    pub port: String,
    /// Baud rate of that port.
    pub baud: u32,
    /// Firmware image.
    pub firmware: PathBuf,
    /// Erase the whole flash first.
    pub full_erase: bool,
}

impl FlashJob {
    /// Job without full erase.
    pub fn new(port: impl Into<String>, baud: u32, firmware: impl Into<PathBuf>) -> Self {
        Self {
            port: port.into(),
            baud,
            firmware: firmware.into(),
            full_erase: false,
        }
    }

    /// Set full erase.
    #[must_use]
    pub fn with_full_erase(mut self, full_erase: bool) -> Self {
        self.full_erase = full_erase;
        self
    }

    /// Command-line arguments: connect, optionally erase, write, verify, run.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-c".to_string(),
            format!("port={}", self.port),
            format!("br={}", self.baud),
        ];
        if self.full_erase {
            args.push("-e".into());
            args.push("all".into());
        }
        args.push("-w".into());
        args.push(
            self.firmware
                .display()
                .to_string(),
        );
        args.push("-v".into());
        args.push("-g".into());
        args
    }
}

/// Handle to the programmer executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Programmer {
    tool: PathBuf,
}

impl Default for Programmer {
    fn default() -> Self {
        Self::new(default_tool_path())
    }
}

impl Programmer {
    /// Programmer at `tool`.
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self { tool: tool.into() }
    }

    /// Path of the executable.
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// The process invocation for `job`, not yet started.
    pub fn command(&self, job: &FlashJob) -> Command {
        let mut command = Command::new(&self.tool);
        command.args(job.args());
        command
    }

    /// Run `job` to completion. The tool's output goes straight to the
    /// terminal.
    pub fn flash(&self, job: &FlashJob) -> Result<()> {
        info!(
            "Flashing {} via {} at {} baud",
            job.firmware
                .display(),
            job.port,
            job.baud
        );
        debug!("{} {}", self.tool.display(), job.args().join(" "));

        let status = self
            .command(job)
            .status()?;
        if status.success() {
            info!("Firmware flashed");
            Ok(())
        } else {
            Err(Error::ToolFailed {
                code: status.code(),
            })
        }
    }
}
