//! Open node (device under test) collaborators.

use crate::config::{GatewayConfig, OpenNodeSettings};
use crate::error::AppResult;
use crate::firmware::ElfTarget;
use crate::process::redirection::serial_redirection;
use crate::process::ProcessSupervisor;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Placeholder replaced by the firmware path in the flash command.
pub const FIRMWARE_PLACEHOLDER: &str = "{firmware}";

/// Open node lifecycle. Integer results: 0 on success.
pub trait OpenNode: Send {
    /// Flash `firmware` (or the idle firmware) and expose the serial link.
    fn setup(&mut self, firmware: Option<&Path>) -> i32;
    /// Close the serial link and flash the idle firmware.
    fn teardown(&mut self) -> i32;
    /// Flash `firmware`, the idle firmware for `None`.
    fn flash(&mut self, firmware: Option<&Path>) -> i32;
    /// Hardware check.
    fn status(&self) -> i32;
    /// True if `firmware` can run on this node.
    fn firmware_compatible(&self, firmware: &Path) -> bool;
}

/// Board without an open node.
#[derive(Debug, Default)]
pub struct NoOpenNode;

impl NoOpenNode {
    /// Registry constructor.
    pub fn new(_config: &GatewayConfig) -> AppResult<Self> {
        Ok(Self)
    }
}

impl OpenNode for NoOpenNode {
    fn setup(&mut self, _firmware: Option<&Path>) -> i32 {
        0
    }
    fn teardown(&mut self) -> i32 {
        0
    }
    fn flash(&mut self, _firmware: Option<&Path>) -> i32 {
        0
    }
    fn status(&self) -> i32 {
        0
    }
    fn firmware_compatible(&self, _firmware: &Path) -> bool {
        true
    }
}

/// Open node on a serial TTY, flashed by an external tool.
pub struct SerialOpenNode {
    settings: OpenNodeSettings,
    redirection: ProcessSupervisor,
    target: Option<ElfTarget>,
}

impl SerialOpenNode {
    /// Build from the `[open_node]` section.
    pub fn new(config: &GatewayConfig) -> AppResult<Self> {
        let settings = config.open_node.clone();
        let redirection = serial_redirection(
            &settings.tty,
            settings.baudrate,
            settings.redirect_port,
            config.supervisor.clone(),
        )?;
        let target = match (settings.elf_class, settings.elf_machine) {
            (Some(class), Some(machine)) => Some(ElfTarget { class, machine }),
            _ => None,
        };
        Ok(Self {
            settings,
            redirection,
            target,
        })
    }

    fn flash_command(&self, firmware: &Path) -> Option<Command> {
        let (program, args) = self.settings.flash_command.split_first()?;
        let firmware = firmware.to_string_lossy();
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|a| a.replace(FIRMWARE_PLACEHOLDER, &firmware)))
            .stdin(Stdio::null());
        Some(cmd)
    }
}

impl OpenNode for SerialOpenNode {
    fn setup(&mut self, firmware: Option<&Path>) -> i32 {
        let mut ret = self.flash(firmware);
        if let Err(err) = self.redirection.start() {
            error!(%err, "Open node: serial redirection start failed");
            ret += 1;
        }
        ret
    }

    fn teardown(&mut self) -> i32 {
        let mut ret = 0;
        if let Err(err) = self.redirection.stop() {
            error!(%err, "Open node: serial redirection stop failed");
            ret += 1;
        }
        ret += self.flash(None);
        ret
    }

    fn flash(&mut self, firmware: Option<&Path>) -> i32 {
        let Some(firmware) = firmware.or(self.settings.idle_firmware.as_deref()) else {
            debug!("Open node: no firmware to flash");
            return 0;
        };
        let Some(mut cmd) = self.flash_command(firmware) else {
            error!("Open node: no flash command configured");
            return 1;
        };

        info!(firmware = %firmware.display(), "Open node: flash");
        match cmd.output() {
            Ok(output) if output.status.success() => 0,
            Ok(output) => {
                error!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Open node: flash failed"
                );
                1
            }
            Err(err) => {
                error!(%err, "Open node: cannot run flash command");
                1
            }
        }
    }

    fn status(&self) -> i32 {
        if Path::new(&self.settings.tty).exists() {
            0
        } else {
            error!(tty = %self.settings.tty, "Open node TTY not found");
            1
        }
    }

    fn firmware_compatible(&self, firmware: &Path) -> bool {
        match &self.target {
            Some(target) => target.is_compatible(Some(firmware)),
            None => true,
        }
    }
}
