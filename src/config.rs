//! Gateway configuration using Figment
//!
//! This module provides strongly-typed configuration loading for the gateway.
//! Configuration is loaded from:
//! 1. Built-in defaults
//! 2. A TOML file (`/etc/iotlab/gateway.toml` by default)
//! 3. Environment variables (prefixed with `GATEWAY_`)
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! GATEWAY_GATEWAY__NODE_ID=m3-12
//! GATEWAY_CONTROL_NODE__TTY=/dev/ttyCN
//! GATEWAY_SUPERVISOR__SIGTERM_COUNT=3
//! ```
//!
//! # Example
//!
//! ```toml
//! [gateway]
//! node_id = "m3-12"
//! open_node = "serial"
//! control_node = "iotlab"
//!
//! [control_node]
//! binary = "/usr/bin/control_node_serial_interface"
//! tty = "/dev/ttyCN"
//! answer_timeout = "1s"
//!
//! [supervisor]
//! signal_interval = "100ms"
//! ```

use crate::error::{AppResult, GatewayError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the gateway configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/iotlab/gateway.toml";

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Node identity and board selection
    #[serde(default)]
    pub gateway: GatewaySettings,
    /// Control node serial program settings
    #[serde(default)]
    pub control_node: ControlNodeSettings,
    /// Background process termination and restart policy
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    /// Open node serial redirection and flashing settings
    #[serde(default)]
    pub open_node: OpenNodeSettings,
}

/// Node identity and board selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Node hostname, `<arch>-<num>[-suffix]` (e.g. "m3-12")
    pub node_id: String,
    /// Registered open node type (e.g. "serial", "no")
    pub open_node: String,
    /// Registered control node type (e.g. "iotlab", "no")
    pub control_node: String,
    /// Consumption source used when the profile powers the node from DC
    pub alim: String,
    /// Root directory of user experiment files
    pub exp_files_dir: PathBuf,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            node_id: "m3-1".to_string(),
            open_node: "no".to_string(),
            control_node: "iotlab".to_string(),
            alim: "3.3V".to_string(),
            exp_files_dir: PathBuf::from("/iotlab/users"),
            log_level: "info".to_string(),
        }
    }
}

/// Control node serial program settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlNodeSettings {
    /// Path of the serial bridge program
    pub binary: PathBuf,
    /// Control node TTY passed with `-t`
    pub tty: String,
    /// Wait for a command answer
    #[serde(with = "humantime_serde")]
    pub answer_timeout: Duration,
    /// Wait for `cn_serial_ready` after spawning the program
    #[serde(with = "humantime_serde")]
    pub ready_timeout: Duration,
    /// Wait after SIGTERM before killing the program
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Duration,
}

impl Default for ControlNodeSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/bin/control_node_serial_interface"),
            tty: "/dev/ttyCN".to_string(),
            answer_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Background process termination and restart policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// SIGTERM attempts before escalating to SIGINT
    pub sigterm_count: u32,
    /// SIGINT attempts before escalating to SIGKILL
    pub sigint_count: u32,
    /// Delay between two signals while stopping
    #[serde(with = "humantime_serde")]
    pub signal_interval: Duration,
    /// Delay before relaunching an exited process
    #[serde(with = "humantime_serde")]
    pub restart_backoff: Duration,
    /// Wait for the first launch in `start`
    #[serde(with = "humantime_serde")]
    pub start_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            sigterm_count: 10,
            sigint_count: 10,
            signal_interval: Duration::from_millis(100),
            restart_backoff: Duration::from_millis(500),
            start_timeout: Duration::from_secs(15),
        }
    }
}

/// Open node serial redirection and flashing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenNodeSettings {
    /// Open node TTY
    pub tty: String,
    /// Open node serial baudrate
    pub baudrate: u32,
    /// TCP port exposing the open node serial link
    pub redirect_port: u16,
    /// Flash command, `{firmware}` is replaced by the firmware path
    pub flash_command: Vec<String>,
    /// Firmware flashed when no experiment runs
    pub idle_firmware: Option<PathBuf>,
    /// Expected ELF class (1 = 32 bits, 2 = 64 bits)
    pub elf_class: Option<u8>,
    /// Expected ELF machine (40 = ARM)
    pub elf_machine: Option<u16>,
}

impl Default for OpenNodeSettings {
    fn default() -> Self {
        Self {
            tty: "/dev/ttyON".to_string(),
            baudrate: 500_000,
            redirect_port: 20000,
            flash_command: Vec::new(),
            idle_firmware: None,
            elf_class: None,
            elf_machine: None,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl GatewayConfig {
    /// Load configuration from a specific file path
    ///
    /// Precedence (highest to lowest): `GATEWAY_` environment variables, the
    /// file, built-in defaults. A missing file leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(GatewayConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GATEWAY_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks the log level, the node id format and that timeouts are non-zero.
    /// Node types are checked against the registry when nodes are built.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.gateway.log_level.as_str()) {
            return Err(GatewayError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.gateway.log_level,
                valid_levels.join(", ")
            )));
        }

        crate::control_node::protocol::parse_node_id(&self.gateway.node_id)?;

        let timeouts = [
            ("control_node.answer_timeout", self.control_node.answer_timeout),
            ("control_node.ready_timeout", self.control_node.ready_timeout),
            ("control_node.stop_timeout", self.control_node.stop_timeout),
            ("supervisor.signal_interval", self.supervisor.signal_interval),
            ("supervisor.start_timeout", self.supervisor.start_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(GatewayError::Configuration(format!(
                    "'{}' must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}
