//! Control node drivers used by the experiment orchestrator.

use crate::config::GatewayConfig;
use crate::control_node::link::{ControlLink, MeasuresHandler};
use crate::control_node::oml::oml_xml_config;
use crate::control_node::protocol::{CommandProtocol, PowerAction};
use crate::error::AppResult;
use crate::experiment::files::ExperimentFiles;
use crate::profile::{Power, Profile};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Control node lifecycle. Every method returns 0 on success, a positive
/// failure count otherwise.
pub trait ControlNode: Send {
    /// Start the serial program and power the open node on DC.
    fn start(&mut self, exp_id: u32, files: Option<&ExperimentFiles>) -> i32;
    /// Power the open node off and stop the serial program.
    fn stop(&mut self) -> i32;
    /// Set time and node id, then apply `profile`.
    fn start_experiment(&mut self, profile: &Profile) -> i32;
    /// Restore the default profile and power the open node on DC.
    fn stop_experiment(&mut self) -> i32;
    /// Apply `profile`, or the default profile for `None`.
    fn configure_profile(&mut self, profile: Option<&Profile>) -> i32;
    /// Power the open node on. `None` keeps the current profile power.
    fn open_start(&mut self, power: Option<Power>) -> i32;
    /// Power the open node off. `None` keeps the current profile power.
    fn open_stop(&mut self, power: Option<Power>) -> i32;
    /// Hardware check.
    fn status(&self) -> i32;
}

/// Control node reached through the `control_node_serial_interface` program.
pub struct IotlabControlNode {
    node_id: String,
    tty: PathBuf,
    link: Arc<ControlLink>,
    protocol: CommandProtocol,
    open_node_state: PowerAction,
    profile: Profile,
    default_profile: Profile,
}

impl IotlabControlNode {
    /// Build the driver and its link from `config`.
    pub fn new(config: &GatewayConfig) -> Self {
        Self::with_link(config, ControlLink::new(config.control_node.clone()))
    }

    /// Same as [`new`](Self::new), forwarding measures to `handler`.
    pub fn with_measures_handler(config: &GatewayConfig, handler: MeasuresHandler) -> Self {
        let link = ControlLink::new(config.control_node.clone()).with_measures_handler(handler);
        Self::with_link(config, link)
    }

    fn with_link(config: &GatewayConfig, link: ControlLink) -> Self {
        let link = Arc::new(link);
        Self {
            node_id: config.gateway.node_id.clone(),
            tty: PathBuf::from(&config.control_node.tty),
            protocol: CommandProtocol::new(link.clone()),
            link,
            open_node_state: PowerAction::Stop,
            profile: Profile::default(),
            default_profile: Profile::default(),
        }
    }
}

impl ControlNode for IotlabControlNode {
    fn start(&mut self, exp_id: u32, files: Option<&ExperimentFiles>) -> i32 {
        info!(exp_id, "Control node: start serial interface");
        let oml = files.map(|files| oml_xml_config(&self.node_id, exp_id, files));
        let mut ret = self.link.start(oml.as_deref());
        ret += self.open_start(Some(Power::Dc));
        ret
    }

    fn stop(&mut self) -> i32 {
        info!("Control node: stop serial interface");
        let mut ret = self.open_stop(Some(Power::Dc));
        ret += self.link.stop();
        ret
    }

    fn start_experiment(&mut self, profile: &Profile) -> i32 {
        info!(profile = %profile.profilename, "Control node: start experiment");
        let mut ret = self.protocol.green_led_blink();
        ret += self.protocol.set_time();
        ret += match self.protocol.set_node_id(&self.node_id) {
            Ok(code) => code,
            Err(err) => {
                error!(%err, "Control node: cannot set node id");
                1
            }
        };
        ret += self.configure_profile(Some(profile));
        ret
    }

    fn stop_experiment(&mut self) -> i32 {
        info!("Control node: stop experiment");
        let mut ret = self.configure_profile(None);
        ret += self.open_start(Some(Power::Dc));
        ret += self.protocol.green_led_on();
        ret
    }

    fn configure_profile(&mut self, profile: Option<&Profile>) -> i32 {
        self.profile = profile.unwrap_or(&self.default_profile).clone();
        info!(profile = %self.profile.profilename, "Control node: configure profile");
        let mut ret = self
            .protocol
            .start_stop(self.open_node_state, self.profile.power);
        ret += self
            .protocol
            .config_consumption(self.profile.consumption.as_ref());
        ret += self.protocol.config_radio(self.profile.radio.as_ref());
        ret
    }

    fn open_start(&mut self, power: Option<Power>) -> i32 {
        let power = power.unwrap_or(self.profile.power);
        let ret = self.protocol.start_stop(PowerAction::Start, power);
        if ret == 0 {
            self.open_node_state = PowerAction::Start;
        }
        ret
    }

    fn open_stop(&mut self, power: Option<Power>) -> i32 {
        let power = power.unwrap_or(self.profile.power);
        let ret = self.protocol.start_stop(PowerAction::Stop, power);
        if ret == 0 {
            self.open_node_state = PowerAction::Stop;
        }
        ret
    }

    fn status(&self) -> i32 {
        if self.tty.exists() {
            0
        } else {
            error!(tty = %self.tty.display(), "Control node TTY not found");
            1
        }
    }
}

/// Board without a control node: every operation succeeds.
#[derive(Debug, Default)]
pub struct NoControlNode;

impl NoControlNode {
    /// Registry constructor.
    pub fn new(_config: &GatewayConfig) -> AppResult<Self> {
        Ok(Self)
    }
}

impl ControlNode for NoControlNode {
    fn start(&mut self, _exp_id: u32, _files: Option<&ExperimentFiles>) -> i32 {
        0
    }
    fn stop(&mut self) -> i32 {
        0
    }
    fn start_experiment(&mut self, _profile: &Profile) -> i32 {
        0
    }
    fn stop_experiment(&mut self) -> i32 {
        0
    }
    fn configure_profile(&mut self, _profile: Option<&Profile>) -> i32 {
        0
    }
    fn open_start(&mut self, _power: Option<Power>) -> i32 {
        0
    }
    fn open_stop(&mut self, _power: Option<Power>) -> i32 {
        0
    }
    fn status(&self) -> i32 {
        0
    }
}
