//! Control node commands.
//!
//! [`CommandProtocol`] builds the token lists understood by the control node
//! and validates the answers. Every command returns 0 on success and 1 on
//! failure: an answer is successful iff it is exactly `<command> ACK`, so
//! NACKs, foreign answers and missing answers all count as 1.

use crate::control_node::message::{Answer, Command};
use crate::error::{AppResult, GatewayError, TransportError};
use crate::profile::{Consumption, Power, Radio, RadioMode};
use std::sync::Arc;
use tracing::{debug, warn};

/// Node architectures the control node knows about.
pub const KNOWN_ARCHS: [&str; 2] = ["m3", "a8"];

/// Anything able to deliver one command and return its answer.
pub trait CommandSender: Send + Sync {
    /// Send `command`; `Err` is the absent answer.
    fn send(&self, command: &Command) -> Result<Answer, TransportError>;
}

/// Split `<arch>-<num>[-suffix]` into the arch and the node number.
///
/// ```
/// use iotlab_gateway::control_node::protocol::parse_node_id;
///
/// assert_eq!(parse_node_id("m3-1").unwrap(), ("m3".to_string(), 1));
/// assert_eq!(parse_node_id("m3-00-ci").unwrap(), ("m3".to_string(), 0));
/// ```
pub fn parse_node_id(node_id: &str) -> AppResult<(String, u32)> {
    let mut fields = node_id.split('-');
    match (fields.next(), fields.next()) {
        (Some(arch), Some(num)) if !arch.is_empty() => {
            let num = num
                .parse::<u32>()
                .map_err(|_| GatewayError::InvalidNodeId(node_id.to_string()))?;
            Ok((arch.to_string(), num))
        }
        _ => Err(GatewayError::InvalidNodeId(node_id.to_string())),
    }
}

/// Open node power action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    Stop,
}

impl PowerAction {
    fn as_str(self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
        }
    }
}

/// Encoder and validator on top of a [`CommandSender`].
#[derive(Clone)]
pub struct CommandProtocol {
    sender: Arc<dyn CommandSender>,
}

impl CommandProtocol {
    /// Send commands through `sender`.
    pub fn new(sender: Arc<dyn CommandSender>) -> Self {
        Self { sender }
    }

    /// Send `command`, 0 iff the answer is `<name> ACK`.
    pub fn send_cmd(&self, command: Command) -> i32 {
        match self.sender.send(&command) {
            Ok(answer) if answer.is_ack_for(command.name()) => 0,
            Ok(answer) => {
                warn!(command = %command, answer = %answer, "Control node command rejected");
                1
            }
            Err(err) => {
                debug!(command = %command, %err, "no answer");
                1
            }
        }
    }

    /// `<start|stop> <dc|battery>`
    pub fn start_stop(&self, action: PowerAction, source: Power) -> i32 {
        self.send_cmd(Command::new(action.as_str()).arg(source))
    }

    /// `set_time`
    pub fn set_time(&self) -> i32 {
        self.send_cmd(Command::new("set_time"))
    }

    /// `set_node_id <arch> <num>`
    ///
    /// Architectures outside [`KNOWN_ARCHS`] are not handled by the control
    /// node: nothing is sent and 0 is returned. A malformed id is an error.
    pub fn set_node_id(&self, node_id: &str) -> AppResult<i32> {
        let (arch, num) = parse_node_id(node_id)?;
        if !KNOWN_ARCHS.contains(&arch.as_str()) {
            debug!(node_id, "set_node_id not supported for this architecture");
            return Ok(0);
        }
        Ok(self.send_cmd(Command::new("set_node_id").arg(arch).arg(num)))
    }

    /// `green_led_blink`
    pub fn green_led_blink(&self) -> i32 {
        self.send_cmd(Command::new("green_led_blink"))
    }

    /// `green_led_on`
    pub fn green_led_on(&self) -> i32 {
        self.send_cmd(Command::new("green_led_on"))
    }

    /// Start or stop consumption measures.
    ///
    /// Stops when `consumption` is `None` or measures nothing.
    pub fn config_consumption(&self, consumption: Option<&Consumption>) -> i32 {
        let cmd = Command::new("config_consumption_measure");
        let cmd = match consumption {
            Some(c) if c.is_enabled() => cmd
                .arg("start")
                .arg(&c.source)
                .args(["p", flag(c.power)])
                .args(["v", flag(c.voltage)])
                .args(["c", flag(c.current)])
                .arg("-p")
                .arg(c.period)
                .arg("-a")
                .arg(c.average),
            _ => cmd.arg("stop"),
        };
        self.send_cmd(cmd)
    }

    /// Configure radio measures, stopping them when `radio` is `None`.
    pub fn config_radio(&self, radio: Option<&Radio>) -> i32 {
        let Some(radio) = radio else {
            return self.send_cmd(Command::new("config_radio_stop"));
        };
        let cmd = match radio.mode {
            RadioMode::Rssi => Command::new("config_radio_measure")
                .arg(radio.channels_csv())
                .arg(radio.period)
                .arg(radio.num_per_channel),
            RadioMode::Sniffer => Command::new("config_radio_sniffer")
                .arg(radio.channels_csv())
                .arg(radio.period),
        };
        self.send_cmd(cmd)
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled {
        "1"
    } else {
        "0"
    }
}
