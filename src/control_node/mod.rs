//! Control node: serial program transport, command protocol and drivers.
//!
//! - [`link`]: child process pipes and the stderr reader thread
//! - [`protocol`]: commands and ACK validation
//! - [`node`]: experiment level sequences ([`ControlNode`])

pub mod line;
pub mod link;
pub mod measures;
pub mod message;
pub mod node;
pub mod oml;
pub mod protocol;

pub use link::{ControlLink, MeasuresHandler};
pub use measures::Measure;
pub use message::{Answer, Command};
pub use node::{ControlNode, IotlabControlNode, NoControlNode};
pub use protocol::{CommandProtocol, CommandSender, PowerAction};
