//! External process management: escalating signals, the restart loop, and
//! the serial redirection built on top of it.

pub mod redirection;
pub mod signals;
pub mod supervisor;

pub use redirection::serial_redirection;
pub use signals::{send_group_signal, send_signal, SignalEscalation};
pub use supervisor::ProcessSupervisor;
