//! Escalating termination signals.

use crate::error::{AppResult, GatewayError};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// Infinite signal sequence used to stop a process that refuses to exit.
///
/// Yields SIGTERM `sigterm` times, then SIGINT `sigint` times, then SIGKILL
/// forever.
#[derive(Debug, Clone)]
pub struct SignalEscalation {
    sigterm: u32,
    sigint: u32,
    sent: u32,
}

impl SignalEscalation {
    /// Create the sequence.
    pub fn new(sigterm: u32, sigint: u32) -> Self {
        Self {
            sigterm,
            sigint,
            sent: 0,
        }
    }
}

impl Iterator for SignalEscalation {
    type Item = Signal;

    fn next(&mut self) -> Option<Signal> {
        let index = self.sent;
        self.sent = self.sent.saturating_add(1);

        let kill_at = self.sigterm.saturating_add(self.sigint);
        if index < self.sigterm {
            return Some(Signal::SIGTERM);
        }
        if index < kill_at {
            if index == self.sigterm {
                info!("external process signal: escalating to SIGINT");
            }
            return Some(Signal::SIGINT);
        }
        if index == kill_at {
            warn!("external process signal: escalating to SIGKILL");
        }
        Some(Signal::SIGKILL)
    }
}

/// Send `signal` to `pid`.
///
/// A process that already exited (ESRCH) is not an error.
pub fn send_signal(pid: u32, signal: Signal) -> AppResult<()> {
    let raw = pid as i32;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pid, ?signal, "process already terminated");
            Ok(())
        }
        Err(source) => Err(GatewayError::Signal {
            pid: raw,
            signal,
            source,
        }),
    }
}

/// Send `signal` to every member of process group `pgid`.
///
/// An empty group (ESRCH) is not an error.
pub fn send_group_signal(pgid: u32, signal: Signal) -> AppResult<()> {
    let raw = pgid as i32;
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!(pgid, ?signal, "process group already empty");
            Ok(())
        }
        Err(source) => Err(GatewayError::Signal {
            pid: raw,
            signal,
            source,
        }),
    }
}
