//! TTY to TCP bridging through `socat`.

use crate::config::SupervisorSettings;
use crate::error::AppResult;
use crate::process::supervisor::ProcessSupervisor;

/// Command line exposing `tty` on TCP `port`.
pub fn serial_redirection_argv(tty: &str, baudrate: u32, port: u16) -> Vec<String> {
    vec![
        "socat".to_string(),
        "-d".to_string(),
        format!("TCP4-LISTEN:{},reuseaddr", port),
        format!("open:{},b{},echo=0,raw", tty, baudrate),
    ]
}

/// Supervisor keeping the redirection alive. Not started.
pub fn serial_redirection(
    tty: &str,
    baudrate: u32,
    port: u16,
    settings: SupervisorSettings,
) -> AppResult<ProcessSupervisor> {
    ProcessSupervisor::new(
        "serial_redirection",
        serial_redirection_argv(tty, baudrate, port),
        settings,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socat_arguments() {
        let redirection =
            serial_redirection("/dev/ttyON", 500_000, 20000, SupervisorSettings::default())
                .unwrap();
        assert_eq!(
            redirection.argv(),
            [
                "socat",
                "-d",
                "TCP4-LISTEN:20000,reuseaddr",
                "open:/dev/ttyON,b500000,echo=0,raw"
            ]
        );
        assert_eq!(redirection.name(), "serial_redirection");
    }
}
