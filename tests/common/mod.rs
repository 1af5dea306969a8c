//! Common helpers for the gateway integration tests
//!
//! Fake control node programs are `/bin/sh` scripts written into a temporary
//! directory. They receive the same arguments as the real serial program
//! and talk the same line protocol on stdin/stderr.

#![allow(dead_code)] // each test binary uses a subset

use iotlab_gateway::config::{ControlNodeSettings, GatewayConfig, SupervisorSettings};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// Control node program that ACKs every command.
///
/// Writes its arguments to `args`, each received command to `received`, and
/// copies the `-c` config file to `oml_copy`. Special commands:
/// `nack_me` is NACKed, `silent` gets no answer, `emit` also prints a
/// consumption measure.
pub const ACK_NODE: &str = r#"
DIR="$(dirname "$0")"
echo "$@" > "$DIR/args"
prev=""
for arg in "$@"; do
    if [ "$prev" = "-c" ]; then cp "$arg" "$DIR/oml_copy"; fi
    prev="$arg"
done
echo cn_serial_ready >&2
while read -r cmd rest; do
    echo "$cmd${rest:+ $rest}" >> "$DIR/received"
    case "$cmd" in
        nack_me) echo "$cmd NACK" >&2 ;;
        silent) ;;
        emit)
            echo "measures_debug: consumption_measure 12.5 0.1 3.3 0.03" >&2
            echo "$cmd ACK" >&2
            ;;
        *) echo "$cmd ACK" >&2 ;;
    esac
done
"#;

/// Write an executable `/bin/sh` script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Fast timeouts for a fake control node program at `binary`.
pub fn link_settings(binary: &Path) -> ControlNodeSettings {
    ControlNodeSettings {
        binary: binary.to_path_buf(),
        tty: "/dev/null".to_string(),
        answer_timeout: Duration::from_millis(500),
        ready_timeout: Duration::from_secs(2),
        stop_timeout: Duration::from_secs(1),
    }
}

/// Fast escalation for supervisor tests.
pub fn supervisor_settings() -> SupervisorSettings {
    SupervisorSettings {
        sigterm_count: 2,
        sigint_count: 2,
        signal_interval: Duration::from_millis(100),
        restart_backoff: Duration::from_millis(50),
        start_timeout: Duration::from_secs(5),
    }
}

/// Gateway configuration writing experiment files under `root`.
pub fn gateway_config(root: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.gateway.exp_files_dir = root.to_path_buf();
    config.supervisor = supervisor_settings();
    config
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Lines of `path`, empty when the file does not exist.
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
