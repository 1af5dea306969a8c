//! Transport to the control node serial program.
//!
//! The program is a long-lived child process. Commands are written to its
//! stdin, one at a time; everything it reports comes back on stderr and is
//! classified by a reader thread (see [`LinkLine`]). Answers go through a
//! one-slot [`Mailbox`]: the slot only ever holds the newest line, and
//! [`ControlLink::send`] empties it before writing, so a caller never
//! observes an answer older than its own command.
//!
//! The reader only ends when stderr reaches EOF. The program runs in its own
//! process group and [`ControlLink::stop`] kills what is left of that group
//! once the program is reaped, so helpers that inherited stderr cannot keep
//! the pipe open.

use crate::config::ControlNodeSettings;
use crate::control_node::line::LinkLine;
use crate::control_node::message::{Answer, Command};
use crate::control_node::protocol::CommandSender;
use crate::error::TransportError;
use crate::process::signals::send_group_signal;
use crate::sync::Mailbox;
use nix::sys::signal::Signal;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdin, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

/// Callback receiving raw `measures_debug:` lines.
pub type MeasuresHandler = Arc<dyn Fn(&str) + Send + Sync>;

const STOP_POLL: Duration = Duration::from_millis(10);

/// Control node program and its pipes.
pub struct ControlLink {
    settings: ControlNodeSettings,
    process: Mutex<Option<Child>>,
    // also serializes `send`: one command in flight
    stdin: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    answers: Arc<Mailbox<Answer>>,
    ready: Arc<Mailbox<bool>>,
    measures_handler: Option<MeasuresHandler>,
    oml_config: Mutex<Option<NamedTempFile>>,
}

impl ControlLink {
    /// Create a stopped link.
    pub fn new(settings: ControlNodeSettings) -> Self {
        Self {
            settings,
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            reader: Mutex::new(None),
            answers: Arc::new(Mailbox::new("answer")),
            ready: Arc::new(Mailbox::new("ready")),
            measures_handler: None,
            oml_config: Mutex::new(None),
        }
    }

    /// Forward measurement lines to `handler` and run the program with `-d`.
    pub fn with_measures_handler(mut self, handler: MeasuresHandler) -> Self {
        self.measures_handler = Some(handler);
        self
    }

    /// True between a `start` and the matching `stop`.
    pub fn is_started(&self) -> bool {
        self.process.lock().is_some()
    }

    /// Spawn the program and wait for its ready marker.
    ///
    /// `oml_config` is written to a temporary file passed with `-c`.
    /// Returns 0 once `cn_serial_ready` is seen, 1 otherwise.
    pub fn start(&self, oml_config: Option<&str>) -> i32 {
        let mut process = self.process.lock();
        if process.is_some() {
            error!("Control node serial program already started");
            return 1;
        }

        let config_file = match oml_config.map(write_config).transpose() {
            Ok(file) => file,
            Err(err) => {
                error!(%err, "Failed to write OML config");
                return 1;
            }
        };

        let mut cmd = std::process::Command::new(&self.settings.binary);
        cmd.arg("-t").arg(&self.settings.tty);
        if let Some(file) = &config_file {
            cmd.arg("-c").arg(file.path());
        }
        if self.measures_handler.is_some() {
            cmd.arg("-d");
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(binary = %self.settings.binary.display(), %err,
                    "Failed to launch control node serial program");
                return 1;
            }
        };
        debug!(pid = child.id(), "control node serial program started");

        let (Some(stdin), Some(stderr)) = (child.stdin.take(), child.stderr.take()) else {
            error!("Control node serial program pipes unavailable");
            let _ = child.kill();
            let _ = child.wait();
            return 1;
        };

        self.answers.clear();
        self.ready.clear();
        *process = Some(child);
        *self.stdin.lock() = Some(stdin);
        *self.oml_config.lock() = config_file;
        drop(process);

        let reader = ReaderContext {
            answers: self.answers.clone(),
            ready: self.ready.clone(),
            measures_handler: self.measures_handler.clone(),
        };
        match thread::Builder::new()
            .name("cn-reader".to_string())
            .spawn(move || reader.run(stderr))
        {
            Ok(handle) => *self.reader.lock() = Some(handle),
            Err(err) => {
                error!(%err, "Failed to spawn control node reader thread");
                self.stop();
                return 1;
            }
        }

        match self.ready.take(self.settings.ready_timeout) {
            Some(true) => 0,
            Some(false) => {
                error!("Control node serial program exited before being ready");
                1
            }
            None => {
                error!(timeout = ?self.settings.ready_timeout,
                    "Control node serial program not ready");
                1
            }
        }
    }

    /// Terminate the program and join the reader thread. Always returns 0.
    ///
    /// SIGTERM to the program's process group first, SIGKILL after
    /// `stop_timeout`. Group members outliving the program are killed before
    /// the reader is joined. Safe to call when never started or already
    /// stopped.
    pub fn stop(&self) -> i32 {
        let mut process = self.process.lock();
        let Some(child) = process.as_mut() else {
            return 0;
        };

        terminate(child, self.settings.stop_timeout);
        self.stdin.lock().take();
        if let Some(reader) = self.reader.lock().take() {
            if reader.join().is_err() {
                error!("Control node reader thread panicked");
            }
        }
        *process = None;
        self.oml_config.lock().take();
        self.answers.clear();
        self.ready.clear();
        debug!("control node serial program stopped");
        0
    }

    /// Send one command and wait `answer_timeout` for its answer.
    pub fn send(&self, command: &Command) -> Result<Answer, TransportError> {
        let mut stdin = self.stdin.lock();
        let Some(pipe) = stdin.as_mut() else {
            error!(command = %command, "Control node serial program not started");
            return Err(TransportError::Closed);
        };

        if let Some(stale) = self.answers.clear() {
            debug!(answer = %stale, "discarding unread answer");
        }

        let written = pipe
            .write_all(command.encode().as_bytes())
            .and_then(|()| pipe.flush());
        if let Err(err) = written {
            error!(command = %command, %err, "Control node serial program is terminated");
            return Err(TransportError::Io(err));
        }
        debug!(command = %command, "control_node_cmd");

        match self.answers.take(self.settings.answer_timeout) {
            Some(answer) => {
                debug!(answer = %answer, "control_node_answer");
                Ok(answer)
            }
            None => {
                error!(command = %command, "Control node answer timeout");
                Err(TransportError::Timeout(self.settings.answer_timeout))
            }
        }
    }
}

impl CommandSender for ControlLink {
    fn send(&self, command: &Command) -> Result<Answer, TransportError> {
        ControlLink::send(self, command)
    }
}

impl Drop for ControlLink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn write_config(xml: &str) -> io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("oml_")
        .suffix(".xml")
        .tempfile()?;
    file.write_all(xml.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn terminate(child: &mut Child, timeout: Duration) {
    let pgid = child.id();
    if let Err(err) = send_group_signal(pgid, Signal::SIGTERM) {
        warn!(%err, "Failed to terminate control node serial program");
    }

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "control node serial program exited");
                kill_leftovers(pgid);
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(STOP_POLL),
            Ok(None) => break,
            Err(err) => {
                error!(%err, "Control node process already terminated");
                kill_leftovers(pgid);
                return;
            }
        }
    }

    warn!(?timeout, "Control node serial program did not terminate, killing it");
    if let Err(err) = child.kill() {
        error!(%err, "Failed to kill control node serial program");
    }
    if let Err(err) = child.wait() {
        error!(%err, "Failed to reap control node serial program");
    }
    kill_leftovers(pgid);
}

/// SIGKILL whatever still runs in the program's process group.
fn kill_leftovers(pgid: u32) {
    if let Err(err) = send_group_signal(pgid, Signal::SIGKILL) {
        warn!(%err, pgid, "Failed to kill control node helper processes");
    }
}

struct ReaderContext {
    answers: Arc<Mailbox<Answer>>,
    ready: Arc<Mailbox<bool>>,
    measures_handler: Option<MeasuresHandler>,
}

impl ReaderContext {
    /// Classify stderr lines until the program closes it.
    fn run(self, stderr: ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        let mut ready_sent = false;

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "Control node stderr read failed");
                    break;
                }
            }
            ready_sent |= self.dispatch(&line);
        }

        debug!("control node reader stopped");
        if !ready_sent {
            self.ready.post(false);
        }
    }

    /// Returns true when `line` was the ready marker.
    fn dispatch(&self, line: &str) -> bool {
        let parsed = LinkLine::parse(line);
        match &parsed {
            LinkLine::ConfigAck { name, args } => {
                debug!(name = %name, args = ?args, "config_ack");
                if let Some(delay) = parsed.set_time_delay_us() {
                    info!(delay_us = delay, "Control Node set time delay: {} us", delay);
                }
            }
            LinkLine::Error(msg) => error!("Control node error: {}", msg),
            LinkLine::SerialError(raw) => error!("{}", raw),
            LinkLine::Measures(raw) => match &self.measures_handler {
                Some(handler) => handler(raw),
                None => debug!(line = %raw, "measures"),
            },
            LinkLine::Ready => {
                self.ready.post(true);
                return true;
            }
            LinkLine::Blank => {}
            LinkLine::Answer(answer) => {
                self.answers.post(answer.clone());
            }
        }
        false
    }
}
