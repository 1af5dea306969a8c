//! Keep an external program running until told to stop.
//!
//! A [`ProcessSupervisor`] owns one background thread that launches the
//! configured command, waits for it, and launches it again while it should
//! run. [`ProcessSupervisor::stop`] escalates from SIGTERM to SIGINT to SIGKILL
//! until the thread is gone, so the caller always gets the program back dead.

use crate::config::SupervisorSettings;
use crate::error::{AppResult, GatewayError};
use crate::process::signals::{send_signal, SignalEscalation};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch {
    Pending,
    Launched,
    Failed(io::ErrorKind),
}

struct Shared {
    should_run: AtomicBool,
    pid: Mutex<Option<u32>>,
    launch: Mutex<Launch>,
    changed: Condvar,
}

impl Shared {
    fn set_launch(&self, state: Launch) {
        *self.launch.lock() = state;
        self.changed.notify_all();
    }

    /// Sleep `delay` unless `stop` interrupts it.
    fn backoff(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut launch = self.launch.lock();
        while self.should_run.load(Ordering::SeqCst) {
            if self.changed.wait_until(&mut launch, deadline).timed_out() {
                break;
            }
        }
    }
}

/// Restart loop around one external command.
pub struct ProcessSupervisor {
    name: String,
    argv: Vec<String>,
    settings: SupervisorSettings,
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessSupervisor {
    /// Supervise `argv` (program followed by its arguments).
    pub fn new(
        name: impl Into<String>,
        argv: Vec<String>,
        settings: SupervisorSettings,
    ) -> AppResult<Self> {
        let name = name.into();
        if argv.is_empty() {
            return Err(GatewayError::Configuration(format!(
                "{}: empty command line",
                name
            )));
        }
        Ok(Self {
            name,
            argv,
            settings,
            shared: Arc::new(Shared {
                should_run: AtomicBool::new(false),
                pid: Mutex::new(None),
                launch: Mutex::new(Launch::Pending),
                changed: Condvar::new(),
            }),
            thread: Mutex::new(None),
        })
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Supervised command line.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Pid of the currently running instance.
    pub fn pid(&self) -> Option<u32> {
        *self.shared.pid.lock()
    }

    /// True while the restart loop thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Launch the restart loop and wait for the first launch.
    ///
    /// Fails if the loop is already running, if the program cannot be spawned,
    /// or if it was not launched within `start_timeout`.
    pub fn start(&self) -> AppResult<()> {
        {
            let mut thread = self.thread.lock();
            if thread.is_some() {
                return Err(GatewayError::AlreadyRunning(self.name.clone()));
            }
            debug!(name = %self.name, "start");

            *self.shared.launch.lock() = Launch::Pending;
            self.shared.should_run.store(true, Ordering::SeqCst);

            let name = self.name.clone();
            let argv = self.argv.clone();
            let backoff = self.settings.restart_backoff;
            let shared = self.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-loop", self.name))
                .spawn(move || restart_loop(&name, &argv, backoff, &shared))?;
            *thread = Some(handle);
        }

        let deadline = Instant::now() + self.settings.start_timeout;
        let outcome = {
            let mut launch = self.shared.launch.lock();
            while *launch == Launch::Pending {
                if self.shared.changed.wait_until(&mut launch, deadline).timed_out() {
                    break;
                }
            }
            *launch
        };

        match outcome {
            Launch::Launched => Ok(()),
            Launch::Failed(kind) => {
                // the loop already gave up, reap it so `start` can be retried
                if let Some(handle) = self.thread.lock().take() {
                    let _ = handle.join();
                }
                self.shared.should_run.store(false, Ordering::SeqCst);
                Err(GatewayError::Spawn {
                    name: self.name.clone(),
                    source: io::Error::from(kind),
                })
            }
            Launch::Pending => Err(GatewayError::StartTimeout {
                name: self.name.clone(),
                timeout: self.settings.start_timeout,
            }),
        }
    }

    /// Stop the loop and the program, then reset so `start` may be called again.
    ///
    /// Signals escalate while the loop thread is alive; returns once it has
    /// been joined. Calling `stop` on a stopped supervisor is a no-op.
    pub fn stop(&self) -> AppResult<()> {
        {
            let _launch = self.shared.launch.lock();
            self.shared.should_run.store(false, Ordering::SeqCst);
            self.shared.changed.notify_all();
        }

        let Some(handle) = self.thread.lock().take() else {
            return Ok(());
        };
        debug!(name = %self.name, "stop");

        let mut signals =
            SignalEscalation::new(self.settings.sigterm_count, self.settings.sigint_count);
        while !handle.is_finished() {
            let pid = *self.shared.pid.lock();
            if let (Some(pid), Some(signal)) = (pid, signals.next()) {
                if let Err(err) = send_signal(pid, signal) {
                    // keep ownership so a later stop can finish the job
                    *self.thread.lock() = Some(handle);
                    return Err(err);
                }
            }
            thread::sleep(self.settings.signal_interval);
        }

        handle
            .join()
            .map_err(|_| GatewayError::ThreadPanicked(self.name.clone()))?;
        *self.shared.pid.lock() = None;
        *self.shared.launch.lock() = Launch::Pending;
        debug!(name = %self.name, "stopped");
        Ok(())
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            error!(name = %self.name, %err, "failed to stop supervised process");
        }
    }
}

fn restart_loop(name: &str, argv: &[String], backoff: Duration, shared: &Shared) {
    debug!(name, "supervisor thread started");
    let mut launched_once = false;

    while shared.should_run.load(Ordering::SeqCst) {
        let spawned = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                error!(name, %err, "failed to launch {}", argv[0]);
                if !launched_once {
                    shared.set_launch(Launch::Failed(err.kind()));
                    return;
                }
                shared.backoff(backoff);
                continue;
            }
        };
        launched_once = true;
        *shared.pid.lock() = Some(child.id());
        shared.set_launch(Launch::Launched);

        let status = child.wait();
        *shared.pid.lock() = None;

        let should_run = shared.should_run.load(Ordering::SeqCst);
        match status {
            Ok(status) if should_run && !status.success() => {
                warn!(name, %status, "process exited, restarting");
            }
            Ok(status) => debug!(name, %status, "process exited"),
            Err(err) => error!(name, %err, "failed to wait for process"),
        }
        if should_run {
            shared.backoff(backoff);
        }
    }
    debug!(name, "supervisor thread stopped");
}
