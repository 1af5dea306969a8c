//! Experiment start/stop sequencing.
//!
//! The orchestrator owns the single experiment record and the node drivers
//! behind a [`NonBlockingLock`]. Each public operation either gets the lock
//! immediately or fails with [`GatewayError::Busy`]; nothing queues. An
//! experiment armed with a timeout is stopped by an [`ExpirationTimer`] going
//! through the same locked stop path as a manual [`exp_stop`]. A timer that
//! finds the lock held retries until it gets it or its experiment is gone.
//!
//! Node calls return integer codes. They are summed without short-circuiting,
//! so a start or stop always runs every step and reports how many failed.
//!
//! [`exp_stop`]: ExperimentOrchestrator::exp_stop

use crate::config::GatewayConfig;
use crate::control_node::ControlNode;
use crate::error::{AppResult, GatewayError};
use crate::experiment::files::{ExpFileKind, ExperimentFiles};
use crate::experiment::timer::ExpirationTimer;
use crate::logging::ExperimentLogSink;
use crate::open_node::OpenNode;
use crate::profile::Profile;
use crate::registry::NodeRegistry;
use crate::sync::NonBlockingLock;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Delay between expiry attempts while another operation holds the lock.
const EXPIRY_RETRY: Duration = Duration::from_millis(50);

/// Current experiment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub id: u32,
    pub user: String,
    /// False while the stop sequence runs
    pub running: bool,
    /// Expiration instant, when armed with a timeout
    pub deadline: Option<Instant>,
    pub started_at: DateTime<Utc>,
}

struct GatewayState {
    experiment: Option<Experiment>,
    timer: Option<ExpirationTimer>,
    files: Option<ExperimentFiles>,
    control_node: Box<dyn ControlNode>,
    open_node: Box<dyn OpenNode>,
}

struct Inner {
    state: NonBlockingLock<GatewayState>,
    node_id: String,
    exp_files_dir: PathBuf,
    log_sink: ExperimentLogSink,
}

/// Serializes experiment operations on one gateway.
#[derive(Clone)]
pub struct ExperimentOrchestrator {
    inner: Arc<Inner>,
}

impl ExperimentOrchestrator {
    /// Orchestrate the given drivers.
    pub fn new(
        config: &GatewayConfig,
        control_node: Box<dyn ControlNode>,
        open_node: Box<dyn OpenNode>,
        log_sink: ExperimentLogSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: NonBlockingLock::new(GatewayState {
                    experiment: None,
                    timer: None,
                    files: None,
                    control_node,
                    open_node,
                }),
                node_id: config.gateway.node_id.clone(),
                exp_files_dir: config.gateway.exp_files_dir.clone(),
                log_sink,
            }),
        }
    }

    /// Build the drivers named in `config` from `registry`.
    pub fn from_config(
        config: &GatewayConfig,
        registry: &NodeRegistry,
        log_sink: ExperimentLogSink,
    ) -> AppResult<Self> {
        let control_node = registry.create_control_node(config)?;
        let open_node = registry.create_open_node(config)?;
        Ok(Self::new(config, control_node, open_node, log_sink))
    }

    /// Start an experiment, stopping the current one first.
    ///
    /// `profile` defaults to the DC profile without measures. A non-zero
    /// `timeout` arms an expiration timer. Returns the number of failed
    /// steps; invalid inputs return 1 before anything is started. The only
    /// error is `Busy`.
    pub fn exp_start(
        &self,
        user: &str,
        exp_id: u32,
        firmware: Option<&Path>,
        profile: Option<Profile>,
        timeout: Duration,
    ) -> AppResult<i32> {
        let guard = self.inner.state.try_enter("start experiment")?;
        let mut state = guard.state()?;
        let state = &mut *state;

        if state.experiment.is_some() {
            info!("Experiment already running, stopping it first");
            self.inner.stop_sequence(state);
        }

        let profile = profile.unwrap_or_default();
        if let Err(err) = validate_start(state, user, firmware, &profile) {
            error!(%err, "Start experiment rejected");
            return Ok(1);
        }

        info!(user, exp_id, "Start experiment");
        let mut ret = 0;
        let files = match ExperimentFiles::create(
            &self.inner.exp_files_dir,
            user,
            exp_id,
            &self.inner.node_id,
        ) {
            Ok(files) => {
                if let Err(err) = self.inner.log_sink.attach(&files.path(ExpFileKind::Log)) {
                    warn!(%err, "Cannot attach experiment log");
                }
                Some(files)
            }
            Err(err) => {
                error!(%err, "Cannot create experiment files");
                ret += 1;
                None
            }
        };

        state.experiment = Some(Experiment {
            id: exp_id,
            user: user.to_string(),
            running: true,
            deadline: Instant::now()
                .checked_add(timeout)
                .filter(|_| !timeout.is_zero()),
            started_at: Utc::now(),
        });

        ret += state.control_node.start(exp_id, files.as_ref());
        ret += state.open_node.setup(firmware);
        ret += state.control_node.start_experiment(&profile);
        state.files = files;

        if !timeout.is_zero() {
            match self.arm_timer(timeout, exp_id, user) {
                Ok(timer) => state.timer = Some(timer),
                Err(err) => {
                    error!(%err, "Cannot arm experiment timer");
                    ret += 1;
                }
            }
        }

        info!(ret, "Start experiment done");
        Ok(ret)
    }

    /// Stop the current experiment. Returns 0 when none is running.
    pub fn exp_stop(&self) -> AppResult<i32> {
        let guard = self.inner.state.try_enter("stop experiment")?;
        let mut state = guard.state()?;
        Ok(self.inner.stop_sequence(&mut state))
    }

    /// Apply a new profile, or the default one, to the running experiment.
    pub fn exp_update_profile(&self, profile: Option<Profile>) -> AppResult<i32> {
        let guard = self.inner.state.try_enter("update profile")?;
        let mut state = guard.state()?;
        if let Some(profile) = &profile {
            if let Err(err) = profile.validate() {
                error!(%err, "Update profile rejected");
                return Ok(1);
            }
        }
        info!("Update profile");
        Ok(state.control_node.configure_profile(profile.as_ref()))
    }

    /// Flash the open node, the idle firmware for `None`.
    pub fn open_flash(&self, firmware: Option<&Path>) -> AppResult<i32> {
        let guard = self.inner.state.try_enter("flash open node")?;
        let mut state = guard.state()?;
        if let Some(path) = firmware {
            if !state.open_node.firmware_compatible(path) {
                let err = GatewayError::IncompatibleFirmware(path.display().to_string());
                error!(%err, "Flash rejected");
                return Ok(1);
            }
        }
        Ok(state.open_node.flash(firmware))
    }

    /// Hardware check of both nodes.
    pub fn status(&self) -> AppResult<i32> {
        let guard = self.inner.state.try_enter("check status")?;
        let state = guard.state()?;
        Ok(state.control_node.status() + state.open_node.status())
    }

    /// Snapshot of the experiment record.
    pub fn current(&self) -> AppResult<Option<Experiment>> {
        let guard = self.inner.state.try_enter("read experiment")?;
        let state = guard.state()?;
        Ok(state.experiment.clone())
    }

    fn arm_timer(&self, timeout: Duration, exp_id: u32, user: &str) -> std::io::Result<ExpirationTimer> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let user = user.to_string();
        debug!(?timeout, exp_id, "arming experiment timer");
        ExpirationTimer::arm(timeout, EXPIRY_RETRY, move || {
            inner
                .upgrade()
                .map_or(true, |inner| inner.expire(exp_id, &user))
        })
    }
}

impl Inner {
    /// Stop sequence, run with the lock held. 0 when idle.
    fn stop_sequence(&self, state: &mut GatewayState) -> i32 {
        let Some(experiment) = state.experiment.as_mut() else {
            return 0;
        };
        experiment.running = false;
        info!(user = %experiment.user, exp_id = experiment.id, "Stop experiment");

        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }

        let mut ret = state.control_node.stop_experiment();
        ret += state.open_node.teardown();
        ret += state.control_node.stop();

        info!(ret, "Stop experiment done");
        self.log_sink.detach();
        if let Some(files) = state.files.take() {
            files.cleanup();
        }
        state.experiment = None;
        ret
    }

    /// Timer callback: stop the experiment if it is still the armed one.
    /// Stop the experiment `(exp_id, user)` if it is still the current one.
    ///
    /// Returns false when the lock is held elsewhere so the timer tries again.
    fn expire(&self, exp_id: u32, user: &str) -> bool {
        let guard = match self.state.try_enter("expire experiment") {
            Ok(guard) => guard,
            Err(err) => {
                debug!(%err, exp_id, "Experiment timeout while another operation runs, retrying");
                return false;
            }
        };
        let mut state = match guard.state() {
            Ok(state) => state,
            Err(err) => {
                warn!(%err, exp_id, "Experiment timeout deferred");
                return false;
            }
        };

        match &state.experiment {
            Some(current) if current.id == exp_id && current.user == user => {}
            _ => {
                debug!(exp_id, user, "stale experiment timer ignored");
                return true;
            }
        }
        info!(exp_id, user, "Experiment timeout");
        let ret = self.stop_sequence(&mut state);
        if ret != 0 {
            error!(ret, "Stop after timeout failed");
        }
        true
    }
}

fn validate_start(
    state: &GatewayState,
    user: &str,
    firmware: Option<&Path>,
    profile: &Profile,
) -> AppResult<()> {
    validate_user(user)?;
    profile.validate()?;
    if let Some(path) = firmware {
        if !state.open_node.firmware_compatible(path) {
            return Err(GatewayError::IncompatibleFirmware(
                path.display().to_string(),
            ));
        }
    }
    Ok(())
}

/// User names become a path component of the experiment files.
fn validate_user(user: &str) -> AppResult<()> {
    let valid = !user.is_empty()
        && user != "."
        && user != ".."
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(GatewayError::InvalidUser(user.to_string()))
    }
}
