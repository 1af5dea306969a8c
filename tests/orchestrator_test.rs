//! Experiment orchestration with recording node doubles.

mod common;

use common::{gateway_config, wait_until};
use iotlab_gateway::control_node::ControlNode;
use iotlab_gateway::experiment::{ExpFileKind, ExperimentFiles, ExperimentOrchestrator};
use iotlab_gateway::logging::ExperimentLogSink;
use iotlab_gateway::open_node::OpenNode;
use iotlab_gateway::profile::{Power, Profile};
use iotlab_gateway::registry::NodeRegistry;
use iotlab_gateway::GatewayError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

type Calls = Arc<Mutex<Vec<String>>>;

/// Records calls; `slow` names the one call that sleeps for `delay`.
#[derive(Clone)]
struct Behavior {
    calls: Calls,
    result: i32,
    slow: &'static str,
    delay: Duration,
}

impl Behavior {
    fn new(calls: &Calls) -> Self {
        Self {
            calls: calls.clone(),
            result: 0,
            slow: "",
            delay: Duration::ZERO,
        }
    }

    fn failing(mut self) -> Self {
        self.result = 1;
        self
    }

    fn slow(mut self, call: &'static str, delay: Duration) -> Self {
        self.slow = call;
        self.delay = delay;
        self
    }

    fn record(&self, call: &str) -> i32 {
        self.calls.lock().push(call.to_string());
        if call.starts_with(self.slow) && !self.slow.is_empty() {
            thread::sleep(self.delay);
        }
        self.result
    }
}

struct MockControlNode(Behavior);

impl ControlNode for MockControlNode {
    fn start(&mut self, exp_id: u32, files: Option<&ExperimentFiles>) -> i32 {
        if let Some(files) = files {
            std::fs::write(files.path(ExpFileKind::Consumption), "measures\n").unwrap();
        }
        self.0.record(&format!("cn.start {}", exp_id))
    }
    fn stop(&mut self) -> i32 {
        self.0.record("cn.stop")
    }
    fn start_experiment(&mut self, profile: &Profile) -> i32 {
        self.0
            .record(&format!("cn.start_experiment {}", profile.profilename))
    }
    fn stop_experiment(&mut self) -> i32 {
        self.0.record("cn.stop_experiment")
    }
    fn configure_profile(&mut self, profile: Option<&Profile>) -> i32 {
        let name = profile.map_or("default", |p| p.profilename.as_str());
        self.0.record(&format!("cn.configure_profile {}", name))
    }
    fn open_start(&mut self, _power: Option<Power>) -> i32 {
        self.0.record("cn.open_start")
    }
    fn open_stop(&mut self, _power: Option<Power>) -> i32 {
        self.0.record("cn.open_stop")
    }
    fn status(&self) -> i32 {
        self.0.record("cn.status")
    }
}

/// Accepts firmwares with an `.elf` extension.
struct MockOpenNode(Behavior);

impl OpenNode for MockOpenNode {
    fn setup(&mut self, firmware: Option<&Path>) -> i32 {
        self.0.record(&format!("on.setup {}", describe(firmware)))
    }
    fn teardown(&mut self) -> i32 {
        self.0.record("on.teardown")
    }
    fn flash(&mut self, firmware: Option<&Path>) -> i32 {
        self.0.record(&format!("on.flash {}", describe(firmware)))
    }
    fn status(&self) -> i32 {
        self.0.record("on.status")
    }
    fn firmware_compatible(&self, firmware: &Path) -> bool {
        firmware.extension().is_some_and(|ext| ext == "elf")
    }
}

fn describe(firmware: Option<&Path>) -> String {
    firmware.map_or("idle".to_string(), |path| path.display().to_string())
}

struct Fixture {
    dir: TempDir,
    calls: Calls,
    orchestrator: ExperimentOrchestrator,
}

fn fixture(cn: impl FnOnce(Behavior) -> Behavior, on: impl FnOnce(Behavior) -> Behavior) -> Fixture {
    let dir = TempDir::new().unwrap();
    let calls = Calls::default();
    let orchestrator = ExperimentOrchestrator::new(
        &gateway_config(dir.path()),
        Box::new(MockControlNode(cn(Behavior::new(&calls)))),
        Box::new(MockOpenNode(on(Behavior::new(&calls)))),
        ExperimentLogSink::new(),
    );
    Fixture {
        dir,
        calls,
        orchestrator,
    }
}

fn idle() -> Fixture {
    fixture(|b| b, |b| b)
}

fn taken(calls: &Calls) -> Vec<String> {
    std::mem::take(&mut *calls.lock())
}

fn profile(json: &str) -> Profile {
    Profile::from_json(json, "3.3V").unwrap()
}

#[test]
fn start_and_stop_experiment() {
    let fx = idle();
    let firmware = PathBuf::from("/tmp/app.elf");

    let ret = fx
        .orchestrator
        .exp_start("alice", 42, Some(&firmware), None, Duration::ZERO)
        .unwrap();
    assert_eq!(ret, 0);
    assert_eq!(
        taken(&fx.calls),
        vec![
            "cn.start 42",
            "on.setup /tmp/app.elf",
            "cn.start_experiment _default_profile"
        ]
    );

    let experiment = fx.orchestrator.current().unwrap().unwrap();
    assert_eq!(experiment.id, 42);
    assert_eq!(experiment.user, "alice");
    assert!(experiment.running);
    assert_eq!(experiment.deadline, None);

    let exp_dir = fx.dir.path().join("alice/.iotlab/42");
    assert!(exp_dir.join("radio/m3-1.oml").exists());

    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);
    assert_eq!(
        taken(&fx.calls),
        vec!["cn.stop_experiment", "on.teardown", "cn.stop"]
    );
    assert_eq!(fx.orchestrator.current().unwrap(), None);

    // only the files that received data are kept
    assert!(exp_dir.join("consumption/m3-1.oml").exists());
    assert!(!exp_dir.join("radio/m3-1.oml").exists());
    assert!(!exp_dir.join("event/m3-1.oml").exists());
}

#[test]
fn stop_without_experiment_does_nothing() {
    let fx = idle();
    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);
    assert!(taken(&fx.calls).is_empty());
}

#[test]
fn failures_are_summed_without_short_circuit() {
    let fx = fixture(Behavior::failing, Behavior::failing);

    let ret = fx
        .orchestrator
        .exp_start("alice", 1, None, None, Duration::ZERO)
        .unwrap();
    assert_eq!(ret, 3);
    assert_eq!(taken(&fx.calls).len(), 3);
    assert!(fx.orchestrator.current().unwrap().is_some());

    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 3);
    assert_eq!(taken(&fx.calls).len(), 3);
    assert_eq!(fx.orchestrator.current().unwrap(), None);
}

#[test]
fn invalid_start_requests_change_nothing() {
    let fx = idle();
    let bad_profile = profile(
        r#"{"profilename": "bad", "power": "dc", "consumption": {"period": 3, "average": 1}}"#,
    );
    let hex = PathBuf::from("/tmp/app.hex");

    for user in ["", "../root", "eve smith"] {
        let ret = fx
            .orchestrator
            .exp_start(user, 1, None, None, Duration::ZERO)
            .unwrap();
        assert_eq!(ret, 1, "{:?}", user);
    }
    let ret = fx
        .orchestrator
        .exp_start("alice", 1, None, Some(bad_profile), Duration::ZERO)
        .unwrap();
    assert_eq!(ret, 1);
    let ret = fx
        .orchestrator
        .exp_start("alice", 1, Some(&hex), None, Duration::ZERO)
        .unwrap();
    assert_eq!(ret, 1);

    assert!(taken(&fx.calls).is_empty());
    assert_eq!(fx.orchestrator.current().unwrap(), None);
    assert!(!fx.dir.path().join("alice").exists());
}

#[test]
fn starting_over_a_running_experiment_stops_it_first() {
    let fx = idle();
    fx.orchestrator
        .exp_start("alice", 1, None, None, Duration::ZERO)
        .unwrap();
    taken(&fx.calls);

    let ret = fx
        .orchestrator
        .exp_start("bob", 2, None, None, Duration::ZERO)
        .unwrap();
    assert_eq!(ret, 0);
    assert_eq!(
        taken(&fx.calls),
        vec![
            "cn.stop_experiment",
            "on.teardown",
            "cn.stop",
            "cn.start 2",
            "on.setup idle",
            "cn.start_experiment _default_profile",
        ]
    );
    let experiment = fx.orchestrator.current().unwrap().unwrap();
    assert_eq!((experiment.id, experiment.user.as_str()), (2, "bob"));
}

#[test]
fn concurrent_operations_are_rejected_as_busy() {
    let fx = fixture(|b| b.slow("cn.start ", Duration::from_millis(400)), |b| b);
    let orchestrator = fx.orchestrator.clone();
    let starter = thread::spawn(move || {
        orchestrator
            .exp_start("alice", 1, None, None, Duration::ZERO)
            .unwrap()
    });

    assert!(wait_until(Duration::from_secs(1), || !fx.calls.lock().is_empty()));
    assert!(matches!(
        fx.orchestrator
            .exp_start("bob", 2, None, None, Duration::ZERO),
        Err(GatewayError::Busy(_))
    ));
    assert!(fx.orchestrator.exp_stop().unwrap_err().is_busy());
    assert!(fx.orchestrator.status().unwrap_err().is_busy());
    assert!(fx.orchestrator.current().unwrap_err().is_busy());

    assert_eq!(starter.join().unwrap(), 0);
    let experiment = fx.orchestrator.current().unwrap().unwrap();
    assert_eq!(experiment.user, "alice");
    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);
}

#[test]
fn timeout_stops_the_experiment() {
    let fx = idle();
    let ret = fx
        .orchestrator
        .exp_start("alice", 7, None, None, Duration::from_millis(150))
        .unwrap();
    assert_eq!(ret, 0);
    assert!(fx.orchestrator.current().unwrap().unwrap().deadline.is_some());

    assert!(wait_until(Duration::from_secs(3), || matches!(
        fx.orchestrator.current(),
        Ok(None)
    )));
    let calls = taken(&fx.calls);
    assert_eq!(
        &calls[3..],
        &["cn.stop_experiment", "on.teardown", "cn.stop"]
    );
}

#[test]
fn manual_stop_cancels_the_timer() {
    let fx = idle();
    fx.orchestrator
        .exp_start("alice", 7, None, None, Duration::from_millis(200))
        .unwrap();
    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);

    thread::sleep(Duration::from_millis(500));
    let stops = fx
        .calls
        .lock()
        .iter()
        .filter(|call| *call == "cn.stop")
        .count();
    assert_eq!(stops, 1);
}

#[test]
fn stale_timer_does_not_stop_the_next_experiment() {
    let fx = idle();
    fx.orchestrator
        .exp_start("alice", 1, None, None, Duration::from_millis(200))
        .unwrap();
    // replaced before expiring, without a timeout of its own
    fx.orchestrator
        .exp_start("bob", 2, None, None, Duration::ZERO)
        .unwrap();

    thread::sleep(Duration::from_millis(500));
    let experiment = fx.orchestrator.current().unwrap().unwrap();
    assert_eq!(experiment.id, 2);
    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);
}

#[test]
fn timeout_during_another_operation_is_deferred() {
    let fx = fixture(
        |b| b.slow("cn.configure_profile", Duration::from_millis(500)),
        |b| b,
    );
    fx.orchestrator
        .exp_start("alice", 3, None, None, Duration::from_millis(150))
        .unwrap();
    assert_eq!(fx.orchestrator.exp_update_profile(None).unwrap(), 0);

    // the timer fired while the update held the lock and stops once it is free
    assert!(wait_until(Duration::from_secs(2), || matches!(
        fx.orchestrator.current(),
        Ok(None)
    )));
    thread::sleep(Duration::from_millis(200));
    let stops = fx.calls.lock().iter().filter(|call| *call == "cn.stop").count();
    assert_eq!(stops, 1);
    assert_eq!(fx.orchestrator.exp_stop().unwrap(), 0);
}

#[test]
fn update_profile_validates_then_forwards() {
    let fx = idle();
    let battery = profile(r#"{"profilename": "battery", "power": "battery"}"#);
    let bad = profile(r#"{"profilename": "bad", "power": "dc", "radio": {"mode": "rssi", "channels": [], "period": 1, "num_per_channel": 1}}"#);

    assert_eq!(fx.orchestrator.exp_update_profile(Some(bad)).unwrap(), 1);
    assert_eq!(fx.orchestrator.exp_update_profile(Some(battery)).unwrap(), 0);
    assert_eq!(fx.orchestrator.exp_update_profile(None).unwrap(), 0);
    assert_eq!(
        taken(&fx.calls),
        vec!["cn.configure_profile battery", "cn.configure_profile default"]
    );
}

#[test]
fn flash_and_status() {
    let fx = fixture(|b| b, Behavior::failing);
    let elf = PathBuf::from("/tmp/app.elf");
    let hex = PathBuf::from("/tmp/app.hex");

    assert_eq!(fx.orchestrator.open_flash(Some(&hex)).unwrap(), 1);
    assert!(taken(&fx.calls).is_empty());
    assert_eq!(fx.orchestrator.open_flash(Some(&elf)).unwrap(), 1);
    assert_eq!(fx.orchestrator.open_flash(None).unwrap(), 1);
    assert_eq!(fx.orchestrator.status().unwrap(), 1);
    assert_eq!(
        taken(&fx.calls),
        vec!["on.flash /tmp/app.elf", "on.flash idle", "cn.status", "on.status"]
    );
}

#[test]
fn drivers_built_from_configuration() {
    let dir = TempDir::new().unwrap();
    let mut config = gateway_config(dir.path());
    config.gateway.control_node = "no".to_string();
    config.gateway.open_node = "no".to_string();

    let orchestrator =
        ExperimentOrchestrator::from_config(&config, &NodeRegistry::with_builtin(), ExperimentLogSink::new())
            .unwrap();
    assert_eq!(orchestrator.status().unwrap(), 0);
    assert_eq!(
        orchestrator
            .exp_start("alice", 5, None, None, Duration::ZERO)
            .unwrap(),
        0
    );
    assert_eq!(orchestrator.exp_stop().unwrap(), 0);

    config.gateway.open_node = "fpga".to_string();
    assert!(matches!(
        ExperimentOrchestrator::from_config(&config, &NodeRegistry::with_builtin(), ExperimentLogSink::new()),
        Err(GatewayError::UnknownNodeType { .. })
    ));
}
