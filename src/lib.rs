//! Control plane of an IoT testbed gateway.
//!
//! The gateway drives two boards for each experiment: a control node
//! (power and measurement micro-controller, reached through the
//! `control_node_serial_interface` program) and an open node (the device
//! under test). This library contains:
//!
//! - [`process`]: restart loop with escalating termination signals
//! - [`control_node`]: line protocol over the serial program's pipes
//! - [`experiment`]: the orchestrator serializing experiment start/stop
//!
//! Supporting modules cover configuration, logging, profiles, firmware
//! checks and the node registry.

pub mod config;
pub mod control_node;
pub mod error;
pub mod experiment;
pub mod firmware;
pub mod logging;
pub mod open_node;
pub mod process;
pub mod profile;
pub mod registry;
pub mod sync;

pub use config::GatewayConfig;
pub use error::{AppResult, GatewayError, TransportError};
pub use experiment::ExperimentOrchestrator;
