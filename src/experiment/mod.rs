//! Experiment lifecycle: files, expiration timer and the orchestrator.

pub mod files;
pub mod orchestrator;
pub mod timer;

pub use files::{ExpFileKind, ExperimentFiles};
pub use orchestrator::{Experiment, ExperimentOrchestrator};
pub use timer::ExpirationTimer;
