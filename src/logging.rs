//! Tracing setup and the experiment-scoped log sink.
//!
//! The gateway logs through `tracing`. [`init`] installs a console layer and a
//! second layer writing into an [`ExperimentLogSink`]. The orchestrator attaches
//! the sink to the experiment log file on start and detaches it on stop, so
//! each user gets the gateway log lines of their own experiment.

use crate::error::{AppResult, GatewayError};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` overrides `level` when set.
pub fn init(level: &str, sink: ExperimentLogSink) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| GatewayError::Configuration(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink),
        )
        .try_init()
        .map_err(|e| GatewayError::Configuration(format!("Logger already installed: {}", e)))
}

/// Log writer that forwards to the current experiment log file, if any.
///
/// Cloning shares the same target file.
#[derive(Clone, Default)]
pub struct ExperimentLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl ExperimentLogSink {
    /// Create a detached sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start appending log lines to `path`.
    pub fn attach(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock() = Some(file);
        debug!(path = %path.display(), "experiment log attached");
        Ok(())
    }

    /// Stop writing to the experiment log file.
    pub fn detach(&self) {
        if let Some(mut file) = self.file.lock().take() {
            let _ = file.flush();
        }
    }

    /// True while a file is attached.
    pub fn is_attached(&self) -> bool {
        self.file.lock().is_some()
    }
}

impl io::Write for ExperimentLogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.lock().as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock().as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for ExperimentLogSink {
    type Writer = ExperimentLogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
