//! Per-experiment measurement and log files.
//!
//! Layout: `<root>/<user>/.iotlab/<exp_id>/<kind>/<node_id>.<ext>`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File kinds created for each experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpFileKind {
    Consumption,
    Radio,
    Event,
    Sniffer,
    Log,
}

impl ExpFileKind {
    /// Every kind, in creation order.
    pub const ALL: [ExpFileKind; 5] = [
        ExpFileKind::Consumption,
        ExpFileKind::Radio,
        ExpFileKind::Event,
        ExpFileKind::Sniffer,
        ExpFileKind::Log,
    ];

    /// Sub directory name.
    pub fn dir_name(self) -> &'static str {
        match self {
            ExpFileKind::Consumption => "consumption",
            ExpFileKind::Radio => "radio",
            ExpFileKind::Event => "event",
            ExpFileKind::Sniffer => "sniffer",
            ExpFileKind::Log => "log",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ExpFileKind::Log => "log",
            _ => "oml",
        }
    }
}

/// Files of one running experiment.
#[derive(Debug, Clone)]
pub struct ExperimentFiles {
    exp_dir: PathBuf,
    node_id: String,
}

impl ExperimentFiles {
    /// Create the directories and empty files.
    pub fn create(root: &Path, user: &str, exp_id: u32, node_id: &str) -> io::Result<Self> {
        let files = Self {
            exp_dir: root.join(user).join(".iotlab").join(exp_id.to_string()),
            node_id: node_id.to_string(),
        };
        for kind in ExpFileKind::ALL {
            let path = files.path(kind);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(&path)?;
        }
        debug!(dir = %files.exp_dir.display(), "experiment files created");
        Ok(files)
    }

    /// Path of the `kind` file for this node.
    pub fn path(&self, kind: ExpFileKind) -> PathBuf {
        self.exp_dir
            .join(kind.dir_name())
            .join(format!("{}.{}", self.node_id, kind.extension()))
    }

    /// Remove the files that are still empty.
    pub fn cleanup(&self) {
        for kind in ExpFileKind::ALL {
            let path = self.path(kind);
            match fs::metadata(&path) {
                Ok(meta) if meta.len() == 0 => {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(path = %path.display(), %err, "failed to remove empty file");
                    }
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), %err, "cannot stat experiment file"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn layout() {
        let root = TempDir::new().unwrap();
        let files = ExperimentFiles::create(root.path(), "alice", 42, "m3-1").unwrap();

        let consumption = files.path(ExpFileKind::Consumption);
        assert_eq!(
            consumption,
            root.path().join("alice/.iotlab/42/consumption/m3-1.oml")
        );
        assert!(consumption.exists());
        assert_eq!(
            files.path(ExpFileKind::Log),
            root.path().join("alice/.iotlab/42/log/m3-1.log")
        );
    }

    #[test]
    fn cleanup_keeps_non_empty_files() {
        let root = TempDir::new().unwrap();
        let files = ExperimentFiles::create(root.path(), "bob", 7, "a8-3").unwrap();
        fs::write(files.path(ExpFileKind::Radio), "data").unwrap();
        fs::remove_file(files.path(ExpFileKind::Event)).unwrap();

        files.cleanup();

        assert!(files.path(ExpFileKind::Radio).exists());
        assert!(!files.path(ExpFileKind::Consumption).exists());
        assert!(!files.path(ExpFileKind::Sniffer).exists());
        assert!(!files.path(ExpFileKind::Log).exists());
    }
}
