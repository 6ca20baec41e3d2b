//! Display collaborator plumbing.
//!
//! The registry never calls the display directly. It queues
//! [`DisplayUpdate`]s on an unbounded channel, and one display task drains the
//! queue into a [`DisplaySink`] in order. Rendering itself lives behind the
//! trait.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lookout_core::Frame;

/// One instruction for the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayUpdate {
    Show(Frame),
    Clear,
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("display I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whatever renders frames for the operator.
pub trait DisplaySink: Send + 'static {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;
    fn clear(&mut self) -> Result<(), DisplayError>;
}

/// Spawns the display task and returns the queue feeding it.
///
/// The task exits once every sender has been dropped.
pub fn spawn_display<S: DisplaySink>(
    mut sink: S,
) -> (mpsc::UnboundedSender<DisplayUpdate>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            let result = match &update {
                DisplayUpdate::Show(frame) => sink.show(frame),
                DisplayUpdate::Clear => sink.clear(),
            };
            if let Err(e) = result {
                warn!(error = %e, "Display update failed");
            }
        }
        debug!("Display task stopped");
    });

    (tx, task)
}

// ============================================================================
// File sink
// ============================================================================

/// Keeps the latest frame in a file for an external viewer to pick up.
///
/// Each frame is written to a sibling temp file and renamed over the target,
/// so readers never see a half-written image. `clear` removes the file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
    staging: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".partial");
        Self {
            path,
            staging: PathBuf::from(staging),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> DisplayError {
        DisplayError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl DisplaySink for FileSink {
    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        fs::write(&self.staging, frame.as_bytes()).map_err(|e| self.io_error(e))?;
        fs::rename(&self.staging, &self.path).map_err(|e| self.io_error(e))
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// Discards everything. Used when no output is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn show(&mut self, _frame: &Frame) -> Result<(), DisplayError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        Ok(())
    }
}
