//! Per-export session state.
//!
//! A session is created for exactly one export call and owns everything
//! transient: the scratch workspace, recorded warnings, the cancel flag, and
//! the progress tracker. Dropping or finishing it removes the workspace.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;

use overlaycut_common::error::{ErrorKind, OverlaycutError, OverlaycutResult};

use crate::progress::{
    ExportObserver, ExportPhase, ExportState, ProgressCallback, ProgressTracker,
};

/// A non-fatal problem recorded during an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportWarning {
    pub kind: &'static str,
    pub message: String,
}

impl ExportWarning {
    pub fn from_error(err: &OverlaycutError) -> Self {
        Self {
            kind: err.kind().as_str(),
            message: err.to_string(),
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind.as_str()
    }
}

/// Cooperative cancellation flag, checked between frames and stages.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> OverlaycutResult<()> {
        if self.is_cancelled() {
            Err(OverlaycutError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Transient state owned by one export.
#[derive(Debug)]
pub struct ExportSession {
    workspace: Option<TempDir>,
    workspace_path: PathBuf,
    progress: ProgressTracker,
    warnings: Vec<ExportWarning>,
    cancel: CancelHandle,
}

impl ExportSession {
    /// Create a session with its scratch directory under `work_dir` (or the
    /// system temp dir).
    pub fn new(work_dir: Option<&Path>, on_progress: Option<ProgressCallback>) -> OverlaycutResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("overlaycut-export-");
        let workspace = match work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };
        let workspace_path = workspace.path().to_path_buf();
        tracing::debug!(workspace = %workspace_path.display(), "Export session created");

        Ok(Self {
            workspace: Some(workspace),
            workspace_path,
            progress: ProgressTracker::new(on_progress),
            warnings: vec![],
            cancel: CancelHandle::new(),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace_path
    }

    /// Path for an intermediate file inside the workspace.
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.workspace_path.join(name)
    }

    pub fn state(&self) -> ExportState {
        self.progress.state()
    }

    pub fn observer(&self) -> ExportObserver {
        self.progress.observer()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn check_cancelled(&self) -> OverlaycutResult<()> {
        self.cancel.check()
    }

    pub fn enter(&mut self, phase: ExportPhase, message: impl Into<String>) -> OverlaycutResult<()> {
        let message = message.into();
        tracing::info!(phase = phase.as_str(), "{message}");
        self.progress.enter(phase, message)
    }

    /// Report progress within the current phase.
    pub fn advance(&mut self, fraction: f64, message: impl Into<String>) {
        self.progress.advance(fraction, message);
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Record a non-fatal error and carry on.
    pub fn warn(&mut self, err: OverlaycutError) {
        tracing::warn!(kind = err.kind().as_str(), error = %err, "Export degraded");
        self.warnings.push(ExportWarning::from_error(&err));
    }

    pub fn warnings(&self) -> &[ExportWarning] {
        &self.warnings
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<ExportWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn fail(&mut self) {
        self.progress.fail();
    }

    /// Delete the workspace and everything in it. Safe to call twice.
    pub fn cleanup(&mut self) {
        if let Some(workspace) = self.workspace.take() {
            let path = workspace.path().to_path_buf();
            match workspace.close() {
                Ok(()) => tracing::debug!(workspace = %path.display(), "Export workspace removed"),
                Err(e) => tracing::warn!(
                    workspace = %path.display(),
                    error = %e,
                    "Failed to remove export workspace"
                ),
            }
        }
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}
