//! Export state machine and progress reporting.
//!
//! Every export walks `Idle → Loading → Processing → Rendering → Finalizing →
//! Complete`, or drops into `Failed` from any non-terminal state. Each phase
//! owns a fixed band of the 0-100 percent scale; backends report a fraction
//! of the current phase and the tracker maps it into that band. Percent and
//! phase never move backwards.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use overlaycut_common::error::{OverlaycutError, OverlaycutResult};

/// Reported stage of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPhase {
    Loading,
    Processing,
    Rendering,
    Finalizing,
    Complete,
}

impl ExportPhase {
    /// Percent range this phase covers.
    pub fn band(self) -> (f64, f64) {
        match self {
            ExportPhase::Loading => (0.0, 5.0),
            ExportPhase::Processing => (5.0, 10.0),
            ExportPhase::Rendering => (10.0, 95.0),
            ExportPhase::Finalizing => (95.0, 99.0),
            ExportPhase::Complete => (100.0, 100.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExportPhase::Loading => "loading",
            ExportPhase::Processing => "processing",
            ExportPhase::Rendering => "rendering",
            ExportPhase::Finalizing => "finalizing",
            ExportPhase::Complete => "complete",
        }
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,

    /// Overall completion in `[0, 100]`.
    pub percent: f64,

    pub message: String,

    /// Estimated seconds remaining, once enough work is done to guess.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<f64>,
}

impl ExportProgress {
    fn initial() -> Self {
        Self {
            phase: ExportPhase::Loading,
            percent: 0.0,
            message: String::new(),
            eta_secs: None,
        }
    }
}

/// Lifecycle state of an export session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportState {
    Idle,
    Loading,
    Processing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

impl ExportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportState::Complete | ExportState::Failed)
    }

    pub fn can_transition_to(self, next: ExportState) -> bool {
        use ExportState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Loading)
            | (Loading, Processing)
            | (Processing, Rendering)
            | (Rendering, Finalizing)
            | (Finalizing, Complete) => true,
            _ => false,
        }
    }

    /// Phase reported while in this state, if any.
    pub fn phase(self) -> Option<ExportPhase> {
        match self {
            ExportState::Loading => Some(ExportPhase::Loading),
            ExportState::Processing => Some(ExportPhase::Processing),
            ExportState::Rendering => Some(ExportPhase::Rendering),
            ExportState::Finalizing => Some(ExportPhase::Finalizing),
            ExportState::Complete => Some(ExportPhase::Complete),
            ExportState::Idle | ExportState::Failed => None,
        }
    }
}

impl From<ExportPhase> for ExportState {
    fn from(phase: ExportPhase) -> Self {
        match phase {
            ExportPhase::Loading => ExportState::Loading,
            ExportPhase::Processing => ExportState::Processing,
            ExportPhase::Rendering => ExportState::Rendering,
            ExportPhase::Finalizing => ExportState::Finalizing,
            ExportPhase::Complete => ExportState::Complete,
        }
    }
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(&ExportProgress) + Send + Sync>;

/// Read side of a session's state and progress, usable while the export
/// runs elsewhere.
#[derive(Debug, Clone)]
pub struct ExportObserver {
    state: watch::Receiver<ExportState>,
    progress: watch::Receiver<ExportProgress>,
}

impl ExportObserver {
    pub fn state(&self) -> ExportState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> ExportProgress {
        self.progress.borrow().clone()
    }

    /// Wait for the next progress snapshot. Returns `None` once the session
    /// is gone.
    pub async fn changed(&mut self) -> Option<ExportProgress> {
        self.progress.changed().await.ok()?;
        Some(self.progress.borrow_and_update().clone())
    }
}

/// Owns the state machine and fans progress out to subscribers.
pub struct ProgressTracker {
    state: ExportState,
    last: ExportProgress,
    started: Instant,
    state_tx: watch::Sender<ExportState>,
    progress_tx: watch::Sender<ExportProgress>,
    callback: Option<ProgressCallback>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("state", &self.state)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        let (state_tx, _) = watch::channel(ExportState::Idle);
        let (progress_tx, _) = watch::channel(ExportProgress::initial());
        Self {
            state: ExportState::Idle,
            last: ExportProgress::initial(),
            started: Instant::now(),
            state_tx,
            progress_tx,
            callback,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn snapshot(&self) -> &ExportProgress {
        &self.last
    }

    pub fn observer(&self) -> ExportObserver {
        ExportObserver {
            state: self.state_tx.subscribe(),
            progress: self.progress_tx.subscribe(),
        }
    }

    /// Move to `phase`, emitting an event at the start of its band.
    pub fn enter(&mut self, phase: ExportPhase, message: impl Into<String>) -> OverlaycutResult<()> {
        let next = ExportState::from(phase);
        if !self.state.can_transition_to(next) {
            return Err(OverlaycutError::invalid_state(format!(
                "cannot move from {:?} to {:?}",
                self.state, next
            )));
        }
        self.set_state(next);

        if self.state == ExportState::Loading {
            self.started = Instant::now();
        }
        let (lo, _) = phase.band();
        let percent = if phase == ExportPhase::Complete {
            100.0
        } else {
            lo.max(self.last.percent)
        };
        self.emit(phase, percent, message.into());
        Ok(())
    }

    /// Report `fraction` of the current phase done.
    ///
    /// Ignored outside an active phase. Percent is clamped so it never
    /// regresses; an event is only emitted when something changed.
    pub fn advance(&mut self, fraction: f64, message: impl Into<String>) {
        let Some(phase) = self.state.phase() else {
            return;
        };
        if phase == ExportPhase::Complete {
            return;
        }
        let (lo, hi) = phase.band();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let percent = (lo + (hi - lo) * fraction).max(self.last.percent);
        let message = message.into();
        if percent <= self.last.percent && message == self.last.message {
            return;
        }
        self.emit(phase, percent, message);
    }

    /// Drop into `Failed`. No progress event is emitted; the error itself is
    /// the terminal report.
    pub fn fail(&mut self) {
        if self.state.can_transition_to(ExportState::Failed) {
            self.set_state(ExportState::Failed);
        }
    }

    fn set_state(&mut self, next: ExportState) {
        tracing::debug!(from = ?self.state, to = ?next, "Export state transition");
        self.state = next;
        self.state_tx.send_replace(next);
    }

    fn emit(&mut self, phase: ExportPhase, percent: f64, message: String) {
        let eta_secs = if phase == ExportPhase::Complete {
            Some(0.0)
        } else {
            estimate_eta(self.started.elapsed().as_secs_f64(), percent / 100.0)
        };
        let event = ExportProgress {
            phase,
            percent,
            message,
            eta_secs,
        };
        if let Some(cb) = &self.callback {
            cb(&event);
        }
        self.progress_tx.send_replace(event.clone());
        self.last = event;
    }
}

/// Remaining time assuming the rest of the work proceeds at the rate seen
/// so far.
pub fn estimate_eta(elapsed_secs: f64, fraction: f64) -> Option<f64> {
    if fraction <= 0.01 || fraction >= 1.0 || elapsed_secs <= 0.0 {
        return None;
    }
    Some(((elapsed_secs / fraction) - elapsed_secs).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording_tracker() -> (ProgressTracker, Arc<Mutex<Vec<ExportProgress>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let tracker = ProgressTracker::new(Some(Box::new(move |p: &ExportProgress| {
            sink.lock().unwrap().push(p.clone());
        })));
        (tracker, events)
    }

    #[test]
    fn test_transitions() {
        assert!(ExportState::Idle.can_transition_to(ExportState::Loading));
        assert!(ExportState::Rendering.can_transition_to(ExportState::Failed));
        assert!(!ExportState::Loading.can_transition_to(ExportState::Rendering));
        assert!(!ExportState::Complete.can_transition_to(ExportState::Failed));
        assert!(!ExportState::Failed.can_transition_to(ExportState::Loading));
    }

    #[test]
    fn test_enter_rejects_skipped_phase() {
        let mut tracker = ProgressTracker::new(None);
        tracker.enter(ExportPhase::Loading, "load").unwrap();
        let err = tracker.enter(ExportPhase::Rendering, "skip").unwrap_err();
        assert!(matches!(err, OverlaycutError::InvalidState { .. }));
        assert_eq!(tracker.state(), ExportState::Loading);
    }

    #[test]
    fn test_advance_maps_into_band() {
        let mut tracker = ProgressTracker::new(None);
        tracker.enter(ExportPhase::Loading, "").unwrap();
        tracker.enter(ExportPhase::Processing, "").unwrap();
        tracker.enter(ExportPhase::Rendering, "").unwrap();
        tracker.advance(0.5, "half");
        assert!((tracker.snapshot().percent - 52.5).abs() < 1e-9);
    }

    #[test]
    fn test_percent_never_regresses() {
        let (mut tracker, events) = recording_tracker();
        tracker.enter(ExportPhase::Loading, "").unwrap();
        tracker.enter(ExportPhase::Processing, "").unwrap();
        tracker.enter(ExportPhase::Rendering, "").unwrap();
        tracker.advance(0.8, "a");
        tracker.advance(0.2, "b");
        tracker.enter(ExportPhase::Finalizing, "").unwrap();
        tracker.enter(ExportPhase::Complete, "done").unwrap();

        let events = events.lock().unwrap();
        for pair in events.windows(2) {
            assert!(pair[1].percent >= pair[0].percent);
            assert!(pair[1].phase >= pair[0].phase);
        }
        let last = events.last().unwrap();
        assert_eq!(last.phase, ExportPhase::Complete);
        assert_eq!(last.percent, 100.0);
    }

    #[test]
    fn test_observer_sees_state() {
        let mut tracker = ProgressTracker::new(None);
        let observer = tracker.observer();
        assert_eq!(observer.state(), ExportState::Idle);
        tracker.enter(ExportPhase::Loading, "go").unwrap();
        tracker.fail();
        assert_eq!(observer.state(), ExportState::Failed);
        assert_eq!(observer.progress().message, "go");
    }

    #[test]
    fn test_estimate_eta() {
        assert_eq!(estimate_eta(10.0, 0.5), Some(10.0));
        assert_eq!(estimate_eta(10.0, 0.0), None);
        assert_eq!(estimate_eta(10.0, 1.0), None);
    }
}
