//! Frame clocks for render loops.
//!
//! Render loops never read wall time directly. They ask a [`FrameClock`]
//! to wait until a timeline position is due, which lets the same loop run
//! paced against real time (preview parity) or free-running (offline export
//! and tests).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Paces a render loop against timeline positions in seconds.
#[async_trait::async_trait]
pub trait FrameClock: Send + Sync {
    /// Suspend until `timeline_secs` is due.
    async fn wait_until(&self, timeline_secs: f64);

    /// Latest timeline position this clock was asked to reach.
    fn position_secs(&self) -> f64;
}

/// A clock that never waits. Every requested position is immediately due.
///
/// Doubles as a virtual clock: it records the furthest position reached, so
/// tests can assert how far a loop advanced without sleeping.
#[derive(Debug, Default)]
pub struct FreeRunClock {
    position_bits: AtomicU64,
}

impl FreeRunClock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl FrameClock for FreeRunClock {
    async fn wait_until(&self, timeline_secs: f64) {
        let current = f64::from_bits(self.position_bits.load(Ordering::SeqCst));
        if timeline_secs > current {
            self.position_bits
                .store(timeline_secs.to_bits(), Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
    }

    fn position_secs(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::SeqCst))
    }
}

/// A clock anchored to a real instant; positions map one-to-one onto
/// elapsed wall time.
#[derive(Debug)]
pub struct RealtimeClock {
    epoch: tokio::time::Instant,
    epoch_wall: String,
    position_bits: AtomicU64,
}

impl RealtimeClock {
    /// Create a clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
            position_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Wall-clock time at the anchor (ISO 8601).
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }

    /// Seconds elapsed since the anchor.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

#[async_trait::async_trait]
impl FrameClock for RealtimeClock {
    async fn wait_until(&self, timeline_secs: f64) {
        let target = self.epoch + Duration::from_secs_f64(timeline_secs.max(0.0));
        tokio::time::sleep_until(target).await;
        self.position_bits
            .store(timeline_secs.to_bits(), Ordering::SeqCst);
    }

    fn position_secs(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::SeqCst))
    }
}

/// Convert a frame index at `fps` to a timeline position in seconds.
pub fn frame_to_secs(frame: u64, fps: u32) -> f64 {
    frame as f64 / fps.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_free_run_clock_tracks_furthest_position() {
        let clock = FreeRunClock::new();
        clock.wait_until(1.5).await;
        clock.wait_until(0.5).await;
        assert!((clock.position_secs() - 1.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realtime_clock_waits_for_position() {
        let clock = RealtimeClock::start();
        clock.wait_until(2.0).await;
        assert!(clock.elapsed_secs() >= 2.0);
        assert!((clock.position_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_to_secs() {
        assert!((frame_to_secs(45, 30) - 1.5).abs() < 1e-9);
    }
}
