//! Lock-free A/V drift tracking.
//!
//! [`SyncMetrics`] is a cheap-to-clone handle that the control thread writes
//! once per presented frame and any other thread (an overlay, a test harness)
//! can read via [`SyncMetrics::snapshot`].
//!
//! ```ignore
//! let metrics = source.sync_metrics();
//! // ... play for a while ...
//! println!("{}", metrics.snapshot().quality_summary());
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Drift beyond this counts as out of sync.
pub const SYNC_DRIFT_THRESHOLD_MS: i64 = 100;

/// Drift beyond this is logged.
pub const SYNC_DRIFT_WARNING_MS: i64 = 150;

/// Drift beyond this fails a sync test.
pub const SYNC_DRIFT_SEVERE_MS: i64 = 200;

/// Samples ignored for max-drift after a seek.
pub const SEEK_GRACE_SAMPLES: u64 = 5;

#[derive(Clone)]
pub struct SyncMetrics {
    inner: Arc<SyncMetricsInner>,
}

#[derive(Default)]
struct SyncMetricsInner {
    /// audio_pos - video_pts, positive = video behind
    current_drift_us: AtomicI64,
    max_video_behind_us: AtomicI64,
    max_video_ahead_us: AtomicI64,
    total_drift_us: AtomicU64,
    sample_count: AtomicU64,
    out_of_sync_count: AtomicU64,
    last_video_pts_us: AtomicU64,
    last_audio_pos_us: AtomicU64,
    using_audio_clock: AtomicBool,
    frames_dropped: AtomicU64,
    frames_repeated: AtomicU64,
    grace_samples: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncMetricsInner::default()),
        }
    }

    /// Sets whether the audio clock drives presentation.
    pub fn set_using_audio_clock(&self, using: bool) {
        self.inner.using_audio_clock.store(using, Ordering::Relaxed);
    }

    /// Records a presented frame against the clock it was paced by.
    ///
    /// Returns the drift in microseconds, signed like
    /// [`SyncState::drift`](crate::sync::SyncState::drift).
    pub fn record_frame(&self, video_pts: Duration, audio_position: Duration) -> i64 {
        let inner = &self.inner;
        let video_us = video_pts.as_micros() as i64;
        let audio_us = audio_position.as_micros() as i64;
        let drift_us = audio_us - video_us;

        let in_grace = inner
            .grace_samples
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_ok();

        inner.last_video_pts_us.store(video_us as u64, Ordering::Relaxed);
        inner.last_audio_pos_us.store(audio_us as u64, Ordering::Relaxed);
        inner.sample_count.fetch_add(1, Ordering::Relaxed);
        inner
            .total_drift_us
            .fetch_add(drift_us.unsigned_abs(), Ordering::Relaxed);

        if in_grace {
            return drift_us;
        }

        inner.current_drift_us.store(drift_us, Ordering::Relaxed);
        if drift_us > 0 {
            inner.max_video_behind_us.fetch_max(drift_us, Ordering::Relaxed);
        } else {
            inner.max_video_ahead_us.fetch_min(drift_us, Ordering::Relaxed);
        }

        let drift_ms = drift_us.abs() / 1000;
        if drift_ms > SYNC_DRIFT_THRESHOLD_MS {
            inner.out_of_sync_count.fetch_add(1, Ordering::Relaxed);
            if drift_ms > SYNC_DRIFT_WARNING_MS {
                let direction = if drift_us > 0 { "behind" } else { "ahead of" };
                tracing::warn!(
                    "A/V sync: video {}ms {} audio (video_pts={:?}, audio_pos={:?})",
                    drift_ms,
                    direction,
                    video_pts,
                    audio_position
                );
            }
        }

        drift_us
    }

    pub fn record_dropped(&self, frames: u64) {
        self.inner.frames_dropped.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_repeated(&self) {
        self.inner.frames_repeated.fetch_add(1, Ordering::Relaxed);
    }

    /// Clears everything and ignores the next `grace` samples for max drift.
    pub fn reset(&self, grace: u64) {
        let inner = &self.inner;
        for counter in [
            &inner.total_drift_us,
            &inner.sample_count,
            &inner.out_of_sync_count,
            &inner.last_video_pts_us,
            &inner.last_audio_pos_us,
            &inner.frames_dropped,
            &inner.frames_repeated,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        inner.current_drift_us.store(0, Ordering::Relaxed);
        inner.max_video_behind_us.store(0, Ordering::Relaxed);
        inner.max_video_ahead_us.store(0, Ordering::Relaxed);
        inner.grace_samples.store(grace, Ordering::Relaxed);
    }

    pub fn is_in_sync(&self) -> bool {
        self.inner.current_drift_us.load(Ordering::Relaxed).abs() <= SYNC_DRIFT_THRESHOLD_MS * 1000
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let inner = &self.inner;
        let sample_count = inner.sample_count.load(Ordering::Relaxed);
        let total = inner.total_drift_us.load(Ordering::Relaxed);
        SyncMetricsSnapshot {
            current_drift_us: inner.current_drift_us.load(Ordering::Relaxed),
            max_video_behind_us: inner.max_video_behind_us.load(Ordering::Relaxed),
            max_video_ahead_us: inner.max_video_ahead_us.load(Ordering::Relaxed),
            avg_drift_us: if sample_count > 0 {
                (total / sample_count) as i64
            } else {
                0
            },
            sample_count,
            out_of_sync_count: inner.out_of_sync_count.load(Ordering::Relaxed),
            last_video_pts: Duration::from_micros(inner.last_video_pts_us.load(Ordering::Relaxed)),
            last_audio_pos: Duration::from_micros(inner.last_audio_pos_us.load(Ordering::Relaxed)),
            using_audio_clock: inner.using_audio_clock.load(Ordering::Relaxed),
            frames_dropped: inner.frames_dropped.load(Ordering::Relaxed),
            frames_repeated: inner.frames_repeated.load(Ordering::Relaxed),
        }
    }

    /// Logs current sync status at debug level.
    pub fn log_status(&self) {
        tracing::debug!("{}", self.snapshot());
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone)]
pub struct SyncMetricsSnapshot {
    /// Current drift in microseconds (audio - video, positive = video behind)
    pub current_drift_us: i64,
    /// Largest positive drift
    pub max_video_behind_us: i64,
    /// Most negative drift; zero or below
    pub max_video_ahead_us: i64,
    /// Average absolute drift in microseconds
    pub avg_drift_us: i64,
    pub sample_count: u64,
    pub out_of_sync_count: u64,
    pub last_video_pts: Duration,
    pub last_audio_pos: Duration,
    pub using_audio_clock: bool,
    pub frames_dropped: u64,
    pub frames_repeated: u64,
}

impl SyncMetricsSnapshot {
    /// Minimum samples required for a valid sync test.
    const MIN_SYNC_SAMPLES: u64 = 10;

    pub fn current_drift_ms(&self) -> i64 {
        self.current_drift_us / 1000
    }

    /// Returns the maximum absolute drift in milliseconds.
    pub fn max_drift_ms(&self) -> i64 {
        self.max_video_behind_us
            .abs()
            .max(self.max_video_ahead_us.abs())
            / 1000
    }

    pub fn out_of_sync_percentage(&self) -> f64 {
        if self.sample_count == 0 {
            0.0
        } else {
            (self.out_of_sync_count as f64 / self.sample_count as f64) * 100.0
        }
    }

    /// Enough samples, max drift under the severe threshold, under 5% out of sync.
    pub fn passed_sync_test(&self) -> bool {
        self.sample_count >= Self::MIN_SYNC_SAMPLES
            && self.max_drift_ms() < SYNC_DRIFT_SEVERE_MS
            && self.out_of_sync_percentage() < 5.0
    }

    pub fn quality_summary(&self) -> String {
        let max_drift = self.max_drift_ms();
        let quality = if max_drift < SYNC_DRIFT_THRESHOLD_MS {
            "Excellent"
        } else if max_drift < SYNC_DRIFT_WARNING_MS {
            "Good"
        } else if max_drift < SYNC_DRIFT_SEVERE_MS {
            "Fair"
        } else {
            "Poor"
        };
        format!(
            "{quality} (max drift: {max_drift:+}ms, avg: {:+}ms, {:.1}% out of sync, {} dropped, {} repeated)",
            self.avg_drift_us / 1000,
            self.out_of_sync_percentage(),
            self.frames_dropped,
            self.frames_repeated
        )
    }
}

impl std::fmt::Display for SyncMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "A/V Sync: drift={:+}ms (max video behind={:+}ms, ahead={:+}ms), {} samples, {:.1}% out of sync, audio_clock={}",
            self.current_drift_ms(),
            self.max_video_behind_us / 1000,
            self.max_video_ahead_us / 1000,
            self.sample_count,
            self.out_of_sync_percentage(),
            self.using_audio_clock
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_metrics_ahead_and_behind() {
        let metrics = SyncMetrics::new();

        // Video 120ms ahead of audio.
        metrics.record_frame(Duration::from_millis(1120), Duration::from_millis(1000));
        assert_eq!(metrics.snapshot().current_drift_ms(), -120);
        assert!(!metrics.is_in_sync());

        // Video 50ms behind audio.
        metrics.record_frame(Duration::from_millis(950), Duration::from_millis(1000));
        let snap = metrics.snapshot();
        assert_eq!(snap.current_drift_ms(), 50);
        assert_eq!(snap.max_video_ahead_us, -120_000);
        assert_eq!(snap.max_video_behind_us, 50_000);
        assert_eq!(snap.out_of_sync_count, 1);
        assert!(metrics.is_in_sync());
    }

    /// Both drift readings a source exposes agree in sign.
    #[test]
    fn test_drift_sign_matches_sync_state() {
        let metrics = SyncMetrics::new();
        let mut state = crate::sync::SyncState::new();

        let drift_us =
            metrics.record_frame(Duration::from_millis(900), Duration::from_millis(1050));
        let drift = state.update(1.05, 0.9);

        assert!(drift > 0.0);
        assert_eq!(drift_us, 150_000);
        assert_eq!(metrics.snapshot().current_drift_ms(), 150);
    }

    #[test]
    fn test_grace_period_ignores_seek_spike() {
        let metrics = SyncMetrics::new();
        metrics.reset(2);

        metrics.record_frame(Duration::from_millis(1500), Duration::from_millis(1000));
        metrics.record_frame(Duration::from_millis(1400), Duration::from_millis(1000));
        metrics.record_frame(Duration::from_millis(1010), Duration::from_millis(1000));

        let snap = metrics.snapshot();
        assert_eq!(snap.sample_count, 3);
        assert_eq!(snap.max_drift_ms(), 10);
        assert_eq!(snap.out_of_sync_count, 0);
    }

    #[test]
    fn test_sync_test_pass_fail() {
        let metrics = SyncMetrics::new();
        for _ in 0..100 {
            metrics.record_frame(Duration::from_millis(1010), Duration::from_millis(1000));
        }
        metrics.record_dropped(2);
        metrics.record_repeated();
        let snap = metrics.snapshot();
        assert!(snap.passed_sync_test());
        assert_eq!(snap.frames_dropped, 2);
        assert_eq!(snap.frames_repeated, 1);
        assert!(snap.quality_summary().starts_with("Excellent"));

        metrics.reset(0);
        metrics.record_frame(Duration::from_millis(1250), Duration::from_millis(1000));
        assert!(!metrics.snapshot().passed_sync_test());
    }
}
