//! Audio-clocked frame pacing.
//!
//! Pure bookkeeping: nothing here touches a decoder or the GPU. The source
//! asks [`decode_due`] whether a new frame is owed this tick and, if so,
//! [`SyncState::decide`] what to do with it.

/// Audio positions below this are treated as "device not started yet".
pub const AUDIO_START_EPSILON: f64 = 1e-3;

/// Audio ahead of the target frame by more than this drops frames.
pub const SKIP_THRESHOLD: f64 = 0.1;

/// Audio behind the target frame by more than this holds the current frame.
pub const REPEAT_THRESHOLD: f64 = 0.05;

/// Slack for accumulated float error when comparing against a frame period.
pub const FRAME_TIME_EPSILON: f64 = 1e-6;

/// What to do with the next target frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Audio has not started; hold everything.
    Wait,
    /// Video is behind; decode past frames until caught up.
    Skip,
    /// Video is ahead; keep the current frame and do not decode.
    Repeat,
    /// On cadence; decode and show the target frame.
    Display,
}

/// Decides the fate of the frame at `target_pts` given the audio clock.
pub fn decide(target_pts: f64, audio_position: f64) -> SyncDecision {
    if audio_position < AUDIO_START_EPSILON {
        return SyncDecision::Wait;
    }

    let lead = audio_position - target_pts;
    if lead > SKIP_THRESHOLD {
        SyncDecision::Skip
    } else if -lead > REPEAT_THRESHOLD {
        SyncDecision::Repeat
    } else {
        SyncDecision::Display
    }
}

/// Returns true when a frame is owed: either a decode was requested
/// explicitly or at least one frame period has elapsed since the last one.
pub fn decode_due(needs_decode: bool, effective: f64, last_displayed: f64, frame_time: f64) -> bool {
    needs_decode || effective - last_displayed >= frame_time - FRAME_TIME_EPSILON
}

/// Latest clock samples and diagnostic counters for one source.
///
/// Counters are informational; no control decision reads them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    pub audio_position: f64,
    pub video_pts: f64,
    /// `audio_position - video_pts`; positive means video is behind.
    pub drift: f64,
    pub frames_dropped: u64,
    pub frames_repeated: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears counters and pins both clocks at `position`.
    pub fn reset(&mut self, position: f64) {
        *self = Self {
            audio_position: position,
            video_pts: position,
            ..Self::default()
        };
    }

    /// Records a fresh pair of clock samples and returns the drift.
    pub fn update(&mut self, audio_position: f64, video_pts: f64) -> f64 {
        self.audio_position = audio_position;
        self.video_pts = video_pts;
        self.drift = audio_position - video_pts;
        self.drift
    }

    /// Decides for `target_pts` against the last recorded audio position.
    pub fn decide(&self, target_pts: f64) -> SyncDecision {
        decide(target_pts, self.audio_position)
    }

    pub fn record_dropped(&mut self, frames: u64) {
        self.frames_dropped += frames;
    }

    pub fn record_repeated(&mut self) {
        self.frames_repeated += 1;
    }
}
