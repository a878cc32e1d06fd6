//! The playable video source.
//!
//! # State Machine
//!
//! ```text
//! open(path) → Stopped
//!
//! play()  [Stopped] → rewind to 0, restart audio → Playing
//! play()  [Paused]  → resume audio               → Playing
//! pause() [Playing]                               → Paused
//! stop()  [any]     → rewind to 0, stop audio     → Stopped
//! seek(t) [any]     → clamp, reposition, decode one frame (state unchanged)
//!
//! advance_frame(dt) reaching the end              → Stopped
//! ```
//!
//! All methods run on the thread that owns the render context. The only
//! other thread involved is the audio track's.

use std::time::Duration;

use crate::audio::AudioTrack;
use crate::cascade::{select_decoder, Decoder, DecoderBackends, DecoderInfo};
use crate::options::OpenOptions;
use crate::sync::{decode_due, SyncDecision, SyncState, FRAME_TIME_EPSILON};
use crate::sync_metrics::{SyncMetrics, SEEK_GRACE_SAMPLES};
use crate::texture::{FrameSlot, RenderContext, WrappedImage};
use crate::video::{
    DecodedFrame, HwAccelKind, HwFrame, PlaybackState, RawDecoder, VideoError, VideoFrame,
    VideoMetadata,
};
use crate::zero_copy::ZeroCopyStats;

/// Upper bound on frames dropped in one tick to catch up with audio.
const MAX_SKIP_FRAMES: u64 = 120;

/// Upper bound on frames decoded forward to land a seek.
const MAX_SEEK_SCAN_FRAMES: usize = 600;

enum NextFrame {
    Frame(VideoFrame),
    EndOfStream,
    Failed,
}

/// A decoded video with its audio track, GPU texture slot and A/V clock.
pub struct VideoSource {
    info: DecoderInfo,
    decoder: Option<Decoder>,
    metadata: VideoMetadata,
    state: PlaybackState,
    /// Seconds, always within `[0, duration]`
    current_pts: f64,
    /// Seconds; one frame before zero when nothing has been shown since a rewind
    last_displayed: f64,
    needs_decode: bool,
    /// Sticky: once set the zero-copy path is never retried.
    zero_copy_failed: bool,
    slot: FrameSlot,
    /// Keeps the bound surface alive while it is on screen.
    last_hw_frame: Option<HwFrame>,
    audio: Option<AudioTrack>,
    audio_sync: bool,
    volume: f32,
    sync: SyncState,
    metrics: SyncMetrics,
    stats: ZeroCopyStats,
    frame_time: f64,
    duration: f64,
    closed: bool,
}

impl VideoSource {
    /// Runs the decoder cascade for `path` and attaches an audio track.
    ///
    /// Only a failure of the final software stage is an error. A missing or
    /// broken audio device leaves the source silent and video-clocked.
    pub fn open_with(
        path: &str,
        options: OpenOptions,
        backends: &dyn DecoderBackends,
    ) -> Result<Self, VideoError> {
        let options = options.with_env_overrides();
        let (decoder, info) = select_decoder(path, &options, backends)?;
        let metadata = decoder.metadata().clone();

        let audio = if options.audio && metadata.has_audio {
            open_audio_track(path, backends)
        } else {
            None
        };

        let frame_time = metadata.frame_duration().as_secs_f64();
        let duration = metadata
            .duration
            .map(|d| d.as_secs_f64())
            .unwrap_or(f64::INFINITY);

        let metrics = SyncMetrics::new();
        metrics.set_using_audio_clock(audio.is_some() && options.audio_sync);

        Ok(Self {
            info,
            decoder: Some(decoder),
            metadata,
            state: PlaybackState::Stopped,
            current_pts: 0.0,
            last_displayed: -frame_time,
            needs_decode: true,
            zero_copy_failed: false,
            slot: FrameSlot::new(),
            last_hw_frame: None,
            audio,
            audio_sync: options.audio_sync,
            volume: 1.0,
            sync: SyncState::new(),
            metrics,
            stats: ZeroCopyStats::default(),
            frame_time,
            duration,
            closed: false,
        })
    }

    // =========================================================================
    // Playback control
    // =========================================================================

    pub fn play(&mut self) -> &mut Self {
        if self.closed {
            return self;
        }
        match self.state {
            PlaybackState::Playing => return self,
            PlaybackState::Stopped => {
                self.rewind();
                if let Some(audio) = &self.audio {
                    audio.seek(Duration::ZERO);
                    audio.play();
                }
            }
            PlaybackState::Paused => {
                if let Some(audio) = &self.audio {
                    audio.play();
                }
            }
        }
        self.state = PlaybackState::Playing;
        self
    }

    pub fn pause(&mut self) -> &mut Self {
        if self.state == PlaybackState::Playing {
            if let Some(audio) = &self.audio {
                audio.pause();
            }
            self.state = PlaybackState::Paused;
        }
        self
    }

    /// Rewinds to the start and stops audio. Valid from any state.
    pub fn stop(&mut self) -> &mut Self {
        if self.closed {
            return self;
        }
        self.rewind();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
        self.state = PlaybackState::Stopped;
        self
    }

    /// Moves to `position`, clamped to the stream, and presents the frame
    /// covering it. The playback state is unchanged.
    pub fn seek(&mut self, position: Duration) -> &mut Self {
        if self.closed {
            return self;
        }
        let target = self.clamp_position(position.as_secs_f64());

        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.seek(secs(target)) {
                tracing::warn!("Video seek to {:.3}s failed: {}", target, e);
            }
        }
        if let Some(audio) = &self.audio {
            audio.seek(secs(target));
        }

        self.sync.reset(target);
        self.metrics.reset(SEEK_GRACE_SAMPLES);
        self.current_pts = target;
        self.last_displayed = target - self.frame_time;
        self.needs_decode = true;

        let mut candidate = None;
        for _ in 0..MAX_SEEK_SCAN_FRAMES {
            match self.next_frame() {
                NextFrame::Frame(frame) => {
                    let covers =
                        frame.pts.as_secs_f64() + self.frame_time > target + FRAME_TIME_EPSILON;
                    candidate = Some(frame);
                    if covers {
                        break;
                    }
                }
                NextFrame::EndOfStream | NextFrame::Failed => break,
            }
        }
        self.needs_decode = false;

        if let Some(frame) = candidate {
            self.last_displayed = self.clamp_position(frame.pts.as_secs_f64());
            self.present(frame);
        }
        self
    }

    /// Advances the playback clock by `dt` and presents whatever frame is due.
    ///
    /// Does nothing unless playing.
    pub fn advance_frame(&mut self, dt: Duration) -> &mut Self {
        if self.closed || self.state != PlaybackState::Playing {
            return self;
        }

        let audio_clock = self.audio_clock();
        let effective = audio_clock.unwrap_or(self.current_pts + dt.as_secs_f64());

        if effective >= self.duration - FRAME_TIME_EPSILON {
            tracing::debug!("End of stream at {:.3}s", effective);
            return self.stop();
        }
        self.current_pts = self.clamp_position(effective);

        if !decode_due(
            self.needs_decode,
            effective,
            self.last_displayed,
            self.frame_time,
        ) {
            return self;
        }

        let target = self.last_displayed + self.frame_time;
        let decision = match audio_clock {
            Some(audio) if !self.needs_decode => {
                self.sync.update(audio, target);
                self.sync.decide(target)
            }
            _ => SyncDecision::Display,
        };

        match decision {
            SyncDecision::Wait => {}
            SyncDecision::Repeat => {
                self.sync.record_repeated();
                self.metrics.record_repeated();
            }
            SyncDecision::Skip => {
                let behind = ((effective - target) / self.frame_time).floor().max(0.0) as u64;
                if !self.drop_frames(behind.min(MAX_SKIP_FRAMES)) {
                    return self.stop();
                }
                self.display_next(effective);
            }
            SyncDecision::Display => self.display_next(effective),
        }
        self
    }

    /// Decodes and presents a frame if nothing has been presented yet.
    pub fn ensure_first_frame(&mut self) -> &mut Self {
        if self.closed || self.slot.has_texture() || self.slot.has_staged() {
            return self;
        }
        if let NextFrame::Frame(frame) = self.next_frame() {
            self.last_displayed = self.clamp_position(frame.pts.as_secs_f64());
            self.present(frame);
        }
        self.needs_decode = false;
        self
    }

    /// Returns the image to draw this frame, uploading or converting first
    /// if the texture changed.
    pub fn current_frame(&mut self, ctx: &mut dyn RenderContext) -> Option<WrappedImage> {
        if self.closed {
            return None;
        }
        self.slot.resolve(ctx)
    }

    /// Releases the audio track, image, texture and decoder, in that order.
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(mut audio) = self.audio.take() {
            audio.close();
        }
        self.slot.release();
        self.last_hw_frame = None;
        self.decoder = None;
        self.state = PlaybackState::Stopped;

        tracing::debug!(
            "Closed {} ({} frames, {:.1}% zero-copy)",
            self.info.path,
            self.stats.total_frames,
            self.stats.zero_copy_percentage()
        );
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Paused
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn position(&self) -> Duration {
        secs(self.current_pts)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.metadata.duration
    }

    pub fn width(&self) -> u32 {
        self.metadata.width
    }

    pub fn height(&self) -> u32 {
        self.metadata.height
    }

    pub fn fps(&self) -> f32 {
        self.metadata.frame_rate
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Audio clock, or None without a working audio track.
    pub fn audio_position(&self) -> Option<Duration> {
        self.audio.as_ref().and_then(|a| a.position())
    }

    /// True while the audio track has an unfinished reposition.
    pub fn is_seeking(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| a.is_seeking())
    }

    /// True while the audio track is the master clock. False without audio,
    /// with `audio_sync` off, during an audio seek and after the audio
    /// stream has ended.
    pub fn uses_audio_clock(&self) -> bool {
        self.audio_clock().is_some()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Sets linear volume, clamped to 0.0..=1.0.
    pub fn set_volume(&mut self, volume: f32) -> &mut Self {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(audio) = &self.audio {
            audio.set_volume(self.volume);
        }
        self
    }

    pub fn hw_accel_kind(&self) -> HwAccelKind {
        self.info.hw_kind
    }

    pub fn is_zero_copy(&self) -> bool {
        self.info.zero_copy
    }

    /// True once a bind failure has disabled the zero-copy path.
    pub fn zero_copy_failed(&self) -> bool {
        self.zero_copy_failed
    }

    pub fn decoder_info(&self) -> &DecoderInfo {
        &self.info
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn frames_dropped(&self) -> u64 {
        self.sync.frames_dropped
    }

    pub fn frames_repeated(&self) -> u64 {
        self.sync.frames_repeated
    }

    /// Shared drift tracker, readable from any thread.
    pub fn sync_metrics(&self) -> SyncMetrics {
        self.metrics.clone()
    }

    pub fn zero_copy_stats(&self) -> &ZeroCopyStats {
        &self.stats
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn rewind(&mut self) {
        if let Some(decoder) = self.decoder.as_mut() {
            if let Err(e) = decoder.seek(Duration::ZERO) {
                tracing::warn!("Video rewind failed: {}", e);
            }
        }
        self.current_pts = 0.0;
        self.last_displayed = -self.frame_time;
        self.needs_decode = true;
        self.sync.reset(0.0);
        self.metrics.reset(SEEK_GRACE_SAMPLES);
    }

    fn audio_clock(&self) -> Option<f64> {
        if !self.audio_sync {
            return None;
        }
        let audio = self.audio.as_ref()?;
        if audio.is_seeking() || audio.is_finished() {
            return None;
        }
        audio.position().map(|p| p.as_secs_f64())
    }

    fn clamp_position(&self, seconds: f64) -> f64 {
        if seconds.is_nan() {
            return 0.0;
        }
        seconds.clamp(0.0, self.duration)
    }

    fn next_frame(&mut self) -> NextFrame {
        let Some(decoder) = self.decoder.as_mut() else {
            return NextFrame::Failed;
        };
        match decoder.decode_next() {
            Ok(Some(frame)) => NextFrame::Frame(frame),
            Ok(None) => NextFrame::EndOfStream,
            Err(e) => {
                tracing::warn!("Video decode failed: {}", e);
                NextFrame::Failed
            }
        }
    }

    /// Decodes and discards `count` frames. Returns false at end of stream.
    fn drop_frames(&mut self, count: u64) -> bool {
        let mut dropped = 0;
        for _ in 0..count {
            match self.next_frame() {
                NextFrame::Frame(frame) => {
                    self.last_displayed = self.clamp_position(frame.pts.as_secs_f64());
                    dropped += 1;
                }
                NextFrame::EndOfStream => return false,
                NextFrame::Failed => break,
            }
        }
        if dropped > 0 {
            tracing::trace!("Dropped {} frames to catch up with audio", dropped);
            self.sync.record_dropped(dropped);
            self.metrics.record_dropped(dropped);
        }
        true
    }

    fn display_next(&mut self, clock: f64) {
        match self.next_frame() {
            NextFrame::Frame(frame) => {
                let pts = frame.pts;
                self.last_displayed = self.clamp_position(pts.as_secs_f64());
                self.present(frame);
                self.metrics.record_frame(pts, secs(clock));
            }
            NextFrame::EndOfStream => {
                tracing::debug!("Video stream ended before container duration");
                self.needs_decode = false;
                self.stop();
            }
            NextFrame::Failed => {
                // Hold the previous frame; try again next period.
                self.last_displayed += self.frame_time;
            }
        }
        self.needs_decode = false;
    }

    /// Hands a decoded frame to the texture slot.
    fn present(&mut self, frame: VideoFrame) {
        let binder = match self.decoder.as_mut() {
            Some(decoder) => decoder.parts_mut().1,
            None => return,
        };

        match frame.frame {
            DecodedFrame::Cpu(cpu) => {
                if binder.is_some() {
                    self.stats.record_fallback();
                } else {
                    self.stats.record_copy();
                }
                self.slot.stage(cpu);
            }
            DecodedFrame::Hardware(hw) => {
                let Some(binder) = binder else {
                    tracing::warn!("Copying decoder produced a hardware frame; dropped");
                    return;
                };
                if self.zero_copy_failed {
                    self.stats.record_fallback();
                    return;
                }
                match self.slot.bind_hardware(binder, &hw) {
                    Ok(()) => {
                        self.stats.record_zero_copy();
                        self.last_hw_frame = Some(hw);
                    }
                    Err(e) => {
                        // No retry and no re-cascade for the rest of this source's life.
                        tracing::warn!(
                            "Zero-copy bind failed for {}, disabling zero-copy: {}",
                            self.info.path,
                            e
                        );
                        self.zero_copy_failed = true;
                        self.stats.record_fallback();
                    }
                }
            }
        }
    }
}

impl Drop for VideoSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoSource")
            .field("path", &self.info.path)
            .field("state", &self.state)
            .field("position", &self.current_pts)
            .field("stage", &self.info.stage)
            .field("closed", &self.closed)
            .finish()
    }
}

fn open_audio_track(path: &str, backends: &dyn DecoderBackends) -> Option<AudioTrack> {
    match backends.open_audio(path) {
        Ok(Some((decoder, device))) => match AudioTrack::spawn(decoder, device) {
            Ok(track) => Some(track),
            Err(e) => {
                tracing::warn!("Audio track for {} not started: {}", path, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::warn!("Audio unavailable for {}, using video clock: {}", path, e);
            None
        }
    }
}

/// Seconds to `Duration`, saturating at zero for negative or non-finite input.
fn secs(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::ZERO)
}
