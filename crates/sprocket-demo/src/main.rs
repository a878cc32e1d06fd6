//! sprocket headless demo
//!
//! Plays a source on a fixed tick without a window and prints the A/V sync
//! report at the end. With `--gpu` every tick also resolves the current
//! frame through a headless wgpu device.
//!
//! ```bash
//! cargo run -p sprocket-demo -- pattern:1280x720@30:5 --gpu
//! cargo run -p sprocket-demo --features cpal-output -- pattern:640x360@25:10 --tone --realtime
//! ```

use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use clap::Parser;
use sprocket::cascade::AudioParts;
use sprocket::{
    AudioError, DecoderBackends, FrameBinder, HwAccelKind, OpenOptions, PlatformBackends,
    RawDecoder, VideoError, VideoFrame, VideoMetadata, VideoSource, WgpuContext,
};
use tracing::{info, warn};

/// Headless playback of a video source with an A/V sync report
#[derive(Parser, Debug)]
#[command(name = "sprocket-demo")]
#[command(version)]
struct Args {
    /// Path to play; `pattern:WxH@FPS:SECONDS` needs no media
    #[arg(default_value = "pattern:1280x720@30:5")]
    path: String,

    /// Ticks per second driving advance_frame
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f64,

    /// Sleep between ticks instead of running as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Upload and convert frames on a headless GPU
    #[arg(long)]
    gpu: bool,

    /// Seek here (seconds) before playing
    #[arg(long)]
    seek: Option<f64>,

    /// Stop after this many seconds of playback
    #[arg(long)]
    limit: Option<f64>,

    /// Skip hardware decoders
    #[arg(long)]
    software_only: bool,

    /// Skip the zero-copy stage
    #[arg(long)]
    no_zero_copy: bool,

    /// Play a 440 Hz tone on the default output device as the master clock
    #[cfg(feature = "cpal-output")]
    #[arg(long)]
    tone: bool,

    /// Log decoder selection at info level
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sprocket=debug".parse()?)
                .add_directive("sprocket_core=debug".parse()?)
                .add_directive("sprocket_demo=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    if !(args.tick_rate.is_finite() && args.tick_rate > 0.0) {
        anyhow::bail!("--tick-rate must be positive");
    }

    let mut options = OpenOptions::default()
        .with_zero_copy(!args.no_zero_copy)
        .with_debug(args.debug);
    if args.software_only {
        options = options.software_only();
    }

    #[cfg(feature = "cpal-output")]
    let tone = args.tone;
    #[cfg(not(feature = "cpal-output"))]
    let tone = false;
    let backends = DemoBackends { tone };
    let mut source = sprocket::open_with(&args.path, options, &backends)
        .with_context(|| format!("failed to open {}", args.path))?;

    info!(
        "{}: {}x{} @ {:.2}fps, {:?}, decoder {} (hw={}, fallback={}), audio={}",
        args.path,
        source.width(),
        source.height(),
        source.fps(),
        source.duration(),
        source.decoder_info().stage,
        source.hw_accel_kind(),
        source.decoder_info().fallback,
        source.has_audio()
    );

    let mut gpu = if args.gpu {
        match WgpuContext::headless() {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!("GPU unavailable, continuing without frame upload: {}", e);
                None
            }
        }
    } else {
        None
    };

    if let Some(seconds) = args.seek {
        let target = Duration::try_from_secs_f64(seconds.max(0.0))
            .context("--seek must be a finite number of seconds")?;
        source.seek(target);
    }

    run(&mut source, gpu.as_mut(), &args);
    report(&source);
    source.close();
    Ok(())
}

fn run(source: &mut VideoSource, mut gpu: Option<&mut WgpuContext>, args: &Args) {
    let tick = Duration::from_secs_f64(1.0 / args.tick_rate);
    let limit = args.limit.and_then(|s| Duration::try_from_secs_f64(s).ok());
    let started = Instant::now();
    let mut ticks: u64 = 0;
    let mut resolved: u64 = 0;
    let mut last_report = Duration::ZERO;

    source.play();
    while source.is_playing() {
        source.advance_frame(tick);
        ticks += 1;

        if let Some(ctx) = gpu.as_deref_mut() {
            if source.current_frame(ctx).is_some() {
                resolved += 1;
            }
        }

        let played = tick.mul_f64(ticks as f64);
        if played >= last_report + Duration::from_secs(1) {
            last_report = played;
            source.sync_metrics().log_status();
        }
        if limit.is_some_and(|limit| played >= limit) {
            info!("Stopping after {:?}", played);
            source.stop();
            break;
        }

        if args.realtime {
            if let Some(wait) = played.checked_sub(started.elapsed()) {
                thread::sleep(wait);
            }
        }
    }

    info!(
        "Ran {} ticks in {:?} ({} frames resolved on the GPU)",
        ticks,
        started.elapsed(),
        resolved
    );
}

fn report(source: &VideoSource) {
    let snapshot = source.sync_metrics().snapshot();
    let stats = source.zero_copy_stats();

    println!();
    println!("=== sprocket sync report ===");
    println!("{}", snapshot);
    println!(
        "Frames: dropped={} repeated={}",
        source.frames_dropped(),
        source.frames_repeated()
    );
    println!(
        "Presented: {} total, {:.1}% zero-copy, {} copied, {} fallback",
        stats.total_frames,
        stats.zero_copy_percentage(),
        stats.copied_frames,
        stats.fallback_frames
    );
    if source.zero_copy_failed() {
        println!("Zero-copy was disabled after a bind failure");
    }
    println!(
        "Sync test: {} ({})",
        if snapshot.passed_sync_test() {
            "PASSED"
        } else {
            "NOT PASSED"
        },
        snapshot.quality_summary()
    );
}

// =============================================================================
// Backends
// =============================================================================

/// Platform backends, optionally with a synthetic tone as the audio track.
struct DemoBackends {
    tone: bool,
}

impl DecoderBackends for DemoBackends {
    fn detect_hw_accel(&self, path: &str) -> HwAccelKind {
        PlatformBackends.detect_hw_accel(path)
    }

    fn resolve_binder(
        &self,
        path: &str,
        kind: HwAccelKind,
    ) -> Result<Option<Box<dyn FrameBinder>>, VideoError> {
        PlatformBackends.resolve_binder(path, kind)
    }

    fn open_zero_copy(
        &self,
        path: &str,
        kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        PlatformBackends.open_zero_copy(path, kind)
    }

    fn open_hardware(
        &self,
        path: &str,
        kind: HwAccelKind,
    ) -> Result<Box<dyn RawDecoder>, VideoError> {
        PlatformBackends.open_hardware(path, kind)
    }

    fn open_software(&self, path: &str) -> Result<Box<dyn RawDecoder>, VideoError> {
        let decoder = PlatformBackends.open_software(path)?;
        if self.tone {
            return Ok(Box::new(Audible::new(decoder)));
        }
        Ok(decoder)
    }

    fn open_audio(&self, path: &str) -> Result<Option<AudioParts>, AudioError> {
        if !self.tone {
            return PlatformBackends.open_audio(path);
        }
        tone_track(path)
    }
}

#[cfg(feature = "cpal-output")]
fn tone_track(path: &str) -> Result<Option<AudioParts>, AudioError> {
    use sprocket::cpal_output::CpalDevice;
    use sprocket::test_pattern::{PatternSpec, SineAudioDecoder};

    let duration = PatternSpec::parse(path)
        .map(|spec| spec.duration)
        .unwrap_or(Duration::from_secs(10));
    let device = CpalDevice::default_output()?;
    let decoder = SineAudioDecoder::new(device.sample_rate(), 440.0, duration);
    Ok(Some((Box::new(decoder), Box::new(device))))
}

#[cfg(not(feature = "cpal-output"))]
fn tone_track(_path: &str) -> Result<Option<AudioParts>, AudioError> {
    Ok(None)
}

/// Marks a silent decoder's stream as having audio so the tone is attached.
struct Audible {
    inner: Box<dyn RawDecoder>,
    metadata: VideoMetadata,
}

impl Audible {
    fn new(inner: Box<dyn RawDecoder>) -> Self {
        let metadata = VideoMetadata {
            has_audio: true,
            ..inner.metadata().clone()
        };
        Self { inner, metadata }
    }
}

impl RawDecoder for Audible {
    fn decode_next(&mut self) -> Result<Option<VideoFrame>, VideoError> {
        self.inner.decode_next()
    }

    fn seek(&mut self, position: Duration) -> Result<(), VideoError> {
        self.inner.seek(position)
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }
}
