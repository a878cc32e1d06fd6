//! Options accepted by [`open`](crate::open).

use crate::video::HwAccelKind;

/// Forces CPU copies even where a zero-copy binder exists.
pub const ENV_FORCE_CPU_COPY: &str = "SPROCKET_FORCE_CPU_COPY";
/// Disables hardware decoding entirely.
pub const ENV_NO_HW_ACCEL: &str = "SPROCKET_NO_HW_ACCEL";
/// Opens sources without an audio track.
pub const ENV_NO_AUDIO: &str = "SPROCKET_NO_AUDIO";
/// Logs decoder selection at info level.
pub const ENV_VIDEO_DEBUG: &str = "SPROCKET_VIDEO_DEBUG";

/// Which decoder family to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderPreference {
    /// Detect the platform's hardware API and cascade down to software.
    #[default]
    Auto,
    /// Skip both hardware stages.
    Software,
    /// Use this hardware API instead of the detected one.
    Hardware(HwAccelKind),
}

/// Options for opening a video source.
///
/// ```
/// use sprocket_core::OpenOptions;
///
/// let options = OpenOptions::new().with_zero_copy(false).with_audio(false);
/// assert!(options.hw_accel);
/// assert!(!options.zero_copy);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Try the zero-copy stage first
    pub zero_copy: bool,
    /// Try the hardware stages. Turning this off also skips zero-copy,
    /// which needs a hardware decoder, whatever `zero_copy` says.
    pub hw_accel: bool,
    pub decoder: DecoderPreference,
    /// Open an audio track if the container has one
    pub audio: bool,
    /// Pace video against the audio clock
    pub audio_sync: bool,
    /// Verbose decoder selection logging
    pub debug: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            zero_copy: true,
            hw_accel: true,
            decoder: DecoderPreference::Auto,
            audio: true,
            audio_sync: true,
            debug: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zero_copy(mut self, enabled: bool) -> Self {
        self.zero_copy = enabled;
        self
    }

    /// See [`hw_accel`](Self::hw_accel); disabling it also disables zero-copy.
    pub fn with_hw_accel(mut self, enabled: bool) -> Self {
        self.hw_accel = enabled;
        self
    }

    pub fn with_decoder(mut self, decoder: DecoderPreference) -> Self {
        self.decoder = decoder;
        self
    }

    /// Disables both hardware stages.
    pub fn software_only(mut self) -> Self {
        self.decoder = DecoderPreference::Software;
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio = enabled;
        self
    }

    pub fn with_audio_sync(mut self, enabled: bool) -> Self {
        self.audio_sync = enabled;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Applies the `SPROCKET_*` environment switches.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).is_ok())
    }

    /// Applies overrides for every switch `is_set` reports as present.
    pub fn with_overrides_from(mut self, is_set: impl Fn(&str) -> bool) -> Self {
        if is_set(ENV_FORCE_CPU_COPY) {
            tracing::info!("{} set, zero-copy disabled", ENV_FORCE_CPU_COPY);
            self.zero_copy = false;
        }
        if is_set(ENV_NO_HW_ACCEL) {
            tracing::info!("{} set, hardware decoding disabled", ENV_NO_HW_ACCEL);
            self.decoder = DecoderPreference::Software;
        }
        if is_set(ENV_NO_AUDIO) {
            self.audio = false;
        }
        if is_set(ENV_VIDEO_DEBUG) {
            self.debug = true;
        }
        self
    }

    /// Whether any hardware stage may run.
    pub(crate) fn hardware_allowed(&self) -> bool {
        match self.decoder {
            DecoderPreference::Auto => self.hw_accel,
            DecoderPreference::Software => false,
            DecoderPreference::Hardware(_) => true,
        }
    }
}
