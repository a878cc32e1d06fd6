//! Hardware frame binding, texture replacement and format dispatch.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p sprocket-core --test zero_copy
//! ```

mod common;

mod binding_tests {
    use std::sync::atomic::Ordering;

    use sprocket_core::{open_with, DecoderStage, OpenOptions, VideoSource};

    use crate::common::{tick, BinderMode, FakeBackends, FakeContext, FrameKind};

    fn open(backends: &FakeBackends) -> VideoSource {
        let mut source = open_with("clip.mp4", OpenOptions::default(), backends).expect("open");
        assert!(source.is_zero_copy());
        source.play();
        source
    }

    #[test]
    fn test_in_place_binder_keeps_one_texture() {
        let backends = FakeBackends::hardware(1.0, BinderMode::InPlace);
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        for _ in 0..3 {
            source.advance_frame(tick(30.0));
            drop(source.current_frame(&mut ctx).expect("image"));
        }

        assert_eq!(backends.binder_calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.wraps, 3);
        assert_eq!(ctx.uploads, 0);
        assert_eq!(events.count("texture"), 0);
        let stats = source.zero_copy_stats();
        assert_eq!(stats.zero_copy_frames, 3);
        assert_eq!(stats.fallback_frames, 0);
        assert_eq!(stats.zero_copy_percentage(), 100.0);
    }

    /// A binder that hands back a new texture per frame: the slot must drop
    /// the image wrapping the old texture before the old texture itself.
    #[test]
    fn test_replaced_texture_released_after_its_image() {
        let backends = FakeBackends::hardware(1.0, BinderMode::Replacing);
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        source.advance_frame(tick(30.0));
        drop(source.current_frame(&mut ctx).expect("image"));
        assert!(events.snapshot().is_empty());

        source.advance_frame(tick(30.0));
        assert_eq!(events.snapshot(), vec!["image", "texture"]);

        let image = source.current_frame(&mut ctx).expect("image");
        assert_eq!(image.id, 2);
    }

    /// NV12 surfaces are converted to a transient RGBA texture which is
    /// released as soon as it has been wrapped.
    #[test]
    fn test_biplanar_surface_converted_per_frame() {
        let mut backends = FakeBackends::hardware(1.0, BinderMode::InPlace);
        backends.surface = FrameKind::HardwareNv12;
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        source.advance_frame(tick(30.0));
        drop(source.current_frame(&mut ctx).expect("image"));
        assert_eq!(ctx.conversions, 1);
        assert_eq!(events.snapshot(), vec!["transient"]);

        // No new frame, no new conversion.
        drop(source.current_frame(&mut ctx).expect("image"));
        assert_eq!(ctx.conversions, 1);

        source.advance_frame(tick(30.0));
        drop(source.current_frame(&mut ctx).expect("image"));
        assert_eq!(ctx.conversions, 2);
        assert_eq!(events.snapshot(), vec!["transient", "transient", "image"]);
        assert_eq!(events.count("texture"), 0);
    }

    /// One bind failure disables zero-copy for the rest of the source's life.
    #[test]
    fn test_bind_failure_is_sticky() {
        let backends = FakeBackends::hardware(1.0, BinderMode::Failing);
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        for _ in 0..4 {
            source.advance_frame(tick(30.0));
        }

        assert!(source.zero_copy_failed());
        assert_eq!(backends.binder_calls.load(Ordering::SeqCst), 1);
        // The cascade outcome is a record of the open and does not change.
        assert!(source.is_zero_copy());
        assert!(source.current_frame(&mut ctx).is_none());
        let stats = source.zero_copy_stats();
        assert_eq!(stats.zero_copy_frames, 0);
        assert_eq!(stats.fallback_frames, 4);
    }

    #[test]
    fn test_declined_or_unsupported_bind_is_sticky() {
        for mode in [BinderMode::Declining, BinderMode::Unsupported] {
            let backends = FakeBackends::hardware(1.0, mode);
            let mut source = open(&backends);

            source.advance_frame(tick(30.0));
            source.advance_frame(tick(30.0));

            assert!(source.zero_copy_failed(), "{mode:?}");
            assert_eq!(backends.binder_calls.load(Ordering::SeqCst), 1, "{mode:?}");
            assert_eq!(source.zero_copy_stats().fallback_frames, 2, "{mode:?}");
        }
    }

    /// An image the renderer still holds outlives the source that made it.
    #[test]
    fn test_renderer_clone_outlives_close() {
        let backends = FakeBackends::hardware(1.0, BinderMode::InPlace);
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        source.advance_frame(tick(30.0));
        let held = source.current_frame(&mut ctx).expect("image");
        source.close();
        assert!(source.current_frame(&mut ctx).is_none());
        assert_eq!(events.snapshot(), vec!["texture", "decoder", "binder"]);

        drop(held);
        assert_eq!(events.count("image"), 1);
    }

    /// CPU frames from a zero-copy decoder are uploaded and counted as
    /// fallback frames.
    #[test]
    fn test_cpu_frames_on_zero_copy_path_are_uploaded() {
        let mut backends = FakeBackends::hardware(1.0, BinderMode::InPlace);
        backends.surface = FrameKind::Cpu;
        let events = backends.events.clone();
        let mut ctx = FakeContext::new(&events);
        let mut source = open(&backends);

        source.advance_frame(tick(30.0));
        assert!(source.current_frame(&mut ctx).is_some());
        assert_eq!(ctx.uploads, 1);
        assert_eq!(backends.binder_calls.load(Ordering::SeqCst), 0);
        assert_eq!(source.zero_copy_stats().fallback_frames, 1);
    }

    /// Software and hardware-copy sources count every presented frame as a
    /// copied frame.
    #[test]
    fn test_copy_paths_count_presented_frames() {
        let software = FakeBackends::software(1.0);
        let mut copying = FakeBackends::hardware(1.0, BinderMode::InPlace);
        copying.binder = None;

        for (backends, stage) in [
            (&software, DecoderStage::Software),
            (&copying, DecoderStage::HardwareCopy),
        ] {
            let mut ctx = FakeContext::new(&backends.events);
            let mut source =
                open_with("clip.mp4", OpenOptions::default(), backends).expect("open");
            assert_eq!(source.decoder_info().stage, stage);

            source.play();
            for _ in 0..3 {
                source.advance_frame(tick(30.0));
                drop(source.current_frame(&mut ctx).expect("image"));
            }

            let stats = source.zero_copy_stats();
            assert_eq!(stats.total_frames, 3, "{stage}");
            assert_eq!(stats.copied_frames, 3, "{stage}");
            assert_eq!(stats.zero_copy_frames, 0);
            assert_eq!(stats.fallback_frames, 0);
            assert_eq!(stats.zero_copy_percentage(), 0.0);
        }
    }
}
