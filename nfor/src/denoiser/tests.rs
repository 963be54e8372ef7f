use super::*;
use crate::config::{ReconstructionPolicy, SolverType, TemporalConfig, TileCount, TileDebug};
use crate::history::FrameOrder;
use crate::testing::{init_tracing, max_abs_diff, small_config, SyntheticFrame};

/// Clean frame whose radiance divided by the offset albedo is affine in the features.
fn divisible_frame(size: usize) -> SyntheticFrame {
    let mut frame = SyntheticFrame::clean(size, size);
    let offset = DenoiseConfig::default().albedo_divide.offsets()[0];
    frame.radiance = Image::from_fn(size, size, 4, |x, y, c| {
        let a = frame.albedo.pixel(x, y);
        let n = frame.normal.pixel(x, y);
        match c {
            3 => 1.0,
            _ => (a[c] + offset) * (0.5 + 0.3 * n[0] - 0.2 * n[1] + 0.4 * a[c]),
        }
    });
    frame
}

const SIZE: usize = 16;

fn output() -> Image {
    Image::new_filled(SIZE, SIZE, 4, -1.0)
}

fn temporal(half_width: usize, condition: FrameCountCondition) -> DenoiseConfig {
    let mut config = small_config();
    config.temporal = TemporalConfig {
        half_width,
        condition,
        denoising_frame_index: None,
    };
    config
}

fn mse(a: &Image, b: &Image) -> f32 {
    let mut sum = 0.0;
    for (x, y) in a.data().chunks_exact(4).zip(b.data().chunks_exact(4)) {
        for c in 0..3 {
            sum += (x[c] - y[c]) * (x[c] - y[c]);
        }
    }
    sum / (3 * a.width() * a.height()) as f32
}

#[test]
fn preview_reproduces_a_clean_frame() {
    init_tracing();
    let mut config = small_config();
    config.albedo_divide.enabled = false;
    let denoiser = Denoiser::new(config);
    let history = History::default();
    let frame = SyntheticFrame::clean(SIZE, SIZE);
    let mut out = output();

    assert!(denoiser.denoise(&ViewContext::preview(), &frame.inputs(), &history, &mut out, None));
    assert_eq!(history.count(), 1);
    assert!(max_abs_diff(&out, &frame.radiance, 0..3) < 1e-2);
    assert!(max_abs_diff(&out, &frame.radiance, 3..4) < 1e-6);
}

#[test]
fn window_of_three_waits_for_history() {
    let denoiser = Denoiser::new(temporal(1, FrameCountCondition::Exact));
    let history = History::default();
    let view = ViewContext::offline();
    let frames: Vec<_> = (0..3).map(|s| SyntheticFrame::noisy(SIZE, SIZE, 0.1, s)).collect();

    let mut out = output();
    assert!(!denoiser.denoise(&view, &frames[0].inputs(), &history, &mut out, None));
    assert!(!denoiser.denoise(&view, &frames[1].inputs(), &history, &mut out, None));
    assert!(out.data().iter().all(|&v| v == -1.0));
    assert!(denoiser.denoise(&view, &frames[2].inputs(), &history, &mut out, None));
    assert!(out.data().iter().all(|v| v.is_finite() && *v != -1.0));
    assert_eq!(history.count(), 3);
}

#[test]
fn single_bandwidth_skips_selection() {
    let mut config = small_config();
    config.bandwidth.override_bandwidth = Some(1.0);
    config.denoise_alpha = false;
    config.regression.reconstruction = ReconstructionPolicy::ForceGather;
    let denoiser = Denoiser::new(config.clone());
    let history = History::default();
    let frame = SyntheticFrame::noisy(SIZE, SIZE, 0.2, 5);
    let mut out = output();
    assert!(denoiser.denoise(&ViewContext::preview(), &frame.inputs(), &history, &mut out, None));

    let cache = history.lock();
    let frames: Vec<_> = cache.fetch_all(FrameOrder::Reverse).collect();
    let params = config.nlm.radiance_params(1.0);
    let expected = CollaborativeDenoiser::new(&config).denoise(&frames, 0, &params);
    assert_eq!(out, expected);
}

#[test]
fn forced_index_beyond_history_skips() {
    let mut config = temporal(1, FrameCountCondition::Any);
    config.temporal.denoising_frame_index = Some(2);
    let denoiser = Denoiser::new(config);
    let history = History::default();
    let view = ViewContext::offline();
    let frames: Vec<_> = (0..3).map(|s| SyntheticFrame::noisy(SIZE, SIZE, 0.1, s)).collect();
    let mut out = output();

    assert!(!denoiser.denoise(&view, &frames[0].inputs(), &history, &mut out, None));
    // Auto resolution would denoise here.
    assert!(!denoiser.denoise(&view, &frames[1].inputs(), &history, &mut out, None));
    assert!(denoiser.denoise(&view, &frames[2].inputs(), &history, &mut out, None));

    let mut config = temporal(1, FrameCountCondition::Exact);
    config.temporal.denoising_frame_index = Some(5);
    let denoiser = Denoiser::new(config);
    let history = History::default();
    for frame in &frames {
        assert!(!denoiser.denoise(&view, &frame.inputs(), &history, &mut out, None));
    }
    assert_eq!(history.count(), 3);
}

#[test]
fn any_condition_denoises_partial_windows() {
    let denoiser = Denoiser::new(temporal(1, FrameCountCondition::Any));
    let history = History::default();
    let view = ViewContext::offline();
    let mut frames: Vec<_> = (0..2).map(|s| SyntheticFrame::noisy(SIZE, SIZE, 0.1, s)).collect();
    for (i, frame) in frames.iter_mut().enumerate() {
        frame.depth = Some(Image::new_filled(SIZE, SIZE, 1, 10.0 + i as f32));
    }
    let mut out = output();
    let mut depth = Image::new_default(SIZE, SIZE, 1);

    assert!(denoiser.denoise(&view, &frames[0].inputs(), &history, &mut out, Some(&mut depth)));
    assert!(depth.data().iter().all(|&d| d == 10.0));
    // Index 1 (newest first) is the older frame.
    assert!(denoiser.denoise(&view, &frames[1].inputs(), &history, &mut out, Some(&mut depth)));
    assert!(depth.data().iter().all(|&d| d == 10.0));
}

#[test]
fn recover_phases_agree_on_static_frames() {
    let frame = SyntheticFrame::noisy(SIZE, SIZE, 0.1, 6);
    let view = ViewContext::offline();
    let run = |phase: RecoverPhase| {
        let mut config = temporal(1, FrameCountCondition::Exact);
        config.albedo_divide.recover_phase = phase;
        let denoiser = Denoiser::new(config);
        let history = History::default();
        let mut out = output();
        for _ in 0..3 {
            denoiser.denoise(&view, &frame.inputs(), &history, &mut out, None);
        }
        out
    };
    let last = run(RecoverPhase::Final);
    let each = run(RecoverPhase::Each);
    assert!(max_abs_diff(&last, &each, 0..4) < 1e-3);
    // Remodulated back to the radiance scale.
    assert!(mse(&last, &frame.radiance) < 0.05);
}

#[test]
fn identical_clean_frames_are_reproduced() {
    let frame = divisible_frame(SIZE);
    let view = ViewContext::offline();
    for phase in [RecoverPhase::Final, RecoverPhase::Each] {
        let mut config = temporal(1, FrameCountCondition::Exact);
        config.albedo_divide.recover_phase = phase;
        config.feature.filtering = false;
        let denoiser = Denoiser::new(config);
        let history = History::default();
        let mut out = output();
        let results: Vec<bool> = (0..3)
            .map(|_| denoiser.denoise(&view, &frame.inputs(), &history, &mut out, None))
            .collect();
        assert_eq!(results, vec![false, false, true]);
        let error = max_abs_diff(&out, &frame.radiance, 0..3);
        assert!(error < 1e-2, "{phase}: error {error}");
    }
}

#[test]
fn newton_schulz_denoises_noisy_frames() {
    let size = 24;
    let clean = SyntheticFrame::clean(size, size).radiance;
    for half_width in [0, 1] {
        let mut config = temporal(half_width, FrameCountCondition::Exact);
        config.regression.solver = SolverType::NewtonSchulz;
        let denoiser = Denoiser::new(config);
        let history = History::default();
        let frames: Vec<_> = (0..1 + 2 * half_width)
            .map(|s| SyntheticFrame::noisy(size, size, 0.3, 30 + s as u64))
            .collect();
        let mut out = Image::new_default(size, size, 4);
        let mut denoised = false;
        for frame in &frames {
            denoised =
                denoiser.denoise(&ViewContext::offline(), &frame.inputs(), &history, &mut out, None);
        }
        assert!(denoised);

        let before = mse(&frames[half_width].radiance, &clean);
        let after = mse(&out, &clean);
        assert!(after < before, "window {}: mse {after} vs noisy {before}", 1 + 2 * half_width);
    }
}

#[test]
fn pixels_outside_debug_tile_keep_noisy_radiance() {
    let size = 30;
    let mut config = small_config();
    config.feature.filtering = false;
    config.tiling.tile_count = TileCount::Fixed(3);
    config.tiling.debug = Some(TileDebug { index: Some(0) });
    assert!(config.albedo_divide.enabled);
    let denoiser = Denoiser::new(config);
    let frame = SyntheticFrame::noisy(size, size, 0.2, 12);
    let mut out = Image::new_default(size, size, 4);
    let history = History::default();
    assert!(denoiser.denoise(&ViewContext::preview(), &frame.inputs(), &history, &mut out, None));

    // Tile 0 covers x, y < 10; the search radius reaches 2 more pixels.
    for y in 15..size {
        for x in 15..size {
            for c in 0..3 {
                let (a, b) = (out.pixel(x, y)[c], frame.radiance.pixel(x, y)[c]);
                assert!((a - b).abs() < 1e-4, "({x}, {y}, {c}): {a} vs {b}");
            }
        }
    }
}

#[test]
fn denoising_reduces_error() {
    let size = 24;
    let clean = SyntheticFrame::clean(size, size).radiance;
    let frames: Vec<_> = (0..3).map(|s| SyntheticFrame::noisy(size, size, 0.3, 10 + s)).collect();
    let denoiser = Denoiser::new(temporal(1, FrameCountCondition::Exact));
    let history = History::default();
    let mut out = Image::new_default(size, size, 4);
    let mut denoised = false;
    for frame in &frames {
        denoised = denoiser.denoise(&ViewContext::offline(), &frame.inputs(), &history, &mut out, None);
    }
    assert!(denoised);

    let before = mse(&frames[1].radiance, &clean);
    let after = mse(&out, &clean);
    assert!(after < 0.5 * before, "mse {after} vs noisy {before}");
}

#[test]
fn preview_view_forces_single_frame() {
    let denoiser = Denoiser::new(temporal(2, FrameCountCondition::Exact));
    let history = History::new(5);
    let frame = SyntheticFrame::noisy(SIZE, SIZE, 0.1, 7);
    let mut out = output();
    assert!(denoiser.denoise(&ViewContext::preview(), &frame.inputs(), &history, &mut out, None));
    assert_eq!(history.lock().capacity(), 1);
}

#[test]
fn prefilter_only_touches_features() {
    let denoiser = Denoiser::new(small_config());
    let frame = SyntheticFrame::noisy(SIZE, SIZE, 0.1, 8);
    let mut albedo = crate::testing::add_noise(&frame.albedo, 0.05, 9);
    let mut normal = frame.normal.clone();
    let mut variance = frame.variance.clone();
    for px in variance.data_mut().chunks_exact_mut(4) {
        px[variance_channel::ALBEDO] = crate::testing::uniform_noise_variance(0.05);
    }
    let noisy = albedo.clone();

    denoiser.prefilter_features(&ViewContext::offline(), &mut albedo, &mut normal, &mut variance);
    assert!(mse(&albedo, &frame.albedo) < mse(&noisy, &frame.albedo));
}

#[test]
#[should_panic(expected = "override bandwidth")]
fn invalid_config_is_rejected() {
    let mut config = DenoiseConfig::default();
    config.bandwidth.override_bandwidth = Some(2.0);
    Denoiser::new(config);
}

#[test]
#[should_panic(expected = "output must be RGBA")]
fn output_must_be_rgba() {
    let denoiser = Denoiser::new(small_config());
    let frame = SyntheticFrame::clean(SIZE, SIZE);
    let mut out = Image::new_default(SIZE, SIZE, 3);
    denoiser.denoise(&ViewContext::preview(), &frame.inputs(), &History::default(), &mut out, None);
}
