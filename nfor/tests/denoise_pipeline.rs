//! End-to-end runs through the public API.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use nfor::{
    DenoiseConfig, Denoiser, FrameCountCondition, FrameInputs, History, Image, PatchConfig,
    SolverType, TileCount, ViewContext, WeightLayout,
};

const WIDTH: usize = 32;
const HEIGHT: usize = 24;
const NOISE: f32 = 0.25;

struct Frame {
    radiance: Image,
    variance: Image,
    albedo: Image,
    normal: Image,
    depth: Image,
}

impl Frame {
    fn inputs(&self) -> FrameInputs<'_> {
        FrameInputs {
            radiance: &self.radiance,
            variance: &self.variance,
            albedo: &self.albedo,
            normal: &self.normal,
            depth: Some(&self.depth),
        }
    }
}

fn albedo() -> Image {
    Image::from_fn(WIDTH, HEIGHT, 4, |x, _, c| {
        let base = if x < WIDTH / 2 { 0.7 } else { 0.25 };
        if c == 3 { 1.0 } else { base + 0.1 * c as f32 }
    })
}

fn normal() -> Image {
    Image::from_fn(WIDTH, HEIGHT, 4, |x, y, c| match c {
        0 => x as f32 / WIDTH as f32 - 0.5,
        1 => y as f32 / HEIGHT as f32 - 0.5,
        2 => 1.0,
        _ => 0.0,
    })
}

fn clean_radiance(albedo: &Image, normal: &Image) -> Image {
    Image::from_fn(WIDTH, HEIGHT, 4, |x, y, c| {
        let a = albedo.pixel(x, y)[c.min(2)];
        let n = normal.pixel(x, y);
        match c {
            3 => 1.0,
            _ => a * (0.8 + 0.4 * n[0] - 0.2 * n[1]),
        }
    })
}

fn frame(seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let albedo = albedo();
    let normal = normal();
    let mut radiance = clean_radiance(&albedo, &normal);
    for px in radiance.data_mut().chunks_exact_mut(4) {
        for v in &mut px[..3] {
            *v += rng.random_range(-NOISE..=NOISE);
        }
    }
    let variance = Image::from_fn(WIDTH, HEIGHT, 4, |_, _, c| {
        if c == 0 { NOISE * NOISE / 3.0 } else { 0.0 }
    });
    let depth = Image::from_fn(WIDTH, HEIGHT, 1, |x, y, _| 2.0 + (x + y) as f32 * 0.01 + seed as f32);
    Frame {
        radiance,
        variance,
        albedo,
        normal,
        depth,
    }
}

fn config() -> DenoiseConfig {
    let mut config = DenoiseConfig::default();
    config.feature.nlm = PatchConfig {
        patch_size: 1,
        patch_distance: 2,
    };
    config.nlm.radiance = PatchConfig {
        patch_size: 1,
        patch_distance: 3,
    };
    config.nlm.atlas_size = 64;
    config.temporal.half_width = 1;
    config
}

fn mse(a: &Image, b: &Image) -> f32 {
    let mut sum = 0.0;
    for (x, y) in a.data().chunks_exact(4).zip(b.data().chunks_exact(4)) {
        for c in 0..3 {
            sum += (x[c] - y[c]) * (x[c] - y[c]);
        }
    }
    sum / (3 * WIDTH * HEIGHT) as f32
}

fn run(config: DenoiseConfig, frames: &[Frame]) -> (Image, Image, Vec<bool>) {
    let denoiser = Denoiser::new(config);
    let history = History::default();
    let mut output = Image::new_default(WIDTH, HEIGHT, 4);
    let mut depth = Image::new_default(WIDTH, HEIGHT, 1);
    let results = frames
        .iter()
        .map(|frame| {
            denoiser.denoise(
                &ViewContext::offline(),
                &frame.inputs(),
                &history,
                &mut output,
                Some(&mut depth),
            )
        })
        .collect();
    (output, depth, results)
}

#[test]
fn temporal_window_denoises_center_frame() {
    let frames: Vec<Frame> = (0..4).map(frame).collect();
    let (output, depth, results) = run(config(), &frames);
    assert_eq!(results, vec![false, false, true, true]);

    // The last call denoised the middle of frames 1..=3.
    assert_eq!(depth, frames[2].depth);
    let clean = clean_radiance(&albedo(), &normal());
    let noisy = mse(&frames[2].radiance, &clean);
    let denoised = mse(&output, &clean);
    assert!(denoised < 0.5 * noisy, "denoised {denoised} vs noisy {noisy}");
}

#[test]
fn solvers_and_layouts_agree() {
    let frames: Vec<Frame> = (0..3).map(|s| frame(20 + s)).collect();
    let (baseline, _, _) = run(config(), &frames);

    for (solver, layout, tiles) in [
        (SolverType::Hybrid, WeightLayout::Planar, TileCount::Fixed(2)),
        (SolverType::NewtonCholesky, WeightLayout::Interleaved, TileCount::Fixed(3)),
        (SolverType::NewtonSchulz, WeightLayout::None, TileCount::Auto),
    ] {
        let mut config = config();
        config.regression.solver = solver;
        config.nlm.weight_layout = layout;
        config.tiling.tile_count = tiles;
        let (output, _, results) = run(config, &frames);
        assert_eq!(results, vec![false, false, true]);
        let diff = mse(&output, &baseline);
        assert!(diff < 1e-4, "{solver} / {layout}: {diff}");
    }
}

#[test]
fn partial_windows_denoise_with_any_condition() {
    let frames: Vec<Frame> = (0..2).map(|s| frame(40 + s)).collect();
    let mut config = config();
    config.temporal.condition = FrameCountCondition::Any;
    let (_, depth, results) = run(config, &frames);
    assert_eq!(results, vec![true, true]);
    assert_eq!(depth, frames[0].depth);
}

#[test]
fn yaml_config_drives_the_pipeline() {
    let yaml = "
temporal:
  half_width: 0
bandwidth:
  override_bandwidth: 1.0
nlm:
  radiance:
    patch_size: 1
    patch_distance: 2
feature:
  filtering: false
";
    let config = DenoiseConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.bandwidth.bandwidths(), vec![1.0]);
    let frames = [frame(60)];
    let (output, _, results) = run(config, &frames);
    assert_eq!(results, vec![true]);
    assert!(output.data().iter().all(|v| v.is_finite()));
}
