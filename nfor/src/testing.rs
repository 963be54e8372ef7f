//! Synthetic inputs for tests.

use glam::IVec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{DenoiseConfig, PatchConfig, TileCount};
use crate::history::FrameInputs;
use crate::image::Image;

pub fn init_tracing() {
    common::log_setup::init_test_tracing();
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Uniform noise in `[-amplitude, amplitude]` has variance `amplitude^2 / 3`.
pub fn uniform_noise_variance(amplitude: f32) -> f32 {
    amplitude * amplitude / 3.0
}

pub fn random_image(width: usize, height: usize, channels: usize, seed: u64) -> Image {
    let mut rng = rng(seed);
    let data = (0..width * height * channels)
        .map(|_| rng.random_range(0.0f32..1.0))
        .collect();
    Image::new(width, height, channels, data)
}

pub fn add_noise(image: &Image, amplitude: f32, seed: u64) -> Image {
    let mut rng = rng(seed);
    let mut out = image.clone();
    for v in out.data_mut() {
        *v += rng.random_range(-amplitude..=amplitude);
    }
    out
}

/// Four regions of constant albedo.
pub fn piecewise_albedo(width: usize, height: usize) -> Image {
    Image::from_fn(width, height, 4, |x, y, c| {
        let quadrant = (x * 2 / width.max(1)) + 2 * (y * 2 / height.max(1));
        let base = [0.8, 0.3, 0.55, 0.15][quadrant.min(3)];
        match c {
            3 => 1.0,
            _ => base + 0.05 * c as f32,
        }
    })
}

/// A gently varying unit-ish normal field.
pub fn smooth_normals(width: usize, height: usize) -> Image {
    Image::from_fn(width, height, 4, |x, y, c| {
        let u = x as f32 / width.max(1) as f32 - 0.5;
        let v = y as f32 / height.max(1) as f32 - 0.5;
        match c {
            0 => u,
            1 => v,
            2 => 1.0,
            _ => 0.0,
        }
    })
}

pub fn depth_ramp(width: usize, height: usize) -> Image {
    Image::from_fn(width, height, 1, |x, y, _| 1.0 + (x + y) as f32 * 0.01)
}

/// Radiance that is an exact affine function of albedo and normal.
pub fn linear_radiance(albedo: &Image, normal: &Image) -> Image {
    Image::from_fn(albedo.width(), albedo.height(), 4, |x, y, c| {
        let a = albedo.pixel(x, y);
        let n = normal.pixel(x, y);
        match c {
            0 => 0.2 + 1.5 * a[0] + 0.3 * n[0] - 0.1 * n[1],
            1 => 0.1 + 0.9 * a[1] + 0.2 * n[1] + 0.05 * n[2],
            2 => 0.3 + 0.7 * a[2] - 0.4 * n[0],
            _ => 1.0,
        }
    })
}

/// Owned images of one synthetic frame.
#[derive(Debug, Clone)]
pub struct SyntheticFrame {
    pub radiance: Image,
    pub variance: Image,
    pub albedo: Image,
    pub normal: Image,
    pub depth: Option<Image>,
}

impl SyntheticFrame {
    /// Noise-free frame whose radiance is linear in its features.
    pub fn clean(width: usize, height: usize) -> Self {
        let albedo = piecewise_albedo(width, height);
        let normal = smooth_normals(width, height);
        let radiance = linear_radiance(&albedo, &normal);
        Self {
            radiance,
            variance: Image::new_default(width, height, 4),
            albedo,
            normal,
            depth: Some(depth_ramp(width, height)),
        }
    }

    /// Frame with uniform radiance noise of the given amplitude and matching variance.
    pub fn noisy(width: usize, height: usize, amplitude: f32, seed: u64) -> Self {
        let mut frame = Self::clean(width, height);
        let noisy = add_noise(&frame.radiance, amplitude, seed);
        frame.radiance.copy_channels_from(0, &noisy, 0, 3);
        let variance = uniform_noise_variance(amplitude);
        for px in frame.variance.data_mut().chunks_exact_mut(4) {
            px[0] = variance;
        }
        frame
    }

    pub fn inputs(&self) -> FrameInputs<'_> {
        FrameInputs {
            radiance: &self.radiance,
            variance: &self.variance,
            albedo: &self.albedo,
            normal: &self.normal,
            depth: self.depth.as_ref(),
        }
    }

    pub fn extent(&self) -> IVec2 {
        self.radiance.size()
    }
}

pub fn max_abs_diff(a: &Image, b: &Image, channels: std::ops::Range<usize>) -> f32 {
    assert!(a.same_extent(b));
    let mut max = 0.0f32;
    for y in 0..a.height() {
        for x in 0..a.width() {
            for c in channels.clone() {
                max = max.max((a.pixel(x, y)[c] - b.pixel(x, y)[c]).abs());
            }
        }
    }
    max
}

/// Small windows so that tests on tiny images stay fast.
pub fn small_config() -> DenoiseConfig {
    let mut config = DenoiseConfig::default();
    config.feature.nlm = PatchConfig {
        patch_size: 1,
        patch_distance: 2,
    };
    config.nlm.radiance = PatchConfig {
        patch_size: 1,
        patch_distance: 2,
    };
    config.nlm.atlas_size = 0;
    config.tiling.tile_count = TileCount::Fixed(1);
    config
}
