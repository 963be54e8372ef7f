use rayon::prelude::*;

use super::{TileBuffers, MAX_FEATURES};

/// `A` (`f x f`, row-major) and `B` (`f x c`, row-major) of every tile pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    pub unknowns: usize,
    pub channels: usize,
    pub pixels: usize,
    pub a: Vec<f64>,
    pub b: Vec<f64>,
}

impl NormalEquations {
    pub fn zeroed(unknowns: usize, channels: usize, pixels: usize) -> Self {
        Self {
            unknowns,
            channels,
            pixels,
            a: vec![0.0; unknowns * unknowns * pixels],
            b: vec![0.0; unknowns * channels * pixels],
        }
    }

    #[inline]
    pub fn a(&self, pixel: usize) -> &[f64] {
        let len = self.unknowns * self.unknowns;
        &self.a[pixel * len..(pixel + 1) * len]
    }

    #[inline]
    pub fn b(&self, pixel: usize) -> &[f64] {
        let len = self.unknowns * self.channels;
        &self.b[pixel * len..(pixel + 1) * len]
    }
}

/// Accumulates the weighted observations of tile pixel `pixel`, keeping every
/// `step`-th observation in `(frame, offset)` order.
pub(super) fn accumulate_pixel(
    buffers: &TileBuffers,
    pixel: usize,
    step: usize,
    a: &mut [f64],
    b: &mut [f64],
) {
    let f = buffers.unknowns();
    let c = buffers.channels();
    let offsets = buffers.search.offset_count();
    let p = buffers.tile.point_at(pixel);
    let mut x = [0.0f64; MAX_FEATURES];

    a.fill(0.0);
    b.fill(0.0);

    for frame in 0..buffers.desc.frame_count {
        for offset in 0..offsets {
            if (frame * offsets + offset) % step != 0 {
                continue;
            }
            let w = buffers.weights.get(pixel, frame, offset) as f64;
            if w == 0.0 {
                continue;
            }
            let n = p + buffers.search.offset(offset);
            buffers.covariates(frame, n, &mut x);
            let y = buffers.response(frame, n);

            for i in 0..f {
                let wx = w * x[i];
                for j in i..f {
                    a[i * f + j] += wx * x[j];
                }
                for (k, &yk) in y.iter().enumerate() {
                    b[i * c + k] += wx * yk as f64;
                }
            }
        }
    }

    for i in 0..f {
        for j in 0..i {
            a[i * f + j] = a[j * f + i];
        }
    }
}

/// Builds `A` and `B` for every tile pixel in parallel.
pub fn build_normal_equations(buffers: &TileBuffers, step: usize) -> NormalEquations {
    assert!(step > 0, "sampling step must be > 0");
    let f = buffers.unknowns();
    let c = buffers.channels();
    let mut equations = NormalEquations::zeroed(f, c, buffers.tile.area());

    let (a, b) = (&mut equations.a, &mut equations.b);
    a.par_chunks_mut(f * f)
        .zip(b.par_chunks_mut(f * c))
        .enumerate()
        .for_each(|(pixel, (a, b))| accumulate_pixel(buffers, pixel, step, a, b));

    equations
}
