//! Sequential reference regression using dense QR.
//!
//! Builds the same normal equations one pixel at a time and solves them with
//! nalgebra. Rank-deficient systems fall back to an SVD least-squares solve.
//! Only meant for validating the batched path.

use nalgebra::DMatrix;

use super::normal_equations::{accumulate_pixel, NormalEquations};
use super::solver::Solution;
use super::TileBuffers;

/// Relative threshold below which an `R` diagonal or singular value counts as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Solves one system. `None` when nothing finite comes out.
pub fn solve_system(a: &[f64], b: &[f64], f: usize, c: usize) -> Option<Vec<f64>> {
    let a = DMatrix::from_row_slice(f, f, a);
    let b = DMatrix::from_row_slice(f, c, b);

    let qr = a.clone().qr();
    let r = qr.r();
    let r_max = (0..f).map(|i| r[(i, i)].abs()).fold(0.0f64, f64::max);
    if r_max == 0.0 || !r_max.is_finite() {
        return None;
    }
    let full_rank = (0..f).all(|i| r[(i, i)].abs() > r_max * RANK_TOLERANCE);

    let theta = if full_rank {
        qr.solve(&b)?
    } else {
        let svd = a.svd(true, true);
        let sigma_max = svd.singular_values.max();
        svd.solve(&b, sigma_max * RANK_TOLERANCE).ok()?
    };

    // Row-major f x c.
    let mut out = Vec::with_capacity(f * c);
    for i in 0..f {
        for k in 0..c {
            out.push(theta[(i, k)]);
        }
    }
    out.iter().all(|v| v.is_finite()).then_some(out)
}

/// Solves already built equations pixel by pixel.
pub fn solve(equations: &NormalEquations) -> Solution {
    let (f, c) = (equations.unknowns, equations.channels);
    let mut solution = Solution::unsolved(f, c, equations.pixels);
    for pixel in 0..equations.pixels {
        if let Some(theta) = solve_system(equations.a(pixel), equations.b(pixel), f, c) {
            solution.set(pixel, &theta);
        }
    }
    solution
}

/// Builds and solves every pixel of a tile on the calling thread.
pub fn regress(buffers: &TileBuffers, step: usize) -> Solution {
    let f = buffers.unknowns();
    let c = buffers.channels();
    let mut equations = NormalEquations::zeroed(f, c, buffers.tile.area());
    for pixel in 0..equations.pixels {
        let a = &mut equations.a[pixel * f * f..(pixel + 1) * f * f];
        let b = &mut equations.b[pixel * f * c..(pixel + 1) * f * c];
        accumulate_pixel(buffers, pixel, step, a, b);
    }
    solve(&equations)
}
