//! Strategies for `A * theta = B`.
//!
//! All strategies share one contract: for each pixel either a `theta` is produced or
//! the pixel is left unsolved and contributes nothing to the reconstruction. The
//! cascading strategies partition pixels into [`CompactedIndices`] and run later
//! passes only over the relevant subset.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use rayon::prelude::*;

use super::{NormalEquations, MAX_FEATURES};
use crate::config::{RegressionConfig, SolverType};

pub type Matrix = [f64; MAX_FEATURES * MAX_FEATURES];

/// Cholesky pivots at or below `max|A| * PIVOT_TOLERANCE` count as non positive-definite.
const PIVOT_TOLERANCE: f64 = 1e-12;
const NEWTON_SCHULZ_MAX_ITERATIONS: usize = 100;
const NEWTON_SCHULZ_TOLERANCE: f64 = 1e-13;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolveStats {
    /// Pixels whose first Cholesky attempt failed.
    pub cholesky_failed: usize,
    /// Pixels solved by Newton-Schulz.
    pub newton: usize,
    /// Pixels re-solved with the refinement lambda.
    pub refined: usize,
    /// Pixels without coefficients.
    pub unsolved: usize,
}

/// Coefficients of every tile pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub unknowns: usize,
    pub channels: usize,
    /// `f x c` row-major per pixel.
    pub theta: Vec<f64>,
    pub solved: Vec<bool>,
    pub stats: SolveStats,
}

impl Solution {
    pub fn unsolved(unknowns: usize, channels: usize, pixels: usize) -> Self {
        Self {
            unknowns,
            channels,
            theta: vec![0.0; unknowns * channels * pixels],
            solved: vec![false; pixels],
            stats: SolveStats {
                unsolved: pixels,
                ..Default::default()
            },
        }
    }

    #[inline]
    pub fn theta(&self, pixel: usize) -> &[f64] {
        let len = self.unknowns * self.channels;
        &self.theta[pixel * len..(pixel + 1) * len]
    }

    pub fn set(&mut self, pixel: usize, theta: &[f64]) {
        let len = self.unknowns * self.channels;
        self.theta[pixel * len..(pixel + 1) * len].copy_from_slice(&theta[..len]);
        if !self.solved[pixel] {
            self.solved[pixel] = true;
            self.stats.unsolved -= 1;
        }
    }

    /// `x^T * theta` for channel `k`.
    #[inline]
    pub fn predict(&self, pixel: usize, x: &[f64; MAX_FEATURES], k: usize) -> f64 {
        let theta = self.theta(pixel);
        let mut sum = 0.0;
        for (i, &xi) in x.iter().enumerate().take(self.unknowns) {
            sum += xi * theta[i * self.channels + k];
        }
        sum
    }
}

/// Pixel indices split by the outcome of a pass: successes fill the buffer from the
/// front, failures from the back.
#[derive(Debug)]
pub struct CompactedIndices {
    slots: Vec<AtomicU32>,
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl CompactedIndices {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            successes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn push_success(&self, pixel: u32) {
        let k = self.successes.fetch_add(1, Ordering::Relaxed);
        self.slots[k].store(pixel, Ordering::Relaxed);
    }

    pub fn push_failure(&self, pixel: u32) {
        let k = self.failures.fetch_add(1, Ordering::Relaxed);
        self.slots[self.slots.len() - 1 - k].store(pixel, Ordering::Relaxed);
    }

    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Sorted successful pixels.
    pub fn successes(&self) -> Vec<u32> {
        let mut out: Vec<u32> = self.slots[..self.success_count()]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        out.sort_unstable();
        out
    }

    /// Sorted failed pixels.
    pub fn failures(&self) -> Vec<u32> {
        let end = self.slots.len();
        let mut out: Vec<u32> = self.slots[end - self.failure_count()..]
            .iter()
            .map(|s| s.load(Ordering::Relaxed))
            .collect();
        out.sort_unstable();
        out
    }
}

#[inline]
fn max_abs(a: &[f64]) -> f64 {
    a.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

/// `max(lambda * max|A|, min_lambda)`.
#[inline]
pub fn effective_lambda(a: &[f64], lambda: f64, min_lambda: f64) -> f64 {
    (lambda * max_abs(a)).max(min_lambda)
}

/// Lower factor of `A + reg * I`, or `None` when it is not positive definite.
fn cholesky_factor(a: &[f64], f: usize, reg: f64) -> Option<Matrix> {
    let scale = max_abs(a);
    if !(scale > 0.0 && scale.is_finite()) {
        return None;
    }
    let mut l = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    for j in 0..f {
        let mut pivot = a[j * f + j] + reg;
        for k in 0..j {
            pivot -= l[j * f + k] * l[j * f + k];
        }
        if !(pivot > scale * PIVOT_TOLERANCE) {
            return None;
        }
        let diag = pivot.sqrt();
        l[j * f + j] = diag;
        for i in j + 1..f {
            let mut sum = a[i * f + j];
            for k in 0..j {
                sum -= l[i * f + k] * l[j * f + k];
            }
            l[i * f + j] = sum / diag;
        }
    }
    Some(l)
}

/// Solves `(A + reg * I) * theta = B` for `c` right-hand sides.
pub fn cholesky_solve(a: &[f64], b: &[f64], f: usize, c: usize, reg: f64) -> Option<Matrix> {
    let l = cholesky_factor(a, f, reg)?;
    let mut theta = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    let mut z = [0.0f64; MAX_FEATURES];
    for k in 0..c {
        for i in 0..f {
            let mut sum = b[i * c + k];
            for j in 0..i {
                sum -= l[i * f + j] * z[j];
            }
            z[i] = sum / l[i * f + i];
        }
        for i in (0..f).rev() {
            let mut sum = z[i];
            for j in i + 1..f {
                sum -= l[j * f + i] * theta[j * c + k];
            }
            theta[i * c + k] = sum / l[i * f + i];
        }
    }
    theta[..f * c].iter().all(|v| v.is_finite()).then_some(theta)
}

/// `(A + reg * I)^-1`.
pub fn cholesky_inverse(a: &[f64], f: usize, reg: f64) -> Option<Matrix> {
    let mut identity = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    for i in 0..f {
        identity[i * f + i] = 1.0;
    }
    cholesky_solve(a, &identity, f, f, reg)
}

#[inline]
fn mat_mul(lhs: &[f64], rhs: &[f64], n: usize, m: usize, k: usize, out: &mut [f64]) {
    for i in 0..n {
        for j in 0..k {
            let mut sum = 0.0;
            for l in 0..m {
                sum += lhs[i * m + l] * rhs[l * k + j];
            }
            out[i * k + j] = sum;
        }
    }
}

/// Newton-Schulz iteration `X <- X (2I - A X)` on `A + reg * I`.
///
/// Seeded with `A^T / (|A|_1 |A|_inf)` it converges to the pseudo-inverse, so
/// singular systems still yield the minimum-norm solution. Iteration stops once
/// `|I - A X|` no longer shrinks and the best iterate is returned.
pub fn newton_schulz_inverse(
    a: &[f64],
    f: usize,
    reg: f64,
    seed: Option<&Matrix>,
    max_iterations: usize,
) -> Matrix {
    let mut a_reg = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    a_reg[..f * f].copy_from_slice(&a[..f * f]);
    for i in 0..f {
        a_reg[i * f + i] += reg;
    }

    let mut x = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    match seed {
        Some(seed) => x[..f * f].copy_from_slice(&seed[..f * f]),
        None => {
            let norm_1 = (0..f)
                .map(|j| (0..f).map(|i| a_reg[i * f + j].abs()).sum::<f64>())
                .fold(0.0, f64::max);
            let norm_inf = (0..f)
                .map(|i| (0..f).map(|j| a_reg[i * f + j].abs()).sum::<f64>())
                .fold(0.0, f64::max);
            let scale = norm_1 * norm_inf;
            if !(scale > 0.0 && scale.is_finite()) {
                return x;
            }
            for i in 0..f {
                for j in 0..f {
                    x[i * f + j] = a_reg[j * f + i] / scale;
                }
            }
        }
    }

    let mut best = x;
    let mut best_residual = f64::INFINITY;
    let mut ax = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    let mut next = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    for _ in 0..max_iterations {
        mat_mul(&a_reg, &x, f, f, f, &mut ax);
        // ax becomes 2I - AX = I + R with R = I - AX.
        let mut residual = 0.0;
        for i in 0..f {
            for j in 0..f {
                let identity = if i == j { 1.0 } else { 0.0 };
                let r = identity - ax[i * f + j];
                residual += r * r;
                ax[i * f + j] = identity + r;
            }
        }
        if !(residual < best_residual) {
            break;
        }
        best = x;
        best_residual = residual;
        if residual <= NEWTON_SCHULZ_TOLERANCE * NEWTON_SCHULZ_TOLERANCE {
            break;
        }
        mat_mul(&x, &ax, f, f, f, &mut next);
        x = next;
    }

    // The last iterate is only checked when the loop ran out.
    mat_mul(&a_reg, &x, f, f, f, &mut ax);
    let residual: f64 = (0..f * f)
        .map(|k| {
            let identity = if k / f == k % f { 1.0 } else { 0.0 };
            (identity - ax[k]) * (identity - ax[k])
        })
        .sum();
    if residual < best_residual {
        best = x;
    }
    best
}

fn inverse_times_b(inverse: &Matrix, b: &[f64], f: usize, c: usize) -> Option<Matrix> {
    let mut theta = [0.0f64; MAX_FEATURES * MAX_FEATURES];
    mat_mul(inverse, b, f, f, c, &mut theta);
    theta[..f * c].iter().all(|v| v.is_finite()).then_some(theta)
}

/// Cholesky over `indices`, partitioning them by outcome.
fn cholesky_pass(
    equations: &NormalEquations,
    indices: &[u32],
    lambda: f64,
    min_lambda: f64,
) -> (CompactedIndices, Vec<(u32, Matrix)>) {
    let (f, c) = (equations.unknowns, equations.channels);
    let partition = CompactedIndices::new(indices.len());
    let solved = indices
        .par_iter()
        .filter_map(|&pixel| {
            let a = equations.a(pixel as usize);
            let b = equations.b(pixel as usize);
            let reg = effective_lambda(a, lambda, min_lambda);
            match cholesky_solve(a, b, f, c, reg) {
                Some(theta) => {
                    partition.push_success(pixel);
                    Some((pixel, theta))
                }
                None => {
                    partition.push_failure(pixel);
                    None
                }
            }
        })
        .collect();
    (partition, solved)
}

/// Newton-Schulz over `indices`, optionally seeded per pixel, regularized by
/// `effective_lambda(A, lambda, min_lambda)`.
fn newton_pass(
    equations: &NormalEquations,
    indices: &[u32],
    seeds: Option<&[(u32, Matrix)]>,
    iterations: usize,
    lambda: f64,
    min_lambda: f64,
) -> Vec<(u32, Matrix)> {
    let (f, c) = (equations.unknowns, equations.channels);
    let solve_one = |pixel: u32, seed: Option<&Matrix>| {
        let a = equations.a(pixel as usize);
        let reg = effective_lambda(a, lambda, min_lambda);
        let inverse = newton_schulz_inverse(a, f, reg, seed, iterations);
        inverse_times_b(&inverse, equations.b(pixel as usize), f, c).map(|theta| (pixel, theta))
    };
    match seeds {
        Some(seeds) => seeds
            .par_iter()
            .filter_map(|(pixel, seed)| solve_one(*pixel, Some(seed)))
            .collect(),
        None => indices
            .par_iter()
            .filter_map(|&pixel| solve_one(pixel, None))
            .collect(),
    }
}

fn store(solution: &mut Solution, results: Vec<(u32, Matrix)>) {
    for (pixel, theta) in results {
        solution.set(pixel as usize, &theta);
    }
}

/// Solves every pixel of `equations` with the configured strategy.
pub fn solve(equations: &NormalEquations, config: &RegressionConfig, frames: usize) -> Solution {
    let (f, c, pixels) = (equations.unknowns, equations.channels, equations.pixels);
    assert!(f <= MAX_FEATURES && c <= MAX_FEATURES, "regression system too large");
    let mut solution = Solution::unsolved(f, c, pixels);
    let all: Vec<u32> = (0..pixels as u32).collect();
    let min_lambda = config.cholesky_min_lambda_per_frame * frames as f64;

    match config.solver {
        SolverType::NewtonSchulz => {
            let results = newton_pass(
                equations,
                &all,
                None,
                NEWTON_SCHULZ_MAX_ITERATIONS,
                config.cholesky_lambda,
                min_lambda,
            );
            solution.stats.newton = results.len();
            store(&mut solution, results);
        }
        SolverType::Cholesky => {
            let (partition, results) =
                cholesky_pass(equations, &all, config.cholesky_lambda, min_lambda);
            solution.stats.cholesky_failed = partition.failure_count();
            store(&mut solution, results);
        }
        SolverType::NewtonCholesky => {
            let seed_lambda = config.newton_cholesky_lambda_per_frame * frames as f64;
            let partition = CompactedIndices::new(pixels);
            let seeds: Vec<(u32, Matrix)> = all
                .par_iter()
                .filter_map(|&pixel| {
                    let a = equations.a(pixel as usize);
                    let reg = effective_lambda(a, config.cholesky_lambda, seed_lambda);
                    match cholesky_inverse(a, f, reg) {
                        Some(inverse) => {
                            partition.push_success(pixel);
                            Some((pixel, inverse))
                        }
                        None => {
                            partition.push_failure(pixel);
                            None
                        }
                    }
                })
                .collect();
            solution.stats.cholesky_failed = partition.failure_count();

            let refined = newton_pass(
                equations,
                &[],
                Some(&seeds),
                config.newton_cholesky_iterations,
                config.cholesky_lambda,
                0.0,
            );
            solution.stats.refined = refined.len();
            store(&mut solution, refined);

            let fallback = newton_pass(
                equations,
                &partition.failures(),
                None,
                NEWTON_SCHULZ_MAX_ITERATIONS,
                config.cholesky_lambda,
                min_lambda,
            );
            solution.stats.newton = fallback.len();
            store(&mut solution, fallback);
        }
        SolverType::Hybrid => {
            let schedule = config.hybrid;
            let (first, results) = cholesky_pass(equations, &all, schedule.initial_lambda, 0.0);
            solution.stats.cholesky_failed = first.failure_count();
            store(&mut solution, results);

            let (second, results) =
                cholesky_pass(equations, &first.failures(), schedule.fallback_lambda, 0.0);
            store(&mut solution, results);

            let fallback = newton_pass(
                equations,
                &second.failures(),
                None,
                NEWTON_SCHULZ_MAX_ITERATIONS,
                config.cholesky_lambda,
                min_lambda,
            );
            solution.stats.newton = fallback.len();
            store(&mut solution, fallback);

            // A failed refinement keeps the fallback-lambda result.
            let (_, refined) =
                cholesky_pass(equations, &second.successes(), schedule.refine_lambda, 0.0);
            solution.stats.refined = refined.len();
            store(&mut solution, refined);
        }
    }
    solution
}
