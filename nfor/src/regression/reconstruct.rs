//! Scatter and gather reconstruction.
//!
//! Both walk the same `(solved pixel p, offset d, observed pixel n = p + d)` triples
//! of one frame and add `w * x(n)^T theta_p` and `w` onto `n`. Scatter iterates
//! solved pixels and needs atomics. Gather iterates output pixels and owns its
//! output exclusively.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::IVec2;
use rayon::prelude::*;

use super::solver::Solution;
use super::{TileBuffers, MAX_FEATURES};
use crate::image::Rect;

/// Padded `[channels..., weight]` sums of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulation {
    pub region: Rect,
    pub stride: usize,
    pub data: Vec<f32>,
}

impl Accumulation {
    pub fn new(region: Rect) -> Self {
        Self::with_channels(region, 3)
    }

    pub fn with_channels(region: Rect, channels: usize) -> Self {
        let stride = channels + 1;
        Self {
            region,
            stride,
            data: vec![0.0; region.area() * stride],
        }
    }

    /// Sums at image coordinate `n`.
    #[inline]
    pub fn at(&self, n: IVec2) -> &[f32] {
        let start = self.region.local_index(n) * self.stride;
        &self.data[start..start + self.stride]
    }

    /// Multiplies the color sums by the albedo of `frame`.
    pub fn multiply_albedo(&mut self, buffers: &TileBuffers, frame: usize) {
        let channels = (self.stride - 1).min(3);
        let region = self.region;
        self.data
            .par_chunks_mut(self.stride)
            .enumerate()
            .for_each(|(i, sums)| {
                let albedo = buffers.albedo(frame, region.point_at(i));
                for k in 0..channels {
                    sums[k] *= albedo[k];
                }
            });
    }
}

#[inline]
fn atomic_add(cell: &AtomicU32, value: f32) {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = (f32::from_bits(current) + value).to_bits();
        match cell.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn prediction(
    buffers: &TileBuffers,
    solution: &Solution,
    pixel: usize,
    frame: usize,
    n: IVec2,
    x: &[f64; MAX_FEATURES],
    multiply_albedo: bool,
    k: usize,
) -> f32 {
    let y = solution.predict(pixel, x, k) as f32;
    if multiply_albedo && k < 3 {
        y * buffers.albedo(frame, n)[k]
    } else {
        y
    }
}

pub fn scatter(
    buffers: &TileBuffers,
    solution: &Solution,
    frame: usize,
    multiply_albedo: bool,
    accumulation: &mut Accumulation,
) {
    let channels = buffers.channels();
    let stride = accumulation.stride;
    assert_eq!(stride, channels + 1, "accumulation channel mismatch");
    let region = accumulation.region;
    let cells: Vec<AtomicU32> = (0..accumulation.data.len())
        .map(|_| AtomicU32::new(0))
        .collect();
    let offsets = buffers.search.offset_count();

    (0..buffers.tile.area()).into_par_iter().for_each(|pixel| {
        if !solution.solved[pixel] {
            return;
        }
        let p = buffers.tile.point_at(pixel);
        let mut x = [0.0f64; MAX_FEATURES];
        for offset in 0..offsets {
            let w = buffers.weights.get(pixel, frame, offset);
            if w == 0.0 {
                continue;
            }
            let n = p + buffers.search.offset(offset);
            buffers.covariates(frame, n, &mut x);
            let start = region.local_index(n) * stride;
            for k in 0..channels {
                let y = prediction(buffers, solution, pixel, frame, n, &x, multiply_albedo, k);
                atomic_add(&cells[start + k], w * y);
            }
            atomic_add(&cells[start + channels], w);
        }
    });

    for (sum, cell) in accumulation.data.iter_mut().zip(cells) {
        *sum += f32::from_bits(cell.into_inner());
    }
}

pub fn gather(
    buffers: &TileBuffers,
    solution: &Solution,
    frame: usize,
    multiply_albedo: bool,
    accumulation: &mut Accumulation,
) {
    let channels = buffers.channels();
    let stride = accumulation.stride;
    assert_eq!(stride, channels + 1, "accumulation channel mismatch");
    let region = accumulation.region;
    let tile = buffers.tile;
    let offsets = buffers.search.offset_count();

    accumulation
        .data
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(i, sums)| {
            let n = region.point_at(i);
            let mut x = [0.0f64; MAX_FEATURES];
            buffers.covariates(frame, n, &mut x);
            for offset in 0..offsets {
                let p = n - buffers.search.offset(offset);
                if !tile.contains(p) {
                    continue;
                }
                let pixel = tile.local_index(p);
                if !solution.solved[pixel] {
                    continue;
                }
                let w = buffers.weights.get(pixel, frame, offset);
                if w == 0.0 {
                    continue;
                }
                for k in 0..channels {
                    let y = prediction(buffers, solution, pixel, frame, n, &x, multiply_albedo, k);
                    sums[k] += w * y;
                }
                sums[channels] += w;
            }
        });
}
