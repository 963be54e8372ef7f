//! Per-pixel weighted least squares.
//!
//! For every pixel `p` of a tile the observations are the pixels `n = p + d` of its
//! search window in every frame, with covariates `x_t(n)` (features plus an optional
//! constant), responses `y_t(n)` (radiance) and weights `w_t(p, d)` (NLM). The pixel's
//! coefficients solve `A * theta = B` with `A = X^T W X` and `B = X^T W Y`, and the
//! prediction `x_t(n)^T * theta_p` is accumulated back onto `n` with weight `w_t(p, d)`.

mod normal_equations;
mod reconstruct;
pub mod reference;
pub mod solver;


use glam::IVec2;

use crate::config::{
    LinearSolverDevice, ReconstructionType, RecoverPhase, RegressionConfig, RegressionDevice,
};
use crate::descriptor::WeightedLsrDesc;
use crate::image::Rect;
use crate::nlm::{NlmParams, WeightBuffer};

pub use normal_equations::{build_normal_equations, NormalEquations};
pub use reconstruct::Accumulation;
pub use solver::{CompactedIndices, SolveStats, Solution};

/// Largest regression system.
pub const MAX_FEATURES: usize = WeightedLsrDesc::MAX_FEATURES;

/// Padded covariates, responses and weights of one tile.
#[derive(Debug, Clone)]
pub struct TileBuffers {
    pub desc: WeightedLsrDesc,
    /// Pixels with unknowns, image coordinates.
    pub tile: Rect,
    /// `tile` grown by the search radius, image coordinates.
    pub padded: Rect,
    pub search: NlmParams,
    pub add_constant: bool,
    /// `[frame][padded pixel][feature]`, constant excluded.
    pub features: Vec<f32>,
    /// `[frame][padded pixel][channel]`.
    pub radiance: Vec<f32>,
    /// Weights of every tile pixel, one block per frame.
    pub weights: WeightBuffer,
}

impl TileBuffers {
    /// Stored feature values per pixel and frame.
    #[inline]
    pub fn stored_features(&self) -> usize {
        self.desc.feature_channels_per_frame - usize::from(self.add_constant)
    }

    #[inline]
    pub fn unknowns(&self) -> usize {
        self.desc.feature_channels_per_frame
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.desc.radiance_channels_per_frame
    }

    pub fn validate(&self) {
        self.desc.validate();
        let padded_area = self.padded.area();
        let frames = self.desc.frame_count;
        assert_eq!(self.padded, self.tile.inflate(self.desc.padding), "padding mismatch");
        assert_eq!(
            self.features.len(),
            frames * padded_area * self.stored_features(),
            "feature buffer size mismatch"
        );
        assert_eq!(
            self.radiance.len(),
            frames * padded_area * self.channels(),
            "radiance buffer size mismatch"
        );
        assert_eq!(self.weights.area(), self.tile.area(), "weight buffer is not tile sized");
        assert_eq!(self.weights.frames(), frames, "weight buffer frame count mismatch");
        assert_eq!(
            self.weights.offsets(),
            self.desc.weights_per_pixel_per_frame,
            "weight buffer offset count mismatch"
        );
        assert_eq!(self.search.offset_count(), self.desc.weights_per_pixel_per_frame);
    }

    /// Covariates of padded pixel `n` (image coordinates) in `frame`, written to `x`.
    #[inline]
    pub fn covariates(&self, frame: usize, n: IVec2, x: &mut [f64; MAX_FEATURES]) {
        let stored = self.stored_features();
        let start = (frame * self.padded.area() + self.padded.local_index(n)) * stored;
        for (dst, &v) in x.iter_mut().zip(&self.features[start..start + stored]) {
            *dst = v as f64;
        }
        if self.add_constant {
            x[stored] = 1.0;
        }
    }

    #[inline]
    pub fn response(&self, frame: usize, n: IVec2) -> &[f32] {
        let c = self.channels();
        let start = (frame * self.padded.area() + self.padded.local_index(n)) * c;
        &self.radiance[start..start + c]
    }

    /// The first three stored features are albedo.
    #[inline]
    pub fn albedo(&self, frame: usize, n: IVec2) -> [f32; 3] {
        let stored = self.stored_features();
        let start = (frame * self.padded.area() + self.padded.local_index(n)) * stored;
        [
            self.features[start],
            self.features[start + 1],
            self.features[start + 2],
        ]
    }
}

/// Numeric options of one regression, resolved from [`RegressionConfig`].
#[derive(Debug, Clone)]
pub struct WeightedLsr {
    pub config: RegressionConfig,
    pub recover_phase: RecoverPhase,
}

impl WeightedLsr {
    pub fn new(config: &RegressionConfig, recover_phase: RecoverPhase) -> Self {
        Self {
            config: config.clone(),
            recover_phase,
        }
    }

    /// Solves every tile pixel and reconstructs all frames (or the debug frame) into a
    /// padded accumulation of `rgb * weight` and `weight`.
    pub fn solve_tile(&self, buffers: &TileBuffers, denoised_frame: usize) -> Accumulation {
        buffers.validate();
        let frames = buffers.desc.frame_count;
        let observations = buffers.desc.weights_per_pixel;
        let step = self.config.sampling_step(buffers.unknowns(), observations);

        let solution = match self.config.device {
            RegressionDevice::Reference => reference::regress(buffers, step),
            RegressionDevice::Batched => {
                let equations = build_normal_equations(buffers, step);
                match self.config.linear_solver_device {
                    LinearSolverDevice::Batched => solver::solve(&equations, &self.config, frames),
                    LinearSolverDevice::Reference => reference::solve(&equations),
                }
            }
        };

        tracing::debug!(
            tile = ?buffers.tile,
            step,
            failed = solution.stats.unsolved,
            cholesky_failed = solution.stats.cholesky_failed,
            newton = solution.stats.newton,
            refined = solution.stats.refined,
            "Tile regression solved"
        );

        let multiply_each = self.recover_phase == RecoverPhase::Each;
        let mut accumulation = Accumulation::with_channels(buffers.padded, buffers.channels());
        let frames_to_reconstruct = match self.config.debug_frame_index {
            Some(index) => index.min(frames - 1)..index.min(frames - 1) + 1,
            None => 0..frames,
        };
        for frame in frames_to_reconstruct {
            match self.config.reconstruction_type(frame, denoised_frame) {
                ReconstructionType::Scatter => reconstruct::scatter(
                    buffers,
                    &solution,
                    frame,
                    multiply_each,
                    &mut accumulation,
                ),
                ReconstructionType::Gather => reconstruct::gather(
                    buffers,
                    &solution,
                    frame,
                    multiply_each,
                    &mut accumulation,
                ),
            }
        }

        if self.recover_phase == RecoverPhase::Final {
            accumulation.multiply_albedo(buffers, denoised_frame);
        }
        accumulation
    }
}
