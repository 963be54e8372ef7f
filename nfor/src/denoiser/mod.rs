//! Top-level denoise entry points.
//!
//! One `denoise` call conditions and stores the new frame, decides whether the
//! temporal window allows denoising, runs the collaborative regression for every
//! bandwidth, combines the candidates and post-processes alpha.

#[cfg(test)]
mod tests;

use crate::bandwidth::{BandwidthSelector, NoisyReference};
use crate::config::{DenoiseConfig, FeatureConfig, FrameCountCondition, RecoverPhase, ViewContext};
use crate::descriptor::{TextureDesc, VarianceType};
use crate::history::{variance_channel, FrameInputs, FrameOrder, FrameSlot, FrameView, History};
use crate::image::Image;
use crate::nlm::NlmEngine;
use crate::preprocess::FeaturePreprocessor;
use crate::tiling::CollaborativeDenoiser;

/// Radiance channel holding alpha.
const ALPHA_CHANNEL: usize = 3;

/// Spatio-temporal NFOR denoiser.
#[derive(Debug, Clone)]
pub struct Denoiser {
    config: DenoiseConfig,
}

impl Denoiser {
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn new(config: DenoiseConfig) -> Self {
        config.validate();
        Self { config }
    }

    pub fn config(&self) -> &DenoiseConfig {
        &self.config
    }

    /// Stores the frame described by `inputs` in `history` and denoises the frame
    /// selected by the temporal policy into `output` (RGBA, same extent).
    ///
    /// Returns `false` without touching `output` while the history does not hold
    /// the frame to denoise yet. With `output_depth`, the depth of the denoised
    /// frame is copied into it.
    ///
    /// # Panics
    ///
    /// Panics on mismatched image extents or channel counts.
    pub fn denoise(
        &self,
        view: &ViewContext,
        inputs: &FrameInputs<'_>,
        history: &History,
        output: &mut Image,
        output_depth: Option<&mut Image>,
    ) -> bool {
        assert_eq!(output.size(), inputs.radiance.size(), "output extent mismatch");
        assert_eq!(output.channels(), 4, "output must be RGBA");

        let window = self.config.temporal.window_size(view);
        let mut slot = FrameSlot::from_inputs(inputs);
        FeaturePreprocessor::new(&self.config).run(&mut slot);

        let mut cache = history.lock();
        cache.set_capacity(window);
        cache.push(slot);

        let available = cache.count();
        let index = self
            .config
            .temporal
            .resolve_denoising_frame_index(window, available);
        let condition = self.config.temporal.condition;
        tracing::info!(
            window,
            available,
            index = ?index,
            ?condition,
            "NFOR denoise"
        );

        let Some(index) = index else {
            tracing::info!("Denoising frame is not stored yet, skipping");
            return false;
        };
        if condition == FrameCountCondition::Exact && available != window {
            tracing::info!(available, window, "Temporal window not full, skipping");
            return false;
        }

        let frames: Vec<FrameView<'_>> = cache.fetch_all(FrameOrder::Reverse).collect();
        let denoised = self.denoise_frames(&frames, index);
        output.data_mut().copy_from_slice(denoised.data());

        if let Some(output_depth) = output_depth {
            if let Some(depth) = cache.depth(index, FrameOrder::Reverse) {
                assert!(output_depth.same_extent(depth), "output depth mismatch");
                output_depth.data_mut().copy_from_slice(depth.data());
            }
        }
        true
    }

    /// Range adjustment and NLM pre-filtering of features, for frames the full
    /// pipeline skips.
    pub fn prefilter_features(
        &self,
        view: &ViewContext,
        albedo: &mut Image,
        normal: &mut Image,
        variance: &mut Image,
    ) {
        tracing::debug!(offline = view.offline, "Feature pre-filtering only");
        FeaturePreprocessor::new(&self.config).prefilter_features(albedo, normal, variance);
    }

    fn denoise_frames(&self, frames: &[FrameView<'_>], index: usize) -> Image {
        let center = frames[index].slot;
        let extent = center.radiance().size();
        let tiles_per_side = self.config.tiling.tiles_per_side(extent);
        let regression = CollaborativeDenoiser::new(&self.config);

        let bandwidths = self.config.bandwidth.bandwidths();
        let candidates: Vec<Image> = bandwidths
            .iter()
            .map(|&bandwidth| {
                let params = self.config.nlm.radiance_params(bandwidth);
                regression.denoise(frames, index, &params)
            })
            .collect();

        let remodulated = self.config.albedo_divide.recover_phase() != RecoverPhase::Disabled;
        let reference = NoisyReference::from_slot(center, remodulated);
        let mut result = BandwidthSelector::new(&self.config, tiles_per_side).select(
            candidates,
            &bandwidths,
            &reference,
        );

        if self.config.denoise_alpha {
            let alpha = self.denoise_alpha(center, tiles_per_side);
            for (px, filtered) in result
                .data_mut()
                .chunks_exact_mut(4)
                .zip(alpha.data().chunks_exact(4))
            {
                px[ALPHA_CHANNEL] = filtered[ALPHA_CHANNEL];
            }
        }
        result
    }

    /// Filtered copy of the radiance, only alpha changed.
    fn denoise_alpha(&self, center: &FrameSlot, tiles_per_side: usize) -> Image {
        let params = self
            .config
            .feature
            .nlm_params()
            .with_bandwidth(FeatureConfig::FILTER_BANDWIDTH);
        NlmEngine::new(&self.config.nlm).filter_channels(
            center.radiance(),
            (ALPHA_CHANNEL, 1),
            Some(TextureDesc::new(center.variance(), variance_channel::ALPHA, 1)),
            VarianceType::GreyScale,
            &params,
            tiles_per_side,
        )
    }
}
