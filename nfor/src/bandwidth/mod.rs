//! Per-pixel choice between two regression bandwidths.
//!
//! Each candidate gets an MSE estimate against the noisy frame. Both estimates are
//! smoothed with NLM, compared into a binary selection map, the map is smoothed in
//! turn and the candidates are blended by it.


use common::parallel::parallel_chunked;
use rayon::prelude::*;

use crate::config::{BandwidthConfig, DenoiseConfig};
use crate::descriptor::{TextureDesc, VarianceType};
use crate::history::{variance_channel, FrameSlot, COLOR_CHANNELS};
use crate::image::Image;
use crate::nlm::{NlmEngine, NlmParams};

/// Patch half-width of the MSE and selection-map filters.
const MAP_PATCH_SIZE: i32 = 1;
const NEUTRAL_BANDWIDTH: f32 = 1.0;

/// Noisy radiance and its variance in the domain of the denoised candidates.
#[derive(Debug, Clone)]
pub struct NoisyReference {
    /// RGB(A) radiance.
    pub radiance: Image,
    /// Single-channel radiance variance.
    pub variance: Image,
}

impl NoisyReference {
    /// Reads the denoised frame. With `remodulate`, undoes the albedo pre-division:
    /// radiance is multiplied by the albedo and variance by its mean square.
    pub fn from_slot(slot: &FrameSlot, remodulate: bool) -> Self {
        let radiance = if remodulate {
            slot.remodulated_radiance()
        } else {
            slot.radiance().clone()
        };
        let albedo = slot.albedo();
        let (vc, ac) = (slot.variance().channels(), albedo.channels());
        let mut variance = Image::new_default(radiance.width(), radiance.height(), 1);
        variance
            .data_mut()
            .par_iter_mut()
            .zip(slot.variance().data().par_chunks(vc))
            .zip(albedo.data().par_chunks(ac))
            .for_each(|((dst, src), a)| {
                *dst = src[variance_channel::RADIANCE];
                if remodulate {
                    let mean_sq: f32 = a[..COLOR_CHANNELS].iter().map(|v| v * v).sum();
                    *dst *= mean_sq / COLOR_CHANNELS as f32;
                }
            });
        Self { radiance, variance }
    }
}

/// Mean over RGB of `(filtered - noisy)^2 - variance`.
pub fn estimate_mse(reference: &NoisyReference, filtered: &Image) -> Image {
    assert!(
        filtered.same_extent(&reference.radiance),
        "candidate extent mismatch"
    );
    let (fc, nc) = (filtered.channels(), reference.radiance.channels());
    let mut mse = Image::new_default(filtered.width(), filtered.height(), 1);
    mse.data_mut()
        .par_iter_mut()
        .zip(filtered.data().par_chunks(fc))
        .zip(reference.radiance.data().par_chunks(nc))
        .zip(reference.variance.data().par_iter())
        .for_each(|(((out, f), n), &var)| {
            let sum: f32 = (0..COLOR_CHANNELS).map(|c| (f[c] - n[c]) * (f[c] - n[c])).sum();
            *out = sum / COLOR_CHANNELS as f32 - var;
        });
    mse
}

/// 1 where the second candidate has the lower error, else 0.
pub fn selection_map(mse: [&Image; 2]) -> Image {
    assert!(mse[0].same_extent(mse[1]), "MSE extent mismatch");
    let mut map = Image::new_default(mse[0].width(), mse[0].height(), 1);
    let (e0, e1) = (mse[0].data(), mse[1].data());
    parallel_chunked(map.data_mut(), |i| if e1[i] < e0[i] { 1.0 } else { 0.0 });
    map
}

/// `(1 - s) * first + s * second` on RGB with `s` clamped to `[0, 1]`. Alpha comes
/// from `first`.
pub fn blend(candidates: [&Image; 2], map: &Image) -> Image {
    assert!(candidates[0].same_extent(candidates[1]), "candidate extent mismatch");
    assert!(candidates[0].same_extent(map), "selection map extent mismatch");
    let channels = candidates[0].channels();
    let mut out = candidates[0].clone();
    out.data_mut()
        .par_chunks_mut(channels)
        .zip(candidates[1].data().par_chunks(channels))
        .zip(map.data().par_iter())
        .for_each(|((a, b), &s)| {
            let s = s.clamp(0.0, 1.0);
            for c in 0..COLOR_CHANNELS {
                a[c] += s * (b[c] - a[c]);
            }
        });
    out
}

/// Combines per-bandwidth candidates into one image.
#[derive(Debug)]
pub struct BandwidthSelector<'a> {
    config: &'a BandwidthConfig,
    engine: NlmEngine,
    patch_distance: i32,
    tiles_per_side: usize,
}

impl<'a> BandwidthSelector<'a> {
    pub fn new(config: &'a DenoiseConfig, tiles_per_side: usize) -> Self {
        Self {
            config: &config.bandwidth,
            engine: NlmEngine::new(&config.nlm),
            patch_distance: config.nlm.radiance.patch_distance,
            tiles_per_side,
        }
    }

    fn map_params(&self, bandwidth: f32) -> NlmParams {
        NlmParams::new(MAP_PATCH_SIZE, self.patch_distance, bandwidth)
    }

    fn filter_map(&self, map: &Image, variance: &Image, bandwidth: f32) -> Image {
        self.engine.filter_channels(
            map,
            (0, 1),
            Some(TextureDesc::new(variance, 0, 1)),
            VarianceType::GreyScale,
            &self.map_params(bandwidth),
            self.tiles_per_side,
        )
    }

    /// `candidates[i]` was denoised with `bandwidths[i]`. A single candidate is
    /// returned unchanged.
    pub fn select(
        &self,
        candidates: Vec<Image>,
        bandwidths: &[f32],
        reference: &NoisyReference,
    ) -> Image {
        assert_eq!(candidates.len(), bandwidths.len(), "one bandwidth per candidate");
        let mut candidates = candidates;
        if candidates.len() != 2 || !self.config.selection {
            assert!(!candidates.is_empty(), "no denoised candidate");
            return candidates.swap_remove(0);
        }

        let filtered_mse: Vec<Image> = candidates
            .iter()
            .zip(bandwidths)
            .map(|(candidate, &bandwidth)| {
                let mse = estimate_mse(reference, candidate);
                let bandwidth = if self.config.mse_preserve_detail {
                    bandwidth
                } else {
                    NEUTRAL_BANDWIDTH
                };
                self.filter_map(&mse, &reference.variance, bandwidth)
            })
            .collect();

        let map = selection_map([&filtered_mse[0], &filtered_mse[1]]);
        let map_bandwidth = if self.config.map_preserve_detail {
            bandwidths[0]
        } else {
            NEUTRAL_BANDWIDTH
        };
        let map = self.filter_map(&map, &reference.variance, map_bandwidth);

        let second = map.data().iter().sum::<f32>() / map.data().len().max(1) as f32;
        tracing::debug!(
            ?bandwidths,
            second_share = second,
            "Bandwidth selection"
        );
        blend([&candidates[0], &candidates[1]], &map)
    }
}
