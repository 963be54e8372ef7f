//! Feature conditioning of the newest frame before it enters the cache.
//!
//! Order: clamp albedo and normal ranges, classify surfaces, offset albedo and
//! demodulate radiance by it, then NLM pre-filter the noisy features.


use rayon::prelude::*;

use crate::config::DenoiseConfig;
use crate::descriptor::{FeatureDesc, TextureDesc, VarianceType};
use crate::history::{variance_channel, FrameSlot, COLOR_CHANNELS};
use crate::image::Image;
use crate::nlm::NlmEngine;

/// Normals shorter than this carry no surface.
const MIN_NORMAL_LENGTH: f32 = 1e-3;

/// Scales every pixel whose magnitude exceeds `max_value` back to `max_value`, and
/// its variance by the square of the same factor. No-op when `max_value <= 0`.
///
/// Grey-scale features use the mean of the first three channels as magnitude,
/// vector features their length.
pub fn adjust_feature_range(
    feature: &mut Image,
    variance: &mut Image,
    variance_channel: usize,
    variance_type: VarianceType,
    max_value: f32,
) {
    if max_value <= 0.0 {
        return;
    }
    assert!(
        matches!(feature.channels(), 3 | 4),
        "range adjustment needs a 3 or 4 channel feature, got {}",
        feature.channels()
    );
    assert!(feature.same_extent(variance), "variance extent mismatch");
    assert!(variance_channel < variance.channels(), "variance channel out of range");

    let fc = feature.channels();
    let vc = variance.channels();
    feature
        .data_mut()
        .par_chunks_mut(fc)
        .zip(variance.data_mut().par_chunks_mut(vc))
        .for_each(|(value, var)| {
            let rgb = &mut value[..COLOR_CHANNELS];
            let magnitude = match variance_type {
                VarianceType::GreyScale => (rgb.iter().sum::<f32>() / 3.0).abs(),
                VarianceType::Normal => rgb.iter().map(|v| v * v).sum::<f32>().sqrt(),
                VarianceType::Colored => panic!("colored variance is not supported"),
            };
            if magnitude > max_value {
                let scale = max_value / magnitude;
                rgb.iter_mut().for_each(|v| *v *= scale);
                var[variance_channel] *= scale * scale;
            }
        });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SurfaceClass {
    Regular = 0,
    /// No reliable surface: sky or a mirror reflecting it.
    Sky = 1,
}

/// Per-pixel surface classes selecting the albedo offset.
#[derive(Debug, Clone, PartialEq)]
pub struct DivideMask {
    width: usize,
    height: usize,
    classes: Vec<SurfaceClass>,
}

impl DivideMask {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> SurfaceClass {
        self.classes[y * self.width + x]
    }

    pub fn classes(&self) -> &[SurfaceClass] {
        &self.classes
    }

    pub fn count(&self, class: SurfaceClass) -> usize {
        self.classes.iter().filter(|&&c| c == class).count()
    }
}

/// A pixel is [`SurfaceClass::Sky`] when its normal is near zero or shorter than its
/// own noise.
pub fn classify_divide_mask(normal: &Image, variance: &Image, variance_channel: usize) -> DivideMask {
    assert!(normal.same_extent(variance), "variance extent mismatch");
    assert!(normal.channels() >= COLOR_CHANNELS, "normal needs 3 channels");

    let classes = normal
        .data()
        .par_chunks(normal.channels())
        .zip(variance.data().par_chunks(variance.channels()))
        .map(|(n, var)| {
            let length_sq: f32 = n[..COLOR_CHANNELS].iter().map(|v| v * v).sum();
            if length_sq < MIN_NORMAL_LENGTH * MIN_NORMAL_LENGTH || length_sq < var[variance_channel] {
                SurfaceClass::Sky
            } else {
                SurfaceClass::Regular
            }
        })
        .collect();

    DivideMask {
        width: normal.width(),
        height: normal.height(),
        classes,
    }
}

/// Offsets albedo by `offsets[class]` and divides radiance by it. The radiance variance
/// is divided by the mean squared offset albedo. Alpha is left alone.
pub fn predivide_albedo(
    albedo: &mut Image,
    radiance: &mut Image,
    variance: &mut Image,
    mask: &DivideMask,
    offsets: [f32; 2],
) {
    assert!(albedo.same_extent(radiance), "albedo and radiance extent mismatch");
    assert!(albedo.same_extent(variance), "variance extent mismatch");
    assert_eq!(mask.classes.len(), albedo.width() * albedo.height(), "mask extent mismatch");

    let (ac, rc, vc) = (albedo.channels(), radiance.channels(), variance.channels());
    albedo
        .data_mut()
        .par_chunks_mut(ac)
        .zip(radiance.data_mut().par_chunks_mut(rc))
        .zip(variance.data_mut().par_chunks_mut(vc))
        .zip(mask.classes.par_iter())
        .for_each(|(((a, r), var), &class)| {
            let offset = offsets[class as usize];
            let mut mean_sq = 0.0f32;
            for c in 0..COLOR_CHANNELS {
                a[c] = a[c].max(0.0) + offset;
                r[c] /= a[c];
                mean_sq += a[c] * a[c];
            }
            var[variance_channel::RADIANCE] /= mean_sq / COLOR_CHANNELS as f32;
        });
}

/// Runs the conditioning steps enabled in a [`DenoiseConfig`].
#[derive(Debug)]
pub struct FeaturePreprocessor<'a> {
    config: &'a DenoiseConfig,
    engine: NlmEngine,
}

impl<'a> FeaturePreprocessor<'a> {
    pub fn new(config: &'a DenoiseConfig) -> Self {
        Self {
            config,
            engine: NlmEngine::new(&config.nlm),
        }
    }

    /// Conditions a frame that has not been inserted into the cache yet.
    pub fn run(&self, slot: &mut FrameSlot) {
        self.adjust_ranges(&mut slot.albedo, &mut slot.normal, &mut slot.variance);

        if self.config.albedo_divide.enabled {
            let mask = classify_divide_mask(&slot.normal, &slot.variance, variance_channel::NORMAL);
            tracing::debug!(
                sky_pixels = mask.count(SurfaceClass::Sky),
                "Albedo pre-division"
            );
            predivide_albedo(
                &mut slot.albedo,
                &mut slot.radiance,
                &mut slot.variance,
                &mask,
                self.config.albedo_divide.offsets(),
            );
        }

        self.prefilter(&mut slot.albedo, &mut slot.normal, &slot.variance);
    }

    /// Range adjustment and pre-filtering only, without touching radiance.
    pub fn prefilter_features(&self, albedo: &mut Image, normal: &mut Image, variance: &mut Image) {
        self.adjust_ranges(albedo, normal, variance);
        self.prefilter(albedo, normal, variance);
    }

    fn adjust_ranges(&self, albedo: &mut Image, normal: &mut Image, variance: &mut Image) {
        adjust_feature_range(
            albedo,
            variance,
            variance_channel::ALBEDO,
            VarianceType::GreyScale,
            self.config.feature.max_albedo_greyscale,
        );
        adjust_feature_range(
            normal,
            variance,
            variance_channel::NORMAL,
            VarianceType::Normal,
            self.config.feature.max_normal_length,
        );
    }

    /// Depth is clean and never filtered.
    fn prefilter(&self, albedo: &mut Image, normal: &mut Image, variance: &Image) {
        if !self.config.feature.filtering {
            return;
        }
        let params = self.config.feature.nlm_params();
        let tiles = (self.config.tiling.tiles_per_side(albedo.size())
            / self.config.feature.tile_count_downscale)
            .max(1);

        for (image, channel, variance_type) in [
            (albedo, variance_channel::ALBEDO, VarianceType::GreyScale),
            (normal, variance_channel::NORMAL, VarianceType::Normal),
        ] {
            let desc = FeatureDesc::new(
                TextureDesc::new(image, 0, COLOR_CHANNELS),
                Some(TextureDesc::new(variance, channel, 1)),
                variance_type,
            );
            let filtered = self.engine.filter(&desc, &params, tiles);
            *image = filtered;
        }
    }
}
