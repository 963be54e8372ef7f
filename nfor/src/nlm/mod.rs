//! Non-local means weights and filtering.
//!
//! A weight compares the patch around `p` in a source image with the patch around
//! `p + d` in a target image, for every offset `d` of the search window. Two
//! strategies produce identical weights:
//!
//! - [`direct`]: every `(p, d)` pair sums its patch independently.
//! - [`atlas`]: symmetric offset pairs `(+d, -d)` are batched into atlas tiles and
//!   patch sums run as a separable box filter.
//!
//! Out-of-image coordinates are mirror-reflected, so no search window can fail.

pub mod atlas;
pub mod direct;
mod distance;
mod filter;
mod weights;

#[cfg(test)]
mod tests;

use glam::IVec2;

use crate::config::{AtlasType, NlmConfig, WeightLayout};
use crate::descriptor::{FeatureDesc, TextureDesc, VarianceType};
use crate::image::{Image, Rect};

pub use filter::filter_region;
pub use weights::WeightBuffer;

/// Patch half-width, search half-width and falloff of one NLM pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlmParams {
    pub patch_size: i32,
    pub patch_distance: i32,
    pub bandwidth: f32,
}

impl NlmParams {
    pub const MAX_PATCH_SIZE: i32 = 10;
    pub const MAX_PATCH_DISTANCE: i32 = 30;

    /// Clamps sizes into the supported range.
    pub fn new(patch_size: i32, patch_distance: i32, bandwidth: f32) -> Self {
        assert!(bandwidth > 0.0, "NLM bandwidth must be positive");
        Self {
            patch_size: patch_size.clamp(0, Self::MAX_PATCH_SIZE),
            patch_distance: patch_distance.clamp(0, Self::MAX_PATCH_DISTANCE),
            bandwidth,
        }
    }

    #[inline]
    pub fn search_side(&self) -> i32 {
        2 * self.patch_distance + 1
    }

    /// Offsets in the search window, `(2 * patch_distance + 1)^2`.
    #[inline]
    pub fn offset_count(&self) -> usize {
        let side = self.search_side() as usize;
        side * side
    }

    #[inline]
    pub fn patch_area(&self) -> usize {
        let side = (2 * self.patch_size + 1) as usize;
        side * side
    }

    /// Offset `index` in row-major search-window order.
    #[inline]
    pub fn offset(&self, index: usize) -> IVec2 {
        let side = self.search_side();
        let index = index as i32;
        IVec2::new(
            index % side - self.patch_distance,
            index / side - self.patch_distance,
        )
    }

    /// Index of the zero offset. `offset(n - 1 - i) == -offset(i)`.
    #[inline]
    pub fn center_offset_index(&self) -> usize {
        self.offset_count() / 2
    }

    /// Distinct `(+d, -d)` pairs, including the zero offset paired with itself.
    #[inline]
    pub fn symmetric_pair_count(&self) -> usize {
        self.offset_count() / 2 + 1
    }

    #[inline]
    pub fn with_bandwidth(self, bandwidth: f32) -> Self {
        Self::new(self.patch_size, self.patch_distance, bandwidth)
    }

    /// Converts a mean patch distance into a weight.
    #[inline]
    pub fn weight(&self, distance: f32) -> f32 {
        (-distance.max(0.0) / (self.bandwidth * self.bandwidth)).exp()
    }
}

/// Weight evaluation and filtering with a fixed strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlmEngine {
    pub use_atlas: bool,
    pub atlas_type: AtlasType,
    pub atlas_size: i32,
    pub layout: WeightLayout,
}

impl NlmEngine {
    pub fn new(config: &NlmConfig) -> Self {
        Self {
            use_atlas: config.use_atlas,
            atlas_type: config.atlas_type(),
            atlas_size: config.atlas_size,
            layout: config.weight_layout,
        }
    }

    pub fn direct(layout: WeightLayout) -> Self {
        Self {
            use_atlas: false,
            atlas_type: AtlasType::TwoSymmetricPairs,
            atlas_size: 0,
            layout,
        }
    }

    /// Layout used when weights have to be stored.
    pub fn storage_layout(&self) -> WeightLayout {
        match self.layout {
            WeightLayout::None => WeightLayout::Interleaved,
            layout => layout,
        }
    }

    pub fn atlas_extent(&self, region: IVec2) -> IVec2 {
        if self.atlas_size <= 0 {
            region
        } else {
            region.max(IVec2::splat(self.atlas_size))
        }
    }

    /// Weights of every pixel of `region` (image coordinates) against `target`,
    /// stored as `frame` of `out`.
    pub fn compute_weights(
        &self,
        source: &FeatureDesc<'_>,
        target: &FeatureDesc<'_>,
        region: Rect,
        params: &NlmParams,
        out: &mut WeightBuffer,
        frame: usize,
    ) {
        assert_eq!(
            source.channel_count(),
            target.channel_count(),
            "source and target channel count mismatch"
        );
        assert!(
            source.data.image.same_extent(target.data.image),
            "source and target extent mismatch"
        );
        assert_eq!(out.width(), region.width(), "weight buffer width mismatch");
        assert_eq!(out.height(), region.height(), "weight buffer height mismatch");
        assert_eq!(out.offsets(), params.offset_count(), "weight buffer offset count mismatch");

        if self.use_atlas {
            let extent = self.atlas_extent(region.inflate(params.patch_size).size());
            atlas::compute_weights(
                source,
                target,
                region,
                params,
                self.atlas_type,
                extent,
                out,
                frame,
            );
        } else {
            direct::compute_weights(source, target, region, params, out, frame);
        }
    }

    /// NLM-filters `feature` with weights computed on itself.
    ///
    /// Without a weight cache or atlas the whole image is filtered in one pass with
    /// weights evaluated on the fly. Otherwise each of `tiles_per_side^2` tiles computes
    /// its weights with the atlas and filters its own region.
    pub fn filter(
        &self,
        feature: &FeatureDesc<'_>,
        params: &NlmParams,
        tiles_per_side: usize,
    ) -> Image {
        let image = feature.data.image;
        let mut out = image.clone();
        let whole = Rect::from_size(image.size());

        if self.layout == WeightLayout::None || !self.use_atlas {
            filter_region(feature, &feature.data, whole, params, None, &mut out);
            return out;
        }

        for tile in crate::tiling::TileGrid::new(image.size(), tiles_per_side.max(1)).tiles() {
            let mut weights = WeightBuffer::new(
                self.layout,
                tile.width(),
                tile.height(),
                params.offset_count(),
                1,
            );
            self.compute_weights(feature, feature, tile, params, &mut weights, 0);
            filter_region(feature, &feature.data, tile, params, Some(&weights), &mut out);
        }
        out
    }

    /// Filters only `channels` of `image`, guided by those same channels and `variance`.
    pub fn filter_channels(
        &self,
        image: &Image,
        channels: (usize, usize),
        variance: Option<TextureDesc<'_>>,
        variance_type: VarianceType,
        params: &NlmParams,
        tiles_per_side: usize,
    ) -> Image {
        let data = TextureDesc::new(image, channels.0, channels.1);
        let feature = FeatureDesc::new(data, variance, variance_type);
        self.filter(&feature, params, tiles_per_side)
    }
}
