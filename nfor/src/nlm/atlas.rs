//! Atlas-accelerated weight evaluation.
//!
//! Each symmetric pair `(+d, -d)` owns one atlas tile covering the region grown by
//! the patch radius. A texel stores the per-pixel distances of one or two pairs.
//! Patch sums are a horizontal then vertical box filter over the tile, and the
//! vertical pass writes the finished weights plane by plane into the weight buffer.
//! When the atlas cannot hold every pair at once, pairs are processed in several
//! dispatches.

use glam::IVec2;
use rayon::prelude::*;

use common::parallel::for_each_row;

use super::distance::pixel_distance;
use super::{NlmParams, WeightBuffer};
use crate::config::AtlasType;
use crate::descriptor::FeatureDesc;
use crate::image::Rect;

/// How pairs map onto atlas tiles for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtlasPlan {
    pub tile_width: usize,
    pub tile_height: usize,
    pub tiles_x: usize,
    pub tiles_y: usize,
    pub pairs_per_texel: usize,
    pub pairs_per_dispatch: usize,
    pub dispatches: usize,
}

impl AtlasPlan {
    pub fn new(
        region: Rect,
        params: &NlmParams,
        atlas_type: AtlasType,
        atlas_extent: IVec2,
    ) -> Self {
        let separable = region.inflate(params.patch_size);
        let tile_width = separable.width();
        let tile_height = separable.height();
        assert!(
            atlas_extent.x as usize >= tile_width && atlas_extent.y as usize >= tile_height,
            "atlas {:?} smaller than filtering region {:?}",
            atlas_extent,
            separable.size()
        );

        let pairs_per_texel = atlas_type.pairs_per_texel();
        let max_tiles_x = atlas_extent.x as usize / tile_width;
        let max_tiles_y = atlas_extent.y as usize / tile_height;
        let pairs_per_dispatch = max_tiles_x * max_tiles_y * pairs_per_texel;
        let pair_count = params.symmetric_pair_count();
        let dispatches = pair_count.div_ceil(pairs_per_dispatch);

        // Allocate only what the fullest dispatch touches.
        let used_tiles = pair_count.min(pairs_per_dispatch).div_ceil(pairs_per_texel);
        let tiles_x = max_tiles_x.min(used_tiles);
        let tiles_y = used_tiles.div_ceil(tiles_x);

        Self {
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
            pairs_per_texel,
            pairs_per_dispatch,
            dispatches,
        }
    }

    #[inline]
    fn channels(&self) -> usize {
        2 * self.pairs_per_texel
    }

    #[inline]
    fn row_len(&self) -> usize {
        self.tiles_x * self.tile_width * self.channels()
    }

    #[inline]
    fn texel_count(&self) -> usize {
        self.row_len() * self.tiles_y * self.tile_height
    }
}

#[allow(clippy::too_many_arguments)]
pub fn compute_weights(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    region: Rect,
    params: &NlmParams,
    atlas_type: AtlasType,
    atlas_extent: IVec2,
    out: &mut WeightBuffer,
    frame: usize,
) {
    if region.is_empty() {
        return;
    }

    let plan = AtlasPlan::new(region, params, atlas_type, atlas_extent);
    let separable = region.inflate(params.patch_size);
    let ps = params.patch_size as usize;
    let channels = plan.channels();
    let row_len = plan.row_len();
    let pair_count = params.symmetric_pair_count();
    let offsets = params.offset_count();
    let patch_area = params.patch_area() as f32;

    tracing::debug!(
        pair_count,
        pairs_per_dispatch = plan.pairs_per_dispatch,
        dispatches = plan.dispatches,
        %atlas_type,
        "NLM atlas batching"
    );

    let mut distances = vec![0.0f32; plan.texel_count()];
    let mut horizontal = vec![0.0f32; plan.texel_count()];

    for dispatch in 0..plan.dispatches {
        let first_pair = dispatch * plan.pairs_per_dispatch;
        let end_pair = (first_pair + plan.pairs_per_dispatch).min(pair_count);
        let pair_at = |slot: usize, j: usize| {
            let k = first_pair + slot * plan.pairs_per_texel + j;
            (k < end_pair).then_some(k)
        };

        for_each_row(&mut distances, row_len, |ay, row| {
            let ty = ay / plan.tile_height;
            let ly = (ay % plan.tile_height) as i32;
            for tx in 0..plan.tiles_x {
                let slot = ty * plan.tiles_x + tx;
                for j in 0..plan.pairs_per_texel {
                    let Some(k) = pair_at(slot, j) else {
                        continue;
                    };
                    let d = params.offset(k);
                    for lx in 0..plan.tile_width {
                        let a = separable.min + IVec2::new(lx as i32, ly);
                        let texel = (tx * plan.tile_width + lx) * channels + 2 * j;
                        row[texel] = pixel_distance(source, target, a, a + d);
                        row[texel + 1] = pixel_distance(source, target, a, a - d);
                    }
                }
            }
        });

        let distances_ref = &distances;
        for_each_row(&mut horizontal, row_len, |ay, row| {
            let src = &distances_ref[ay * row_len..(ay + 1) * row_len];
            for tx in 0..plan.tiles_x {
                let tile_start = tx * plan.tile_width;
                for lx in ps..plan.tile_width - ps {
                    for c in 0..channels {
                        let mut sum = 0.0f32;
                        for x in tile_start + lx - ps..=tile_start + lx + ps {
                            sum += src[x * channels + c];
                        }
                        row[(tile_start + lx) * channels + c] = sum;
                    }
                }
            }
        });

        let horizontal_ref = &horizontal;
        let planes: Vec<(usize, Vec<f32>, Vec<f32>)> = (first_pair..end_pair)
            .into_par_iter()
            .map(|k| {
                let local = k - first_pair;
                let slot = local / plan.pairs_per_texel;
                let j = local % plan.pairs_per_texel;
                let origin_x = (slot % plan.tiles_x) * plan.tile_width;
                let origin_y = (slot / plan.tiles_x) * plan.tile_height;

                let mut plus = vec![0.0f32; region.area()];
                let mut minus = vec![0.0f32; region.area()];
                for ry in 0..region.height() {
                    for rx in 0..region.width() {
                        let texel_x = origin_x + rx + ps;
                        let (mut sum_plus, mut sum_minus) = (0.0f32, 0.0f32);
                        for ay in origin_y + ry..=origin_y + ry + 2 * ps {
                            let texel = ay * row_len + texel_x * channels + 2 * j;
                            sum_plus += horizontal_ref[texel];
                            sum_minus += horizontal_ref[texel + 1];
                        }
                        let pixel = ry * region.width() + rx;
                        plus[pixel] = params.weight(sum_plus / patch_area);
                        minus[pixel] = params.weight(sum_minus / patch_area);
                    }
                }
                (k, plus, minus)
            })
            .collect();

        for (k, plus, minus) in planes {
            out.write_plane(frame, k, &plus);
            out.write_plane(frame, offsets - 1 - k, &minus);
        }
    }
}
