//! Direct weight evaluation: every `(pixel, offset)` pair sums its own patch.

use rayon::prelude::*;

use super::distance::patch_distance;
use super::{NlmParams, WeightBuffer};
use crate::descriptor::FeatureDesc;
use crate::image::Rect;

/// Weight of region pixel `p` for search offset `offset_index`.
#[inline]
pub fn weight(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    p: glam::IVec2,
    offset_index: usize,
    params: &NlmParams,
) -> f32 {
    let d = params.offset(offset_index);
    params.weight(patch_distance(source, target, p, d, params.patch_size))
}

pub fn compute_weights(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    region: Rect,
    params: &NlmParams,
    out: &mut WeightBuffer,
    frame: usize,
) {
    let offsets = params.offset_count();
    let mut scratch = vec![0.0f32; region.area() * offsets];

    scratch
        .par_chunks_mut(offsets)
        .enumerate()
        .for_each(|(pixel, pixel_weights)| {
            let p = region.point_at(pixel);
            for (offset_index, w) in pixel_weights.iter_mut().enumerate() {
                *w = weight(source, target, p, offset_index, params);
            }
        });

    out.write_interleaved(frame, &scratch);
}
