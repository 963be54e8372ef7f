use common::parallel::for_each_row;

use super::{direct, NlmParams, WeightBuffer};
use crate::descriptor::{FeatureDesc, TextureDesc};
use crate::image::{Image, Rect};

/// Weighted average of `texture` over the search window of every pixel in `region`.
///
/// Weights come from frame 0 of `weights` (indexed relative to `region`) or are
/// evaluated on the fly from `guide`. Only the channels of `texture` are written to
/// `out`. Other channels and pixels outside `region` are left as they are.
pub fn filter_region(
    guide: &FeatureDesc<'_>,
    texture: &TextureDesc<'_>,
    region: Rect,
    params: &NlmParams,
    weights: Option<&WeightBuffer>,
    out: &mut Image,
) {
    assert!(texture.image.same_extent(out), "filter output extent mismatch");
    assert_eq!(
        texture.total_channels(),
        out.channels(),
        "filter output channel mismatch"
    );
    if let Some(weights) = weights {
        assert_eq!(weights.area(), region.area(), "weight buffer does not cover region");
        assert_eq!(weights.offsets(), params.offset_count(), "weight buffer offset mismatch");
    }

    let channels = out.channels();
    let row_len = out.row_len();
    let offset = texture.channel_offset;
    let count = texture.channel_count;

    for_each_row(out.data_mut(), row_len, |y, row| {
        let y = y as i32;
        if y < region.min.y || y >= region.max.y {
            return;
        }
        let mut acc = vec![0.0f32; count];
        for x in region.min.x..region.max.x {
            let p = glam::IVec2::new(x, y);
            let pixel = region.local_index(p);
            acc.fill(0.0);
            let mut weight_sum = 0.0f32;
            for offset_index in 0..params.offset_count() {
                let w = match weights {
                    Some(weights) => weights.get(pixel, 0, offset_index),
                    None => direct::weight(guide, guide, p, offset_index, params),
                };
                if w == 0.0 {
                    continue;
                }
                let value = texture.sample(p + params.offset(offset_index));
                for (a, &v) in acc.iter_mut().zip(value) {
                    *a += w * v;
                }
                weight_sum += w;
            }
            if weight_sum > 0.0 {
                let start = x as usize * channels + offset;
                for (dst, a) in row[start..start + count].iter_mut().zip(&acc) {
                    *dst = a / weight_sum;
                }
            }
        }
    });
}
