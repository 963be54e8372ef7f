use glam::IVec2;

use crate::descriptor::{FeatureDesc, VarianceType};

/// Keeps the normalization finite for noise-free inputs.
const EPSILON: f32 = 1e-10;

/// Variance-normalized squared difference between source pixel `a` and target pixel
/// `b`, with the expected noise contribution subtracted. Negative for pure noise.
#[inline]
pub(crate) fn pixel_distance(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    a: IVec2,
    b: IVec2,
) -> f32 {
    let va = source.sample_variance(a);
    let vb = target.sample_variance(b);
    let bias = va + va.min(vb);
    let norm = EPSILON + va + vb;

    let sa = source.data.sample(a);
    let sb = target.data.sample(b);

    match source.variance_type {
        VarianceType::GreyScale => {
            let sum: f32 = sa
                .iter()
                .zip(sb)
                .map(|(&x, &y)| ((x - y) * (x - y) - bias) / norm)
                .sum();
            sum / sa.len() as f32
        }
        VarianceType::Normal => {
            let sq: f32 = sa.iter().zip(sb).map(|(&x, &y)| (x - y) * (x - y)).sum();
            (sq - bias) / norm
        }
        VarianceType::Colored => panic!("colored variance is not supported by NLM"),
    }
}

/// Mean of [`pixel_distance`] over the patch of half-width `patch_size`.
#[inline]
pub(crate) fn patch_distance(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    p: IVec2,
    d: IVec2,
    patch_size: i32,
) -> f32 {
    let mut sum = 0.0f32;
    for oy in -patch_size..=patch_size {
        for ox in -patch_size..=patch_size {
            let o = IVec2::new(ox, oy);
            sum += pixel_distance(source, target, p + o, p + d + o);
        }
    }
    let side = (2 * patch_size + 1) as f32;
    sum / (side * side)
}
