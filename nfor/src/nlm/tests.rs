use glam::IVec2;
use strum::IntoEnumIterator;

use super::*;
use crate::config::{AtlasType, WeightLayout};
use crate::descriptor::{FeatureDesc, TextureDesc, VarianceType};
use crate::image::{Image, Rect};
use crate::testing::{add_noise, random_image, uniform_noise_variance};

fn feature<'a>(image: &'a Image, variance: &'a Image) -> FeatureDesc<'a> {
    FeatureDesc::new(
        TextureDesc::new(image, 0, 3),
        Some(TextureDesc::new(variance, 0, 1)),
        VarianceType::GreyScale,
    )
}

fn constant_variance(width: usize, height: usize, value: f32) -> Image {
    Image::new_filled(width, height, 1, value)
}

fn direct_weights(
    source: &FeatureDesc<'_>,
    target: &FeatureDesc<'_>,
    region: Rect,
    params: &NlmParams,
) -> WeightBuffer {
    let mut out = WeightBuffer::new(
        WeightLayout::Interleaved,
        region.width(),
        region.height(),
        params.offset_count(),
        1,
    );
    NlmEngine::direct(WeightLayout::Interleaved)
        .compute_weights(source, target, region, params, &mut out, 0);
    out
}

fn assert_same_weights(a: &WeightBuffer, b: &WeightBuffer, tolerance: f32) {
    assert_eq!(a.area(), b.area());
    assert_eq!(a.offsets(), b.offsets());
    for frame in 0..a.frames() {
        for pixel in 0..a.area() {
            for offset in 0..a.offsets() {
                let (wa, wb) = (a.get(pixel, frame, offset), b.get(pixel, frame, offset));
                assert!(
                    (wa - wb).abs() <= tolerance,
                    "pixel {} offset {}: {} vs {}",
                    pixel,
                    offset,
                    wa,
                    wb
                );
            }
        }
    }
}

#[test]
fn test_offsets_are_point_symmetric() {
    let params = NlmParams::new(1, 3, 0.5);
    let n = params.offset_count();
    assert_eq!(n, 49);
    assert_eq!(params.symmetric_pair_count(), 25);
    assert_eq!(params.offset(params.center_offset_index()), IVec2::ZERO);
    for i in 0..n {
        assert_eq!(params.offset(n - 1 - i), -params.offset(i));
    }
}

#[test]
fn test_params_are_clamped() {
    let params = NlmParams::new(-2, 99, 1.0);
    assert_eq!(params.patch_size, 0);
    assert_eq!(params.patch_distance, NlmParams::MAX_PATCH_DISTANCE);
}

#[test]
fn test_self_weight_is_one_and_weights_are_bounded() {
    let image = add_noise(&random_image(12, 10, 4, 1), 0.1, 2);
    let variance = constant_variance(12, 10, uniform_noise_variance(0.1));
    let source = feature(&image, &variance);
    let params = NlmParams::new(1, 2, 0.5);
    let region = Rect::from_size(image.size());

    let weights = direct_weights(&source, &source, region, &params);
    let center = params.center_offset_index();
    for pixel in 0..region.area() {
        assert!((weights.get(pixel, 0, center) - 1.0).abs() < 1e-6);
        for w in weights.pixel_weights(pixel, 0) {
            assert!(w >= 0.0);
            assert!(w <= 1.0);
        }
    }
}

#[test]
fn test_atlas_matches_direct_for_every_layout_and_atlas_type() {
    let image = add_noise(&random_image(16, 14, 4, 3), 0.05, 4);
    let variance = constant_variance(16, 14, uniform_noise_variance(0.05));
    let source = feature(&image, &variance);
    let params = NlmParams::new(1, 3, 0.7);
    let region = Rect::new(IVec2::new(3, 2), IVec2::new(13, 11));
    let expected = direct_weights(&source, &source, region, &params);

    for layout in WeightLayout::iter().filter(|l| *l != WeightLayout::None) {
        for atlas_type in AtlasType::iter() {
            let engine = NlmEngine {
                use_atlas: true,
                atlas_type,
                atlas_size: 64,
                layout,
            };
            let mut out = WeightBuffer::new(
                layout,
                region.width(),
                region.height(),
                params.offset_count(),
                1,
            );
            engine.compute_weights(&source, &source, region, &params, &mut out, 0);
            assert_same_weights(&expected, &out, 1e-5);
        }
    }
}

#[test]
fn test_atlas_matches_direct_between_frames() {
    let source_image = add_noise(&random_image(12, 12, 4, 5), 0.05, 6);
    let target_image = add_noise(&source_image, 0.05, 7);
    let source_variance = constant_variance(12, 12, 0.002);
    let target_variance = constant_variance(12, 12, 0.004);
    let source = feature(&source_image, &source_variance);
    let target = feature(&target_image, &target_variance);
    let params = NlmParams::new(2, 2, 1.0);
    let region = Rect::from_size(source_image.size());

    let expected = direct_weights(&source, &target, region, &params);
    let engine = NlmEngine {
        use_atlas: true,
        atlas_type: AtlasType::OneSymmetricPair,
        atlas_size: 0,
        layout: WeightLayout::Planar,
    };
    let mut out = WeightBuffer::new(WeightLayout::Planar, 12, 12, params.offset_count(), 1);
    engine.compute_weights(&source, &target, region, &params, &mut out, 0);
    assert_same_weights(&expected, &out, 1e-5);
}

#[test]
fn test_atlas_plan_splits_into_dispatches() {
    let params = NlmParams::new(1, 2, 0.5);
    let region = Rect::from_size(IVec2::new(8, 8));
    // One 10x10 tile fits: 2 pairs per dispatch, 13 pairs in total.
    let plan = atlas::AtlasPlan::new(
        region,
        &params,
        AtlasType::TwoSymmetricPairs,
        IVec2::new(10, 10),
    );
    assert_eq!(plan.pairs_per_dispatch, 2);
    assert_eq!(plan.dispatches, 7);

    let roomy = atlas::AtlasPlan::new(
        region,
        &params,
        AtlasType::OneSymmetricPair,
        IVec2::new(100, 100),
    );
    assert_eq!(roomy.dispatches, 1);
    // 13 pairs on a 10-wide atlas row.
    assert_eq!((roomy.tiles_x, roomy.tiles_y), (10, 2));
}

#[test]
fn test_atlas_with_many_dispatches_matches_direct() {
    let image = add_noise(&random_image(8, 8, 4, 8), 0.1, 9);
    let variance = constant_variance(8, 8, uniform_noise_variance(0.1));
    let source = feature(&image, &variance);
    let params = NlmParams::new(1, 2, 0.5);
    let region = Rect::from_size(image.size());
    let expected = direct_weights(&source, &source, region, &params);

    let mut out = WeightBuffer::new(
        WeightLayout::PackedFloat4,
        8,
        8,
        params.offset_count(),
        1,
    );
    atlas::compute_weights(
        &source,
        &source,
        region,
        &params,
        AtlasType::TwoSymmetricPairs,
        IVec2::new(10, 10),
        &mut out,
        0,
    );
    assert_same_weights(&expected, &out, 1e-5);
}

#[test]
fn test_normal_variance_compares_vector_length() {
    let normals = Image::from_fn(6, 6, 3, |x, _, c| if c == 0 { x as f32 * 0.1 } else { 0.0 });
    let variance = constant_variance(6, 6, 0.0);
    let desc = FeatureDesc::new(
        TextureDesc::whole(&normals),
        Some(TextureDesc::new(&variance, 0, 1)),
        VarianceType::Normal,
    );
    let params = NlmParams::new(0, 1, 1.0);
    let region = Rect::from_size(normals.size());
    let weights = direct_weights(&desc, &desc, region, &params);
    // Same column is identical along y, a neighbouring column differs.
    let pixel = region.local_index(IVec2::new(3, 3));
    let up = 1;
    let right = 5;
    assert!((weights.get(pixel, 0, up) - 1.0).abs() < 1e-6);
    assert!(weights.get(pixel, 0, right) < 1e-3);
}

#[test]
#[should_panic(expected = "colored variance")]
fn test_colored_variance_is_rejected() {
    let image = random_image(4, 4, 3, 10);
    let variance = constant_variance(4, 4, 0.1);
    let desc = FeatureDesc::new(
        TextureDesc::whole(&image),
        Some(TextureDesc::new(&variance, 0, 1)),
        VarianceType::Colored,
    );
    direct_weights(&desc, &desc, Rect::from_size(image.size()), &NlmParams::new(0, 1, 1.0));
}

#[test]
fn test_layouts_store_identical_values() {
    let values: Vec<f32> = (0..3 * 2 * 9).map(|i| i as f32).collect();
    let mut buffers: Vec<WeightBuffer> = WeightLayout::iter()
        .filter(|l| *l != WeightLayout::None)
        .map(|layout| WeightBuffer::new(layout, 3, 2, 9, 2))
        .collect();
    for buffer in &mut buffers {
        buffer.write_interleaved(1, &values);
    }
    for buffer in &buffers {
        for pixel in 0..6 {
            for offset in 0..9 {
                assert_eq!(buffer.get(pixel, 1, offset), (pixel * 9 + offset) as f32);
                assert_eq!(buffer.get(pixel, 0, offset), 0.0);
            }
        }
    }
    assert_eq!(buffers[2].frame_len(), 4 * 6 * 3);
}

#[test]
fn test_filter_keeps_constant_image() {
    let image = Image::new_filled(10, 10, 4, 0.25);
    let variance = constant_variance(10, 10, 0.01);
    let desc = feature(&image, &variance);
    let params = NlmParams::new(1, 2, 0.5);
    for engine in [
        NlmEngine::direct(WeightLayout::None),
        NlmEngine {
            use_atlas: true,
            atlas_type: AtlasType::TwoSymmetricPairs,
            atlas_size: 0,
            layout: WeightLayout::PackedFloat4,
        },
    ] {
        let out = engine.filter(&desc, &params, 2);
        for v in out.data() {
            assert!((v - 0.25).abs() < 1e-6);
        }
    }
}

#[test]
fn test_filter_reduces_noise() {
    let clean = Image::new_filled(24, 24, 4, 0.5);
    let noisy = add_noise(&clean, 0.2, 11);
    let variance = constant_variance(24, 24, uniform_noise_variance(0.2));
    let desc = feature(&noisy, &variance);
    let out = NlmEngine::direct(WeightLayout::None).filter(&desc, &NlmParams::new(1, 3, 1.0), 1);

    let error = |image: &Image| -> f32 {
        image
            .data()
            .chunks_exact(4)
            .map(|p| (0..3).map(|c| (p[c] - 0.5).powi(2)).sum::<f32>())
            .sum()
    };
    assert!(error(&out) < 0.5 * error(&noisy));
    // Untouched channel.
    for (a, b) in out.data().chunks_exact(4).zip(noisy.data().chunks_exact(4)) {
        assert_eq!(a[3], b[3]);
    }
}

#[test]
fn test_tiled_atlas_filter_matches_direct_filter() {
    let image = add_noise(&random_image(20, 18, 4, 12), 0.05, 13);
    let variance = constant_variance(20, 18, uniform_noise_variance(0.05));
    let desc = feature(&image, &variance);
    let params = NlmParams::new(1, 2, 0.5);

    let direct = NlmEngine::direct(WeightLayout::None).filter(&desc, &params, 1);
    let tiled = NlmEngine {
        use_atlas: true,
        atlas_type: AtlasType::TwoSymmetricPairs,
        atlas_size: 32,
        layout: WeightLayout::Interleaved,
    }
    .filter(&desc, &params, 3);

    for (a, b) in direct.data().iter().zip(tiled.data()) {
        assert!((a - b).abs() < 1e-5);
    }
}
