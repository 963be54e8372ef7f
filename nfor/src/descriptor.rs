//! Channel-range views over images and the shape of one regression dispatch.

use glam::IVec2;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::image::Image;

/// How a variance channel describes its feature's noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum VarianceType {
    /// One isotropic variance shared by all channels.
    #[default]
    GreyScale,
    /// Variance of a vector-valued feature, compared by vector length.
    Normal,
    /// Per-channel variance. Not supported by the NLM kernels.
    Colored,
}

/// A contiguous channel range of an image.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub image: &'a Image,
    pub channel_offset: usize,
    pub channel_count: usize,
}

impl<'a> TextureDesc<'a> {
    pub fn new(image: &'a Image, channel_offset: usize, channel_count: usize) -> Self {
        assert!(channel_count > 0, "texture view must cover at least one channel");
        assert!(
            channel_offset + channel_count <= image.channels(),
            "channel range {}..{} exceeds {} image channels",
            channel_offset,
            channel_offset + channel_count,
            image.channels()
        );
        Self {
            image,
            channel_offset,
            channel_count,
        }
    }

    /// View of every channel of `image`.
    pub fn whole(image: &'a Image) -> Self {
        Self::new(image, 0, image.channels())
    }

    #[inline]
    pub fn total_channels(&self) -> usize {
        self.image.channels()
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.image.height()
    }

    #[inline]
    pub fn size(&self) -> IVec2 {
        self.image.size()
    }

    /// The viewed channels at `p`, mirror-reflected when `p` is outside the image.
    #[inline]
    pub fn sample(&self, p: IVec2) -> &'a [f32] {
        let pixel = self.image.pixel_mirrored(p);
        &pixel[self.channel_offset..self.channel_offset + self.channel_count]
    }
}

/// A feature image together with the variance channel describing its noise.
#[derive(Debug, Clone, Copy)]
pub struct FeatureDesc<'a> {
    pub data: TextureDesc<'a>,
    /// Single channel of a (possibly shared) variance image.
    pub variance: Option<TextureDesc<'a>>,
    pub variance_type: VarianceType,
    /// Exempt from NLM pre-filtering.
    pub clean: bool,
}

/// Radiance uses the feature layout with the color channels as data.
pub type RadianceDesc<'a> = FeatureDesc<'a>;

impl<'a> FeatureDesc<'a> {
    pub fn new(
        data: TextureDesc<'a>,
        variance: Option<TextureDesc<'a>>,
        variance_type: VarianceType,
    ) -> Self {
        if let Some(variance) = &variance {
            assert_eq!(
                variance.channel_count, 1,
                "variance view must be a single channel"
            );
            assert!(
                variance.image.same_extent(data.image),
                "variance extent must match feature extent"
            );
        }
        Self {
            data,
            variance,
            variance_type,
            clean: false,
        }
    }

    /// A feature without noise, never pre-filtered.
    pub fn clean(data: TextureDesc<'a>) -> Self {
        Self {
            data,
            variance: None,
            variance_type: VarianceType::GreyScale,
            clean: true,
        }
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.data.channel_count
    }

    #[inline]
    pub fn sample_variance(&self, p: IVec2) -> f32 {
        self.variance.map_or(0.0, |v| v.sample(p)[0])
    }
}

/// Whether one regression dispatch covers the whole image or a padded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LsrVariant {
    WholeImage,
    Tiled,
}

/// Dimensions of a per-tile weighted least-squares problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedLsrDesc {
    /// Features per frame including the constant term when enabled.
    pub feature_channels_per_frame: usize,
    pub feature_channels: usize,
    pub weights_per_pixel_per_frame: usize,
    pub weights_per_pixel: usize,
    pub radiance_channels_per_frame: usize,
    pub radiance_channels: usize,
    pub width: usize,
    pub height: usize,
    /// Padding around the tile, equal to the NLM search radius.
    pub padding: i32,
    /// Top-left tile pixel in image coordinates.
    pub tile_origin: IVec2,
    pub frame_count: usize,
    pub variant: LsrVariant,
}

impl WeightedLsrDesc {
    pub const MIN_FEATURES: usize = 6;
    pub const MAX_FEATURES: usize = 8;

    /// Search radius implied by the per-frame weight count.
    pub fn patch_distance(&self) -> i32 {
        let side = (self.weights_per_pixel_per_frame as f64).sqrt().round() as i32;
        (side - 1) / 2
    }

    pub fn padded_width(&self) -> usize {
        self.width + 2 * self.padding as usize
    }

    pub fn padded_height(&self) -> usize {
        self.height + 2 * self.padding as usize
    }

    pub fn validate(&self) {
        assert!(
            (Self::MIN_FEATURES..=Self::MAX_FEATURES).contains(&self.feature_channels_per_frame),
            "regression needs {}..={} features, got {}",
            Self::MIN_FEATURES,
            Self::MAX_FEATURES,
            self.feature_channels_per_frame
        );
        assert!(self.frame_count > 0, "frame_count must be > 0");
        assert_eq!(
            self.feature_channels,
            self.feature_channels_per_frame * self.frame_count,
            "feature channel count mismatch"
        );
        assert_eq!(
            self.radiance_channels,
            self.radiance_channels_per_frame * self.frame_count,
            "radiance channel count mismatch"
        );
        assert_eq!(
            self.weights_per_pixel,
            self.weights_per_pixel_per_frame * self.frame_count,
            "weights per pixel must equal per-frame weights times frame count"
        );
        let side = 2 * self.patch_distance() + 1;
        assert_eq!(
            (side * side) as usize,
            self.weights_per_pixel_per_frame,
            "per-frame weight count must be a square search window"
        );
        assert_eq!(
            self.padding,
            self.patch_distance(),
            "tile padding must equal the NLM search radius"
        );
    }
}
