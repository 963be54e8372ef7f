//! Tiled collaborative regression over the temporal window.
//!
//! The image is split into a [`TileGrid`]. Each tile copies mirrored, padded
//! covariates and radiance of every frame, evaluates its NLM weights against the
//! denoised frame and runs one [`WeightedLsr`]. Padded accumulations overlap their
//! neighbours, so the full-image sums are normalized only after every tile ran.

mod grid;


pub use grid::TileGrid;

use glam::IVec2;

use crate::config::{DenoiseConfig, RecoverPhase, TilingConfig};
use crate::descriptor::{LsrVariant, WeightedLsrDesc};
use crate::history::{FrameView, COLOR_CHANNELS};
use crate::image::{Image, Rect};
use crate::nlm::{NlmEngine, NlmParams, WeightBuffer};
use crate::regression::{Accumulation, TileBuffers, WeightedLsr};

/// Full-image `[r, g, b, weight]` sums.
#[derive(Debug, Clone)]
struct ImageAccumulator {
    extent: IVec2,
    data: Vec<f32>,
}

impl ImageAccumulator {
    const STRIDE: usize = COLOR_CHANNELS + 1;

    fn new(extent: IVec2) -> Self {
        Self {
            extent,
            data: vec![0.0; extent.x as usize * extent.y as usize * Self::STRIDE],
        }
    }

    /// Adds the part of `tile` that falls inside the image.
    fn add(&mut self, tile: &Accumulation) {
        let inside = tile.region.intersect(&Rect::from_size(self.extent));
        let stride = Self::STRIDE;
        for n in inside.points() {
            let start = (n.y as usize * self.extent.x as usize + n.x as usize) * stride;
            for (dst, src) in self.data[start..start + stride].iter_mut().zip(tile.at(n)) {
                *dst += src;
            }
        }
    }

    /// RGBA output. Pixels without weight keep `fallback`, alpha always comes from it.
    fn normalize(&self, fallback: Image) -> Image {
        let mut out = fallback;
        let stride = Self::STRIDE;
        let channels = out.channels();
        for (sums, px) in self
            .data
            .chunks_exact(stride)
            .zip(out.data_mut().chunks_exact_mut(channels))
        {
            let w = sums[COLOR_CHANNELS];
            if w > 0.0 {
                for k in 0..COLOR_CHANNELS {
                    px[k] = sums[k] / w;
                }
            }
        }
        out
    }
}

/// Runs the tiled regression of one bandwidth.
#[derive(Debug)]
pub struct CollaborativeDenoiser<'a> {
    tiling: &'a TilingConfig,
    engine: NlmEngine,
    lsr: WeightedLsr,
    add_constant: bool,
    remodulate: bool,
}

impl<'a> CollaborativeDenoiser<'a> {
    pub fn new(config: &'a DenoiseConfig) -> Self {
        Self {
            tiling: &config.tiling,
            engine: NlmEngine::new(&config.nlm),
            lsr: WeightedLsr::new(&config.regression, config.albedo_divide.recover_phase()),
            add_constant: config.feature.add_constant,
            remodulate: config.albedo_divide.recover_phase() != RecoverPhase::Disabled,
        }
    }

    /// Denoises `frames[denoised_frame]` with radiance weights `params`.
    ///
    /// Returns RGBA. Alpha and any pixel no tile reached are copied from the noisy
    /// frame, remodulated by its albedo when the regression recovers albedo.
    pub fn denoise(
        &self,
        frames: &[FrameView<'_>],
        denoised_frame: usize,
        params: &NlmParams,
    ) -> Image {
        assert!(denoised_frame < frames.len(), "denoised frame out of range");
        let center = &frames[denoised_frame];
        let extent = center.radiance.data.size();
        let grid = TileGrid::new(extent, self.tiling.tiles_per_side(extent));
        let mut accumulator = ImageAccumulator::new(extent);

        let tiles: Vec<Rect> = match &self.tiling.debug {
            Some(debug) => {
                let index = debug
                    .index
                    .unwrap_or_else(|| grid.centered_index())
                    .min(grid.count() - 1);
                tracing::debug!(index, "Denoising a single debug tile");
                vec![grid.tile(index)]
            }
            None => grid.tiles().collect(),
        };

        for tile in tiles.into_iter().filter(|tile| !tile.is_empty()) {
            let buffers = self.tile_buffers(frames, denoised_frame, tile, params);
            let accumulation = self.lsr.solve_tile(&buffers, denoised_frame);
            accumulator.add(&accumulation);
        }

        tracing::debug!(
            tiles = grid.count(),
            tile_size = ?grid.tile_size(),
            frames = frames.len(),
            bandwidth = params.bandwidth,
            "Collaborative regression finished"
        );
        let noisy = if self.remodulate {
            center.slot.remodulated_radiance()
        } else {
            center.slot.radiance().clone()
        };
        accumulator.normalize(noisy)
    }

    /// Copies covariates, radiance and weights of `tile` for every frame.
    pub fn tile_buffers(
        &self,
        frames: &[FrameView<'_>],
        denoised_frame: usize,
        tile: Rect,
        params: &NlmParams,
    ) -> TileBuffers {
        let frame_count = frames.len();
        let stored = frames[denoised_frame].features.channel_count();
        assert!(
            frames.iter().all(|f| f.features.channel_count() == stored),
            "every frame must provide the same features"
        );
        let unknowns = stored + usize::from(self.add_constant);
        let offsets = params.offset_count();
        let padding = params.patch_distance;
        let padded = tile.inflate(padding);

        let desc = WeightedLsrDesc {
            feature_channels_per_frame: unknowns,
            feature_channels: unknowns * frame_count,
            weights_per_pixel_per_frame: offsets,
            weights_per_pixel: offsets * frame_count,
            radiance_channels_per_frame: COLOR_CHANNELS,
            radiance_channels: COLOR_CHANNELS * frame_count,
            width: tile.width(),
            height: tile.height(),
            padding,
            tile_origin: tile.min,
            frame_count,
            variant: if tile == Rect::from_size(frames[denoised_frame].radiance.data.size()) {
                LsrVariant::WholeImage
            } else {
                LsrVariant::Tiled
            },
        };
        desc.validate();

        let mut features = Vec::with_capacity(frame_count * padded.area() * stored);
        let mut radiance = Vec::with_capacity(frame_count * padded.area() * COLOR_CHANNELS);
        for frame in frames {
            for n in padded.points() {
                for feature in frame.features.iter() {
                    features.extend_from_slice(feature.data.sample(n));
                }
                radiance.extend_from_slice(frame.radiance.data.sample(n));
            }
        }

        let mut weights = WeightBuffer::new(
            self.engine.storage_layout(),
            tile.width(),
            tile.height(),
            offsets,
            frame_count,
        );
        let source = &frames[denoised_frame].radiance;
        for (index, frame) in frames.iter().enumerate() {
            self.engine
                .compute_weights(source, &frame.radiance, tile, params, &mut weights, index);
        }

        TileBuffers {
            desc,
            tile,
            padded,
            search: *params,
            add_constant: self.add_constant,
            features,
            radiance,
            weights,
        }
    }
}
