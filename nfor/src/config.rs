//! Denoiser configuration.
//!
//! One immutable [`DenoiseConfig`] is threaded through the whole pipeline. Every
//! sub-struct deserializes with defaults for missing keys, so partial YAML works:
//!
//! ```ignore
//! let config = DenoiseConfig::from_yaml("temporal:\n  half_width: 1\n")?;
//! assert_eq!(config.temporal.window_size(&ViewContext::offline()), 3);
//! ```

use glam::IVec2;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

use crate::error::ConfigError;
use crate::nlm::NlmParams;

/// What the host tells us about the frame being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewContext {
    /// Offline renders may use temporal windows. Preview renders always use one frame.
    pub offline: bool,
}

impl ViewContext {
    pub fn offline() -> Self {
        Self { offline: true }
    }

    pub fn preview() -> Self {
        Self { offline: false }
    }
}

/// Physical arrangement of cached NLM weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum WeightLayout {
    /// No cache. Filters evaluate weights on the fly.
    None,
    /// Offsets innermost: `offsets x W x H`.
    Interleaved,
    /// One plane per offset: `W x H x offsets`.
    Planar,
    /// Four offsets per texel: `4 x W x H x ceil(offsets / 4)`.
    #[default]
    PackedFloat4,
}

/// How many symmetric offset pairs one atlas texel stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum AtlasType {
    OneSymmetricPair,
    #[default]
    TwoSymmetricPairs,
}

impl AtlasType {
    pub fn pairs_per_texel(self) -> usize {
        match self {
            AtlasType::OneSymmetricPair => 1,
            AtlasType::TwoSymmetricPairs => 2,
        }
    }
}

/// Strategy for solving the per-pixel normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum SolverType {
    /// Newton-Schulz inverse iteration.
    #[default]
    NewtonSchulz,
    /// Modified Cholesky with diagonal regularization.
    Cholesky,
    /// Cholesky inverse refined by a few Newton-Schulz steps. Failures use plain Newton-Schulz.
    NewtonCholesky,
    /// Cholesky cascade with decreasing regularization and a Newton-Schulz fallback.
    Hybrid,
}

/// Where the regression runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum RegressionDevice {
    /// Data-parallel kernels.
    #[default]
    Batched,
    /// Sequential build and QR solve.
    Reference,
}

/// Where `A * theta = B` is solved when the regression device is batched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum LinearSolverDevice {
    #[default]
    Batched,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ReconstructionType {
    /// Each solved pixel spreads its prediction over its search window.
    Scatter,
    /// Each output pixel pulls predictions from the solved pixels that cover it.
    Gather,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum ReconstructionPolicy {
    /// Scatter for the denoised frame, gather for the others.
    #[default]
    ScatterCenter,
    ForceGather,
}

/// When demodulated radiance is multiplied back by albedo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, Serialize, Deserialize)]
pub enum RecoverPhase {
    /// Not demodulated.
    Disabled,
    /// Once, by the denoised frame's albedo, after all frames are combined.
    #[default]
    Final,
    /// Inside each frame's reconstruction, by that frame's albedo.
    Each,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
pub enum FrameCountCondition {
    /// Denoise as soon as a denoising frame index resolves.
    Any,
    /// Denoise only once the history holds the full window.
    #[default]
    Exact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TileCount {
    /// Derived from the image extent and [`TilingConfig::tile_size`].
    #[default]
    Auto,
    /// Tiles per side.
    Fixed(usize),
}

/// Patch half-width and search half-width of one NLM pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchConfig {
    pub patch_size: i32,
    pub patch_distance: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Append a constant 1 to every observation.
    pub add_constant: bool,
    /// Albedo grey-scale clamp. `<= 0` disables.
    pub max_albedo_greyscale: f32,
    /// Normal length clamp. `<= 0` disables.
    pub max_normal_length: f32,
    /// NLM pre-filtering of noisy features.
    pub filtering: bool,
    pub nlm: PatchConfig,
    /// Feature filtering uses `tiles / downscale` tiles per side.
    pub tile_count_downscale: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            add_constant: true,
            max_albedo_greyscale: 2.0,
            max_normal_length: 10.0,
            filtering: true,
            nlm: PatchConfig {
                patch_size: 3,
                patch_distance: 5,
            },
            tile_count_downscale: 2,
        }
    }
}

impl FeatureConfig {
    pub const FILTER_BANDWIDTH: f32 = 0.5;

    pub fn nlm_params(&self) -> NlmParams {
        NlmParams::new(
            self.nlm.patch_size,
            self.nlm.patch_distance,
            Self::FILTER_BANDWIDTH,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlbedoDivideConfig {
    pub enabled: bool,
    pub offset: f32,
    /// Offset for pixels without a reliable surface normal (sky, mirrors).
    pub offset_sky: f32,
    pub recover_phase: RecoverPhase,
}

impl Default for AlbedoDivideConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            offset: 0.1,
            offset_sky: 0.2,
            recover_phase: RecoverPhase::Final,
        }
    }
}

impl AlbedoDivideConfig {
    const MIN_OFFSET: f32 = 1e-8;

    /// Effective recover phase. Disabled whenever pre-division is off.
    pub fn recover_phase(&self) -> RecoverPhase {
        if self.enabled {
            self.recover_phase
        } else {
            RecoverPhase::Disabled
        }
    }

    /// `[regular, sky]` offsets, floored to a tiny positive value.
    pub fn offsets(&self) -> [f32; 2] {
        [
            self.offset.max(Self::MIN_OFFSET),
            self.offset_sky.max(Self::MIN_OFFSET),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Frames on each side of the denoised frame. Window = `1 + 2 * half_width`.
    pub half_width: usize,
    pub condition: FrameCountCondition,
    /// Forced denoising frame index in newest-first order. `None` picks the center.
    pub denoising_frame_index: Option<usize>,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            half_width: 2,
            condition: FrameCountCondition::Exact,
            denoising_frame_index: None,
        }
    }
}

impl TemporalConfig {
    pub const MAX_WINDOW: usize = 7;

    pub fn window_size(&self, view: &ViewContext) -> usize {
        if !view.offline {
            return 1;
        }
        (1 + 2 * self.half_width).clamp(1, Self::MAX_WINDOW)
    }

    /// Index (newest first) of the frame to denoise, or `None` when it is not stored yet.
    pub fn resolve_denoising_frame_index(&self, window: usize, available: usize) -> Option<usize> {
        if available == 0 {
            return None;
        }
        match self.denoising_frame_index {
            Some(index) if index < available => Some(index.min(window - 1)),
            Some(_) => None,
            None => Some((available - 1).min(window / 2)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TileDebug {
    /// Tile to keep. `None` keeps the centered tile.
    pub index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_count: TileCount,
    /// Target tile edge for [`TileCount::Auto`].
    pub tile_size: usize,
    pub debug: Option<TileDebug>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_count: TileCount::Auto,
            tile_size: 213,
            debug: None,
        }
    }
}

impl TilingConfig {
    pub const MIN_TILE_SIZE: usize = 100;
    pub const MAX_TILES_PER_SIDE: usize = 32;

    pub fn tiles_per_side(&self, extent: IVec2) -> usize {
        let tiles = match self.tile_count {
            TileCount::Fixed(n) => n,
            TileCount::Auto => {
                let max_extent = extent.x.max(extent.y).max(0) as usize;
                max_extent / self.tile_size.max(Self::MIN_TILE_SIZE)
            }
        };
        tiles.clamp(1, Self::MAX_TILES_PER_SIDE)
    }
}

/// Regularization schedule of [`SolverType::Hybrid`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSchedule {
    pub initial_lambda: f64,
    pub fallback_lambda: f64,
    pub refine_lambda: f64,
}

impl Default for HybridSchedule {
    fn default() -> Self {
        Self {
            initial_lambda: 0.0,
            fallback_lambda: 1e-6,
            refine_lambda: 1e-7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionConfig {
    pub device: RegressionDevice,
    pub linear_solver_device: LinearSolverDevice,
    pub solver: SolverType,
    /// Observations kept per parameter. Below 1 keeps every observation.
    pub max_data_ratio_to_parameters: f32,
    pub cholesky_lambda: f64,
    /// Absolute regularization floor of the plain Cholesky solver, per frame.
    pub cholesky_min_lambda_per_frame: f64,
    pub newton_cholesky_lambda_per_frame: f64,
    pub newton_cholesky_iterations: usize,
    pub hybrid: HybridSchedule,
    pub reconstruction: ReconstructionPolicy,
    /// Reconstruct only this frame's contribution.
    pub debug_frame_index: Option<usize>,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            device: RegressionDevice::Batched,
            linear_solver_device: LinearSolverDevice::Batched,
            solver: SolverType::NewtonSchulz,
            max_data_ratio_to_parameters: 20.0,
            cholesky_lambda: 2e-5,
            cholesky_min_lambda_per_frame: 1e-3,
            newton_cholesky_lambda_per_frame: 1e-3,
            newton_cholesky_iterations: 3,
            hybrid: HybridSchedule::default(),
            reconstruction: ReconstructionPolicy::ScatterCenter,
            debug_frame_index: None,
        }
    }
}

impl RegressionConfig {
    /// Stride over the `observations` of one pixel so that roughly
    /// `parameters * max_data_ratio_to_parameters` of them are used.
    pub fn sampling_step(&self, parameters: usize, observations: usize) -> usize {
        if self.max_data_ratio_to_parameters < 1.0 || parameters == 0 {
            return 1;
        }
        let budget = (parameters as f32 * self.max_data_ratio_to_parameters).max(1.0);
        ((observations as f32 / budget) as usize).max(1)
    }

    pub fn reconstruction_type(&self, frame: usize, denoised_frame: usize) -> ReconstructionType {
        match self.reconstruction {
            ReconstructionPolicy::ScatterCenter if frame == denoised_frame => {
                ReconstructionType::Scatter
            }
            _ => ReconstructionType::Gather,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NlmConfig {
    pub use_atlas: bool,
    pub atlas_type: AtlasType,
    /// Atlas edge in texels. `<= 0` sizes the atlas to the filtered region.
    pub atlas_size: i32,
    pub weight_layout: WeightLayout,
    pub radiance: PatchConfig,
}

impl Default for NlmConfig {
    fn default() -> Self {
        Self {
            use_atlas: true,
            atlas_type: AtlasType::TwoSymmetricPairs,
            atlas_size: 2048,
            weight_layout: WeightLayout::PackedFloat4,
            radiance: PatchConfig {
                patch_size: 3,
                patch_distance: 9,
            },
        }
    }
}

impl NlmConfig {
    pub fn radiance_params(&self, bandwidth: f32) -> NlmParams {
        NlmParams::new(
            self.radiance.patch_size,
            self.radiance.patch_distance,
            bandwidth,
        )
    }

    /// PackedFloat4 always batches two pairs per texel.
    pub fn atlas_type(&self) -> AtlasType {
        match self.weight_layout {
            WeightLayout::PackedFloat4 => AtlasType::TwoSymmetricPairs,
            _ => self.atlas_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub selection: bool,
    /// Single forced bandwidth in `(0, 1]`. Validation rejects other values;
    /// `bandwidths()` falls back to the defaults for non-positive ones and caps at 1.
    pub override_bandwidth: Option<f32>,
    /// Filter each MSE map with its candidate's bandwidth instead of 1.
    pub mse_preserve_detail: bool,
    /// Filter the selection map with the first bandwidth instead of 1.
    pub map_preserve_detail: bool,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            selection: true,
            override_bandwidth: None,
            mse_preserve_detail: true,
            map_preserve_detail: false,
        }
    }
}

impl BandwidthConfig {
    pub const DEFAULT_BANDWIDTHS: [f32; 2] = [0.5, 1.0];

    pub fn bandwidths(&self) -> Vec<f32> {
        match self.override_bandwidth {
            Some(b) if b > 0.0 => vec![b.min(1.0)],
            _ => Self::DEFAULT_BANDWIDTHS.to_vec(),
        }
    }

    pub fn selects(&self) -> bool {
        self.selection && self.bandwidths().len() == 2
    }
}

/// Complete denoiser configuration.
///
/// Use presets or struct update syntax:
///
/// ```ignore
/// let config = DenoiseConfig {
///     regression: RegressionConfig {
///         solver: SolverType::Hybrid,
///         ..Default::default()
///     },
///     ..DenoiseConfig::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenoiseConfig {
    pub feature: FeatureConfig,
    pub albedo_divide: AlbedoDivideConfig,
    pub temporal: TemporalConfig,
    pub tiling: TilingConfig,
    pub regression: RegressionConfig,
    pub nlm: NlmConfig,
    pub bandwidth: BandwidthConfig,
    pub denoise_alpha: bool,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            albedo_divide: AlbedoDivideConfig::default(),
            temporal: TemporalConfig::default(),
            tiling: TilingConfig::default(),
            regression: RegressionConfig::default(),
            nlm: NlmConfig::default(),
            bandwidth: BandwidthConfig::default(),
            denoise_alpha: true,
        }
    }
}

impl DenoiseConfig {
    // ========== Presets ==========

    /// Preset: single frame, no temporal window.
    pub fn preview() -> Self {
        Self {
            temporal: TemporalConfig {
                half_width: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Preset: sequential reference regression, for validating the batched path.
    pub fn reference() -> Self {
        Self {
            regression: RegressionConfig {
                device: RegressionDevice::Reference,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.try_validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yml::to_string(self)?)
    }

    // ========== Validation ==========

    /// Validate configuration parameters.
    ///
    /// # Panics
    ///
    /// Panics if a parameter is out of range.
    pub fn validate(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    fn try_validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.feature.nlm.patch_size < 0 || self.feature.nlm.patch_distance < 0 {
            return invalid("feature NLM sizes must be non-negative");
        }
        if self.nlm.radiance.patch_size < 0 || self.nlm.radiance.patch_distance < 0 {
            return invalid("radiance NLM sizes must be non-negative");
        }
        if self.feature.tile_count_downscale == 0 {
            return invalid("tile_count_downscale must be at least 1");
        }
        if self.albedo_divide.offset < 0.0 || self.albedo_divide.offset_sky < 0.0 {
            return invalid("albedo offsets must be non-negative");
        }
        if self.regression.cholesky_lambda < 0.0
            || self.regression.hybrid.initial_lambda < 0.0
            || self.regression.hybrid.fallback_lambda < 0.0
            || self.regression.hybrid.refine_lambda < 0.0
        {
            return invalid("lambdas must be non-negative");
        }
        if let TileCount::Fixed(0) = self.tiling.tile_count {
            return invalid("fixed tile count must be at least 1");
        }
        if let Some(b) = self.bandwidth.override_bandwidth {
            if !(b > 0.0 && b <= 1.0) {
                return invalid("override bandwidth must be in (0, 1]");
            }
        }
        Ok(())
    }
}
