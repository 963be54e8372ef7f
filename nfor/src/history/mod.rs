//! Temporal frame cache.
//!
//! Frames live in an arena of slots addressed by [`SlotHandle`]. A ring of handles
//! keeps insertion order and evicts the oldest frame once the window is full.
//! Consumers bind a frame by handle or by position and get read-only descriptors.

mod arena;

#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use crate::config::TemporalConfig;
use crate::descriptor::{FeatureDesc, RadianceDesc, TextureDesc, VarianceType};
use crate::image::Image;

pub use arena::SlotHandle;
use arena::FrameArena;

/// Channels of the packed variance image.
pub mod variance_channel {
    pub const RADIANCE: usize = 0;
    pub const ALBEDO: usize = 1;
    pub const NORMAL: usize = 2;
    pub const ALPHA: usize = 3;
    pub const COUNT: usize = 4;
}

/// Color channels of radiance, albedo and normal used by the regression.
pub const COLOR_CHANNELS: usize = 3;

/// Borrowed images of the frame being rendered.
#[derive(Debug, Clone, Copy)]
pub struct FrameInputs<'a> {
    /// RGBA.
    pub radiance: &'a Image,
    /// Packed variance, see [`variance_channel`].
    pub variance: &'a Image,
    pub albedo: &'a Image,
    pub normal: &'a Image,
    /// Single channel.
    pub depth: Option<&'a Image>,
}

impl FrameInputs<'_> {
    pub fn validate(&self) {
        let extent = self.radiance.size();
        assert_eq!(self.radiance.channels(), 4, "radiance must be RGBA");
        assert_eq!(
            self.variance.channels(),
            variance_channel::COUNT,
            "variance must pack radiance, albedo, normal and alpha"
        );
        assert!(self.albedo.channels() >= COLOR_CHANNELS, "albedo needs 3 channels");
        assert!(self.normal.channels() >= COLOR_CHANNELS, "normal needs 3 channels");
        for (name, image) in [
            ("variance", self.variance),
            ("albedo", self.albedo),
            ("normal", self.normal),
        ] {
            assert_eq!(image.size(), extent, "{} extent mismatch", name);
        }
        if let Some(depth) = self.depth {
            assert_eq!(depth.channels(), 1, "depth must be a single channel");
            assert_eq!(depth.size(), extent, "depth extent mismatch");
        }
    }
}

/// Owned snapshot of one frame. Immutable once inside the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSlot {
    pub(crate) radiance: Image,
    pub(crate) variance: Image,
    pub(crate) albedo: Image,
    pub(crate) normal: Image,
    pub(crate) depth: Option<Image>,
}

impl FrameSlot {
    /// Copies every input image.
    pub fn from_inputs(inputs: &FrameInputs<'_>) -> Self {
        inputs.validate();
        Self {
            radiance: inputs.radiance.clone(),
            variance: inputs.variance.clone(),
            albedo: inputs.albedo.clone(),
            normal: inputs.normal.clone(),
            depth: inputs.depth.cloned(),
        }
    }

    pub fn radiance(&self) -> &Image {
        &self.radiance
    }

    pub fn variance(&self) -> &Image {
        &self.variance
    }

    pub fn albedo(&self) -> &Image {
        &self.albedo
    }

    pub fn normal(&self) -> &Image {
        &self.normal
    }

    pub fn depth(&self) -> Option<&Image> {
        self.depth.as_ref()
    }

    /// Radiance with RGB multiplied back by the stored (offset) albedo.
    pub fn remodulated_radiance(&self) -> Image {
        let mut radiance = self.radiance.clone();
        let (rc, ac) = (radiance.channels(), self.albedo.channels());
        radiance
            .data_mut()
            .par_chunks_mut(rc)
            .zip(self.albedo.data().par_chunks(ac))
            .for_each(|(r, a)| {
                for c in 0..COLOR_CHANNELS {
                    r[c] *= a[c];
                }
            });
        radiance
    }

    pub fn radiance_desc(&self) -> RadianceDesc<'_> {
        FeatureDesc::new(
            TextureDesc::new(&self.radiance, 0, COLOR_CHANNELS),
            Some(TextureDesc::new(&self.variance, variance_channel::RADIANCE, 1)),
            VarianceType::GreyScale,
        )
    }

    pub fn features(&self) -> FeatureSet<'_> {
        FeatureSet {
            albedo: FeatureDesc::new(
                TextureDesc::new(&self.albedo, 0, COLOR_CHANNELS),
                Some(TextureDesc::new(&self.variance, variance_channel::ALBEDO, 1)),
                VarianceType::GreyScale,
            ),
            normal: FeatureDesc::new(
                TextureDesc::new(&self.normal, 0, COLOR_CHANNELS),
                Some(TextureDesc::new(&self.variance, variance_channel::NORMAL, 1)),
                VarianceType::Normal,
            ),
            depth: self
                .depth
                .as_ref()
                .map(|depth| FeatureDesc::clean(TextureDesc::whole(depth))),
        }
    }
}

/// Regression covariates of one frame: albedo, normal, optional depth.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSet<'a> {
    pub albedo: FeatureDesc<'a>,
    pub normal: FeatureDesc<'a>,
    pub depth: Option<FeatureDesc<'a>>,
}

impl<'a> FeatureSet<'a> {
    pub fn iter(&self) -> impl Iterator<Item = FeatureDesc<'a>> {
        [Some(self.albedo), Some(self.normal), self.depth]
            .into_iter()
            .flatten()
    }

    /// Channels contributed per frame.
    pub fn channel_count(&self) -> usize {
        self.iter().map(|f| f.channel_count()).sum()
    }
}

/// Descriptors of one bound frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub handle: SlotHandle,
    pub radiance: RadianceDesc<'a>,
    pub features: FeatureSet<'a>,
    pub slot: &'a FrameSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameOrder {
    /// Oldest first.
    Forward,
    /// Newest first.
    #[default]
    Reverse,
}

/// Fixed-capacity FIFO of frames.
#[derive(Debug)]
pub struct TemporalFrameCache {
    arena: FrameArena,
    ring: VecDeque<SlotHandle>,
    capacity: usize,
}

impl Default for TemporalFrameCache {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TemporalFrameCache {
    pub fn new(capacity: usize) -> Self {
        Self::assert_capacity(capacity);
        Self {
            arena: FrameArena::default(),
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn assert_capacity(capacity: usize) {
        assert!(
            (1..=TemporalConfig::MAX_WINDOW).contains(&capacity) && capacity % 2 == 1,
            "temporal window must be odd and in 1..={}, got {}",
            TemporalConfig::MAX_WINDOW,
            capacity
        );
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ring.len() == self.capacity
    }

    /// Changes the window, dropping the oldest frames that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        Self::assert_capacity(capacity);
        self.capacity = capacity;
        while self.ring.len() > capacity {
            self.evict_oldest();
        }
    }

    /// Copies `inputs` into a new slot.
    pub fn add_frame(&mut self, inputs: &FrameInputs<'_>) -> SlotHandle {
        self.push(FrameSlot::from_inputs(inputs))
    }

    /// Takes ownership of `slot`, evicting the oldest frame when full.
    pub fn push(&mut self, slot: FrameSlot) -> SlotHandle {
        if self.is_full() {
            self.evict_oldest();
        }
        let handle = self.arena.insert(slot);
        self.ring.push_back(handle);
        handle
    }

    fn evict_oldest(&mut self) {
        if let Some(handle) = self.ring.pop_front() {
            self.arena.remove(handle);
        }
    }

    pub fn clear(&mut self) {
        while !self.ring.is_empty() {
            self.evict_oldest();
        }
    }

    /// Handle of the frame at `index` in `order`.
    pub fn handle(&self, index: usize, order: FrameOrder) -> SlotHandle {
        assert!(
            index < self.ring.len(),
            "frame index {} out of range for {} stored frames",
            index,
            self.ring.len()
        );
        match order {
            FrameOrder::Forward => self.ring[index],
            FrameOrder::Reverse => self.ring[self.ring.len() - 1 - index],
        }
    }

    /// The slot behind `handle`, `None` once it was evicted.
    pub fn slot(&self, handle: SlotHandle) -> Option<&FrameSlot> {
        self.arena.get(handle)
    }

    pub fn frame(&self, index: usize, order: FrameOrder) -> &FrameSlot {
        self.bind(self.handle(index, order)).slot
    }

    fn bind(&self, handle: SlotHandle) -> FrameView<'_> {
        let slot = self
            .arena
            .get(handle)
            .unwrap_or_else(|| panic!("ring references evicted slot {:?}", handle));
        FrameView {
            handle,
            radiance: slot.radiance_desc(),
            features: slot.features(),
            slot,
        }
    }

    /// Descriptors of every stored frame, built as the iterator advances.
    pub fn fetch_all(&self, order: FrameOrder) -> impl Iterator<Item = FrameView<'_>> + '_ {
        (0..self.ring.len()).map(move |index| self.bind(self.handle(index, order)))
    }

    /// Depth of the frame at `index`.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn depth(&self, index: usize, order: FrameOrder) -> Option<&Image> {
        self.frame(index, order).depth()
    }
}

/// Cache shared between the host and the denoiser across frames.
#[derive(Debug, Clone, Default)]
pub struct History {
    inner: Arc<Mutex<TemporalFrameCache>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TemporalFrameCache::new(capacity))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TemporalFrameCache> {
        self.inner.lock()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().count()
    }
}
