use crate::config::WeightLayout;

/// NLM weights of one region for one or more frames.
///
/// Pixels are addressed by their row-major index inside the region. Frames are
/// stored back to back, each with the same per-frame layout.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightBuffer {
    data: Vec<f32>,
    layout: WeightLayout,
    width: usize,
    height: usize,
    offsets: usize,
    frames: usize,
}

impl WeightBuffer {
    pub fn new(
        layout: WeightLayout,
        width: usize,
        height: usize,
        offsets: usize,
        frames: usize,
    ) -> Self {
        assert!(
            layout != WeightLayout::None,
            "weight buffer needs a storage layout"
        );
        assert!(offsets > 0 && frames > 0, "weight buffer must not be empty");
        let mut buffer = Self {
            data: Vec::new(),
            layout,
            width,
            height,
            offsets,
            frames,
        };
        buffer.data = vec![0.0; buffer.frame_len() * frames];
        buffer
    }

    #[inline]
    pub fn layout(&self) -> WeightLayout {
        self.layout
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn offsets(&self) -> usize {
        self.offsets
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Storage of one frame, including packing slack.
    pub fn frame_len(&self) -> usize {
        match self.layout {
            WeightLayout::PackedFloat4 => 4 * self.area() * self.offsets.div_ceil(4),
            _ => self.area() * self.offsets,
        }
    }

    #[inline]
    fn index(&self, pixel: usize, frame: usize, offset: usize) -> usize {
        debug_assert!(pixel < self.area() && frame < self.frames && offset < self.offsets);
        let base = frame * self.frame_len();
        match self.layout {
            WeightLayout::Interleaved => base + pixel * self.offsets + offset,
            WeightLayout::Planar => base + offset * self.area() + pixel,
            WeightLayout::PackedFloat4 => {
                base + ((offset / 4) * self.area() + pixel) * 4 + offset % 4
            }
            WeightLayout::None => unreachable!("weight buffer without layout"),
        }
    }

    #[inline]
    pub fn get(&self, pixel: usize, frame: usize, offset: usize) -> f32 {
        self.data[self.index(pixel, frame, offset)]
    }

    #[inline]
    pub fn set(&mut self, pixel: usize, frame: usize, offset: usize, weight: f32) {
        let index = self.index(pixel, frame, offset);
        self.data[index] = weight;
    }

    /// Stores `weights` given as `offsets` values per pixel, pixels in row-major order.
    pub fn write_interleaved(&mut self, frame: usize, weights: &[f32]) {
        assert_eq!(weights.len(), self.area() * self.offsets, "weight count mismatch");
        if self.layout == WeightLayout::Interleaved {
            let start = frame * self.frame_len();
            self.data[start..start + weights.len()].copy_from_slice(weights);
            return;
        }
        for (pixel, pixel_weights) in weights.chunks_exact(self.offsets).enumerate() {
            for (offset, &w) in pixel_weights.iter().enumerate() {
                self.set(pixel, frame, offset, w);
            }
        }
    }

    /// Stores one offset's weights for every pixel of the region.
    pub fn write_plane(&mut self, frame: usize, offset: usize, plane: &[f32]) {
        assert_eq!(plane.len(), self.area(), "weight plane size mismatch");
        if self.layout == WeightLayout::Planar {
            let start = frame * self.frame_len() + offset * self.area();
            self.data[start..start + plane.len()].copy_from_slice(plane);
            return;
        }
        for (pixel, &w) in plane.iter().enumerate() {
            self.set(pixel, frame, offset, w);
        }
    }

    /// All weights of `pixel` in `frame`, in offset order.
    pub fn pixel_weights(&self, pixel: usize, frame: usize) -> impl Iterator<Item = f32> + '_ {
        (0..self.offsets).map(move |offset| self.get(pixel, frame, offset))
    }
}
