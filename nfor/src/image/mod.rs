//! Interleaved multi-channel `f32` images and integer rectangles.

use std::ops::{Index, IndexMut};

use glam::IVec2;


/// Row-major image with `channels` interleaved `f32` values per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: Vec<f32>,
    width: usize,
    height: usize,
    channels: usize,
}

impl Image {
    pub fn new(width: usize, height: usize, channels: usize, data: Vec<f32>) -> Self {
        assert!(channels > 0, "image must have at least one channel");
        assert_eq!(
            data.len(),
            width * height * channels,
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn new_filled(width: usize, height: usize, channels: usize, value: f32) -> Self {
        Self::new(width, height, channels, vec![value; width * height * channels])
    }

    pub fn new_default(width: usize, height: usize, channels: usize) -> Self {
        Self::new_filled(width, height, channels, 0.0)
    }

    /// Builds an image by evaluating `f(x, y, channel)` for every sample.
    pub fn from_fn(
        width: usize,
        height: usize,
        channels: usize,
        f: impl Fn(usize, usize, usize) -> f32,
    ) -> Self {
        let mut data = Vec::with_capacity(width * height * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push(f(x, y, c));
                }
            }
        }
        Self::new(width, height, channels, data)
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
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn size(&self) -> IVec2 {
        IVec2::new(self.width as i32, self.height as i32)
    }

    #[inline]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn row_len(&self) -> usize {
        self.width * self.channels
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        debug_assert!(x < self.width && y < self.height);
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn pixel_mut(&mut self, x: usize, y: usize) -> &mut [f32] {
        debug_assert!(x < self.width && y < self.height);
        let start = (y * self.width + x) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Pixel at a possibly out-of-range coordinate, mirror-reflected back into the image.
    #[inline]
    pub fn pixel_mirrored(&self, p: IVec2) -> &[f32] {
        self.pixel(
            mirror_coord(p.x, self.width),
            mirror_coord(p.y, self.height),
        )
    }

    #[inline]
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= 0 && p.y >= 0 && (p.x as usize) < self.width && (p.y as usize) < self.height
    }

    pub fn same_extent(&self, other: &Image) -> bool {
        self.width == other.width && self.height == other.height
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Copies channels `src_offset..src_offset + count` of `src` into
    /// `dst_offset..dst_offset + count` of `self`.
    pub fn copy_channels_from(
        &mut self,
        dst_offset: usize,
        src: &Image,
        src_offset: usize,
        count: usize,
    ) {
        assert!(self.same_extent(src), "image extent mismatch");
        assert!(dst_offset + count <= self.channels, "destination channels out of range");
        assert!(src_offset + count <= src.channels, "source channels out of range");

        let dst_channels = self.channels;
        for (dst, src) in self
            .data
            .chunks_exact_mut(dst_channels)
            .zip(src.data.chunks_exact(src.channels))
        {
            dst[dst_offset..dst_offset + count]
                .copy_from_slice(&src[src_offset..src_offset + count]);
        }
    }
}

impl Index<(usize, usize)> for Image {
    type Output = [f32];

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &Self::Output {
        self.pixel(x, y)
    }
}

impl IndexMut<(usize, usize)> for Image {
    #[inline]
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut Self::Output {
        self.pixel_mut(x, y)
    }
}

/// Reflects `i` into `0..n` with edge duplication: `-1 -> 0`, `n -> n - 1`.
#[inline]
pub fn mirror_coord(i: i32, n: usize) -> usize {
    debug_assert!(n > 0);
    let n = n as i64;
    let period = 2 * n;
    let mut i = (i as i64).rem_euclid(period);
    if i >= n {
        i = period - 1 - i;
    }
    i as usize
}

/// Half-open integer rectangle `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub min: IVec2,
    pub max: IVec2,
}

impl Rect {
    pub fn new(min: IVec2, max: IVec2) -> Self {
        assert!(max.x >= min.x && max.y >= min.y, "inverted rect");
        Self { min, max }
    }

    pub fn from_size(size: IVec2) -> Self {
        Self::new(IVec2::ZERO, size)
    }

    #[inline]
    pub fn width(&self) -> usize {
        (self.max.x - self.min.x) as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        (self.max.y - self.min.y) as usize
    }

    #[inline]
    pub fn size(&self) -> IVec2 {
        self.max - self.min
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    #[inline]
    pub fn contains(&self, p: IVec2) -> bool {
        p.x >= self.min.x && p.y >= self.min.y && p.x < self.max.x && p.y < self.max.y
    }

    /// Grows the rect by `amount` on every side.
    pub fn inflate(&self, amount: i32) -> Self {
        Self::new(self.min - IVec2::splat(amount), self.max + IVec2::splat(amount))
    }

    pub fn intersect(&self, other: &Rect) -> Self {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max).max(min);
        Self::new(min, max)
    }

    /// Row-major iteration over all points.
    pub fn points(&self) -> impl Iterator<Item = IVec2> + '_ {
        (self.min.y..self.max.y)
            .flat_map(move |y| (self.min.x..self.max.x).map(move |x| IVec2::new(x, y)))
    }

    /// Row-major linear index of `p` relative to `min`.
    #[inline]
    pub fn local_index(&self, p: IVec2) -> usize {
        debug_assert!(self.contains(p));
        let local = p - self.min;
        local.y as usize * self.width() + local.x as usize
    }

    /// Inverse of [`Rect::local_index`].
    #[inline]
    pub fn point_at(&self, index: usize) -> IVec2 {
        let w = self.width();
        self.min + IVec2::new((index % w) as i32, (index / w) as i32)
    }
}
