use glam::IVec2;

use crate::image::Rect;

/// `tiles_per_side x tiles_per_side` tiles covering an image, clipped to its extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    extent: IVec2,
    tiles_per_side: usize,
    tile_size: IVec2,
}

impl TileGrid {
    pub fn new(extent: IVec2, tiles_per_side: usize) -> Self {
        assert!(tiles_per_side > 0, "tile grid needs at least one tile per side");
        assert!(extent.x >= 0 && extent.y >= 0, "negative image extent");
        let n = tiles_per_side as i32;
        let tile_size = IVec2::new(
            (extent.x + n - 1) / n,
            (extent.y + n - 1) / n,
        )
        .max(IVec2::ONE);
        Self {
            extent,
            tiles_per_side,
            tile_size,
        }
    }

    #[inline]
    pub fn tiles_per_side(&self) -> usize {
        self.tiles_per_side
    }

    #[inline]
    pub fn tile_size(&self) -> IVec2 {
        self.tile_size
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.tiles_per_side * self.tiles_per_side
    }

    /// Tile kept by the single-tile debug mode when no index is given.
    pub fn centered_index(&self) -> usize {
        self.count() / 2 - self.tiles_per_side / 2
    }

    /// Tile `index` in row-major order, clipped to the image. May be empty.
    pub fn tile(&self, index: usize) -> Rect {
        assert!(index < self.count(), "tile index {} out of range", index);
        let cell = IVec2::new(
            (index % self.tiles_per_side) as i32,
            (index / self.tiles_per_side) as i32,
        );
        let min = cell * self.tile_size;
        let max = min + self.tile_size;
        Rect::new(min, max).intersect(&Rect::from_size(self.extent))
    }

    /// Every non-empty tile in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = Rect> + '_ {
        (0..self.count())
            .map(move |index| self.tile(index))
            .filter(|tile| !tile.is_empty())
    }
}
