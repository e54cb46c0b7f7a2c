// THEORY:
// The `ModelStore` is the memory of the whole system: every pixel's ranked list of
// mixture components, laid out flat and row-major so the engine walks it in the
// same order it walks the frame. It is a "dumb" container like `Pixel` or `Chunk`;
// all of the learning happens in the engine. A freshly created store is already in
// the reset state, so there is no way to hand the engine an uninitialized model.

use crate::core_modules::mixture::{MIXTURES, MixtureComponent};

/// Flat, row-major storage of `MIXTURES` components for every pixel of a frame.
#[derive(Debug, Clone)]
pub struct ModelStore {
    width: u32,
    height: u32,
    /// `width * height * MIXTURES` components, pixel after pixel.
    components: Vec<MixtureComponent>,
}

impl ModelStore {
    /// Creates a store for a `width` x `height` frame with every component zeroed.
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * MIXTURES;
        Self {
            width,
            height,
            components: vec![MixtureComponent::ZERO; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels covered by the store.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Returns every component of every pixel to the zero state.
    pub fn reset(&mut self) {
        self.components.fill(MixtureComponent::ZERO);
    }

    /// The ranked components of the pixel at row-major `index`.
    pub fn pixel(&self, index: usize) -> &[MixtureComponent] {
        &self.components[index * MIXTURES..(index + 1) * MIXTURES]
    }

    pub fn pixel_mut(&mut self, index: usize) -> &mut [MixtureComponent] {
        &mut self.components[index * MIXTURES..(index + 1) * MIXTURES]
    }

    /// The ranked components of the pixel at column `x`, row `y`, or `None`
    /// outside the frame.
    pub fn at(&self, x: u32, y: u32) -> Option<&[MixtureComponent]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixel(y as usize * self.width as usize + x as usize))
    }

    /// Iterates pixel models in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = &[MixtureComponent]> {
        self.components.chunks_exact(MIXTURES)
    }

    /// Mutable access one image row at a time; each item holds `width * MIXTURES` components.
    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [MixtureComponent]> {
        let row_len = (self.width as usize * MIXTURES).max(1);
        self.components.chunks_exact_mut(row_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_is_zeroed() {
        let store = ModelStore::new(4, 3);
        assert_eq!(store.pixel_count(), 12);
        assert_eq!(store.pixels().count(), 12);
        assert!(store.pixels().flatten().all(|c| *c == MixtureComponent::ZERO));
    }

    #[test]
    fn reset_clears_every_component() {
        let mut store = ModelStore::new(2, 2);
        for index in 0..store.pixel_count() {
            store.pixel_mut(index)[0] = MixtureComponent {
                sort_key: 1.0,
                weight: 1.0,
                mean: index as f32,
                var: 225.0,
            };
        }
        store.reset();
        assert!(store.pixels().flatten().all(|c| *c == MixtureComponent::ZERO));
    }

    #[test]
    fn rows_use_width_as_stride() {
        let mut store = ModelStore::new(3, 2);
        for (y, row) in store.rows_mut().enumerate() {
            assert_eq!(row.len(), 3 * MIXTURES);
            for (x, model) in row.chunks_exact_mut(MIXTURES).enumerate() {
                model[0].mean = (y * 10 + x) as f32;
            }
        }
        assert_eq!(store.at(2, 0).unwrap()[0].mean, 2.0);
        assert_eq!(store.at(0, 1).unwrap()[0].mean, 10.0);
        assert_eq!(store.at(2, 1).unwrap()[0].mean, 12.0);
        assert_eq!(store.pixel(4)[0].mean, 11.0);
    }

    #[test]
    fn coordinates_outside_frame_have_no_model() {
        let store = ModelStore::new(3, 2);
        assert!(store.at(3, 0).is_none());
        assert!(store.at(0, 2).is_none());
        assert!(store.at(u32::MAX, u32::MAX).is_none());
        assert!(store.at(2, 1).is_some());
    }
}
