//! Canonical RGBA8 bitmap.
//!
//! Rows are padded up to [`ROW_ALIGNMENT`] bytes, so consumers must go through
//! [`RgbaBitmap::pitch`] or [`RgbaBitmap::row`] instead of assuming
//! `width * 4` bytes per row.

use tracing::debug;

/// Bytes per canonical pixel.
pub const RGBA_BYTES_PER_PIXEL: usize = 4;

/// Row alignment of the canonical bitmap, in bytes.
pub const ROW_ALIGNMENT: usize = 16;

/// RGBA8 bitmap with an explicit, possibly padded, row pitch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RgbaBitmap {
    width: u32,
    height: u32,
    pitch: usize,
    data: Vec<u8>,
}

impl RgbaBitmap {
    /// Allocate a zeroed (transparent black) bitmap.
    pub fn new(width: u32, height: u32) -> Self {
        let pitch = Self::pitch_for(width);
        Self {
            width,
            height,
            pitch,
            data: vec![0u8; pitch * height as usize],
        }
    }

    /// Pitch used for a given width.
    pub fn pitch_for(width: u32) -> usize {
        let row = width as usize * RGBA_BYTES_PER_PIXEL;
        row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, including padding.
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Resize to new dimensions. Contents are cleared only when the
    /// dimensions actually change; returns whether a reallocation happened.
    pub fn reallocate(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        debug!(
            "Reallocating bitmap {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        *self = Self::new(width, height);
        true
    }

    /// Whole backing store, `pitch * height` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The visible pixels of row `y` (`width * 4` bytes, padding excluded).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.pitch;
        &self.data[start..start + self.row_bytes()]
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.pitch;
        let len = self.row_bytes();
        &mut self.data[start..start + len]
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let row = self.row(y);
        let i = x as usize * RGBA_BYTES_PER_PIXEL;
        [row[i], row[i + 1], row[i + 2], row[i + 3]]
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for y in 0..self.height {
            for px in self.row_mut(y).chunks_exact_mut(RGBA_BYTES_PER_PIXEL) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Copy into a tightly packed `width * height * 4` buffer.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.row_bytes() * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * RGBA_BYTES_PER_PIXEL
    }
}
