//! CPU side of a streamed texture.
//!
//! Mirrors what a pixel-unpack buffer upload does: the staging buffer keeps
//! the frame buffer's pitch and every row is copied separately, so padded
//! rows survive intact. A renderer would map this buffer straight into its
//! texture upload.

use camstream_convert::RgbaBitmap;
use tracing::debug;

pub struct TexStream {
    width: u32,
    height: u32,
    pitch: usize,
    staging: Vec<u8>,
    uploads: u64,
}

impl TexStream {
    pub fn new(width: u32, height: u32) -> Self {
        let pitch = RgbaBitmap::pitch_for(width);
        Self {
            width,
            height,
            pitch,
            staging: vec![0u8; pitch * height as usize],
            uploads: 0,
        }
    }

    /// Copy `frame` into the staging buffer.
    ///
    /// Returns `true` when the texture had to be recreated because the frame
    /// dimensions changed.
    pub fn update(&mut self, frame: &RgbaBitmap) -> bool {
        let resized = frame.width() != self.width
            || frame.height() != self.height
            || frame.pitch() != self.pitch;
        if resized {
            debug!(
                "TEXTURE: Recreating {}x{} -> {}x{}",
                self.width,
                self.height,
                frame.width(),
                frame.height()
            );
            self.width = frame.width();
            self.height = frame.height();
            self.pitch = frame.pitch();
            self.staging = vec![0u8; self.pitch * self.height as usize];
        }

        let src = frame.as_bytes();
        for y in 0..self.height as usize {
            let row = y * self.pitch..(y + 1) * self.pitch;
            self.staging[row.clone()].copy_from_slice(&src[row]);
        }
        self.uploads += 1;
        resized
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pitch(&self) -> usize {
        self.pitch
    }

    pub fn staging(&self) -> &[u8] {
        &self.staging
    }

    pub fn uploads(&self) -> u64 {
        self.uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_copies_rows() {
        let mut frame = RgbaBitmap::new(3, 2);
        frame.fill([1, 2, 3, 255]);
        let mut tex = TexStream::new(3, 2);
        assert!(!tex.update(&frame));
        assert_eq!(tex.pitch(), 16);
        assert_eq!(&tex.staging()[16..20], &[1, 2, 3, 255]);
        assert_eq!(tex.uploads(), 1);
    }

    #[test]
    fn test_update_follows_resize() {
        let mut tex = TexStream::new(640, 480);
        let frame = RgbaBitmap::new(64, 48);
        assert!(tex.update(&frame));
        assert_eq!((tex.width(), tex.height()), (64, 48));
        assert_eq!(tex.staging().len(), frame.as_bytes().len());
        assert!(!tex.update(&frame));
    }
}
