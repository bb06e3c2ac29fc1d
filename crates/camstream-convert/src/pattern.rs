//! RGB to device encodings, for synthetic sources and tests.
//!
//! The inverse of the converters: takes packed RGB24 and produces a frame in
//! one of the catalog layouts with an arbitrary pitch. Padding bytes are
//! filled with `0xCD` so a converter that reads them shows up in tests.

use crate::error::{ConvertError, ConvertResult};
use crate::format::PixelLayout;

const PADDING_BYTE: u8 = 0xCD;

/// RGB to BT.601 studio-range YCbCr.
///
/// - Y =  16 + 0.257 * R + 0.504 * G + 0.098 * B
/// - U = 128 - 0.148 * R - 0.291 * G + 0.439 * B
/// - V = 128 + 0.439 * R - 0.368 * G - 0.071 * B
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r = r as f32;
    let g = g as f32;
    let b = b as f32;

    let y = (16.0 + 0.257 * r + 0.504 * g + 0.098 * b + 0.5).clamp(0.0, 255.0) as u8;
    let u = (128.0 - 0.148 * r - 0.291 * g + 0.439 * b + 0.5).clamp(0.0, 255.0) as u8;
    let v = (128.0 + 0.439 * r - 0.368 * g - 0.071 * b + 0.5).clamp(0.0, 255.0) as u8;
    (y, u, v)
}

/// A packed RGB24 image of one color.
pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    rgb.iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 3)
        .collect()
}

/// Eight vertical color bars, shifted right by `phase` pixels.
pub fn color_bars(width: u32, height: u32, phase: u32) -> Vec<u8> {
    const BARS: [[u8; 3]; 8] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
        [16, 16, 16],
    ];
    let bar_width = (width / 8).max(1);
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for _ in 0..height {
        for x in 0..width {
            let bar = (((x + phase) / bar_width) % 8) as usize;
            rgb.extend_from_slice(&BARS[bar]);
        }
    }
    rgb
}

/// Encode packed RGB24 into `layout` with the given (top-down) pitch.
pub fn encode_rgb(
    layout: PixelLayout,
    rgb: &[u8],
    width: u32,
    height: u32,
    pitch: usize,
) -> ConvertResult<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let min_pitch = layout.min_pitch(width);
    if pitch < min_pitch {
        return Err(ConvertError::InvalidPitch {
            pitch: pitch as i32,
            row_bytes: min_pitch,
        });
    }
    if rgb.len() < w * h * 3 {
        return Err(ConvertError::SourceTooShort {
            needed: w * h * 3,
            actual: rgb.len(),
        });
    }

    let mut out = vec![PADDING_BYTE; layout.frame_len(pitch, height)];
    let px = |x: usize, y: usize| {
        let i = (y * w + x) * 3;
        (rgb[i], rgb[i + 1], rgb[i + 2])
    };

    match layout {
        PixelLayout::Bgrx32 | PixelLayout::Bgr24 | PixelLayout::Rgb24 => {
            let bpp = if layout == PixelLayout::Bgrx32 { 4 } else { 3 };
            for y in 0..h {
                let row = &mut out[y * pitch..y * pitch + w * bpp];
                for (x, dst) in row.chunks_exact_mut(bpp).enumerate() {
                    let (r, g, b) = px(x, y);
                    match layout {
                        PixelLayout::Rgb24 => dst.copy_from_slice(&[r, g, b]),
                        PixelLayout::Bgr24 => dst.copy_from_slice(&[b, g, r]),
                        _ => dst.copy_from_slice(&[b, g, r, 0xFF]),
                    }
                }
            }
        }
        PixelLayout::Yuyv => {
            for y in 0..h {
                let row = &mut out[y * pitch..y * pitch + min_pitch];
                for (pair, mp) in row.chunks_exact_mut(4).enumerate() {
                    let x0 = pair * 2;
                    let x1 = (x0 + 1).min(w - 1);
                    // Chroma sampled from the left pixel of each pair
                    let (r0, g0, b0) = px(x0, y);
                    let (r1, g1, b1) = px(x1, y);
                    let (y0, u, v) = rgb_to_yuv(r0, g0, b0);
                    let (y1, _, _) = rgb_to_yuv(r1, g1, b1);
                    mp.copy_from_slice(&[y0, u, y1, v]);
                }
            }
        }
        PixelLayout::Nv12 => {
            // First pass: Y for every pixel
            for y in 0..h {
                for x in 0..w {
                    let (r, g, b) = px(x, y);
                    out[y * pitch + x] = rgb_to_yuv(r, g, b).0;
                }
            }
            // Second pass: UV from the top-left pixel of each 2x2 block
            let uv_base = pitch * h;
            for cy in 0..h.div_ceil(2) {
                for cx in 0..w.div_ceil(2) {
                    let (r, g, b) = px(cx * 2, cy * 2);
                    let (_, u, v) = rgb_to_yuv(r, g, b);
                    let i = uv_base + cy * pitch + cx * 2;
                    out[i] = u;
                    out[i + 1] = v;
                }
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_and_black_to_yuv() {
        assert_eq!(rgb_to_yuv(255, 255, 255), (235, 128, 128));
        assert_eq!(rgb_to_yuv(0, 0, 0), (16, 128, 128));
    }

    #[test]
    fn test_encoded_sizes() {
        let rgb = solid_rgb(4, 4, [1, 2, 3]);
        assert_eq!(encode_rgb(PixelLayout::Bgrx32, &rgb, 4, 4, 20).unwrap().len(), 80);
        assert_eq!(encode_rgb(PixelLayout::Yuyv, &rgb, 4, 4, 8).unwrap().len(), 32);
        assert_eq!(encode_rgb(PixelLayout::Nv12, &rgb, 4, 4, 4).unwrap().len(), 24);
    }

    #[test]
    fn test_padding_is_marked() {
        let rgb = solid_rgb(2, 2, [9, 9, 9]);
        let out = encode_rgb(PixelLayout::Bgr24, &rgb, 2, 2, 8).unwrap();
        assert_eq!(&out[6..8], &[PADDING_BYTE, PADDING_BYTE]);
        assert_eq!(&out[0..3], &[9, 9, 9]);
    }

    #[test]
    fn test_pitch_below_row_rejected() {
        let rgb = solid_rgb(4, 1, [0, 0, 0]);
        assert!(encode_rgb(PixelLayout::Bgr24, &rgb, 4, 1, 11).is_err());
    }

    #[test]
    fn test_color_bars_shift() {
        let a = color_bars(16, 1, 0);
        let b = color_bars(16, 1, 2);
        assert_eq!(&a[2 * 3..3 * 3], &b[0..3]);
    }
}
