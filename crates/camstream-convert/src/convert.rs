//! Raw frame to RGBA conversion.
//!
//! Every converter reads `height` rows of the source honoring `pitch` and
//! writes `width` RGBA pixels per row into a pre-sized [`RgbaBitmap`]. They
//! never allocate and can run on any thread.
//!
//! A negative pitch means rows are stored bottom-up (first row in memory is
//! the last image row); only the RGB layouts accept it.

use crate::bitmap::RgbaBitmap;
use crate::error::{ConvertError, ConvertResult};

/// `(destination, source, source pitch, width, height)`.
pub type ConvertFn = fn(&mut RgbaBitmap, &[u8], i32, u32, u32) -> ConvertResult<()>;

/// Row accessor over a packed source buffer.
struct SourceRows<'a> {
    src: &'a [u8],
    stride: usize,
    row_bytes: usize,
    height: u32,
    bottom_up: bool,
}

impl<'a> SourceRows<'a> {
    fn new(
        src: &'a [u8],
        pitch: i32,
        row_bytes: usize,
        height: u32,
        allow_bottom_up: bool,
    ) -> ConvertResult<Self> {
        let stride = pitch.unsigned_abs() as usize;
        if stride < row_bytes || (pitch < 0 && !allow_bottom_up) {
            return Err(ConvertError::InvalidPitch { pitch, row_bytes });
        }
        if height > 0 {
            let needed = stride * (height as usize - 1) + row_bytes;
            if src.len() < needed {
                return Err(ConvertError::SourceTooShort {
                    needed,
                    actual: src.len(),
                });
            }
        }
        Ok(Self {
            src,
            stride,
            row_bytes,
            height,
            bottom_up: pitch < 0,
        })
    }

    fn row(&self, y: u32) -> &'a [u8] {
        let index = if self.bottom_up { self.height - 1 - y } else { y };
        let start = index as usize * self.stride;
        &self.src[start..start + self.row_bytes]
    }
}

fn check_destination(dst: &RgbaBitmap, width: u32, height: u32) -> ConvertResult<()> {
    if dst.width() != width || dst.height() != height {
        return Err(ConvertError::DimensionMismatch {
            dst_width: dst.width(),
            dst_height: dst.height(),
            width,
            height,
        });
    }
    Ok(())
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// BT.601 studio-range YCbCr to RGBA, 8-bit fixed point.
#[inline]
pub fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp_u8((298 * c + 409 * e + 128) >> 8),
        clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp_u8((298 * c + 516 * d + 128) >> 8),
        255,
    ]
}

/// RGB32: memory order B, G, R, X. The X byte is replaced by opaque alpha.
pub fn convert_bgrx32(
    dst: &mut RgbaBitmap,
    src: &[u8],
    pitch: i32,
    width: u32,
    height: u32,
) -> ConvertResult<()> {
    check_destination(dst, width, height)?;
    let rows = SourceRows::new(src, pitch, width as usize * 4, height, true)?;
    for y in 0..height {
        let src_row = rows.row(y);
        for (out, px) in dst.row_mut(y).chunks_exact_mut(4).zip(src_row.chunks_exact(4)) {
            out.copy_from_slice(&[px[2], px[1], px[0], 255]);
        }
    }
    Ok(())
}

/// RGB24: memory order B, G, R.
pub fn convert_bgr24(
    dst: &mut RgbaBitmap,
    src: &[u8],
    pitch: i32,
    width: u32,
    height: u32,
) -> ConvertResult<()> {
    check_destination(dst, width, height)?;
    let rows = SourceRows::new(src, pitch, width as usize * 3, height, true)?;
    for y in 0..height {
        let src_row = rows.row(y);
        for (out, px) in dst.row_mut(y).chunks_exact_mut(4).zip(src_row.chunks_exact(3)) {
            out.copy_from_slice(&[px[2], px[1], px[0], 255]);
        }
    }
    Ok(())
}

/// RGB24 with memory order R, G, B (what most V4L2 drivers call `RGB3`).
pub fn convert_rgb24(
    dst: &mut RgbaBitmap,
    src: &[u8],
    pitch: i32,
    width: u32,
    height: u32,
) -> ConvertResult<()> {
    check_destination(dst, width, height)?;
    let rows = SourceRows::new(src, pitch, width as usize * 3, height, true)?;
    for y in 0..height {
        let src_row = rows.row(y);
        for (out, px) in dst.row_mut(y).chunks_exact_mut(4).zip(src_row.chunks_exact(3)) {
            out.copy_from_slice(&[px[0], px[1], px[2], 255]);
        }
    }
    Ok(())
}

/// YUY2: packed 4:2:2, each macropixel `Y0 U Y1 V` covers two pixels.
/// With an odd width the last macropixel contributes only its first pixel.
pub fn convert_yuy2(
    dst: &mut RgbaBitmap,
    src: &[u8],
    pitch: i32,
    width: u32,
    height: u32,
) -> ConvertResult<()> {
    check_destination(dst, width, height)?;
    let row_bytes = (width as usize).div_ceil(2) * 4;
    let rows = SourceRows::new(src, pitch, row_bytes, height, false)?;
    let w = width as usize;
    for y in 0..height {
        let src_row = rows.row(y);
        let out = dst.row_mut(y);
        for (pair, mp) in src_row.chunks_exact(4).enumerate() {
            let (y0, u, y1, v) = (mp[0], mp[1], mp[2], mp[3]);
            let x = pair * 2;
            out[x * 4..x * 4 + 4].copy_from_slice(&yuv_to_rgba(y0, u, v));
            if x + 1 < w {
                out[(x + 1) * 4..(x + 2) * 4].copy_from_slice(&yuv_to_rgba(y1, u, v));
            }
        }
    }
    Ok(())
}

/// NV12: `height` luma rows, then `ceil(height / 2)` rows of interleaved
/// U, V samples at the same pitch. Each chroma pair covers a 2x2 luma block.
pub fn convert_nv12(
    dst: &mut RgbaBitmap,
    src: &[u8],
    pitch: i32,
    width: u32,
    height: u32,
) -> ConvertResult<()> {
    check_destination(dst, width, height)?;
    if height == 0 || width == 0 {
        return Ok(());
    }
    let w = width as usize;
    let uv_row_bytes = w.div_ceil(2) * 2;
    let luma = SourceRows::new(src, pitch, w, height, false)?;
    let stride = luma.stride;
    let luma_len = stride * height as usize;
    let chroma_height = height.div_ceil(2);
    let chroma_src = src.get(luma_len..).ok_or(ConvertError::SourceTooShort {
        needed: luma_len + uv_row_bytes,
        actual: src.len(),
    })?;
    let chroma = SourceRows::new(chroma_src, pitch, uv_row_bytes, chroma_height, false)
        .map_err(|e| match e {
            ConvertError::SourceTooShort { needed, actual } => ConvertError::SourceTooShort {
                needed: needed + luma_len,
                actual: actual + luma_len,
            },
            other => other,
        })?;

    for y in 0..height {
        let y_row = luma.row(y);
        let uv_row = chroma.row(y / 2);
        let out = dst.row_mut(y);
        for x in 0..w {
            let c = (x / 2) * 2;
            out[x * 4..x * 4 + 4].copy_from_slice(&yuv_to_rgba(y_row[x], uv_row[c], uv_row[c + 1]));
        }
    }
    Ok(())
}
