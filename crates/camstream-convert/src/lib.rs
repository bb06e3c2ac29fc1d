//! Pixel format catalog and raw-frame converters.
//!
//! This crate is platform-free: it knows how device encodings are laid out in
//! memory and how to turn them into the canonical [`RgbaBitmap`].

pub mod bitmap;
pub mod convert;
pub mod error;
pub mod format;
pub mod pattern;

pub use bitmap::{RgbaBitmap, RGBA_BYTES_PER_PIXEL, ROW_ALIGNMENT};
pub use convert::ConvertFn;
pub use error::{ConvertError, ConvertResult};
pub use format::{FormatEntry, FourCc, PixelLayout, RawFrameType};
