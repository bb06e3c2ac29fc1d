//! Pixel format catalog.
//!
//! Maps device format identifiers (FourCC codes) to a [`RawFrameType`] and the
//! converter that turns that encoding into RGBA. The table is a plain
//! `static`, so lookups need no synchronization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::convert::{
    convert_bgr24, convert_bgrx32, convert_nv12, convert_rgb24, convert_yuy2, ConvertFn,
};
use crate::error::ConvertError;

/// Four-character format code as reported by a capture driver.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    /// 32bpp, memory order B, G, R, X.
    pub const XRGB32: FourCc = FourCc(*b"XR24");
    /// 32bpp with alpha, memory order B, G, R, A. Alpha is ignored.
    pub const ARGB32: FourCc = FourCc(*b"AR24");
    /// 24bpp, memory order B, G, R.
    pub const BGR24: FourCc = FourCc(*b"BGR3");
    /// 24bpp, memory order R, G, B.
    pub const RGB24: FourCc = FourCc(*b"RGB3");
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const YUY2: FourCc = FourCc(*b"YUY2");
    pub const NV12: FourCc = FourCc(*b"NV12");
    pub const MJPG: FourCc = FourCc(*b"MJPG");

    pub const fn new(code: [u8; 4]) -> Self {
        Self(code)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

/// Device-native pixel encoding before conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawFrameType {
    #[default]
    Unknown,
    Rgb32,
    Rgb24,
    Yuy2,
    Nv12,
}

impl RawFrameType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Rgb32 => "RGB32",
            Self::Rgb24 => "RGB24",
            Self::Yuy2 => "YUY2",
            Self::Nv12 => "NV12",
        }
    }
}

impl fmt::Display for RawFrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawFrameType {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb32" => Ok(Self::Rgb32),
            "rgb24" => Ok(Self::Rgb24),
            "yuy2" | "yuyv" => Ok(Self::Yuy2),
            "nv12" => Ok(Self::Nv12),
            other => Err(ConvertError::Unsupported(format!("unknown raw frame type `{other}`"))),
        }
    }
}

/// Memory layout of one encoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Bgrx32,
    Bgr24,
    Rgb24,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
    /// Y plane followed by an interleaved half-resolution UV plane.
    Nv12,
}

impl PixelLayout {
    /// Smallest valid pitch for a row of `width` pixels.
    pub fn min_pitch(&self, width: u32) -> usize {
        let w = width as usize;
        match self {
            Self::Bgrx32 => w * 4,
            Self::Bgr24 | Self::Rgb24 => w * 3,
            Self::Yuyv => w.div_ceil(2) * 4,
            Self::Nv12 => w.div_ceil(2) * 2,
        }
    }

    /// Total buffer length for a top-down frame with the given pitch.
    pub fn frame_len(&self, pitch: usize, height: u32) -> usize {
        let h = height as usize;
        match self {
            Self::Nv12 => pitch * (h + h.div_ceil(2)),
            _ => pitch * h,
        }
    }

    /// Whether rows may be stored bottom-up (negative pitch).
    pub fn allows_bottom_up(&self) -> bool {
        matches!(self, Self::Bgrx32 | Self::Bgr24 | Self::Rgb24)
    }
}

/// One catalog row: identifier, tag, layout and converter.
#[derive(Clone, Copy)]
pub struct FormatEntry {
    pub fourcc: FourCc,
    pub raw_type: RawFrameType,
    pub layout: PixelLayout,
    pub converter: ConvertFn,
}

impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry")
            .field("fourcc", &self.fourcc)
            .field("raw_type", &self.raw_type)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Ordered so the first entry for a raw type is its canonical identifier.
static CATALOG: [FormatEntry; 7] = [
    FormatEntry {
        fourcc: FourCc::XRGB32,
        raw_type: RawFrameType::Rgb32,
        layout: PixelLayout::Bgrx32,
        converter: convert_bgrx32,
    },
    FormatEntry {
        fourcc: FourCc::ARGB32,
        raw_type: RawFrameType::Rgb32,
        layout: PixelLayout::Bgrx32,
        converter: convert_bgrx32,
    },
    FormatEntry {
        fourcc: FourCc::BGR24,
        raw_type: RawFrameType::Rgb24,
        layout: PixelLayout::Bgr24,
        converter: convert_bgr24,
    },
    FormatEntry {
        fourcc: FourCc::RGB24,
        raw_type: RawFrameType::Rgb24,
        layout: PixelLayout::Rgb24,
        converter: convert_rgb24,
    },
    FormatEntry {
        fourcc: FourCc::YUY2,
        raw_type: RawFrameType::Yuy2,
        layout: PixelLayout::Yuyv,
        converter: convert_yuy2,
    },
    FormatEntry {
        fourcc: FourCc::YUYV,
        raw_type: RawFrameType::Yuy2,
        layout: PixelLayout::Yuyv,
        converter: convert_yuy2,
    },
    FormatEntry {
        fourcc: FourCc::NV12,
        raw_type: RawFrameType::Nv12,
        layout: PixelLayout::Nv12,
        converter: convert_nv12,
    },
];

/// Look up a device format identifier. `None` means "unsupported".
pub fn lookup(fourcc: FourCc) -> Option<&'static FormatEntry> {
    CATALOG.iter().find(|e| e.fourcc == fourcc)
}

/// All identifiers that decode to `raw_type`, canonical first.
pub fn entries_for(raw_type: RawFrameType) -> impl Iterator<Item = &'static FormatEntry> {
    CATALOG.iter().filter(move |e| e.raw_type == raw_type)
}

/// Every catalog row, in table order.
pub fn entries() -> &'static [FormatEntry] {
    &CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_and_unknown() {
        let e = lookup(FourCc::YUYV).unwrap();
        assert_eq!(e.raw_type, RawFrameType::Yuy2);
        assert_eq!(lookup(FourCc::YUY2).unwrap().raw_type, RawFrameType::Yuy2);
        assert!(lookup(FourCc::MJPG).is_none());
    }

    #[test]
    fn test_every_tag_has_a_canonical_identifier() {
        for ty in [
            RawFrameType::Rgb32,
            RawFrameType::Rgb24,
            RawFrameType::Yuy2,
            RawFrameType::Nv12,
        ] {
            let first = entries_for(ty).next().unwrap();
            assert_eq!(lookup(first.fourcc).unwrap().raw_type, ty);
        }
        assert!(entries_for(RawFrameType::Unknown).next().is_none());
        let rgb24: Vec<_> = entries_for(RawFrameType::Rgb24).map(|e| e.fourcc).collect();
        assert_eq!(rgb24, vec![FourCc::BGR24, FourCc::RGB24]);
    }

    #[test]
    fn test_identifiers_are_unique() {
        for (i, a) in entries().iter().enumerate() {
            for b in &entries()[i + 1..] {
                assert_ne!(a.fourcc, b.fourcc);
            }
        }
    }

    #[test]
    fn test_raw_frame_type_parse_and_display() {
        assert_eq!("NV12".parse::<RawFrameType>().unwrap(), RawFrameType::Nv12);
        assert_eq!("yuyv".parse::<RawFrameType>().unwrap(), RawFrameType::Yuy2);
        assert!("mjpeg".parse::<RawFrameType>().is_err());
        assert_eq!(RawFrameType::Rgb24.to_string(), "RGB24");

        let json = serde_json::to_string(&RawFrameType::Rgb32).unwrap();
        assert_eq!(json, "\"rgb32\"");
    }

    #[test]
    fn test_min_pitch_and_frame_len() {
        assert_eq!(PixelLayout::Yuyv.min_pitch(5), 12);
        assert_eq!(PixelLayout::Nv12.min_pitch(5), 6);
        assert_eq!(PixelLayout::Bgr24.min_pitch(64), 192);
        assert_eq!(PixelLayout::Nv12.frame_len(8, 3), 8 * 5);
    }

    #[test]
    fn test_fourcc_display() {
        assert_eq!(FourCc::NV12.to_string(), "NV12");
        assert_eq!(FourCc([0, b'A', b'B', b'C']).to_string(), ".ABC");
    }
}
